use std::path::PathBuf;
use std::time::Duration;

use crate::error::Result;
use crate::types::{VmHandle, VmSpec, VmState};

/// Where a backend's interactive console is reachable.
#[derive(Debug, Clone)]
pub enum ConsoleEndpoint {
    UnixSocket(PathBuf),
    WebSocket(String),
    None,
}

/// A hypervisor backend capable of preparing, running, and tearing down a
/// single VM. Implemented by the `noop` and `qemu` backends, dispatched
/// through [`crate::backends::RouterHypervisor`].
pub trait Hypervisor: Send + Sync {
    async fn prepare(&self, spec: &VmSpec) -> Result<VmHandle>;
    async fn start(&self, vm: &VmHandle) -> Result<()>;
    async fn stop(&self, vm: &VmHandle, timeout: Duration) -> Result<()>;
    async fn suspend(&self, vm: &VmHandle) -> Result<()>;
    async fn resume(&self, vm: &VmHandle) -> Result<()>;
    async fn destroy(&self, vm: VmHandle) -> Result<()>;
    async fn state(&self, vm: &VmHandle) -> Result<VmState>;
    async fn guest_ip(&self, vm: &VmHandle) -> Result<String>;
    fn console_endpoint(&self, vm: &VmHandle) -> Result<ConsoleEndpoint>;
}
