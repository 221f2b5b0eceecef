pub mod noop;
pub mod qemu;
pub mod qmp;

use std::path::PathBuf;
use std::time::Duration;

use crate::error::Result;
use crate::traits::{ConsoleEndpoint, Hypervisor};
use crate::types::{VmHandle, VmSpec, VmState};

use noop::NoopBackend;
use qemu::QemuBackend;

/// Picks the concrete [`Hypervisor`] for the host platform and dispatches
/// to it. KVM is only available on Linux; everywhere else falls back to
/// the no-op backend so the CLI stays usable for development.
pub enum RouterHypervisor {
    Noop(NoopBackend),
    Qemu(QemuBackend),
}

impl RouterHypervisor {
    pub fn new(qemu_binary: Option<PathBuf>, default_bridge: Option<String>) -> Self {
        if cfg!(target_os = "linux") {
            Self::Qemu(QemuBackend::new(qemu_binary, None, default_bridge))
        } else {
            Self::Noop(NoopBackend)
        }
    }
}

impl Hypervisor for RouterHypervisor {
    async fn prepare(&self, spec: &VmSpec) -> Result<VmHandle> {
        match self {
            Self::Noop(b) => b.prepare(spec).await,
            Self::Qemu(b) => b.prepare(spec).await,
        }
    }

    async fn start(&self, vm: &VmHandle) -> Result<()> {
        match self {
            Self::Noop(b) => b.start(vm).await,
            Self::Qemu(b) => b.start(vm).await,
        }
    }

    async fn stop(&self, vm: &VmHandle, timeout: Duration) -> Result<()> {
        match self {
            Self::Noop(b) => b.stop(vm, timeout).await,
            Self::Qemu(b) => b.stop(vm, timeout).await,
        }
    }

    async fn suspend(&self, vm: &VmHandle) -> Result<()> {
        match self {
            Self::Noop(b) => b.suspend(vm).await,
            Self::Qemu(b) => b.suspend(vm).await,
        }
    }

    async fn resume(&self, vm: &VmHandle) -> Result<()> {
        match self {
            Self::Noop(b) => b.resume(vm).await,
            Self::Qemu(b) => b.resume(vm).await,
        }
    }

    async fn destroy(&self, vm: VmHandle) -> Result<()> {
        match self {
            Self::Noop(b) => b.destroy(vm).await,
            Self::Qemu(b) => b.destroy(vm).await,
        }
    }

    async fn state(&self, vm: &VmHandle) -> Result<VmState> {
        match self {
            Self::Noop(b) => b.state(vm).await,
            Self::Qemu(b) => b.state(vm).await,
        }
    }

    async fn guest_ip(&self, vm: &VmHandle) -> Result<String> {
        match self {
            Self::Noop(b) => b.guest_ip(vm).await,
            Self::Qemu(b) => b.guest_ip(vm).await,
        }
    }

    fn console_endpoint(&self, vm: &VmHandle) -> Result<ConsoleEndpoint> {
        match self {
            Self::Noop(b) => b.console_endpoint(vm),
            Self::Qemu(b) => b.console_endpoint(vm),
        }
    }
}
