//! Shared value types for the higher-level `Hypervisor` CLI surface
//! (`vmctl create/start/stop/...`), kept distinct from the literal
//! bridge/KVM core's own `vm::Vm`/`kvm::Supervisor` data model.

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendTag {
    Noop,
    Qemu,
}

impl fmt::Display for BackendTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Noop => write!(f, "noop"),
            Self::Qemu => write!(f, "qemu"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VmState {
    Prepared,
    Running,
    Stopped,
    Destroyed,
}

impl fmt::Display for VmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Prepared => write!(f, "prepared"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
            Self::Destroyed => write!(f, "destroyed"),
        }
    }
}

/// How a prepared VM's network should be realized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkConfig {
    /// No network device.
    None,
    /// QEMU user-mode networking with an optional forwarded SSH port.
    User,
    /// Bridged via the bridge/tap manager: bridge name, VLAN, optional MAC.
    Bridge {
        bridge: String,
        vlan: i32,
        mac: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudInitConfig {
    pub user_data: Vec<u8>,
    pub instance_id: Option<String>,
    pub hostname: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshConfig {
    pub user: String,
    pub public_key: Option<String>,
    pub private_key_path: Option<PathBuf>,
    pub private_key_pem: Option<String>,
}

/// The caller-supplied description of a VM to prepare, independent of backend.
#[derive(Debug, Clone)]
pub struct VmSpec {
    pub name: String,
    pub image_path: PathBuf,
    pub vcpus: u32,
    pub memory_mb: u32,
    pub disk_gb: Option<u32>,
    pub network: NetworkConfig,
    pub cloud_init: Option<CloudInitConfig>,
    pub ssh: Option<SshConfig>,
}

/// A backend's handle to a prepared or running VM; this is the unit
/// persisted in the `vmctl` state store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmHandle {
    pub id: String,
    pub name: String,
    pub backend: BackendTag,
    pub work_dir: PathBuf,
    pub overlay_path: Option<PathBuf>,
    pub seed_iso_path: Option<PathBuf>,
    pub pid: Option<u32>,
    pub qmp_socket: Option<PathBuf>,
    pub console_socket: Option<PathBuf>,
    pub vnc_addr: Option<SocketAddr>,
    pub network: NetworkConfig,
    pub ssh_host_port: Option<u16>,
}
