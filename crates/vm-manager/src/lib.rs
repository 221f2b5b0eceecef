//! `vm-manager`: the host-side virtualization substrate.
//!
//! Two tightly-coupled cores (spec §1): the bridge/tap manager
//! ([`bridge`], [`taps`], [`iplearn`], [`netflow`], [`shellout`]) and the
//! KVM instance supervisor ([`vm`], [`kvm`], [`info`]). Around them, the
//! ambient surface this crate's CLI also needs: image handling
//! ([`image`], [`oci`], [`cloudinit`]), guest provisioning ([`provision`],
//! [`ssh`]), a declarative VM file format ([`vmfile`]), and a small
//! backend-router abstraction ([`traits`], [`backends`], [`types`]) kept
//! from the original create/start/stop CLI surface.

pub mod backends;
pub mod bridge;
pub mod cloudinit;
pub mod config;
pub mod env;
pub mod error;
pub mod image;
pub mod info;
pub mod iplearn;
pub mod kvm;
pub mod netflow;
pub mod oci;
pub mod persist;
pub mod provision;
pub mod shellout;
pub mod ssh;
pub mod taps;
pub mod traits;
pub mod types;
pub mod vm;
pub mod vmfile;

pub use backends::RouterHypervisor;
pub use config::Config;
pub use env::Env;
pub use error::{Result, VmError};
pub use traits::{ConsoleEndpoint, Hypervisor};
pub use types::{BackendTag, CloudInitConfig, NetworkConfig, SshConfig, VmHandle, VmSpec, VmState};

/// Process-wide collaborators for the bridge/tap manager and KVM
/// supervisor, constructed once and passed explicitly rather than reached
/// for as ambient globals (spec §9).
pub struct App {
    pub env: Env,
    pub bridges: std::sync::Arc<bridge::Registry>,
    pub vms: std::sync::Arc<vm::Registry>,
    pub overrides: std::sync::Arc<kvm::OverrideTable>,
}

impl App {
    pub fn new(config: Config) -> Self {
        let env = Env::new(config);
        Self::from_env(env)
    }

    pub fn from_env(env: Env) -> Self {
        let bridges = std::sync::Arc::new(bridge::Registry::new(env.clone()));
        let vms = std::sync::Arc::new(vm::Registry::new());
        let overrides = std::sync::Arc::new(kvm::OverrideTable::new());
        Self {
            env,
            bridges,
            vms,
            overrides,
        }
    }

    pub fn supervisor(&self) -> kvm::Supervisor {
        kvm::Supervisor::new(
            self.env.clone(),
            self.bridges.clone(),
            self.vms.clone(),
            self.overrides.clone(),
        )
    }
}
