use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, VmError>;

/// Every error surface the bridge/tap manager and KVM supervisor can raise,
/// plus the teacher hypervisor/image/provisioning layer's own variants.
#[derive(Debug, Error)]
pub enum VmError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// An external interface, bridge, or OVS object already exists.
    #[error("{what} already exists: {detail}")]
    AlreadyExists { what: String, detail: String },

    /// No such bridge, tap, VM, or hotplug id.
    #[error("not found: {0}")]
    NotFound(String),

    /// Bad VLAN, unknown tunnel kind, unknown info mask, malformed spec.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// `ip`/`ovs-*`/`qemu`/`dhcp` exited non-zero.
    #[error("external tool '{tool}' failed: {stderr}")]
    ExternalToolFailure { tool: String, stderr: String },

    /// QMP dial retries exhausted.
    #[error("QMP connection to '{instance}' unavailable after {attempts} attempts")]
    QmpUnavailable { instance: String, attempts: u32 },

    #[error("QMP error: {0}")]
    Qmp(String),

    /// Duplicate MAC within a VM, or disk conflict across VMs during preamble.
    #[error("preamble conflict for VM '{vm}': {detail}")]
    ConflictDuringPreamble { vm: String, detail: String },

    /// Failure while tearing down a dependent resource; enumeration continues.
    #[error("cleanup of '{entity}' did not fully complete: {detail}")]
    PartialCleanup { entity: String, detail: String },

    #[error("VM '{name}' is in an invalid state: {state}")]
    InvalidState { name: String, state: String },

    #[error("failed to spawn qemu")]
    QemuSpawnFailed {
        #[source]
        source: std::io::Error,
    },

    #[error("failed to download image from {url}: {detail}")]
    ImageDownloadFailed { url: String, detail: String },

    #[error("failed to detect format of {}: {detail}", path.display())]
    ImageFormatDetectionFailed { path: PathBuf, detail: String },

    #[error("failed to convert image: {detail}")]
    ImageConversionFailed { detail: String },

    #[error("failed to create overlay from {}: {detail}", base.display())]
    OverlayCreationFailed { base: PathBuf, detail: String },

    #[error("failed to pull OCI artifact {reference}: {detail}")]
    OciPullFailed { reference: String, detail: String },

    #[error("failed to create cloud-init ISO: {detail}")]
    CloudInitIsoFailed { detail: String },

    #[error("provision step {step} failed for VM '{vm}': {detail}")]
    ProvisionFailed {
        vm: String,
        step: usize,
        detail: String,
    },

    #[error("timed out discovering guest IP for VM '{name}'")]
    IpDiscoveryTimeout { name: String },

    #[error("ssh error: {0}")]
    Ssh(String),

    #[error("vmfile error: {0}")]
    VmFile(String),
}
