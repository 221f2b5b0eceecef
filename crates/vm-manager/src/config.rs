use std::path::PathBuf;
use std::time::Duration;

/// Ambient configuration for the bridge/tap manager and KVM supervisor.
///
/// `vmctl` populates one of these from CLI flags (clap's `env` support lets
/// every field be overridden by an environment variable); library
/// consumers that embed `vm-manager` directly can just use
/// [`Config::default`].
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding `bridges` and per-VM instance directories.
    pub base_dir: PathBuf,
    /// Bridge name an empty bridge reference resolves to.
    pub default_bridge: String,
    /// Prefix for allocator-drawn tap names (`mega_tap0`, `mega_tap1`, ...).
    pub tap_prefix: String,
    /// Timeout applied to every shelled-out `ip`/`ovs-*` invocation.
    pub ovs_timeout: Duration,
    /// Number of QMP dial attempts before giving up on a launch.
    pub qmp_connect_retry: u32,
    /// Delay between QMP dial attempts.
    pub qmp_connect_delay: Duration,
    /// Hugepages mount point; when set, `-mem-info <path>` is added to argv.
    pub hugepages_mount: Option<PathBuf>,
    pub tools: ToolPaths,
}

/// Resolved paths to the external binaries the manager shells out to.
#[derive(Debug, Clone)]
pub struct ToolPaths {
    pub ip: PathBuf,
    pub ovs_vsctl: PathBuf,
    pub ovs_ofctl: PathBuf,
    pub dhcp: PathBuf,
    pub qemu_system_x86_64: PathBuf,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            ip: "ip".into(),
            ovs_vsctl: "ovs-vsctl".into(),
            ovs_ofctl: "ovs-ofctl".into(),
            dhcp: "dhcp".into(),
            qemu_system_x86_64: "qemu-system-x86_64".into(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_dir: dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join("vmctl")
                .join("mega"),
            default_bridge: "mega_bridge".into(),
            tap_prefix: "mega_tap".into(),
            ovs_timeout: Duration::from_secs(5),
            qmp_connect_retry: 30,
            qmp_connect_delay: Duration::from_millis(500),
            hugepages_mount: None,
            tools: ToolPaths::default(),
        }
    }
}

impl Config {
    pub fn bridges_file(&self) -> PathBuf {
        self.base_dir.join("bridges")
    }

    pub fn instance_dir(&self, id: u64) -> PathBuf {
        self.base_dir.join(id.to_string())
    }
}
