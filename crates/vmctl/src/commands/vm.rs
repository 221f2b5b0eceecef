use std::path::PathBuf;

use clap::{Args, Subcommand};
use miette::{IntoDiagnostic, Result};
use vm_manager::config::Config;
use vm_manager::kvm::{self, OverrideTable};
use vm_manager::vm::VmConfig;
use vm_manager::App;

#[derive(Subcommand)]
pub enum VmCommand {
    /// Stage or inspect per-name configuration applied on the next launch
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Launch a staged VM under a given backend
    Launch(LaunchArgs),
    /// Tabular query over bridges and VMs
    Info(InfoArgs),
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Add one or more network interfaces to the next launch of `<name>`
    Net(NetArgs),
    #[command(subcommand, name = "qemu-override")]
    QemuOverride(QemuOverrideCommand),
}

#[derive(Args)]
pub struct NetArgs {
    name: String,
    /// `<vlan>` | `<vlan>,<mac>` | `<bridge>,<vlan>` | `<bridge>,<vlan>,<mac>` |
    /// `<vlan>,<driver>` | `<bridge>,<vlan>,<mac>,<driver>`
    specs: Vec<String>,
}

#[derive(Subcommand)]
pub enum QemuOverrideCommand {
    Add { pattern: String, replacement: String },
    /// `*` clears every override
    Delete { id: String },
}

#[derive(Args)]
pub struct LaunchArgs {
    backend: String,
    name: String,
    #[arg(long, default_value = "1024")]
    memory_mb: u32,
    #[arg(long, default_value = "1")]
    vcpus: u32,
    #[arg(long)]
    disk: Vec<PathBuf>,
    #[arg(long)]
    snapshot: bool,
}

#[derive(Args)]
pub struct InfoArgs {
    /// Comma-separated mask list; defaults to id,name,state,bridge,tap,mac,vlan
    #[arg(long, value_delimiter = ',')]
    masks: Option<Vec<String>>,
}

#[derive(Args)]
pub struct KillArgs {
    id: u64,
}

fn default_masks() -> Vec<String> {
    ["id", "name", "state", "bridge", "tap", "mac", "vlan"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn pending_net_file(config: &Config, name: &str) -> PathBuf {
    config.base_dir.join("pending_net").join(name)
}

fn overrides_file(config: &Config) -> PathBuf {
    config.base_dir.join("overrides.json")
}

async fn load_overrides(config: &Config) -> Result<OverrideTable> {
    match tokio::fs::read_to_string(overrides_file(config)).await {
        Ok(raw) => {
            let entries: Vec<(u64, String, String)> = serde_json::from_str(&raw).into_diagnostic()?;
            Ok(OverrideTable::from_entries(entries))
        }
        Err(_) => Ok(OverrideTable::new()),
    }
}

async fn save_overrides(config: &Config, table: &OverrideTable) -> Result<()> {
    let entries = table.list().await;
    if let Some(parent) = overrides_file(config).parent() {
        tokio::fs::create_dir_all(parent).await.into_diagnostic()?;
    }
    let raw = serde_json::to_string_pretty(&entries).into_diagnostic()?;
    tokio::fs::write(overrides_file(config), raw).await.into_diagnostic()
}

pub async fn run(cmd: VmCommand) -> Result<()> {
    let config = Config::default();
    match cmd {
        VmCommand::Config(ConfigCommand::Net(args)) => run_config_net(config, args).await,
        VmCommand::Config(ConfigCommand::QemuOverride(cmd)) => run_qemu_override(config, cmd).await,
        VmCommand::Launch(args) => run_launch(config, args).await,
        VmCommand::Info(args) => run_info(config, args).await,
    }
}

async fn run_config_net(config: Config, args: NetArgs) -> Result<()> {
    let path = pending_net_file(&config, &args.name);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.into_diagnostic()?;
    }
    // Validate eagerly so a bad spec fails at `config` time, not at launch.
    for spec in &args.specs {
        kvm::parse_net_spec(spec, &config.default_bridge, "e1000").into_diagnostic()?;
    }
    let mut existing = tokio::fs::read_to_string(&path).await.unwrap_or_default();
    for spec in &args.specs {
        existing.push_str(spec);
        existing.push('\n');
    }
    tokio::fs::write(&path, existing).await.into_diagnostic()?;
    println!("staged {} interface(s) for '{}'", args.specs.len(), args.name);
    Ok(())
}

async fn run_qemu_override(config: Config, cmd: QemuOverrideCommand) -> Result<()> {
    let table = load_overrides(&config).await?;
    match cmd {
        QemuOverrideCommand::Add { pattern, replacement } => {
            let id = table.add(pattern, replacement).await;
            save_overrides(&config, &table).await?;
            println!("override {id} added");
        }
        QemuOverrideCommand::Delete { id } => {
            if id == "*" {
                table.delete(None).await.into_diagnostic()?;
                println!("all overrides cleared");
            } else {
                let id: u64 = id.parse().into_diagnostic()?;
                table.delete(Some(id)).await.into_diagnostic()?;
                println!("override {id} deleted");
            }
            save_overrides(&config, &table).await?;
        }
    }
    Ok(())
}

async fn run_launch(config: Config, args: LaunchArgs) -> Result<()> {
    if args.backend != "kvm" {
        miette::bail!("unsupported backend '{}': only 'kvm' is implemented", args.backend);
    }

    let net_path = pending_net_file(&config, &args.name);
    let mut networks = Vec::new();
    if let Ok(raw) = tokio::fs::read_to_string(&net_path).await {
        for line in raw.lines().filter(|l| !l.is_empty()) {
            networks.push(kvm::parse_net_spec(line, &config.default_bridge, "e1000").into_diagnostic()?);
        }
    }

    let app = App::new(config);
    let overrides = load_overrides(&app.env.config).await?;
    let app = App {
        overrides: std::sync::Arc::new(overrides),
        ..app
    };
    let supervisor = app.supervisor();

    let vm_config = VmConfig {
        memory_mb: args.memory_mb,
        vcpus: args.vcpus,
        snapshot: args.snapshot,
        disks: args.disk,
        networks,
        ..Default::default()
    };

    let vm = supervisor.build(args.name.clone(), vm_config).await.into_diagnostic()?;
    println!("launching '{}' (id={})", args.name, vm.id);
    supervisor.launch(vm.clone()).await.into_diagnostic()?;
    println!("VM '{}' reached state {}", args.name, vm.state().await);
    Ok(())
}

async fn run_info(config: Config, args: InfoArgs) -> Result<()> {
    let masks = args.masks.unwrap_or_else(default_masks);
    let rows = vm_manager::info::collect_from_disk(&config.base_dir, &masks)
        .await
        .into_diagnostic()?;
    print!("{}", vm_manager::info::format_table(&masks, &rows));
    Ok(())
}

pub async fn run_kill(args: KillArgs) -> Result<()> {
    let config = Config::default();
    let pid_path = config.instance_dir(args.id).join("qemu.pid");
    let pid: i32 = tokio::fs::read_to_string(&pid_path)
        .await
        .into_diagnostic()?
        .trim()
        .parse()
        .into_diagnostic()?;
    // SIGTERM the QEMU process directly: the supervisor that owns this
    // VM is a different process (the blocking `vm launch` invocation)
    // and observes the exit through its own reaper, which performs
    // cleanup and the kill-ack. See DESIGN.md for why kill crosses a
    // process boundary here instead of an in-process channel.
    unsafe {
        if libc::kill(pid, libc::SIGTERM) != 0 {
            miette::bail!("failed to signal pid {pid}: {}", std::io::Error::last_os_error());
        }
    }
    println!("sent SIGTERM to VM {} (pid {pid})", args.id);
    Ok(())
}
