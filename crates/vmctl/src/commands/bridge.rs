use clap::{Args, Subcommand};
use miette::{IntoDiagnostic, Result};
use vm_manager::bridge::{Registry, TunnelKind};
use vm_manager::config::Config;
use vm_manager::env::Env;

#[derive(Subcommand)]
pub enum BridgeCommand {
    /// List every bridge in the registry
    List,
    /// Tear down a bridge (no-op on its OVS state if it pre-existed)
    Destroy(NameArgs),
    TapCreate(TapCreateArgs),
    TapDestroy(TapArgs),
    TrunkAdd(TrunkArgs),
    TrunkRemove(TrunkArgs),
    TunnelAdd(TunnelAddArgs),
    TunnelRemove(TrunkArgs),
    MirrorAdd(NameArgs),
    MirrorRemove(TapArgs),
    NetflowStart(NetflowArgs),
    NetflowStop(NameArgs),
}

#[derive(Args)]
pub struct NameArgs {
    bridge: String,
}

#[derive(Args)]
pub struct TapArgs {
    bridge: String,
    tap: String,
}

#[derive(Args)]
pub struct TapCreateArgs {
    bridge: String,
    #[arg(long, default_value = "0")]
    vlan: i32,
    #[arg(long)]
    host: bool,
    #[arg(long)]
    name: Option<String>,
}

#[derive(Args)]
pub struct TrunkArgs {
    bridge: String,
    iface: String,
}

#[derive(Args)]
pub struct TunnelAddArgs {
    bridge: String,
    kind: String,
    remote_ip: String,
}

#[derive(Args)]
pub struct NetflowArgs {
    bridge: String,
    #[arg(long, default_value = "60")]
    active_timeout: u32,
}

fn registry() -> Registry {
    Registry::new(Env::new(Config::default()))
}

pub async fn run(cmd: BridgeCommand) -> Result<()> {
    let reg = registry();
    match cmd {
        BridgeCommand::List => {
            for name in reg.enumerate().await {
                println!("{name}");
            }
            Ok(())
        }
        BridgeCommand::Destroy(args) => {
            reg.destroy_bridge(&args.bridge).await.into_diagnostic()?;
            println!("bridge '{}' destroyed", args.bridge);
            Ok(())
        }
        BridgeCommand::TapCreate(args) => {
            let br = reg.get(&args.bridge).await.into_diagnostic()?;
            let tap = br
                .tap_create(args.name, args.vlan, args.host)
                .await
                .into_diagnostic()?;
            println!("{tap}");
            Ok(())
        }
        BridgeCommand::TapDestroy(args) => {
            let br = reg.get(&args.bridge).await.into_diagnostic()?;
            br.tap_destroy(&args.tap).await.into_diagnostic()?;
            println!("tap '{}' destroyed", args.tap);
            Ok(())
        }
        BridgeCommand::TrunkAdd(args) => {
            let br = reg.get(&args.bridge).await.into_diagnostic()?;
            br.trunk_add(&args.iface).await.into_diagnostic()?;
            println!("trunk '{}' added to '{}'", args.iface, args.bridge);
            Ok(())
        }
        BridgeCommand::TrunkRemove(args) => {
            let br = reg.get(&args.bridge).await.into_diagnostic()?;
            br.trunk_remove(&args.iface).await.into_diagnostic()?;
            println!("trunk '{}' removed from '{}'", args.iface, args.bridge);
            Ok(())
        }
        BridgeCommand::TunnelAdd(args) => {
            let kind: TunnelKind = args.kind.parse().into_diagnostic()?;
            let br = reg.get(&args.bridge).await.into_diagnostic()?;
            let iface = br
                .tunnel_add(kind, &args.remote_ip)
                .await
                .into_diagnostic()?;
            println!("{iface}");
            Ok(())
        }
        BridgeCommand::TunnelRemove(args) => {
            let br = reg.get(&args.bridge).await.into_diagnostic()?;
            br.tunnel_remove(&args.iface).await.into_diagnostic()?;
            println!("tunnel '{}' removed from '{}'", args.iface, args.bridge);
            Ok(())
        }
        BridgeCommand::MirrorAdd(args) => {
            let br = reg.get(&args.bridge).await.into_diagnostic()?;
            let tap = br.mirror_add().await.into_diagnostic()?;
            println!("{tap}");
            Ok(())
        }
        BridgeCommand::MirrorRemove(args) => {
            let br = reg.get(&args.bridge).await.into_diagnostic()?;
            br.mirror_remove(&args.tap).await.into_diagnostic()?;
            println!("mirror on '{}' removed", args.bridge);
            Ok(())
        }
        BridgeCommand::NetflowStart(args) => {
            let br = reg.get(&args.bridge).await.into_diagnostic()?;
            br.new_netflow(args.active_timeout).await.into_diagnostic()?;
            println!("netflow exporter attached to '{}'", args.bridge);
            Ok(())
        }
        BridgeCommand::NetflowStop(args) => {
            let br = reg.get(&args.bridge).await.into_diagnostic()?;
            br.destroy_netflow().await.into_diagnostic()?;
            println!("netflow exporter removed from '{}'", args.bridge);
            Ok(())
        }
    }
}
