use std::path::PathBuf;

use clap::Args;
use miette::{IntoDiagnostic, Result};
use vm_manager::{Hypervisor, NetworkConfig, RouterHypervisor, VmSpec};

use super::state;

#[derive(Args)]
pub struct CreateArgs {
    /// VM name
    name: String,

    /// Base image path or URL
    #[arg(long)]
    image: PathBuf,

    #[arg(long, default_value = "1")]
    vcpus: u32,

    #[arg(long, default_value = "1024")]
    memory_mb: u32,

    #[arg(long)]
    disk_gb: Option<u32>,

    /// Give the guest QEMU user-mode networking instead of no network
    #[arg(long)]
    user_net: bool,

    /// Start the VM immediately after creating it
    #[arg(long)]
    start: bool,
}

pub async fn run(args: CreateArgs) -> Result<()> {
    let mut store = state::load_store().await?;
    if store.contains_key(&args.name) {
        miette::bail!("VM '{}' already exists", args.name);
    }

    let spec = VmSpec {
        name: args.name.clone(),
        image_path: args.image,
        vcpus: args.vcpus,
        memory_mb: args.memory_mb,
        disk_gb: args.disk_gb,
        network: if args.user_net {
            NetworkConfig::User
        } else {
            NetworkConfig::None
        },
        cloud_init: None,
        ssh: None,
    };

    let hv = RouterHypervisor::new(None, None);
    let handle = hv.prepare(&spec).await.into_diagnostic()?;

    if args.start {
        hv.start(&handle).await.into_diagnostic()?;
    }

    println!("VM '{}' created (id={})", args.name, handle.id);
    store.insert(args.name, handle);
    state::save_store(&store).await
}
