//! The KVM instance supervisor (spec §4.5–§4.7): preamble validation,
//! the pure argv builder, the QEMU-override table, and the per-VM
//! launch/event-loop/cleanup state machine.

use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::backends::qmp::QmpClient;
use crate::bridge::{self, VLAN_TRUNK};
use crate::env::Env;
use crate::error::{Result, VmError};
use crate::persist;
use crate::vm::{NetIface, Registry as VmRegistry, Vm, VmConfig, VmRunState};

/// Ordered `{match, replacement}` edits applied to the assembled argv
/// after it is shell-joined, string substitution, then re-tokenized
/// (spec §4.7). Process-global, constructed once alongside the bridge
/// and VM registries.
pub struct OverrideTable {
    entries: Mutex<Vec<(u64, String, String)>>,
    next_id: AtomicU64,
}

impl OverrideTable {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub async fn add(&self, pattern: String, replacement: String) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.entries.lock().await.push((id, pattern, replacement));
        id
    }

    /// `id = None` clears every entry (the `*` form).
    pub async fn delete(&self, id: Option<u64>) -> Result<()> {
        let mut entries = self.entries.lock().await;
        match id {
            None => {
                entries.clear();
                Ok(())
            }
            Some(id) => {
                let before = entries.len();
                entries.retain(|(existing, _, _)| *existing != id);
                if entries.len() == before {
                    Err(VmError::NotFound(format!("qemu-override id {id}")))
                } else {
                    Ok(())
                }
            }
        }
    }

    pub async fn list(&self) -> Vec<(u64, String, String)> {
        self.entries.lock().await.clone()
    }

    /// Shell-join argv, apply every substitution in insertion order, then
    /// re-tokenize respecting double-quote grouping. With no entries this
    /// is the identity up to shell-escape re-tokenization (spec §8).
    pub async fn apply(&self, argv: Vec<String>) -> Vec<String> {
        let mut joined = shell_join(&argv);
        for (_, pattern, replacement) in self.entries.lock().await.iter() {
            joined = joined.replace(pattern.as_str(), replacement.as_str());
        }
        shell_split(&joined)
    }
}

impl Default for OverrideTable {
    fn default() -> Self {
        Self::new()
    }
}

impl OverrideTable {
    /// Rehydrate from a previously persisted entry list (CLI invocations
    /// are separate processes; the override table is process-global only
    /// within one, so the caller persists/reloads it across runs).
    pub fn from_entries(entries: Vec<(u64, String, String)>) -> Self {
        let next_id = entries.iter().map(|(id, _, _)| *id).max().unwrap_or(0) + 1;
        Self {
            entries: Mutex::new(entries),
            next_id: AtomicU64::new(next_id),
        }
    }
}

fn shell_join(argv: &[String]) -> String {
    argv.iter()
        .map(|a| {
            if a.is_empty() || a.chars().any(char::is_whitespace) {
                format!("\"{a}\"")
            } else {
                a.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Re-tokenize a shell-escaped string, treating `"..."` as one token and
/// collapsing unquoted runs of whitespace.
fn shell_split(s: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut has_token = false;

    for c in s.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                has_token = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if has_token {
                    tokens.push(std::mem::take(&mut current));
                    has_token = false;
                }
            }
            c => {
                current.push(c);
                has_token = true;
            }
        }
    }
    if has_token {
        tokens.push(current);
    }
    tokens
}

/// Assemble the QEMU argv from a validated VM config (spec §4.6). Pure:
/// no shell-out, no mutation. `commit` gates IP-learner MAC registration
/// in the caller, not here — this function only builds the command line.
pub fn build_argv(
    id: u64,
    uuid: &str,
    config: &VmConfig,
    instance_path: &PathBuf,
    hugepages_mount: Option<&PathBuf>,
) -> Vec<String> {
    let mut argv: Vec<String> = Vec::new();
    let instance = instance_path.display();

    argv.extend(
        [
            "-enable-kvm",
            "-name",
        ]
        .map(String::from),
    );
    argv.push(id.to_string());
    argv.push("-m".into());
    argv.push(config.memory_mb.to_string());
    argv.extend(["-nographic", "-balloon", "none", "-vnc"].map(String::from));
    argv.push(format!("0.0.0.0:{id}"));
    argv.extend(["-usbdevice", "tablet", "-smp"].map(String::from));
    argv.push(config.vcpus.to_string());
    argv.push("-qmp".into());
    argv.push(format!("unix:{instance}/qmp,server"));
    argv.extend(
        [
            "-vga", "cirrus", "-rtc", "clock=vm,base=utc", "-device", "virtio-serial", "-chardev",
        ]
        .map(String::from),
    );
    argv.push(format!("socket,id=charserial0,path={instance}/serial,server,nowait"));
    argv.extend(["-device", "virtserialport,chardev=charserial0,id=serial0,name=serial0", "-pidfile"].map(String::from));
    argv.push(format!("{instance}/qemu.pid"));
    argv.extend(["-k", "en-us", "-cpu", "host", "-net", "none", "-S"].map(String::from));

    if let Some(migrate) = &config.migrate {
        argv.push("-incoming".into());
        argv.push(format!("exec:cat {}", migrate.display()));
    }

    for disk in &config.disks {
        argv.push("-drive".into());
        argv.push(format!("file={},media=disk", disk.display()));
    }
    if config.snapshot {
        argv.push("-snapshot".into());
    }
    if let Some(kernel) = &config.kernel {
        argv.push("-kernel".into());
        argv.push(kernel.display().to_string());
    }
    if let Some(initrd) = &config.initrd {
        argv.push("-initrd".into());
        argv.push(initrd.display().to_string());
    }
    if let Some(append) = &config.append {
        argv.push("-append".into());
        argv.push(append.clone());
    }
    if let Some(cdrom) = &config.cdrom {
        argv.push("-drive".into());
        argv.push(format!("file={},if=ide,index=1,media=cdrom", cdrom.display()));
        argv.push("-boot".into());
        argv.push("once=d".into());
    }

    if !config.networks.is_empty() {
        argv.push("-device".into());
        argv.push("pci-bridge,id=pci.1,chassis_nr=1".into());
        let mut bus = 1u32;
        let mut addr = 1u32;
        let mut chassis = 1u32;
        for net in &config.networks {
            let tap = net.tap.as_deref().unwrap_or("");
            argv.push("-netdev".into());
            argv.push(format!("tap,id={tap},script=no,ifname={tap}"));
            argv.push("-device".into());
            let mac = net.mac.as_deref().unwrap_or("");
            argv.push(format!(
                "driver={},netdev={},mac={},bus=pci.{},addr=0x{:x}",
                net.driver, tap, mac, bus, addr
            ));
            addr += 1;
            if addr > 31 {
                addr = 1;
                bus += 1;
                chassis += 1;
                argv.push("-device".into());
                argv.push(format!("pci-bridge,id=pci.{bus},chassis_nr={chassis}"));
            }
        }
    }

    if let Some(mount) = hugepages_mount {
        argv.push("-mem-info".into());
        argv.push(mount.display().to_string());
    }

    argv.extend(config.qemu_append.iter().cloned());
    argv.push("-uuid".into());
    argv.push(uuid.to_string());

    argv
}

static MAC_DRAW_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Draw a random locally-administered, unicast MAC (`52:54:xx:xx:xx:xx`).
fn draw_mac() -> String {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};

    let s = RandomState::new();
    let mut h = s.build_hasher();
    h.write_u64(
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64,
    );
    h.write_u64(MAC_DRAW_COUNTER.fetch_add(1, Ordering::SeqCst));
    let v = h.finish();

    format!(
        "52:54:{:02x}:{:02x}:{:02x}:{:02x}",
        (v >> 24) as u8,
        (v >> 16) as u8,
        (v >> 8) as u8,
        v as u8
    )
}

fn mac_in_use(mac: &str, pools: &[&std::collections::HashSet<String>]) -> bool {
    pools.iter().any(|p| p.contains(mac))
}

/// Per-VM state machine driving a QEMU process end to end (spec §4.5).
pub struct Supervisor {
    env: Env,
    bridges: Arc<bridge::Registry>,
    vms: Arc<VmRegistry>,
    overrides: Arc<OverrideTable>,
}

impl Supervisor {
    pub fn new(
        env: Env,
        bridges: Arc<bridge::Registry>,
        vms: Arc<VmRegistry>,
        overrides: Arc<OverrideTable>,
    ) -> Self {
        Self {
            env,
            bridges,
            vms,
            overrides,
        }
    }

    /// Create and register a new VM in BUILDING state, returning its id.
    /// Does not launch it.
    pub async fn build(&self, name: String, config: VmConfig) -> Result<Arc<Vm>> {
        let id = self.vms.alloc_id();
        let uuid = uuid::Uuid::new_v4().to_string();
        let instance_path = self.env.config.instance_dir(id);
        let vm = Arc::new(Vm::new(id, name, uuid, instance_path, config));
        self.vms.insert(vm.clone()).await;
        Ok(vm)
    }

    /// Launch preamble (spec §4.5 steps 1-6), run under the VM registry's
    /// conceptual lock — we approximate the "global VM-registry lock" by
    /// serializing preamble validation through the fleet snapshot itself,
    /// since the registry's internal map lock is held only for the
    /// duration of `active()`.
    async fn preamble(&self, vm: &Arc<Vm>) -> Result<()> {
        tokio::fs::create_dir_all(&vm.instance_path).await?;

        let fleet = self.vms.active().await;
        let mut macs_other = std::collections::HashSet::new();
        let mut disks_snapshot = std::collections::HashSet::new();
        let mut disks_persistent = std::collections::HashSet::new();
        for other in &fleet {
            if Arc::ptr_eq(other, vm) {
                continue;
            }
            let cfg = other.config.lock().await;
            for net in &cfg.networks {
                if let Some(mac) = &net.mac {
                    macs_other.insert(mac.clone());
                }
            }
            for disk in &cfg.disks {
                let key = disk.display().to_string();
                if cfg.snapshot {
                    disks_snapshot.insert(key);
                } else {
                    disks_persistent.insert(key);
                }
            }
        }

        let mut config = vm.config.lock().await;

        let mut macs_self = std::collections::HashSet::new();
        for net in &config.networks {
            if let Some(mac) = &net.mac {
                if !macs_self.insert(mac.clone()) {
                    let mac = mac.clone();
                    drop(config);
                    vm.set_state(VmRunState::Error).await?;
                    return Err(VmError::ConflictDuringPreamble {
                        vm: vm.name.clone(),
                        detail: format!("duplicate MAC '{mac}' within VM"),
                    });
                }
            }
        }

        for net in config.networks.iter_mut() {
            if net.mac.is_none() {
                let mut candidate = draw_mac();
                while mac_in_use(&candidate, &[&macs_other, &macs_self]) {
                    candidate = draw_mac();
                }
                macs_self.insert(candidate.clone());
                net.mac = Some(candidate);
            }
        }

        for disk in &config.disks {
            let key = disk.display().to_string();
            if disks_persistent.contains(&key)
                || (!config.snapshot && disks_snapshot.contains(&key))
            {
                drop(config);
                vm.set_state(VmRunState::Error).await?;
                return Err(VmError::ConflictDuringPreamble {
                    vm: vm.name.clone(),
                    detail: format!("disk '{key}' conflicts with an active VM"),
                });
            }
        }

        Ok(())
    }

    /// Launch body (spec §4.5 steps 1-7). Runs to completion: blocks the
    /// caller until the VM reaches QUIT/ERROR (natural exit or kill), at
    /// which point cleanup has already run. This collapses the source's
    /// detached per-VM goroutine into the calling task, which is the
    /// natural shape for a one-shot CLI invocation rather than a
    /// long-lived daemon process.
    pub async fn launch(&self, vm: Arc<Vm>) -> Result<()> {
        let ack_tx = self.vms.ack_sender();
        let first_launch = vm.state().await == VmRunState::Building;

        if first_launch {
            if let Err(e) = self.preamble(&vm).await {
                let _ = ack_tx.send(vm.id).await;
                return Err(e);
            }
        } else {
            // Re-entry from QUIT: reset resolved taps before re-creating them.
            let mut config = vm.config.lock().await;
            for net in config.networks.iter_mut() {
                net.tap = None;
            }
        }

        let config_snapshot = vm.config.lock().await.clone();
        let persisted = crate::vm::PersistedConfig {
            id: vm.id,
            name: vm.name.clone(),
            uuid: vm.uuid.clone(),
            config: config_snapshot.clone(),
        };
        persist::write_instance_file(
            &vm.instance_path,
            "config",
            &serde_json::to_string_pretty(&persisted)?,
        )
        .await?;
        persist::write_instance_file(&vm.instance_path, "name", &vm.name).await?;

        let result = self.launch_body(&vm, &config_snapshot).await;

        // Cleanup runs regardless of which branch failed (spec §4.5 step 7).
        self.cleanup_interfaces(&vm).await;

        match &result {
            Ok(()) => {}
            Err(_) => {
                let _ = vm.set_state(VmRunState::Error).await;
            }
        }
        vm.disarm_kill_channel().await;
        let _ = ack_tx.send(vm.id).await;
        result
    }

    async fn launch_body(&self, vm: &Arc<Vm>, config: &VmConfig) -> Result<()> {
        // Step 2: create taps for every interface.
        {
            let mut cfg = vm.config.lock().await;
            for net in cfg.networks.iter_mut() {
                let br = self.bridges.get(&net.bridge).await?;
                let tap = br.tap_create(None, net.vlan, false).await?;
                if net.vlan != VLAN_TRUNK {
                    if let Some(mac) = &net.mac {
                        br.ip_learner().register_mac(mac);
                    }
                }
                net.tap = Some(tap);
            }
            persist::write_instance_file(
                &vm.instance_path,
                "taps",
                &cfg
                    .networks
                    .iter()
                    .filter_map(|n| n.tap.clone())
                    .collect::<Vec<_>>()
                    .join("\n"),
            )
            .await?;
        }
        let resolved_config = vm.config.lock().await.clone();

        // Step 3: build argv, apply overrides, spawn.
        let argv = build_argv(
            vm.id,
            &vm.uuid,
            &resolved_config,
            &vm.instance_path,
            self.env.config.hugepages_mount.as_ref(),
        );
        let argv = self.overrides.apply(argv).await;

        let qemu_bin = &self.env.config.tools.qemu_system_x86_64;
        info!(vm = %vm.name, bin = %qemu_bin.display(), "spawning qemu");
        let mut child = Command::new(qemu_bin)
            .args(&argv)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| VmError::QemuSpawnFailed { source })?;
        if let Some(pid) = child.id() {
            *vm.pid.lock().await = Some(pid);
        }

        // Step 4: reaper task.
        let (wait_tx, mut wait_rx) = tokio::sync::mpsc::channel::<std::io::Result<std::process::ExitStatus>>(1);
        tokio::spawn(async move {
            let status = child.wait().await;
            let _ = wait_tx.send(status).await;
        });

        // Step 5: QMP dial with retry.
        let qmp_path = vm.instance_path.join("qmp");
        let mut client = None;
        for attempt in 0..self.env.config.qmp_connect_retry {
            match QmpClient::connect(&qmp_path, Duration::from_secs(1)).await {
                Ok(c) => {
                    client = Some(c);
                    break;
                }
                Err(e) => {
                    warn!(vm = %vm.name, attempt, error = %e, "qmp dial failed, retrying");
                    tokio::time::sleep(self.env.config.qmp_connect_delay).await;
                }
            }
        }

        let client = match client {
            Some(c) => c,
            None => {
                vm.set_state(VmRunState::Error).await?;
                self.kill_and_reap(&mut wait_rx).await;
                return Err(VmError::QmpUnavailable {
                    instance: vm.name.clone(),
                    attempts: self.env.config.qmp_connect_retry,
                });
            }
        };

        // Step 6: event logger, ack, select loop.
        let mut events = client.spawn_event_logger();
        vm.set_state(VmRunState::Running).await?;
        let mut kill_rx = vm.arm_kill_channel().await;

        loop {
            tokio::select! {
                status = wait_rx.recv() => {
                    match status {
                        Some(Ok(status)) if status.success() => {
                            vm.set_state(VmRunState::Quit).await?;
                        }
                        // `vmctl kill` runs in a separate process and can
                        // only reach us by signaling the qemu pid directly
                        // (see DESIGN.md); a SIGTERM exit observed here is
                        // that expected kill, not a crash.
                        Some(Ok(status)) if status.signal() == Some(libc::SIGTERM) => {
                            vm.set_state(VmRunState::Quit).await?;
                        }
                        _ => {
                            vm.set_state(VmRunState::Error).await?;
                        }
                    }
                    break;
                }
                signal = kill_rx.recv() => {
                    if signal.is_some() {
                        if let Some(pid) = *vm.pid.lock().await {
                            unsafe { libc::kill(pid as i32, libc::SIGTERM) };
                        }
                        self.kill_and_reap(&mut wait_rx).await;
                        vm.set_state(VmRunState::Quit).await?;
                    }
                    break;
                }
                event = events.recv() => {
                    match event {
                        Some(ev) => info!(vm = %vm.name, event = %ev.name, "qmp event"),
                        None => continue,
                    }
                }
            }
        }

        Ok(())
    }

    async fn kill_and_reap(
        &self,
        wait_rx: &mut tokio::sync::mpsc::Receiver<std::io::Result<std::process::ExitStatus>>,
    ) {
        let _ = tokio::time::timeout(Duration::from_secs(5), wait_rx.recv()).await;
    }

    async fn cleanup_interfaces(&self, vm: &Arc<Vm>) {
        let networks: Vec<NetIface> = vm.config.lock().await.networks.clone();
        for net in networks {
            if let Some(tap) = net.tap {
                match self.bridges.get(&net.bridge).await {
                    Ok(br) => {
                        if let Err(e) = br.tap_destroy(&tap).await {
                            error!(tap = %tap, bridge = %net.bridge, error = %e, "partial cleanup of VM network interface");
                        }
                    }
                    Err(e) => error!(bridge = %net.bridge, error = %e, "could not look up bridge during cleanup"),
                }
            }
        }
        let mut cfg = vm.config.lock().await;
        for net in cfg.networks.iter_mut() {
            net.tap = None;
        }
    }

    pub async fn kill(&self, vm: &Arc<Vm>) -> Result<()> {
        vm.kill().await
    }

    pub async fn migrate(&self, vm: &Arc<Vm>, file: &str) -> Result<()> {
        let qmp_path = vm.instance_path.join("qmp");
        let mut client = QmpClient::connect(&qmp_path, Duration::from_secs(2)).await?;
        client.migrate_exec(file).await
    }

    pub async fn query_migrate(&self, vm: &Arc<Vm>) -> Result<(String, f64)> {
        let qmp_path = vm.instance_path.join("qmp");
        let mut client = QmpClient::connect(&qmp_path, Duration::from_secs(2)).await?;
        let value = client.query_migrate().await?;
        let status = value
            .get("status")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();

        let completion = match status.as_str() {
            "completed" => 1.0,
            "failed" => 0.0,
            "active" => {
                let ram = value.get("ram").ok_or_else(|| {
                    VmError::Qmp("query-migrate active with no ram segment".into())
                })?;
                let total = ram.get("total").and_then(|v| v.as_f64()).unwrap_or(0.0);
                let transferred = ram.get("transferred").and_then(|v| v.as_f64()).unwrap_or(0.0);
                if total == 0.0 {
                    return Err(VmError::Qmp("query-migrate active with total=0".into()));
                }
                transferred / total
            }
            _ => 0.0,
        };

        Ok((status, completion))
    }

    /// Attach a new disk to a running VM: `blockdev-add` registers the
    /// backend node, `device_add` attaches it to the PCI bus. Returns the
    /// hotplug id later passed to [`Supervisor::hotplug_remove`].
    pub async fn hotplug_add_disk(&self, vm: &Arc<Vm>, path: &str) -> Result<u64> {
        let qmp_path = vm.instance_path.join("qmp");
        let mut client = QmpClient::connect(&qmp_path, Duration::from_secs(2)).await?;

        let id = vm.next_hotplug_id();
        let node_name = format!("hotplug{id}");
        let device_id = format!("hotplug-dev{id}");
        client.blockdev_add(&node_name, path).await?;
        client.device_add(&device_id, "virtio-blk-pci", &node_name).await?;

        vm.hotplug.lock().await.insert(id, PathBuf::from(path));
        Ok(id)
    }

    /// Reverse of [`Supervisor::hotplug_add_disk`]: detach the device,
    /// then drop the backend node.
    pub async fn hotplug_remove(&self, vm: &Arc<Vm>, id: u64) -> Result<()> {
        {
            let hotplug = vm.hotplug.lock().await;
            if !hotplug.contains_key(&id) {
                return Err(VmError::NotFound(format!(
                    "hotplug id {id} on VM '{}'",
                    vm.name
                )));
            }
        }

        let qmp_path = vm.instance_path.join("qmp");
        let mut client = QmpClient::connect(&qmp_path, Duration::from_secs(2)).await?;
        let node_name = format!("hotplug{id}");
        let device_id = format!("hotplug-dev{id}");
        client.device_del(&device_id).await?;
        client.drive_del(&node_name).await?;

        vm.hotplug.lock().await.remove(&id);
        Ok(())
    }

    /// RUNNING -> PAUSED via QMP `stop`.
    pub async fn pause(&self, vm: &Arc<Vm>) -> Result<()> {
        if vm.state().await != VmRunState::Running {
            return Err(VmError::InvalidState {
                name: vm.name.clone(),
                state: "pause requires RUNNING".into(),
            });
        }
        let qmp_path = vm.instance_path.join("qmp");
        let mut client = QmpClient::connect(&qmp_path, Duration::from_secs(2)).await?;
        client.stop().await?;
        vm.set_state(VmRunState::Paused).await
    }

    /// PAUSED -> RUNNING via QMP `cont`, or relaunch from BUILDING/QUIT.
    /// `launch` already skips the preamble on re-entry from QUIT, so the
    /// relaunch branch is a plain delegation.
    pub async fn start(&self, vm: Arc<Vm>) -> Result<()> {
        match vm.state().await {
            VmRunState::Paused => {
                let qmp_path = vm.instance_path.join("qmp");
                let mut client = QmpClient::connect(&qmp_path, Duration::from_secs(2)).await?;
                client.cont().await?;
                vm.set_state(VmRunState::Running).await
            }
            VmRunState::Building | VmRunState::Quit => self.launch(vm).await,
            other => Err(VmError::InvalidState {
                name: vm.name.clone(),
                state: other.to_string(),
            }),
        }
    }
}

/// Parse one `vm config net` spec field per spec §6's comma-separated
/// forms into a [`NetIface`].
pub fn parse_net_spec(spec: &str, default_bridge: &str, default_driver: &str) -> Result<NetIface> {
    let fields: Vec<&str> = spec.split(',').collect();
    let looks_like_mac = |s: &str| s.matches(':').count() == 5;

    match fields.as_slice() {
        [vlan] => Ok(NetIface {
            bridge: default_bridge.to_string(),
            vlan: parse_vlan(vlan)?,
            mac: None,
            driver: default_driver.to_string(),
            tap: None,
        }),
        [a, b] if looks_like_mac(b) => Ok(NetIface {
            bridge: default_bridge.to_string(),
            vlan: parse_vlan(a)?,
            mac: Some(b.to_string()),
            driver: default_driver.to_string(),
            tap: None,
        }),
        [a, b] => Ok(NetIface {
            bridge: a.to_string(),
            vlan: parse_vlan(b)?,
            mac: None,
            driver: default_driver.to_string(),
            tap: None,
        }),
        [a, b, c] if looks_like_mac(c) => Ok(NetIface {
            bridge: a.to_string(),
            vlan: parse_vlan(b)?,
            mac: Some(c.to_string()),
            driver: default_driver.to_string(),
            tap: None,
        }),
        [a, b, c] => Ok(NetIface {
            bridge: default_bridge.to_string(),
            vlan: parse_vlan(a)?,
            mac: None,
            driver: c.to_string(),
            tap: None,
        }),
        [a, b, c, d] => Ok(NetIface {
            bridge: a.to_string(),
            vlan: parse_vlan(b)?,
            mac: Some(c.to_string()),
            driver: d.to_string(),
            tap: None,
        }),
        _ => Err(VmError::InvalidArgument(format!("malformed net spec '{spec}'"))),
    }
}

fn parse_vlan(s: &str) -> Result<i32> {
    s.parse()
        .map_err(|_| VmError::InvalidArgument(format!("bad VLAN '{s}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_roundtrip_is_identity_with_no_overrides() {
        let argv = vec!["-m".to_string(), "1024".to_string(), "-name".to_string(), "1".to_string()];
        let joined = shell_join(&argv);
        let split = shell_split(&joined);
        assert_eq!(argv, split);
    }

    #[test]
    fn shell_split_respects_quote_grouping() {
        let tokens = shell_split("-append \"root=/dev/sda1 ro\"");
        assert_eq!(tokens, vec!["-append", "root=/dev/sda1 ro"]);
    }

    #[test]
    fn pci_addressing_wraps_at_31st_interface() {
        let mut config = VmConfig {
            memory_mb: 512,
            vcpus: 1,
            ..Default::default()
        };
        for i in 0..31 {
            config.networks.push(NetIface {
                bridge: "mega_bridge".into(),
                vlan: 0,
                mac: Some(format!("52:54:00:00:00:{i:02x}")),
                driver: "e1000".into(),
                tap: Some(format!("mega_tap{i}")),
            });
        }
        let argv = build_argv(1, "uuid", &config, &PathBuf::from("/tmp/1"), None);
        let joined = argv.join(" ");
        assert!(joined.contains("bus=pci.1,addr=0x1f"));
        assert!(joined.contains("pci-bridge,id=pci.2,chassis_nr=2"));
    }

    #[test]
    fn parses_every_net_spec_form() {
        assert_eq!(parse_net_spec("1", "mega_bridge", "e1000").unwrap().vlan, 1);
        let with_mac = parse_net_spec("1,13:37:13:37:00:00", "mega_bridge", "e1000").unwrap();
        assert_eq!(with_mac.mac.as_deref(), Some("13:37:13:37:00:00"));
        let with_bridge = parse_net_spec("test_bridge,1", "mega_bridge", "e1000").unwrap();
        assert_eq!(with_bridge.bridge, "test_bridge");
        let full = parse_net_spec("test_bridge,5,13:37:13:37:00:04,i82559c", "mega_bridge", "e1000").unwrap();
        assert_eq!(full.driver, "i82559c");
        assert_eq!(full.vlan, 5);
    }

    #[tokio::test]
    async fn override_table_apply_is_identity_when_empty() {
        let table = OverrideTable::new();
        let argv = vec!["-m".to_string(), "1024".to_string()];
        let out = table.apply(argv.clone()).await;
        assert_eq!(argv, out);
    }

    #[tokio::test]
    async fn override_table_substitutes_in_insertion_order() {
        let table = OverrideTable::new();
        table.add("-m 1024".into(), "-m 2048".into()).await;
        let out = table.apply(vec!["-m".into(), "1024".into()]).await;
        assert_eq!(out, vec!["-m".to_string(), "2048".to_string()]);
    }

    #[tokio::test]
    async fn override_delete_star_clears_all() {
        let table = OverrideTable::new();
        table.add("a".into(), "b".into()).await;
        table.add("c".into(), "d".into()).await;
        table.delete(None).await.unwrap();
        assert!(table.list().await.is_empty());
    }
}
