//! The bridge/tap manager (spec §3, §4.3, §4.4).
//!
//! [`Registry`] is the process-wide bridge-name -> [`Bridge`] map; it
//! creates bridges on first reference and persists the human-readable
//! `bridges` inventory file on every change. [`Bridge`] owns one OVS
//! bridge's taps, trunks, tunnels, mirror, NetFlow exporter, and IP
//! learner, all mutations serialized by its own lock.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::error;

use crate::env::Env;
use crate::error::{Result, VmError};
use crate::iplearn::IpLearner;
use crate::netflow::{self, NetflowCollector};
use crate::persist::{self, BridgeRow};
use crate::shellout;

pub const VLAN_DISCONNECTED: i32 = -1;
pub const VLAN_TRUNK: i32 = -2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelKind {
    Vxlan,
    Gre,
}

impl TunnelKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Vxlan => "vxlan",
            Self::Gre => "gre",
        }
    }
}

impl std::str::FromStr for TunnelKind {
    type Err = VmError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "vxlan" => Ok(Self::Vxlan),
            "gre" => Ok(Self::Gre),
            other => Err(VmError::InvalidArgument(format!(
                "unknown tunnel kind '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TapInfo {
    pub vlan: i32,
    pub is_host: bool,
}

#[derive(Debug, Default)]
struct BridgeState {
    taps: HashMap<String, TapInfo>,
    trunks: Vec<String>,
    tunnels: Vec<String>,
    netflow: Option<NetflowCollector>,
}

/// One OVS bridge and everything attached to it. All mutators acquire
/// `state`, shell out, update the in-memory model, then release — on
/// external-tool failure the model is left unchanged (spec §4.4).
pub struct Bridge {
    name: String,
    pre_exist: bool,
    env: Env,
    state: Mutex<BridgeState>,
    iml: IpLearner,
}

impl Bridge {
    fn new(name: String, pre_exist: bool, env: Env) -> Self {
        Self {
            name,
            pre_exist,
            env,
            state: Mutex::new(BridgeState::default()),
            iml: IpLearner::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pre_exist(&self) -> bool {
        self.pre_exist
    }

    pub fn ip_learner(&self) -> &IpLearner {
        &self.iml
    }

    pub async fn has_tap(&self, tap: &str) -> bool {
        let s = self.state.lock().await;
        s.taps.contains_key(tap) || s.trunks.iter().any(|t| t == tap) || s.tunnels.iter().any(|t| t == tap)
    }

    pub async fn active_vlans(&self) -> Vec<i32> {
        let s = self.state.lock().await;
        let mut v: Vec<i32> = s.taps.values().map(|t| t.vlan).collect();
        v.sort_unstable();
        v.dedup();
        v
    }

    pub async fn taps_snapshot(&self) -> HashMap<String, TapInfo> {
        self.state.lock().await.taps.clone()
    }

    pub async fn trunks_snapshot(&self) -> Vec<String> {
        self.state.lock().await.trunks.clone()
    }

    pub async fn tunnels_snapshot(&self) -> Vec<String> {
        self.state.lock().await.tunnels.clone()
    }

    /// `(records, bytes)` from the bound NetFlow collector, if any.
    pub async fn netflow_stats(&self) -> Option<(u64, u64)> {
        self.state.lock().await.netflow.as_ref().map(|c| c.stats())
    }

    /// Create a fresh tap interface and attach it to this bridge.
    ///
    /// If `name` is empty, draws from the allocator. If the caller named
    /// the tap and `ip tuntap add` reports it already exists, the caller
    /// owns creation and we proceed; an allocator-drawn name that already
    /// exists is a real failure. On any failure after a self-allocated
    /// name, the tap device is deleted; caller-supplied names are left
    /// alone.
    pub async fn tap_create(&self, name: Option<String>, vlan: i32, host: bool) -> Result<String> {
        let (tap_name, self_allocated) = match name.filter(|n| !n.is_empty()) {
            Some(n) => (n, false),
            None => (self.env.taps.next_name().await?, true),
        };

        let add_args = vec![
            "tuntap".into(),
            "add".into(),
            "mode".into(),
            "tap".into(),
            tap_name.clone(),
        ];
        let out = shellout::run(
            &*self.env.runner,
            &self.env.config.tools.ip,
            &add_args,
            self.env.config.ovs_timeout,
        )
        .await?;
        if !out.success {
            match shellout::classify_tuntap_stderr(&out.stderr) {
                Some(err) if self_allocated => return Err(err),
                Some(_) => { /* caller-named tap already present: caller owns creation */ }
                None => return Err(shellout::tool_failure("ip tuntap add", &out)),
            }
        }

        let mut up_args = vec!["link".into(), "set".into(), tap_name.clone(), "up".into()];
        if host {
            up_args.push("promisc".into());
            up_args.push("on".into());
        }
        let out = shellout::run(
            &*self.env.runner,
            &self.env.config.tools.ip,
            &up_args,
            self.env.config.ovs_timeout,
        )
        .await?;
        if !out.success {
            if self_allocated {
                let _ = self.delete_tap_device(&tap_name).await;
            }
            return Err(shellout::tool_failure("ip link set up", &out));
        }

        if let Err(e) = self.tap_add(&tap_name, vlan, host).await {
            if self_allocated {
                let _ = self.delete_tap_device(&tap_name).await;
            }
            return Err(e);
        }

        Ok(tap_name)
    }

    /// Attach an already-existing tap interface to this bridge.
    pub async fn tap_add(&self, tap: &str, vlan: i32, host: bool) -> Result<()> {
        self.iml
            .ensure_started(
                &*self.env.runner,
                &self.env.config.tools.ovs_ofctl,
                &self.env.config.tools.dhcp,
                &self.name,
                self.env.config.ovs_timeout,
            )
            .await;

        let mut args = vec!["add-port".into(), self.name.clone(), tap.to_string()];
        if vlan != VLAN_TRUNK && vlan != VLAN_DISCONNECTED {
            args.push(format!("tag={vlan}"));
        }

        let out = shellout::run_ovs_serialized(
            &*self.env.runner,
            &self.env.config.tools.ovs_vsctl,
            &args,
            self.env.config.ovs_timeout,
        )
        .await?;

        if !out.success {
            if shellout::is_ovs_already_exists(&out.stderr) {
                let del_args = vec!["del-port".into(), self.name.clone(), tap.to_string()];
                let _ = shellout::run_ovs_serialized(
                    &*self.env.runner,
                    &self.env.config.tools.ovs_vsctl,
                    &del_args,
                    self.env.config.ovs_timeout,
                )
                .await;
                let retry = shellout::run_ovs_serialized(
                    &*self.env.runner,
                    &self.env.config.tools.ovs_vsctl,
                    &args,
                    self.env.config.ovs_timeout,
                )
                .await?;
                if !retry.success {
                    return Err(shellout::tool_failure("ovs-vsctl add-port", &retry));
                }
            } else {
                return Err(shellout::tool_failure("ovs-vsctl add-port", &out));
            }
        }

        self.state.lock().await.taps.insert(
            tap.to_string(),
            TapInfo {
                vlan,
                is_host: host,
            },
        );
        Ok(())
    }

    pub async fn tap_remove(&self, tap: &str) -> Result<()> {
        let args = vec!["del-port".into(), self.name.clone(), tap.to_string()];
        let out = shellout::run_ovs_serialized(
            &*self.env.runner,
            &self.env.config.tools.ovs_vsctl,
            &args,
            self.env.config.ovs_timeout,
        )
        .await?;
        if !out.success {
            return Err(shellout::tool_failure("ovs-vsctl del-port", &out));
        }
        self.state.lock().await.taps.remove(tap);
        Ok(())
    }

    pub async fn tap_destroy(&self, tap: &str) -> Result<()> {
        self.tap_remove(tap).await?;
        self.delete_tap_device(tap).await
    }

    async fn delete_tap_device(&self, tap: &str) -> Result<()> {
        let args = vec![
            "tuntap".into(),
            "del".into(),
            "mode".into(),
            "tap".into(),
            tap.to_string(),
        ];
        let out = shellout::run(
            &*self.env.runner,
            &self.env.config.tools.ip,
            &args,
            self.env.config.ovs_timeout,
        )
        .await?;
        if !out.success {
            return Err(shellout::tool_failure("ip tuntap del", &out));
        }
        Ok(())
    }

    pub async fn trunk_add(&self, iface: &str) -> Result<()> {
        let args = vec!["add-port".into(), self.name.clone(), iface.to_string()];
        let out = shellout::run_ovs_serialized(
            &*self.env.runner,
            &self.env.config.tools.ovs_vsctl,
            &args,
            self.env.config.ovs_timeout,
        )
        .await?;
        if !out.success {
            return Err(shellout::tool_failure("ovs-vsctl add-port (trunk)", &out));
        }
        self.state.lock().await.trunks.push(iface.to_string());
        Ok(())
    }

    pub async fn trunk_remove(&self, iface: &str) -> Result<()> {
        let args = vec!["del-port".into(), self.name.clone(), iface.to_string()];
        let out = shellout::run_ovs_serialized(
            &*self.env.runner,
            &self.env.config.tools.ovs_vsctl,
            &args,
            self.env.config.ovs_timeout,
        )
        .await?;
        if !out.success {
            return Err(shellout::tool_failure("ovs-vsctl del-port (trunk)", &out));
        }
        self.state.lock().await.trunks.retain(|t| t != iface);
        Ok(())
    }

    pub async fn tunnel_add(&self, kind: TunnelKind, remote_ip: &str) -> Result<String> {
        let tap = self.env.taps.next_name().await?;
        let args = vec![
            "add-port".into(),
            self.name.clone(),
            tap.clone(),
            "--".into(),
            "set".into(),
            "interface".into(),
            tap.clone(),
            format!("type={}", kind.as_str()),
            format!("options:remote_ip={remote_ip}"),
        ];
        let out = shellout::run_ovs_serialized(
            &*self.env.runner,
            &self.env.config.tools.ovs_vsctl,
            &args,
            self.env.config.ovs_timeout,
        )
        .await?;
        if !out.success {
            return Err(shellout::tool_failure("ovs-vsctl add-port (tunnel)", &out));
        }
        self.state.lock().await.tunnels.push(tap.clone());
        Ok(tap)
    }

    pub async fn tunnel_remove(&self, iface: &str) -> Result<()> {
        {
            let state = self.state.lock().await;
            if !state.tunnels.iter().any(|t| t == iface) {
                return Err(VmError::NotFound(format!(
                    "tunnel '{iface}' on bridge '{}'",
                    self.name
                )));
            }
        }
        let args = vec!["del-port".into(), self.name.clone(), iface.to_string()];
        let out = shellout::run_ovs_serialized(
            &*self.env.runner,
            &self.env.config.tools.ovs_vsctl,
            &args,
            self.env.config.ovs_timeout,
        )
        .await?;
        if !out.success {
            return Err(shellout::tool_failure("ovs-vsctl del-port (tunnel)", &out));
        }
        self.state.lock().await.tunnels.retain(|t| t != iface);
        Ok(())
    }

    /// Create a host tap (VLAN 0) as the mirror sink, bind an OVS mirror
    /// selecting all traffic to it. Returns the sink tap name.
    pub async fn mirror_add(&self) -> Result<String> {
        let tap = self.tap_create(None, 0, true).await?;
        let mirror_name = format!("{}-mirror", self.name);
        let args = vec![
            "--".into(),
            "--id=@p".into(),
            "get".into(),
            "port".into(),
            tap.clone(),
            "--".into(),
            "--id=@m".into(),
            "create".into(),
            "mirror".into(),
            format!("name={mirror_name}"),
            "select-all=true".into(),
            "output-port=@p".into(),
            "--".into(),
            "set".into(),
            "bridge".into(),
            self.name.clone(),
            "mirrors=@m".into(),
        ];
        let out = shellout::run_ovs_serialized(
            &*self.env.runner,
            &self.env.config.tools.ovs_vsctl,
            &args,
            self.env.config.ovs_timeout,
        )
        .await?;
        if !out.success {
            let _ = self.tap_destroy(&tap).await;
            return Err(shellout::tool_failure("ovs-vsctl create mirror", &out));
        }
        Ok(tap)
    }

    pub async fn mirror_remove(&self, tap: &str) -> Result<()> {
        let args = vec![
            "clear".into(),
            "bridge".into(),
            self.name.clone(),
            "mirrors".into(),
        ];
        let out = shellout::run_ovs_serialized(
            &*self.env.runner,
            &self.env.config.tools.ovs_vsctl,
            &args,
            self.env.config.ovs_timeout,
        )
        .await?;
        if !out.success {
            return Err(shellout::tool_failure("ovs-vsctl clear mirrors", &out));
        }
        self.tap_destroy(tap).await
    }

    pub async fn new_netflow(&self, active_timeout: u32) -> Result<()> {
        {
            let state = self.state.lock().await;
            netflow::ensure_not_already_bound(&state.netflow)?;
        }
        let collector = NetflowCollector::start(active_timeout).await?;
        let target = format!("127.0.0.1:{}", collector.port);
        let args = vec![
            "--".into(),
            "set".into(),
            "bridge".into(),
            self.name.clone(),
            "netflow=@nf".into(),
            "--".into(),
            "--id=@nf".into(),
            "create".into(),
            "NetFlow".into(),
            format!("targets=\"{target}\""),
            format!("active-timeout={active_timeout}"),
        ];
        let out = shellout::run_ovs_serialized(
            &*self.env.runner,
            &self.env.config.tools.ovs_vsctl,
            &args,
            self.env.config.ovs_timeout,
        )
        .await?;
        if !out.success {
            collector.stop();
            return Err(shellout::tool_failure("ovs-vsctl create NetFlow", &out));
        }
        self.state.lock().await.netflow = Some(collector);
        Ok(())
    }

    pub async fn destroy_netflow(&self) -> Result<()> {
        let collector = self.state.lock().await.netflow.take();
        let args = vec![
            "clear".into(),
            "bridge".into(),
            self.name.clone(),
            "netflow".into(),
        ];
        let out = shellout::run_ovs_serialized(
            &*self.env.runner,
            &self.env.config.tools.ovs_vsctl,
            &args,
            self.env.config.ovs_timeout,
        )
        .await?;
        if let Some(c) = collector {
            c.stop();
        }
        if !out.success {
            return Err(shellout::tool_failure("ovs-vsctl clear netflow", &out));
        }
        Ok(())
    }

    pub async fn update_nf_timeout(&self, active_timeout: u32) -> Result<()> {
        let args = vec![
            "set".into(),
            "NetFlow".into(),
            self.name.clone(),
            format!("active_timeout={active_timeout}"),
        ];
        let out = shellout::run_ovs_serialized(
            &*self.env.runner,
            &self.env.config.tools.ovs_vsctl,
            &args,
            self.env.config.ovs_timeout,
        )
        .await?;
        if !out.success {
            return Err(shellout::tool_failure("ovs-vsctl set NetFlow timeout", &out));
        }
        let mut state = self.state.lock().await;
        if let Some(c) = state.netflow.as_mut() {
            c.active_timeout = active_timeout;
        }
        Ok(())
    }

    /// Create a veth pair, move the peer into network namespace `ns`,
    /// attach our side to the bridge, and set the peer's MAC inside the
    /// namespace.
    pub async fn container_tap_create(
        &self,
        vlan: i32,
        ns: &str,
        mac: &str,
        index: u32,
    ) -> Result<String> {
        let our_side = self.env.taps.next_name().await?;
        let peer = format!("veth{index}");

        let add_args = vec![
            "link".into(),
            "add".into(),
            our_side.clone(),
            "type".into(),
            "veth".into(),
            "peer".into(),
            peer.clone(),
            "netns".into(),
            ns.to_string(),
        ];
        let out = shellout::run(
            &*self.env.runner,
            &self.env.config.tools.ip,
            &add_args,
            self.env.config.ovs_timeout,
        )
        .await?;
        if !out.success {
            return Err(shellout::tool_failure("ip link add veth", &out));
        }

        if let Err(e) = self.tap_add(&our_side, vlan, false).await {
            let del_args = vec!["link".into(), "del".into(), our_side.clone()];
            let _ = shellout::run(
                &*self.env.runner,
                &self.env.config.tools.ip,
                &del_args,
                self.env.config.ovs_timeout,
            )
            .await;
            return Err(e);
        }

        let up_args = vec!["link".into(), "set".into(), our_side.clone(), "up".into()];
        let out = shellout::run(
            &*self.env.runner,
            &self.env.config.tools.ip,
            &up_args,
            self.env.config.ovs_timeout,
        )
        .await?;
        if !out.success {
            let _ = self.tap_remove(&our_side).await;
            return Err(shellout::tool_failure("ip link set veth up", &out));
        }

        let mac_args = vec![
            "netns".into(),
            "exec".into(),
            ns.to_string(),
            "ip".into(),
            "link".into(),
            "set".into(),
            "dev".into(),
            peer,
            "address".into(),
            mac.to_string(),
        ];
        let out = shellout::run(
            &*self.env.runner,
            &self.env.config.tools.ip,
            &mac_args,
            self.env.config.ovs_timeout,
        )
        .await?;
        if !out.success {
            return Err(shellout::tool_failure("ip netns exec set address", &out));
        }

        Ok(our_side)
    }

    pub async fn container_tap_destroy(&self, tap: &str) -> Result<()> {
        self.tap_remove(tap).await?;
        let down_args = vec!["link".into(), "set".into(), tap.to_string(), "down".into()];
        let _ = shellout::run(
            &*self.env.runner,
            &self.env.config.tools.ip,
            &down_args,
            self.env.config.ovs_timeout,
        )
        .await;
        let del_args = vec!["link".into(), "del".into(), tap.to_string()];
        let out = shellout::run(
            &*self.env.runner,
            &self.env.config.tools.ip,
            &del_args,
            self.env.config.ovs_timeout,
        )
        .await?;
        if !out.success {
            return Err(shellout::tool_failure("ip link del veth", &out));
        }
        Ok(())
    }

    /// Best-effort teardown of every tap/trunk/tunnel on this bridge.
    /// Individual failures are logged, not fatal; enumeration continues
    /// (spec §4.4 Destroy, §9 open question on best-effort semantics).
    async fn teardown_contained(&self) {
        let (taps, trunks, tunnels) = {
            let state = self.state.lock().await;
            (
                state.taps.keys().cloned().collect::<Vec<_>>(),
                state.trunks.clone(),
                state.tunnels.clone(),
            )
        };
        for t in taps {
            if let Err(e) = self.tap_destroy(&t).await {
                error!(bridge = %self.name, tap = %t, error = %e, "best-effort tap teardown failed");
            }
        }
        for t in trunks {
            if let Err(e) = self.trunk_remove(&t).await {
                error!(bridge = %self.name, trunk = %t, error = %e, "best-effort trunk teardown failed");
            }
        }
        for t in tunnels {
            if let Err(e) = self.tunnel_remove(&t).await {
                error!(bridge = %self.name, tunnel = %t, error = %e, "best-effort tunnel teardown failed");
            }
        }
        if self.state.lock().await.netflow.is_some() {
            if let Err(e) = self.destroy_netflow().await {
                error!(bridge = %self.name, error = %e, "best-effort netflow teardown failed");
            }
        }
    }
}

/// Process-wide bridge-name -> [`Bridge`] registry.
pub struct Registry {
    env: Env,
    bridges: Mutex<HashMap<String, Arc<Bridge>>>,
}

impl Registry {
    pub fn new(env: Env) -> Self {
        Self {
            env,
            bridges: Mutex::new(HashMap::new()),
        }
    }

    /// Look up a bridge, creating it on first reference. An empty name
    /// resolves to the configured default bridge.
    pub async fn get(&self, name: &str) -> Result<Arc<Bridge>> {
        let resolved = if name.is_empty() {
            self.env.config.default_bridge.clone()
        } else {
            name.to_string()
        };

        {
            let map = self.bridges.lock().await;
            if let Some(b) = map.get(&resolved) {
                return Ok(b.clone());
            }
        }
        self.create(&resolved).await
    }

    async fn create(&self, name: &str) -> Result<Arc<Bridge>> {
        let mut map = self.bridges.lock().await;
        if let Some(b) = map.get(name) {
            return Ok(b.clone());
        }

        let add_args = vec!["add-br".into(), name.to_string()];
        let add_out = shellout::run_ovs_serialized(
            &*self.env.runner,
            &self.env.config.tools.ovs_vsctl,
            &add_args,
            self.env.config.ovs_timeout,
        )
        .await?;
        let already = shellout::is_ovs_already_exists(&add_out.stderr);
        if !add_out.success && !already {
            return Err(shellout::tool_failure("ovs-vsctl add-br", &add_out));
        }
        let was_new = !already;

        let up_args = vec!["link".into(), "set".into(), name.to_string(), "up".into()];
        let up_out = shellout::run(
            &*self.env.runner,
            &self.env.config.tools.ip,
            &up_args,
            self.env.config.ovs_timeout,
        )
        .await?;
        if !up_out.success {
            if was_new {
                let del_args = vec!["del-br".into(), name.to_string()];
                match shellout::run_ovs_serialized(
                    &*self.env.runner,
                    &self.env.config.tools.ovs_vsctl,
                    &del_args,
                    self.env.config.ovs_timeout,
                )
                .await
                {
                    Ok(del_out) if !del_out.success => {
                        error!(bridge = name, stderr = %del_out.stderr, "failed to roll back just-created bridge");
                    }
                    Err(e) => {
                        error!(bridge = name, error = %e, "failed to roll back just-created bridge");
                    }
                    _ => {}
                }
            }
            return Err(shellout::tool_failure("ip link set up", &up_out));
        }

        let bridge = Arc::new(Bridge::new(name.to_string(), !was_new, self.env.clone()));
        map.insert(name.to_string(), bridge.clone());
        self.persist(&map).await?;
        Ok(bridge)
    }

    pub async fn enumerate(&self) -> Vec<String> {
        self.bridges.lock().await.keys().cloned().collect()
    }

    pub async fn from_tap(&self, tap: &str) -> Option<Arc<Bridge>> {
        let map = self.bridges.lock().await;
        for b in map.values() {
            if b.has_tap(tap).await {
                return Some(b.clone());
            }
        }
        None
    }

    /// Destroy a single bridge: registry lock is acquired first, then the
    /// bridge's own teardown runs under it (spec §5: registry lock ->
    /// per-entity lock is the only legal direction, exercised here).
    pub async fn destroy_bridge(&self, name: &str) -> Result<()> {
        let mut map = self.bridges.lock().await;
        let bridge = map
            .get(name)
            .cloned()
            .ok_or_else(|| VmError::NotFound(format!("bridge '{name}'")))?;

        bridge.teardown_contained().await;

        if !bridge.pre_exist {
            let del_args = vec!["del-br".into(), name.to_string()];
            let out = shellout::run_ovs_serialized(
                &*self.env.runner,
                &self.env.config.tools.ovs_vsctl,
                &del_args,
                self.env.config.ovs_timeout,
            )
            .await?;
            if !out.success {
                return Err(shellout::tool_failure("ovs-vsctl del-br", &out));
            }
        }

        map.remove(name);
        self.persist(&map).await
    }

    /// Destroy every registered bridge, accumulating and joining errors
    /// across bridges rather than stopping at the first failure.
    pub async fn destroy_all(&self) -> Result<()> {
        let names = self.enumerate().await;
        let mut errors = Vec::new();
        for name in names {
            if let Err(e) = self.destroy_bridge(&name).await {
                errors.push(format!("{name}: {e}"));
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(VmError::PartialCleanup {
                entity: "bridges".into(),
                detail: errors.join("; "),
            })
        }
    }

    async fn persist(&self, map: &HashMap<String, Arc<Bridge>>) -> Result<()> {
        let mut rows = Vec::with_capacity(map.len());
        for (name, bridge) in map {
            rows.push(BridgeRow {
                name: name.clone(),
                pre_exist: bridge.pre_exist(),
                vlans: bridge.active_vlans().await,
            });
        }
        rows.sort_by(|a, b| a.name.cmp(&b.name));
        persist::write_bridges_file(&self.env.config.bridges_file(), &rows).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::shellout::test_support::FakeRunner;
    use std::sync::Arc as StdArc;

    fn test_env(runner: StdArc<FakeRunner>) -> Env {
        let mut config = Config::default();
        config.base_dir = std::env::temp_dir().join(format!("mega-test-{:p}", StdArc::as_ptr(&runner)));
        Env::with_runner(config, runner)
    }

    #[tokio::test]
    async fn tap_create_then_destroy_round_trips_in_memory_model() {
        let runner = StdArc::new(FakeRunner::default());
        // ip tuntap add, ip link set up, ovs-vsctl add-port, ovs-ofctl add-flow x2,
        // ovs-vsctl del-port, ip tuntap del
        for _ in 0..7 {
            runner.push_ok("");
        }
        let env = test_env(runner.clone());
        let bridge = Bridge::new("test_br0".into(), true, env);

        let tap = bridge.tap_create(None, 5, false).await.unwrap();
        assert!(tap.starts_with("mega_tap"));
        assert_eq!(bridge.taps_snapshot().await.get(&tap).unwrap().vlan, 5);

        bridge.tap_destroy(&tap).await.unwrap();
        assert!(bridge.taps_snapshot().await.get(&tap).is_none());
    }

    #[tokio::test]
    async fn trunk_sentinel_is_not_tagged() {
        let runner = StdArc::new(FakeRunner::default());
        runner.push_ok(""); // ovs-ofctl arp flow
        runner.push_ok(""); // ovs-ofctl ipv6 flow
        runner.push_ok(""); // ovs-vsctl add-port
        let env = test_env(runner.clone());
        let bridge = Bridge::new("test_br1".into(), true, env);

        bridge.tap_add("preexisting_tap", VLAN_TRUNK, false).await.unwrap();

        let calls = runner.calls.lock().unwrap();
        let add_port_call = calls
            .iter()
            .find(|(_, args)| args.first().map(String::as_str) == Some("add-port"))
            .unwrap();
        assert!(!add_port_call.1.iter().any(|a| a.starts_with("tag=")));
    }

    #[tokio::test]
    async fn tap_add_recovers_stale_ovs_binding() {
        let runner = StdArc::new(FakeRunner::default());
        runner.push_ok(""); // arp flow
        runner.push_ok(""); // ipv6 flow
        runner.push_err("ovs-vsctl: cannot create a port named t0 because a port named t0 already exists");
        runner.push_ok(""); // del-port
        runner.push_ok(""); // add-port retry
        let env = test_env(runner);
        let bridge = Bridge::new("test_br2".into(), true, env);

        bridge.tap_add("t0", 1, false).await.unwrap();
        assert_eq!(bridge.taps_snapshot().await.get("t0").unwrap().vlan, 1);
    }

    #[tokio::test]
    async fn destroy_skips_del_br_when_pre_existing() {
        let runner = StdArc::new(FakeRunner::default());
        let env = test_env(runner.clone());
        let registry = Registry::new(env);
        // Pretend the bridge already exists in OVS.
        runner.push_err("ovs-vsctl: bridge test_br3 already exists");
        runner.push_ok(""); // ip link set up
        let bridge = registry.get("test_br3").await.unwrap();
        assert!(bridge.pre_exist());

        registry.destroy_bridge("test_br3").await.unwrap();

        let calls = runner.calls.lock().unwrap();
        assert!(!calls.iter().any(|(_, args)| args.first().map(String::as_str) == Some("del-br")));
    }
}
