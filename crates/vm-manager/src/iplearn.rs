//! Per-bridge IP/MAC learner attachment (spec §4.8).
//!
//! Installs two OpenFlow rules on first tap add (ARP and IPv6 neighbor
//! solicitation, both forwarded to `local,normal`) and starts an external
//! IP/MAC learner sidecar bound to the bridge's local port. A once-latch
//! guarantees exactly one start attempt per bridge; failure is logged and
//! the latch is left consumed — retry is not attempted, mirroring source
//! behavior (spec §9).

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::net::Ipv6Addr;
use std::path::Path;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use tokio::sync::OnceCell;
use tracing::{error, info, warn};

use crate::error::Result;
use crate::shellout::{self, Runner};

const ARP_FLOW: &str = "dl_type=0x0806,actions=local,normal";
const IPV6_NS_FLOW: &str = "dl_type=0x86dd,nw_proto=58,icmp_type=135,actions=local,normal";

#[derive(Debug, Clone, Default)]
pub struct LearnedHost {
    pub mac: String,
    pub ipv4: Option<Ipv4Addr>,
    pub ipv6: Option<Ipv6Addr>,
}

/// One per Bridge. Guarded externally by the Bridge's own lock except for
/// the once-latch, which is independently safe for concurrent callers.
#[derive(Debug, Default)]
pub struct IpLearner {
    started: OnceCell<()>,
    // Guarded by the single global IP-learner-data lock (spec §5): bandwidth
    // counters and learned-host table are shared mutable state read by the
    // info printer from any task.
    data: StdMutex<HashMap<String, LearnedHost>>,
}

/// Global IP-learner-data lock (spec §5) covering bandwidth/learned-table
/// reads across every bridge's learner.
static IML_DATA_LOCK: std::sync::LazyLock<StdMutex<()>> =
    std::sync::LazyLock::new(|| StdMutex::new(()));

impl IpLearner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent: installs the OpenFlow rules and starts the sidecar
    /// exactly once for the lifetime of this bridge. Failures are logged,
    /// not propagated, and are not retried on subsequent calls.
    pub async fn ensure_started(
        &self,
        runner: &dyn Runner,
        ovs_ofctl: &Path,
        dhcp_bin: &Path,
        bridge: &str,
        timeout: Duration,
    ) {
        let _ = self
            .started
            .get_or_init(|| async {
                if let Err(e) = install_flows(runner, ovs_ofctl, bridge, timeout).await {
                    error!(bridge, error = %e, "failed to install IP-learner OpenFlow rules");
                    return;
                }
                if let Err(e) = spawn_learner(dhcp_bin, bridge) {
                    warn!(bridge, error = %e, "failed to start IP/MAC learner sidecar");
                }
                info!(bridge, "IP learner attached");
            })
            .await;
    }

    pub fn register_mac(&self, mac: &str) {
        let _guard = IML_DATA_LOCK.lock().unwrap();
        self.data
            .lock()
            .unwrap()
            .entry(mac.to_string())
            .or_insert_with(|| LearnedHost {
                mac: mac.to_string(),
                ipv4: None,
                ipv6: None,
            });
    }

    pub fn learned(&self) -> Vec<LearnedHost> {
        let _guard = IML_DATA_LOCK.lock().unwrap();
        self.data.lock().unwrap().values().cloned().collect()
    }
}

async fn install_flows(
    runner: &dyn Runner,
    ovs_ofctl: &Path,
    bridge: &str,
    timeout: Duration,
) -> Result<()> {
    for flow in [ARP_FLOW, IPV6_NS_FLOW] {
        let args = vec!["add-flow".to_string(), bridge.to_string(), flow.to_string()];
        let out = shellout::run_ovs_serialized(runner, ovs_ofctl, &args, timeout).await?;
        if !out.success {
            return Err(shellout::tool_failure("ovs-ofctl add-flow", &out));
        }
    }
    Ok(())
}

/// Best-effort spawn of the external IP/MAC learner sidecar. The learner's
/// packet-capture internals are an out-of-scope named collaborator (spec
/// §1); we only launch it bound to the bridge.
fn spawn_learner(dhcp_bin: &Path, bridge: &str) -> Result<()> {
    std::process::Command::new(dhcp_bin)
        .arg(bridge)
        .spawn()
        .map(|_| ())
        .map_err(Into::into)
}
