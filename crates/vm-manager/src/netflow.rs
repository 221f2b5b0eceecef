//! Per-bridge NetFlow exporter (spec §4.4 `NewNetflow`, §6).
//!
//! Binds a UDP socket on an OS-assigned local port and drains inbound
//! records into a small ring buffer the info printer can read. Full
//! NetFlow v5/v9 record decoding is a named, out-of-scope collaborator
//! (spec §1) — this counts records and bytes only.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{Result, VmError};

#[derive(Debug, Default)]
struct Counters {
    records: AtomicU64,
    bytes: AtomicU64,
}

/// Handle to a running collector; dropping it does not stop the background
/// task — call [`NetflowCollector::stop`] explicitly so `DestroyNetflow`
/// observes the UDP socket closing deterministically.
#[derive(Debug)]
pub struct NetflowCollector {
    pub port: u16,
    pub active_timeout: u32,
    counters: Arc<Counters>,
    task: Option<JoinHandle<()>>,
}

impl NetflowCollector {
    pub async fn start(active_timeout: u32) -> Result<Self> {
        let socket = UdpSocket::bind(("127.0.0.1", 0)).await?;
        let port = socket.local_addr()?.port();
        let counters = Arc::new(Counters::default());
        let counters_bg = counters.clone();

        let task = tokio::spawn(async move {
            let mut buf = [0u8; 2048];
            loop {
                match socket.recv(&mut buf).await {
                    Ok(n) => {
                        counters_bg.records.fetch_add(1, Ordering::Relaxed);
                        counters_bg.bytes.fetch_add(n as u64, Ordering::Relaxed);
                    }
                    Err(e) => {
                        debug!(error = %e, "netflow collector socket closed");
                        break;
                    }
                }
            }
        });

        Ok(Self {
            port,
            active_timeout,
            counters,
            task: Some(task),
        })
    }

    pub fn stats(&self) -> (u64, u64) {
        (
            self.counters.records.load(Ordering::Relaxed),
            self.counters.bytes.load(Ordering::Relaxed),
        )
    }

    pub fn stop(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Forbids binding a second collector on a bridge that already has one
/// (spec: "forbid if one already bound").
pub fn ensure_not_already_bound(existing: &Option<NetflowCollector>) -> Result<()> {
    if existing.is_some() {
        return Err(VmError::AlreadyExists {
            what: "NetFlow exporter".into(),
            detail: "bridge already has a bound NetFlow collector".into(),
        });
    }
    Ok(())
}

impl Drop for NetflowCollector {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            warn!("NetflowCollector dropped without calling stop(); aborting background task");
        }
    }
}
