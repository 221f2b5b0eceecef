//! VM data model and process-wide VM registry (spec §3, §4.5's registry
//! half; the supervisor state machine itself lives in [`crate::kvm`]).

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, mpsc};

use crate::error::{Result, VmError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetIface {
    pub bridge: String,
    pub vlan: i32,
    pub mac: Option<String>,
    pub driver: String,
    /// Resolved tap name, filled in during launch.
    pub tap: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VmConfig {
    pub memory_mb: u32,
    pub vcpus: u32,
    pub snapshot: bool,
    pub disks: Vec<PathBuf>,
    pub cdrom: Option<PathBuf>,
    pub kernel: Option<PathBuf>,
    pub initrd: Option<PathBuf>,
    pub append: Option<String>,
    pub migrate: Option<PathBuf>,
    pub qemu_append: Vec<String>,
    pub networks: Vec<NetIface>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmRunState {
    Building,
    Running,
    Paused,
    Quit,
    Error,
}

impl fmt::Display for VmRunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Building => "BUILDING",
            Self::Running => "RUNNING",
            Self::Paused => "PAUSED",
            Self::Quit => "QUIT",
            Self::Error => "ERROR",
        };
        write!(f, "{s}")
    }
}

impl FromStr for VmRunState {
    type Err = VmError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "BUILDING" => Ok(Self::Building),
            "RUNNING" => Ok(Self::Running),
            "PAUSED" => Ok(Self::Paused),
            "QUIT" => Ok(Self::Quit),
            "ERROR" => Ok(Self::Error),
            other => Err(VmError::InvalidState {
                name: String::new(),
                state: other.to_string(),
            }),
        }
    }
}

/// Shape of the persisted `config` file: enough to reconstruct an info row
/// from disk in a later process, without requiring a live [`Registry`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedConfig {
    pub id: u64,
    pub name: String,
    pub uuid: String,
    pub config: VmConfig,
}

/// One KVM-backed VM. `state` and the state-file write are covered by the
/// same per-VM lock (spec §5); `config` is mutated only during the
/// preamble and by hotplug.
pub struct Vm {
    pub id: u64,
    pub name: String,
    pub uuid: String,
    pub instance_path: PathBuf,
    pub config: Mutex<VmConfig>,
    state: Mutex<VmRunState>,
    pub pid: Mutex<Option<u32>>,
    /// hotplug id -> device path (spec §3's `hotplug` field).
    pub hotplug: Mutex<HashMap<u64, PathBuf>>,
    hotplug_next: AtomicU64,
    kill_tx: Mutex<Option<mpsc::Sender<()>>>,
}

impl Vm {
    pub fn new(id: u64, name: String, uuid: String, instance_path: PathBuf, config: VmConfig) -> Self {
        Self {
            id,
            name,
            uuid,
            instance_path,
            config: Mutex::new(config),
            state: Mutex::new(VmRunState::Building),
            pid: Mutex::new(None),
            hotplug: Mutex::new(HashMap::new()),
            hotplug_next: AtomicU64::new(1),
            kill_tx: Mutex::new(None),
        }
    }

    pub async fn state(&self) -> VmRunState {
        *self.state.lock().await
    }

    /// Assign the new state and persist it to the `state` file before
    /// returning — this file is the durable state-of-record (spec §9).
    pub async fn set_state(&self, new_state: VmRunState) -> Result<()> {
        let mut guard = self.state.lock().await;
        crate::persist::write_instance_file(&self.instance_path, "state", &new_state.to_string())
            .await?;
        *guard = new_state;
        Ok(())
    }

    pub fn next_hotplug_id(&self) -> u64 {
        self.hotplug_next.fetch_add(1, Ordering::SeqCst)
    }

    /// Arm this VM's kill channel; returns the receiving half for the
    /// launch task's event-loop select.
    pub async fn arm_kill_channel(&self) -> mpsc::Receiver<()> {
        let (tx, rx) = mpsc::channel(1);
        *self.kill_tx.lock().await = Some(tx);
        rx
    }

    /// Signal kill. Unbuffered-rendezvous semantics are approximated with
    /// a depth-1 channel; a kill issued while one is already in flight
    /// returns `InvalidState` rather than deadlocking the caller (spec §9
    /// open question: double-kill is a caller error either way).
    pub async fn kill(&self) -> Result<()> {
        let tx = self.kill_tx.lock().await.clone();
        match tx {
            Some(tx) => tx
                .send(())
                .await
                .map_err(|_| VmError::InvalidState {
                    name: self.name.clone(),
                    state: "kill channel closed".into(),
                }),
            None => Err(VmError::InvalidState {
                name: self.name.clone(),
                state: "not running".into(),
            }),
        }
    }

    pub async fn disarm_kill_channel(&self) {
        *self.kill_tx.lock().await = None;
    }
}

/// Process-wide id -> [`Vm`] map plus the shared kill-ack channel every
/// supervisor task emits onto exactly once per launch (spec §4.5, §9).
pub struct Registry {
    vms: Mutex<HashMap<u64, Arc<Vm>>>,
    next_id: AtomicU64,
    ack_tx: mpsc::Sender<u64>,
    ack_rx: Mutex<mpsc::Receiver<u64>>,
}

impl Registry {
    pub fn new() -> Self {
        let (ack_tx, ack_rx) = mpsc::channel(64);
        Self {
            vms: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            ack_tx,
            ack_rx: Mutex::new(ack_rx),
        }
    }

    pub fn ack_sender(&self) -> mpsc::Sender<u64> {
        self.ack_tx.clone()
    }

    /// Block until the next kill-ack arrives.
    pub async fn recv_ack(&self) -> Option<u64> {
        self.ack_rx.lock().await.recv().await
    }

    pub fn alloc_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    pub async fn insert(&self, vm: Arc<Vm>) {
        self.vms.lock().await.insert(vm.id, vm);
    }

    pub async fn get(&self, id: u64) -> Option<Arc<Vm>> {
        self.vms.lock().await.get(&id).cloned()
    }

    pub async fn get_by_name(&self, name: &str) -> Option<Arc<Vm>> {
        self.vms.lock().await.values().find(|v| v.name == name).cloned()
    }

    pub async fn remove(&self, id: u64) -> Option<Arc<Vm>> {
        self.vms.lock().await.remove(&id)
    }

    pub async fn enumerate(&self) -> Vec<Arc<Vm>> {
        self.vms.lock().await.values().cloned().collect()
    }

    /// All VMs currently in BUILDING/RUNNING/PAUSED, the "fleet" preamble
    /// validation is checked against (spec §4.5 step 3).
    pub async fn active(&self) -> Vec<Arc<Vm>> {
        let mut out = Vec::new();
        for vm in self.vms.lock().await.values() {
            let s = vm.state().await;
            if matches!(s, VmRunState::Building | VmRunState::Running | VmRunState::Paused) {
                out.push(vm.clone());
            }
        }
        out
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
