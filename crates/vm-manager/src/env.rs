//! Process-wide collaborators shared by the bridge registry and the KVM
//! supervisor, constructed once at startup and passed explicitly into
//! component constructors (spec §9 "avoid re-introducing ambient globals").

use std::sync::Arc;

use crate::config::Config;
use crate::shellout::{Runner, SystemRunner};
use crate::taps::TapAllocator;

#[derive(Clone)]
pub struct Env {
    pub config: Arc<Config>,
    pub runner: Arc<dyn Runner>,
    pub taps: Arc<TapAllocator>,
}

impl std::fmt::Debug for Env {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Env").field("config", &self.config).finish_non_exhaustive()
    }
}

impl Env {
    pub fn new(config: Config) -> Self {
        let taps = Arc::new(TapAllocator::new(config.tap_prefix.clone()));
        Self {
            config: Arc::new(config),
            runner: Arc::new(SystemRunner),
            taps,
        }
    }

    pub fn with_runner(config: Config, runner: Arc<dyn Runner>) -> Self {
        let taps = Arc::new(TapAllocator::new(config.tap_prefix.clone()));
        Self {
            config: Arc::new(config),
            runner,
            taps,
        }
    }
}
