//! Process-wide configuration, layered TOML files + `GRACE_*` environment overrides via the
//! `config` crate.

use serde::{Deserialize, Serialize};

fn default_port_range_start() -> u16 {
    8000
}
fn default_port_range_end() -> u16 {
    8100
}
fn default_heartbeat_secs() -> u64 {
    30
}
fn default_mesh_history() -> usize {
    1000
}
fn default_watchdog_interval_secs() -> u64 {
    30
}
fn default_data_dir() -> String {
    "./data/grace".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    #[serde(default = "default_port_range_start")]
    pub port_range_start: u16,
    #[serde(default = "default_port_range_end")]
    pub port_range_end: u16,
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_interval_secs: u64,
    #[serde(default = "default_mesh_history")]
    pub mesh_history_capacity: usize,
    #[serde(default = "default_watchdog_interval_secs")]
    pub watchdog_interval_secs: u64,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            port_range_start: default_port_range_start(),
            port_range_end: default_port_range_end(),
            heartbeat_interval_secs: default_heartbeat_secs(),
            mesh_history_capacity: default_mesh_history(),
            watchdog_interval_secs: default_watchdog_interval_secs(),
            data_dir: default_data_dir(),
        }
    }
}

impl CoreConfig {
    /// Loads from `config/core.toml` (if present) with `GRACE_*` environment overrides.
    pub fn load() -> Self {
        let builder = config::Config::builder()
            .add_source(config::File::with_name("config/core").required(false))
            .add_source(config::Environment::with_prefix("GRACE").separator("__"));

        match builder.build() {
            Ok(cfg) => cfg.try_deserialize().unwrap_or_default(),
            Err(_) => Self::default(),
        }
    }
}
