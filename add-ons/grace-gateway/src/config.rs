//! Gateway-level configuration: HTTP bind address and handshake quorum defaults, layered
//! TOML + `GRACE_*` environment overrides via the same `config` crate layering as
//! `grace_core::config::CoreConfig`.

use serde::{Deserialize, Serialize};

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}
fn default_quorum() -> Vec<String> {
    vec!["governance".into(), "memory".into()]
}
fn default_handshake_window_secs() -> u64 {
    30
}
fn default_observation_tick_secs() -> u64 {
    120
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_quorum")]
    pub handshake_quorum: Vec<String>,
    #[serde(default = "default_handshake_window_secs")]
    pub handshake_window_secs: u64,
    #[serde(default = "default_observation_tick_secs")]
    pub observation_tick_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            handshake_quorum: default_quorum(),
            handshake_window_secs: default_handshake_window_secs(),
            observation_tick_secs: default_observation_tick_secs(),
        }
    }
}

impl GatewayConfig {
    /// Loads from `config/gateway.toml` (if present) with `GRACE_*` environment overrides.
    pub fn load() -> Self {
        let builder = config::Config::builder()
            .add_source(config::File::with_name("config/gateway").required(false))
            .add_source(config::Environment::with_prefix("GRACE").separator("__"));

        match builder.build() {
            Ok(cfg) => cfg.try_deserialize().unwrap_or_default(),
            Err(_) => Self::default(),
        }
    }
}
