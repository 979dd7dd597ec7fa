use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    pub storage_path: String,
    pub namespace: String,
    pub polling_interval_ms: u64,
    pub retry_tick_ms: u64,
    pub sweep_interval_ms: u64,
    pub connect_timeout_ms: u64,
    pub default_ttl_ms: u64,
    pub eager_cold_store: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            storage_path: ".courier".to_string(),
            namespace: "default".to_string(),
            polling_interval_ms: 2000,
            retry_tick_ms: 250,
            sweep_interval_ms: 5000,
            connect_timeout_ms: 5000,
            default_ttl_ms: 24 * 60 * 60 * 1000,
            eager_cold_store: false,
        }
    }
}
