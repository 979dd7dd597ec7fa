use courier_api::validation::ValidationLimits;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Policy {
    pub max_content_bytes: usize,
    pub max_send_tries: u32,
    pub backoff_initial_ms: u64,
    pub backoff_max_ms: u64,
    pub retry_batch: usize,
    pub cold_fetch_tries: u32,
    pub cold_retry_delay_ms: u64,
    pub cold_op_timeout_ms: u64,
    pub hot_capacity: usize,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            max_content_bytes: 500,
            max_send_tries: 4,
            backoff_initial_ms: 500,
            backoff_max_ms: 15_000,
            retry_batch: 16,
            cold_fetch_tries: 3,
            cold_retry_delay_ms: 250,
            cold_op_timeout_ms: 10_000,
            hot_capacity: 1024,
        }
    }
}

impl Policy {
    pub fn validation_limits(&self) -> ValidationLimits {
        ValidationLimits {
            max_content_bytes: self.max_content_bytes,
            ..ValidationLimits::default()
        }
    }
}
