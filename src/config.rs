//! Hub configuration.
//!
//! All knobs have serde defaults so a config file (or an empty `{}`) can
//! supply any subset; the binary also maps a few environment variables onto
//! these fields.

use serde::{Deserialize, Serialize};

/// Tunable parameters for the coordination hub.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// Seconds without a heartbeat before the liveness sweep demotes an
    /// agent to offline.
    #[serde(default = "default_heartbeat_timeout_secs")]
    pub heartbeat_timeout_secs: u64,

    /// Period of the liveness sweep.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Lock hold TTL applied when a `lock_request` carries no timeout.
    /// Expiry is lazy: it is only consulted on the next contention.
    #[serde(default = "default_lock_ttl_secs")]
    pub default_lock_ttl_secs: u64,

    /// Region claim TTL applied when a `claim_region` carries no TTL.
    #[serde(default = "default_claim_ttl_secs")]
    pub default_claim_ttl_secs: u64,

    /// Session capacity applied when `create_session` omits `max_agents`.
    #[serde(default = "default_max_agents")]
    pub default_max_agents: usize,

    /// Grid side length applied when `create_session` omits `grid_size`.
    #[serde(default = "default_grid_size")]
    pub default_grid_size: u32,

    /// Coordination mode applied when `create_session` omits one.
    #[serde(default = "default_coordination_mode")]
    pub default_coordination_mode: String,

    /// Depth of each connection's outbound frame buffer. Sends beyond this
    /// apply backpressure to the delivery step, never to registry locks.
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,
}

fn default_heartbeat_timeout_secs() -> u64 {
    60
}
fn default_sweep_interval_secs() -> u64 {
    15
}
fn default_lock_ttl_secs() -> u64 {
    30
}
fn default_claim_ttl_secs() -> u64 {
    300
}
fn default_max_agents() -> usize {
    10
}
fn default_grid_size() -> u32 {
    1000
}
fn default_coordination_mode() -> String {
    "coordinated".to_string()
}
fn default_outbound_buffer() -> usize {
    64
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_secs: default_heartbeat_timeout_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            default_lock_ttl_secs: default_lock_ttl_secs(),
            default_claim_ttl_secs: default_claim_ttl_secs(),
            default_max_agents: default_max_agents(),
            default_grid_size: default_grid_size(),
            default_coordination_mode: default_coordination_mode(),
            outbound_buffer: default_outbound_buffer(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
