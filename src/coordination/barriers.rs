//! One-shot rendezvous barriers.
//!
//! A barrier is created lazily on the first `enter` with its declared
//! expected count and deleted exactly once, in the same critical section
//! that observes the threshold being reached. After release the id no
//! longer exists; a later `enter` with the same id starts a fresh barrier.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// State of one pending barrier.
#[derive(Debug, Clone)]
pub struct BarrierState {
    pub barrier_id: String,
    pub expected_count: usize,
    /// Arrival order is kept so release notifications are deterministic.
    pub arrived_agents: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Outcome of one `enter` call.
#[derive(Debug, Clone)]
pub enum BarrierOutcome {
    /// Still below threshold; the caller waits.
    Waiting { arrived: usize, expected: usize },
    /// Threshold reached: the barrier released and was deleted. Every
    /// listed agent must be notified.
    Released {
        arrived_agents: Vec<String>,
        expected: usize,
    },
}

/// The keyed barrier table.
#[derive(Debug, Default)]
pub struct BarrierTable {
    barriers: DashMap<String, BarrierState>,
}

impl BarrierTable {
    pub fn new() -> Self {
        Self {
            barriers: DashMap::new(),
        }
    }

    /// Record an arrival. Entering twice with the same agent id counts
    /// once. The `expected_count` of the creating call sticks; later
    /// arrivals cannot move the threshold.
    pub fn enter(&self, agent_id: &str, barrier_id: &str, expected_count: usize) -> BarrierOutcome {
        let expected_count = expected_count.max(1);
        match self.barriers.entry(barrier_id.to_string()) {
            Entry::Vacant(vacant) => {
                if expected_count <= 1 {
                    // Degenerate barrier: releases on arrival, never stored.
                    return BarrierOutcome::Released {
                        arrived_agents: vec![agent_id.to_string()],
                        expected: expected_count,
                    };
                }
                vacant.insert(BarrierState {
                    barrier_id: barrier_id.to_string(),
                    expected_count,
                    arrived_agents: vec![agent_id.to_string()],
                    created_at: Utc::now(),
                });
                BarrierOutcome::Waiting {
                    arrived: 1,
                    expected: expected_count,
                }
            }
            Entry::Occupied(mut occupied) => {
                let state = occupied.get_mut();
                if !state.arrived_agents.iter().any(|a| a == agent_id) {
                    state.arrived_agents.push(agent_id.to_string());
                }
                if state.arrived_agents.len() >= state.expected_count {
                    // One-shot: deletion happens before the shard unlocks,
                    // so the barrier can never be observed released.
                    let state = occupied.remove();
                    BarrierOutcome::Released {
                        arrived_agents: state.arrived_agents,
                        expected: state.expected_count,
                    }
                } else {
                    BarrierOutcome::Waiting {
                        arrived: state.arrived_agents.len(),
                        expected: state.expected_count,
                    }
                }
            }
        }
    }

    /// Whether a barrier id currently exists (pending).
    pub fn exists(&self, barrier_id: &str) -> bool {
        self.barriers.contains_key(barrier_id)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
