//! Registry lifecycle subscriptions.
//!
//! Agents subscribe to lifecycle events (`agent_registered`,
//! `agent_unregistered`, `agent_offline`) and receive asynchronous
//! `agent_event` frames when another agent's registry state changes. A
//! subscription may carry an `agent_type` filter so an agent only hears
//! about peers of one type.

use chrono::Utc;
use dashmap::DashMap;
use serde_json::{json, Value};

/// Lifecycle event names agents may subscribe to.
pub const EVENT_AGENT_REGISTERED: &str = "agent_registered";
pub const EVENT_AGENT_UNREGISTERED: &str = "agent_unregistered";
pub const EVENT_AGENT_OFFLINE: &str = "agent_offline";

/// One agent's interest in one event type.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub agent_id: String,
    /// Optional `agent_type` filter on the subject agent.
    pub filter: Option<String>,
}

/// Subscriptions keyed by event type.
#[derive(Debug, Default)]
pub struct SubscriptionTable {
    subs: DashMap<String, Vec<Subscription>>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self {
            subs: DashMap::new(),
        }
    }

    /// Add (or replace) a subscription. One agent holds at most one
    /// subscription per event type; re-subscribing updates the filter.
    pub fn subscribe(&self, agent_id: &str, event_type: &str, filter: Option<String>) {
        let mut entry = self.subs.entry(event_type.to_string()).or_default();
        if let Some(existing) = entry.iter_mut().find(|s| s.agent_id == agent_id) {
            existing.filter = filter;
        } else {
            entry.push(Subscription {
                agent_id: agent_id.to_string(),
                filter,
            });
        }
    }

    /// Drop every subscription held by one agent.
    pub fn remove_agent(&self, agent_id: &str) {
        for mut entry in self.subs.iter_mut() {
            entry.retain(|s| s.agent_id != agent_id);
        }
    }

    /// Subscribers to `event_type` whose filter matches the subject's type.
    /// The subject itself never hears about its own lifecycle.
    pub fn recipients(
        &self,
        event_type: &str,
        subject_id: &str,
        subject_type: &str,
    ) -> Vec<String> {
        self.subs
            .get(event_type)
            .map(|entry| {
                entry
                    .iter()
                    .filter(|s| s.agent_id != subject_id)
                    .filter(|s| match &s.filter {
                        Some(wanted) => wanted == subject_type,
                        None => true,
                    })
                    .map(|s| s.agent_id.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.subs.iter().all(|entry| entry.is_empty())
    }
}

/// Build the `agent_event` notification frame for one lifecycle event.
pub fn event_frame(event: &str, subject_id: &str, subject_type: &str) -> Value {
    json!({
        "type": "agent_event",
        "event": event,
        "agent_id": subject_id,
        "agent_type": subject_type,
        "timestamp": Utc::now(),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
