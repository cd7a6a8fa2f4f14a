//! Connected-agent registry.
//!
//! Tracks every agent's identity, declared type, capability set, optional
//! spatial region, and liveness state. Registration is an idempotent
//! overwrite; agents are removed only by explicit unregister. Transport
//! close and the liveness sweep demote agents to offline instead of
//! removing them, so historical references (flat tasks, session membership)
//! stay resolvable.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{HubError, HubResult};
use crate::geometry::Region;

/// Liveness/availability state of a connected agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Online,
    Busy,
    Offline,
}

impl AgentStatus {
    /// Offline agents are invisible to discovery, routing, and
    /// lock/barrier eligibility; busy agents are still reachable.
    pub fn is_reachable(&self) -> bool {
        !matches!(self, Self::Offline)
    }
}

/// One connected agent's registry record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    /// Stable agent identifier (caller- or hub-assigned).
    pub agent_id: String,
    /// Free-form type tag, e.g. "builder" or "monitor".
    pub agent_type: String,
    /// Capabilities this agent advertises.
    pub capabilities: Vec<String>,
    /// Optional spatial region the agent declares responsibility for.
    pub region: Option<Region>,
    /// Current liveness state.
    pub status: AgentStatus,
    /// Last heartbeat (also refreshed by register and status updates).
    pub last_heartbeat: DateTime<Utc>,
    /// When the agent first registered.
    pub registered_at: DateTime<Utc>,
    /// Arbitrary caller-supplied metadata.
    pub metadata: HashMap<String, Value>,
}

/// Filters for `discover`. All supplied filters must match.
#[derive(Debug, Clone, Default)]
pub struct DiscoverFilter {
    pub agent_type: Option<String>,
    pub capability: Option<String>,
    pub region_overlap: Option<Region>,
}

/// The keyed agent table. A `DashMap` gives per-key serialization: two
/// operations on the same agent id are linearized by the shard lock, while
/// unrelated agents proceed concurrently.
#[derive(Debug, Default)]
pub struct AgentRegistry {
    agents: DashMap<String, AgentRecord>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            agents: DashMap::new(),
        }
    }

    /// Register an agent, overwriting any previous record with the same id.
    pub fn register(
        &self,
        agent_id: impl Into<String>,
        agent_type: impl Into<String>,
        capabilities: Vec<String>,
        region: Option<Region>,
        metadata: HashMap<String, Value>,
    ) -> AgentRecord {
        let agent_id = agent_id.into();
        let now = Utc::now();
        let registered_at = self
            .agents
            .get(&agent_id)
            .map(|existing| existing.registered_at)
            .unwrap_or(now);
        let record = AgentRecord {
            agent_id: agent_id.clone(),
            agent_type: agent_type.into(),
            capabilities,
            region,
            status: AgentStatus::Online,
            last_heartbeat: now,
            registered_at,
            metadata,
        };
        self.agents.insert(agent_id, record.clone());
        record
    }

    /// Remove an agent's record entirely.
    pub fn unregister(&self, agent_id: &str) -> Option<AgentRecord> {
        self.agents.remove(agent_id).map(|(_, record)| record)
    }

    /// Refresh an agent's heartbeat, optionally flipping its status.
    /// A heartbeat from an offline agent brings it back online.
    pub fn heartbeat(
        &self,
        agent_id: &str,
        status: Option<AgentStatus>,
    ) -> HubResult<AgentStatus> {
        let mut record = self.agents.get_mut(agent_id).ok_or(HubError::NotFound {
            kind: "agent",
            id: agent_id.to_string(),
        })?;
        record.last_heartbeat = Utc::now();
        record.status = status.unwrap_or(AgentStatus::Online);
        Ok(record.status)
    }

    /// Demote an agent to offline. Returns false if the agent is unknown
    /// or already offline.
    pub fn mark_offline(&self, agent_id: &str) -> bool {
        match self.agents.get_mut(agent_id) {
            Some(mut record) if record.status != AgentStatus::Offline => {
                record.status = AgentStatus::Offline;
                true
            }
            _ => false,
        }
    }

    /// Look up a single record.
    pub fn get(&self, agent_id: &str) -> Option<AgentRecord> {
        self.agents.get(agent_id).map(|r| r.clone())
    }

    /// True if the agent exists and is not offline.
    pub fn is_reachable(&self, agent_id: &str) -> bool {
        self.agents
            .get(agent_id)
            .map(|r| r.status.is_reachable())
            .unwrap_or(false)
    }

    /// Return every reachable agent matching all supplied filters.
    pub fn discover(&self, filter: &DiscoverFilter) -> Vec<AgentRecord> {
        self.agents
            .iter()
            .filter(|entry| {
                let record = entry.value();
                if !record.status.is_reachable() {
                    return false;
                }
                if let Some(ref wanted) = filter.agent_type {
                    if &record.agent_type != wanted {
                        return false;
                    }
                }
                if let Some(ref capability) = filter.capability {
                    if !record.capabilities.iter().any(|c| c == capability) {
                        return false;
                    }
                }
                if let Some(ref query) = filter.region_overlap {
                    match record.region {
                        Some(ref region) if region.overlaps(query) => {}
                        _ => return false,
                    }
                }
                true
            })
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Snapshot of every record, regardless of status.
    pub fn snapshot(&self) -> Vec<AgentRecord> {
        self.agents.iter().map(|e| e.value().clone()).collect()
    }

    /// Ids of reachable agents whose heartbeat lapsed more than `timeout` ago.
    pub fn stale_agents(&self, now: DateTime<Utc>, timeout: Duration) -> Vec<String> {
        self.agents
            .iter()
            .filter(|entry| {
                entry.status.is_reachable() && now - entry.last_heartbeat > timeout
            })
            .map(|entry| entry.agent_id.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn register(reg: &AgentRegistry, id: &str, agent_type: &str, caps: &[&str]) {
        reg.register(
            id,
            agent_type,
            caps.iter().map(|c| c.to_string()).collect(),
            None,
            HashMap::new(),
        );
    }

    #[test]
    fn test_register_and_get() {
        let reg = AgentRegistry::new();
        register(&reg, "agent-1", "builder", &["place_block"]);

        let record = reg.get("agent-1").unwrap();
        assert_eq!(record.agent_type, "builder");
        assert_eq!(record.status, AgentStatus::Online);
        assert_eq!(record.capabilities, vec!["place_block".to_string()]);
    }

    #[test]
    fn test_register_is_idempotent_overwrite() {
        let reg = AgentRegistry::new();
        register(&reg, "agent-1", "builder", &[]);
        let first = reg.get("agent-1").unwrap();

        register(&reg, "agent-1", "tester", &[]);
        let second = reg.get("agent-1").unwrap();
        assert_eq!(second.agent_type, "tester");
        assert_eq!(second.registered_at, first.registered_at);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_discover_by_type() {
        let reg = AgentRegistry::new();
        register(&reg, "m1", "monitor", &[]);
        register(&reg, "m2", "monitor", &[]);
        register(&reg, "e1", "evolver", &[]);

        let filter = DiscoverFilter {
            agent_type: Some("monitor".into()),
            ..Default::default()
        };
        let mut found: Vec<String> = reg
            .discover(&filter)
            .into_iter()
            .map(|r| r.agent_id)
            .collect();
        found.sort();
        assert_eq!(found, vec!["m1".to_string(), "m2".to_string()]);
    }

    #[test]
    fn test_discover_requires_all_filters() {
        let reg = AgentRegistry::new();
        reg.register(
            "a1",
            "builder",
            vec!["dig".into()],
            Some(Region::new(0, 0, 10, 10)),
            HashMap::new(),
        );
        reg.register(
            "a2",
            "builder",
            vec!["dig".into()],
            Some(Region::new(100, 100, 10, 10)),
            HashMap::new(),
        );

        let filter = DiscoverFilter {
            agent_type: Some("builder".into()),
            capability: Some("dig".into()),
            region_overlap: Some(Region::new(5, 5, 10, 10)),
        };
        let found = reg.discover(&filter);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].agent_id, "a1");
    }

    #[test]
    fn test_offline_agents_hidden_from_discover() {
        let reg = AgentRegistry::new();
        register(&reg, "a1", "builder", &[]);
        register(&reg, "a2", "builder", &[]);
        assert!(reg.mark_offline("a2"));

        let found = reg.discover(&DiscoverFilter::default());
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].agent_id, "a1");
        // The record itself survives.
        assert_eq!(reg.get("a2").unwrap().status, AgentStatus::Offline);
    }

    #[test]
    fn test_heartbeat_revives_offline_agent() {
        let reg = AgentRegistry::new();
        register(&reg, "a1", "builder", &[]);
        reg.mark_offline("a1");

        let status = reg.heartbeat("a1", None).unwrap();
        assert_eq!(status, AgentStatus::Online);
        assert!(reg.is_reachable("a1"));
    }

    #[test]
    fn test_heartbeat_unknown_agent() {
        let reg = AgentRegistry::new();
        let err = reg.heartbeat("ghost", None).unwrap_err();
        assert_eq!(err.code(), "not_found");
    }

    #[test]
    fn test_stale_agent_detection() {
        let reg = AgentRegistry::new();
        register(&reg, "a1", "builder", &[]);
        register(&reg, "a2", "builder", &[]);

        let later = Utc::now() + Duration::seconds(120);
        let stale = reg.stale_agents(later, Duration::seconds(60));
        assert_eq!(stale.len(), 2);

        // A fresh heartbeat clears staleness relative to "now".
        let stale_now = reg.stale_agents(Utc::now(), Duration::seconds(60));
        assert!(stale_now.is_empty());
    }
}
