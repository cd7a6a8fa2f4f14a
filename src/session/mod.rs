//! Build sessions: bounded collaborative contexts with their own agent
//! membership, region claims, and dependency-gated task graph.
//!
//! A session owns every entity below it; deleting a session implicitly
//! invalidates its agents, claims, and tasks. Sessions are keyed in a
//! `DashMap`, so operations on the same session are linearized while
//! different sessions proceed fully concurrently.

pub mod regions;
pub mod tasks;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::errors::{HubError, HubResult};

pub use regions::{QueryOutcome, RegionClaim, ReleaseOutcome};
pub use tasks::{
    ReportOutcome, SessionTask, SessionTaskStatus, TaskPriority, TaskQueue, TaskQueueFilter,
};

/// Fixed palette assigned round-robin as agents join a session.
pub const COLOR_PALETTE: [&str; 8] = [
    "#e6194b", "#3cb44b", "#ffe119", "#4363d8", "#f58231", "#911eb4", "#46f0f0", "#f032e6",
];

/// Role an agent plays inside a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionRole {
    Architect,
    Builder,
    Tester,
    Observer,
}

impl Default for SessionRole {
    fn default() -> Self {
        Self::Builder
    }
}

/// Session lifecycle. Sessions are created active and stay active; an
/// empty session is a healthy terminal condition, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
}

/// A session-scoped member. Its `agent_id` is distinct from the
/// transport-level agent id; `transport_id` links back when known so
/// notifications can reach the member's connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionAgent {
    pub agent_id: String,
    pub session_id: String,
    pub name: String,
    pub role: SessionRole,
    pub capabilities: Vec<String>,
    pub color: String,
    pub joined_at: DateTime<Utc>,
    pub regions_claimed: Vec<String>,
    pub tasks_completed: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transport_id: Option<String>,
}

/// One collaborative build session and everything it owns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildSession {
    pub session_id: String,
    pub session_name: String,
    pub created_at: DateTime<Utc>,
    pub max_agents: usize,
    pub grid_size: u32,
    pub coordination_mode: String,
    pub invite_token: String,
    pub config: HashMap<String, Value>,
    pub agents: HashMap<String, SessionAgent>,
    pub regions: HashMap<String, RegionClaim>,
    pub tasks: HashMap<String, SessionTask>,
    pub status: SessionStatus,
    next_agent_seq: u32,
}

impl BuildSession {
    /// Resolve a member or fail with `not_found`.
    pub(crate) fn member(&self, agent_id: &str) -> HubResult<&SessionAgent> {
        self.agents.get(agent_id).ok_or(HubError::NotFound {
            kind: "session agent",
            id: agent_id.to_string(),
        })
    }

    pub(crate) fn member_mut(&mut self, agent_id: &str) -> HubResult<&mut SessionAgent> {
        self.agents.get_mut(agent_id).ok_or(HubError::NotFound {
            kind: "session agent",
            id: agent_id.to_string(),
        })
    }
}

/// What `leave_session` did with the departing agent's claims.
#[derive(Debug, Clone, Default)]
pub struct LeaveOutcome {
    pub released_claims: Vec<String>,
    pub transferred_claims: Vec<String>,
    pub remaining_agents: usize,
}

/// Defaults applied when `create_session` omits a field.
#[derive(Debug, Clone)]
pub struct SessionDefaults {
    pub max_agents: usize,
    pub grid_size: u32,
    pub coordination_mode: String,
    pub claim_ttl: chrono::Duration,
}

/// The session table and its operations. Region and task-graph operations
/// live in the sibling modules but mutate through the same per-session
/// entry API.
#[derive(Debug)]
pub struct SessionManager {
    pub(crate) sessions: DashMap<String, BuildSession>,
    pub(crate) defaults: SessionDefaults,
}

impl SessionManager {
    pub fn new(defaults: SessionDefaults) -> Self {
        Self {
            sessions: DashMap::new(),
            defaults,
        }
    }

    /// Create a session with a fresh id and random invite token.
    pub fn create_session(
        &self,
        session_name: &str,
        max_agents: Option<usize>,
        grid_size: Option<u32>,
        coordination_mode: Option<String>,
        config: HashMap<String, Value>,
    ) -> BuildSession {
        let session = BuildSession {
            session_id: format!("sess-{}", Uuid::new_v4().simple()),
            session_name: session_name.to_string(),
            created_at: Utc::now(),
            max_agents: max_agents.unwrap_or(self.defaults.max_agents),
            grid_size: grid_size.unwrap_or(self.defaults.grid_size),
            coordination_mode: coordination_mode
                .unwrap_or_else(|| self.defaults.coordination_mode.clone()),
            invite_token: Uuid::new_v4().simple().to_string(),
            config,
            agents: HashMap::new(),
            regions: HashMap::new(),
            tasks: HashMap::new(),
            status: SessionStatus::Active,
            next_agent_seq: 1,
        };
        self.sessions
            .insert(session.session_id.clone(), session.clone());
        tracing::info!(session_id = %session.session_id, name = %session.session_name, "session created");
        session
    }

    /// Join a session. Rejects when the session is unknown or at capacity;
    /// assigns a session-scoped agent id and the next palette color.
    pub fn join_session(
        &self,
        session_id: &str,
        agent_name: &str,
        role: SessionRole,
        capabilities: Vec<String>,
        transport_id: Option<String>,
    ) -> HubResult<SessionAgent> {
        self.with_session(session_id, |session| {
            if session.agents.len() >= session.max_agents {
                return Err(HubError::Capacity {
                    session_id: session.session_id.clone(),
                    max_agents: session.max_agents,
                });
            }
            let seq = session.next_agent_seq;
            session.next_agent_seq += 1;
            let agent = SessionAgent {
                agent_id: format!("agent-{}", seq),
                session_id: session.session_id.clone(),
                name: agent_name.to_string(),
                role,
                capabilities,
                color: COLOR_PALETTE[(seq as usize - 1) % COLOR_PALETTE.len()].to_string(),
                joined_at: Utc::now(),
                regions_claimed: Vec::new(),
                tasks_completed: 0,
                transport_id,
            };
            session.agents.insert(agent.agent_id.clone(), agent.clone());
            Ok(agent)
        })
    }

    /// Leave a session, releasing every claim the agent holds: transferred
    /// to `handoff_to` when that names another member, deleted otherwise.
    pub fn leave_session(
        &self,
        session_id: &str,
        agent_id: &str,
        handoff_to: Option<&str>,
    ) -> HubResult<LeaveOutcome> {
        self.with_session(session_id, |session| {
            session.member(agent_id)?;
            let heir = match handoff_to {
                Some(other) if session.agents.contains_key(other) && other != agent_id => {
                    Some(other.to_string())
                }
                _ => None,
            };

            let mut outcome = LeaveOutcome::default();
            let held: Vec<String> = session
                .regions
                .values()
                .filter(|claim| claim.agent_id == agent_id)
                .map(|claim| claim.claim_id.clone())
                .collect();
            for claim_id in held {
                match &heir {
                    Some(heir_id) => {
                        if let Some(claim) = session.regions.get_mut(&claim_id) {
                            claim.agent_id = heir_id.clone();
                        }
                        if let Ok(heir_agent) = session.member_mut(heir_id) {
                            heir_agent.regions_claimed.push(claim_id.clone());
                        }
                        outcome.transferred_claims.push(claim_id);
                    }
                    None => {
                        session.regions.remove(&claim_id);
                        outcome.released_claims.push(claim_id);
                    }
                }
            }

            session.agents.remove(agent_id);
            outcome.remaining_agents = session.agents.len();
            Ok(outcome)
        })
    }

    /// Full snapshot of one session.
    pub fn get_state(&self, session_id: &str) -> HubResult<BuildSession> {
        self.sessions
            .get(session_id)
            .map(|s| s.clone())
            .ok_or(HubError::NotFound {
                kind: "session",
                id: session_id.to_string(),
            })
    }

    /// Transport ids of every member whose connection is known.
    pub fn member_transport_ids(&self, session_id: &str) -> Vec<String> {
        self.sessions
            .get(session_id)
            .map(|session| {
                session
                    .agents
                    .values()
                    .filter_map(|a| a.transport_id.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Run one closure inside the session's critical section.
    pub(crate) fn with_session<T>(
        &self,
        session_id: &str,
        f: impl FnOnce(&mut BuildSession) -> HubResult<T>,
    ) -> HubResult<T> {
        let mut entry = self.sessions.get_mut(session_id).ok_or(HubError::NotFound {
            kind: "session",
            id: session_id.to_string(),
        })?;
        f(entry.value_mut())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
