//! Message router: point-to-point and broadcast delivery.
//!
//! Routing is best-effort and synchronous: a direct message to an absent or
//! offline agent is reported as not delivered, and nothing is ever queued
//! for later. The router only resolves recipients against the registry and
//! produces outbound frames; actually writing them to connections happens
//! after all registry locks are released.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::registry::{AgentRegistry, DiscoverFilter};

/// An immutable message record exchanged between agents.
///
/// Owned by the sender until delivered, then copied to each recipient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub message_id: String,
    pub timestamp: DateTime<Utc>,
    pub from_agent: String,
    /// Absent means broadcast.
    pub to_agent: Option<String>,
    pub message_type: String,
    pub priority: String,
    /// Opaque payload; the hub never inspects it.
    pub content: Value,
    pub metadata: HashMap<String, Value>,
    pub correlation_id: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Envelope {
    /// Construct a new envelope with a fresh id and timestamp.
    pub fn new(
        from_agent: impl Into<String>,
        to_agent: Option<String>,
        message_type: impl Into<String>,
        content: Value,
    ) -> Self {
        Self {
            message_id: format!("msg-{}", Uuid::new_v4().simple()),
            timestamp: Utc::now(),
            from_agent: from_agent.into(),
            to_agent,
            message_type: message_type.into(),
            priority: "normal".to_string(),
            content,
            metadata: HashMap::new(),
            correlation_id: None,
            expires_at: None,
        }
    }

    pub fn with_priority(mut self, priority: impl Into<String>) -> Self {
        self.priority = priority.into();
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: Option<String>) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    pub fn with_expiry(mut self, expires_at: Option<DateTime<Utc>>) -> Self {
        self.expires_at = expires_at;
        self
    }

    /// Render as the `message` frame a recipient sees.
    pub fn to_frame(&self) -> Value {
        let mut frame = serde_json::to_value(self).unwrap_or_else(|_| Value::Null);
        frame["type"] = Value::String("message".to_string());
        frame
    }
}

/// An outbound frame addressed to one agent, computed under registry locks
/// and delivered afterwards.
#[derive(Debug, Clone)]
pub struct Outbound {
    pub to: String,
    pub frame: Value,
}

/// Stateless recipient resolution over the agent registry.
#[derive(Debug, Default)]
pub struct MessageRouter;

impl MessageRouter {
    pub fn new() -> Self {
        Self
    }

    /// Resolve a direct message. Returns the outbound frame when the target
    /// is present and reachable; `None` means not delivered.
    pub fn route_direct(
        &self,
        registry: &AgentRegistry,
        envelope: &Envelope,
    ) -> Option<Outbound> {
        let to = envelope.to_agent.as_deref()?;
        if !registry.is_reachable(to) {
            tracing::debug!(to, message_id = %envelope.message_id, "direct route failed: target unreachable");
            return None;
        }
        Some(Outbound {
            to: to.to_string(),
            frame: envelope.to_frame(),
        })
    }

    /// Fan a broadcast out to every reachable agent matching the type
    /// filter. Returns one outbound per recipient; the count sent (not
    /// acknowledged) is the vector's length.
    pub fn broadcast(
        &self,
        registry: &AgentRegistry,
        envelope: &Envelope,
        agent_type: Option<&str>,
        exclude_self: bool,
    ) -> Vec<Outbound> {
        let filter = DiscoverFilter {
            agent_type: agent_type.map(|t| t.to_string()),
            ..Default::default()
        };
        registry
            .discover(&filter)
            .into_iter()
            .filter(|record| !(exclude_self && record.agent_id == envelope.from_agent))
            .map(|record| Outbound {
                to: record.agent_id,
                frame: envelope.to_frame(),
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry_with(ids: &[(&str, &str)]) -> AgentRegistry {
        let reg = AgentRegistry::new();
        for (id, agent_type) in ids {
            reg.register(*id, *agent_type, vec![], None, HashMap::new());
        }
        reg
    }

    #[test]
    fn test_direct_delivery() {
        let reg = registry_with(&[("a", "builder"), ("b", "builder")]);
        let router = MessageRouter::new();
        let env = Envelope::new("a", Some("b".into()), "ping", json!({"n": 1}));

        let out = router.route_direct(&reg, &env).unwrap();
        assert_eq!(out.to, "b");
        assert_eq!(out.frame["type"], "message");
        assert_eq!(out.frame["from_agent"], "a");
        assert_eq!(out.frame["content"]["n"], 1);
    }

    #[test]
    fn test_direct_to_absent_or_offline_fails() {
        let reg = registry_with(&[("a", "builder"), ("b", "builder")]);
        let router = MessageRouter::new();

        let env = Envelope::new("a", Some("ghost".into()), "ping", json!({}));
        assert!(router.route_direct(&reg, &env).is_none());

        reg.mark_offline("b");
        let env = Envelope::new("a", Some("b".into()), "ping", json!({}));
        assert!(router.route_direct(&reg, &env).is_none());
    }

    #[test]
    fn test_broadcast_excludes_sender_and_offline() {
        let reg = registry_with(&[("a", "builder"), ("b", "builder"), ("c", "builder")]);
        reg.mark_offline("c");
        let router = MessageRouter::new();
        let env = Envelope::new("a", None, "status", json!({}));

        let out = router.broadcast(&reg, &env, None, true);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].to, "b");
    }

    #[test]
    fn test_broadcast_type_filter_and_self_inclusion() {
        let reg = registry_with(&[("a", "monitor"), ("b", "monitor"), ("c", "evolver")]);
        let router = MessageRouter::new();
        let env = Envelope::new("a", None, "status", json!({}));

        let mut out: Vec<String> = router
            .broadcast(&reg, &env, Some("monitor"), false)
            .into_iter()
            .map(|o| o.to)
            .collect();
        out.sort();
        assert_eq!(out, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_envelope_frame_carries_correlation() {
        let env = Envelope::new("a", Some("b".into()), "reply", json!({}))
            .with_correlation_id(Some("req-7".into()))
            .with_priority("high");
        let frame = env.to_frame();
        assert_eq!(frame["correlation_id"], "req-7");
        assert_eq!(frame["priority"], "high");
    }
}
