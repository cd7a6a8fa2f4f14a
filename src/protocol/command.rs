//! Inbound command surface.
//!
//! Every frame an agent sends decodes into exactly one [`Command`] variant.
//! The enum is closed and the hub dispatches with an exhaustive `match`, so
//! adding a command without a handler is a compile error rather than a
//! missing entry in a runtime lookup table.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::delegation::FlatTaskStatus;
use crate::errors::{HubError, HubResult};
use crate::geometry::Region;
use crate::registry::AgentStatus;
use crate::session::{SessionRole, SessionTaskStatus, TaskPriority};

fn default_true() -> bool {
    true
}

/// One decoded agent command, tagged by the frame's `type` field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    // ---- Registry ----
    Register {
        /// Hub-assigned when absent.
        #[serde(default)]
        agent_id: Option<String>,
        agent_type: String,
        #[serde(default)]
        capabilities: Vec<String>,
        #[serde(default)]
        region: Option<Region>,
        #[serde(default)]
        metadata: HashMap<String, Value>,
    },
    Unregister {
        agent_id: String,
    },
    Heartbeat {
        agent_id: String,
        #[serde(default)]
        status: Option<AgentStatus>,
    },
    Discover {
        #[serde(default)]
        agent_type: Option<String>,
        #[serde(default)]
        capability: Option<String>,
        #[serde(default)]
        region: Option<Region>,
    },
    Subscribe {
        agent_id: String,
        event_type: String,
        #[serde(default)]
        filter: Option<String>,
    },

    // ---- Messaging ----
    Direct {
        from_agent: String,
        to_agent: String,
        message_type: String,
        #[serde(default)]
        payload: Value,
        #[serde(default)]
        priority: Option<String>,
        #[serde(default)]
        correlation_id: Option<String>,
        #[serde(default)]
        expires_at: Option<DateTime<Utc>>,
    },
    Broadcast {
        from_agent: String,
        #[serde(default)]
        agent_type: Option<String>,
        message_type: String,
        #[serde(default)]
        payload: Value,
        #[serde(default = "default_true")]
        exclude_self: bool,
    },

    // ---- Coordination primitives ----
    LockRequest {
        agent_id: String,
        lock_id: String,
        #[serde(default)]
        timeout_secs: Option<u64>,
    },
    LockRelease {
        agent_id: String,
        lock_id: String,
    },
    BarrierEnter {
        agent_id: String,
        barrier_id: String,
        expected_count: usize,
    },

    // ---- Flat tasks ----
    AssignTask {
        from_agent: String,
        to_agent: String,
        task_type: String,
        #[serde(default)]
        params: Value,
        #[serde(default)]
        expires_at: Option<DateTime<Utc>>,
    },
    ReportProgress {
        agent_id: String,
        task_id: String,
        progress: f64,
    },
    CompleteTask {
        agent_id: String,
        task_id: String,
        success: bool,
        #[serde(default)]
        result: Option<Value>,
        #[serde(default)]
        error: Option<String>,
    },
    GetTask {
        task_id: String,
    },
    ListTasks {
        #[serde(default)]
        agent_id: Option<String>,
        #[serde(default)]
        status: Option<FlatTaskStatus>,
    },

    // ---- Build sessions ----
    CreateSession {
        session_name: String,
        #[serde(default)]
        max_agents: Option<usize>,
        #[serde(default)]
        grid_size: Option<u32>,
        #[serde(default)]
        coordination_mode: Option<String>,
        #[serde(default)]
        config: HashMap<String, Value>,
    },
    JoinSession {
        session_id: String,
        agent_name: String,
        #[serde(default)]
        role: Option<SessionRole>,
        #[serde(default)]
        capabilities: Vec<String>,
    },
    LeaveSession {
        session_id: String,
        agent_id: String,
        #[serde(default)]
        handoff_to: Option<String>,
    },
    GetSessionState {
        session_id: String,
    },

    // ---- Region claims ----
    ClaimRegion {
        session_id: String,
        agent_id: String,
        region: Region,
        #[serde(default)]
        purpose: Option<String>,
        #[serde(default = "default_true")]
        exclusive: bool,
        #[serde(default)]
        ttl_secs: Option<u64>,
    },
    ReleaseRegion {
        session_id: String,
        agent_id: String,
        claim_id: String,
        #[serde(default)]
        transfer_to: Option<String>,
    },
    QueryRegion {
        session_id: String,
        region: Region,
    },

    // ---- Session tasks ----
    DelegateTask {
        session_id: String,
        agent_id: String,
        task_type: String,
        #[serde(default)]
        description: String,
        #[serde(default)]
        priority: TaskPriority,
        #[serde(default)]
        dependencies: Vec<String>,
        #[serde(default)]
        region: Option<Region>,
        #[serde(default)]
        deadline: Option<DateTime<Utc>>,
    },
    AcceptTask {
        session_id: String,
        agent_id: String,
        task_id: String,
    },
    ReportTask {
        session_id: String,
        agent_id: String,
        task_id: String,
        status: SessionTaskStatus,
        #[serde(default)]
        result: Option<Value>,
        #[serde(default)]
        artifacts: Vec<String>,
        #[serde(default)]
        message: Option<String>,
    },
    GetTaskQueue {
        session_id: String,
        #[serde(default)]
        agent_id: Option<String>,
        #[serde(default)]
        status: Option<SessionTaskStatus>,
        #[serde(default)]
        priority: Option<TaskPriority>,
    },
}

impl Command {
    /// The wire `type` of every known command, in dispatch-table order.
    pub const KNOWN_TYPES: [&'static str; 26] = [
        "register",
        "unregister",
        "heartbeat",
        "discover",
        "subscribe",
        "direct",
        "broadcast",
        "lock_request",
        "lock_release",
        "barrier_enter",
        "assign_task",
        "report_progress",
        "complete_task",
        "get_task",
        "list_tasks",
        "create_session",
        "join_session",
        "leave_session",
        "get_session_state",
        "claim_region",
        "release_region",
        "query_region",
        "delegate_task",
        "accept_task",
        "report_task",
        "get_task_queue",
    ];
}

/// Decode one inbound text frame into a command.
///
/// Distinguishes an unrecognized `type` discriminator
/// (`unknown_message_type`) from a recognized command with bad fields
/// (`malformed_input`).
pub fn decode_frame(text: &str) -> HubResult<Command> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| HubError::malformed(format!("invalid JSON frame: {}", e)))?;
    let message_type = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| HubError::malformed("frame is missing the 'type' field"))?
        .to_string();
    if !Command::KNOWN_TYPES.contains(&message_type.as_str()) {
        return Err(HubError::UnknownMessageType { message_type });
    }
    serde_json::from_value(value).map_err(|e| {
        HubError::malformed(format!("invalid '{}' frame: {}", message_type, e))
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_register() {
        let cmd = decode_frame(
            r#"{"type": "register", "agent_id": "a1", "agent_type": "builder",
                "capabilities": ["dig"], "region": {"x": 0, "y": 0, "width": 10, "height": 10}}"#,
        )
        .unwrap();
        match cmd {
            Command::Register {
                agent_id,
                agent_type,
                capabilities,
                region,
                ..
            } => {
                assert_eq!(agent_id.as_deref(), Some("a1"));
                assert_eq!(agent_type, "builder");
                assert_eq!(capabilities, vec!["dig".to_string()]);
                assert!(region.is_some());
            }
            other => panic!("wrong variant: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_type_is_distinct_error() {
        let err = decode_frame(r#"{"type": "teleport", "x": 1}"#).unwrap_err();
        assert_eq!(err.code(), "unknown_message_type");
        assert!(err.to_string().contains("teleport"));
    }

    #[test]
    fn test_missing_required_field_is_malformed() {
        // lock_request without lock_id.
        let err = decode_frame(r#"{"type": "lock_request", "agent_id": "a"}"#).unwrap_err();
        assert_eq!(err.code(), "malformed_input");
    }

    #[test]
    fn test_invalid_json_is_malformed() {
        let err = decode_frame("not json at all").unwrap_err();
        assert_eq!(err.code(), "malformed_input");
        let err = decode_frame(r#"{"no_type": true}"#).unwrap_err();
        assert_eq!(err.code(), "malformed_input");
    }

    #[test]
    fn test_invalid_enum_value_is_malformed() {
        let err = decode_frame(
            r#"{"type": "report_task", "session_id": "s", "agent_id": "a",
                "task_id": "t", "status": "vaporized"}"#,
        )
        .unwrap_err();
        assert_eq!(err.code(), "malformed_input");
    }

    #[test]
    fn test_broadcast_exclude_self_defaults_true() {
        let cmd = decode_frame(
            r#"{"type": "broadcast", "from_agent": "a", "message_type": "status"}"#,
        )
        .unwrap();
        match cmd {
            Command::Broadcast { exclude_self, .. } => assert!(exclude_self),
            other => panic!("wrong variant: {:?}", other),
        }
    }

    #[test]
    fn test_every_known_type_decodes_to_its_variant() {
        // Spot-check the tag strings stay in sync with the enum.
        for frame in [
            r#"{"type": "heartbeat", "agent_id": "a"}"#,
            r#"{"type": "discover"}"#,
            r#"{"type": "barrier_enter", "agent_id": "a", "barrier_id": "b", "expected_count": 2}"#,
            r#"{"type": "create_session", "session_name": "s"}"#,
            r#"{"type": "get_task_queue", "session_id": "s"}"#,
        ] {
            decode_frame(frame).unwrap();
        }
    }
}
