//! Outbound frame builders.
//!
//! Responses echo the request's `type` with a `_result` suffix; side-effect
//! notifications carry their own types and are delivered as separate,
//! asynchronous frames to the affected agents.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

/// Build a `<request>_result` response frame around a body object.
pub fn result_frame(request_type: &str, mut body: Value) -> Value {
    if let Value::Object(ref mut map) = body {
        map.insert(
            "type".to_string(),
            Value::String(format!("{}_result", request_type)),
        );
        return body;
    }
    json!({ "type": format!("{}_result", request_type), "data": body })
}

/// Notification to a waiter that a released lock is now theirs.
pub fn lock_granted(lock_id: &str, agent_id: &str, expires_at: DateTime<Utc>) -> Value {
    json!({
        "type": "lock_granted",
        "lock_id": lock_id,
        "agent_id": agent_id,
        "expires_at": expires_at,
    })
}

/// Notification to every arrived agent that a barrier released.
pub fn barrier_released(barrier_id: &str, arrived_count: usize) -> Value {
    json!({
        "type": "barrier_released",
        "barrier_id": barrier_id,
        "arrived_count": arrived_count,
        "released_at": Utc::now(),
    })
}

/// Notification to an assignee that a flat task was delegated to it.
pub fn task_assigned(task: &Value) -> Value {
    json!({
        "type": "task_assigned",
        "task": task,
    })
}

/// Notification that a session task left the blocked state.
pub fn task_unblocked(session_id: &str, task_id: &str) -> Value {
    json!({
        "type": "task_unblocked",
        "session_id": session_id,
        "task_id": task_id,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
