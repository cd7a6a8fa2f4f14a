//! Hub error taxonomy.
//!
//! Every failure a command handler can produce maps onto one of these
//! variants, and every variant maps onto a stable wire code. Errors are
//! always recovered locally and surfaced as a structured error frame to
//! the originating agent; nothing here ever tears down the coordinator.

use serde_json::{json, Value};
use thiserror::Error;

/// Result alias used throughout the hub.
pub type HubResult<T> = Result<T, HubError>;

/// Structured errors surfaced to agents as error frames.
#[derive(Debug, Clone, Error)]
pub enum HubError {
    /// An agent, lock, barrier, session, task, or claim id did not resolve.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// A resource conflict (e.g. overlapping exclusive region claims).
    /// `details` names the conflicting entity for the caller.
    #[error("{message}")]
    Conflict {
        message: String,
        details: Option<Value>,
    },

    /// The caller does not own the resource it tried to mutate.
    #[error("{message}")]
    Ownership { message: String },

    /// A session is at its `max_agents` capacity.
    #[error("session {session_id} is full ({max_agents} agents)")]
    Capacity {
        session_id: String,
        max_agents: usize,
    },

    /// The operation is not valid in the entity's current state.
    #[error("{message}")]
    InvalidState { message: String },

    /// The frame decoded but a field was missing or invalid.
    #[error("{message}")]
    Malformed { message: String },

    /// The frame's `type` discriminator is not a known command.
    #[error("unknown message type: {message_type}")]
    UnknownMessageType { message_type: String },
}

impl HubError {
    /// Stable wire code for this error class.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::Conflict { .. } => "conflict",
            Self::Ownership { .. } => "ownership",
            Self::Capacity { .. } => "capacity",
            Self::InvalidState { .. } => "invalid_state",
            Self::Malformed { .. } => "malformed_input",
            Self::UnknownMessageType { .. } => "unknown_message_type",
        }
    }

    /// Render as the structured error frame sent back to the caller.
    pub fn to_frame(&self) -> Value {
        let mut frame = json!({
            "type": "error",
            "error": self.code(),
            "message": self.to_string(),
        });
        if let Self::Conflict {
            details: Some(details),
            ..
        } = self
        {
            frame["details"] = details.clone();
        }
        frame
    }

    /// Shorthand for a `Conflict` without structured details.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
            details: None,
        }
    }

    /// Shorthand for an `Ownership` violation.
    pub fn ownership(message: impl Into<String>) -> Self {
        Self::Ownership {
            message: message.into(),
        }
    }

    /// Shorthand for an `InvalidState` violation.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Shorthand for a `Malformed` input error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed {
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
