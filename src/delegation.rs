//! Flat task delegation: point-to-point work assignment with progress
//! reporting and completion, independent of build sessions.
//!
//! Tasks are never deleted; completed and failed records are retained for
//! query. Only the designated assignee may report progress or complete a
//! task, and once a task reaches a terminal status no further mutation is
//! accepted.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::errors::{HubError, HubResult};

/// Flat task state machine: `assigned → in_progress → completed | failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlatTaskStatus {
    Assigned,
    InProgress,
    Completed,
    Failed,
}

impl FlatTaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// One delegated unit of work between two agents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlatTask {
    pub task_id: String,
    pub from_agent: String,
    pub to_agent: String,
    pub task_type: String,
    pub params: Value,
    pub status: FlatTaskStatus,
    /// Clamped to `[0.0, 1.0]` on every update.
    pub progress: f64,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Filters for `list_tasks`; all supplied filters must match.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    /// Matches either side of the delegation.
    pub agent_id: Option<String>,
    pub status: Option<FlatTaskStatus>,
}

/// The flat task table.
#[derive(Debug, Default)]
pub struct TaskBoard {
    tasks: DashMap<String, FlatTask>,
}

impl TaskBoard {
    pub fn new() -> Self {
        Self {
            tasks: DashMap::new(),
        }
    }

    /// Create a task in `assigned` status.
    pub fn assign(
        &self,
        from_agent: &str,
        to_agent: &str,
        task_type: &str,
        params: Value,
        expires_at: Option<DateTime<Utc>>,
    ) -> FlatTask {
        let now = Utc::now();
        let task = FlatTask {
            task_id: format!("task-{}", Uuid::new_v4().simple()),
            from_agent: from_agent.to_string(),
            to_agent: to_agent.to_string(),
            task_type: task_type.to_string(),
            params,
            status: FlatTaskStatus::Assigned,
            progress: 0.0,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
            expires_at,
        };
        self.tasks.insert(task.task_id.clone(), task.clone());
        task
    }

    /// Record progress. Moves `assigned → in_progress` and clamps the
    /// reported value into `[0.0, 1.0]`.
    pub fn report_progress(
        &self,
        agent_id: &str,
        task_id: &str,
        progress: f64,
    ) -> HubResult<FlatTask> {
        let mut task = self.checked_task_mut(agent_id, task_id)?;
        task.status = FlatTaskStatus::InProgress;
        task.progress = progress.clamp(0.0, 1.0);
        task.updated_at = Utc::now();
        Ok(task.clone())
    }

    /// Complete (or fail) a task. Terminal: a second completion is an
    /// `invalid_state` error.
    pub fn complete(
        &self,
        agent_id: &str,
        task_id: &str,
        success: bool,
        result: Option<Value>,
        error: Option<String>,
    ) -> HubResult<FlatTask> {
        let mut task = self.checked_task_mut(agent_id, task_id)?;
        task.status = if success {
            FlatTaskStatus::Completed
        } else {
            FlatTaskStatus::Failed
        };
        task.progress = 1.0;
        task.result = result;
        task.error = error;
        task.updated_at = Utc::now();
        Ok(task.clone())
    }

    /// Look up one task.
    pub fn get(&self, task_id: &str) -> Option<FlatTask> {
        self.tasks.get(task_id).map(|t| t.clone())
    }

    /// List tasks matching the filter, newest first.
    pub fn list(&self, filter: &TaskFilter) -> Vec<FlatTask> {
        let mut tasks: Vec<FlatTask> = self
            .tasks
            .iter()
            .filter(|entry| {
                let task = entry.value();
                if let Some(ref agent) = filter.agent_id {
                    if &task.from_agent != agent && &task.to_agent != agent {
                        return false;
                    }
                }
                if let Some(status) = filter.status {
                    if task.status != status {
                        return false;
                    }
                }
                true
            })
            .map(|entry| entry.value().clone())
            .collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        tasks
    }

    /// Resolve a task for mutation: it must exist, the caller must be its
    /// assignee, and it must not be terminal.
    fn checked_task_mut(
        &self,
        agent_id: &str,
        task_id: &str,
    ) -> HubResult<dashmap::mapref::one::RefMut<'_, String, FlatTask>> {
        let task = self.tasks.get_mut(task_id).ok_or(HubError::NotFound {
            kind: "task",
            id: task_id.to_string(),
        })?;
        if task.to_agent != agent_id {
            return Err(HubError::ownership(format!(
                "agent {} is not the assignee of task {}",
                agent_id, task_id
            )));
        }
        if task.status.is_terminal() {
            return Err(HubError::invalid_state(format!(
                "task {} is already {:?}",
                task_id, task.status
            )));
        }
        Ok(task)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
