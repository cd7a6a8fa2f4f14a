//! Session task graph: delegated work items with dependencies, blocking,
//! and unblocking.
//!
//! Invariant: a task is `blocked` iff at least one dependency is not
//! `completed`. Completing a task re-scans its dependents; any task whose
//! last blocking dependency just completed moves `blocked → pending` and is
//! reported in the `unblocked_tasks` list.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::errors::{HubError, HubResult};
use crate::geometry::Region;

use super::{BuildSession, SessionManager};

/// Session task state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionTaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Blocked,
    Cancelled,
}

impl SessionTaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Scheduling priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    Medium,
    High,
    Critical,
}

impl Default for TaskPriority {
    fn default() -> Self {
        Self::Medium
    }
}

/// One work item inside a session's task graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionTask {
    pub task_id: String,
    pub session_id: String,
    pub task_type: String,
    pub description: String,
    pub assigned_to: Option<String>,
    pub status: SessionTaskStatus,
    pub priority: TaskPriority,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub region: Option<Region>,
    pub dependencies: Vec<String>,
    pub deadline: Option<DateTime<Utc>>,
    pub result: Option<Value>,
    pub artifacts: Vec<String>,
    pub message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Filters for `get_task_queue`; all supplied filters must match.
#[derive(Debug, Clone, Default)]
pub struct TaskQueueFilter {
    pub assigned_to: Option<String>,
    pub status: Option<SessionTaskStatus>,
    pub priority: Option<TaskPriority>,
}

/// Filtered task list plus aggregate counts per status (over the whole
/// session, not just the filtered subset).
#[derive(Debug, Clone)]
pub struct TaskQueue {
    pub tasks: Vec<SessionTask>,
    pub counts: HashMap<SessionTaskStatus, usize>,
}

/// Outcome of `report_task`.
#[derive(Debug, Clone)]
pub struct ReportOutcome {
    pub task: SessionTask,
    /// Tasks whose last blocking dependency just completed.
    pub unblocked_tasks: Vec<String>,
}

fn blocking_dependencies(session: &BuildSession, dependencies: &[String]) -> Vec<String> {
    dependencies
        .iter()
        .filter(|dep| {
            session
                .tasks
                .get(*dep)
                .map(|t| t.status != SessionTaskStatus::Completed)
                .unwrap_or(true)
        })
        .cloned()
        .collect()
}

impl SessionManager {
    /// Create a task. Starts `blocked` when any dependency is not yet
    /// completed, `pending` otherwise; returns the blocking ids alongside.
    #[allow(clippy::too_many_arguments)]
    pub fn delegate_task(
        &self,
        session_id: &str,
        created_by: &str,
        task_type: &str,
        description: &str,
        priority: TaskPriority,
        dependencies: Vec<String>,
        region: Option<Region>,
        deadline: Option<DateTime<Utc>>,
    ) -> HubResult<(SessionTask, Vec<String>)> {
        self.with_session(session_id, |session| {
            session.member(created_by)?;
            for dep in &dependencies {
                if !session.tasks.contains_key(dep) {
                    return Err(HubError::NotFound {
                        kind: "task",
                        id: dep.clone(),
                    });
                }
            }
            let blocked_by = blocking_dependencies(session, &dependencies);
            let status = if blocked_by.is_empty() {
                SessionTaskStatus::Pending
            } else {
                SessionTaskStatus::Blocked
            };
            let task = SessionTask {
                task_id: format!("task-{}", Uuid::new_v4().simple()),
                session_id: session.session_id.clone(),
                task_type: task_type.to_string(),
                description: description.to_string(),
                assigned_to: None,
                status,
                priority,
                created_by: created_by.to_string(),
                created_at: Utc::now(),
                region,
                dependencies,
                deadline,
                result: None,
                artifacts: Vec::new(),
                message: None,
                started_at: None,
                completed_at: None,
            };
            session.tasks.insert(task.task_id.clone(), task.clone());
            Ok((task, blocked_by))
        })
    }

    /// Take a pending task: `pending → in_progress`, recording the assignee
    /// and start time. Blocked tasks are rejected with a distinct error.
    pub fn accept_task(
        &self,
        session_id: &str,
        agent_id: &str,
        task_id: &str,
    ) -> HubResult<SessionTask> {
        self.with_session(session_id, |session| {
            session.member(agent_id)?;
            let (status, dependencies) = {
                let task = session.tasks.get(task_id).ok_or(HubError::NotFound {
                    kind: "task",
                    id: task_id.to_string(),
                })?;
                (task.status, task.dependencies.clone())
            };
            match status {
                SessionTaskStatus::Pending => {}
                SessionTaskStatus::Blocked => {
                    let blocked_by = blocking_dependencies(session, &dependencies);
                    return Err(HubError::invalid_state(format!(
                        "task {} is blocked by incomplete dependencies: {}",
                        task_id,
                        blocked_by.join(", ")
                    )));
                }
                other => {
                    return Err(HubError::invalid_state(format!(
                        "task {} is {:?}, not pending",
                        task_id, other
                    )))
                }
            }

            let task = session.tasks.get_mut(task_id).ok_or(HubError::NotFound {
                kind: "task",
                id: task_id.to_string(),
            })?;
            task.assigned_to = Some(agent_id.to_string());
            task.status = SessionTaskStatus::InProgress;
            task.started_at = Some(Utc::now());
            Ok(task.clone())
        })
    }

    /// Report a task's new status. Only the current assignee may report.
    /// Completion re-scans dependents and unblocks any task whose
    /// dependencies are now all completed.
    #[allow(clippy::too_many_arguments)]
    pub fn report_task(
        &self,
        session_id: &str,
        agent_id: &str,
        task_id: &str,
        status: SessionTaskStatus,
        result: Option<Value>,
        artifacts: Vec<String>,
        message: Option<String>,
    ) -> HubResult<ReportOutcome> {
        if matches!(
            status,
            SessionTaskStatus::Pending | SessionTaskStatus::Blocked
        ) {
            return Err(HubError::malformed(format!(
                "status {:?} cannot be reported",
                status
            )));
        }
        self.with_session(session_id, |session| {
            {
                let task = session.tasks.get(task_id).ok_or(HubError::NotFound {
                    kind: "task",
                    id: task_id.to_string(),
                })?;
                if task.assigned_to.as_deref() != Some(agent_id) {
                    return Err(HubError::ownership(format!(
                        "agent {} is not assigned to task {}",
                        agent_id, task_id
                    )));
                }
                if task.status.is_terminal() {
                    return Err(HubError::invalid_state(format!(
                        "task {} is already {:?}",
                        task_id, task.status
                    )));
                }
            }

            let now = Utc::now();
            let task = {
                let task = session.tasks.get_mut(task_id).ok_or(HubError::NotFound {
                    kind: "task",
                    id: task_id.to_string(),
                })?;
                task.status = status;
                task.result = result;
                if !artifacts.is_empty() {
                    task.artifacts = artifacts;
                }
                task.message = message;
                if status.is_terminal() {
                    task.completed_at = Some(now);
                }
                task.clone()
            };

            let mut unblocked_tasks = Vec::new();
            if status == SessionTaskStatus::Completed {
                if let Ok(reporter) = session.member_mut(agent_id) {
                    reporter.tasks_completed += 1;
                }
                // Unblock scan: dependents whose last blocker just finished.
                let candidates: Vec<String> = session
                    .tasks
                    .values()
                    .filter(|t| {
                        t.status == SessionTaskStatus::Blocked
                            && t.dependencies.iter().any(|d| d == task_id)
                    })
                    .map(|t| t.task_id.clone())
                    .collect();
                for candidate in candidates {
                    let deps = session.tasks[&candidate].dependencies.clone();
                    if blocking_dependencies(session, &deps).is_empty() {
                        if let Some(t) = session.tasks.get_mut(&candidate) {
                            t.status = SessionTaskStatus::Pending;
                        }
                        unblocked_tasks.push(candidate);
                    }
                }
            }

            Ok(ReportOutcome {
                task,
                unblocked_tasks,
            })
        })
    }

    /// Filtered task list plus per-status counts for the whole session.
    pub fn task_queue(
        &self,
        session_id: &str,
        filter: &TaskQueueFilter,
    ) -> HubResult<TaskQueue> {
        self.with_session(session_id, |session| {
            let mut counts: HashMap<SessionTaskStatus, usize> = HashMap::new();
            for task in session.tasks.values() {
                *counts.entry(task.status).or_default() += 1;
            }
            let mut tasks: Vec<SessionTask> = session
                .tasks
                .values()
                .filter(|task| {
                    if let Some(ref assignee) = filter.assigned_to {
                        if task.assigned_to.as_deref() != Some(assignee.as_str()) {
                            return false;
                        }
                    }
                    if let Some(status) = filter.status {
                        if task.status != status {
                            return false;
                        }
                    }
                    if let Some(priority) = filter.priority {
                        if task.priority != priority {
                            return false;
                        }
                    }
                    true
                })
                .cloned()
                .collect();
            tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
            Ok(TaskQueue { tasks, counts })
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::super::tests::manager;
    use super::super::SessionRole;
    use super::*;
    use serde_json::json;

    fn session_with_agent() -> (SessionManager, String, String) {
        let mgr = manager();
        let session = mgr.create_session("castle", None, None, None, Default::default());
        let a = mgr
            .join_session(&session.session_id, "a", SessionRole::default(), vec![], None)
            .unwrap();
        (mgr, session.session_id, a.agent_id)
    }

    fn delegate(
        mgr: &SessionManager,
        sid: &str,
        agent: &str,
        deps: Vec<String>,
    ) -> (SessionTask, Vec<String>) {
        mgr.delegate_task(
            sid,
            agent,
            "build_wall",
            "north wall",
            TaskPriority::default(),
            deps,
            None,
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_task_without_dependencies_starts_pending() {
        let (mgr, sid, a) = session_with_agent();
        let (task, blocked_by) = delegate(&mgr, &sid, &a, vec![]);
        assert_eq!(task.status, SessionTaskStatus::Pending);
        assert!(blocked_by.is_empty());
    }

    #[test]
    fn test_dependency_gating_end_to_end() {
        // Scenario: T2 depends on T1; completing T1 unblocks T2.
        let (mgr, sid, a) = session_with_agent();
        let (t1, _) = delegate(&mgr, &sid, &a, vec![]);
        let (t2, blocked_by) = delegate(&mgr, &sid, &a, vec![t1.task_id.clone()]);
        assert_eq!(t2.status, SessionTaskStatus::Blocked);
        assert_eq!(blocked_by, vec![t1.task_id.clone()]);

        mgr.accept_task(&sid, &a, &t1.task_id).unwrap();
        let outcome = mgr
            .report_task(
                &sid,
                &a,
                &t1.task_id,
                SessionTaskStatus::Completed,
                Some(json!({"blocks": 120})),
                vec![],
                None,
            )
            .unwrap();
        assert_eq!(outcome.unblocked_tasks, vec![t2.task_id.clone()]);

        let state = mgr.get_state(&sid).unwrap();
        assert_eq!(state.tasks[&t2.task_id].status, SessionTaskStatus::Pending);
    }

    #[test]
    fn test_unblock_waits_for_last_dependency() {
        let (mgr, sid, a) = session_with_agent();
        let (t1, _) = delegate(&mgr, &sid, &a, vec![]);
        let (t2, _) = delegate(&mgr, &sid, &a, vec![]);
        let (t3, blocked_by) =
            delegate(&mgr, &sid, &a, vec![t1.task_id.clone(), t2.task_id.clone()]);
        assert_eq!(blocked_by.len(), 2);

        mgr.accept_task(&sid, &a, &t1.task_id).unwrap();
        let outcome = mgr
            .report_task(&sid, &a, &t1.task_id, SessionTaskStatus::Completed, None, vec![], None)
            .unwrap();
        // One dependency remains: still blocked.
        assert!(outcome.unblocked_tasks.is_empty());
        assert_eq!(
            mgr.get_state(&sid).unwrap().tasks[&t3.task_id].status,
            SessionTaskStatus::Blocked
        );

        mgr.accept_task(&sid, &a, &t2.task_id).unwrap();
        let outcome = mgr
            .report_task(&sid, &a, &t2.task_id, SessionTaskStatus::Completed, None, vec![], None)
            .unwrap();
        assert_eq!(outcome.unblocked_tasks, vec![t3.task_id]);
    }

    #[test]
    fn test_accept_blocked_task_distinct_error() {
        let (mgr, sid, a) = session_with_agent();
        let (t1, _) = delegate(&mgr, &sid, &a, vec![]);
        let (t2, _) = delegate(&mgr, &sid, &a, vec![t1.task_id.clone()]);

        let err = mgr.accept_task(&sid, &a, &t2.task_id).unwrap_err();
        assert_eq!(err.code(), "invalid_state");
        assert!(err.to_string().contains("blocked"));
        assert!(err.to_string().contains(&t1.task_id));
    }

    #[test]
    fn test_accept_non_pending_task_rejected() {
        let (mgr, sid, a) = session_with_agent();
        let (t1, _) = delegate(&mgr, &sid, &a, vec![]);
        mgr.accept_task(&sid, &a, &t1.task_id).unwrap();

        let err = mgr.accept_task(&sid, &a, &t1.task_id).unwrap_err();
        assert_eq!(err.code(), "invalid_state");
        assert!(!err.to_string().contains("blocked"));
    }

    #[test]
    fn test_report_requires_assignee() {
        let mgr = manager();
        let session = mgr.create_session("castle", None, None, None, Default::default());
        let a = mgr
            .join_session(&session.session_id, "a", SessionRole::default(), vec![], None)
            .unwrap();
        let b = mgr
            .join_session(&session.session_id, "b", SessionRole::default(), vec![], None)
            .unwrap();
        let (t1, _) = delegate(&mgr, &session.session_id, &a.agent_id, vec![]);
        mgr.accept_task(&session.session_id, &a.agent_id, &t1.task_id)
            .unwrap();

        let err = mgr
            .report_task(
                &session.session_id,
                &b.agent_id,
                &t1.task_id,
                SessionTaskStatus::Completed,
                None,
                vec![],
                None,
            )
            .unwrap_err();
        assert_eq!(err.code(), "ownership");
    }

    #[test]
    fn test_report_completed_records_time_and_counter() {
        let (mgr, sid, a) = session_with_agent();
        let (t1, _) = delegate(&mgr, &sid, &a, vec![]);
        mgr.accept_task(&sid, &a, &t1.task_id).unwrap();
        let outcome = mgr
            .report_task(
                &sid,
                &a,
                &t1.task_id,
                SessionTaskStatus::Completed,
                None,
                vec!["schematic.nbt".into()],
                Some("done".into()),
            )
            .unwrap();
        assert!(outcome.task.completed_at.is_some());
        assert_eq!(outcome.task.artifacts, vec!["schematic.nbt".to_string()]);

        let state = mgr.get_state(&sid).unwrap();
        assert_eq!(state.agents[&a].tasks_completed, 1);
    }

    #[test]
    fn test_report_pending_or_blocked_is_malformed() {
        let (mgr, sid, a) = session_with_agent();
        let (t1, _) = delegate(&mgr, &sid, &a, vec![]);
        mgr.accept_task(&sid, &a, &t1.task_id).unwrap();

        let err = mgr
            .report_task(&sid, &a, &t1.task_id, SessionTaskStatus::Pending, None, vec![], None)
            .unwrap_err();
        assert_eq!(err.code(), "malformed_input");
    }

    #[test]
    fn test_terminal_report_is_final() {
        let (mgr, sid, a) = session_with_agent();
        let (t1, _) = delegate(&mgr, &sid, &a, vec![]);
        mgr.accept_task(&sid, &a, &t1.task_id).unwrap();
        mgr.report_task(&sid, &a, &t1.task_id, SessionTaskStatus::Failed, None, vec![], None)
            .unwrap();

        let err = mgr
            .report_task(&sid, &a, &t1.task_id, SessionTaskStatus::Completed, None, vec![], None)
            .unwrap_err();
        assert_eq!(err.code(), "invalid_state");
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let (mgr, sid, a) = session_with_agent();
        let err = mgr
            .delegate_task(
                &sid,
                &a,
                "build",
                "",
                TaskPriority::default(),
                vec!["task-missing".into()],
                None,
                None,
            )
            .unwrap_err();
        assert_eq!(err.code(), "not_found");
    }

    #[test]
    fn test_task_queue_filters_and_counts() {
        let (mgr, sid, a) = session_with_agent();
        let (t1, _) = delegate(&mgr, &sid, &a, vec![]);
        let (_t2, _) = delegate(&mgr, &sid, &a, vec![t1.task_id.clone()]);
        mgr.accept_task(&sid, &a, &t1.task_id).unwrap();

        let queue = mgr
            .task_queue(
                &sid,
                &TaskQueueFilter {
                    assigned_to: Some(a.clone()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(queue.tasks.len(), 1);
        assert_eq!(queue.tasks[0].task_id, t1.task_id);
        assert_eq!(queue.counts[&SessionTaskStatus::InProgress], 1);
        assert_eq!(queue.counts[&SessionTaskStatus::Blocked], 1);

        let by_status = mgr
            .task_queue(
                &sid,
                &TaskQueueFilter {
                    status: Some(SessionTaskStatus::Blocked),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(by_status.tasks.len(), 1);
    }
}
