//! The coordinator: owns every shared table and dispatches decoded
//! commands to exactly one handler.
//!
//! Each handler reads/mutates the relevant table and produces one response
//! frame plus zero or more asynchronous notification frames for other
//! agents. All registry mutation happens first, inside per-key critical
//! sections; outbound sends only start after every table lock is released,
//! so backpressure on a slow connection can never stall an unrelated
//! operation.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Duration;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::{json, Value};

use crate::config::HubConfig;
use crate::coordination::{BarrierOutcome, BarrierTable, LockTable, PromotedWaiter};
use crate::delegation::{TaskBoard, TaskFilter};
use crate::errors::{HubError, HubResult};
use crate::protocol::command::{decode_frame, Command};
use crate::protocol::frames;
use crate::registry::events::{
    event_frame, EVENT_AGENT_OFFLINE, EVENT_AGENT_REGISTERED, EVENT_AGENT_UNREGISTERED,
};
use crate::registry::{AgentRegistry, DiscoverFilter, SubscriptionTable};
use crate::router::{Envelope, MessageRouter, Outbound};
use crate::session::{
    ReleaseOutcome, SessionDefaults, SessionManager, SessionRole, SessionTaskStatus,
    TaskQueueFilter,
};
use crate::transport::ConnectionSink;

fn to_value<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

fn status_key(status: SessionTaskStatus) -> &'static str {
    match status {
        SessionTaskStatus::Pending => "pending",
        SessionTaskStatus::InProgress => "in_progress",
        SessionTaskStatus::Completed => "completed",
        SessionTaskStatus::Failed => "failed",
        SessionTaskStatus::Blocked => "blocked",
        SessionTaskStatus::Cancelled => "cancelled",
    }
}

/// The agent-to-agent coordination hub.
pub struct Coordinator {
    config: HubConfig,
    registry: AgentRegistry,
    subscriptions: SubscriptionTable,
    router: MessageRouter,
    locks: LockTable,
    barriers: BarrierTable,
    tasks: TaskBoard,
    sessions: SessionManager,
    sinks: DashMap<String, Arc<dyn ConnectionSink>>,
}

impl Coordinator {
    pub fn new(config: HubConfig) -> Self {
        let locks = LockTable::new(Duration::seconds(config.default_lock_ttl_secs as i64));
        let sessions = SessionManager::new(SessionDefaults {
            max_agents: config.default_max_agents,
            grid_size: config.default_grid_size,
            coordination_mode: config.default_coordination_mode.clone(),
            claim_ttl: Duration::seconds(config.default_claim_ttl_secs as i64),
        });
        Self {
            config,
            registry: AgentRegistry::new(),
            subscriptions: SubscriptionTable::new(),
            router: MessageRouter::new(),
            locks,
            barriers: BarrierTable::new(),
            tasks: TaskBoard::new(),
            sessions,
            sinks: DashMap::new(),
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    /// Handle one inbound text frame from a connection.
    ///
    /// `bound` is the transport-level agent id this connection registered
    /// as, if any; a successful `register` binds the connection's sink so
    /// notifications can reach the agent. Returns the single response
    /// frame owed to the caller; notifications are delivered separately.
    pub async fn handle_frame(
        &self,
        sink: &Arc<dyn ConnectionSink>,
        bound: &mut Option<String>,
        text: &str,
    ) -> Value {
        let command = match decode_frame(text) {
            Ok(command) => command,
            Err(err) => return err.to_frame(),
        };
        let is_register = matches!(command, Command::Register { .. });

        match self.dispatch(bound.as_deref(), command) {
            Ok((response, outbound)) => {
                if is_register {
                    if let Some(agent_id) = response["agent_id"].as_str() {
                        self.sinks.insert(agent_id.to_string(), Arc::clone(sink));
                        *bound = Some(agent_id.to_string());
                    }
                }
                self.deliver(outbound).await;
                response
            }
            Err(err) => err.to_frame(),
        }
    }

    /// Transport-close cleanup in one deterministic step: demote the agent,
    /// release every lock it holds (promoting waiters), drop its sink, and
    /// notify subscribers.
    pub async fn handle_disconnect(&self, agent_id: &str) {
        self.sinks.remove(agent_id);
        let outbound = self.demote_agent(agent_id);
        if !outbound.is_empty() || self.registry.get(agent_id).is_some() {
            tracing::info!(agent_id, "connection closed, agent demoted to offline");
        }
        self.deliver(outbound).await;
    }

    /// Liveness sweep: demote every reachable agent whose heartbeat
    /// lapsed, releasing its locks exactly like a disconnect. Returns the
    /// number of agents demoted.
    pub async fn sweep_stale_agents(&self) -> usize {
        let timeout = Duration::seconds(self.config.heartbeat_timeout_secs as i64);
        let stale = self.registry.stale_agents(chrono::Utc::now(), timeout);
        let mut outbound = Vec::new();
        for agent_id in &stale {
            tracing::warn!(agent_id, "heartbeat lapsed, demoting to offline");
            outbound.extend(self.demote_agent(agent_id));
        }
        let demoted = stale.len();
        self.deliver(outbound).await;
        demoted
    }

    // -----------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------

    /// Route one command to its handler. `caller` is the transport-level
    /// agent id bound to the originating connection, when known.
    pub fn dispatch(
        &self,
        caller: Option<&str>,
        command: Command,
    ) -> HubResult<(Value, Vec<Outbound>)> {
        match command {
            Command::Register {
                agent_id,
                agent_type,
                capabilities,
                region,
                metadata,
            } => self.handle_register(agent_id, agent_type, capabilities, region, metadata),
            Command::Unregister { agent_id } => self.handle_unregister(&agent_id),
            Command::Heartbeat { agent_id, status } => {
                let status = self.registry.heartbeat(&agent_id, status)?;
                Ok((
                    frames::result_frame(
                        "heartbeat",
                        json!({ "agent_id": agent_id, "status": status }),
                    ),
                    vec![],
                ))
            }
            Command::Discover {
                agent_type,
                capability,
                region,
            } => {
                let agents = self.registry.discover(&DiscoverFilter {
                    agent_type,
                    capability,
                    region_overlap: region,
                });
                let count = agents.len();
                Ok((
                    frames::result_frame(
                        "discover",
                        json!({ "agents": agents, "count": count }),
                    ),
                    vec![],
                ))
            }
            Command::Subscribe {
                agent_id,
                event_type,
                filter,
            } => {
                if self.registry.get(&agent_id).is_none() {
                    return Err(HubError::NotFound {
                        kind: "agent",
                        id: agent_id,
                    });
                }
                self.subscriptions.subscribe(&agent_id, &event_type, filter);
                Ok((
                    frames::result_frame(
                        "subscribe",
                        json!({ "agent_id": agent_id, "event_type": event_type }),
                    ),
                    vec![],
                ))
            }
            Command::Direct {
                from_agent,
                to_agent,
                message_type,
                payload,
                priority,
                correlation_id,
                expires_at,
            } => {
                let mut envelope =
                    Envelope::new(from_agent, Some(to_agent), message_type, payload)
                        .with_correlation_id(correlation_id)
                        .with_expiry(expires_at);
                if let Some(priority) = priority {
                    envelope = envelope.with_priority(priority);
                }
                let outbound = self.router.route_direct(&self.registry, &envelope);
                let delivered = outbound.is_some();
                Ok((
                    frames::result_frame(
                        "direct",
                        json!({ "message_id": envelope.message_id, "delivered": delivered }),
                    ),
                    outbound.into_iter().collect(),
                ))
            }
            Command::Broadcast {
                from_agent,
                agent_type,
                message_type,
                payload,
                exclude_self,
            } => {
                let envelope = Envelope::new(from_agent, None, message_type, payload);
                let outbound = self.router.broadcast(
                    &self.registry,
                    &envelope,
                    agent_type.as_deref(),
                    exclude_self,
                );
                Ok((
                    frames::result_frame(
                        "broadcast",
                        json!({ "message_id": envelope.message_id, "recipients": outbound.len() }),
                    ),
                    outbound,
                ))
            }
            Command::LockRequest {
                agent_id,
                lock_id,
                timeout_secs,
            } => {
                self.require_reachable(&agent_id)?;
                let ttl = timeout_secs.map(|secs| Duration::seconds(secs as i64));
                let grant = self.locks.request(&agent_id, &lock_id, ttl);
                Ok((frames::result_frame("lock_request", to_value(&grant)), vec![]))
            }
            Command::LockRelease { agent_id, lock_id } => {
                let promoted = self.locks.release(&agent_id, &lock_id)?;
                let granted_to = promoted.as_ref().map(|p| p.agent_id.clone());
                let outbound = promoted
                    .into_iter()
                    .map(|p| Self::promotion_frame(&p))
                    .collect();
                Ok((
                    frames::result_frame(
                        "lock_release",
                        json!({ "lock_id": lock_id, "released": true, "granted_to": granted_to }),
                    ),
                    outbound,
                ))
            }
            Command::BarrierEnter {
                agent_id,
                barrier_id,
                expected_count,
            } => {
                self.require_reachable(&agent_id)?;
                self.handle_barrier_enter(&agent_id, &barrier_id, expected_count)
            }
            Command::AssignTask {
                from_agent,
                to_agent,
                task_type,
                params,
                expires_at,
            } => {
                if self.registry.get(&to_agent).is_none() {
                    return Err(HubError::NotFound {
                        kind: "agent",
                        id: to_agent,
                    });
                }
                let task = self
                    .tasks
                    .assign(&from_agent, &to_agent, &task_type, params, expires_at);
                let task_value = to_value(&task);
                let outbound = vec![Outbound {
                    to: to_agent,
                    frame: frames::task_assigned(&task_value),
                }];
                Ok((frames::result_frame("assign_task", task_value), outbound))
            }
            Command::ReportProgress {
                agent_id,
                task_id,
                progress,
            } => {
                let task = self.tasks.report_progress(&agent_id, &task_id, progress)?;
                Ok((
                    frames::result_frame(
                        "report_progress",
                        json!({
                            "task_id": task.task_id,
                            "status": task.status,
                            "progress": task.progress,
                        }),
                    ),
                    vec![],
                ))
            }
            Command::CompleteTask {
                agent_id,
                task_id,
                success,
                result,
                error,
            } => {
                let task = self.tasks.complete(&agent_id, &task_id, success, result, error)?;
                let task_value = to_value(&task);
                // The assigner hears about completion asynchronously.
                let outbound = vec![Outbound {
                    to: task.from_agent.clone(),
                    frame: json!({
                        "type": "task_completed",
                        "task_id": task.task_id,
                        "status": task.status,
                        "result": task.result,
                        "error": task.error,
                    }),
                }];
                Ok((frames::result_frame("complete_task", task_value), outbound))
            }
            Command::GetTask { task_id } => {
                let task = self.tasks.get(&task_id).ok_or(HubError::NotFound {
                    kind: "task",
                    id: task_id,
                })?;
                Ok((frames::result_frame("get_task", to_value(&task)), vec![]))
            }
            Command::ListTasks { agent_id, status } => {
                let tasks = self.tasks.list(&TaskFilter { agent_id, status });
                let count = tasks.len();
                Ok((
                    frames::result_frame(
                        "list_tasks",
                        json!({ "tasks": tasks, "count": count }),
                    ),
                    vec![],
                ))
            }
            Command::CreateSession {
                session_name,
                max_agents,
                grid_size,
                coordination_mode,
                config,
            } => {
                let session = self.sessions.create_session(
                    &session_name,
                    max_agents,
                    grid_size,
                    coordination_mode,
                    config,
                );
                Ok((
                    frames::result_frame(
                        "create_session",
                        json!({
                            "session_id": session.session_id,
                            "session_name": session.session_name,
                            "invite_token": session.invite_token,
                            "max_agents": session.max_agents,
                            "grid_size": session.grid_size,
                            "coordination_mode": session.coordination_mode,
                        }),
                    ),
                    vec![],
                ))
            }
            Command::JoinSession {
                session_id,
                agent_name,
                role,
                capabilities,
            } => {
                let agent = self.sessions.join_session(
                    &session_id,
                    &agent_name,
                    role.unwrap_or(SessionRole::Builder),
                    capabilities,
                    caller.map(|c| c.to_string()),
                )?;
                Ok((frames::result_frame("join_session", to_value(&agent)), vec![]))
            }
            Command::LeaveSession {
                session_id,
                agent_id,
                handoff_to,
            } => {
                let outcome =
                    self.sessions
                        .leave_session(&session_id, &agent_id, handoff_to.as_deref())?;
                Ok((
                    frames::result_frame(
                        "leave_session",
                        json!({
                            "session_id": session_id,
                            "agent_id": agent_id,
                            "released_claims": outcome.released_claims,
                            "transferred_claims": outcome.transferred_claims,
                            "remaining_agents": outcome.remaining_agents,
                        }),
                    ),
                    vec![],
                ))
            }
            Command::GetSessionState { session_id } => {
                let session = self.sessions.get_state(&session_id)?;
                Ok((
                    frames::result_frame("get_session_state", to_value(&session)),
                    vec![],
                ))
            }
            Command::ClaimRegion {
                session_id,
                agent_id,
                region,
                purpose,
                exclusive,
                ttl_secs,
            } => {
                let ttl = ttl_secs.map(|secs| Duration::seconds(secs as i64));
                let claim = self.sessions.claim_region(
                    &session_id,
                    &agent_id,
                    region,
                    purpose,
                    exclusive,
                    ttl,
                )?;
                Ok((frames::result_frame("claim_region", to_value(&claim)), vec![]))
            }
            Command::ReleaseRegion {
                session_id,
                agent_id,
                claim_id,
                transfer_to,
            } => {
                let outcome = self.sessions.release_region(
                    &session_id,
                    &agent_id,
                    &claim_id,
                    transfer_to.as_deref(),
                )?;
                let transferred_to = match outcome {
                    ReleaseOutcome::Transferred { to } => Some(to),
                    ReleaseOutcome::Deleted => None,
                };
                Ok((
                    frames::result_frame(
                        "release_region",
                        json!({
                            "claim_id": claim_id,
                            "released": true,
                            "transferred_to": transferred_to,
                        }),
                    ),
                    vec![],
                ))
            }
            Command::QueryRegion { session_id, region } => {
                let outcome = self.sessions.query_region(&session_id, region)?;
                Ok((
                    frames::result_frame(
                        "query_region",
                        json!({ "claims": outcome.claims, "is_free": outcome.is_free }),
                    ),
                    vec![],
                ))
            }
            Command::DelegateTask {
                session_id,
                agent_id,
                task_type,
                description,
                priority,
                dependencies,
                region,
                deadline,
            } => {
                let (task, blocked_by) = self.sessions.delegate_task(
                    &session_id,
                    &agent_id,
                    &task_type,
                    &description,
                    priority,
                    dependencies,
                    region,
                    deadline,
                )?;
                let mut body = to_value(&task);
                body["blocked_by"] = json!(blocked_by);
                Ok((frames::result_frame("delegate_task", body), vec![]))
            }
            Command::AcceptTask {
                session_id,
                agent_id,
                task_id,
            } => {
                let task = self.sessions.accept_task(&session_id, &agent_id, &task_id)?;
                Ok((frames::result_frame("accept_task", to_value(&task)), vec![]))
            }
            Command::ReportTask {
                session_id,
                agent_id,
                task_id,
                status,
                result,
                artifacts,
                message,
            } => {
                let outcome = self.sessions.report_task(
                    &session_id,
                    &agent_id,
                    &task_id,
                    status,
                    result,
                    artifacts,
                    message,
                )?;
                let outbound = self.unblock_notifications(&session_id, &outcome.unblocked_tasks);
                Ok((
                    frames::result_frame(
                        "report_task",
                        json!({
                            "task_id": outcome.task.task_id,
                            "status": outcome.task.status,
                            "completed_at": outcome.task.completed_at,
                            "unblocked_tasks": outcome.unblocked_tasks,
                        }),
                    ),
                    outbound,
                ))
            }
            Command::GetTaskQueue {
                session_id,
                agent_id,
                status,
                priority,
            } => {
                let queue = self.sessions.task_queue(
                    &session_id,
                    &TaskQueueFilter {
                        assigned_to: agent_id,
                        status,
                        priority,
                    },
                )?;
                let counts: HashMap<&'static str, usize> = queue
                    .counts
                    .iter()
                    .map(|(status, count)| (status_key(*status), *count))
                    .collect();
                Ok((
                    frames::result_frame(
                        "get_task_queue",
                        json!({ "tasks": queue.tasks, "counts": counts }),
                    ),
                    vec![],
                ))
            }
        }
    }

    // -----------------------------------------------------------------
    // Handlers with side-effect fan-out
    // -----------------------------------------------------------------

    fn handle_register(
        &self,
        agent_id: Option<String>,
        agent_type: String,
        capabilities: Vec<String>,
        region: Option<crate::geometry::Region>,
        metadata: HashMap<String, Value>,
    ) -> HubResult<(Value, Vec<Outbound>)> {
        let agent_id = agent_id
            .unwrap_or_else(|| format!("agent-{}", uuid::Uuid::new_v4().simple()));
        let record =
            self.registry
                .register(&agent_id, &agent_type, capabilities, region, metadata);
        tracing::info!(agent_id = %record.agent_id, agent_type = %record.agent_type, "agent registered");
        let outbound =
            self.lifecycle_notifications(EVENT_AGENT_REGISTERED, &record.agent_id, &record.agent_type);
        Ok((
            frames::result_frame(
                "register",
                json!({
                    "agent_id": record.agent_id,
                    "agent_type": record.agent_type,
                    "status": record.status,
                    "registered_at": record.registered_at,
                }),
            ),
            outbound,
        ))
    }

    fn handle_unregister(&self, agent_id: &str) -> HubResult<(Value, Vec<Outbound>)> {
        let record = self.registry.unregister(agent_id).ok_or(HubError::NotFound {
            kind: "agent",
            id: agent_id.to_string(),
        })?;
        self.sinks.remove(agent_id);
        self.subscriptions.remove_agent(agent_id);
        let mut outbound: Vec<Outbound> = self
            .locks
            .release_all_held_by(agent_id)
            .iter()
            .map(Self::promotion_frame)
            .collect();
        outbound.extend(self.lifecycle_notifications(
            EVENT_AGENT_UNREGISTERED,
            agent_id,
            &record.agent_type,
        ));
        tracing::info!(agent_id, "agent unregistered");
        Ok((
            frames::result_frame(
                "unregister",
                json!({ "agent_id": agent_id, "unregistered": true }),
            ),
            outbound,
        ))
    }

    fn handle_barrier_enter(
        &self,
        agent_id: &str,
        barrier_id: &str,
        expected_count: usize,
    ) -> HubResult<(Value, Vec<Outbound>)> {
        match self.barriers.enter(agent_id, barrier_id, expected_count) {
            BarrierOutcome::Waiting { arrived, expected } => Ok((
                frames::result_frame(
                    "barrier_enter",
                    json!({
                        "barrier_id": barrier_id,
                        "released": false,
                        "arrived_count": arrived,
                        "expected_count": expected,
                    }),
                ),
                vec![],
            )),
            BarrierOutcome::Released {
                arrived_agents,
                expected,
            } => {
                let arrived = arrived_agents.len();
                // Every arrived agent (the caller included) gets the
                // release notification exactly once.
                let outbound = arrived_agents
                    .iter()
                    .map(|agent| Outbound {
                        to: agent.clone(),
                        frame: frames::barrier_released(barrier_id, arrived),
                    })
                    .collect();
                Ok((
                    frames::result_frame(
                        "barrier_enter",
                        json!({
                            "barrier_id": barrier_id,
                            "released": true,
                            "arrived_count": arrived,
                            "expected_count": expected,
                        }),
                    ),
                    outbound,
                ))
            }
        }
    }

    // -----------------------------------------------------------------
    // Cleanup and notification plumbing
    // -----------------------------------------------------------------

    /// Locks and barriers are only open to reachable agents: an unknown id
    /// resolves to `not_found`, an offline record to `invalid_state`.
    fn require_reachable(&self, agent_id: &str) -> HubResult<()> {
        match self.registry.get(agent_id) {
            None => Err(HubError::NotFound {
                kind: "agent",
                id: agent_id.to_string(),
            }),
            Some(record) if !record.status.is_reachable() => Err(HubError::invalid_state(
                format!("agent {} is offline", agent_id),
            )),
            Some(_) => Ok(()),
        }
    }

    /// Demote one agent to offline and release everything it held.
    /// Shared by disconnect handling and the liveness sweep.
    fn demote_agent(&self, agent_id: &str) -> Vec<Outbound> {
        let mut outbound: Vec<Outbound> = self
            .locks
            .release_all_held_by(agent_id)
            .iter()
            .map(Self::promotion_frame)
            .collect();
        if self.registry.mark_offline(agent_id) {
            if let Some(record) = self.registry.get(agent_id) {
                outbound.extend(self.lifecycle_notifications(
                    EVENT_AGENT_OFFLINE,
                    agent_id,
                    &record.agent_type,
                ));
            }
        }
        outbound
    }

    fn promotion_frame(promoted: &PromotedWaiter) -> Outbound {
        Outbound {
            to: promoted.agent_id.clone(),
            frame: frames::lock_granted(
                &promoted.lock_id,
                &promoted.agent_id,
                promoted.expires_at,
            ),
        }
    }

    fn lifecycle_notifications(
        &self,
        event: &str,
        subject_id: &str,
        subject_type: &str,
    ) -> Vec<Outbound> {
        let frame = event_frame(event, subject_id, subject_type);
        self.subscriptions
            .recipients(event, subject_id, subject_type)
            .into_iter()
            .map(|to| Outbound {
                to,
                frame: frame.clone(),
            })
            .collect()
    }

    /// `task_unblocked` notifications for a report's unblock list, sent to
    /// the connections of each unblocked task's creator when known.
    fn unblock_notifications(&self, session_id: &str, unblocked: &[String]) -> Vec<Outbound> {
        if unblocked.is_empty() {
            return Vec::new();
        }
        let session = match self.sessions.get_state(session_id) {
            Ok(session) => session,
            Err(_) => return Vec::new(),
        };
        let mut outbound = Vec::new();
        for task_id in unblocked {
            let Some(task) = session.tasks.get(task_id) else {
                continue;
            };
            if let Some(creator) = session.agents.get(&task.created_by) {
                if let Some(transport_id) = &creator.transport_id {
                    outbound.push(Outbound {
                        to: transport_id.clone(),
                        frame: frames::task_unblocked(session_id, task_id),
                    });
                }
            }
        }
        outbound
    }

    /// Send computed notification frames. Runs strictly after dispatch, so
    /// no table lock is held across a potentially-blocking send.
    async fn deliver(&self, outbound: Vec<Outbound>) {
        for message in outbound {
            let sink = self.sinks.get(&message.to).map(|s| Arc::clone(s.value()));
            let Some(sink) = sink else {
                tracing::debug!(to = %message.to, "dropping notification: no connection");
                continue;
            };
            if sink.send(message.frame.to_string()).await.is_err() {
                tracing::debug!(to = %message.to, "dropping notification: connection closed");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MpscSink;
    use tokio::sync::mpsc;

    fn hub() -> Coordinator {
        Coordinator::new(HubConfig::default())
    }

    fn test_sink() -> (Arc<dyn ConnectionSink>, mpsc::Receiver<String>) {
        let (sink, rx) = MpscSink::channel(16);
        (Arc::new(sink), rx)
    }

    async fn send(
        hub: &Coordinator,
        sink: &Arc<dyn ConnectionSink>,
        bound: &mut Option<String>,
        frame: Value,
    ) -> Value {
        hub.handle_frame(sink, bound, &frame.to_string()).await
    }

    async fn register(
        hub: &Coordinator,
        sink: &Arc<dyn ConnectionSink>,
        bound: &mut Option<String>,
        agent_id: &str,
        agent_type: &str,
    ) -> Value {
        send(
            hub,
            sink,
            bound,
            json!({"type": "register", "agent_id": agent_id, "agent_type": agent_type}),
        )
        .await
    }

    fn recv_frame(rx: &mut mpsc::Receiver<String>) -> Value {
        let text = rx.try_recv().expect("expected a notification frame");
        serde_json::from_str(&text).unwrap()
    }

    #[tokio::test]
    async fn test_register_binds_connection() {
        let hub = hub();
        let (sink, _rx) = test_sink();
        let mut bound = None;

        let response = register(&hub, &sink, &mut bound, "a1", "builder").await;
        assert_eq!(response["type"], "register_result");
        assert_eq!(response["agent_id"], "a1");
        assert_eq!(bound.as_deref(), Some("a1"));
        assert!(hub.registry().get("a1").is_some());
    }

    #[tokio::test]
    async fn test_register_assigns_id_when_absent() {
        let hub = hub();
        let (sink, _rx) = test_sink();
        let mut bound = None;

        let response = send(
            &hub,
            &sink,
            &mut bound,
            json!({"type": "register", "agent_type": "builder"}),
        )
        .await;
        let assigned = response["agent_id"].as_str().unwrap();
        assert!(assigned.starts_with("agent-"));
        assert_eq!(bound.as_deref(), Some(assigned));
    }

    #[tokio::test]
    async fn test_unknown_type_error_frame() {
        let hub = hub();
        let (sink, _rx) = test_sink();
        let mut bound = None;

        let response = send(&hub, &sink, &mut bound, json!({"type": "warp_drive"})).await;
        assert_eq!(response["type"], "error");
        assert_eq!(response["error"], "unknown_message_type");
    }

    #[tokio::test]
    async fn test_lock_contention_scenario() {
        // A granted, B queued at position 1, A releases, B is notified.
        let hub = hub();
        let (sink_a, _rx_a) = test_sink();
        let (sink_b, mut rx_b) = test_sink();
        let (mut bound_a, mut bound_b) = (None, None);
        register(&hub, &sink_a, &mut bound_a, "A", "builder").await;
        register(&hub, &sink_b, &mut bound_b, "B", "builder").await;

        let granted = send(
            &hub,
            &sink_a,
            &mut bound_a,
            json!({"type": "lock_request", "agent_id": "A", "lock_id": "L"}),
        )
        .await;
        assert_eq!(granted["granted"], true);

        let queued = send(
            &hub,
            &sink_b,
            &mut bound_b,
            json!({"type": "lock_request", "agent_id": "B", "lock_id": "L"}),
        )
        .await;
        assert_eq!(queued["granted"], false);
        assert_eq!(queued["queue_position"], 1);

        let released = send(
            &hub,
            &sink_a,
            &mut bound_a,
            json!({"type": "lock_release", "agent_id": "A", "lock_id": "L"}),
        )
        .await;
        assert_eq!(released["released"], true);
        assert_eq!(released["granted_to"], "B");

        let notification = recv_frame(&mut rx_b);
        assert_eq!(notification["type"], "lock_granted");
        assert_eq!(notification["lock_id"], "L");
        assert_eq!(notification["agent_id"], "B");
    }

    #[tokio::test]
    async fn test_offline_agent_excluded_from_locks_and_barriers() {
        let hub = hub();
        let (sink, _rx) = test_sink();
        let mut bound = None;
        register(&hub, &sink, &mut bound, "ghost", "builder").await;
        hub.registry().mark_offline("ghost");

        let response = send(
            &hub,
            &sink,
            &mut bound,
            json!({"type": "lock_request", "agent_id": "ghost", "lock_id": "L"}),
        )
        .await;
        assert_eq!(response["type"], "error");
        assert_eq!(response["error"], "invalid_state");

        let response = send(
            &hub,
            &sink,
            &mut bound,
            json!({"type": "barrier_enter", "agent_id": "ghost", "barrier_id": "B1", "expected_count": 2}),
        )
        .await;
        assert_eq!(response["type"], "error");
        assert_eq!(response["error"], "invalid_state");

        // The rejected requests left no trace: a live agent takes the lock
        // immediately and opens the barrier as its first arrival.
        let (sink_l, _rx_l) = test_sink();
        let mut bound_l = None;
        register(&hub, &sink_l, &mut bound_l, "live", "builder").await;
        let grant = send(
            &hub,
            &sink_l,
            &mut bound_l,
            json!({"type": "lock_request", "agent_id": "live", "lock_id": "L"}),
        )
        .await;
        assert_eq!(grant["granted"], true);
        let arrival = send(
            &hub,
            &sink_l,
            &mut bound_l,
            json!({"type": "barrier_enter", "agent_id": "live", "barrier_id": "B1", "expected_count": 2}),
        )
        .await;
        assert_eq!(arrival["released"], false);
        assert_eq!(arrival["arrived_count"], 1);
    }

    #[tokio::test]
    async fn test_unregistered_agent_cannot_take_locks_or_barriers() {
        let hub = hub();
        let (sink, _rx) = test_sink();
        let mut bound = None;

        let response = send(
            &hub,
            &sink,
            &mut bound,
            json!({"type": "lock_request", "agent_id": "nobody", "lock_id": "L"}),
        )
        .await;
        assert_eq!(response["type"], "error");
        assert_eq!(response["error"], "not_found");

        let response = send(
            &hub,
            &sink,
            &mut bound,
            json!({"type": "barrier_enter", "agent_id": "nobody", "barrier_id": "B1", "expected_count": 2}),
        )
        .await;
        assert_eq!(response["error"], "not_found");
    }

    #[tokio::test]
    async fn test_barrier_scenario_notifies_both() {
        let hub = hub();
        let (sink_a, mut rx_a) = test_sink();
        let (sink_b, mut rx_b) = test_sink();
        let (mut bound_a, mut bound_b) = (None, None);
        register(&hub, &sink_a, &mut bound_a, "A", "builder").await;
        register(&hub, &sink_b, &mut bound_b, "B", "builder").await;

        let first = send(
            &hub,
            &sink_a,
            &mut bound_a,
            json!({"type": "barrier_enter", "agent_id": "A", "barrier_id": "B1", "expected_count": 2}),
        )
        .await;
        assert_eq!(first["released"], false);
        assert_eq!(first["arrived_count"], 1);

        let second = send(
            &hub,
            &sink_b,
            &mut bound_b,
            json!({"type": "barrier_enter", "agent_id": "B", "barrier_id": "B1", "expected_count": 2}),
        )
        .await;
        assert_eq!(second["released"], true);
        assert_eq!(second["arrived_count"], 2);

        for rx in [&mut rx_a, &mut rx_b] {
            let frame = recv_frame(rx);
            assert_eq!(frame["type"], "barrier_released");
            assert_eq!(frame["barrier_id"], "B1");
        }
    }

    #[tokio::test]
    async fn test_disconnect_releases_lock_to_waiter() {
        let hub = hub();
        let (sink_a, _rx_a) = test_sink();
        let (sink_b, mut rx_b) = test_sink();
        let (mut bound_a, mut bound_b) = (None, None);
        register(&hub, &sink_a, &mut bound_a, "A", "builder").await;
        register(&hub, &sink_b, &mut bound_b, "B", "builder").await;

        send(
            &hub,
            &sink_a,
            &mut bound_a,
            json!({"type": "lock_request", "agent_id": "A", "lock_id": "L"}),
        )
        .await;
        send(
            &hub,
            &sink_b,
            &mut bound_b,
            json!({"type": "lock_request", "agent_id": "B", "lock_id": "L"}),
        )
        .await;

        hub.handle_disconnect("A").await;

        let notification = recv_frame(&mut rx_b);
        assert_eq!(notification["type"], "lock_granted");
        assert_eq!(notification["agent_id"], "B");
        // A survives as an offline record.
        let record = hub.registry().get("A").unwrap();
        assert!(!record.status.is_reachable());
    }

    #[tokio::test]
    async fn test_direct_message_reaches_sink() {
        let hub = hub();
        let (sink_a, _rx_a) = test_sink();
        let (sink_b, mut rx_b) = test_sink();
        let (mut bound_a, mut bound_b) = (None, None);
        register(&hub, &sink_a, &mut bound_a, "A", "builder").await;
        register(&hub, &sink_b, &mut bound_b, "B", "builder").await;

        let response = send(
            &hub,
            &sink_a,
            &mut bound_a,
            json!({
                "type": "direct", "from_agent": "A", "to_agent": "B",
                "message_type": "ping", "payload": {"n": 7},
            }),
        )
        .await;
        assert_eq!(response["delivered"], true);

        let message = recv_frame(&mut rx_b);
        assert_eq!(message["type"], "message");
        assert_eq!(message["from_agent"], "A");
        assert_eq!(message["content"]["n"], 7);
    }

    #[tokio::test]
    async fn test_broadcast_counts_recipients() {
        let hub = hub();
        let (sink_a, _rx_a) = test_sink();
        let (sink_b, mut rx_b) = test_sink();
        let (sink_c, mut rx_c) = test_sink();
        let (mut ba, mut bb, mut bc) = (None, None, None);
        register(&hub, &sink_a, &mut ba, "A", "monitor").await;
        register(&hub, &sink_b, &mut bb, "B", "monitor").await;
        register(&hub, &sink_c, &mut bc, "C", "evolver").await;

        let response = send(
            &hub,
            &sink_a,
            &mut ba,
            json!({
                "type": "broadcast", "from_agent": "A",
                "agent_type": "monitor", "message_type": "status",
            }),
        )
        .await;
        assert_eq!(response["recipients"], 1);
        assert_eq!(recv_frame(&mut rx_b)["type"], "message");
        assert!(rx_c.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_lifecycle_subscription_notification() {
        let hub = hub();
        let (sink_w, mut rx_w) = test_sink();
        let mut bound_w = None;
        register(&hub, &sink_w, &mut bound_w, "watcher", "monitor").await;
        send(
            &hub,
            &sink_w,
            &mut bound_w,
            json!({"type": "subscribe", "agent_id": "watcher", "event_type": "agent_registered"}),
        )
        .await;

        let (sink_n, _rx_n) = test_sink();
        let mut bound_n = None;
        register(&hub, &sink_n, &mut bound_n, "newcomer", "builder").await;

        let event = recv_frame(&mut rx_w);
        assert_eq!(event["type"], "agent_event");
        assert_eq!(event["event"], "agent_registered");
        assert_eq!(event["agent_id"], "newcomer");
    }

    #[tokio::test]
    async fn test_session_flow_with_unblock_notification() {
        let hub = hub();
        let (sink, mut rx) = test_sink();
        let mut bound = None;
        register(&hub, &sink, &mut bound, "A", "builder").await;

        let created = send(
            &hub,
            &sink,
            &mut bound,
            json!({"type": "create_session", "session_name": "castle"}),
        )
        .await;
        let session_id = created["session_id"].as_str().unwrap().to_string();

        let joined = send(
            &hub,
            &sink,
            &mut bound,
            json!({"type": "join_session", "session_id": session_id, "agent_name": "mason"}),
        )
        .await;
        let agent_id = joined["agent_id"].as_str().unwrap().to_string();
        assert_eq!(joined["transport_id"], "A");

        let t1 = send(
            &hub,
            &sink,
            &mut bound,
            json!({
                "type": "delegate_task", "session_id": session_id,
                "agent_id": agent_id, "task_type": "wall",
            }),
        )
        .await;
        let t1_id = t1["task_id"].as_str().unwrap().to_string();
        assert_eq!(t1["status"], "pending");

        let t2 = send(
            &hub,
            &sink,
            &mut bound,
            json!({
                "type": "delegate_task", "session_id": session_id,
                "agent_id": agent_id, "task_type": "roof",
                "dependencies": [t1_id],
            }),
        )
        .await;
        assert_eq!(t2["status"], "blocked");
        assert_eq!(t2["blocked_by"][0], t1_id.as_str());
        let t2_id = t2["task_id"].as_str().unwrap().to_string();

        send(
            &hub,
            &sink,
            &mut bound,
            json!({
                "type": "accept_task", "session_id": session_id,
                "agent_id": agent_id, "task_id": t1_id,
            }),
        )
        .await;
        let reported = send(
            &hub,
            &sink,
            &mut bound,
            json!({
                "type": "report_task", "session_id": session_id,
                "agent_id": agent_id, "task_id": t1_id, "status": "completed",
            }),
        )
        .await;
        assert_eq!(reported["unblocked_tasks"][0], t2_id.as_str());

        let notification = recv_frame(&mut rx);
        assert_eq!(notification["type"], "task_unblocked");
        assert_eq!(notification["task_id"], t2_id.as_str());
    }

    #[tokio::test]
    async fn test_region_conflict_error_frame() {
        let hub = hub();
        let (sink, _rx) = test_sink();
        let mut bound = None;
        register(&hub, &sink, &mut bound, "A", "builder").await;

        let created = send(
            &hub,
            &sink,
            &mut bound,
            json!({"type": "create_session", "session_name": "castle"}),
        )
        .await;
        let session_id = created["session_id"].as_str().unwrap().to_string();
        let joined = send(
            &hub,
            &sink,
            &mut bound,
            json!({"type": "join_session", "session_id": session_id, "agent_name": "mason"}),
        )
        .await;
        let agent_id = joined["agent_id"].as_str().unwrap().to_string();

        let first = send(
            &hub,
            &sink,
            &mut bound,
            json!({
                "type": "claim_region", "session_id": session_id, "agent_id": agent_id,
                "region": {"x": 0, "y": 0, "width": 100, "height": 100},
            }),
        )
        .await;
        assert_eq!(first["type"], "claim_region_result");

        let conflict = send(
            &hub,
            &sink,
            &mut bound,
            json!({
                "type": "claim_region", "session_id": session_id, "agent_id": agent_id,
                "region": {"x": 50, "y": 50, "width": 100, "height": 100},
            }),
        )
        .await;
        assert_eq!(conflict["type"], "error");
        assert_eq!(conflict["error"], "conflict");
        assert_eq!(conflict["details"]["claim_id"], first["claim_id"]);
    }

    #[tokio::test]
    async fn test_sweep_demotes_stale_agents() {
        let mut config = HubConfig::default();
        config.heartbeat_timeout_secs = 0;
        let hub = Coordinator::new(config);
        let (sink, _rx) = test_sink();
        let mut bound = None;
        register(&hub, &sink, &mut bound, "A", "builder").await;

        // With a zero timeout every reachable agent is stale.
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let demoted = hub.sweep_stale_agents().await;
        assert_eq!(demoted, 1);
        assert!(!hub.registry().get("A").unwrap().status.is_reachable());

        // Idempotent: an offline agent is not demoted twice.
        assert_eq!(hub.sweep_stale_agents().await, 0);
    }
}
