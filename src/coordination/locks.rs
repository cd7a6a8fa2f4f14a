//! Keyed mutual-exclusion locks with FIFO waiters.
//!
//! Locks are created lazily on first request. At most one holder exists per
//! lock id; the holder re-requesting refreshes its expiry without queueing;
//! release hands off atomically to the head of the waiting queue. Expiry is
//! lazy: a lapsed hold is only reclaimed when the next contender shows up.
//!
//! Each operation runs inside a single `DashMap` entry critical section, so
//! operations on the same lock id are linearized while different lock ids
//! proceed concurrently.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::Serialize;

use crate::errors::{HubError, HubResult};

/// State of one lock.
#[derive(Debug, Clone, Serialize)]
pub struct LockState {
    pub lock_id: String,
    pub holder_id: Option<String>,
    pub acquired_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Explicit ordered queue; position 1 is next in line.
    pub waiting_queue: VecDeque<String>,
}

impl LockState {
    fn new(lock_id: &str) -> Self {
        Self {
            lock_id: lock_id.to_string(),
            holder_id: None,
            acquired_at: None,
            expires_at: None,
            waiting_queue: VecDeque::new(),
        }
    }

    fn grant_to(&mut self, agent_id: &str, now: DateTime<Utc>, ttl: Duration) {
        self.holder_id = Some(agent_id.to_string());
        self.acquired_at = Some(now);
        self.expires_at = Some(now + ttl);
    }

    fn holder_lapsed(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(expiry) if expiry <= now)
    }
}

/// Outcome of a lock request.
#[derive(Debug, Clone, Serialize)]
pub struct LockGrant {
    pub lock_id: String,
    pub granted: bool,
    /// 1-based position in the waiting queue when not granted.
    pub queue_position: Option<usize>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// A waiter promoted to holder by a release; the hub notifies it
/// asynchronously.
#[derive(Debug, Clone)]
pub struct PromotedWaiter {
    pub lock_id: String,
    pub agent_id: String,
    pub expires_at: DateTime<Utc>,
}

/// The keyed lock table.
#[derive(Debug)]
pub struct LockTable {
    locks: DashMap<String, LockState>,
    default_ttl: Duration,
}

impl LockTable {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            locks: DashMap::new(),
            default_ttl,
        }
    }

    /// Request a lock. Grants immediately when the lock is free (or its
    /// holder lapsed), refreshes on reentrant request, otherwise queues the
    /// requester FIFO and reports its 1-based position.
    pub fn request(
        &self,
        agent_id: &str,
        lock_id: &str,
        ttl: Option<Duration>,
    ) -> LockGrant {
        let ttl = ttl.unwrap_or(self.default_ttl);
        let now = Utc::now();
        let mut entry = self
            .locks
            .entry(lock_id.to_string())
            .or_insert_with(|| LockState::new(lock_id));
        let lock = entry.value_mut();

        let granted = match lock.holder_id.as_deref() {
            None => {
                lock.grant_to(agent_id, now, ttl);
                true
            }
            Some(holder) if holder == agent_id => {
                // Reentrant: refresh expiry, no queueing.
                lock.expires_at = Some(now + ttl);
                true
            }
            Some(_) if lock.holder_lapsed(now) => {
                // Lazy expiry: the lapsed holder is treated as released.
                lock.waiting_queue.retain(|a| a != agent_id);
                lock.grant_to(agent_id, now, ttl);
                true
            }
            Some(_) => false,
        };

        if granted {
            return LockGrant {
                lock_id: lock_id.to_string(),
                granted: true,
                queue_position: None,
                expires_at: lock.expires_at,
            };
        }

        let position = match lock.waiting_queue.iter().position(|a| a == agent_id) {
            Some(existing) => existing + 1,
            None => {
                lock.waiting_queue.push_back(agent_id.to_string());
                lock.waiting_queue.len()
            }
        };
        LockGrant {
            lock_id: lock_id.to_string(),
            granted: false,
            queue_position: Some(position),
            expires_at: None,
        }
    }

    /// Release a lock. Only the current holder may release; the head of the
    /// queue (if any) is promoted in the same critical section.
    pub fn release(&self, agent_id: &str, lock_id: &str) -> HubResult<Option<PromotedWaiter>> {
        let mut entry = self.locks.get_mut(lock_id).ok_or(HubError::NotFound {
            kind: "lock",
            id: lock_id.to_string(),
        })?;
        let lock = entry.value_mut();
        match lock.holder_id.as_deref() {
            Some(holder) if holder == agent_id => Ok(Self::hand_off(lock, self.default_ttl)),
            Some(_) | None => Err(HubError::ownership(format!(
                "agent {} does not hold lock {}",
                agent_id, lock_id
            ))),
        }
    }

    /// Release every lock held by a disconnecting (or demoted) agent and
    /// purge it from all waiting queues. Returns the promoted waiters.
    pub fn release_all_held_by(&self, agent_id: &str) -> Vec<PromotedWaiter> {
        let mut promoted = Vec::new();
        for mut entry in self.locks.iter_mut() {
            let lock = entry.value_mut();
            lock.waiting_queue.retain(|a| a != agent_id);
            if lock.holder_id.as_deref() == Some(agent_id) {
                if let Some(next) = Self::hand_off(lock, self.default_ttl) {
                    promoted.push(next);
                }
            }
        }
        promoted
    }

    fn hand_off(lock: &mut LockState, ttl: Duration) -> Option<PromotedWaiter> {
        match lock.waiting_queue.pop_front() {
            Some(next) => {
                let now = Utc::now();
                lock.grant_to(&next, now, ttl);
                Some(PromotedWaiter {
                    lock_id: lock.lock_id.clone(),
                    agent_id: next,
                    expires_at: now + ttl,
                })
            }
            None => {
                lock.holder_id = None;
                lock.acquired_at = None;
                lock.expires_at = None;
                None
            }
        }
    }

    /// Current holder of a lock, if any (test and snapshot use).
    pub fn holder(&self, lock_id: &str) -> Option<String> {
        self.locks.get(lock_id).and_then(|l| l.holder_id.clone())
    }

    /// Snapshot of one lock's state.
    pub fn get(&self, lock_id: &str) -> Option<LockState> {
        self.locks.get(lock_id).map(|l| l.clone())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
