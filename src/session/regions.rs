//! Region claims: rectangular reservations inside a build session.
//!
//! An exclusive claim must not overlap any live claim in its session; the
//! conflict error names the existing claim and its owner. Claims carry a
//! lazy expiry: a lapsed claim no longer counts as live for conflict
//! detection or queries, but it is only deleted by release or by its owner
//! leaving the session.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::errors::{HubError, HubResult};
use crate::geometry::Region;

use super::SessionManager;

/// One rectangular reservation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionClaim {
    pub claim_id: String,
    pub session_id: String,
    pub agent_id: String,
    pub bounds: Region,
    pub purpose: String,
    pub claimed_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub exclusive: bool,
}

impl RegionClaim {
    /// A claim is live until its expiry lapses.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expiry) => expiry > now,
            None => true,
        }
    }
}

/// What `release_region` did with the claim.
#[derive(Debug, Clone)]
pub enum ReleaseOutcome {
    Deleted,
    Transferred { to: String },
}

/// Result of `query_region`.
#[derive(Debug, Clone)]
pub struct QueryOutcome {
    pub claims: Vec<RegionClaim>,
    /// True iff no live claim overlaps the queried rectangle.
    pub is_free: bool,
}

impl SessionManager {
    /// Claim a rectangle. Exclusive claims are rejected with a conflict
    /// (naming the blocking claim and its owner) when they overlap any
    /// live claim in the session.
    pub fn claim_region(
        &self,
        session_id: &str,
        agent_id: &str,
        bounds: Region,
        purpose: Option<String>,
        exclusive: bool,
        ttl: Option<Duration>,
    ) -> HubResult<RegionClaim> {
        let ttl = ttl.unwrap_or(self.defaults.claim_ttl);
        self.with_session(session_id, |session| {
            session.member(agent_id)?;
            let now = Utc::now();

            if exclusive {
                if let Some(existing) = session
                    .regions
                    .values()
                    .find(|claim| claim.is_live(now) && claim.bounds.overlaps(&bounds))
                {
                    return Err(HubError::Conflict {
                        message: format!(
                            "region overlaps claim {} held by {}",
                            existing.claim_id, existing.agent_id
                        ),
                        details: Some(json!({
                            "claim_id": existing.claim_id,
                            "owner": existing.agent_id,
                            "bounds": existing.bounds,
                        })),
                    });
                }
            }

            let claim = RegionClaim {
                claim_id: format!("claim-{}", Uuid::new_v4().simple()),
                session_id: session.session_id.clone(),
                agent_id: agent_id.to_string(),
                bounds,
                purpose: purpose.unwrap_or_default(),
                claimed_at: now,
                expires_at: Some(now + ttl),
                exclusive,
            };
            session
                .regions
                .insert(claim.claim_id.clone(), claim.clone());
            session
                .member_mut(agent_id)?
                .regions_claimed
                .push(claim.claim_id.clone());
            Ok(claim)
        })
    }

    /// Release a claim, or transfer it to another member when `transfer_to`
    /// names one. Only the claim's owner may release it.
    pub fn release_region(
        &self,
        session_id: &str,
        agent_id: &str,
        claim_id: &str,
        transfer_to: Option<&str>,
    ) -> HubResult<ReleaseOutcome> {
        self.with_session(session_id, |session| {
            let owner = match session.regions.get(claim_id) {
                Some(claim) => claim.agent_id.clone(),
                None => {
                    return Err(HubError::NotFound {
                        kind: "claim",
                        id: claim_id.to_string(),
                    })
                }
            };
            if owner != agent_id {
                return Err(HubError::ownership(format!(
                    "agent {} does not own claim {}",
                    agent_id, claim_id
                )));
            }

            match transfer_to {
                Some(heir) if session.agents.contains_key(heir) => {
                    if let Some(claim) = session.regions.get_mut(claim_id) {
                        claim.agent_id = heir.to_string();
                    }
                    if let Ok(previous) = session.member_mut(agent_id) {
                        previous.regions_claimed.retain(|c| c != claim_id);
                    }
                    session
                        .member_mut(heir)?
                        .regions_claimed
                        .push(claim_id.to_string());
                    Ok(ReleaseOutcome::Transferred {
                        to: heir.to_string(),
                    })
                }
                Some(heir) => Err(HubError::NotFound {
                    kind: "session agent",
                    id: heir.to_string(),
                }),
                None => {
                    session.regions.remove(claim_id);
                    if let Ok(previous) = session.member_mut(agent_id) {
                        previous.regions_claimed.retain(|c| c != claim_id);
                    }
                    Ok(ReleaseOutcome::Deleted)
                }
            }
        })
    }

    /// Every live claim overlapping the queried rectangle.
    pub fn query_region(&self, session_id: &str, bounds: Region) -> HubResult<QueryOutcome> {
        let now = Utc::now();
        self.with_session(session_id, |session| {
            let claims: Vec<RegionClaim> = session
                .regions
                .values()
                .filter(|claim| claim.is_live(now) && claim.bounds.overlaps(&bounds))
                .cloned()
                .collect();
            let is_free = claims.is_empty();
            Ok(QueryOutcome { claims, is_free })
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
