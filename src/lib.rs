//! # a2a-hub
//!
//! A coordination hub for multi-agent systems: agent registry with
//! liveness, point-to-point and broadcast messaging, lifecycle event
//! subscriptions, FIFO mutual-exclusion locks, one-shot rendezvous
//! barriers, flat task delegation, and collaborative build sessions with
//! region claims and a dependency-gated task graph.
//!
//! Agents speak a JSON frame protocol over one persistent WebSocket each;
//! the [`hub::Coordinator`] owns all shared state and serializes operations
//! per key so unrelated agents, locks, and sessions never contend.

pub mod config;
pub mod coordination;
pub mod delegation;
pub mod errors;
pub mod geometry;
pub mod hub;
pub mod liveness;
pub mod protocol;
pub mod registry;
pub mod router;
pub mod server;
pub mod session;
pub mod transport;

pub use config::HubConfig;
pub use errors::{HubError, HubResult};
pub use geometry::Region;
pub use hub::Coordinator;
pub use protocol::{decode_frame, Command};
pub use registry::{AgentRecord, AgentRegistry, AgentStatus};
pub use router::Envelope;

/// Library version reported by `GET /health`.
pub const VERSION: &str = "0.3.1";
