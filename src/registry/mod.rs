//! Agent registry: identity, liveness state, and lifecycle subscriptions.

pub mod agents;
pub mod events;

pub use agents::{AgentRecord, AgentRegistry, AgentStatus, DiscoverFilter};
pub use events::{Subscription, SubscriptionTable};
