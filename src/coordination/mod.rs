//! Coordination primitives: keyed mutual-exclusion locks and one-shot
//! rendezvous barriers.

pub mod barriers;
pub mod locks;

pub use barriers::{BarrierOutcome, BarrierTable};
pub use locks::{LockGrant, LockTable, PromotedWaiter};
