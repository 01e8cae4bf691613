//! Live status distribution.
//!
//! Every state transition is published as a [`StatusEvent`](crate::core::StatusEvent)
//! to per-project subscribers and to an all-projects channel. Publishing
//! never blocks: each subscriber reads from a bounded buffer that drops its
//! oldest events when the subscriber falls behind.

mod broadcaster;

pub use broadcaster::{BroadcastMetrics, StatusBroadcaster, StatusSubscription};
