//! Subscriptions — the record type and the registry that owns their lifecycle.

pub mod model;
pub mod registry;

pub use model::Subscription;
pub use registry::{SubscriptionListener, SubscriptionRegistry};
