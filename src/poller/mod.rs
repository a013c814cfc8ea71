//! Feed polling engine: per-URL poll tasks, their scheduler, and delivery.

pub mod delivery;
pub mod scheduler;
pub mod task;

pub use delivery::{DeliveryReport, deliver_new_items, matches_pattern, render_item};
pub use scheduler::PollScheduler;
pub use task::{PollContext, PollOutcome, PollTask};
