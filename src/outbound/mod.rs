//! Outbound pipeline: the ordered message queue and the per-message
//! fragment tracker that together decide when a delivery is confirmed.

mod queue;
mod tracker;

pub use queue::{Delivery, DeliveryNotifier, OutboundQueue, PendingMessage};
pub use tracker::{DeliveryTracker, Progress};
