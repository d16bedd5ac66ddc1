//! SharePoint change-notification intake.
//!
//! SharePoint delivers webhook notifications that only carry a `ChangeKey`
//! and a subscription id — no payload, no guarantee of single delivery.
//! The processor's job is to drop duplicates, scope each notification to
//! the right integration, and turn it into a decision about what job (if
//! any) to enqueue. HTTP routing and the actual job enqueue live outside
//! this crate.

mod dedup;
mod notification;
mod processor;

pub use dedup::{ChangeKeyStore, DedupError};
pub use notification::{Notification, SubscriptionScope};
pub use processor::{DispatchDecision, WebhookProcessor};
