//! Delta subscriptions.
//!
//! Subscribers watch one `(policy, table)` pair. After every committed batch
//! the registry diffs each watched table against the rows it last reported and
//! delivers one notification per subscriber carrying the net change. Batches
//! that leave a table unchanged produce nothing.
//!
//! Two delivery styles exist: a callback run synchronously after commit, and a
//! [`DeltaStream`] backed by a bounded channel. A full stream drops the
//! notification and counts it rather than blocking the committing caller.

/// Watched tables and delivery.
pub mod registry;
/// Channel-backed subscriber handle.
pub mod stream;
/// Subscription ids and notifications.
pub mod types;

pub use registry::SubscriptionRegistry;
pub use stream::DeltaStream;
pub use types::{DeltaNotification, SubscriptionId};
