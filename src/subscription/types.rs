//! Subscription ids and notifications.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::literal::Literal;
use crate::value::Tuple;

/// Unique identifier for a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    /// Create a new random subscription id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Net change to one watched table caused by one committed batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaNotification {
    pub subscription_id: SubscriptionId,
    pub policy: String,
    pub table: String,
    /// Rows that appeared, sorted.
    pub added: Vec<Tuple>,
    /// Rows that disappeared, sorted.
    pub removed: Vec<Tuple>,
    /// Runtime batch counter at commit.
    pub sequence: u64,
    pub committed_at: DateTime<Utc>,
}

impl DeltaNotification {
    /// Number of changed rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.added.len() + self.removed.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    /// Added rows as ground literals of the watched table.
    #[must_use]
    pub fn added_literals(&self) -> Vec<Literal> {
        self.literals(&self.added)
    }

    /// Removed rows as ground literals of the watched table.
    #[must_use]
    pub fn removed_literals(&self) -> Vec<Literal> {
        self.literals(&self.removed)
    }

    fn literals(&self, rows: &[Tuple]) -> Vec<Literal> {
        rows.iter()
            .map(|row| Literal::from_table_tuple(self.table.clone(), row.iter().cloned()))
            .collect()
    }
}
