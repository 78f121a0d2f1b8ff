//! A runtime shared between threads.
//!
//! Queries and simulations take the read lock; everything that changes
//! committed state takes the write lock.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{GuardError, GuardResult};
use crate::literal::Fact;
use crate::schema::Schema;
use crate::subscription::{DeltaNotification, DeltaStream, SubscriptionId};
use crate::theory::PolicyKind;

use super::{Changes, Event, PolicyId, PolicyInfo, Runtime, RuntimeConfig};

/// Cloneable handle to one [`Runtime`].
#[derive(Debug, Clone)]
pub struct SharedRuntime {
    inner: Arc<RwLock<Runtime>>,
}

impl Default for SharedRuntime {
    fn default() -> Self {
        Self::new(Runtime::new())
    }
}

impl SharedRuntime {
    #[must_use]
    pub fn new(runtime: Runtime) -> Self {
        Self {
            inner: Arc::new(RwLock::new(runtime)),
        }
    }

    /// Create a shared runtime with a custom configuration.
    pub fn with_config(config: RuntimeConfig) -> GuardResult<Self> {
        Ok(Self::new(Runtime::with_config(config)?))
    }

    /// Shared access for reads.
    pub fn read(&self) -> GuardResult<RwLockReadGuard<'_, Runtime>> {
        self.inner
            .read()
            .map_err(|_| GuardError::internal("runtime lock poisoned"))
    }

    /// Exclusive access for writes.
    pub fn write(&self) -> GuardResult<RwLockWriteGuard<'_, Runtime>> {
        self.inner
            .write()
            .map_err(|_| GuardError::internal("runtime lock poisoned"))
    }

    pub fn create_policy(&self, name: &str, kind: PolicyKind) -> GuardResult<PolicyId> {
        self.write()?.create_policy(name, kind)
    }

    pub fn delete_policy(&self, name: &str) -> GuardResult<bool> {
        self.write()?.delete_policy(name)
    }

    pub fn policies(&self) -> GuardResult<Vec<PolicyInfo>> {
        Ok(self.read()?.policies())
    }

    pub fn set_schema(&self, source: &str, schema: Schema) -> GuardResult<()> {
        self.write()?.set_schema(source, schema)
    }

    pub fn insert(&self, text: &str, policy: &str) -> GuardResult<Changes> {
        self.write()?.insert(text, policy)
    }

    pub fn delete(&self, text: &str, policy: &str) -> GuardResult<Changes> {
        self.write()?.delete(text, policy)
    }

    pub fn update(&self, events: Vec<Event>) -> GuardResult<Changes> {
        self.write()?.update(events)
    }

    pub fn initialize_tables<I>(&self, tables: &[&str], rows: I, policy: &str) -> GuardResult<()>
    where
        I: IntoIterator<Item = Fact>,
    {
        self.write()?.initialize_tables(tables, rows, policy)
    }

    pub fn select(&self, query: &str, policy: &str) -> GuardResult<Vec<String>> {
        self.read()?.select(query, policy)
    }

    pub fn simulate(&self, query: &str, policy: &str, events: Vec<Event>) -> GuardResult<Vec<String>> {
        self.read()?.simulate(query, policy, events)
    }

    pub fn simulate_text(&self, query: &str, policy: &str, sequence: &str) -> GuardResult<Vec<String>> {
        self.read()?.simulate_text(query, policy, sequence)
    }

    pub fn subscribe<F>(&self, policy: &str, table: &str, callback: F) -> GuardResult<SubscriptionId>
    where
        F: FnMut(&DeltaNotification) + Send + Sync + 'static,
    {
        Ok(self.write()?.subscribe(policy, table, callback))
    }

    pub fn subscribe_stream(&self, policy: &str, table: &str) -> GuardResult<DeltaStream> {
        Ok(self.write()?.subscribe_stream(policy, table))
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> GuardResult<bool> {
        Ok(self.write()?.unsubscribe(id))
    }
}
