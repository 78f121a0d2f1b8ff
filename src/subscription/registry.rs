//! Subscription registry.
//!
//! The registry owns every subscription and one baseline per watched
//! `(policy, table)`: the rows reported so far. Dispatch recomputes each
//! watched table, diffs it against its baseline and fans the delta out.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use crossbeam_channel::{bounded, Sender, TrySendError};
use tracing::warn;

use crate::value::Tuple;

use super::stream::DeltaStream;
use super::types::{DeltaNotification, SubscriptionId};

/// Callback invoked with each notification.
pub type Callback = Box<dyn FnMut(&DeltaNotification) + Send + Sync>;

enum Sink {
    Callback(Callback),
    Channel {
        tx: Sender<DeltaNotification>,
        closed: Arc<AtomicBool>,
    },
}

impl Sink {
    fn is_closed(&self) -> bool {
        match self {
            Self::Callback(_) => false,
            Self::Channel { closed, .. } => closed.load(Ordering::Acquire),
        }
    }
}

struct Subscription {
    key: (String, String),
    sink: Sink,
}

/// Subscriptions and the baselines they are diffed against.
pub struct SubscriptionRegistry {
    subscriptions: BTreeMap<SubscriptionId, Subscription>,
    baselines: BTreeMap<(String, String), HashSet<Tuple>>,
    stream_capacity: usize,
    dropped: u64,
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("subscriptions", &self.subscriptions.len())
            .field("watched", &self.baselines.keys().collect::<Vec<_>>())
            .field("stream_capacity", &self.stream_capacity)
            .field("dropped", &self.dropped)
            .finish()
    }
}

impl SubscriptionRegistry {
    /// Create an empty registry whose streams buffer `stream_capacity`
    /// notifications each.
    #[must_use]
    pub fn new(stream_capacity: usize) -> Self {
        Self {
            subscriptions: BTreeMap::new(),
            baselines: BTreeMap::new(),
            stream_capacity: stream_capacity.max(1),
            dropped: 0,
        }
    }

    /// Register a callback. `rows` supplies the table's current contents when
    /// nobody watches it yet.
    pub fn subscribe(
        &mut self,
        policy: &str,
        table: &str,
        callback: Callback,
        rows: impl FnOnce() -> Vec<Tuple>,
    ) -> SubscriptionId {
        self.register(policy, table, Sink::Callback(callback), rows)
    }

    /// Register a bounded-channel subscriber.
    pub fn subscribe_stream(&mut self, policy: &str, table: &str, rows: impl FnOnce() -> Vec<Tuple>) -> DeltaStream {
        let (tx, rx) = bounded::<DeltaNotification>(self.stream_capacity);
        let closed = Arc::new(AtomicBool::new(false));
        let sink = Sink::Channel {
            tx,
            closed: Arc::clone(&closed),
        };
        let id = self.register(policy, table, sink, rows);
        DeltaStream::new(id, rx, closed)
    }

    fn register(&mut self, policy: &str, table: &str, sink: Sink, rows: impl FnOnce() -> Vec<Tuple>) -> SubscriptionId {
        let key = (policy.to_string(), table.to_string());
        self.baselines
            .entry(key.clone())
            .or_insert_with(|| rows().into_iter().collect());
        let id = SubscriptionId::new();
        self.subscriptions.insert(id, Subscription { key, sink });
        id
    }

    /// Remove a subscription. Returns false if unknown.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let Some(subscription) = self.subscriptions.remove(&id) else {
            return false;
        };
        self.forget_unwatched(&subscription.key);
        true
    }

    fn forget_unwatched(&mut self, key: &(String, String)) {
        if !self.subscriptions.values().any(|s| s.key == *key) {
            self.baselines.remove(key);
        }
    }

    /// Every watched `(policy, table)`.
    pub fn watched(&self) -> impl Iterator<Item = (&str, &str)> {
        self.baselines.keys().map(|(p, t)| (p.as_str(), t.as_str()))
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Notifications dropped because a stream was full.
    #[must_use]
    pub const fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Reset every baseline to the current contents without notifying.
    pub fn refresh(&mut self, rows: impl Fn(&str, &str) -> Vec<Tuple>) {
        for ((policy, table), baseline) in &mut self.baselines {
            *baseline = rows(policy, table).into_iter().collect();
        }
    }

    /// Diff every watched table against its baseline and notify.
    ///
    /// Returns the number of notifications delivered.
    pub fn dispatch(&mut self, sequence: u64, rows: impl Fn(&str, &str) -> Vec<Tuple>) -> usize {
        self.prune();

        let committed_at = Utc::now();
        let mut delivered = 0;
        let mut disconnected = Vec::new();
        for (key, baseline) in &mut self.baselines {
            let current: HashSet<Tuple> = rows(&key.0, &key.1).into_iter().collect();
            let mut added: Vec<Tuple> = current.difference(baseline).cloned().collect();
            let mut removed: Vec<Tuple> = baseline.difference(&current).cloned().collect();
            if added.is_empty() && removed.is_empty() {
                continue;
            }
            added.sort();
            removed.sort();
            *baseline = current;

            for (id, subscription) in self.subscriptions.iter_mut().filter(|(_, s)| s.key == *key) {
                let notification = DeltaNotification {
                    subscription_id: *id,
                    policy: key.0.clone(),
                    table: key.1.clone(),
                    added: added.clone(),
                    removed: removed.clone(),
                    sequence,
                    committed_at,
                };
                match &mut subscription.sink {
                    Sink::Callback(callback) => {
                        callback(&notification);
                        delivered += 1;
                    }
                    Sink::Channel { tx, .. } => match tx.try_send(notification) {
                        Ok(()) => delivered += 1,
                        Err(TrySendError::Full(_)) => {
                            self.dropped += 1;
                            warn!(subscription = %id, policy = %key.0, table = %key.1, "delta stream full, notification dropped");
                        }
                        Err(TrySendError::Disconnected(_)) => disconnected.push(*id),
                    },
                }
            }
        }

        for id in disconnected {
            self.unsubscribe(id);
        }
        delivered
    }

    fn prune(&mut self) {
        let closed: Vec<SubscriptionId> = self
            .subscriptions
            .iter()
            .filter(|(_, s)| s.sink.is_closed())
            .map(|(id, _)| *id)
            .collect();
        for id in closed {
            self.unsubscribe(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;

    use crate::value::tuple;

    #[test]
    fn test_dispatch_sends_net_delta_once() {
        let mut registry = SubscriptionRegistry::new(8);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        registry.subscribe(
            "nova",
            "server",
            Box::new(move |n: &DeltaNotification| sink.lock().unwrap().push(n.clone())),
            || vec![tuple([1])],
        );

        let delivered = registry.dispatch(1, |_, _| vec![tuple([1]), tuple([2])]);
        assert_eq!(delivered, 1);
        let delivered = registry.dispatch(2, |_, _| vec![tuple([1]), tuple([2])]);
        assert_eq!(delivered, 0);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].added, vec![tuple([2])]);
        assert!(seen[0].removed.is_empty());
        assert_eq!(seen[0].sequence, 1);
    }

    #[test]
    fn test_full_stream_counts_drops() {
        let mut registry = SubscriptionRegistry::new(1);
        let stream = registry.subscribe_stream("nova", "server", Vec::new);
        registry.dispatch(1, |_, _| vec![tuple([1])]);
        registry.dispatch(2, |_, _| vec![tuple([2])]);
        assert_eq!(registry.dropped(), 1);
        assert_eq!(stream.drain().len(), 1);
    }

    #[test]
    fn test_dropped_stream_is_pruned() {
        let mut registry = SubscriptionRegistry::new(4);
        let stream = registry.subscribe_stream("nova", "server", Vec::new);
        assert_eq!(registry.len(), 1);
        drop(stream);
        registry.dispatch(1, |_, _| vec![tuple([1])]);
        assert!(registry.is_empty());
        assert_eq!(registry.watched().count(), 0);
    }

    #[test]
    fn test_refresh_suppresses_notification() {
        let mut registry = SubscriptionRegistry::new(4);
        let stream = registry.subscribe_stream("nova", "server", Vec::new);
        registry.refresh(|_, _| vec![tuple([1])]);
        assert_eq!(registry.dispatch(1, |_, _| vec![tuple([1])]), 0);
        assert!(stream.try_recv().unwrap().is_none());
    }

    #[test]
    fn test_unsubscribe_forgets_baseline() {
        let mut registry = SubscriptionRegistry::new(4);
        let id = registry.subscribe("nova", "server", Box::new(|_: &DeltaNotification| {}), Vec::new);
        assert!(registry.unsubscribe(id));
        assert!(!registry.unsubscribe(id));
        assert_eq!(registry.watched().count(), 0);
    }
}
