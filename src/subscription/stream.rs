use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};

use crate::error::{ExecutionError, GuardError, GuardResult};

use super::types::{DeltaNotification, SubscriptionId};

/// A subscription stream of table deltas.
///
/// Dropping this stream unregisters it; the registry prunes it on the next
/// committed batch.
#[derive(Debug)]
pub struct DeltaStream {
    subscription_id: SubscriptionId,
    rx: Receiver<DeltaNotification>,
    closed: Arc<AtomicBool>,
}

impl DeltaStream {
    pub(crate) fn new(subscription_id: SubscriptionId, rx: Receiver<DeltaNotification>, closed: Arc<AtomicBool>) -> Self {
        Self {
            subscription_id,
            rx,
            closed,
        }
    }

    /// The subscription id backing this stream.
    #[must_use]
    pub const fn subscription_id(&self) -> SubscriptionId {
        self.subscription_id
    }

    /// Stop receiving new notifications. Idempotent.
    ///
    /// Notifications already queued can still be received.
    pub fn unsubscribe(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Receive the next notification (blocking).
    pub fn recv(&self) -> GuardResult<DeltaNotification> {
        self.rx.recv().map_err(|_| disconnected())
    }

    /// Receive the next notification with a timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> GuardResult<DeltaNotification> {
        self.rx.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => GuardError::Execution(ExecutionError::Timeout {
                duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
            RecvTimeoutError::Disconnected => disconnected(),
        })
    }

    /// Receive a queued notification without blocking.
    pub fn try_recv(&self) -> GuardResult<Option<DeltaNotification>> {
        match self.rx.try_recv() {
            Ok(notification) => Ok(Some(notification)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(disconnected()),
        }
    }

    /// Drain every queued notification.
    pub fn drain(&self) -> Vec<DeltaNotification> {
        self.rx.try_iter().collect()
    }
}

impl Drop for DeltaStream {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::Release);
    }
}

fn disconnected() -> GuardError {
    GuardError::Execution(ExecutionError::Disconnected {
        path: "delta_stream".to_string(),
    })
}
