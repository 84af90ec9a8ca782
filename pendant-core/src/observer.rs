//! Subscriber registry for reassembler events.
//!
//! Subscribers are called in subscription order. A subscriber that returns an error or panics is
//! logged and skipped; the remaining subscribers still run and the registry stays usable.
//! Subscription ids come from one process-wide counter, so a token only ever matches the
//! registry that issued it. Ids are never reused.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::warn;

/// Error type subscriber callbacks may return.
pub type SubscriberError = Box<dyn std::error::Error + Send + Sync>;

type Callback<T> = Box<dyn FnMut(&T) -> Result<(), SubscriberError> + Send>;

static NEXT_SUBSCRIPTION: AtomicU64 = AtomicU64::new(1);

/// Token returned by [`Observers::subscribe`]; hand it back to unsubscribe.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct Subscription(u64);

impl Subscription {
    pub fn id(&self) -> u64 {
        self.0
    }
}

pub struct Observers<T> {
    name: &'static str,
    subscribers: Vec<(u64, Callback<T>)>,
}

impl<T> Observers<T> {
    /// `name` labels failure logs.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            subscribers: Vec::new(),
        }
    }

    pub fn subscribe<F>(&mut self, callback: F) -> Subscription
    where
        F: FnMut(&T) -> Result<(), SubscriberError> + Send + 'static,
    {
        let id = NEXT_SUBSCRIPTION.fetch_add(1, Ordering::Relaxed);
        self.subscribers.push((id, Box::new(callback)));
        Subscription(id)
    }

    /// Remove a subscriber. Returns false if it was already gone or belongs to another registry.
    pub fn unsubscribe(&mut self, subscription: Subscription) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(id, _)| *id != subscription.0);
        self.subscribers.len() != before
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    pub fn clear(&mut self) {
        self.subscribers.clear();
    }

    /// Deliver `event` to every subscriber. Returns how many failed.
    pub fn notify(&mut self, event: &T) -> usize {
        let mut failures = 0;
        for (id, callback) in &mut self.subscribers {
            match panic::catch_unwind(AssertUnwindSafe(|| callback(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    failures += 1;
                    warn!(registry = self.name, subscriber = *id, error = %e, "subscriber failed");
                }
                Err(_) => {
                    failures += 1;
                    warn!(registry = self.name, subscriber = *id, "subscriber panicked");
                }
            }
        }
        failures
    }
}

impl<T> std::fmt::Debug for Observers<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observers")
            .field("name", &self.name)
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}
