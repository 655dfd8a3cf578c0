//! Observable value with one-shot predicate waiters
//!
//! An [`Observable`] holds a single value that can be read without blocking,
//! overwritten, and waited on. Waiting registers a one-shot waiter keyed by a
//! predicate; every change evaluates the pending waiters in registration
//! order, resolves the ones whose predicate holds, and removes them. A waiter
//! whose future was dropped is pruned on the next change.
//!
//! The same primitive backs the session's [`ConnectionState`](super::ConnectionState)
//! and the native connection/gathering states exposed by a
//! [`NativePeerConnection`](crate::peer::NativePeerConnection).

use crate::{Error, Result};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot};

/// Capacity of the change-notification channel
const CHANGE_CHANNEL_CAPACITY: usize = 64;

type Predicate<T> = Box<dyn Fn(&T) -> bool + Send>;

struct Waiter<T> {
    predicate: Predicate<T>,
    tx: oneshot::Sender<T>,
}

struct Slot<T> {
    value: T,
    waiters: Vec<Waiter<T>>,
}

struct Shared<T> {
    slot: Mutex<Slot<T>>,
    changes: broadcast::Sender<T>,
}

/// Shared, cloneable observable value
///
/// Clones refer to the same underlying value.
pub struct Observable<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self.shared.slot.lock();
        f.debug_struct("Observable")
            .field("value", &slot.value)
            .field("waiters", &slot.waiters.len())
            .finish()
    }
}

impl<T> Observable<T>
where
    T: Clone + PartialEq + Send + 'static,
{
    /// Create an observable holding `initial`
    pub fn new(initial: T) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                slot: Mutex::new(Slot {
                    value: initial,
                    waiters: Vec::new(),
                }),
                changes,
            }),
        }
    }

    /// Current value, never blocks
    pub fn get(&self) -> T {
        self.shared.slot.lock().value.clone()
    }

    /// Unconditionally overwrite the value
    ///
    /// Returns the previous value. Waiters and subscribers are only notified
    /// when the value actually changes.
    pub fn set(&self, value: T) -> T {
        let mut slot = self.shared.slot.lock();
        self.replace_locked(&mut slot, value)
    }

    /// Overwrite the value only if `expected` holds for the current one
    ///
    /// Returns `Ok(previous)` when the swap happened and `Err(current)`
    /// otherwise. The check and the write happen under one lock, so two
    /// callers woken by the same change cannot both win.
    pub fn compare_and_set<F>(&self, expected: F, value: T) -> std::result::Result<T, T>
    where
        F: FnOnce(&T) -> bool,
    {
        let mut slot = self.shared.slot.lock();
        if !expected(&slot.value) {
            return Err(slot.value.clone());
        }
        Ok(self.replace_locked(&mut slot, value))
    }

    /// Wait until `predicate` holds
    ///
    /// Resolves immediately if it already holds for the current value.
    /// Otherwise registers a one-shot waiter that resolves with the first
    /// value satisfying the predicate and is then deregistered.
    pub async fn wait_until<F>(&self, predicate: F) -> Result<T>
    where
        F: Fn(&T) -> bool + Send + 'static,
    {
        let rx = {
            let mut slot = self.shared.slot.lock();
            if predicate(&slot.value) {
                return Ok(slot.value.clone());
            }
            let (tx, rx) = oneshot::channel();
            slot.waiters.push(Waiter {
                predicate: Box::new(predicate),
                tx,
            });
            rx
        };

        rx.await
            .map_err(|_| Error::StateChannelClosed("observable dropped with pending waiter".into()))
    }

    /// Subscribe to every change of the value
    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        self.shared.changes.subscribe()
    }

    /// Number of waiters still registered (dropped waiters included until
    /// the next change prunes them)
    pub fn pending_waiters(&self) -> usize {
        self.shared.slot.lock().waiters.len()
    }

    fn replace_locked(&self, slot: &mut Slot<T>, value: T) -> T {
        let previous = std::mem::replace(&mut slot.value, value);
        if previous == slot.value {
            return previous;
        }

        let current = slot.value.clone();
        let waiters = std::mem::take(&mut slot.waiters);
        for waiter in waiters {
            if waiter.tx.is_closed() {
                continue;
            }
            if (waiter.predicate)(&current) {
                let _ = waiter.tx.send(current.clone());
            } else {
                slot.waiters.push(waiter);
            }
        }

        // No receivers is fine
        let _ = self.shared.changes.send(current);
        previous
    }
}
