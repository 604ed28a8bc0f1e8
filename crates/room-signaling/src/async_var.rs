//! Single-slot rendezvous between a producer and queued consumers.
//!
//! `put` hands a value to the oldest waiting `take`, or buffers it when
//! nobody is waiting. A buffered value is replaced by a later `put`. The
//! waiter is registered when `take` is called, so the order of `take` calls
//! (not the order in which their futures are polled) decides who is served
//! first.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;

#[derive(Debug)]
struct Inner<T> {
    value: Option<T>,
    waiters: VecDeque<oneshot::Sender<T>>,
}

/// Rendezvous variable shared between one producer and any number of
/// consumers.
#[derive(Debug)]
pub struct AsyncVar<T> {
    inner: Mutex<Inner<T>>,
}

impl<T> Default for AsyncVar<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> AsyncVar<T> {
    /// Create an empty variable.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                value: None,
                waiters: VecDeque::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        // The critical sections never panic, so poisoning cannot leave the
        // queue half-updated.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store `value`, delivering it to the oldest live waiter if any.
    ///
    /// Waiters whose futures were dropped are skipped.
    pub fn put(&self, value: T) {
        let mut inner = self.lock();
        let mut value = value;
        while let Some(waiter) = inner.waiters.pop_front() {
            match waiter.send(value) {
                Ok(()) => return,
                Err(returned) => value = returned,
            }
        }
        inner.value = Some(value);
    }

    /// Number of queued waiters, including ones whose futures were dropped
    /// but not yet skipped.
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.lock().waiters.len()
    }

    /// Whether a value is buffered.
    #[must_use]
    pub fn has_value(&self) -> bool {
        self.lock().value.is_some()
    }
}

impl<T: Send + 'static> AsyncVar<T> {
    /// Take the next value.
    ///
    /// Resolves immediately with the buffered value when no older waiter
    /// exists; otherwise joins the queue. Resolves to `None` only if the
    /// variable is dropped while waiting.
    pub fn take(&self) -> impl Future<Output = Option<T>> + Send + 'static {
        let (ready, pending) = {
            let mut inner = self.lock();
            inner.waiters.retain(|waiter| !waiter.is_closed());
            if inner.waiters.is_empty() && inner.value.is_some() {
                (inner.value.take(), None)
            } else {
                let (tx, rx) = oneshot::channel();
                inner.waiters.push_back(tx);
                (None, Some(rx))
            }
        };

        async move {
            match pending {
                Some(rx) => rx.await.ok(),
                None => ready,
            }
        }
    }
}
