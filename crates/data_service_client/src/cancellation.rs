//! src/cancellation.rs
//!
//! Cooperative cancellation for iterators.
//!
//! A [`CancellationManager`] fans a single cancel signal out to
//! registered callbacks. Cancellation is one-way and idempotent: once
//! started it cannot be undone, and callbacks registered afterwards run
//! immediately on the registering thread.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

type Callback = Box<dyn Fn() + Send>;

#[derive(Default)]
struct Inner {
    // `cancelled` is only written while `callbacks` is locked, so a
    // registration can never race past a concurrent cancel.
    cancelled: AtomicBool,
    callbacks: Mutex<HashMap<u64, Callback>>,
    next_id: AtomicU64,
}

/// Fans a cancel signal out to registered callbacks.
#[derive(Clone, Default)]
pub struct CancellationManager {
    inner: Arc<Inner>,
}

impl CancellationManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Starts cancellation and runs every registered callback. Later
    /// calls are no-ops.
    pub fn start_cancel(&self) {
        let callbacks: Vec<Callback> = {
            let mut callbacks = self.inner.callbacks.lock();
            if self.inner.cancelled.swap(true, Ordering::AcqRel) {
                return;
            }
            callbacks.drain().map(|(_, cb)| cb).collect()
        };
        for callback in callbacks {
            callback();
        }
    }

    /// Registers `callback` to run on cancellation and returns a guard
    /// that deregisters it when dropped. If cancellation has already
    /// started, the callback runs immediately.
    pub fn register_callback(
        &self,
        callback: impl Fn() + Send + 'static,
    ) -> CancellationRegistration {
        {
            let mut callbacks = self.inner.callbacks.lock();
            if !self.inner.cancelled.load(Ordering::Acquire) {
                let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
                callbacks.insert(id, Box::new(callback));
                return CancellationRegistration {
                    inner: Arc::downgrade(&self.inner),
                    id: Some(id),
                };
            }
        }
        callback();
        CancellationRegistration {
            inner: Weak::new(),
            id: None,
        }
    }
}

/// Deregisters its callback when dropped.
pub struct CancellationRegistration {
    inner: Weak<Inner>,
    id: Option<u64>,
}

impl Drop for CancellationRegistration {
    fn drop(&mut self) {
        if let (Some(id), Some(inner)) = (self.id, self.inner.upgrade()) {
            inner.callbacks.lock().remove(&id);
        }
    }
}
