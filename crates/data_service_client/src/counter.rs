//! src/counter.rs
//!
//! Process-wide iteration counters.
//!
//! Each dataset draws iterator indices from an [`IterationCounter`] so
//! that repeated iterations over a shared job get distinct job keys.
//! Counters live in a process-wide registry keyed by container and name,
//! with atomic lookup-or-insert. A dataset that created its counter also
//! deletes the registry entry when it is dropped; other datasets only
//! drop their reference.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use crate::error::{Result, Status};

/// Monotonic counter handing out iterator indices.
#[derive(Debug, Default)]
pub struct IterationCounter {
    next_index: AtomicI64,
}

impl IterationCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_and_increment(&self) -> i64 {
        self.next_index.fetch_add(1, Ordering::SeqCst)
    }
}

/// Registry key for an iteration counter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IterationCounterHandle {
    pub container: String,
    pub name: String,
}

impl IterationCounterHandle {
    pub fn new(container: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            name: name.into(),
        }
    }
}

const DEFAULT_CONTAINER: &str = "data_service";

static REGISTRY: OnceLock<Mutex<HashMap<IterationCounterHandle, Arc<IterationCounter>>>> =
    OnceLock::new();
static NEXT_RESOURCE_ID: AtomicI64 = AtomicI64::new(0);

fn registry() -> &'static Mutex<HashMap<IterationCounterHandle, Arc<IterationCounter>>> {
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Handle for a counter nobody else will look up by name.
pub fn anonymous_handle() -> IterationCounterHandle {
    let id = NEXT_RESOURCE_ID.fetch_add(1, Ordering::SeqCst);
    IterationCounterHandle::new(DEFAULT_CONTAINER, format!("iteration_counter_{id}"))
}

pub fn lookup(handle: &IterationCounterHandle) -> Option<Arc<IterationCounter>> {
    registry().lock().get(handle).cloned()
}

pub fn lookup_or_create(handle: &IterationCounterHandle) -> Arc<IterationCounter> {
    registry()
        .lock()
        .entry(handle.clone())
        .or_insert_with(|| Arc::new(IterationCounter::new()))
        .clone()
}

/// Removes the counter from the registry. Existing references stay valid.
pub fn delete(handle: &IterationCounterHandle) -> Result<()> {
    match registry().lock().remove(handle) {
        Some(_) => Ok(()),
        None => Err(Status::not_found(format!(
            "iteration counter {}/{} not found",
            handle.container, handle.name
        ))),
    }
}
