//! src/rpc/worker.rs
//!
//! Worker-facing types and the client trait for the data plane.

use crate::element::CompressedElement;
use crate::error::Result;

/// Response to a `get_element` call.
#[derive(Debug, Clone, Default)]
pub struct GetElementResponse {
    /// The fetched element. Absent when `end_of_sequence` is set.
    pub compressed: Option<CompressedElement>,
    pub end_of_sequence: bool,
}

/// Client for fetching elements from a single data service worker.
pub trait WorkerClient: Send + Sync {
    /// Fetches the next element of `task_id`.
    ///
    /// `consumer_index` and `round_index` are only passed for strict
    /// round-robin reads, where the worker hands each consumer exactly
    /// one element per round.
    fn get_element(
        &self,
        task_id: i64,
        consumer_index: Option<i64>,
        round_index: Option<i64>,
    ) -> Result<GetElementResponse>;
}
