//! src/rpc/dispatcher.rs
//!
//! Dispatcher-facing types and the client trait for the control plane.

use crate::error::Result;
use crate::rpc::ProcessingMode;

/// Identity of a shared job. Iterators created with the same key join the
/// same dispatcher job, enabling cooperative consumption.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobKey {
    pub job_name: String,
    /// Disambiguates repeated iterations over the same named job.
    pub job_name_index: i64,
}

/// One task advertised by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskInfo {
    pub task_id: i64,
    pub worker_address: String,
}

/// Response to a task-list poll.
#[derive(Debug, Clone, Default)]
pub struct TasksResponse {
    pub tasks: Vec<TaskInfo>,
    /// True once the dispatcher considers the job complete: no new tasks
    /// will be created and existing ones have been drained.
    pub job_finished: bool,
}

/// Client for the dispatcher's job-management RPCs.
///
/// Calls block the calling thread and must never be made while holding
/// iterator state locks.
pub trait DispatcherClient: Send + Sync {
    /// Registers this consumer with a job, creating the job if needed.
    /// Returns the job client id used by all later calls.
    fn get_or_create_job(
        &self,
        dataset_id: i64,
        processing_mode: ProcessingMode,
        job_key: Option<&JobKey>,
        num_consumers: Option<i64>,
    ) -> Result<i64>;

    /// Lists the tasks currently assigned to the job.
    fn get_tasks(&self, job_client_id: i64) -> Result<TasksResponse>;

    /// Releases the job client id. Idempotent on the dispatcher side.
    fn release_job_client(&self, job_client_id: i64) -> Result<()>;
}
