//! src/rpc/mod.rs
//!
//! Client-side interfaces to the data service control and data planes.
//!
//! The ingest engine talks to two kinds of servers:
//! - the **dispatcher**, which tracks jobs and assigns tasks
//!   ([`DispatcherClient`]);
//! - **workers**, which produce dataset elements for the tasks assigned
//!   to them ([`WorkerClient`]).
//!
//! Concrete transports (gRPC, in-process, test fakes) live outside this
//! crate and are plugged in through [`ClientFactory`]. Factory
//! constructors must not block: they build a client handle, they do not
//! dial the endpoint.

mod dispatcher;
mod worker;

pub use dispatcher::{DispatcherClient, JobKey, TaskInfo, TasksResponse};
pub use worker::{GetElementResponse, WorkerClient};

use std::sync::Arc;

use crate::error::{Result, Status};

/// How the dispatcher should process the dataset for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingMode {
    /// Every worker processes the full dataset each epoch.
    ParallelEpochs,
    /// The dataset is split across workers within a single epoch.
    DistributedEpoch,
}

impl ProcessingMode {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "parallel_epochs" => Ok(ProcessingMode::ParallelEpochs),
            "distributed_epoch" => Ok(ProcessingMode::DistributedEpoch),
            other => Err(Status::invalid_argument(format!(
                "unrecognized processing mode: {other}"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingMode::ParallelEpochs => "parallel_epochs",
            ProcessingMode::DistributedEpoch => "distributed_epoch",
        }
    }
}

/// Builds dispatcher and worker clients for a given endpoint.
pub trait ClientFactory: Send + Sync {
    fn new_dispatcher_client(
        &self,
        address: &str,
        protocol: &str,
    ) -> Result<Arc<dyn DispatcherClient>>;

    fn new_worker_client(&self, address: &str, protocol: &str) -> Result<Arc<dyn WorkerClient>>;
}
