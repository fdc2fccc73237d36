//! src/client/config.rs
//!
//! Configuration for the data service client.
//!
//! `DataServiceConfig` carries the attributes a dataset node declares:
//! the dispatcher endpoint, the job identity, the read discipline, and
//! the memory budget.
//!
//! Example:
//! ```ignore
//! let config = DataServiceConfig::builder()
//!     .dataset_id(42)
//!     .address("dispatcher.example:5050")
//!     .protocol("grpc")
//!     .job_name("train")
//!     .max_outstanding_requests(8)
//!     .build()?;
//! ```
//!
//! Two operator versions exist: v1 predates cooperative consumption and
//! rejects the consumer attributes; v2 accepts `consumer_index` and
//! `num_consumers`, and having both switches reads to strict round-robin.

use crate::counter::IterationCounterHandle;
use crate::element::{DataType, PartialShape};
use crate::error::{Result, Status};
use crate::rpc::ProcessingMode;

/// Sentinel meaning "pick the value at runtime".
pub const AUTOTUNE: i64 = -1;

/// Default interval between task list refreshes.
const DEFAULT_TASK_REFRESH_INTERVAL_MS: i64 = 1000;

const OP_NAME_V1: &str = "DataServiceDataset";
const OP_NAME_V2: &str = "DataServiceDatasetV2";

/// Version of the dataset operator the config was built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpVersion {
    V1,
    V2,
}

impl OpVersion {
    pub fn from_op_name(name: &str) -> Result<Self> {
        match name {
            OP_NAME_V1 => Ok(OpVersion::V1),
            OP_NAME_V2 => Ok(OpVersion::V2),
            other => Err(Status::failed_precondition(format!(
                "unrecognized data service dataset op name: {other}"
            ))),
        }
    }
}

/// Validated configuration for a data service dataset.
#[derive(Debug, Clone)]
pub struct DataServiceConfig {
    pub dataset_id: i64,
    pub processing_mode: ProcessingMode,
    /// Dispatcher endpoint.
    pub address: String,
    pub protocol: String,
    /// Empty means an anonymous (unshared) job.
    pub job_name: String,
    pub consumer_index: Option<i64>,
    pub num_consumers: Option<i64>,
    /// Bound on elements held in memory, or [`AUTOTUNE`].
    pub max_outstanding_requests: i64,
    pub task_refresh_interval_ms: i64,
    /// Counter to draw iterator indices from; created lazily if absent.
    pub iteration_counter: Option<IterationCounterHandle>,
    pub output_types: Vec<DataType>,
    pub output_shapes: Vec<PartialShape>,
    pub op_version: OpVersion,
}

impl DataServiceConfig {
    pub fn builder() -> DataServiceConfigBuilder {
        DataServiceConfigBuilder::default()
    }

    /// Whether reads follow the strict round-robin discipline.
    pub fn strict_round_robin(&self) -> bool {
        self.num_consumers.is_some()
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.address.is_empty() {
            return Err(Status::invalid_argument("address must be non-empty"));
        }
        if self.protocol.is_empty() {
            return Err(Status::invalid_argument("protocol must be non-empty"));
        }
        if self.max_outstanding_requests != AUTOTUNE && self.max_outstanding_requests <= 0 {
            return Err(Status::invalid_argument(format!(
                "max_outstanding_requests must be positive or {AUTOTUNE} (autotune)"
            )));
        }
        if self.op_version == OpVersion::V1
            && (self.consumer_index.is_some() || self.num_consumers.is_some())
        {
            return Err(Status::invalid_argument(
                "consumer_index and num_consumers require the v2 dataset op",
            ));
        }
        if self.consumer_index.is_some() != self.num_consumers.is_some() {
            return Err(Status::invalid_argument(
                "consumer_index and num_consumers must be specified together",
            ));
        }
        Ok(())
    }
}

/// Builder for [`DataServiceConfig`] with method chaining.
pub struct DataServiceConfigBuilder {
    config: DataServiceConfig,
}

impl Default for DataServiceConfigBuilder {
    fn default() -> Self {
        Self {
            config: DataServiceConfig {
                dataset_id: 0,
                processing_mode: ProcessingMode::ParallelEpochs,
                address: String::new(),
                protocol: String::new(),
                job_name: String::new(),
                consumer_index: None,
                num_consumers: None,
                max_outstanding_requests: AUTOTUNE,
                task_refresh_interval_ms: AUTOTUNE,
                iteration_counter: None,
                output_types: Vec::new(),
                output_shapes: Vec::new(),
                op_version: OpVersion::V2,
            },
        }
    }
}

impl DataServiceConfigBuilder {
    pub fn dataset_id(mut self, id: i64) -> Self {
        self.config.dataset_id = id;
        self
    }

    pub fn processing_mode(mut self, mode: ProcessingMode) -> Self {
        self.config.processing_mode = mode;
        self
    }

    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.config.address = address.into();
        self
    }

    pub fn protocol(mut self, protocol: impl Into<String>) -> Self {
        self.config.protocol = protocol.into();
        self
    }

    /// Set the shared job name. Empty means anonymous.
    pub fn job_name(mut self, name: impl Into<String>) -> Self {
        self.config.job_name = name.into();
        self
    }

    /// Set this consumer's index for round-robin reads.
    /// Negative values mean "absent", matching the wire encoding.
    pub fn consumer_index(mut self, index: i64) -> Self {
        self.config.consumer_index = (index >= 0).then_some(index);
        self
    }

    /// Set the number of cooperating consumers for round-robin reads.
    /// Negative values mean "absent", matching the wire encoding.
    pub fn num_consumers(mut self, count: i64) -> Self {
        self.config.num_consumers = (count >= 0).then_some(count);
        self
    }

    pub fn max_outstanding_requests(mut self, budget: i64) -> Self {
        self.config.max_outstanding_requests = budget;
        self
    }

    pub fn task_refresh_interval_ms(mut self, interval_ms: i64) -> Self {
        self.config.task_refresh_interval_ms = interval_ms;
        self
    }

    pub fn iteration_counter(mut self, handle: IterationCounterHandle) -> Self {
        self.config.iteration_counter = Some(handle);
        self
    }

    pub fn output_types(mut self, types: Vec<DataType>) -> Self {
        self.config.output_types = types;
        self
    }

    pub fn output_shapes(mut self, shapes: Vec<PartialShape>) -> Self {
        self.config.output_shapes = shapes;
        self
    }

    pub fn op_version(mut self, version: OpVersion) -> Self {
        self.config.op_version = version;
        self
    }

    /// Validates and builds the final configuration.
    pub fn build(mut self) -> Result<DataServiceConfig> {
        if self.config.task_refresh_interval_ms == AUTOTUNE {
            self.config.task_refresh_interval_ms = DEFAULT_TASK_REFRESH_INTERVAL_MS;
        }
        self.config.validate()?;
        Ok(self.config)
    }
}
