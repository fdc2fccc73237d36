//! src/client/iterator.rs
//!
//! The dataset handle and its consuming iterator.
//!
//! `DataServiceDataset` holds the validated config and the iteration
//! counter; `DataServiceIterator` owns the threaded machinery: a task
//! manager polling the dispatcher and a pool of fetcher threads filling
//! the results queue. `get_next` blocks until the next result is ready,
//! the job drains, an error turns sticky, or the iterator is cancelled.

use std::sync::Arc;
use std::thread;

use crate::cancellation::{CancellationManager, CancellationRegistration};
use crate::client::backoff::{self, BackoffPolicy};
use crate::client::config::DataServiceConfig;
use crate::client::{manager, state::JobContext, state::SharedState};
use crate::counter::{self, IterationCounter, IterationCounterHandle};
use crate::element::{DataType, OpaqueTensor, PartialShape};
use crate::error::{Result, Status};
use crate::rpc::{ClientFactory, JobKey};

/// A dataset served by the data service.
///
/// Cheap to clone an iterator from; the expensive machinery only starts
/// once an iterator is initialized and consumed.
pub struct DataServiceDataset {
    config: DataServiceConfig,
    factory: Arc<dyn ClientFactory>,
    counter: Arc<IterationCounter>,
    counter_handle: IterationCounterHandle,
    owns_counter: bool,
}

impl DataServiceDataset {
    /// Validates `config` and resolves the iteration counter, creating
    /// one when the configured handle is absent or dangling.
    pub fn new(config: DataServiceConfig, factory: Arc<dyn ClientFactory>) -> Result<Self> {
        config.validate()?;
        let (counter_handle, counter, owns_counter) = match config
            .iteration_counter
            .as_ref()
            .and_then(|handle| counter::lookup(handle).map(|c| (handle.clone(), c)))
        {
            Some((handle, counter)) => (handle, counter, false),
            None => {
                let handle = counter::anonymous_handle();
                let counter = counter::lookup_or_create(&handle);
                (handle, counter, true)
            }
        };
        Ok(Self {
            config,
            factory,
            counter,
            counter_handle,
            owns_counter,
        })
    }

    /// Creates a fresh iterator over the dataset. Each iterator draws its
    /// own index from the iteration counter, so repeated iterations over
    /// a named job form distinct job keys.
    pub fn iterator(&self) -> DataServiceIterator {
        DataServiceIterator::new(
            self.config.clone(),
            self.factory.clone(),
            self.counter.get_and_increment(),
        )
    }

    pub fn output_types(&self) -> &[DataType] {
        &self.config.output_types
    }

    pub fn output_shapes(&self) -> &[PartialShape] {
        &self.config.output_shapes
    }

    /// Graph serializers call this before attempting to serialize the
    /// dataset node.
    pub fn check_external_state(&self) -> Result<()> {
        Err(Status::failed_precondition(
            "data service dataset does not yet support serialization",
        ))
    }
}

impl Drop for DataServiceDataset {
    fn drop(&mut self) {
        if self.owns_counter {
            if let Err(status) = counter::delete(&self.counter_handle) {
                tracing::warn!(error = %status, "failed to delete iteration counter resource");
            }
        }
    }
}

/// Live task and budget counts, for monitoring.
#[derive(Debug, Clone)]
pub struct Progress {
    /// Tasks not yet at end of sequence, or `None` if the state lock was
    /// contended at sampling time.
    pub active_tasks: Option<usize>,
    pub max_outstanding_requests: Option<i64>,
    pub job_name: String,
}

/// Streams elements of one job from the worker fleet.
pub struct DataServiceIterator {
    config: DataServiceConfig,
    factory: Arc<dyn ClientFactory>,
    iterator_index: i64,
    shared: Arc<SharedState>,
    ctx: Option<Arc<JobContext>>,
    manager_thread: Option<thread::JoinHandle<()>>,
    registration: Option<CancellationRegistration>,
    initialized: bool,
}

impl DataServiceIterator {
    fn new(config: DataServiceConfig, factory: Arc<dyn ClientFactory>, iterator_index: i64) -> Self {
        let shared = SharedState::new(config.max_outstanding_requests);
        Self {
            config,
            factory,
            iterator_index,
            shared,
            ctx: None,
            manager_thread: None,
            registration: None,
            initialized: false,
        }
    }

    /// Registers the iterator with the dispatcher.
    ///
    /// A cancellation callback is installed first so the iterator can be
    /// torn down from the outside at any point. Job registration retries
    /// transient dispatcher errors without a deadline and only fails on
    /// terminal ones.
    pub fn initialize(&mut self, cancellation: &CancellationManager) -> Result<()> {
        let shared = self.shared.clone();
        self.registration = Some(cancellation.register_callback(move || shared.cancel()));

        tracing::debug!(address = %self.config.address, "connecting to dispatcher");
        let dispatcher = self
            .factory
            .new_dispatcher_client(&self.config.address, &self.config.protocol)?;
        let job_key = (!self.config.job_name.is_empty()).then(|| JobKey {
            job_name: self.config.job_name.clone(),
            job_name_index: self.iterator_index,
        });
        let backoff = BackoffPolicy::default();
        let description = format!("get or create job with dispatcher at {}", self.config.address);
        let job_client_id = backoff::retry_transient(&backoff, &description, || {
            dispatcher.get_or_create_job(
                self.config.dataset_id,
                self.config.processing_mode,
                job_key.as_ref(),
                self.config.num_consumers,
            )
        })?;

        self.ctx = Some(Arc::new(JobContext {
            shared: self.shared.clone(),
            config: self.config.clone(),
            dispatcher,
            factory: self.factory.clone(),
            job_client_id,
            backoff,
        }));
        self.initialized = true;
        tracing::debug!(job_client_id, "created data service job");
        Ok(())
    }

    /// Returns the next element, or `None` once the job has drained.
    ///
    /// Elements come back in the order their results entered the queue:
    /// completion order for non-deterministic reads, per-round task order
    /// for strict round-robin reads.
    pub fn get_next(&mut self) -> Result<Option<Vec<OpaqueTensor>>> {
        let ctx = self
            .ctx
            .as_ref()
            .ok_or_else(|| Status::failed_precondition("iterator has not been initialized"))?
            .clone();

        let mut state = self.shared.state.lock();
        if self.manager_thread.is_none() && !state.cancelled {
            let manager_ctx = ctx.clone();
            let handle = thread::Builder::new()
                .name("task-thread-manager".to_string())
                .spawn(move || manager::run(manager_ctx))
                .map_err(|e| {
                    Status::internal(format!("failed to spawn task manager thread: {e}"))
                })?;
            self.manager_thread = Some(handle);
        }

        loop {
            let front_ready = state.results.front().map_or(false, |slot| slot.ready);
            if front_ready
                || (state.job_finished && state.num_running_worker_threads == 0)
                || state.cancelled
                || state.status.is_some()
            {
                break;
            }
            self.shared.get_next_cv.wait(&mut state);
        }

        if state.cancelled {
            return Err(Status::cancelled("data service iterator was cancelled"));
        }
        if let Some(status) = &state.status {
            return Err(status.clone());
        }
        let Some(slot) = state.results.pop_front() else {
            // Job finished and every fetcher drained: end of sequence.
            return Ok(None);
        };
        // A slot opened; let a fetcher claim it.
        self.shared.worker_cv.notify_one();
        if slot.end_of_sequence {
            Ok(None)
        } else {
            Ok(Some(slot.element))
        }
    }

    /// Checkpointing the iterator is not supported.
    pub fn save(&self) -> Result<()> {
        Err(Status::unimplemented("save is not yet supported"))
    }

    /// Restoring the iterator is not supported.
    pub fn restore(&self) -> Result<()> {
        Err(Status::unimplemented("restore is not yet supported"))
    }

    /// Samples live progress without blocking on the state lock.
    pub fn progress(&self) -> Progress {
        match self.shared.state.try_lock() {
            Some(state) => Progress {
                active_tasks: Some(state.tasks.len().saturating_sub(state.finished_tasks)),
                max_outstanding_requests: Some(state.max_outstanding_requests),
                job_name: self.config.job_name.clone(),
            },
            None => Progress {
                active_tasks: None,
                max_outstanding_requests: None,
                job_name: self.config.job_name.clone(),
            },
        }
    }
}

impl Drop for DataServiceIterator {
    fn drop(&mut self) {
        tracing::debug!("destroying data service iterator");
        self.shared.cancel();
        // Deregister before tearing down so the callback cannot fire
        // against a half-dead iterator.
        self.registration.take();
        if let Some(handle) = self.manager_thread.take() {
            let _ = handle.join();
        }
        let workers = {
            let mut state = self.shared.state.lock();
            std::mem::take(&mut state.worker_threads)
        };
        for handle in workers {
            let _ = handle.join();
        }
        if self.initialized {
            if let Some(ctx) = &self.ctx {
                if let Err(status) = ctx.dispatcher.release_job_client(ctx.job_client_id) {
                    tracing::warn!(
                        job_client_id = ctx.job_client_id,
                        error = %status,
                        "failed to release job client id"
                    );
                }
            }
        }
    }
}

impl Iterator for DataServiceIterator {
    type Item = Result<Vec<OpaqueTensor>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.get_next().transpose()
    }
}
