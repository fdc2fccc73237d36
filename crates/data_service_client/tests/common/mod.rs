#![allow(dead_code)]

//! Scriptable fakes for the dispatcher and worker RPC interfaces.

use anyhow::{Context, Result};
use crossbeam_channel::Receiver;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use data_service_client::client::{DataServiceConfig, DataServiceConfigBuilder};
use data_service_client::element::CompressedElement;
use data_service_client::error::Status;
use data_service_client::rpc::{
    ClientFactory, DispatcherClient, GetElementResponse, JobKey, ProcessingMode, TaskInfo,
    TasksResponse, WorkerClient,
};
use data_service_client::DataServiceIterator;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Config preset with a fast poll interval so tests converge quickly.
pub fn test_config() -> DataServiceConfigBuilder {
    DataServiceConfig::builder()
        .dataset_id(1)
        .address("dispatcher.test:5050")
        .protocol("grpc")
        .task_refresh_interval_ms(20)
        .max_outstanding_requests(2)
}

pub fn task_info(task_id: i64, worker_address: &str) -> TaskInfo {
    TaskInfo {
        task_id,
        worker_address: worker_address.to_string(),
    }
}

pub fn payload(tag: &str) -> Vec<u8> {
    tag.as_bytes().to_vec()
}

/// Pulls the next element and unwraps it down to the payload bytes.
pub fn next_payload(iterator: &mut DataServiceIterator) -> Result<Option<Vec<u8>>> {
    match iterator.get_next()? {
        Some(tensors) => {
            let tensor = tensors
                .into_iter()
                .next()
                .context("element had no tensors")?;
            Ok(Some(tensor.into_compressed().data))
        }
        None => Ok(None),
    }
}

pub fn collect_payloads(iterator: &mut DataServiceIterator, count: usize) -> Result<Vec<Vec<u8>>> {
    let mut payloads = Vec::with_capacity(count);
    for i in 0..count {
        let p = next_payload(iterator)?
            .with_context(|| format!("stream ended early at element {i}"))?;
        payloads.push(p);
    }
    Ok(payloads)
}

// ============================================================================
// Fake dispatcher
// ============================================================================

#[derive(Default)]
struct DispatcherInner {
    next_job_id: i64,
    jobs_by_key: HashMap<(String, i64), i64>,
    tasks: Vec<TaskInfo>,
    job_finished: bool,
    released: Vec<i64>,
    release_calls: usize,
    get_or_create_calls: usize,
    get_or_create_failures: VecDeque<Status>,
    get_tasks_failures: VecDeque<Status>,
    release_failures: VecDeque<Status>,
}

/// In-memory dispatcher with injectable failures.
#[derive(Default)]
pub struct FakeDispatcher {
    inner: Mutex<DispatcherInner>,
}

impl FakeDispatcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_tasks(&self, tasks: Vec<TaskInfo>) {
        self.inner.lock().unwrap().tasks = tasks;
    }

    pub fn set_job_finished(&self, finished: bool) {
        self.inner.lock().unwrap().job_finished = finished;
    }

    pub fn fail_next_get_or_create(&self, status: Status) {
        self.inner
            .lock()
            .unwrap()
            .get_or_create_failures
            .push_back(status);
    }

    pub fn fail_next_get_tasks(&self, status: Status) {
        self.inner
            .lock()
            .unwrap()
            .get_tasks_failures
            .push_back(status);
    }

    pub fn fail_next_release(&self, status: Status) {
        self.inner.lock().unwrap().release_failures.push_back(status);
    }

    pub fn released(&self) -> Vec<i64> {
        self.inner.lock().unwrap().released.clone()
    }

    pub fn release_calls(&self) -> usize {
        self.inner.lock().unwrap().release_calls
    }

    pub fn get_or_create_calls(&self) -> usize {
        self.inner.lock().unwrap().get_or_create_calls
    }
}

impl DispatcherClient for FakeDispatcher {
    fn get_or_create_job(
        &self,
        _dataset_id: i64,
        _processing_mode: ProcessingMode,
        job_key: Option<&JobKey>,
        _num_consumers: Option<i64>,
    ) -> Result<i64, Status> {
        let mut inner = self.inner.lock().unwrap();
        inner.get_or_create_calls += 1;
        if let Some(status) = inner.get_or_create_failures.pop_front() {
            return Err(status);
        }
        inner.next_job_id += 1;
        let fresh = inner.next_job_id;
        let id = match job_key {
            Some(key) => *inner
                .jobs_by_key
                .entry((key.job_name.clone(), key.job_name_index))
                .or_insert(fresh),
            None => fresh,
        };
        Ok(id)
    }

    fn get_tasks(&self, _job_client_id: i64) -> Result<TasksResponse, Status> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(status) = inner.get_tasks_failures.pop_front() {
            return Err(status);
        }
        Ok(TasksResponse {
            tasks: inner.tasks.clone(),
            job_finished: inner.job_finished,
        })
    }

    fn release_job_client(&self, job_client_id: i64) -> Result<(), Status> {
        let mut inner = self.inner.lock().unwrap();
        inner.release_calls += 1;
        if let Some(status) = inner.release_failures.pop_front() {
            return Err(status);
        }
        inner.released.push(job_client_id);
        Ok(())
    }
}

// ============================================================================
// Fake worker
// ============================================================================

/// One scripted reply of a fake worker.
pub enum Reply {
    Element(Vec<u8>),
    EndOfSequence,
    Fail(Status),
    /// Park the call until the channel is closed or written to, then
    /// report end of sequence. Used to pin fetchers mid-RPC.
    Block(Receiver<()>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub task_id: i64,
    pub consumer_index: Option<i64>,
    pub round_index: Option<i64>,
}

/// Worker that serves scripted replies per task. An exhausted script
/// reports end of sequence.
#[derive(Default)]
pub struct FakeWorker {
    scripts: Mutex<HashMap<i64, VecDeque<Reply>>>,
    calls: Mutex<Vec<RecordedCall>>,
    delay: Option<Duration>,
}

impl FakeWorker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay: Some(delay),
            ..Self::default()
        })
    }

    pub fn script(&self, task_id: i64, replies: Vec<Reply>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(task_id)
            .or_default()
            .extend(replies);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for_task(&self, task_id: i64) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.task_id == task_id)
            .collect()
    }
}

impl WorkerClient for FakeWorker {
    fn get_element(
        &self,
        task_id: i64,
        consumer_index: Option<i64>,
        round_index: Option<i64>,
    ) -> Result<GetElementResponse, Status> {
        if let Some(delay) = self.delay {
            thread::sleep(delay);
        }
        self.calls.lock().unwrap().push(RecordedCall {
            task_id,
            consumer_index,
            round_index,
        });
        let reply = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&task_id)
            .and_then(|script| script.pop_front());
        match reply {
            Some(Reply::Element(data)) => Ok(GetElementResponse {
                compressed: Some(CompressedElement::new(data)),
                end_of_sequence: false,
            }),
            Some(Reply::Fail(status)) => Err(status),
            Some(Reply::Block(release)) => {
                let _ = release.recv_timeout(Duration::from_secs(10));
                Ok(GetElementResponse {
                    compressed: None,
                    end_of_sequence: true,
                })
            }
            Some(Reply::EndOfSequence) | None => Ok(GetElementResponse {
                compressed: None,
                end_of_sequence: true,
            }),
        }
    }
}

// ============================================================================
// Fake factory
// ============================================================================

/// Routes client construction to registered fakes.
pub struct FakeFactory {
    pub dispatcher: Arc<FakeDispatcher>,
    workers: Mutex<HashMap<String, Arc<FakeWorker>>>,
    failing_workers: Mutex<HashSet<String>>,
}

impl FakeFactory {
    pub fn new(dispatcher: Arc<FakeDispatcher>) -> Arc<Self> {
        Arc::new(Self {
            dispatcher,
            workers: Mutex::new(HashMap::new()),
            failing_workers: Mutex::new(HashSet::new()),
        })
    }

    pub fn add_worker(&self, address: &str, worker: Arc<FakeWorker>) {
        self.workers
            .lock()
            .unwrap()
            .insert(address.to_string(), worker);
    }

    /// Make worker-client construction fail for `address`.
    pub fn fail_worker(&self, address: &str) {
        self.failing_workers
            .lock()
            .unwrap()
            .insert(address.to_string());
    }
}

impl ClientFactory for FakeFactory {
    fn new_dispatcher_client(
        &self,
        _address: &str,
        _protocol: &str,
    ) -> Result<Arc<dyn DispatcherClient>, Status> {
        Ok(self.dispatcher.clone())
    }

    fn new_worker_client(
        &self,
        address: &str,
        _protocol: &str,
    ) -> Result<Arc<dyn WorkerClient>, Status> {
        if self.failing_workers.lock().unwrap().contains(address) {
            return Err(Status::unavailable(format!(
                "cannot reach worker {address}"
            )));
        }
        self.workers
            .lock()
            .unwrap()
            .get(address)
            .cloned()
            .map(|worker| worker as Arc<dyn WorkerClient>)
            .ok_or_else(|| Status::not_found(format!("no fake worker registered at {address}")))
    }
}
