//! src/client/state.rs
//!
//! Shared state behind the iterator.
//!
//! One mutex guards everything; three condition variables wake the three
//! kinds of threads that touch it (consumers, fetcher workers, the task
//! manager). All predicates are evaluated while holding the lock, and
//! the lock is never held across an RPC.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};

use crate::client::backoff::BackoffPolicy;
use crate::client::config::DataServiceConfig;
use crate::element::OpaqueTensor;
use crate::error::Status;
use crate::rpc::{ClientFactory, DispatcherClient, WorkerClient};

/// Per-worker fetch handle.
///
/// The atomic fields are only mutated while the state lock is held; the
/// atomics exist so the fetch path can read `elements_read` for the round
/// index without taking the lock.
pub(crate) struct Task {
    pub task_id: i64,
    /// Address of the worker serving this task.
    pub address: String,
    pub worker: Arc<dyn WorkerClient>,
    /// Number of elements successfully fetched for this task.
    pub elements_read: AtomicI64,
    /// Whether a fetcher thread currently holds the task.
    pub in_use: AtomicBool,
    /// Whether the worker reported end of sequence for the task.
    pub end_of_sequence: AtomicBool,
}

impl Task {
    pub fn new(task_id: i64, address: String, worker: Arc<dyn WorkerClient>) -> Self {
        Self {
            task_id,
            address,
            worker,
            elements_read: AtomicI64::new(0),
            in_use: AtomicBool::new(false),
            end_of_sequence: AtomicBool::new(false),
        }
    }
}

/// Slot for one element in the results queue.
///
/// Round-robin reads reserve slots before fetching, so a slot may sit in
/// the queue with `ready == false` until its fetch completes. The
/// consumer never pops past an unready slot.
pub(crate) struct ResultSlot {
    pub seq: u64,
    pub ready: bool,
    pub element: Vec<OpaqueTensor>,
    pub end_of_sequence: bool,
}

pub(crate) struct State {
    pub cancelled: bool,
    pub job_finished: bool,
    /// First terminal error, surfaced by the next `get_next`.
    pub status: Option<Status>,
    /// Tasks to read from; the index doubles as the round-robin cursor
    /// anchor.
    pub tasks: Vec<Arc<Task>>,
    pub next_task_index: usize,
    /// Tasks in `tasks` that reached end of sequence.
    pub finished_tasks: usize,
    /// Fetches past their wait but not yet past publication.
    pub outstanding_requests: i64,
    /// Budget on elements held in memory. Starts from the configured
    /// value and tracks the task count under autotune.
    pub max_outstanding_requests: i64,
    pub num_running_worker_threads: usize,
    pub results: VecDeque<ResultSlot>,
    next_result_seq: u64,
    pub worker_threads: Vec<JoinHandle<()>>,
}

impl State {
    fn new(max_outstanding_requests: i64) -> Self {
        Self {
            cancelled: false,
            job_finished: false,
            status: None,
            tasks: Vec::new(),
            next_task_index: 0,
            finished_tasks: 0,
            outstanding_requests: 0,
            max_outstanding_requests,
            num_running_worker_threads: 0,
            results: VecDeque::new(),
            next_result_seq: 0,
            worker_threads: Vec::new(),
        }
    }

    /// Reserves an unready slot at the back of the queue and returns its
    /// sequence number, used by round-robin fetches to publish in claim
    /// order even when fetches complete out of order.
    pub fn reserve_result(&mut self) -> u64 {
        let seq = self.next_result_seq;
        self.next_result_seq += 1;
        self.results.push_back(ResultSlot {
            seq,
            ready: false,
            element: Vec::new(),
            end_of_sequence: false,
        });
        seq
    }

    /// Locates a reserved slot. The consumer only pops ready slots, so a
    /// reserved slot stays in the queue until published; `None` can only
    /// mean the reservation was already consumed, which publication
    /// ordering rules out.
    pub fn result_mut(&mut self, seq: u64) -> Option<&mut ResultSlot> {
        let front_seq = self.results.front()?.seq;
        let index = usize::try_from(seq.checked_sub(front_seq)?).ok()?;
        self.results.get_mut(index)
    }

    /// Appends an already-complete result.
    pub fn push_ready_result(&mut self, element: Vec<OpaqueTensor>, end_of_sequence: bool) {
        let seq = self.next_result_seq;
        self.next_result_seq += 1;
        self.results.push_back(ResultSlot {
            seq,
            ready: true,
            element,
            end_of_sequence,
        });
    }

    /// Whether another element can be requested without exceeding
    /// `max_outstanding_requests`.
    pub fn element_space_available(&self, strict_round_robin: bool) -> bool {
        // Round-robin fetches pre-allocate their slot in `results`, so the
        // queue length already accounts for in-progress requests.
        if strict_round_robin {
            (self.results.len() as i64) < self.max_outstanding_requests
        } else {
            (self.results.len() as i64) + self.outstanding_requests
                < self.max_outstanding_requests
        }
    }

    /// Whether some task can make progress for a fetcher thread.
    pub fn task_available(&self, strict_round_robin: bool) -> bool {
        if strict_round_robin {
            // Progress hinges on the cursored task being free.
            if self.tasks.is_empty() {
                return false;
            }
            let index = self.next_task_index % self.tasks.len();
            !self.tasks[index].in_use.load(Ordering::Acquire)
        } else {
            (self.finished_tasks as i64) + self.outstanding_requests < (self.tasks.len() as i64)
        }
    }
}

/// The mutex-and-condvar bundle shared by the iterator and its threads.
pub(crate) struct SharedState {
    pub state: Mutex<State>,
    /// Wakes consumers blocked in `get_next`.
    pub get_next_cv: Condvar,
    /// Wakes fetcher threads waiting for budget or a free task.
    pub worker_cv: Condvar,
    /// Wakes the task manager out of its poll sleep.
    pub manager_cv: Condvar,
}

impl SharedState {
    pub fn new(max_outstanding_requests: i64) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State::new(max_outstanding_requests)),
            get_next_cv: Condvar::new(),
            worker_cv: Condvar::new(),
            manager_cv: Condvar::new(),
        })
    }

    /// Flags cancellation and wakes every thread so wait loops can
    /// observe it.
    pub fn cancel(&self) {
        let mut state = self.state.lock();
        state.cancelled = true;
        self.worker_cv.notify_all();
        self.manager_cv.notify_all();
        self.get_next_cv.notify_all();
    }
}

/// Everything a manager or fetcher thread needs to do its job. Threads
/// hold this through an `Arc` and must be joined before the iterator
/// releases it.
pub(crate) struct JobContext {
    pub shared: Arc<SharedState>,
    pub config: DataServiceConfig,
    pub dispatcher: Arc<dyn DispatcherClient>,
    pub factory: Arc<dyn ClientFactory>,
    pub job_client_id: i64,
    pub backoff: BackoffPolicy,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::rpc::GetElementResponse;

    struct NullWorker;

    impl WorkerClient for NullWorker {
        fn get_element(
            &self,
            _task_id: i64,
            _consumer_index: Option<i64>,
            _round_index: Option<i64>,
        ) -> Result<GetElementResponse> {
            Ok(GetElementResponse::default())
        }
    }

    fn task(id: i64) -> Arc<Task> {
        Arc::new(Task::new(id, format!("worker-{id}"), Arc::new(NullWorker)))
    }

    #[test]
    fn reserved_slots_publish_in_claim_order() {
        let mut state = State::new(4);
        let first = state.reserve_result();
        let second = state.reserve_result();

        // Publish out of order.
        let slot = state.result_mut(second).unwrap();
        slot.ready = true;
        assert!(!state.results.front().unwrap().ready);

        let slot = state.result_mut(first).unwrap();
        slot.ready = true;
        assert!(state.results.front().unwrap().ready);
        assert_eq!(state.results.pop_front().unwrap().seq, first);
        assert_eq!(state.results.front().unwrap().seq, second);
    }

    #[test]
    fn round_robin_budget_counts_reserved_slots() {
        let mut state = State::new(2);
        assert!(state.element_space_available(true));
        state.reserve_result();
        state.reserve_result();
        assert!(!state.element_space_available(true));
    }

    #[test]
    fn interleaved_budget_counts_outstanding_requests() {
        let mut state = State::new(2);
        state.outstanding_requests = 1;
        state.push_ready_result(Vec::new(), false);
        assert!(!state.element_space_available(false));
        state.outstanding_requests = 0;
        assert!(state.element_space_available(false));
    }

    #[test]
    fn task_available_round_robin_tracks_the_cursor() {
        let mut state = State::new(2);
        assert!(!state.task_available(true));
        state.tasks.push(task(1));
        state.tasks.push(task(2));
        assert!(state.task_available(true));
        state.tasks[0].in_use.store(true, Ordering::Release);
        assert!(!state.task_available(true));
        state.next_task_index = 1;
        assert!(state.task_available(true));
    }

    #[test]
    fn task_available_interleaved_counts_finished_and_outstanding() {
        let mut state = State::new(4);
        state.tasks.push(task(1));
        state.tasks.push(task(2));
        assert!(state.task_available(false));
        state.finished_tasks = 1;
        state.outstanding_requests = 1;
        assert!(!state.task_available(false));
    }
}
