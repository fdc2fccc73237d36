//! src/client/runner.rs
//!
//! Fetcher threads.
//!
//! Each fetcher repeatedly claims a task, fetches one element from its
//! worker outside the lock, and publishes the result. Transient worker
//! errors are retried with backoff; the first terminal error becomes the
//! iterator's sticky status and ends the thread.
//!
//! Two claim disciplines exist:
//! - **strict round-robin**: the task at the cursor is claimed and a
//!   placeholder slot is reserved in the results queue, so consumers see
//!   per-round task order even when fetches complete out of order;
//! - **non-deterministic**: the first free unfinished task after the
//!   cursor is claimed, and the result is only queued once ready, so a
//!   slow worker never holds back faster ones.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use crate::client::state::{JobContext, Task};
use crate::element::OpaqueTensor;
use crate::error::{Result, Status};
use crate::rpc::GetElementResponse;

pub(crate) fn run(ctx: Arc<JobContext>) {
    tracing::debug!("worker thread starting");
    run_loop(&ctx);
    let mut state = ctx.shared.state.lock();
    state.num_running_worker_threads -= 1;
    state.outstanding_requests -= 1;
    ctx.shared.get_next_cv.notify_all();
    drop(state);
    tracing::debug!("worker thread exiting");
}

fn run_loop(ctx: &JobContext) {
    let strict_round_robin = ctx.config.strict_round_robin();
    let mut held: Option<Arc<Task>> = None;
    loop {
        let (task, reserved) = {
            let mut state = ctx.shared.state.lock();
            if let Some(task) = held.take() {
                task.in_use.store(false, Ordering::Release);
                ctx.shared.worker_cv.notify_one();
            }
            state.outstanding_requests -= 1;
            while !state.cancelled
                && !(state.element_space_available(strict_round_robin)
                    && state.task_available(strict_round_robin))
                && !state.job_finished
            {
                ctx.shared.worker_cv.wait(&mut state);
            }
            state.outstanding_requests += 1;
            if state.cancelled || state.job_finished {
                return;
            }
            if strict_round_robin {
                let len = state.tasks.len();
                let index = state.next_task_index % len;
                let task = state.tasks[index].clone();
                let seq = state.reserve_result();
                state.next_task_index = (index + 1) % len;
                task.in_use.store(true, Ordering::Release);
                (task, Some(seq))
            } else {
                // Scan once around from the cursor for a free task.
                let len = state.tasks.len();
                let cursor = state.next_task_index;
                let mut claimed = None;
                for i in 0..len {
                    let index = (cursor + i) % len;
                    let task = &state.tasks[index];
                    if !task.in_use.load(Ordering::Acquire)
                        && !task.end_of_sequence.load(Ordering::Acquire)
                    {
                        claimed = Some((index, task.clone()));
                        break;
                    }
                }
                let Some((index, task)) = claimed else {
                    // A task counted free by the predicate can be gone by
                    // the time we scan if it finished while in use.
                    continue;
                };
                state.next_task_index = (index + 1) % len;
                task.in_use.store(true, Ordering::Release);
                (task, None)
            }
        };

        // No deadline: fetches retry until the task finishes or the
        // iterator is cancelled.
        if let Err(status) = get_element(ctx, &task, None, reserved) {
            let mut state = ctx.shared.state.lock();
            task.in_use.store(false, Ordering::Release);
            tracing::warn!(worker = %task.address, error = %status, "failed to get element");
            if state.status.is_none() {
                state.status = Some(Status::new(
                    status.code,
                    format!(
                        "failed to get element from worker {}: {}",
                        task.address, status.message
                    ),
                ));
            }
            ctx.shared.get_next_cv.notify_all();
            return;
        }
        held = Some(task);
    }
}

/// Fetches one element for `task` and publishes it.
///
/// With `reserved` set (round-robin), the element lands in the reserved
/// slot; otherwise it is appended to the queue once ready. Transient RPC
/// failures are retried with backoff, truncated to `deadline` when one
/// is given, until the task is finished or the iterator is cancelled.
fn get_element(
    ctx: &JobContext,
    task: &Arc<Task>,
    deadline: Option<Instant>,
    reserved: Option<u64>,
) -> Result<()> {
    let mut num_retries: u32 = 0;
    let response = loop {
        let (consumer_index, round_index) = if ctx.config.strict_round_robin() {
            (
                ctx.config.consumer_index,
                Some(task.elements_read.load(Ordering::Acquire)),
            )
        } else {
            (None, None)
        };
        match task
            .worker
            .get_element(task.task_id, consumer_index, round_index)
        {
            Ok(response) => break response,
            Err(status) if !status.is_transient() => return Err(status),
            Err(status) => {
                {
                    let state = ctx.shared.state.lock();
                    if task.end_of_sequence.load(Ordering::Acquire) || state.cancelled {
                        break GetElementResponse {
                            compressed: None,
                            end_of_sequence: true,
                        };
                    }
                }
                let now = Instant::now();
                let mut delay = ctx.backoff.delay(num_retries);
                if let Some(deadline) = deadline {
                    if now > deadline {
                        return Err(status);
                    }
                    // Truncate the backoff so the retry starts before the
                    // deadline.
                    delay = delay.min(deadline - now);
                }
                tracing::warn!(
                    worker = %task.address,
                    error = %status,
                    retry_in_ms = delay.as_millis() as u64,
                    "failed to get element from worker; will retry"
                );
                thread::sleep(delay);
                num_retries = num_retries.saturating_add(1);
            }
        }
    };

    let element: Vec<OpaqueTensor> = if response.end_of_sequence {
        Vec::new()
    } else {
        let compressed = response.compressed.ok_or_else(|| {
            Status::internal(format!(
                "worker {} returned an element without a payload",
                task.address
            ))
        })?;
        vec![OpaqueTensor::wrap(compressed)]
    };

    let mut state = ctx.shared.state.lock();
    if state.cancelled {
        // Pending consumers will observe cancellation; publishing now
        // would violate the no-results-after-cancel contract.
        return Ok(());
    }
    if response.end_of_sequence {
        if !task.end_of_sequence.swap(true, Ordering::AcqRel) {
            state.finished_tasks += 1;
        }
        if let Some(seq) = reserved {
            if let Some(slot) = state.result_mut(seq) {
                slot.ready = true;
                slot.end_of_sequence = true;
            }
        }
        ctx.shared.get_next_cv.notify_all();
        return Ok(());
    }
    task.elements_read.fetch_add(1, Ordering::AcqRel);
    match reserved {
        Some(seq) => {
            if let Some(slot) = state.result_mut(seq) {
                slot.ready = true;
                slot.element = element;
            }
        }
        None => state.push_ready_result(element, false),
    }
    ctx.shared.get_next_cv.notify_all();
    Ok(())
}
