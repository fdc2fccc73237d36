//! src/client/manager.rs
//!
//! The task manager thread.
//!
//! Periodically polls the dispatcher for the job's task list, reconciles
//! the local task set against it, and keeps the fetcher thread pool
//! sized to the request budget. The dispatcher is the authority on task
//! membership; poll failures are logged and retried on the next cycle
//! while existing fetchers keep serving.

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::client::config::AUTOTUNE;
use crate::client::runner;
use crate::client::state::{JobContext, Task};
use crate::error::Status;

pub(crate) fn run(ctx: Arc<JobContext>) {
    tracing::debug!(job_client_id = ctx.job_client_id, "task manager starting");
    let refresh = Duration::from_millis(ctx.config.task_refresh_interval_ms.max(0) as u64);
    let mut next_check = Instant::now();
    loop {
        {
            let mut state = ctx.shared.state.lock();
            while !state.cancelled {
                let now = Instant::now();
                if now >= next_check {
                    break;
                }
                let _ = ctx
                    .shared
                    .manager_cv
                    .wait_for(&mut state, next_check - now);
            }
            if state.cancelled {
                tracing::debug!(job_client_id = ctx.job_client_id, "task manager finished");
                return;
            }
        }
        update_tasks(&ctx);
        update_worker_threads(&ctx);
        next_check = Instant::now() + refresh;
    }
}

/// Reconciles the local task set against the dispatcher's.
fn update_tasks(ctx: &JobContext) {
    let response = match ctx.dispatcher.get_tasks(ctx.job_client_id) {
        Ok(response) => response,
        Err(status) => {
            tracing::warn!(
                job_client_id = ctx.job_client_id,
                error = %status,
                "failed to get task info from dispatcher"
            );
            return;
        }
    };
    let mut new_task_ids: HashSet<i64> = response.tasks.iter().map(|t| t.task_id).collect();

    let mut state = ctx.shared.state.lock();
    state.job_finished = response.job_finished;
    if response.job_finished {
        ctx.shared.get_next_cv.notify_all();
        ctx.shared.worker_cv.notify_all();
        return;
    }

    // Drop tasks the dispatcher no longer advertises. Known tasks are
    // removed from `new_task_ids` so that only newcomers remain.
    let mut i = 0;
    while i < state.tasks.len() {
        let task_id = state.tasks[i].task_id;
        if new_task_ids.remove(&task_id) {
            i += 1;
        } else {
            if state.tasks[i]
                .end_of_sequence
                .load(std::sync::atomic::Ordering::Acquire)
            {
                state.finished_tasks -= 1;
            }
            state.tasks.swap_remove(i);
        }
    }

    for info in &response.tasks {
        if !new_task_ids.contains(&info.task_id) {
            continue;
        }
        match ctx
            .factory
            .new_worker_client(&info.worker_address, &ctx.config.protocol)
        {
            Ok(worker) => {
                state.tasks.push(Arc::new(Task::new(
                    info.task_id,
                    info.worker_address.clone(),
                    worker,
                )));
            }
            Err(status) => {
                tracing::warn!(
                    worker = %info.worker_address,
                    error = %status,
                    "failed to create worker client"
                );
                if state.status.is_none() {
                    state.status = Some(status);
                }
                ctx.shared.get_next_cv.notify_all();
            }
        }
    }

    if ctx.config.max_outstanding_requests == AUTOTUNE {
        // Track the task count so every task can have a fetch in flight.
        state.max_outstanding_requests = state.tasks.len() as i64;
    }
}

/// Grows the fetcher pool up to the request budget. Each thread starts
/// logically in flight so budget accounting stays consistent; its exit
/// cleanup in [`runner::run`] undoes both counters.
fn update_worker_threads(ctx: &Arc<JobContext>) {
    let mut state = ctx.shared.state.lock();
    while (state.num_running_worker_threads as i64) < state.max_outstanding_requests {
        state.num_running_worker_threads += 1;
        state.outstanding_requests += 1;
        let thread_ctx = ctx.clone();
        let name = format!("data-service-worker-{}", state.worker_threads.len());
        match thread::Builder::new()
            .name(name)
            .spawn(move || runner::run(thread_ctx))
        {
            Ok(handle) => state.worker_threads.push(handle),
            Err(e) => {
                state.num_running_worker_threads -= 1;
                state.outstanding_requests -= 1;
                if state.status.is_none() {
                    state.status = Some(Status::internal(format!(
                        "failed to spawn worker thread: {e}"
                    )));
                }
                ctx.shared.get_next_cv.notify_all();
                return;
            }
        }
    }
}
