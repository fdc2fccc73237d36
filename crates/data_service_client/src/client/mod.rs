//! src/client/mod.rs
//!
//! The ingest engine: streams dataset elements from a fleet of workers
//! coordinated by a central dispatcher, and presents the merged stream
//! to the consumer one element per `get_next` call.
//!
//! # Architecture Overview
//!
//! ```text
//!                 ┌────────────┐
//!                 │ Dispatcher │ (tracks jobs, assigns tasks)
//!                 └─────┬──────┘
//!                       │ get_tasks (periodic poll)
//!                       ↓
//!               ┌───────────────┐
//!               │  TaskManager  │ reconciles the task set,
//!               └───────┬───────┘ sizes the fetcher pool
//!                       │
//!          ┌────────────┼────────────┐
//!          ↓            ↓            ↓
//!     [Fetcher]    [Fetcher]    [Fetcher]   (≤ max_outstanding_requests)
//!          │            │            │  get_element → worker RPC
//!          └────────────┼────────────┘
//!                       ↓
//!                ┌─────────────┐
//!                │   results   │ FIFO, bounded by the request budget
//!                └──────┬──────┘
//!                       │ get_next
//!                       ↓
//!                  [ Consumer ]
//! ```
//!
//! Two read disciplines share this machinery. Non-deterministic reads
//! queue results as fetches complete; strict round-robin reads reserve
//! queue slots in task-cursor order so cooperating consumers all observe
//! the same per-round element order.
//!
//! # Module Structure
//!
//! ```text
//! src/client/
//! ├── mod.rs        # Public API exports + architecture docs
//! ├── config.rs     # DataServiceConfig, builder, and validation
//! ├── iterator.rs   # DataServiceDataset / DataServiceIterator lifecycle
//! ├── state.rs      # Mutex-guarded shared state and budget predicates
//! ├── manager.rs    # Task manager thread (dispatcher polling)
//! ├── runner.rs     # Fetcher threads (claim / fetch / publish loop)
//! └── backoff.rs    # Retry backoff for preemptible servers
//! ```

mod backoff;
mod config;
mod iterator;
mod manager;
mod runner;
mod state;

pub use config::{DataServiceConfig, DataServiceConfigBuilder, OpVersion, AUTOTUNE};
pub use iterator::{DataServiceDataset, DataServiceIterator, Progress};
