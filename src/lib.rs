//! Taskweave: cooperative fiber-based task scheduling for Rust.
//!
//! # Overview
//!
//! Taskweave multiplexes many short-lived, possibly-blocking tasks over a
//! fixed pool of logical workers. Each worker perpetually executes inside a
//! cooperative fiber; tasks that block on a join counter yield their fiber
//! back to the pool instead of stalling an OS thread, and are resumed
//! through the normal submission path once the counter reaches zero.
//!
//! # Core Guarantees
//!
//! - **Priority-correct dispatch**: tasks dequeue in priority order, with
//!   FIFO preserved within a priority class on each local queue
//! - **Counter-based joins**: fan-out/join without blocking worker threads;
//!   waiters resume on their recorded priority
//! - **Bounded queues**: per-worker queues have a fixed capacity, so task
//!   storms back-pressure producers instead of growing memory
//! - **Leak-free shutdown**: shutdown asserts that every fiber returned to
//!   the pool and every join counter was retired
//!
//! # Module Structure
//!
//! - [`config`]: Manager configuration and validation
//! - [`task`]: Task units and priorities
//! - [`counter`]: Join counters and wait handles
//! - [`fiber`]: The cooperative fiber pool
//! - [`runtime`]: The task manager, workers, and scheduler
//! - [`util`]: Internal utilities (slot arena, bounded backoff)
//!
//! # Example
//!
//! ```no_run
//! use taskweave::{ManagerConfig, Priority, Task, TaskManager};
//!
//! let manager = TaskManager::new(ManagerConfig::default()).unwrap();
//! manager.start();
//! manager.run_and_wait_for(
//!     vec![Task::new(|_cx| println!("hello from a fiber"))],
//!     Priority::Normal,
//! );
//! manager.wait_for_all();
//! manager.shutdown();
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]

pub mod config;
pub mod counter;
pub mod fiber;
pub mod runtime;
pub mod task;
pub mod tracing_compat;
pub mod util;

#[cfg(feature = "tracing-integration")]
pub mod test_utils;

pub use config::{ConfigError, ManagerConfig, PinningStrategy, ThreadPriority};
pub use counter::WaitHandle;
pub use runtime::{StatsSnapshot, TaskContext, TaskManager};
pub use task::{Priority, Task};
