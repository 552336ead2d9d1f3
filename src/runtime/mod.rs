//! The task manager, its workers, and the scheduler.
//!
//! - [`TaskManager`] is the public orchestrator: it owns the scheduler and
//!   fiber pool, spawns worker threads, and bridges plain-thread callers
//!   into the fiber world
//! - [`TaskContext`] is the in-fiber API handed to every task closure
//! - [`scheduler`] holds the work-stealing queues
//! - [`worker`] holds the per-worker context and the loop fibers execute

pub(crate) mod scheduler;
pub(crate) mod worker;

mod context;
mod manager;

pub use self::context::TaskContext;
pub use self::manager::TaskManager;

use self::scheduler::Scheduler;
use self::worker::WorkerContext;
use crate::config::ManagerConfig;
use crate::fiber::FiberPool;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};

/// Runtime counters for diagnostics and leak checks.
#[derive(Debug, Default)]
pub(crate) struct Stats {
    tasks_executed: AtomicU64,
    steals: AtomicU64,
    fiber_activations: AtomicU64,
    /// Armed join counters not yet retired; must be zero at shutdown.
    counters_armed: AtomicI64,
}

impl Stats {
    pub(crate) fn task_executed(&self) {
        self.tasks_executed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn steal(&self) {
        self.steals.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn fiber_activation(&self) {
        self.fiber_activations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn counter_armed(&self) {
        self.counters_armed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn counter_retired(&self) {
        self.counters_armed.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn armed_counters(&self) -> i64 {
        self.counters_armed.load(Ordering::Relaxed)
    }

    pub(crate) fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            tasks_executed: self.tasks_executed.load(Ordering::Relaxed),
            steals: self.steals.load(Ordering::Relaxed),
            fiber_activations: self.fiber_activations.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of a manager's runtime counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Task closures invoked, including internal bookkeeping tasks.
    pub tasks_executed: u64,
    /// Entries taken from a sibling's queue.
    pub steals: u64,
    /// Fiber starts plus resumes.
    pub fiber_activations: u64,
}

/// Hands a worker context back to its host thread at exit.
#[derive(Debug, Default)]
pub(crate) struct ExitSlot {
    slot: Mutex<Option<WorkerContext>>,
    ready: Condvar,
}

impl ExitSlot {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn deliver(&self, ctx: WorkerContext) {
        let mut slot = self.slot.lock().expect("exit slot lock poisoned");
        debug_assert!(slot.is_none(), "worker context delivered twice");
        *slot = Some(ctx);
        self.ready.notify_one();
    }

    pub(crate) fn wait(&self) -> WorkerContext {
        let mut slot = self.slot.lock().expect("exit slot lock poisoned");
        loop {
            if let Some(ctx) = slot.take() {
                return ctx;
            }
            slot = self.ready.wait(slot).expect("exit slot lock poisoned");
        }
    }
}

/// State shared by the manager, its workers, and every fiber.
#[derive(Debug)]
pub(crate) struct ManagerShared {
    pub(crate) scheduler: Scheduler,
    pub(crate) fiber_pool: FiberPool,
    pub(crate) stats: Arc<Stats>,
    pub(crate) exit_slots: Vec<ExitSlot>,
    pub(crate) running: AtomicBool,
}

impl ManagerShared {
    pub(crate) fn new(config: &ManagerConfig) -> Self {
        let stats = Arc::new(Stats::default());
        Self {
            scheduler: Scheduler::new(
                config.worker_count,
                config.queue_capacity,
                Arc::clone(&stats),
            ),
            fiber_pool: FiberPool::new(
                config.max_fibers,
                format!("{}-fiber", config.name),
                config.stack_size,
                Arc::clone(&stats),
            ),
            stats,
            exit_slots: (0..config.worker_count).map(|_| ExitSlot::new()).collect(),
            running: AtomicBool::new(false),
        }
    }
}
