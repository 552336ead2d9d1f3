//! Per-worker state and the loop every fiber executes.
//!
//! A [`WorkerContext`] is the identity of one logical worker. It is an
//! owned value, never a global: the host thread creates it at start, every
//! suspension hands it to the replacement fiber, every resume hands it to
//! the woken fiber, and exit sends it home to the host thread. Exactly one
//! fiber runs a given context at any instant.

use crate::counter::TaskCounter;
use crate::fiber::{FiberId, Mailbox};
use crate::runtime::scheduler::queue::QueueEntry;
use crate::runtime::{ManagerShared, TaskContext};
use crate::task::Payload;
use crate::tracing_compat::{debug, trace};
use std::sync::{Arc, Mutex};

/// Capacity of the per-worker recycled-counter cache.
const COUNTER_CACHE_LIMIT: usize = 32;
/// Counters kept across a duty-cycle trim.
const COUNTER_CACHE_KEEP: usize = 16;
/// Tasks between duty-cycle maintenance passes.
const DUTY_CYCLE_PERIOD: u32 = 16;

/// Owned per-worker state, handed between fibers as they trade places.
#[derive(Debug)]
pub(crate) struct WorkerContext {
    index: usize,
    shared: Arc<ManagerShared>,
    core: Option<core_affinity::CoreId>,
    /// LIFO cache of idle counters, recycled to avoid cross-thread
    /// allocation traffic.
    counter_cache: Vec<Arc<TaskCounter>>,
    duty_ticks: u32,
    /// Set only during the exit protocol: the loop fiber that the host
    /// thread must return to the pool, since a fiber cannot release
    /// itself while its loop is still unwinding.
    fiber_to_release: Option<FiberId>,
}

impl WorkerContext {
    pub(crate) fn new(
        index: usize,
        shared: Arc<ManagerShared>,
        core: Option<core_affinity::CoreId>,
    ) -> Self {
        Self {
            index,
            shared,
            core,
            counter_cache: Vec::new(),
            duty_ticks: 0,
            fiber_to_release: None,
        }
    }

    pub(crate) fn index(&self) -> usize {
        self.index
    }

    pub(crate) fn shared(&self) -> &Arc<ManagerShared> {
        &self.shared
    }

    /// Re-pins the hosting fiber to this worker's configured core.
    pub(crate) fn apply_affinity(&self) {
        if let Some(core) = self.core {
            let _ = core_affinity::set_for_current(core);
        }
    }

    /// Takes a counter from the local cache, or allocates on a miss.
    pub(crate) fn create_counter(&mut self) -> Arc<TaskCounter> {
        self.counter_cache
            .pop()
            .unwrap_or_else(|| Arc::new(TaskCounter::new()))
    }

    /// Retires a finished counter into the local cache.
    ///
    /// Falls back to true deallocation when the cache is full or another
    /// reference is still in flight.
    pub(crate) fn recycle_counter(&mut self, counter: Arc<TaskCounter>) {
        counter.clear();
        self.shared.stats.counter_retired();
        if self.counter_cache.len() < COUNTER_CACHE_LIMIT && Arc::strong_count(&counter) == 1 {
            self.counter_cache.push(counter);
        }
    }

    /// Periodic housekeeping, amortized to every 16th completed task.
    pub(crate) fn duty_cycle(&mut self) {
        self.duty_ticks = self.duty_ticks.wrapping_add(1);
        if self.duty_ticks % DUTY_CYCLE_PERIOD == 0 && self.counter_cache.len() > COUNTER_CACHE_KEEP
        {
            self.counter_cache.truncate(COUNTER_CACHE_KEEP);
            self.counter_cache.shrink_to(COUNTER_CACHE_LIMIT);
        }
    }

    pub(crate) fn set_fiber_to_release(&mut self, fiber: FiberId) {
        debug_assert!(self.fiber_to_release.is_none());
        self.fiber_to_release = Some(fiber);
    }

    pub(crate) fn take_fiber_to_release(&mut self) -> Option<FiberId> {
        self.fiber_to_release.take()
    }
}

/// Shares a worker context between a fiber's loop and the task it is
/// currently running.
///
/// The context is absent exactly while it has been handed to another
/// fiber (the owner is stalled between handoff and resume).
#[derive(Debug)]
pub(crate) struct ContextCell {
    inner: Mutex<Option<WorkerContext>>,
}

impl ContextCell {
    pub(crate) fn new(ctx: WorkerContext) -> Self {
        Self {
            inner: Mutex::new(Some(ctx)),
        }
    }

    pub(crate) fn index(&self) -> usize {
        self.with_mut(|ctx| ctx.index())
    }

    pub(crate) fn take(&self) -> WorkerContext {
        self.inner
            .lock()
            .expect("worker context cell poisoned")
            .take()
            .expect("worker context already handed off")
    }

    pub(crate) fn put(&self, ctx: WorkerContext) {
        let mut slot = self.inner.lock().expect("worker context cell poisoned");
        debug_assert!(slot.is_none(), "worker context cell already occupied");
        *slot = Some(ctx);
    }

    pub(crate) fn with_mut<R>(&self, f: impl FnOnce(&mut WorkerContext) -> R) -> R {
        let mut slot = self.inner.lock().expect("worker context cell poisoned");
        f(slot.as_mut().expect("worker context already handed off"))
    }
}

/// The loop a fiber runs while it hosts a worker.
///
/// Returns when the fiber trades itself away: either it executed a resume
/// entry (handing its context to the stalled fiber and releasing itself),
/// or it received an exit instruction (sending its context home and
/// leaving its own release to the host thread).
pub(crate) fn worker_loop(fiber: FiberId, mailbox: &Arc<Mailbox>, ctx: WorkerContext) {
    ctx.apply_affinity();
    let shared = Arc::clone(ctx.shared());
    let cell = Arc::new(ContextCell::new(ctx));

    loop {
        let worker = cell.index();
        let QueueEntry {
            counted, payload, ..
        } = shared.scheduler.consume(worker);

        match payload {
            Payload::Work(task) => {
                let (work, counter) = task.into_parts();
                {
                    let task_cx = TaskContext::new(
                        fiber,
                        Arc::clone(mailbox),
                        Arc::clone(&shared),
                        Arc::clone(&cell),
                    );
                    work(&task_cx);
                }
                // The closure and its captures are gone before the join is
                // published; completion must not hold task resources alive.
                if let Some(counter) = counter {
                    counter.decrement_and_resume(&shared.scheduler);
                }
                if counted {
                    shared.scheduler.task_finished();
                }
                shared.stats.task_executed();
                cell.with_mut(WorkerContext::duty_cycle);
            }
            Payload::ResumeFiber(target) => {
                trace!(fiber = ?fiber, target = ?target, "switching to stalled fiber");
                let ctx = cell.take();
                shared.fiber_pool.resume(target, ctx);
                shared.fiber_pool.release(fiber);
                return;
            }
            Payload::Exit => {
                debug!(fiber = ?fiber, "worker received exit instruction");
                let mut ctx = cell.take();
                ctx.set_fiber_to_release(fiber);
                let index = ctx.index();
                shared.exit_slots[index].deliver(ctx);
                return;
            }
        }
    }
}
