//! The in-fiber task API.
//!
//! Every task closure receives a [`TaskContext`]: the identity of the
//! fiber it runs on plus the worker context it currently holds. Through it
//! a task fans out sub-tasks and joins on them without ever blocking the
//! worker's OS thread.

use crate::counter::{WaitHandle, Waiter};
use crate::fiber::{FiberId, Mailbox};
use crate::runtime::worker::{ContextCell, WorkerContext};
use crate::runtime::ManagerShared;
use crate::task::{Payload, Priority, Task};
use std::sync::Arc;

/// Scheduling context handed to every task closure.
///
/// Valid only for the duration of the closure invocation; tasks fan out
/// and join through it rather than through the manager, so sub-task
/// counters recycle through the worker's local cache.
#[derive(Debug)]
pub struct TaskContext {
    fiber: FiberId,
    mailbox: Arc<Mailbox>,
    shared: Arc<ManagerShared>,
    cell: Arc<ContextCell>,
}

impl TaskContext {
    pub(crate) fn new(
        fiber: FiberId,
        mailbox: Arc<Mailbox>,
        shared: Arc<ManagerShared>,
        cell: Arc<ContextCell>,
    ) -> Self {
        Self {
            fiber,
            mailbox,
            shared,
            cell,
        }
    }

    /// Index of the logical worker this task currently runs on.
    ///
    /// May differ after a [`wait_for`](Self::wait_for): a task resumes on
    /// the worker whose fiber executed its resume entry.
    #[must_use]
    pub fn worker_index(&self) -> usize {
        self.cell.index()
    }

    /// Submits `tasks` and returns a handle for joining on them.
    ///
    /// The join counter is armed to the task count before any task is
    /// published, so an early completion can never decrement an unarmed
    /// counter.
    pub fn run(&self, tasks: Vec<Task>, priority: Priority) -> WaitHandle {
        priority.assert_external();
        assert!(!tasks.is_empty(), "running an empty task batch");

        let counter = self.cell.with_mut(WorkerContext::create_counter);
        counter.start(tasks.len());
        self.shared.stats.counter_armed();

        for mut task in tasks {
            task.attach_counter(Arc::clone(&counter));
            self.shared.scheduler.produce(priority, Payload::Work(task));
        }

        WaitHandle::new(counter, priority, Arc::clone(&self.shared.stats))
    }

    /// Submits `tasks` with no join handle (fire-and-forget).
    pub fn run_detached(&self, tasks: Vec<Task>, priority: Priority) {
        priority.assert_external();
        for task in tasks {
            self.shared.scheduler.produce(priority, Payload::Work(task));
        }
    }

    /// Suspends this fiber until every task behind `handle` has completed.
    ///
    /// Returns immediately when the join already happened. Otherwise the
    /// fiber queues itself on the counter, hands its worker context to a
    /// replacement fiber, and stalls; it is resumed through the normal
    /// submission path at the handle's priority once the counter reaches
    /// zero.
    pub fn wait_for(&self, handle: WaitHandle) {
        let (counter, priority) = handle.into_parts();

        // Tag the stall before queuing as a waiter: once the waiter is
        // visible, a resume may arrive at any moment.
        self.shared.fiber_pool.mark_stalled(self.fiber);
        let queued = counter.wait_for(Waiter {
            fiber: self.fiber,
            priority,
        });

        if queued {
            let ctx = self.cell.take();
            self.shared.fiber_pool.start_worker(ctx);

            let resumed = self.mailbox.recv_resume();
            self.cell.put(resumed);
            self.cell.with_mut(|ctx| ctx.apply_affinity());
        } else {
            self.shared.fiber_pool.mark_running(self.fiber);
        }

        self.cell.with_mut(move |ctx| ctx.recycle_counter(counter));
    }

    /// Fan out and join in one call.
    pub fn run_and_wait_for(&self, tasks: Vec<Task>, priority: Priority) {
        let handle = self.run(tasks, priority);
        self.wait_for(handle);
    }
}
