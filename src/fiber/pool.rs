//! The fiber pool: lends fibers to workers and reclaims them.
//!
//! Slots live in a generation-checked arena; handles are indices. Each slot
//! carries an explicit state tag:
//!
//! - `Idle`: parked on its mailbox, on the free list, ready to acquire
//! - `Running`: hosting some worker's loop right now
//! - `Stalled`: parked mid-task awaiting a counter; a resume entry in the
//!   scheduler holds the only path back to it
//!
//! Fibers are created lazily up to `max_fibers` and are never destroyed
//! mid-flight; destruction happens only at pool shutdown, once every fiber
//! has returned to `Idle`.

use crate::fiber::mailbox::{Activation, Mailbox};
use crate::fiber::FiberId;
use crate::runtime::worker::{self, WorkerContext};
use crate::runtime::Stats;
use crate::tracing_compat::trace;
use crate::util::Arena;
use crossbeam_queue::SegQueue;
use parking_lot::Mutex;
use std::cell::Cell;
use std::sync::Arc;
use std::thread;

thread_local! {
    static IN_FIBER: Cell<bool> = const { Cell::new(false) };
}

/// True when the calling thread is a pooled fiber.
///
/// Blocking manager entry points assert this is false: a fiber that blocks
/// its own OS thread on manager-level synchronization would deadlock the
/// worker it is hosting.
pub(crate) fn current_thread_is_fiber() -> bool {
    IN_FIBER.with(Cell::get)
}

/// Lifecycle state of one pooled fiber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FiberState {
    Idle,
    Running,
    Stalled,
}

#[derive(Debug)]
struct FiberSlot {
    mailbox: Arc<Mailbox>,
    state: FiberState,
    thread: Option<thread::JoinHandle<()>>,
}

/// Pool of cooperative fibers backing the worker loops.
#[derive(Debug)]
pub(crate) struct FiberPool {
    slots: Mutex<Arena<FiberSlot>>,
    idle: SegQueue<FiberId>,
    max_fibers: usize,
    thread_name: String,
    stack_size: usize,
    stats: Arc<Stats>,
}

impl FiberPool {
    pub(crate) fn new(
        max_fibers: usize,
        thread_name: String,
        stack_size: usize,
        stats: Arc<Stats>,
    ) -> Self {
        Self {
            slots: Mutex::new(Arena::new()),
            idle: SegQueue::new(),
            max_fibers,
            thread_name,
            stack_size,
            stats,
        }
    }

    /// Activates a fiber with a fresh worker loop for `ctx`.
    pub(crate) fn start_worker(&self, ctx: WorkerContext) {
        let (fiber, mailbox) = self.acquire();
        trace!(fiber = ?fiber, worker = ctx.index(), "starting worker loop on fiber");
        self.stats.fiber_activation();
        mailbox.post(Activation::Start(ctx));
    }

    /// Wakes a stalled fiber, handing it `ctx`.
    pub(crate) fn resume(&self, fiber: FiberId, ctx: WorkerContext) {
        let mailbox = {
            let mut slots = self.slots.lock();
            let slot = slots.get_mut(fiber.0).expect("resume of an unknown fiber");
            assert!(
                slot.state == FiberState::Stalled,
                "resume of a fiber that is not stalled"
            );
            slot.state = FiberState::Running;
            Arc::clone(&slot.mailbox)
        };
        trace!(fiber = ?fiber, worker = ctx.index(), "resuming stalled fiber");
        self.stats.fiber_activation();
        mailbox.post(Activation::Resume(ctx));
    }

    /// Tags a running fiber as stalled, pending a resume.
    ///
    /// Tagged before the fiber queues itself as a counter waiter, so a
    /// resume can never observe it still running.
    pub(crate) fn mark_stalled(&self, fiber: FiberId) {
        let mut slots = self.slots.lock();
        let slot = slots.get_mut(fiber.0).expect("stall of an unknown fiber");
        assert!(
            slot.state == FiberState::Running,
            "only the running fiber can stall itself"
        );
        slot.state = FiberState::Stalled;
    }

    /// Reverts a stall tag when the wait turned out to be unnecessary.
    pub(crate) fn mark_running(&self, fiber: FiberId) {
        let mut slots = self.slots.lock();
        let slot = slots.get_mut(fiber.0).expect("unknown fiber");
        assert!(slot.state == FiberState::Stalled, "fiber was not stalled");
        slot.state = FiberState::Running;
    }

    /// Returns a fiber whose activation has fully unwound to the idle set.
    ///
    /// Never legal for a stalled fiber; its stack still holds a suspended
    /// task.
    pub(crate) fn release(&self, fiber: FiberId) {
        {
            let mut slots = self.slots.lock();
            let slot = slots.get_mut(fiber.0).expect("release of an unknown fiber");
            assert!(
                slot.state == FiberState::Running,
                "release of a fiber that is not running"
            );
            slot.state = FiberState::Idle;
        }
        self.idle.push(fiber);
    }

    /// Number of fibers currently running or stalled.
    pub(crate) fn in_use(&self) -> usize {
        self.slots
            .lock()
            .iter()
            .filter(|(_, slot)| slot.state != FiberState::Idle)
            .count()
    }

    /// Asserts every fiber has returned to the idle set.
    pub(crate) fn assert_quiescent(&self) {
        let in_use = self.in_use();
        assert!(in_use == 0, "{in_use} fibers leaked (running or stalled)");
    }

    /// Joins every fiber thread. All fibers must be idle.
    ///
    /// Idempotent; fibers created after a shutdown would leak, so callers
    /// only invoke this once no further activations can occur.
    pub(crate) fn shutdown(&self) {
        self.assert_quiescent();
        let (mailboxes, threads) = {
            let mut slots = self.slots.lock();
            let mut mailboxes = Vec::new();
            let mut threads = Vec::new();
            for (_, slot) in slots.iter_mut() {
                if let Some(handle) = slot.thread.take() {
                    mailboxes.push(Arc::clone(&slot.mailbox));
                    threads.push(handle);
                }
            }
            (mailboxes, threads)
        };

        for mailbox in mailboxes {
            mailbox.post(Activation::Shutdown);
        }
        for handle in threads {
            handle.join().expect("fiber thread panicked");
        }
    }

    fn acquire(&self) -> (FiberId, Arc<Mailbox>) {
        if let Some(fiber) = self.idle.pop() {
            let mut slots = self.slots.lock();
            let slot = slots.get_mut(fiber.0).expect("idle list held a stale fiber");
            debug_assert!(slot.state == FiberState::Idle);
            slot.state = FiberState::Running;
            return (fiber, Arc::clone(&slot.mailbox));
        }
        self.create_fiber()
    }

    fn create_fiber(&self) -> (FiberId, Arc<Mailbox>) {
        let mailbox = Arc::new(Mailbox::new());
        let fiber = {
            let mut slots = self.slots.lock();
            assert!(
                slots.len() < self.max_fibers,
                "fiber pool exhausted ({} fibers live); too many simultaneously blocked tasks",
                self.max_fibers
            );
            FiberId(slots.insert(FiberSlot {
                mailbox: Arc::clone(&mailbox),
                state: FiberState::Running,
                thread: None,
            }))
        };

        let thread_mailbox = Arc::clone(&mailbox);
        let handle = thread::Builder::new()
            .name(format!("{}-{}", self.thread_name, fiber.0.index()))
            .stack_size(self.stack_size)
            .spawn(move || fiber_main(fiber, &thread_mailbox))
            .expect("failed to spawn fiber thread");

        self.slots
            .lock()
            .get_mut(fiber.0)
            .expect("fiber slot vanished")
            .thread = Some(handle);

        trace!(fiber = ?fiber, "created fiber");
        (fiber, mailbox)
    }
}

/// Entry point of every fiber thread.
///
/// Parks on the mailbox between activations. A `Start` runs a worker loop
/// to its end (the loop releases or hands off the fiber itself); a
/// `Resume` can only arrive mid-stall, inside a loop, never here.
fn fiber_main(fiber: FiberId, mailbox: &Arc<Mailbox>) {
    IN_FIBER.with(|flag| flag.set(true));
    loop {
        match mailbox.recv() {
            Activation::Start(ctx) => worker::worker_loop(fiber, mailbox, ctx),
            Activation::Resume(_) => unreachable!("idle fiber resumed without a pending stall"),
            Activation::Shutdown => break,
        }
    }
}
