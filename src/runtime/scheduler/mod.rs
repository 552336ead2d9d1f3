//! The task scheduler: per-worker priority queues with work stealing.
//!
//! Producers place entries round-robin across bounded worker queues,
//! starting from an index derived from the composite key. Consumers steal
//! from siblings only when a scheduler-wide priority hint says something
//! strictly better than their own head is pending somewhere, then fall
//! back to blocking on their own queue.
//!
//! Ordering contract: dispatch is priority-correct everywhere, but FIFO
//! within a priority class holds only per local queue. Tasks that land on
//! different workers may interleave; callers needing a strict order run on
//! one worker or join between phases.

pub(crate) mod queue;

use self::queue::{QueueEntry, WorkerQueue};
use crate::runtime::Stats;
use crate::task::{composite_key, key_class, Payload, Priority, REVISION_LIMIT};
use crate::tracing_compat::trace;
use crate::util::Backoff;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// How long a saturated producer waits on `below_capacity` per retry.
const PRODUCER_RETRY_WAIT: Duration = Duration::from_millis(1);

/// Priority-aware work distributor over a fixed set of worker queues.
#[derive(Debug)]
pub(crate) struct Scheduler {
    queues: Vec<WorkerQueue>,
    /// Monotonic insertion revision; rewinds to zero at quiescence.
    revision: AtomicU32,
    /// Best (numerically lowest) priority class believed pending anywhere.
    ///
    /// Updated with a single failure-tolerant compare-exchange per produce
    /// and reset at quiescence. A steal heuristic only; staleness costs a
    /// missed or wasted steal attempt, never correctness.
    class_hint: AtomicU32,
    /// Caller-visible tasks between produce and closure return.
    in_flight: AtomicUsize,
    stats: Arc<Stats>,
}

impl Scheduler {
    pub(crate) fn new(worker_count: usize, queue_capacity: usize, stats: Arc<Stats>) -> Self {
        assert!(worker_count > 0, "scheduler needs at least one worker");
        Self {
            queues: (0..worker_count)
                .map(|_| WorkerQueue::new(queue_capacity))
                .collect(),
            revision: AtomicU32::new(0),
            class_hint: AtomicU32::new(u32::MAX),
            in_flight: AtomicUsize::new(0),
            stats,
        }
    }

    /// Publishes an entry to some worker's queue.
    ///
    /// Never parks indefinitely: a producer that finds every queue at
    /// capacity may itself be a worker fiber, and sleeping on one queue's
    /// condition could deadlock the worker that would drain it.
    pub(crate) fn produce(&self, priority: Priority, payload: Payload) {
        let counted = matches!(payload, Payload::Work(_)) && priority != Priority::Internal;
        if counted {
            // Count before taking a revision so a quiescence rewind can
            // never race an entry that is about to be published.
            self.in_flight.fetch_add(1, Ordering::AcqRel);
        }

        let key = self.next_key(priority);
        self.publish_hint(priority);
        trace!(key, counted, "producing entry");

        let worker_count = self.queues.len();
        let start = key as usize % worker_count;
        let mut entry = QueueEntry {
            key,
            counted,
            payload,
        };
        let mut backoff = Backoff::new();
        loop {
            for offset in 0..worker_count {
                match self.queues[(start + offset) % worker_count].try_push(entry) {
                    Ok(()) => return,
                    Err(refused) => entry = refused,
                }
            }
            if backoff.is_sleeping() {
                self.queues[start].wait_below_capacity(PRODUCER_RETRY_WAIT);
            } else {
                backoff.snooze();
            }
        }
    }

    /// Takes the next entry for `worker`: a steal if one is clearly
    /// worthwhile, otherwise the head of its own queue.
    pub(crate) fn consume(&self, worker: usize) -> QueueEntry {
        if let Some(entry) = self.try_steal(worker) {
            self.stats.steal();
            return entry;
        }
        self.queues[worker].pop_blocking()
    }

    /// Marks a counted entry's closure as returned.
    pub(crate) fn task_finished(&self) {
        if self.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            // Quiescent: no stale composite comparisons can be in play, so
            // the revision space can be reused from zero.
            self.revision.store(0, Ordering::Relaxed);
            self.class_hint.store(u32::MAX, Ordering::Relaxed);
        }
    }

    /// True while any caller-visible task is queued or executing.
    pub(crate) fn has_pending_task(&self) -> bool {
        self.in_flight.load(Ordering::Acquire) > 0
    }

    /// Pushes one exit instruction onto every worker queue.
    ///
    /// Retries each push until it lands, so every worker observes an exit
    /// even if its queue is saturated when shutdown begins.
    pub(crate) fn signal_exit_to_workers(&self) {
        for queue in &self.queues {
            let mut entry = QueueEntry {
                key: self.next_key(Priority::Internal),
                counted: false,
                payload: Payload::Exit,
            };
            let mut backoff = Backoff::new();
            loop {
                match queue.try_push(entry) {
                    Ok(()) => break,
                    Err(refused) => entry = refused,
                }
                if backoff.is_sleeping() {
                    queue.wait_below_capacity(PRODUCER_RETRY_WAIT);
                } else {
                    backoff.snooze();
                }
            }
        }
    }

    /// True if any worker queue holds entries (including bookkeeping).
    #[cfg(test)]
    pub(crate) fn has_queued_entries(&self) -> bool {
        self.queues.iter().any(|queue| queue.len() > 0)
    }

    fn next_key(&self, priority: Priority) -> u32 {
        let revision = self.revision.fetch_add(1, Ordering::Relaxed);
        assert!(
            revision < REVISION_LIMIT,
            "insertion revision overflowed without a quiescent drain"
        );
        composite_key(priority, revision as u16)
    }

    fn publish_hint(&self, priority: Priority) {
        let class = u32::from(priority as u8);
        let hint = self.class_hint.load(Ordering::Relaxed);
        if class < hint {
            // Lost races are tolerated; the hint is best-effort.
            let _ = self.class_hint.compare_exchange_weak(
                hint,
                class,
                Ordering::Relaxed,
                Ordering::Relaxed,
            );
        }
    }

    fn try_steal(&self, worker: usize) -> Option<QueueEntry> {
        let worker_count = self.queues.len();
        if worker_count <= 1 {
            return None;
        }

        let my_head = self.queues[worker].head_key();
        let hint = self.class_hint.load(Ordering::Relaxed);
        if hint >= key_class(my_head) {
            return None;
        }

        for offset in 1..worker_count {
            let victim = (worker + offset) % worker_count;
            if let Some(entry) = self.queues[victim].try_steal(my_head) {
                return Some(entry);
            }
        }
        None
    }
}
