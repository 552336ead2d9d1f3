//! The public task manager.
//!
//! Owns the scheduler and fiber pool, spawns one host thread per logical
//! worker, and bridges plain-thread callers into the fiber world. The
//! manager moves through a strict state machine:
//!
//! ```text
//! stopped --start()--> running --shutdown()--> stopped
//! ```
//!
//! Starting a running manager, stopping a stopped one, or submitting work
//! outside the running state are contract violations and assert.

use crate::config::{ManagerConfig, PinningStrategy};
use crate::fiber::current_thread_is_fiber;
use crate::runtime::worker::WorkerContext;
use crate::runtime::{ManagerShared, StatsSnapshot};
use crate::task::{Payload, Priority, Task};
use crate::tracing_compat::{debug, info};
use core_affinity::CoreId;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

/// Blocks a plain OS thread until a proxy task signals it.
#[derive(Debug, Default)]
struct CompletionGate {
    done: Mutex<bool>,
    ready: Condvar,
}

impl CompletionGate {
    fn new() -> Self {
        Self::default()
    }

    fn signal(&self) {
        let mut done = self.done.lock().expect("completion gate lock poisoned");
        *done = true;
        self.ready.notify_all();
    }

    fn wait(&self) {
        let mut done = self.done.lock().expect("completion gate lock poisoned");
        while !*done {
            done = self.ready.wait(done).expect("completion gate lock poisoned");
        }
    }
}

/// Cooperative fiber-based task manager.
///
/// Multiplexes submitted tasks over `worker_count` logical workers, each
/// perpetually executing inside a pooled fiber. See the crate docs for an
/// end-to-end example.
#[derive(Debug)]
pub struct TaskManager {
    config: ManagerConfig,
    shared: Arc<ManagerShared>,
    host_threads: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl TaskManager {
    /// Creates a stopped manager from `config`.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`](crate::ConfigError) when the normalized
    /// configuration fails validation.
    pub fn new(mut config: ManagerConfig) -> Result<Self, crate::ConfigError> {
        config.normalize();
        config.validate()?;
        let shared = Arc::new(ManagerShared::new(&config));
        Ok(Self {
            config,
            shared,
            host_threads: Mutex::new(Vec::new()),
        })
    }

    /// Spawns the worker threads and arms each logical worker.
    ///
    /// The manager must be stopped.
    pub fn start(&self) {
        assert!(
            !self.shared.running.swap(true, Ordering::SeqCst),
            "task manager '{}' is already running",
            self.config.name
        );

        info!(
            manager = %self.config.name,
            workers = self.config.worker_count,
            "starting task manager"
        );

        let cores = self.resolve_cores();
        let mut host_threads = self
            .host_threads
            .lock()
            .expect("host thread list lock poisoned");
        for index in 0..self.config.worker_count {
            let shared = Arc::clone(&self.shared);
            let core = cores[index];
            let name = format!(
                "{}-{}-{}",
                self.config.name, self.config.thread_tag, index
            );
            let handle = thread::Builder::new()
                .name(name)
                .spawn(move || host_main(&shared, index, core))
                .expect("failed to spawn worker thread");
            host_threads.push(handle);
        }
    }

    /// Submits tasks with no join handle (fire-and-forget).
    pub fn run(&self, tasks: Vec<Task>, priority: Priority) {
        self.assert_running("run");
        priority.assert_external();
        for task in tasks {
            self.shared.scheduler.produce(priority, Payload::Work(task));
        }
    }

    /// Runs `tasks` and blocks the calling thread until all complete.
    ///
    /// For plain-thread callers: the fan-out/join happens inside a proxy
    /// task on a worker fiber, and the calling thread blocks on a plain
    /// condition variable until the proxy signals. Task code joins through
    /// [`TaskContext::wait_for`](crate::TaskContext::wait_for) instead.
    pub fn run_and_wait_for(&self, tasks: Vec<Task>, priority: Priority) {
        self.assert_running("run_and_wait_for");
        self.assert_plain_thread("run_and_wait_for");
        priority.assert_external();
        assert!(!tasks.is_empty(), "running an empty task batch");

        let gate = Arc::new(CompletionGate::new());
        let signal = Arc::clone(&gate);
        let proxy = Task::new(move |cx| {
            cx.run_and_wait_for(tasks, priority);
            signal.signal();
        });
        self.shared.scheduler.produce(priority, Payload::Work(proxy));
        gate.wait();
    }

    /// Blocks until the scheduler is fully quiescent.
    ///
    /// Quiescence means no task is queued or executing anywhere, including
    /// tasks spawned by other tasks after this call began; it is stronger
    /// than joining on any particular submission.
    pub fn wait_for_all(&self) {
        self.assert_running("wait_for_all");
        self.assert_plain_thread("wait_for_all");

        let gate = Arc::new(CompletionGate::new());
        let signal = Arc::clone(&gate);
        let shared = Arc::clone(&self.shared);
        let probe = Task::new(move |cx| {
            while shared.scheduler.has_pending_task() {
                cx.run_and_wait_for(vec![Task::new(|_| {})], Priority::Low);
            }
            signal.signal();
        });
        self.shared
            .scheduler
            .produce(Priority::Internal, Payload::Work(probe));
        gate.wait();
    }

    /// True while any submitted task is queued or executing.
    #[must_use]
    pub fn has_pending_tasks(&self) -> bool {
        self.shared.scheduler.has_pending_task()
    }

    /// Stops every worker and verifies nothing leaked.
    ///
    /// The manager must be running and quiescent; drain outstanding work
    /// with [`wait_for_all`](Self::wait_for_all) first. The manager can be
    /// started again afterwards.
    pub fn shutdown(&self) {
        assert!(
            self.shared.running.load(Ordering::SeqCst),
            "shutting down task manager '{}' which is not running",
            self.config.name
        );
        self.assert_plain_thread("shutdown");
        assert!(
            !self.shared.scheduler.has_pending_task(),
            "shutting down with tasks still in flight"
        );

        debug!(manager = %self.config.name, "signalling exit to workers");
        self.shared.scheduler.signal_exit_to_workers();

        let host_threads = std::mem::take(
            &mut *self
                .host_threads
                .lock()
                .expect("host thread list lock poisoned"),
        );
        for handle in host_threads {
            handle.join().expect("worker thread panicked");
        }

        self.shared.fiber_pool.assert_quiescent();
        assert!(
            self.shared.stats.armed_counters() == 0,
            "{} join counters leaked across shutdown",
            self.shared.stats.armed_counters()
        );

        self.shared.running.store(false, Ordering::SeqCst);
        info!(manager = %self.config.name, "task manager stopped");
    }

    /// Point-in-time runtime counters.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// The manager's diagnostic name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    fn assert_running(&self, operation: &str) {
        assert!(
            self.shared.running.load(Ordering::SeqCst),
            "{operation} on task manager '{}' which is not running",
            self.config.name
        );
    }

    fn assert_plain_thread(&self, operation: &str) {
        assert!(
            !current_thread_is_fiber(),
            "{operation} called from a worker fiber; task code must use TaskContext"
        );
    }

    fn resolve_cores(&self) -> Vec<Option<CoreId>> {
        let available = core_affinity::get_core_ids().unwrap_or_default();
        (0..self.config.worker_count)
            .map(|index| {
                if let Some(affinities) = &self.config.affinities {
                    return Some(CoreId {
                        id: affinities[index],
                    });
                }
                match self.config.pinning {
                    PinningStrategy::Linear if !available.is_empty() => {
                        Some(available[index % available.len()])
                    }
                    _ => None,
                }
            })
            .collect()
    }
}

impl Drop for TaskManager {
    fn drop(&mut self) {
        if self.shared.running.load(Ordering::SeqCst) {
            self.wait_for_all();
            self.shutdown();
        }
        self.shared.fiber_pool.shutdown();
    }
}

/// Body of a host thread: one per logical worker.
///
/// The thread's own execution context serves as the exit target. It arms
/// the worker with a context and a pooled loop fiber, then waits for the
/// context to come home through the exit protocol, releasing the final
/// loop fiber on its behalf.
fn host_main(shared: &Arc<ManagerShared>, index: usize, core: Option<CoreId>) {
    if let Some(core) = core {
        let _ = core_affinity::set_for_current(core);
    }

    let ctx = WorkerContext::new(index, Arc::clone(shared), core);
    shared.fiber_pool.start_worker(ctx);

    let mut ctx = shared.exit_slots[index].wait();
    if let Some(fiber) = ctx.take_fiber_to_release() {
        shared.fiber_pool.release(fiber);
    }
    debug!(worker = index, "host thread exiting");
}
