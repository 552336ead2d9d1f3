//! End-to-end manager tests: fan-out/join, quiescence, shutdown.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use taskweave::test_utils::init_test_logging;
use taskweave::{ManagerConfig, Priority, Task, TaskManager};

fn manager(workers: usize) -> TaskManager {
    init_test_logging();
    let manager = TaskManager::new(ManagerConfig {
        worker_count: workers,
        ..ManagerConfig::default()
    })
    .expect("valid config");
    manager.start();
    manager
}

#[test]
fn run_and_wait_for_executes_every_task() {
    let manager = manager(4);
    let total = Arc::new(AtomicUsize::new(0));

    let tasks: Vec<Task> = (0..16)
        .map(|_| {
            let total = Arc::clone(&total);
            Task::new(move |_| {
                total.fetch_add(1, Ordering::SeqCst);
            })
        })
        .collect();

    manager.run_and_wait_for(tasks, Priority::Normal);
    assert_eq!(total.load(Ordering::SeqCst), 16);

    manager.wait_for_all();
    manager.shutdown();
}

#[test]
fn repeated_fan_out_join_is_exact() {
    let manager = manager(4);
    let total = Arc::new(AtomicUsize::new(0));
    let fan_out = 4;
    let rounds = 1000;

    for _ in 0..rounds {
        let tasks: Vec<Task> = (0..fan_out)
            .map(|_| {
                let total = Arc::clone(&total);
                Task::new(move |_| {
                    total.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();
        manager.run_and_wait_for(tasks, Priority::Normal);
    }

    assert_eq!(total.load(Ordering::SeqCst), rounds * fan_out);
    manager.wait_for_all();
    manager.shutdown();
}

#[test]
fn detached_tasks_drain_on_wait_for_all() {
    let manager = manager(2);
    let total = Arc::new(AtomicUsize::new(0));

    let tasks: Vec<Task> = (0..100)
        .map(|_| {
            let total = Arc::clone(&total);
            Task::new(move |_| {
                total.fetch_add(1, Ordering::SeqCst);
            })
        })
        .collect();
    manager.run(tasks, Priority::Normal);

    manager.wait_for_all();
    assert_eq!(total.load(Ordering::SeqCst), 100);
    assert!(
        !manager.has_pending_tasks(),
        "quiescence must hold after wait_for_all"
    );

    // It keeps holding until new work arrives.
    thread::sleep(Duration::from_millis(20));
    assert!(!manager.has_pending_tasks());

    manager.shutdown();
}

#[test]
fn task_fans_out_and_joins_inside_a_fiber() {
    let manager = manager(2);
    let children_done = Arc::new(AtomicUsize::new(0));
    let seen_by_parent = Arc::new(AtomicUsize::new(0));

    let children_done_in = Arc::clone(&children_done);
    let seen_by_parent_in = Arc::clone(&seen_by_parent);
    manager.run_and_wait_for(
        vec![Task::new(move |cx| {
            let subtasks: Vec<Task> = (0..8)
                .map(|_| {
                    let done = Arc::clone(&children_done_in);
                    Task::new(move |_| {
                        done.fetch_add(1, Ordering::SeqCst);
                    })
                })
                .collect();
            cx.run_and_wait_for(subtasks, Priority::High);

            // Every child must have finished before the parent resumes.
            seen_by_parent_in.store(children_done_in.load(Ordering::SeqCst), Ordering::SeqCst);
        })],
        Priority::Normal,
    );

    assert_eq!(seen_by_parent.load(Ordering::SeqCst), 8);
    manager.wait_for_all();
    manager.shutdown();
}

#[test]
fn join_returns_regardless_of_child_timing() {
    let manager = manager(4);
    let child_ran = Arc::new(AtomicUsize::new(0));
    let observed = Arc::new(AtomicUsize::new(0));

    let child_ran_in = Arc::clone(&child_ran);
    let observed_in = Arc::clone(&observed);
    manager.run_and_wait_for(
        vec![Task::new(move |cx| {
            let child_ran = Arc::clone(&child_ran_in);
            let handle = cx.run(
                vec![Task::new(move |_| {
                    child_ran.fetch_add(1, Ordering::SeqCst);
                })],
                Priority::High,
            );

            // Give the child time to finish on a sibling worker, so the
            // join frequently takes the no-suspension path; either way
            // wait_for must not return before the child has run.
            thread::sleep(Duration::from_millis(50));
            cx.wait_for(handle);

            assert_eq!(child_ran_in.load(Ordering::SeqCst), 1);
            observed_in.fetch_add(1, Ordering::SeqCst);
        })],
        Priority::Normal,
    );

    assert_eq!(observed.load(Ordering::SeqCst), 1);
    manager.wait_for_all();
    manager.shutdown();
}

#[test]
fn blocking_tasks_do_not_starve_the_worker() {
    // One worker: a task that stalls on a join must hand its worker to a
    // replacement fiber so the children can run at all.
    let manager = manager(1);
    let total = Arc::new(AtomicUsize::new(0));

    let total_in = Arc::clone(&total);
    manager.run_and_wait_for(
        vec![Task::new(move |cx| {
            let children: Vec<Task> = (0..4)
                .map(|_| {
                    let total = Arc::clone(&total_in);
                    Task::new(move |_| {
                        total.fetch_add(1, Ordering::SeqCst);
                    })
                })
                .collect();
            cx.run_and_wait_for(children, Priority::Normal);
        })],
        Priority::Normal,
    );

    assert_eq!(total.load(Ordering::SeqCst), 4);
    manager.wait_for_all();
    manager.shutdown();
}

#[test]
fn mixed_load_stress() {
    let manager = manager(4);
    let total = Arc::new(AtomicUsize::new(0));
    let batches = 20;
    let per_batch = 100;

    for _ in 0..batches {
        let tasks: Vec<Task> = (0..per_batch)
            .map(|i| {
                let total = Arc::clone(&total);
                if i % 10 == 0 {
                    Task::new(move |cx| {
                        total.fetch_add(1, Ordering::SeqCst);
                        let children: Vec<Task> = (0..3)
                            .map(|_| {
                                let total = Arc::clone(&total);
                                Task::new(move |_| {
                                    total.fetch_add(1, Ordering::SeqCst);
                                })
                            })
                            .collect();
                        cx.run_and_wait_for(children, Priority::High);
                    })
                } else {
                    Task::new(move |_| {
                        total.fetch_add(1, Ordering::SeqCst);
                    })
                }
            })
            .collect();
        manager.run(tasks, Priority::Normal);
    }

    manager.wait_for_all();

    let waiters_per_batch = per_batch / 10;
    let expected = batches * (per_batch + waiters_per_batch * 3);
    assert_eq!(total.load(Ordering::SeqCst), expected);

    let stats = manager.stats();
    assert!(stats.tasks_executed >= (batches * per_batch) as u64);
    assert!(stats.fiber_activations > 0);

    manager.shutdown();
}

#[test]
fn manager_restarts_after_shutdown() {
    let manager = manager(2);
    let total = Arc::new(AtomicUsize::new(0));

    let total_a = Arc::clone(&total);
    manager.run_and_wait_for(
        vec![Task::new(move |_| {
            total_a.fetch_add(1, Ordering::SeqCst);
        })],
        Priority::Normal,
    );
    manager.wait_for_all();
    manager.shutdown();

    manager.start();
    let total_b = Arc::clone(&total);
    manager.run_and_wait_for(
        vec![Task::new(move |_| {
            total_b.fetch_add(1, Ordering::SeqCst);
        })],
        Priority::Normal,
    );
    manager.wait_for_all();
    manager.shutdown();

    assert_eq!(total.load(Ordering::SeqCst), 2);
}

#[test]
#[should_panic(expected = "not running")]
fn run_on_stopped_manager_asserts() {
    init_test_logging();
    let manager = TaskManager::new(ManagerConfig::default()).expect("valid config");
    manager.run(vec![Task::new(|_| {})], Priority::Normal);
}

#[test]
#[should_panic(expected = "already running")]
fn double_start_asserts() {
    let manager = manager(1);
    manager.start();
}

#[test]
#[should_panic(expected = "reserved for the scheduler")]
fn internal_priority_submission_asserts() {
    let manager = manager(1);
    manager.run(vec![Task::new(|_| {})], Priority::Internal);
}
