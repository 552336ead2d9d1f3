//! Dispatch-order tests driven through a single worker.
//!
//! With one worker there is one local queue, so the ordering contract is
//! observable end to end: priority classes first, insertion order within a
//! class. A barrier-gated task holds the worker busy while the probe
//! entries queue up behind it.

use std::sync::{Arc, Barrier, Mutex};

use taskweave::test_utils::init_test_logging;
use taskweave::{ManagerConfig, Priority, Task, TaskManager};

fn single_worker_manager() -> TaskManager {
    init_test_logging();
    let manager = TaskManager::new(ManagerConfig {
        worker_count: 1,
        ..ManagerConfig::default()
    })
    .expect("valid config");
    manager.start();
    manager
}

fn recording_task(order: &Arc<Mutex<Vec<&'static str>>>, label: &'static str) -> Task {
    let order = Arc::clone(order);
    Task::new(move |_| {
        order.lock().expect("order lock").push(label);
    })
}

#[test]
fn priority_classes_dispatch_high_normal_low() {
    let manager = single_worker_manager();
    let order = Arc::new(Mutex::new(Vec::new()));
    let gate = Arc::new(Barrier::new(2));

    // Hold the only worker inside a task while the probes queue up.
    let gate_in = Arc::clone(&gate);
    manager.run(
        vec![Task::new(move |_| {
            gate_in.wait();
        })],
        Priority::High,
    );

    manager.run(vec![recording_task(&order, "normal")], Priority::Normal);
    manager.run(vec![recording_task(&order, "high")], Priority::High);
    manager.run(vec![recording_task(&order, "low")], Priority::Low);

    gate.wait();
    manager.wait_for_all();

    assert_eq!(
        *order.lock().expect("order lock"),
        vec!["high", "normal", "low"]
    );
    manager.shutdown();
}

#[test]
fn same_class_dispatches_in_submission_order() {
    let manager = single_worker_manager();
    let order = Arc::new(Mutex::new(Vec::new()));
    let gate = Arc::new(Barrier::new(2));

    let gate_in = Arc::clone(&gate);
    manager.run(
        vec![Task::new(move |_| {
            gate_in.wait();
        })],
        Priority::High,
    );

    manager.run(vec![recording_task(&order, "first")], Priority::Normal);
    manager.run(vec![recording_task(&order, "second")], Priority::Normal);
    manager.run(vec![recording_task(&order, "third")], Priority::Normal);

    gate.wait();
    manager.wait_for_all();

    assert_eq!(
        *order.lock().expect("order lock"),
        vec!["first", "second", "third"]
    );
    manager.shutdown();
}

#[test]
fn priority_holds_across_mixed_batches() {
    let manager = single_worker_manager();
    let order = Arc::new(Mutex::new(Vec::new()));
    let gate = Arc::new(Barrier::new(2));

    let gate_in = Arc::clone(&gate);
    manager.run(
        vec![Task::new(move |_| {
            gate_in.wait();
        })],
        Priority::High,
    );

    manager.run(vec![recording_task(&order, "low-1")], Priority::Low);
    manager.run(vec![recording_task(&order, "normal-1")], Priority::Normal);
    manager.run(vec![recording_task(&order, "low-2")], Priority::Low);
    manager.run(vec![recording_task(&order, "high-1")], Priority::High);
    manager.run(vec![recording_task(&order, "normal-2")], Priority::Normal);

    gate.wait();
    manager.wait_for_all();

    assert_eq!(
        *order.lock().expect("order lock"),
        vec!["high-1", "normal-1", "normal-2", "low-1", "low-2"]
    );
    manager.shutdown();
}
