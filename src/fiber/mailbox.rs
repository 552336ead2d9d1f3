//! Per-fiber activation mailbox.
//!
//! Each fiber thread parks on its mailbox whenever it is not running. The
//! mailbox holds at most one pending activation: a fiber is activated by
//! exactly one party at a time (the pool on acquire, or the fiber executing
//! its resume entry), so a second post before the fiber consumes the first
//! indicates a lifecycle bug.

use crate::runtime::worker::WorkerContext;
use std::sync::{Condvar, Mutex};

/// What a parked fiber wakes up to do.
#[derive(Debug)]
pub(crate) enum Activation {
    /// Begin a fresh worker loop with this context.
    Start(WorkerContext),
    /// Continue a stalled loop, adopting this context.
    Resume(WorkerContext),
    /// Exit the fiber thread; the pool is shutting down.
    Shutdown,
}

/// Single-slot handoff channel between fibers.
#[derive(Debug, Default)]
pub(crate) struct Mailbox {
    slot: Mutex<Option<Activation>>,
    posted: Condvar,
}

impl Mailbox {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Deposits an activation and wakes the parked fiber.
    pub(crate) fn post(&self, activation: Activation) {
        let mut slot = self.slot.lock().expect("fiber mailbox lock poisoned");
        debug_assert!(slot.is_none(), "fiber activated twice without running");
        *slot = Some(activation);
        self.posted.notify_one();
    }

    /// Parks until an activation arrives, then takes it.
    pub(crate) fn recv(&self) -> Activation {
        let mut slot = self.slot.lock().expect("fiber mailbox lock poisoned");
        loop {
            if let Some(activation) = slot.take() {
                return activation;
            }
            slot = self
                .posted
                .wait(slot)
                .expect("fiber mailbox lock poisoned");
        }
    }

    /// Parks until resumed mid-stall, returning the adopted context.
    ///
    /// Only a resume may arrive while a fiber is stalled; anything else is
    /// a lifecycle bug.
    pub(crate) fn recv_resume(&self) -> WorkerContext {
        match self.recv() {
            Activation::Resume(ctx) => ctx,
            other => unreachable!("stalled fiber woken by {other:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn post_then_recv() {
        let mailbox = Mailbox::new();
        mailbox.post(Activation::Shutdown);
        assert!(matches!(mailbox.recv(), Activation::Shutdown));
    }

    #[test]
    fn recv_blocks_until_posted() {
        let mailbox = Arc::new(Mailbox::new());
        let poster = {
            let mailbox = Arc::clone(&mailbox);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                mailbox.post(Activation::Shutdown);
            })
        };

        assert!(matches!(mailbox.recv(), Activation::Shutdown));
        poster.join().expect("poster thread");
    }

    #[test]
    fn post_before_recv_is_buffered() {
        let mailbox = Arc::new(Mailbox::new());
        mailbox.post(Activation::Shutdown);

        // The activation must survive until the fiber gets around to it.
        thread::sleep(Duration::from_millis(5));
        assert!(matches!(mailbox.recv(), Activation::Shutdown));
    }
}
