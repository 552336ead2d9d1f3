//! The cooperative fiber pool.
//!
//! A fiber is a suspendable execution context that hosts a worker loop.
//! Because this crate forbids `unsafe`, fibers are realized as dedicated OS
//! threads that stay parked except while they are the running fiber of some
//! logical worker; a cooperative "switch" is a mailbox handoff between two
//! such threads. The pool lends fibers to workers, tracks each one through
//! an explicit `Idle` / `Running` / `Stalled` state, and recycles them so a
//! blocking task never costs a worker its thread.

mod mailbox;
mod pool;

pub(crate) use self::mailbox::{Activation, Mailbox};
pub(crate) use self::pool::{current_thread_is_fiber, FiberPool};

use crate::util::ArenaIndex;

/// Handle to a pooled fiber.
///
/// An index into the pool's slot arena, never a pointer; a stale handle
/// cannot alias a recycled slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FiberId(pub(crate) ArenaIndex);

impl FiberId {
    #[cfg(test)]
    pub(crate) fn new_for_test(index: u32) -> Self {
        Self(ArenaIndex::new(index, 0))
    }
}
