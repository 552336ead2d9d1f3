//! Internal utilities for the taskweave runtime.
//!
//! These helpers are intentionally small and dependency-free so the hot
//! scheduling paths stay easy to audit.

pub mod arena;
pub mod backoff;

pub use arena::{Arena, ArenaIndex};
pub use backoff::Backoff;
