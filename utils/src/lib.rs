//! Shared utilities for EvolvAI: atomic file IO and unified diffing.

mod atomic_write;
mod diff;

pub use atomic_write::atomic_write;
pub use diff::{compute_diff_stats, count_diff_changes, unified_diff};
