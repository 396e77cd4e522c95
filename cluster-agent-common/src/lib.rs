//! # Cluster Agent Common
//!
//! Shared utilities for the cluster agent workspace: a memoizing retry
//! wrapper for one-time initialization, and logging helpers used by the
//! binaries and libraries alike.

pub mod logging;
pub mod retry;

// Re-export main types for convenience
pub use logging::{init_tracing, Pretty};
pub use retry::{RetryConfig, RetryError, RetryStatus, Retrier};
