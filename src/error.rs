//! The library's typed error hierarchy.
//!
//! Internally every fallible operation returns `Result<T, Error>`. Only the
//! public [`crate::api`] functions collapse this down to the library's
//! C-shaped `-1` return, after routing the error through
//! [`crate::diagnostics`].

use thiserror::Error;

/// Everything that can go wrong inside the scheduler.
///
/// `HostFailure` is never handed back to a caller as a `Result` value that
/// survives past the `Api` boundary: it is fatal, and the `Api` layer that
/// observes one prints the `system error:`-tagged diagnostic and exits the
/// process, matching the reference's `exit(1)` paths.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{operation}: invalid argument ({detail})")]
    InvalidArgument {
        operation: &'static str,
        detail: &'static str,
    },

    #[error("{operation}: no thread with id {tid}")]
    NoSuchThread { operation: &'static str, tid: i32 },

    #[error("{operation}: exceeded MAX_THREAD_NUM concurrent threads")]
    Capacity { operation: &'static str },

    #[error("{operation}: {detail}")]
    HostFailure {
        operation: &'static str,
        detail: &'static str,
    },
}

impl Error {
    /// Whether this error is fatal and must terminate the process once
    /// reported, rather than being surfaced to the caller as `-1`.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::HostFailure { .. })
    }
}
