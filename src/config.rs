//! Compile-time limits and the one runtime tunable the scheduler needs.
//!
//! [`MAX_THREAD_NUM`] and [`STACK_SIZE`] mirror the constants the reference
//! implementation hardcodes at compile time. They're gathered here, alongside
//! the quantum length chosen at [`crate::init`], so the rest of the crate (and
//! its tests) has one place to read the active limits from.

/// Maximum number of threads (including the main thread) the scheduler can
/// track at once. Id 0 is reserved for main, so at most `MAX_THREAD_NUM - 1`
/// spawned threads can be alive simultaneously.
pub const MAX_THREAD_NUM: usize = 100;

/// Size in bytes of the stack allocated for each spawned thread.
pub const STACK_SIZE: usize = 4096;

/// Runtime configuration captured at [`crate::init`].
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Length of a quantum, in microseconds. Always greater than zero.
    pub quantum_usecs: u64,
}

impl Config {
    pub(crate) fn new(quantum_usecs: u64) -> Self {
        Config { quantum_usecs }
    }
}
