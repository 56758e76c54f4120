//! `uthreads` — preemptive user-level (green) threading on a single kernel
//! thread, driven by a virtual-time interval timer.
//!
//! Multiple logical threads are multiplexed round-robin over one OS
//! thread: a `SIGVTALRM` signal, backed by `ITIMER_VIRTUAL`, fires every
//! `quantum_usecs` microseconds and preempts whichever thread is running in
//! favor of the next one in the ready queue. There is no parallelism — at
//! most one logical thread ever executes at a time — only time-sliced
//! concurrency.
//!
//! Every operation below returns a plain integer, matching the library's
//! C-shaped external interface: `0`/a new id on success, `-1` on a
//! recoverable failure (with a `thread library error:`-tagged diagnostic
//! already emitted to stderr and to the `log` facade), or, for a handful of
//! host-level failures, process termination after a `system error:`-tagged
//! diagnostic. See [`Error`] for the underlying typed failure taxonomy.
//!
//! ```no_run
//! extern "C" fn worker() {
//!     loop {
//!         if uthreads::get_quantums(uthreads::get_tid()) > 5 {
//!             uthreads::terminate(uthreads::get_tid());
//!         }
//!     }
//! }
//!
//! uthreads::init(1000);
//! uthreads::spawn(Some(worker));
//! ```

mod api;
mod config;
mod context;
mod critical_section;
mod diagnostics;
mod error;
mod scheduler;
mod thread_table;
mod timer;

pub use api::{
    block, get_quantums, get_tid, get_total_quantums, init, resume, sleep, spawn, terminate,
};
pub use config::{MAX_THREAD_NUM, STACK_SIZE};
pub use error::Error;
