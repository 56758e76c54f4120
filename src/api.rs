//! The public, C-shaped surface: every operation returns a plain integer
//! (0/-1, an id, or a no-return), with `Result<T, Error>` collapsed at this
//! one boundary. Nothing upstream of this module ever sees `-1` —
//! internally everything is `Result`.

use crate::diagnostics;
use crate::error::Error;
use crate::scheduler;

/// Runs `op`, emitting the appropriate diagnostic and mapping the outcome
/// onto the C-shaped surface: `Ok` through `on_ok`, a recoverable `Err` to
/// `-1`, and a `HostFailure` to process termination.
fn collapse<T>(op: Result<T, Error>, on_ok: impl FnOnce(T) -> i32) -> i32 {
    match op {
        Ok(value) => on_ok(value),
        Err(err) if err.is_fatal() => diagnostics::fatal(&err),
        Err(err) => {
            diagnostics::report(&err);
            -1
        }
    }
}

/// Initializes the thread library: creates the main thread (id 0, already
/// RUNNING) and arms the virtual-time timer with a `quantum_usecs`-long
/// period. Must be called exactly once before any other operation.
pub fn init(quantum_usecs: i32) -> i32 {
    if quantum_usecs <= 0 {
        diagnostics::report(&Error::InvalidArgument {
            operation: "init",
            detail: "quantum_usecs must be > 0",
        });
        return -1;
    }
    collapse(scheduler::init(quantum_usecs as u64), |()| 0)
}

/// Spawns a new thread running `entry` and returns its id, or -1 on
/// failure (a null `entry` or no free id).
pub fn spawn(entry: Option<extern "C" fn()>) -> i32 {
    let entry = match entry {
        Some(entry) => entry,
        None => {
            diagnostics::report(&Error::InvalidArgument {
                operation: "spawn",
                detail: "entry_point must not be null",
            });
            return -1;
        }
    };
    collapse(scheduler::spawn(entry), |id| id)
}

/// Terminates `tid`. `tid == 0` releases every thread and ends the process
/// with success; terminating the running thread never returns.
pub fn terminate(tid: i32) -> i32 {
    collapse(scheduler::terminate(tid), |()| 0)
}

/// Explicitly blocks `tid`. A no-op success if it is already blocked.
pub fn block(tid: i32) -> i32 {
    collapse(scheduler::block(tid), |()| 0)
}

/// Clears `tid`'s explicit block. A no-op success if it was already READY
/// or RUNNING; a sleeping thread stays blocked until its sleep also
/// expires.
pub fn resume(tid: i32) -> i32 {
    collapse(scheduler::resume(tid), |()| 0)
}

/// Puts the calling thread to sleep for `num_quantums` full quanta. Fails
/// if called from the main thread or with a non-positive count.
pub fn sleep(num_quantums: i32) -> i32 {
    collapse(scheduler::sleep(num_quantums as i64), |()| 0)
}

/// Returns the id of the currently running thread, or 0 if called before
/// `init`.
pub fn get_tid() -> i32 {
    scheduler::get_tid()
}

/// Returns the number of quanta elapsed since `init` (1 immediately after
/// `init`), or 0 before `init`.
pub fn get_total_quantums() -> i32 {
    scheduler::get_total_quantums() as i32
}

/// Returns the number of quanta `tid` has spent RUNNING, or -1 if `tid`
/// does not name a live thread.
pub fn get_quantums(tid: i32) -> i32 {
    collapse(scheduler::get_quantums(tid), |count| count as i32)
}
