//! Gates delivery of the tick signal so that scheduler-state mutations in
//! `Api` operations are never observed half-done by [`crate::timer`]'s
//! handler.
//!
//! Concretely this blocks/unblocks `SIGVTALRM` with `sigprocmask`, the same
//! primitive the reference's `SIGNAL_BLOCK`/`SIGNAL_UNBLOCK` macros wrap.
//! Nesting is flattened with a depth counter so the gate is only a single
//! pair of syscalls per outermost entry, and an RAII guard means an early
//! `?` return can never leave the signal masked — for operations that
//! return normally within their own call frame.
//!
//! Operations that can suspend the calling thread mid-operation via
//! [`crate::context::switch`] (`on_tick`, `block` on self, `sleep`,
//! `terminate` on self) cannot use the RAII guard for the switch itself:
//! `context::switch` suspends the *entire* native call stack, including any
//! live `Guard`, and that `Guard` only resumes — and only then drops,
//! unblocking the signal — when some later switch happens to target this
//! exact suspended point again. The thread being switched *into* never runs
//! through that resume path (a freshly spawned thread starts cold at its
//! entry point; an existing thread resumes inside its own, unrelated
//! suspended frame), so relying on `Guard`'s `Drop` here would leave the
//! gate's depth and the real signal mask wherever the *previous* occupant
//! happened to leave them — wrong for whichever thread dispatch now
//! installs, and never corrected since the tick that would fix it can't
//! fire while the signal stays wrongly blocked. Those four call sites use
//! [`raw_enter`]/[`raw_exit`]/[`force_depth`] instead: each thread's own
//! critical-section depth is saved on its [`crate::thread_table::ThreadRecord`]
//! at the point it is switched away from, and [`force_depth`] re-applies the
//! depth (and the matching mask state) the incoming thread had saved,
//! independent of whatever the outgoing thread's depth was. A freshly
//! spawned thread has never saved a depth, so it starts at depth 0 (fully
//! unblocked) — the same guarantee the reference gets from forcing
//! `sigemptyset` on a new thread's saved mask so it never inherits another
//! thread's blocked state.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::diagnostics;
use crate::error::Error;

/// Reentrancy depth. Only ever touched from the single kernel thread this
/// library runs on, so `Relaxed` ordering is enough.
static DEPTH: AtomicU32 = AtomicU32::new(0);

fn vtalrm_sigset() -> libc::sigset_t {
    unsafe {
        let mut set: libc::sigset_t = std::mem::zeroed();
        libc::sigemptyset(&mut set);
        libc::sigaddset(&mut set, libc::SIGVTALRM);
        set
    }
}

fn block() {
    let set = vtalrm_sigset();
    let rc = unsafe { libc::sigprocmask(libc::SIG_BLOCK, &set, std::ptr::null_mut()) };
    if rc < 0 {
        diagnostics::fatal(&Error::HostFailure {
            operation: "critical_section::enter",
            detail: "sigprocmask(SIG_BLOCK) failed",
        });
    }
}

fn unblock() {
    let set = vtalrm_sigset();
    let rc = unsafe { libc::sigprocmask(libc::SIG_UNBLOCK, &set, std::ptr::null_mut()) };
    if rc < 0 {
        diagnostics::fatal(&Error::HostFailure {
            operation: "critical_section::exit",
            detail: "sigprocmask(SIG_UNBLOCK) failed",
        });
    }
}

/// A held critical section. Tick delivery stays gated until every `Guard`
/// acquired so far has been dropped.
///
/// Only safe to hold across code that is guaranteed to return normally
/// within its own call frame. Never hold one across a real
/// [`crate::context::switch`] — see the module docs.
#[must_use]
pub struct Guard {
    _private: (),
}

impl Guard {
    pub fn enter() -> Guard {
        raw_enter();
        Guard { _private: () }
    }
}

impl Drop for Guard {
    fn drop(&mut self) {
        raw_exit();
    }
}

/// Runs `f` with tick delivery gated, matching the reference's
/// `SIGNAL_BLOCK ... SIGNAL_UNBLOCK` bracketing of each `Api` operation.
/// `f` must return normally; it must never perform a real context switch.
pub fn enter<R>(f: impl FnOnce() -> R) -> R {
    let _guard = Guard::enter();
    f()
}

/// Enters the gate directly, bumping the depth and blocking the signal on
/// 0→1, and returns the depth reached. Used instead of [`Guard`] by the
/// operations that may suspend the calling thread mid-operation, since
/// their epilogue (the matching [`raw_exit`]) might not run until long
/// after this call returns, on a stack resumed by an unrelated dispatch.
pub fn raw_enter() -> u32 {
    let depth = DEPTH.fetch_add(1, Ordering::Relaxed) + 1;
    if depth == 1 {
        block();
    }
    depth
}

/// Exits one level of the gate, unblocking the signal on 1→0. Pairs with
/// [`raw_enter`]; see the module docs for why this can't just be `Guard`'s
/// `Drop` for the four operations that might switch away mid-call.
pub fn raw_exit() {
    if DEPTH.fetch_sub(1, Ordering::Relaxed) == 1 {
        unblock();
    }
}

/// Unconditionally sets the gate's depth to `depth` and applies the
/// matching signal-mask state, regardless of the depth currently in
/// effect. Called immediately before a real [`crate::context::switch`]
/// dispatches into a thread, with `depth` being that thread's own saved
/// depth from the last time it was suspended (0 for a thread that has
/// never been suspended before, i.e. a freshly spawned one) — not the
/// depth the outgoing thread happened to be at.
pub fn force_depth(depth: u32) {
    DEPTH.store(depth, Ordering::Relaxed);
    if depth == 0 {
        unblock();
    } else {
        block();
    }
}
