//! Execution-context save/restore/make — the single unsafe,
//! architecture-specific concern in the crate.
//!
//! The reference implementation gets this for free from `sigsetjmp` /
//! `siglongjmp` plus manual `jmp_buf` patching. Here the same three
//! operations (`save`, `restore`, `make`) are folded into one symmetric
//! primitive, [`switch`], that saves the SysV-ABI callee-saved registers and
//! stack pointer of the calling context and loads the same set from the
//! target context before resuming it with a plain `ret`. Because `call`/`ret`
//! already thread the program counter through the stack, a [`Context`] only
//! needs to remember `rsp`: the six callee-saved registers live on the
//! stack itself, at the address `rsp` points to.
//!
//! [`make`] fabricates the same frame shape a suspended [`switch`] would have
//! left behind, so switching into a freshly spawned thread for the first
//! time is indistinguishable, from the caller's point of view, from
//! resuming one that had previously yielded.
//!
//! x86_64/Linux only, matching the reference's `#ifdef __x86_64__` branch.

#[cfg(not(target_arch = "x86_64"))]
compile_error!("uthreads: context switching is only implemented for x86_64");

use std::arch::global_asm;

/// A suspended execution context: just enough to resume it.
#[repr(C)]
pub struct Context {
    rsp: u64,
}

impl Context {
    /// A context that has never been used. Only valid as a placeholder
    /// until [`make`] or a real [`switch`] populates it.
    pub const fn empty() -> Self {
        Context { rsp: 0 }
    }
}

extern "C" {
    /// Saves the calling context's callee-saved registers and stack pointer
    /// into `current`, then loads and resumes `next`.
    ///
    /// Returns (to whichever caller eventually switches back into
    /// `current`) exactly once per switch away, by the usual ABI meaning of
    /// "returns": this is a plain function as far as callers are concerned.
    fn uthreads_switch_context(current: *mut Context, next: *const Context);
}

global_asm!(
    ".global uthreads_switch_context",
    "uthreads_switch_context:",
    "push rbx",
    "push rbp",
    "push r12",
    "push r13",
    "push r14",
    "push r15",
    "mov [rdi], rsp",
    "mov rsp, [rsi]",
    "pop r15",
    "pop r14",
    "pop r13",
    "pop r12",
    "pop rbp",
    "pop rbx",
    "ret",
);

/// Switches from `current` to `next`. Does not return until some later
/// `switch` targets `current` again.
///
/// # Safety
///
/// Both contexts must be either [`Context::empty`] freshly built by
/// [`make`], or the live state of a context that was itself suspended by a
/// prior `switch`. `next` must not already be running elsewhere.
pub unsafe fn switch(current: &mut Context, next: &Context) {
    uthreads_switch_context(current as *mut Context, next as *const Context);
}

/// Prepares `ctx` so that switching into it starts `entry` running on top of
/// `stack`, as if it had been suspended by `switch` right at its own start.
///
/// `entry` must never return; the thread library always arranges for it to
/// call back into the scheduler to terminate instead.
///
/// # Safety
///
/// `stack` must remain valid and unaliased for as long as `ctx` is used.
pub unsafe fn make(ctx: &mut Context, stack: &mut [u8], entry: extern "C" fn() -> !) {
    const CALLEE_SAVED_COUNT: usize = 6;

    let stack_top = stack.as_mut_ptr() as usize + stack.len();
    let aligned_top = stack_top & !0xF;
    // `entry_slot` must itself be 16-byte aligned: once `switch`'s final
    // `ret` pops it and jumps, rsp == entry_slot + 8, which must be the
    // ABI-required "rsp % 16 == 8, as if just called" state.
    let entry_slot = aligned_top - 16;
    let regs_base = entry_slot - CALLEE_SAVED_COUNT * 8;

    unsafe {
        std::ptr::write(entry_slot as *mut u64, entry as usize as u64);
        for i in 0..CALLEE_SAVED_COUNT {
            std::ptr::write((regs_base + i * 8) as *mut u64, 0);
        }
    }
    ctx.rsp = regs_base as u64;
}
