//! Formats and emits the tagged diagnostics required by the external
//! interface: `thread library error:` for recoverable failures, `system
//! error:` for fatal ones. Every message is also mirrored through the `log`
//! facade so a host application with a logger installed gets a structured
//! record (target, level, tid/argument) alongside the plain stderr line.

use crate::error::Error;

/// Report a recoverable library error. The caller still gets `-1` back; this
/// only prints and logs the diagnostic.
pub fn report(err: &Error) {
    eprintln!("thread library error: {err}");
    log::warn!(target: "uthreads", "{err}");
}

/// Report a fatal host failure and terminate the process with a non-zero
/// status, matching the reference's `exit(1)` on timer/signal/allocation
/// failure.
pub fn fatal(err: &Error) -> ! {
    eprintln!("system error: {err}");
    log::error!(target: "uthreads", "{err}");
    std::process::exit(1);
}
