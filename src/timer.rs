//! Configures the recurring virtual-time tick and wires it to
//! [`crate::scheduler::on_tick`].
//!
//! `SIGVTALRM` backed by `ITIMER_VIRTUAL` counts only the process's
//! user-mode CPU time, so a thread parked in `sleep` or `block` burns no
//! virtual time and cannot itself cause a spurious tick: idle/blocked wall
//! time never consumes a quantum.

use crate::error::Error;

/// Installs the `SIGVTALRM` handler and arms `ITIMER_VIRTUAL` to fire every
/// `period_usecs` microseconds, starting after one full period.
///
/// The kernel blocks `SIGVTALRM` for the duration of its own handler by
/// default (no `SA_NODEFER` is requested), which is exactly the
/// reentrancy-freedom the tick handler needs: `on_tick` can never be
/// invoked while a prior invocation is still running.
pub fn configure(period_usecs: u64) -> Result<(), Error> {
    install_handler()?;
    arm(period_usecs)
}

fn install_handler() -> Result<(), Error> {
    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = handle_tick as usize;
        libc::sigemptyset(&mut action.sa_mask);
        action.sa_flags = 0;

        let rc = libc::sigaction(libc::SIGVTALRM, &action, std::ptr::null_mut());
        if rc < 0 {
            return Err(Error::HostFailure {
                operation: "timer::configure",
                detail: "sigaction installation failed",
            });
        }
    }
    Ok(())
}

fn arm(period_usecs: u64) -> Result<(), Error> {
    let interval = libc::timeval {
        tv_sec: (period_usecs / 1_000_000) as libc::time_t,
        tv_usec: (period_usecs % 1_000_000) as libc::suseconds_t,
    };
    let timer = libc::itimerval {
        it_interval: interval,
        it_value: interval,
    };

    let rc = unsafe { libc::setitimer(libc::ITIMER_VIRTUAL, &timer, std::ptr::null_mut()) };
    if rc < 0 {
        return Err(Error::HostFailure {
            operation: "timer::configure",
            detail: "setitimer failed",
        });
    }
    Ok(())
}

/// The raw signal handler. Runs with `SIGVTALRM` implicitly masked by the
/// kernel for its own duration; forwards straight into the scheduler, which
/// performs the context switch and never returns here when it switches
/// threads (it only returns if the running thread's own tick handling
/// decided not to switch).
extern "C" fn handle_tick(_signum: libc::c_int) {
    crate::scheduler::on_tick();
}

