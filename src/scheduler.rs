//! The ready queue, the blocked/sleeping bookkeeping, and the one true
//! process-wide scheduling decision: which thread runs next.
//!
//! Mirrors the reference's file-scope globals (`threads`, `ready_queue`,
//! `running_thread`, `total_quantums`) as a single `Scheduler` behind a
//! module-scoped singleton, so the public [`crate::api`] surface keeps its
//! plain free-function shape instead of threading a handle through every
//! call.
//!
//! Every operation that can make the running thread stop running (`block`
//! on self, `sleep`, `terminate` on self, and the tick) is split into a
//! pure "decision" half — bookkeeping only, safe to call from tests — and a
//! thin wrapper that performs the real [`context::switch`] when the
//! decision says one is needed. Tests only ever call the decision halves
//! directly, asserting on `Scheduler`'s internal state, rather than
//! actually jumping between thread stacks: see the `tests` module below.

use std::collections::VecDeque;

use spin::Mutex;

use crate::config::{Config, MAX_THREAD_NUM};
use crate::context::{self, Context};
use crate::critical_section;
use crate::error::Error;
use crate::thread_table::{ThreadRecord, ThreadState, ThreadTable};
use crate::timer;

pub struct Scheduler {
    table: ThreadTable,
    ready_queue: VecDeque<usize>,
    running_id: usize,
    total_quantums: u64,
    #[allow(dead_code)]
    config: Config,
}

static SCHEDULER: Mutex<Option<Scheduler>> = Mutex::new(None);

fn require(slot: &mut Option<Scheduler>, operation: &'static str) -> Result<&mut Scheduler, Error> {
    slot.as_mut().ok_or(Error::InvalidArgument {
        operation,
        detail: "uthreads::init has not been called",
    })
}

/// Resolves `tid` to a live table id, or fails `NoSuchThread` — the lookup
/// shape shared by `terminate`, `resume`, and `get_quantums`.
fn lookup(sched: &Scheduler, tid: i32, operation: &'static str) -> Result<usize, Error> {
    if tid < 0 || tid as usize >= MAX_THREAD_NUM || !sched.table.contains(tid as usize) {
        return Err(Error::NoSuchThread { operation, tid });
    }
    Ok(tid as usize)
}

/// `block`'s own, looser validation: the reference folds "no such thread"
/// into the same `InvalidArgument` bucket as "tid is 0" or "tid out of
/// range", rather than raising `NoSuchThread` — see the design notes' open
/// question about `block`'s inconsistent range checking.
fn lookup_for_block(sched: &Scheduler, tid: i32) -> Result<usize, Error> {
    if tid <= 0 || tid as usize >= MAX_THREAD_NUM || !sched.table.contains(tid as usize) {
        return Err(Error::InvalidArgument {
            operation: "block",
            detail: "tid is 0, out of range, or does not name a live thread",
        });
    }
    Ok(tid as usize)
}

/// Picks the next id to run: optionally requeues `current_id` at the tail
/// first (callers that are blocking, sleeping, or terminating themselves
/// pass `false`, since the departing thread must not rejoin the queue),
/// then pops the new head and bumps its `run_quantums`.
fn dispatch(sched: &mut Scheduler, requeue_current: bool) -> usize {
    let current_id = sched.running_id;
    if requeue_current {
        sched.ready_queue.push_back(current_id);
    }
    let next_id = sched
        .ready_queue
        .pop_front()
        .expect("ready_queue empty during dispatch: every thread blocked with nothing left to run");
    sched.running_id = next_id;
    if let Some(record) = sched.table.get_mut(next_id) {
        record.run_quantums += 1;
    }
    next_id
}

/// Drops the scheduler lock and exits the critical section a prior
/// `critical_section::raw_enter` opened, for an operation that decided,
/// after all, not to perform a real switch. See `critical_section`'s
/// module docs for why `on_tick`/`block`/`sleep`/`terminate` use
/// `raw_enter`/`raw_exit` instead of the RAII `Guard`.
fn exit_without_switch<T>(guard: spin::MutexGuard<'_, Option<Scheduler>>, value: T) -> T {
    drop(guard);
    critical_section::raw_exit();
    value
}

/// Entry point every spawned thread actually starts at. Looks its own
/// `entry` up by id (the raw context machinery has no way to pass an
/// argument into a freshly made context) and runs it to completion, then
/// self-terminates, since `entry_point` per the external interface is
/// `fn() -> void`, not `fn() -> !`.
extern "C" fn trampoline() -> ! {
    let id = get_tid() as usize;
    let entry = SCHEDULER
        .lock()
        .as_ref()
        .and_then(|s| s.table.get(id))
        .and_then(|r| r.entry);

    if let Some(entry) = entry {
        entry();
    }

    let _ = terminate(id as i32);
    unreachable!("terminate(self) returned control to the trampoline")
}

pub fn init(quantum_usecs: u64) -> Result<(), Error> {
    if quantum_usecs == 0 {
        return Err(Error::InvalidArgument {
            operation: "init",
            detail: "quantum_usecs must be > 0",
        });
    }

    let mut table = ThreadTable::new();
    table.insert(ThreadRecord::main());
    // Thread 0 is RUNNING from the moment `init` returns, for the one
    // quantum `total_quantums` is about to count below — credit it now,
    // since `dispatch` only ever increments `run_quantums` for threads it
    // is switching *into*, and main is never dispatched into this way.
    table.get_mut(0).unwrap().run_quantums = 1;

    let fresh = Scheduler {
        table,
        ready_queue: VecDeque::new(),
        running_id: 0,
        total_quantums: 1,
        config: Config::new(quantum_usecs),
    };

    critical_section::enter(|| {
        *SCHEDULER.lock() = Some(fresh);
    });

    log::debug!(target: "uthreads", "init: quantum_usecs={quantum_usecs}");
    timer::configure(quantum_usecs)
}

pub fn spawn(entry: extern "C" fn()) -> Result<i32, Error> {
    critical_section::enter(|| {
        let mut guard = SCHEDULER.lock();
        let sched = require(&mut guard, "spawn")?;

        let id = sched
            .table
            .allocate_id()
            .ok_or(Error::Capacity { operation: "spawn" })?;
        let record = ThreadRecord::spawned(id, entry, trampoline);
        sched.table.insert(record);
        sched.ready_queue.push_back(id);

        log::trace!(target: "uthreads", "spawn: tid={id} ready_queue_len={}", sched.ready_queue.len());
        Ok(id as i32)
    })
}

#[cfg(not(test))]
fn exit_process(code: i32) -> ! {
    std::process::exit(code);
}

/// Test builds never call a real `exit`: doing so would tear down the whole
/// test binary instead of just the simulated thread library. The test that
/// exercises `terminate(0)` asserts on this panic instead of on a process
/// exit code.
#[cfg(test)]
fn exit_process(code: i32) -> ! {
    panic!("uthreads::terminate(0) would exit the process with status {code}");
}

/// Removes every thread from the table, leaving it empty. Split out of
/// `terminate_main` so a test can exercise the draining itself, separately
/// from the process exit that follows it for real `terminate(0)` calls.
fn drain_all(sched: &mut Scheduler) {
    let ids: Vec<usize> = sched.table.ids().collect();
    for id in &ids {
        sched.table.remove(*id);
    }
    log::debug!(target: "uthreads", "terminate(0): released {} threads", ids.len());
}

fn terminate_main() -> ! {
    let mut guard = SCHEDULER.lock();
    if let Some(sched) = guard.as_mut() {
        drain_all(sched);
    }
    *guard = None;
    drop(guard);
    exit_process(0)
}

/// Pure bookkeeping half of `terminate`: drops `id` from every structure
/// that tracks it, and — if it was the running thread — performs the
/// scheduling decision for what runs next, without touching real execution
/// context. Returns `Some(next_id)` exactly when a real switch is needed.
fn terminate_decision(sched: &mut Scheduler, id: usize) -> Option<usize> {
    sched.ready_queue.retain(|&queued| queued != id);
    let was_running = id == sched.running_id;
    sched.table.remove(id);
    log::debug!(target: "uthreads", "terminate: tid={id}");
    if was_running {
        Some(dispatch(sched, false))
    } else {
        None
    }
}

pub fn terminate(tid: i32) -> Result<(), Error> {
    if tid == 0 {
        terminate_main();
    }

    critical_section::raw_enter();
    let mut guard = SCHEDULER.lock();

    let sched = match require(&mut guard, "terminate") {
        Ok(sched) => sched,
        Err(err) => return exit_without_switch(guard, Err(err)),
    };
    let id = match lookup(sched, tid, "terminate") {
        Ok(id) => id,
        Err(err) => return exit_without_switch(guard, Err(err)),
    };

    let next_id = match terminate_decision(sched, id) {
        Some(next_id) => next_id,
        None => return exit_without_switch(guard, Ok(())),
    };
    let next_depth = sched.table.get(next_id).unwrap().critical_depth;
    let next_ctx: *const Context = &sched.table.get(next_id).unwrap().context;
    drop(guard);

    // Terminating self never returns: the departing context is simply
    // discarded rather than saved, so a throwaway `Context` stands in
    // for "current" on this one-way switch. `id`'s stack was just
    // freed by `terminate_decision` above and this thread is still
    // executing on top of it for these last few instructions; nothing
    // else may allocate before the switch away completes. Since this
    // context is discarded rather than resumed later, there is no depth
    // to save for it — only the incoming thread's saved depth matters.
    critical_section::force_depth(next_depth);
    let mut discarded = Context::empty();
    unsafe { context::switch(&mut discarded, &*next_ctx) };
    unreachable!("terminate(self) context switch returned control")
}

/// Outcome of the pure half of `block`, mirroring its three branches.
enum BlockOutcome {
    /// Already blocked; no state changed.
    NoOp,
    /// A non-running thread was marked blocked; nothing to switch.
    Blocked,
    /// The running thread blocked itself; a real switch to `next_id` is
    /// needed to actually stop running it.
    SelfBlocked { next_id: usize },
}

fn block_decision(sched: &mut Scheduler, id: usize) -> BlockOutcome {
    let running_id = sched.running_id;
    let record = sched.table.get_mut(id).unwrap();
    if record.explicitly_blocked {
        return BlockOutcome::NoOp;
    }
    record.explicitly_blocked = true;
    log::trace!(target: "uthreads", "block: tid={id}");

    if id != running_id {
        sched.ready_queue.retain(|&queued| queued != id);
        return BlockOutcome::Blocked;
    }
    BlockOutcome::SelfBlocked {
        next_id: dispatch(sched, false),
    }
}

pub fn block(tid: i32) -> Result<(), Error> {
    let depth = critical_section::raw_enter();
    let mut guard = SCHEDULER.lock();

    let sched = match require(&mut guard, "block") {
        Ok(sched) => sched,
        Err(err) => return exit_without_switch(guard, Err(err)),
    };
    let id = match lookup_for_block(sched, tid) {
        Ok(id) => id,
        Err(err) => return exit_without_switch(guard, Err(err)),
    };

    let next_id = match block_decision(sched, id) {
        BlockOutcome::NoOp | BlockOutcome::Blocked => return exit_without_switch(guard, Ok(())),
        BlockOutcome::SelfBlocked { next_id } => next_id,
    };

    // This thread is switched away from here; save the depth it was at so
    // whichever later dispatch resumes it can restore the signal mask to
    // match, via `force_depth`, rather than relying on this call's own
    // `Guard` (there isn't one) to still be on the stack when it resumes.
    sched.table.get_mut(id).unwrap().critical_depth = depth;
    let next_depth = sched.table.get(next_id).unwrap().critical_depth;
    let current_ctx: *mut Context = &mut sched.table.get_mut(id).unwrap().context;
    let next_ctx: *const Context = &sched.table.get(next_id).unwrap().context;
    drop(guard);

    critical_section::force_depth(next_depth);
    unsafe { context::switch(&mut *current_ctx, &*next_ctx) };
    // Resumed: some later dispatch already restored this depth for us via
    // `force_depth` before switching back in, so just exit normally.
    critical_section::raw_exit();
    Ok(())
}

pub fn resume(tid: i32) -> Result<(), Error> {
    critical_section::enter(|| {
        let mut guard = SCHEDULER.lock();
        let sched = require(&mut guard, "resume")?;
        let id = lookup(sched, tid, "resume")?;
        let running_id = sched.running_id;

        let record = sched.table.get_mut(id).unwrap();
        let previous_state = record.state(id == running_id);
        record.explicitly_blocked = false;

        if matches!(previous_state, ThreadState::Ready | ThreadState::Running) {
            return Ok(());
        }
        if record.sleep_until.is_none() {
            sched.ready_queue.push_back(id);
            log::trace!(target: "uthreads", "resume: tid={id} rejoins ready_queue");
        }
        Ok(())
    })
}

/// Pure half of `sleep`: records the wake time and performs the scheduling
/// decision, returning the id to switch into.
fn sleep_decision(sched: &mut Scheduler, running_id: usize, wake_at: u64) -> usize {
    sched.table.get_mut(running_id).unwrap().sleep_until = Some(wake_at);
    log::trace!(target: "uthreads", "sleep: tid={running_id} wake_at={wake_at}");
    dispatch(sched, false)
}

pub fn sleep(num_quantums: i64) -> Result<(), Error> {
    let depth = critical_section::raw_enter();
    let mut guard = SCHEDULER.lock();

    let sched = match require(&mut guard, "sleep") {
        Ok(sched) => sched,
        Err(err) => return exit_without_switch(guard, Err(err)),
    };

    if num_quantums <= 0 {
        return exit_without_switch(
            guard,
            Err(Error::InvalidArgument {
                operation: "sleep",
                detail: "num_quantums must be > 0",
            }),
        );
    }
    let running_id = sched.running_id;
    if running_id == 0 {
        return exit_without_switch(
            guard,
            Err(Error::InvalidArgument {
                operation: "sleep",
                detail: "the main thread cannot sleep",
            }),
        );
    }
    let wake_at = sched.total_quantums + num_quantums as u64 + 1;

    let next_id = sleep_decision(sched, running_id, wake_at);
    sched.table.get_mut(running_id).unwrap().critical_depth = depth;
    let next_depth = sched.table.get(next_id).unwrap().critical_depth;
    let current_ctx: *mut Context = &mut sched.table.get_mut(running_id).unwrap().context;
    let next_ctx: *const Context = &sched.table.get(next_id).unwrap().context;
    drop(guard);

    critical_section::force_depth(next_depth);
    unsafe { context::switch(&mut *current_ctx, &*next_ctx) };
    critical_section::raw_exit();
    Ok(())
}

pub fn get_tid() -> i32 {
    match SCHEDULER.lock().as_ref() {
        Some(sched) => sched.running_id as i32,
        None => 0,
    }
}

pub fn get_total_quantums() -> u64 {
    match SCHEDULER.lock().as_ref() {
        Some(sched) => sched.total_quantums,
        None => 0,
    }
}

pub fn get_quantums(tid: i32) -> Result<u64, Error> {
    critical_section::enter(|| {
        let guard = SCHEDULER.lock();
        let sched = guard.as_ref().ok_or(Error::InvalidArgument {
            operation: "get_quantums",
            detail: "uthreads::init has not been called",
        })?;
        let id = lookup(sched, tid, "get_quantums")?;
        Ok(sched.table.get(id).unwrap().run_quantums)
    })
}

/// Pure half of `on_tick`: advances `total_quantums`, wakes due sleepers,
/// and performs the round-robin dispatch decision. Returns the `(current,
/// next)` ids so the caller can decide whether a real switch is needed.
fn tick_decision(sched: &mut Scheduler) -> (usize, usize) {
    sched.total_quantums += 1;

    let woken: Vec<usize> = sched
        .table
        .ids()
        .filter(|&id| {
            sched
                .table
                .get(id)
                .and_then(|r| r.sleep_until)
                .is_some_and(|wake_at| wake_at <= sched.total_quantums)
        })
        .collect();
    for id in woken {
        let record = sched.table.get_mut(id).unwrap();
        record.sleep_until = None;
        if !record.explicitly_blocked {
            sched.ready_queue.push_back(id);
            log::trace!(target: "uthreads", "on_tick: tid={id} woke from sleep");
        }
    }

    let current_id = sched.running_id;
    let next_id = dispatch(sched, true);
    log::trace!(
        target: "uthreads",
        "on_tick: total_quantums={} current={current_id} next={next_id}",
        sched.total_quantums
    );
    (current_id, next_id)
}

/// Advances one quantum and, if the decision picked a different thread,
/// performs the real switch. Invoked by [`crate::timer`] from the real
/// `SIGVTALRM` handler.
pub(crate) fn on_tick() {
    let depth = critical_section::raw_enter();
    let mut guard = SCHEDULER.lock();
    let sched = match guard.as_mut() {
        Some(sched) => sched,
        None => return exit_without_switch(guard, ()),
    };

    let (current_id, next_id) = tick_decision(sched);
    if current_id == next_id {
        return exit_without_switch(guard, ());
    }

    // `current_id` is switched away from right here; its own `raw_enter`
    // above is the depth it needs restored the next time it is dispatched,
    // since there is no `Guard` left on its stack to remember that for it.
    sched.table.get_mut(current_id).unwrap().critical_depth = depth;
    let next_depth = sched.table.get(next_id).unwrap().critical_depth;
    let current_ctx: *mut Context = &mut sched.table.get_mut(current_id).unwrap().context;
    let next_ctx: *const Context = &sched.table.get(next_id).unwrap().context;
    drop(guard);

    critical_section::force_depth(next_depth);
    unsafe { context::switch(&mut *current_ctx, &*next_ctx) };
    // Resumed: our depth was already restored by whichever dispatch
    // switched back into us, via `force_depth`.
    critical_section::raw_exit();
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    extern "C" fn noop() {}

    fn teardown() {
        *SCHEDULER.lock() = None;
    }

    /// Runs `f` against the live scheduler's internals, the same way the
    /// real tick/self-block/self-sleep/self-terminate paths do, but without
    /// ever crossing into a real [`context::switch`] — exactly the
    /// "exercise the invariants directly against internal state" mode the
    /// test tooling design calls for.
    fn with_scheduler<R>(f: impl FnOnce(&mut Scheduler) -> R) -> R {
        let mut guard = SCHEDULER.lock();
        f(guard.as_mut().expect("scheduler not initialized"))
    }

    #[test]
    #[serial]
    fn init_sets_main_thread_state() {
        init(1000).unwrap();
        assert_eq!(get_tid(), 0);
        assert_eq!(get_total_quantums(), 1);
        assert_eq!(get_quantums(0).unwrap(), 1);
        teardown();
    }

    #[test]
    #[serial]
    fn init_rejects_non_positive_quantum() {
        assert!(matches!(init(0), Err(Error::InvalidArgument { .. })));
    }

    #[test]
    #[serial]
    fn spawn_returns_smallest_free_id() {
        init(1000).unwrap();
        let a = spawn(noop).unwrap();
        let b = spawn(noop).unwrap();
        assert_eq!(a, 1);
        assert_eq!(b, 2);
        teardown();
    }

    #[test]
    #[serial]
    fn scenario_s1_basic_round_robin() {
        init(1000).unwrap();
        let a = spawn(noop).unwrap();
        let b = spawn(noop).unwrap();

        let mut schedule = vec![get_tid()];
        for _ in 0..6 {
            with_scheduler(|s| tick_decision(s));
            schedule.push(get_tid());
        }

        assert_eq!(schedule, vec![0, a, b, 0, a, b, 0]);
        assert_eq!(get_quantums(0).unwrap(), 3);
        assert_eq!(get_quantums(a).unwrap(), 2);
        assert_eq!(get_quantums(b).unwrap(), 2);
        assert_eq!(get_total_quantums(), 7);
        teardown();
    }

    #[test]
    #[serial]
    fn scenario_s2_sleep_accounting() {
        init(1000).unwrap();
        let a = spawn(noop).unwrap();

        with_scheduler(|s| tick_decision(s)); // total_quantums=2, 0 -> a
        assert_eq!(get_tid(), a);
        assert_eq!(get_total_quantums(), 2);

        let wake_at = get_total_quantums() + 2 + 1; // sleep(2) arithmetic
        with_scheduler(|s| sleep_decision(s, a as usize, wake_at));

        while get_tid() != a {
            with_scheduler(|s| tick_decision(s));
        }
        assert_eq!(get_total_quantums(), 5);
        teardown();
    }

    #[test]
    #[serial]
    fn scenario_s3_block_resume() {
        init(1000).unwrap();
        let a = spawn(noop).unwrap();
        let b = spawn(noop).unwrap();

        with_scheduler(|s| tick_decision(s)); // 0 -> a
        assert_eq!(get_tid(), a);

        block(b).unwrap();

        let mut schedule = Vec::new();
        for _ in 0..4 {
            with_scheduler(|s| tick_decision(s));
            schedule.push(get_tid());
        }
        assert_eq!(schedule, vec![0, a, 0, a]);

        resume(b).unwrap();
        with_scheduler(|s| tick_decision(s));
        assert_eq!(get_tid(), 0);
        with_scheduler(|s| tick_decision(s));
        assert_eq!(get_tid(), a);
        with_scheduler(|s| tick_decision(s));
        assert_eq!(get_tid(), b);
        teardown();
    }

    #[test]
    #[serial]
    fn scenario_s4_self_termination_skips_dead_thread() {
        init(1000).unwrap();
        let a = spawn(noop).unwrap();

        with_scheduler(|s| tick_decision(s));
        assert_eq!(get_tid(), a);

        with_scheduler(|s| terminate_decision(s, a as usize));
        assert_eq!(get_tid(), 0);
        assert!(matches!(get_quantums(a), Err(Error::NoSuchThread { .. })));
        teardown();
    }

    #[test]
    #[serial]
    fn scenario_s5_drain_all_empties_table() {
        init(1000).unwrap();
        spawn(noop).unwrap();
        spawn(noop).unwrap();
        with_scheduler(drain_all);
        with_scheduler(|s| assert!(s.table.is_empty()));
        teardown();
    }

    #[test]
    #[serial]
    #[should_panic(expected = "would exit the process")]
    fn scenario_s5_terminate_main_exits_process() {
        init(1000).unwrap();
        spawn(noop).unwrap();
        spawn(noop).unwrap();
        terminate(0).unwrap();
    }

    #[test]
    #[serial]
    fn scenario_s6_capacity() {
        init(1000).unwrap();
        for _ in 1..MAX_THREAD_NUM {
            spawn(noop).unwrap();
        }
        assert!(matches!(spawn(noop), Err(Error::Capacity { .. })));

        terminate(1).unwrap();
        let freed = spawn(noop).unwrap();
        assert_eq!(freed, 1);
        teardown();
    }

    #[test]
    #[serial]
    fn block_on_already_blocked_is_noop() {
        init(1000).unwrap();
        let a = spawn(noop).unwrap();
        block(a).unwrap();
        assert!(block(a).is_ok());
        teardown();
    }

    #[test]
    #[serial]
    fn resume_on_ready_thread_is_noop() {
        init(1000).unwrap();
        let a = spawn(noop).unwrap();
        assert!(resume(a).is_ok());
        teardown();
    }

    #[test]
    #[serial]
    fn sleep_rejects_main_thread() {
        init(1000).unwrap();
        assert!(matches!(sleep(1), Err(Error::InvalidArgument { .. })));
        teardown();
    }

    #[test]
    #[serial]
    fn resume_on_sleeping_thread_stays_blocked_until_wake() {
        init(1000).unwrap();
        let a = spawn(noop).unwrap();
        with_scheduler(|s| tick_decision(s)); // 0 -> a, total_quantums=2
        let wake_at = get_total_quantums() + 3 + 1;
        with_scheduler(|s| sleep_decision(s, a as usize, wake_at));

        // a is now sleeping; resume clears explicitly_blocked (already
        // false) but must not ready it early.
        resume(a).unwrap();
        for _ in 0..2 {
            with_scheduler(|s| tick_decision(s));
            assert_ne!(get_tid(), a);
        }
        teardown();
    }
}
