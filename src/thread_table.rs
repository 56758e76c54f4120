//! Fixed-capacity registry mapping thread id → thread record.
//!
//! Plays the same role the reference's `std::map<size_t, Thread*> threads`
//! does, but backed by a flat, pre-sized slot array (indexed directly by id)
//! rather than a tree, since ids are already small dense integers bounded by
//! [`MAX_THREAD_NUM`].

use crate::config::{MAX_THREAD_NUM, STACK_SIZE};
use crate::context::Context;

/// Derived scheduling state of a thread. Not stored directly — computed from
/// `explicitly_blocked` and `sleep_until`, per the two-predicate model in
/// the data model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Ready,
    Running,
    Blocked,
}

/// A single thread's bookkeeping: its stack, saved context, and scheduling
/// metadata.
pub struct ThreadRecord {
    pub id: usize,
    pub run_quantums: u64,
    pub context: Context,
    pub sleep_until: Option<u64>,
    pub explicitly_blocked: bool,
    /// The critical-section gate depth this thread had when it was last
    /// switched away from (see [`crate::critical_section`]), restored via
    /// `force_depth` the next time it is dispatched. A thread that has
    /// never been suspended — including a freshly spawned one — starts at
    /// 0, so it begins running with the tick signal unblocked.
    pub critical_depth: u32,
    /// The caller-supplied entry point, invoked by the shared trampoline
    /// once this thread is first dispatched. `None` for the main thread,
    /// which never starts via the trampoline.
    pub entry: Option<extern "C" fn()>,
    /// Owns the stack the context's `rsp` points into. Boxed so the record
    /// itself can move (e.g. inside the table's `Vec`) without invalidating
    /// pointers into the stack.
    stack: Box<[u8; STACK_SIZE]>,
}

impl ThreadRecord {
    fn new(id: usize) -> Self {
        ThreadRecord {
            id,
            run_quantums: 0,
            context: Context::empty(),
            sleep_until: None,
            explicitly_blocked: false,
            critical_depth: 0,
            entry: None,
            stack: Box::new([0u8; STACK_SIZE]),
        }
    }

    /// Builds the main thread's record (id 0): no fresh stack or context is
    /// prepared, since thread 0 is already running on the process's own
    /// stack and its context is only ever captured in place, never used to
    /// start it from `entry`.
    pub fn main() -> Self {
        ThreadRecord::new(0)
    }

    /// Builds a spawned thread's record. `entry` is recorded for the shared
    /// trampoline to call; the context is built to start at `trampoline`
    /// itself, since `entry` has no `-> !` guarantee and the raw context
    /// machinery only ever starts a thread at a function that never returns.
    pub fn spawned(
        id: usize,
        entry: extern "C" fn(),
        trampoline: extern "C" fn() -> !,
    ) -> Self {
        let mut record = ThreadRecord::new(id);
        record.entry = Some(entry);
        unsafe {
            crate::context::make(&mut record.context, record.stack.as_mut_slice(), trampoline);
        }
        record
    }

    /// Derives this thread's externally-visible state. `running` is passed
    /// in rather than stored, since "am I the running thread" is a property
    /// of the scheduler's `running_id`, not of the record itself.
    pub fn state(&self, running: bool) -> ThreadState {
        if running {
            ThreadState::Running
        } else if self.explicitly_blocked || self.sleep_until.is_some() {
            ThreadState::Blocked
        } else {
            ThreadState::Ready
        }
    }
}

/// Fixed-capacity id → record registry. Id 0 is reserved for main and is
/// always present once the table is initialized.
pub struct ThreadTable {
    slots: Vec<Option<ThreadRecord>>,
}

impl ThreadTable {
    pub fn new() -> Self {
        let mut slots = Vec::with_capacity(MAX_THREAD_NUM);
        slots.resize_with(MAX_THREAD_NUM, || None);
        ThreadTable { slots }
    }

    /// Smallest unused id greater than 0, or `None` if every slot is taken.
    pub fn allocate_id(&self) -> Option<usize> {
        (1..MAX_THREAD_NUM).find(|&id| self.slots[id].is_none())
    }

    pub fn insert(&mut self, record: ThreadRecord) {
        let id = record.id;
        self.slots[id] = Some(record);
    }

    pub fn get(&self, id: usize) -> Option<&ThreadRecord> {
        self.slots.get(id)?.as_ref()
    }

    pub fn get_mut(&mut self, id: usize) -> Option<&mut ThreadRecord> {
        self.slots.get_mut(id)?.as_mut()
    }

    pub fn contains(&self, id: usize) -> bool {
        self.get(id).is_some()
    }

    pub fn remove(&mut self, id: usize) -> Option<ThreadRecord> {
        self.slots.get_mut(id)?.take()
    }

    /// All live ids, in ascending order. Used only by `terminate(0)` to tear
    /// everything down and by tests asserting the table drains cleanly.
    pub fn ids(&self) -> impl Iterator<Item = usize> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(id, slot)| slot.as_ref().map(|_| id))
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }
}
