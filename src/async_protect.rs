//! Critical section guarding the object table against interference from
//! asynchronous signals (timer interrupts, I/O completions) that want to
//! mark roots or otherwise touch the OT while the mutator itself is not
//! running a GC cycle.
//!
//! The mutator and collector never run concurrently with each other, but a
//! signal handler can still preempt ordinary execution between two
//! non-atomic OT operations. `AsyncProtect` exists to bound those windows.

use parking_lot::{Mutex, MutexGuard};

/// Reentrant-safe async-protect critical section. `parking_lot::Mutex` is
/// used (rather than `std::sync::Mutex`) for the same reason it's used
/// elsewhere in this corpus for VM-internal locking: no poisoning to
/// thread through every call site, and a lighter uncontended fast path.
pub struct AsyncProtect {
    guard: Mutex<()>,
}

impl AsyncProtect {
    pub fn new() -> Self {
        Self { guard: Mutex::new(()) }
    }

    /// Grab the critical section for the duration of `f`, releasing it
    /// (even on panic, via the guard's `Drop`) when `f` returns.
    pub fn protected<R>(&self, f: impl FnOnce() -> R) -> R {
        let _token = self.grab();
        f()
    }

    /// Grab the critical section directly. Prefer [`AsyncProtect::protected`]
    /// unless the call site needs to interleave other work with the guard
    /// held across multiple statements.
    pub fn grab(&self) -> MutexGuard<'_, ()> {
        self.guard.lock()
    }
}

impl Default for AsyncProtect {
    fn default() -> Self {
        Self::new()
    }
}
