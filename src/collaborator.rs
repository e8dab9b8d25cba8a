//! The interface the host (interpreter) implements so the collector can
//! reach interpreter-owned roots and hand back finalization/bereavement
//! work without depending on the interpreter directly.

use bitflags::bitflags;

use crate::compact::Forwarder;
use crate::mark::Marker;
use crate::oop::OopRef;

bitflags! {
    /// Flags accepted by [`crate::memory::ObjectMemory::async_gc`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct GcFlags: u32 {
        /// Treat every object as strongly referenced, including weak
        /// slots. Diagnostic only: used by consistency checks and tests
        /// that want the debug auditor to see a fully strong graph.
        const NO_WEAKNESS = 0b01;
    }
}

/// Everything the object memory needs from its host to run a collection
/// cycle. The host implements this once; the collector never reaches
/// outside it for interpreter state.
pub trait VmCollaborator {
    /// Mark every OTE reachable from interpreter-owned roots (registers,
    /// method cache, suspended processes, ...) that aren't already in the
    /// object table's own root region.
    fn mark_roots(&self, marker: &mut Marker<'_>);

    /// Enqueue `ote` for finalization. Called at most once per object
    /// between clears of its Finalize flag.
    fn queue_for_finalization(&self, ote: OopRef);

    /// Enqueue a bereavement notification: `weak_ote` lost `losses` weak
    /// referents this cycle.
    fn queue_for_bereavement(&self, weak_ote: OopRef, losses: u32);

    /// Signal that finalizers and/or bereavement notifications are now
    /// queued and ready for the mutator to drain.
    fn schedule_finalization(&self);

    /// Called once per compaction, while `forwarder` can still resolve OTE
    /// pointers the host cached outside the object table (registers, a
    /// process stack) to their post-compaction home. Overwriting the
    /// free-list immediately afterwards makes this the only window in
    /// which that's possible.
    fn on_compact(&self, forwarder: &Forwarder<'_>);

    /// Read-only view of the active process's stack, for ZCT
    /// reconciliation.
    fn active_stack(&self) -> Vec<OopRef>;
}

/// A collaborator with no interpreter roots, useful for the library's own
/// tests and for embedding contexts that manage roots purely through
/// sticky VM Pointers.
#[derive(Default)]
pub struct NullCollaborator {
    stack: std::sync::Mutex<Vec<OopRef>>,
}

impl NullCollaborator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_stack_ref(&self, oop: OopRef) {
        self.stack.lock().unwrap().push(oop);
    }

    pub fn pop_stack_ref(&self) -> Option<OopRef> {
        self.stack.lock().unwrap().pop()
    }
}

impl VmCollaborator for NullCollaborator {
    fn mark_roots(&self, marker: &mut Marker<'_>) {
        let stack = self.stack.lock().unwrap().clone();
        marker.mark_all(stack);
    }
    fn queue_for_finalization(&self, _ote: OopRef) {}
    fn queue_for_bereavement(&self, _weak_ote: OopRef, _losses: u32) {}
    fn schedule_finalization(&self) {}
    fn on_compact(&self, forwarder: &Forwarder<'_>) {
        let mut stack = self.stack.lock().unwrap();
        for oop in stack.iter_mut() {
            *oop = forwarder.resolve(*oop);
        }
    }
    fn active_stack(&self) -> Vec<OopRef> {
        self.stack.lock().unwrap().clone()
    }
}
