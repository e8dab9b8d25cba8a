//! The Zero-Count Table: the bridge between deferred reference counting and
//! the tracing collector.
//!
//! `decref` never frees an object immediately when its count reaches zero —
//! the active process stack is not reference-counted during normal
//! execution, so a refcount of zero does not yet mean "unreachable". The
//! object is instead pushed here, and a GC cycle reconciles the table
//! against the stack before trusting it.

use log::trace;

use crate::oop::{OopRef, OteIndex};
use crate::table::ObjectTable;

/// Holds OTEs whose reference count has dropped to zero but have not yet
/// been proven unreachable.
#[derive(Default)]
pub struct Zct {
    entries: Vec<OteIndex>,
    reconciling: bool,
}

impl Zct {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `index`'s refcount just hit zero. No-op while
    /// `EmptyZct` is reconciling, matching `IsReconcilingZct` in the
    /// source: entries must not be added while the table itself is being
    /// drained.
    pub fn push(&mut self, index: OteIndex) {
        if !self.reconciling {
            self.entries.push(index);
        }
    }

    pub fn is_reconciling(&self) -> bool {
        self.reconciling
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, index: OteIndex) -> bool {
        self.entries.contains(&index)
    }

    pub fn iter(&self) -> impl Iterator<Item = OteIndex> + '_ {
        self.entries.iter().copied()
    }

    /// Reconcile the ZCT against the active stack: increment every OTE the
    /// stack mentions (so references it holds are no longer invisible to
    /// the refcount), then drain the table. An entry whose count is still
    /// zero after that is genuinely unreachable and is freed immediately
    /// (acyclic garbage — cycles are left for the tracer to find). An
    /// entry whose count became nonzero is simply dropped from the table.
    pub fn empty(&mut self, table: &mut ObjectTable, active_stack: &[OopRef]) {
        trace!("EmptyZct: reconciling {} entries against {} stack refs", self.entries.len(), active_stack.len());
        for &oop in active_stack {
            if oop.is_ote() {
                table.get_mut(oop.index()).inc_ref();
            }
        }

        self.reconciling = true;
        let drained = std::mem::take(&mut self.entries);
        let mut freed = 0u32;
        for index in drained {
            if table.get(index).is_free() {
                continue;
            }
            if table.get(index).refcount == 0 {
                free_recursive(table, index);
                freed += 1;
            }
        }
        self.reconciling = false;
        trace!("EmptyZct: reclaimed {freed} genuinely unreachable objects");
    }

    /// Re-establish the deferred-counting state after a cycle: decrement
    /// every OTE the active stack mentions, pushing any that land on zero
    /// back onto this table.
    pub fn populate(&mut self, table: &mut ObjectTable, active_stack: &[OopRef]) {
        trace!("PopulateZct: decrementing {} stack refs", active_stack.len());
        for &oop in active_stack {
            if oop.is_ote() {
                let index = oop.index();
                if table.get_mut(index).dec_ref() {
                    self.push(index);
                }
            }
        }
    }
}

/// Free `root` and, transitively, any object whose refcount this drops to
/// zero. Used only for acyclic garbage discovered during `EmptyZct`
/// reconciliation — unlike the sweep phase's one-level decref (which relies
/// on the mark phase having already identified the whole dying set), this
/// must cascade because no tracing has happened yet.
pub(crate) fn free_recursive(table: &mut ObjectTable, root: OteIndex) {
    let mut worklist = vec![root];
    while let Some(index) = worklist.pop() {
        if table.get(index).is_free() {
            continue;
        }
        if table.get(index).refcount != 0 {
            continue;
        }
        let class = table.get(index).class;
        let fields: Vec<OopRef> = table.get(index).all_fields().to_vec();

        if class.is_ote() && !table.get(class.index()).is_free() && table.get_mut(class.index()).dec_ref() {
            worklist.push(class.index());
        }
        for field in fields {
            if field.is_ote() && !table.get(field.index()).is_free() && table.get_mut(field.index()).dec_ref() {
                worklist.push(field.index());
            }
        }
        table.deallocate(index);
    }
}
