//! The mark phase: a toggling-mark, explicit-worklist reachability trace.
//!
//! Marks are toggled rather than cleared: a cycle-wide boolean flips each
//! GC, and an OTE is "reached this cycle" iff its Mark flag equals that
//! boolean. This avoids a dedicated clearing pass over the whole table.
//! Traversal uses an explicit `Vec` as a work-stack rather than recursion,
//! so stack usage is bounded by heap size rather than by graph depth.

use crate::class::ClassTable;
use crate::oop::{OopRef, OteIndex};
use crate::ote::{Ote, OteFlags};
use crate::table::ObjectTable;

/// Owns the cycle-wide toggling mark bit.
#[derive(Debug, Default)]
pub struct MarkState {
    current: bool,
}

impl MarkState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> bool {
        self.current
    }

    /// Flip the current mark for the next cycle. Returns the *old* mark
    /// value (the one every previously-marked object still carries, and
    /// the one a rescued-but-still-dying object is demoted back to by the
    /// sweep phase's finalizer rescue).
    pub fn toggle(&mut self) -> bool {
        let old = self.current;
        self.current = !old;
        old
    }
}

#[inline]
pub fn is_marked(ote: &Ote, mark: bool) -> bool {
    ote.flags.contains(OteFlags::MARK) == mark
}

#[inline]
pub fn set_marked(ote: &mut Ote, mark: bool) {
    if mark {
        ote.flags.insert(OteFlags::MARK);
    } else {
        ote.flags.remove(OteFlags::MARK);
    }
}

/// Depth-first reachability trace from `root`, toggling every visited
/// OTE's mark to `mark`. `no_weakness` forces weak pointer objects to be
/// traced as if every field were strong (the `GC_NO_WEAKNESS` diagnostic).
pub fn mark_accessible_from(
    table: &mut ObjectTable,
    classes: &ClassTable,
    mark: bool,
    no_weakness: bool,
    root: OteIndex,
) {
    let mut worklist = vec![root];
    while let Some(index) = worklist.pop() {
        let ote = table.get(index);
        if ote.is_free() || is_marked(ote, mark) {
            continue;
        }
        set_marked(table.get_mut(index), mark);

        let ote = table.get(index);
        let class = ote.class;
        if class.is_ote() {
            let ci = class.index();
            if !table.get(ci).is_free() && !is_marked(table.get(ci), mark) {
                worklist.push(ci);
            }
        }

        let ote = table.get(index);
        if ote.is_bytes() {
            continue;
        }
        let fixed_fields = classes.spec_for(class.index()).fixed_fields;
        let treat_weak = !no_weakness && ote.is_weak();
        let fields: Vec<OopRef> = if treat_weak {
            ote.strong_fields(fixed_fields).to_vec()
        } else {
            ote.all_fields().to_vec()
        };
        for field in fields {
            if !field.is_ote() {
                continue;
            }
            let fi = field.index();
            if !table.get(fi).is_free() && !is_marked(table.get(fi), mark) {
                worklist.push(fi);
            }
        }
    }
}

/// Handed to [`crate::collaborator::VmCollaborator::mark_roots`] so the
/// host can mark interpreter-owned roots without holding a reference to
/// the whole object memory.
pub struct Marker<'a> {
    table: &'a mut ObjectTable,
    classes: &'a ClassTable,
    mark: bool,
    no_weakness: bool,
}

impl<'a> Marker<'a> {
    pub fn new(table: &'a mut ObjectTable, classes: &'a ClassTable, mark: bool, no_weakness: bool) -> Self {
        Self { table, classes, mark, no_weakness }
    }

    pub fn mark(&mut self, oop: OopRef) {
        if oop.is_ote() {
            mark_accessible_from(self.table, self.classes, self.mark, self.no_weakness, oop.index());
        }
    }

    pub fn mark_all(&mut self, oops: impl IntoIterator<Item = OopRef>) {
        for oop in oops {
            self.mark(oop);
        }
    }
}
