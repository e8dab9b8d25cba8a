//! OT compaction: removes holes from the object table by moving tail
//! entries down over free slots, leaving a forwarding pointer behind, then
//! rewriting every surviving field through those forwarding pointers.
//!
//! Object *bodies* never move — only OTEs do. A freed OTE's body-pointer
//! field is reused to store the new index, avoiding a second parallel
//! table at the cost of reading that field before the slot is reused for
//! anything else (the free-list thread, in the final step).

use log::{debug, trace};

use crate::class::ClassTable;
use crate::collaborator::VmCollaborator;
use crate::oop::{OopRef, OteIndex};
use crate::ote::{Ote, OteBody};
use crate::table::ObjectTable;

#[derive(Debug, Default, Clone, Copy)]
pub struct CompactStats {
    pub moved: usize,
    pub new_high_water: OteIndex,
}

/// Compact the table. Caller is responsible for having already run a full
/// GC cycle (`EmptyZct` + mark/sweep) so no garbage remains to be moved
/// needlessly; this function only linearizes what's left.
///
/// `vm_roots` are forwarded in place before the vacated tail's forwarding
/// pointers are overwritten by the free-list re-threading, exactly like
/// `collaborator.on_compact` — they name OTEs directly (not through the
/// collaborator) so the caller must resolve them here rather than relying
/// on the host to know about them.
pub fn compact(
    table: &mut ObjectTable,
    classes: &ClassTable,
    collaborator: &dyn VmCollaborator,
    vm_roots: &mut [OopRef],
) -> CompactStats {
    let num_permanent = table.num_permanent();
    let capacity = table.capacity();
    let mut first = num_permanent;
    let mut last = capacity - 1;
    let mut moved = 0usize;

    // Two-finger walk: `last` retreats over free slots, `first` advances
    // over occupied ones. Whenever both stop, move the tail entry at
    // `last` down into the hole at `first` and leave a forwarding pointer
    // (the vacated `last` slot's body link) pointing at `first`.
    loop {
        while last > first && table.get(last as OteIndex).is_free() {
            last -= 1;
        }
        while first < last && !table.get(first as OteIndex).is_free() {
            first += 1;
        }
        if first >= last {
            break;
        }

        debug_assert!(table.get(first as OteIndex).is_free());
        debug_assert!(!table.get(last as OteIndex).is_free());

        let moved_entry = table.get(last as OteIndex).clone();
        table.set(first as OteIndex, moved_entry);
        table.set(last as OteIndex, Ote::free(Some(first as OteIndex)));
        moved += 1;
        last -= 1;
    }

    // The fingers can meet on a slot that's itself free, when the whole
    // non-permanent region turned out to hold no live objects (every
    // occupied entry in it was claimed by an earlier move, or there never
    // was one). Retreat past any such slot so `new_high_water` always
    // names a genuinely occupied entry, never an orphaned hole excluded
    // from both the live range and the free list.
    while last > 0 && table.get(last as OteIndex).is_free() {
        last -= 1;
    }

    trace!("compact: {moved} OTEs moved, high water at {last}");

    // `last` now indexes the last occupied slot. Everything after it is
    // free and will be re-threaded below.
    let new_high_water = last as OteIndex;

    // Rewrite phase: for every occupied OTE, any field referencing a now-
    // free OTE has been forwarded — dereference its link to find the
    // object's new home.
    for index in num_permanent..=last {
        if table.get(index as OteIndex).is_free() {
            continue;
        }
        rewrite_entry(table, index as OteIndex);
    }
    let _ = classes;

    // The forwarding pointers left in the vacated tail are only valid up
    // to this point — the free-list re-threading below overwrites them.
    // This is the host's one chance to resolve anything it cached outside
    // the table (registers, a process stack) through them.
    collaborator.on_compact(&Forwarder { table });
    for root in vm_roots.iter_mut() {
        if root.is_ote() {
            *root = forward(table, *root);
        }
    }

    // Thread the free list through the newly-contiguous tail.
    let end = table.capacity();
    let mut cursor = new_high_water as usize + 1;
    table.set_free_head(if cursor < end { Some(cursor as OteIndex) } else { None });
    while cursor < end {
        let next = if cursor + 1 < end { Some((cursor + 1) as OteIndex) } else { None };
        table.set(cursor as OteIndex, Ote::free(next));
        cursor += 1;
    }
    table.set_free_count(end.saturating_sub(new_high_water as usize + 1));

    debug!("compact: complete, {} live OTEs, high water {}", table.live_count(), new_high_water);
    CompactStats { moved, new_high_water }
}

fn rewrite_entry(table: &mut ObjectTable, index: OteIndex) {
    let class = table.get(index).class;
    if class.is_ote() {
        table.get_mut(index).class = forward(table, class);
    }

    if table.get(index).is_bytes() || table.get(index).is_free() {
        return;
    }

    let len = table.get(index).all_fields().len();
    for i in 0..len {
        let field = table.get(index).all_fields()[i];
        if field.is_ote() {
            let forwarded = forward(table, field);
            if let OteBody::Pointers(fields) = &mut table.get_mut(index).body {
                fields[i] = forwarded;
            }
        }
    }
}

/// Resolve `oop` through a forwarding pointer if its target has already
/// been relocated; otherwise return it unchanged.
fn forward(table: &ObjectTable, oop: OopRef) -> OopRef {
    let index = oop.index();
    match &table.get(index).body {
        OteBody::Free { link: Some(new_index) } => OopRef::from_index(*new_index),
        _ => oop,
    }
}

/// Handed to [`VmCollaborator::on_compact`] while the vacated tail still
/// carries forwarding pointers, so the host can resolve anything it cached
/// outside the table before those pointers are overwritten by the
/// free-list re-threading that follows.
pub struct Forwarder<'a> {
    table: &'a ObjectTable,
}

impl Forwarder<'_> {
    pub fn resolve(&self, oop: OopRef) -> OopRef {
        if oop.is_ote() {
            forward(self.table, oop)
        } else {
            oop
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborator::NullCollaborator;
    use crate::ote::OteFlags;

    #[test]
    fn compaction_preserves_field_identity_graph() {
        let mut table = ObjectTable::new(16, 4, 1);
        let classes = ClassTable::new();
        let collaborator = NullCollaborator::new();

        let a = table.allocate(OopRef::nil(), OteFlags::empty(), OteBody::Bytes(Box::new([1])));
        let b = table.allocate(OopRef::nil(), OteFlags::empty(), OteBody::Bytes(Box::new([2])));
        let holder = table.allocate(
            OopRef::nil(),
            OteFlags::empty(),
            OteBody::Pointers(vec![OopRef::from_index(a), OopRef::from_index(b)]),
        );
        // Free `a` to create a hole before `b` and `holder`.
        table.deallocate(a);

        compact(&mut table, &classes, &collaborator, &mut []);

        // holder has moved, but its surviving field still resolves to the
        // byte content that was originally at `b`.
        let new_holder_index = table
            .iter()
            .find(|(_, ote)| matches!(&ote.body, OteBody::Pointers(f) if f.len() == 2))
            .map(|(i, _)| i)
            .unwrap();
        let _ = holder;
        let fields = table.get(new_holder_index).all_fields().to_vec();
        let resolved = table.get(fields[1].index());
        assert!(matches!(&resolved.body, OteBody::Bytes(bytes) if bytes.as_ref() == [2]));
    }

    #[test]
    fn free_list_is_contiguous_after_compaction() {
        let mut table = ObjectTable::new(16, 4, 1);
        let classes = ClassTable::new();
        let collaborator = NullCollaborator::new();

        let mut live = Vec::new();
        for i in 0..10u8 {
            live.push(table.allocate(OopRef::nil(), OteFlags::empty(), OteBody::Bytes(Box::new([i]))));
        }
        for (i, idx) in live.iter().enumerate() {
            if i % 2 == 0 {
                table.deallocate(*idx);
            }
        }

        let stats = compact(&mut table, &classes, &collaborator, &mut []);
        for index in (stats.new_high_water + 1)..table.capacity() as OteIndex {
            assert!(table.get(index).is_free());
        }
    }

    #[test]
    fn entirely_empty_region_leaves_a_valid_free_list() {
        // Every non-permanent entry is free, so the two-finger walk's
        // fingers meet on a free slot rather than an occupied one.
        let mut table = ObjectTable::new(8, 4, 2);
        let classes = ClassTable::new();
        let collaborator = NullCollaborator::new();

        let stats = compact(&mut table, &classes, &collaborator, &mut []);

        assert_eq!(stats.new_high_water, 1, "high water must land on the last permanent entry");
        assert_eq!(table.free_count() + table.live_count(), table.capacity());
        for index in (stats.new_high_water + 1)..table.capacity() as OteIndex {
            assert!(table.get(index).is_free(), "entry {index} must be part of the free list, not orphaned");
        }
    }
}
