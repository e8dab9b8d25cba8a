//! The sweep phase: three passes over the dying set built by the mark
//! phase — finalizer rescue, weak bereavement, then deallocation.
//!
//! The three passes are intentionally kept separate (mirroring the
//! reference design exactly) rather than folded into one scan: weak
//! bereavement must see the *post-rescue* mark state, so that a weak
//! reference to an object only kept alive by a finalizable object isn't
//! wrongly nilled, and deallocation must re-check the *post-bereavement*
//! mark state, so that a rescued mourner doesn't get freed out from under
//! its own bereavement notification.

use log::{trace, warn};

use crate::class::ClassTable;
use crate::collaborator::VmCollaborator;
use crate::mark::{is_marked, mark_accessible_from, set_marked};
use crate::oop::{OopRef, OteIndex};
use crate::ote::OteFlags;
use crate::table::ObjectTable;
use crate::zct::Zct;

/// Tallies from a single sweep, surfaced through `debug!`-level logging by
/// the caller.
#[derive(Debug, Default, Clone, Copy)]
pub struct SweepStats {
    pub reclaimed: u32,
    pub bytes_reclaimed: usize,
    pub queued_for_finalization: u32,
    pub queued_for_bereavement: u32,
}

/// Run the sweep phase. `mark` is the current cycle's mark value (set by
/// the mark phase that must run immediately before this); `old_mark` is
/// the value every previously-live object still carries, and the value a
/// rescued finalization candidate is demoted back to so it still reads as
/// dying until pass 3 re-examines it.
pub fn sweep(
    table: &mut ObjectTable,
    classes: &ClassTable,
    zct: &mut Zct,
    collaborator: &dyn VmCollaborator,
    mark: bool,
    old_mark: bool,
    no_weakness: bool,
    bereavement_warn_threshold: u32,
    corpse: OopRef,
) -> SweepStats {
    let mut stats = SweepStats::default();
    let num_permanent = table.num_permanent();
    // With the `finalization` feature off, the restricted build variant
    // treats every dying object as ordinary: no rescue, no weak scan, no
    // bereavement queueing.
    let finalization_enabled = cfg!(feature = "finalization");

    // Pass 1: build the dying list, rescuing finalization candidates'
    // transitive closures in place.
    let occupied: Vec<OteIndex> = table
        .iter()
        .filter(|(idx, ote)| *idx as usize >= num_permanent && !ote.is_free() && !ote.is_sticky())
        .map(|(idx, _)| idx)
        .collect();

    let mut dying = Vec::new();
    for idx in occupied.iter().copied() {
        if is_marked(table.get(idx), mark) {
            continue;
        }
        dying.push(idx);
        if finalization_enabled && table.get(idx).needs_finalization() {
            mark_accessible_from(table, classes, mark, no_weakness, idx);
            set_marked(table.get_mut(idx), old_mark);
        }
    }
    trace!("sweep: {} dying candidates after pass 1", dying.len());

    // Pass 2: weak bereavement. A wholly separate scan so that nilling a
    // weak slot only happens after every finalizer rescue has already
    // promoted its closure — otherwise we'd nil a weak reference to an
    // object a finalizable object still needs.
    if finalization_enabled && !no_weakness {
        for idx in occupied.iter().copied() {
            if table.get(idx).is_free() || !table.get(idx).is_weak() {
                continue;
            }
            let class = table.get(idx).class;
            let fixed_fields = classes.spec_for(class.index()).fixed_fields;
            let weak_slots = table.get(idx).weak_fields(fixed_fields).to_vec();

            let mut losses = 0u32;
            let mut corpses = Vec::with_capacity(weak_slots.len());
            for field in &weak_slots {
                if field.is_immediate() {
                    corpses.push(*field);
                    continue;
                }
                let fi = field.index();
                let field_is_free = table.get(fi).is_free();
                let field_is_dying = !field_is_free && !is_marked(table.get(fi), mark);
                if field_is_free || field_is_dying {
                    if field_is_dying && table.get_mut(fi).dec_ref() {
                        zct.push(fi);
                    }
                    corpses.push(corpse);
                    losses += 1;
                } else {
                    corpses.push(*field);
                }
            }
            if losses > 0 {
                let weak_fields_mut = table.get_mut(idx).weak_fields_mut(fixed_fields);
                weak_fields_mut.copy_from_slice(&corpses);

                if losses > bereavement_warn_threshold {
                    warn!("weak object {idx} lost {losses} referents in a single cycle");
                }
                if classes.spec_for(class.index()).is_mourner {
                    stats.queued_for_bereavement += 1;
                    collaborator.queue_for_bereavement(OopRef::from_index(idx), losses);
                    // The mourner (and its closure) must survive to observe
                    // its own loss.
                    mark_accessible_from(table, classes, mark, no_weakness, idx);
                }
            }
        }
    }

    // Pass 3: walk the captured dying list again (not a fresh OT scan) and
    // either finalize-and-rescue or truly deallocate.
    for idx in dying {
        if is_marked(table.get(idx), mark) {
            // Promoted to current mark by pass 1 or pass 2's rescue:
            // survived this cycle, nothing further to do.
            continue;
        }

        if finalization_enabled && table.get(idx).needs_finalization() {
            collaborator.queue_for_finalization(OopRef::from_index(idx));
            table.get_mut(idx).flags.remove(OteFlags::FINALIZE);
            set_marked(table.get_mut(idx), mark);
            stats.queued_for_finalization += 1;
            continue;
        }

        let class = table.get(idx).class;
        if class.is_ote() {
            if table.get(class.index()).is_free() {
                warn!("dying object {idx} has an already-freed class {}", class.index());
            } else if table.get_mut(class.index()).dec_ref() {
                zct.push(class.index());
            }
        }

        let fields: Vec<OopRef> = table.get(idx).all_fields().to_vec();
        for field in fields {
            if field.is_ote() && !table.get(field.index()).is_free() {
                let fi = field.index();
                if table.get_mut(fi).dec_ref() {
                    zct.push(fi);
                }
            }
        }

        stats.bytes_reclaimed += table.get(idx).body.byte_size();
        table.get_mut(idx).refcount = 0;
        table.deallocate(idx);
        stats.reclaimed += 1;
    }

    trace!(
        "sweep: reclaimed {} objects ({} bytes), {} queued for finalization, {} queued for bereavement",
        stats.reclaimed, stats.bytes_reclaimed, stats.queued_for_finalization, stats.queued_for_bereavement
    );
    stats
}
