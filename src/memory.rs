//! The top-level `ObjectMemory` type: ties the object table, ZCT, mark,
//! sweep, compaction, and debug-auditor pieces into the surface the
//! interpreter actually calls.

use log::{debug, error, info};

use crate::async_protect::AsyncProtect;
use crate::audit::{audit, AuditReport};
use crate::class::{ClassTable, InstanceSpec};
use crate::collaborator::{GcFlags, VmCollaborator};
use crate::compact::{compact, CompactStats};
use crate::config::ObjectMemoryConfig;
use crate::error::{ObjectMemoryError, Result};
use crate::mark::{mark_accessible_from, Marker, MarkState};
use crate::oop::{OopRef, OteIndex};
use crate::ote::{OteBody, OteFlags};
use crate::sweep::{sweep, SweepStats};
use crate::table::ObjectTable;
use crate::zct::Zct;

/// The object memory: object table, reference counting, and the mark-sweep
/// collector that backs it, as a single owned value (rather than process-
/// wide statics) so independent instances — notably under test — don't
/// interfere with each other.
pub struct ObjectMemory {
    table: ObjectTable,
    classes: ClassTable,
    zct: Zct,
    mark_state: MarkState,
    async_protect: AsyncProtect,
    config: ObjectMemoryConfig,
    corpse: Option<OopRef>,
    /// VM Pointers registered via [`Self::add_vm_refs`]. Traced as
    /// additional roots by every cycle's mark phase, not just pinned
    /// sticky/saturated against refcount decrements — a sticky object
    /// reachable only through a VM Pointer still needs its own closure
    /// marked live, or the tracer would sweep it out from under its sticky
    /// referrer.
    vm_roots: Vec<OopRef>,
}

impl ObjectMemory {
    pub fn new() -> Self {
        Self::with_config(ObjectMemoryConfig::default())
    }

    pub fn with_config(config: ObjectMemoryConfig) -> Self {
        let table = ObjectTable::new(config.initial_ot_capacity, config.ot_growth_size, config.num_permanent);
        Self {
            table,
            classes: ClassTable::new(),
            zct: Zct::new(),
            mark_state: MarkState::new(),
            async_protect: AsyncProtect::new(),
            config,
            corpse: None,
            vm_roots: Vec::new(),
        }
    }

    pub fn config(&self) -> &ObjectMemoryConfig {
        &self.config
    }

    pub fn table(&self) -> &ObjectTable {
        &self.table
    }

    /// Register the distinguished `Corpse` object weak slots are
    /// substituted with on bereavement. Must be called before the first
    /// `async_gc` if the crate is built with weak references enabled.
    pub fn register_corpse(&mut self, corpse: OopRef) {
        self.corpse = Some(corpse);
    }

    pub fn register_class(&mut self, class: OteIndex, spec: InstanceSpec) {
        self.classes.register(class, spec);
    }

    pub fn allocate_pointers(&mut self, class: OopRef, flags: OteFlags, fields: Vec<OopRef>) -> OopRef {
        let _guard = self.async_protect.grab();
        if class.is_ote() {
            self.table.get_mut(class.index()).inc_ref();
        }
        for field in &fields {
            if field.is_ote() {
                self.table.get_mut(field.index()).inc_ref();
            }
        }
        let index = self.table.allocate(class, flags, OteBody::Pointers(fields));
        OopRef::from_index(index)
    }

    pub fn allocate_bytes(&mut self, class: OopRef, flags: OteFlags, bytes: Box<[u8]>) -> OopRef {
        let _guard = self.async_protect.grab();
        if class.is_ote() {
            self.table.get_mut(class.index()).inc_ref();
        }
        let index = self.table.allocate(class, flags | OteFlags::BYTES, OteBody::Bytes(bytes));
        OopRef::from_index(index)
    }

    pub fn inc_ref(&mut self, oop: OopRef) {
        if oop.is_ote() {
            self.table.get_mut(oop.index()).inc_ref();
        }
    }

    /// `decref` of a non-saturated object that lands on zero does not free
    /// it immediately — it's pushed to the ZCT, since the active process
    /// stack isn't ref-counted during normal execution.
    pub fn dec_ref(&mut self, oop: OopRef) {
        if oop.is_ote() {
            let index = oop.index();
            if self.table.get_mut(index).dec_ref() {
                self.zct.push(index);
            }
        }
    }

    /// Write a pointer field, performing `incref(new); decref(old)` in the
    /// order that keeps the refcount correct even if `new == old`.
    pub fn write_field(&mut self, object: OopRef, field_index: usize, new_value: OopRef) {
        let old = match &self.table.get(object.index()).body {
            OteBody::Pointers(fields) => fields[field_index],
            _ => panic!("write_field on a non-pointer OTE"),
        };
        self.inc_ref(new_value);
        if let OteBody::Pointers(fields) = &mut self.table.get_mut(object.index()).body {
            fields[field_index] = new_value;
        }
        self.dec_ref(old);
    }

    /// Mark every VM Pointer sticky and register it as a root the mark
    /// phase traces every cycle. Must run once at image boot before any
    /// reclaiming GC, so well-known singletons — and everything reachable
    /// from them — are never swept: stickiness alone only protects the
    /// pointer object itself from refcount-driven reclamation, it does
    /// nothing for objects reachable only through its fields.
    pub fn add_vm_refs(&mut self, vm_pointers: &[OopRef]) {
        for &oop in vm_pointers {
            if oop.is_ote() {
                self.table.get_mut(oop.index()).flags.insert(OteFlags::STICKY);
                self.table.get_mut(oop.index()).refcount = crate::ote::REFCOUNT_MAX;
                if !self.vm_roots.contains(&oop) {
                    self.vm_roots.push(oop);
                }
            }
        }
    }

    /// Ad-hoc external root marking, bypassing the collaborator's
    /// `mark_roots` callback — used by hosts that want to pin a specific
    /// object live outside a full GC cycle.
    pub fn mark_objects_accessible_from_root(&mut self, root: OopRef, no_weakness: bool) {
        if root.is_ote() {
            let mark = self.mark_state.current();
            mark_accessible_from(&mut self.table, &self.classes, mark, no_weakness, root.index());
        }
    }

    /// `EmptyZct`, mark, sweep — the shared core of a collection cycle,
    /// without `PopulateZct`. Split out so `compact` can run it once and
    /// populate only after the OT has been rewritten, instead of paying
    /// for a whole extra empty/populate round trip.
    fn reclaim(&mut self, flags: GcFlags, collaborator: &dyn VmCollaborator, stack: &[OopRef]) -> Result<SweepStats> {
        let corpse = self.corpse.ok_or_else(|| {
            error!("GC invoked before Corpse registered; refusing cycle");
            ObjectMemoryError::CorpseNotRegistered
        })?;
        let no_weakness = flags.contains(GcFlags::NO_WEAKNESS);
        let _guard = self.async_protect.grab();

        self.zct.empty(&mut self.table, stack);

        let old_mark = self.mark_state.toggle();
        let mark = self.mark_state.current();
        // Fresh allocations from here until the next toggle are stamped
        // with `mark` (see `ObjectTable::set_current_mark`), so they read
        // as live for this cycle rather than spuriously "already marked".
        self.table.set_current_mark(mark);
        mark_accessible_from(&mut self.table, &self.classes, mark, no_weakness, 0);
        for &root in &self.vm_roots {
            if root.is_ote() {
                mark_accessible_from(&mut self.table, &self.classes, mark, no_weakness, root.index());
            }
        }
        {
            let mut marker = Marker::new(&mut self.table, &self.classes, mark, no_weakness);
            collaborator.mark_roots(&mut marker);
        }

        let stats = sweep(
            &mut self.table,
            &self.classes,
            &mut self.zct,
            collaborator,
            mark,
            old_mark,
            no_weakness,
            self.config.bereavement_warn_threshold,
            corpse,
        );
        debug!(
            "GC cycle complete: {} reclaimed ({} bytes), {} queued for finalization, {} queued for bereavement",
            stats.reclaimed, stats.bytes_reclaimed, stats.queued_for_finalization, stats.queued_for_bereavement
        );
        Ok(stats)
    }

    /// Run a full collection cycle: `EmptyZct`, mark, sweep (finalizer
    /// rescue, weak bereavement, deallocation), `PopulateZct`.
    pub fn async_gc(&mut self, flags: GcFlags, collaborator: &dyn VmCollaborator) -> Result<SweepStats> {
        let stack = collaborator.active_stack();

        if self.config.audit_every_gc {
            let _guard = self.async_protect.grab();
            log_audit("pre-GC", audit(&mut self.table, &self.zct, &stack, self.config.async_gc_enabled));
        }

        let stats = self.reclaim(flags, collaborator, &stack)?;

        let _guard = self.async_protect.grab();
        self.zct.populate(&mut self.table, &stack);

        if self.config.audit_every_gc {
            log_audit("post-GC", audit(&mut self.table, &self.zct, &stack, self.config.async_gc_enabled));
        }

        drop(_guard);
        collaborator.schedule_finalization();
        Ok(stats)
    }

    /// Full GC followed by OT compaction. Returns the new high-water
    /// index (the table's new live-entry count).
    ///
    /// `EmptyZct`/reclaim runs once, then the OT is rewritten, then
    /// `PopulateZct` runs once. The stack snapshot taken before compaction
    /// is stale the moment any OTE it names has moved, so it's run through
    /// the same forwarding pointers `rewrite_entry` uses internally before
    /// `PopulateZct` touches it — `on_compact`'s own job is narrower: it
    /// tells the host to fix up whatever *it* cached outside this call.
    pub fn compact(&mut self, collaborator: &dyn VmCollaborator) -> Result<OteIndex> {
        let stack = collaborator.active_stack();

        if self.config.audit_every_gc {
            let _guard = self.async_protect.grab();
            log_audit("pre-GC", audit(&mut self.table, &self.zct, &stack, self.config.async_gc_enabled));
        }

        self.reclaim(GcFlags::empty(), collaborator, &stack)?;

        let _guard = self.async_protect.grab();
        let CompactStats { moved, new_high_water } =
            compact(&mut self.table, &self.classes, collaborator, &mut self.vm_roots);
        info!("compact: OT size {} -> {moved} OTEs moved, high water {new_high_water}", self.table.capacity());

        // `compact` gave the collaborator a chance (via `on_compact`) to
        // forward whatever it cached while the forwarding pointers were
        // still live; read its stack again now that it's had that chance.
        let stack = collaborator.active_stack();
        self.zct.populate(&mut self.table, &stack);

        if self.config.audit_every_gc {
            log_audit("post-GC", audit(&mut self.table, &self.zct, &stack, self.config.async_gc_enabled));
        }

        drop(_guard);
        collaborator.schedule_finalization();
        Ok(new_high_water)
    }
}

impl Default for ObjectMemory {
    fn default() -> Self {
        Self::new()
    }
}

fn log_audit(when: &str, report: AuditReport) {
    if report.is_clean() {
        debug!("refcount audit ({when}): clean");
    } else {
        debug!(
            "refcount audit ({when}): {} too small, {} too large, {} zero-not-in-zct",
            report.too_small, report.too_large, report.zero_not_in_zct
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborator::NullCollaborator;

    fn memory_with_corpse() -> (ObjectMemory, NullCollaborator) {
        let mut memory = ObjectMemory::with_config(ObjectMemoryConfig {
            initial_ot_capacity: 16,
            ot_growth_size: 8,
            num_permanent: 2,
            ..Default::default()
        });
        let corpse = memory.allocate_bytes(OopRef::nil(), OteFlags::empty(), Box::new([]));
        memory.add_vm_refs(&[corpse]);
        memory.register_corpse(corpse);
        let collaborator = NullCollaborator::new();
        (memory, collaborator)
    }

    #[test]
    fn refuses_gc_before_corpse_registered() {
        let mut memory = ObjectMemory::with_config(ObjectMemoryConfig {
            initial_ot_capacity: 16,
            num_permanent: 2,
            ..Default::default()
        });
        let collaborator = NullCollaborator::new();
        let result = memory.async_gc(GcFlags::empty(), &collaborator);
        assert!(matches!(result, Err(ObjectMemoryError::CorpseNotRegistered)));
    }

    #[test]
    fn unreachable_cycle_is_collected_end_to_end() {
        let (mut memory, collaborator) = memory_with_corpse();
        let a = memory.allocate_pointers(OopRef::nil(), OteFlags::empty(), vec![OopRef::nil()]);
        let b = memory.allocate_pointers(OopRef::nil(), OteFlags::empty(), vec![a]);
        memory.write_field(a, 0, b);

        let free_before = memory.table().free_count();
        let stats = memory.async_gc(GcFlags::empty(), &collaborator).unwrap();
        assert_eq!(stats.reclaimed, 2);
        assert_eq!(memory.table().free_count(), free_before + 2);
    }

    #[test]
    fn zct_reconciliation_scenario() {
        let (mut memory, collaborator) = memory_with_corpse();
        let d = memory.allocate_bytes(OopRef::nil(), OteFlags::empty(), Box::new([]));
        memory.inc_ref(d); // a heap slot holds a reference to d
        collaborator.push_stack_ref(d);
        memory.dec_ref(d); // drop the heap ref; refcount hits zero, lands in ZCT

        memory.async_gc(GcFlags::empty(), &collaborator).unwrap();
        assert!(!memory.table().get(d.index()).is_free(), "stack-held object must survive");

        collaborator.pop_stack_ref();
        memory.async_gc(GcFlags::empty(), &collaborator).unwrap();
        assert!(memory.table().get(d.index()).is_free(), "object must be collected once popped");
    }

    #[test]
    fn saturation_keeps_object_alive_until_traced() {
        let (mut memory, collaborator) = memory_with_corpse();
        let e = memory.allocate_bytes(OopRef::nil(), OteFlags::empty(), Box::new([]));
        for _ in 0..300 {
            memory.inc_ref(e);
        }
        for _ in 0..300 {
            memory.dec_ref(e);
        }
        assert_eq!(memory.table().get(e.index()).refcount, crate::ote::REFCOUNT_MAX);

        memory.async_gc(GcFlags::empty(), &collaborator).unwrap();
        assert!(memory.table().get(e.index()).is_free(), "saturated-but-unreachable object is reclaimed by tracing");
    }

    #[test]
    fn fresh_object_allocated_between_cycles_is_traced_on_the_next_gc() {
        let (mut memory, collaborator) = memory_with_corpse();
        let s = memory.allocate_bytes(OopRef::nil(), OteFlags::empty(), Box::new([]));
        collaborator.push_stack_ref(s);
        memory.async_gc(GcFlags::empty(), &collaborator).unwrap();
        collaborator.pop_stack_ref();

        // Allocated after the first (mark=true) cycle, so its MARK flag
        // must be stamped to the mark value current at allocation time or
        // it reads as already-visited on the second (mark=false) cycle and
        // never gets traced into.
        let x = memory.allocate_pointers(OopRef::nil(), OteFlags::empty(), vec![s]);
        collaborator.push_stack_ref(x);

        memory.async_gc(GcFlags::empty(), &collaborator).unwrap();
        assert!(!memory.table().get(s.index()).is_free(), "s is still reachable through x and must survive tracing");
    }

    #[test]
    fn vm_pointer_closure_survives_gc() {
        let (mut memory, collaborator) = memory_with_corpse();
        // q is reachable only through p, a registered VM Pointer, and is
        // never placed on the stack or otherwise referenced.
        let q = memory.allocate_bytes(OopRef::nil(), OteFlags::empty(), Box::new([]));
        let p = memory.allocate_pointers(OopRef::nil(), OteFlags::empty(), vec![q]);
        memory.add_vm_refs(&[p]);

        memory.async_gc(GcFlags::empty(), &collaborator).unwrap();
        assert!(!memory.table().get(p.index()).is_free(), "p is sticky and must survive");
        assert!(!memory.table().get(q.index()).is_free(), "q is reachable only through the sticky VM Pointer p");
    }
}
