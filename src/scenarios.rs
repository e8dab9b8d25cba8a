//! End-to-end scenario coverage exercised purely through the public API:
//! allocate, mutate, collect, compact — and check what a host embedding
//! this crate would actually observe. Complements the per-phase unit
//! tests living alongside each module with the "concrete scenarios" a
//! reviewer would reach for first.

use std::cell::Cell;
use std::sync::Mutex;

#[cfg(feature = "finalization")]
use crate::class::InstanceSpec;
use crate::collaborator::VmCollaborator;
#[cfg(feature = "finalization")]
use crate::collaborator::GcFlags;
use crate::compact::Forwarder;
use crate::config::ObjectMemoryConfig;
use crate::mark::Marker;
use crate::memory::ObjectMemory;
use crate::oop::OopRef;
use crate::ote::{OteBody, OteFlags};

/// A collaborator that records every callback, for scenarios that need to
/// assert finalization/bereavement/compaction actually fired rather than
/// merely that the object graph ended up in the right shape.
#[derive(Default)]
struct RecordingCollaborator {
    stack: Mutex<Vec<OopRef>>,
    finalized: Mutex<Vec<OopRef>>,
    bereaved: Mutex<Vec<(OopRef, u32)>>,
    compacts: Cell<u32>,
}

impl RecordingCollaborator {
    fn new() -> Self {
        Self::default()
    }

    fn push_stack_ref(&self, oop: OopRef) {
        self.stack.lock().unwrap().push(oop);
    }

    #[cfg(feature = "finalization")]
    fn pop_stack_ref(&self) -> Option<OopRef> {
        self.stack.lock().unwrap().pop()
    }

    #[cfg(feature = "finalization")]
    fn finalized(&self) -> Vec<OopRef> {
        self.finalized.lock().unwrap().clone()
    }

    fn compacts(&self) -> u32 {
        self.compacts.get()
    }
}

impl VmCollaborator for RecordingCollaborator {
    fn mark_roots(&self, marker: &mut Marker<'_>) {
        let stack = self.stack.lock().unwrap().clone();
        marker.mark_all(stack);
    }

    fn queue_for_finalization(&self, ote: OopRef) {
        self.finalized.lock().unwrap().push(ote);
    }

    fn queue_for_bereavement(&self, weak_ote: OopRef, losses: u32) {
        self.bereaved.lock().unwrap().push((weak_ote, losses));
    }

    fn schedule_finalization(&self) {}

    fn on_compact(&self, forwarder: &Forwarder<'_>) {
        self.compacts.set(self.compacts.get() + 1);
        let mut stack = self.stack.lock().unwrap();
        for oop in stack.iter_mut() {
            *oop = forwarder.resolve(*oop);
        }
    }

    fn active_stack(&self) -> Vec<OopRef> {
        self.stack.lock().unwrap().clone()
    }
}

fn memory_with_corpse() -> (ObjectMemory, RecordingCollaborator) {
    let _ = env_logger::try_init();
    let mut memory = ObjectMemory::with_config(ObjectMemoryConfig {
        initial_ot_capacity: 32,
        ot_growth_size: 16,
        num_permanent: 2,
        ..Default::default()
    });
    let corpse = memory.allocate_bytes(OopRef::nil(), OteFlags::empty(), Box::new([]));
    memory.add_vm_refs(&[corpse]);
    memory.register_corpse(corpse);
    (memory, RecordingCollaborator::new())
}

/// Scenario 2: a finalizable object reachable only through a weak slot on
/// an otherwise-dead object must still be rescued, queued exactly once,
/// and survive until the next cycle collects it for real.
#[test]
#[cfg(feature = "finalization")]
fn finalizable_object_rescued_from_a_dead_weak_referrer() {
    let (mut memory, collaborator) = memory_with_corpse();

    let c = memory.allocate_bytes(OopRef::nil(), OteFlags::FINALIZE, Box::new([]));
    let mourner_class = memory.allocate_bytes(OopRef::nil(), OteFlags::empty(), Box::new([]));
    memory.register_class(
        mourner_class.index(),
        InstanceSpec { fixed_fields: 0, is_weak: true, is_mourner: false },
    );
    // Nothing roots `w`: it dies this cycle, taking its weak reference to
    // `c` down with it, but `c`'s own Finalize flag must rescue `c` anyway.
    let _w = memory.allocate_pointers(mourner_class, OteFlags::WEAK, vec![c]);

    let stats = memory.async_gc(GcFlags::empty(), &collaborator).unwrap();
    assert_eq!(stats.queued_for_finalization, 1);
    assert_eq!(collaborator.finalized(), vec![c]);
    assert!(!memory.table().get(c.index()).is_free(), "rescued object must survive its own finalization cycle");
    assert!(!memory.table().get(c.index()).needs_finalization(), "Finalize flag must be cleared after queueing");

    // The finalizer has now run and dropped the last reference (there
    // never was a structural one left once the weak slot was nilled) —
    // the next cycle reclaims it for real.
    memory.async_gc(GcFlags::empty(), &collaborator).unwrap();
    assert!(memory.table().get(c.index()).is_free(), "object must be collected once its finalizer has run");
    assert_eq!(collaborator.finalized(), vec![c], "finalizer must never be queued twice for the same object");
}

/// Scenario 4: compacting a table with many holes preserves every
/// survivor's identity (its body bytes dereference correctly through the
/// forwarding pointer left behind), fires `on_compact` exactly once, and
/// leaves the free list contiguous in the tail.
#[test]
fn compaction_at_scale_preserves_identity_and_fires_once() {
    let (mut memory, collaborator) = memory_with_corpse();

    let n = 1000;
    let mut payloads = Vec::with_capacity(n / 2);
    for i in 0..n {
        let payload = (i as u32).to_le_bytes();
        let oop = memory.allocate_bytes(OopRef::nil(), OteFlags::empty(), Box::new(payload));
        if i % 2 == 0 {
            collaborator.push_stack_ref(oop);
            payloads.push(payload);
        }
    }

    let new_high_water = memory.compact(&collaborator).unwrap();
    assert_eq!(collaborator.compacts(), 1, "on_compact must fire exactly once per compaction");

    // `on_compact` forwarded the collaborator's own cached stack in place,
    // the way a real host's roots-fixup would — push order is preserved,
    // so it still lines up with `payloads`.
    let table = memory.table();
    let forwarded_stack = collaborator.stack.lock().unwrap().clone();
    assert_eq!(forwarded_stack.len(), payloads.len());
    for (new_oop, payload) in forwarded_stack.iter().zip(payloads.iter()) {
        match &table.get(new_oop.index()).body {
            OteBody::Bytes(bytes) => assert_eq!(&**bytes, payload, "survivor's body bytes must be unchanged after compaction"),
            other => panic!("expected a Bytes body, got {other:?}"),
        }
    }

    let capacity = table.capacity();
    for index in (new_high_water as usize + 1)..capacity {
        assert!(table.get(index as u32).is_free(), "every slot past the high water mark must be free after compaction");
    }
}

/// Scenario 3, exercised with a collaborator that actually records the
/// bereavement callback rather than just inspecting the resulting slots.
#[test]
#[cfg(feature = "finalization")]
fn weak_bereavement_invokes_callback_exactly_once() {
    let (mut memory, collaborator) = memory_with_corpse();

    let mourner_class = memory.allocate_bytes(OopRef::nil(), OteFlags::empty(), Box::new([]));
    memory.register_class(
        mourner_class.index(),
        InstanceSpec { fixed_fields: 0, is_weak: true, is_mourner: true },
    );

    let x = memory.allocate_bytes(OopRef::nil(), OteFlags::empty(), Box::new([]));
    let y = memory.allocate_bytes(OopRef::nil(), OteFlags::empty(), Box::new([]));
    let z = memory.allocate_bytes(OopRef::nil(), OteFlags::empty(), Box::new([]));
    collaborator.push_stack_ref(x);
    collaborator.push_stack_ref(z);

    let w = memory.allocate_pointers(mourner_class, OteFlags::WEAK, vec![x, y, z]);
    memory.inc_ref(w);
    collaborator.push_stack_ref(w);

    memory.async_gc(GcFlags::empty(), &collaborator).unwrap();

    let bereaved = collaborator.bereaved.lock().unwrap().clone();
    assert_eq!(bereaved, vec![(w, 1)], "bereavement must be queued exactly once, with the right loss count");
    assert!(memory.table().get(y.index()).is_free());

    collaborator.pop_stack_ref();
    collaborator.pop_stack_ref();
    collaborator.pop_stack_ref();
}
