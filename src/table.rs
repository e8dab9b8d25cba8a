//! The object table (OT): a contiguous array of [`Ote`]s with free entries
//! threaded into a singly linked free list.

use log::trace;

use crate::error::{ObjectMemoryError, Result};
use crate::oop::{OopRef, OteIndex};
use crate::ote::{Ote, OteBody, OteFlags, Space};

/// The object table.
///
/// Entries `[0, num_permanent)` are reserved for VM-known singletons: they
/// are allocated sticky and are never placed on the free list.
pub struct ObjectTable {
    entries: Vec<Ote>,
    free_head: Option<OteIndex>,
    free_count: usize,
    growth_size: usize,
    num_permanent: usize,
    current_mark: bool,
}

impl ObjectTable {
    pub fn new(initial_capacity: usize, growth_size: usize, num_permanent: usize) -> Self {
        let mut table = Self {
            entries: Vec::with_capacity(initial_capacity),
            free_head: None,
            free_count: 0,
            growth_size,
            num_permanent,
            current_mark: false,
        };
        table.grow(initial_capacity.max(num_permanent));
        // Reserve the permanent prefix: allocated, not free, not linked.
        // The free chain built by `grow` runs 0, 1, 2, ... in order, so
        // excising the prefix just means starting the free head after it.
        for i in 0..num_permanent {
            table.entries[i] = Ote {
                class: OopRef::nil(),
                flags: OteFlags::STICKY.with_space(Space::Permanent),
                refcount: crate::ote::REFCOUNT_MAX,
                body: OteBody::Bytes(Box::new([])),
            };
        }
        table.free_head = if num_permanent < table.entries.len() { Some(num_permanent as OteIndex) } else { None };
        table.free_count = table.entries.len() - num_permanent;
        table
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    pub fn num_permanent(&self) -> usize {
        self.num_permanent
    }

    pub fn free_count(&self) -> usize {
        self.free_count
    }

    pub fn live_count(&self) -> usize {
        self.entries.len() - self.free_count
    }

    /// The mark value [`allocate`](Self::allocate) stamps fresh OTEs with.
    /// Kept in sync with [`crate::mark::MarkState::current`] by the owning
    /// `ObjectMemory` every time the toggling mark bit flips, so a newly
    /// allocated object reads as already-live for the cycle just completed
    /// (or in progress) and only reads as unmarked — and is thus traced, or
    /// swept if unreachable — starting the *next* cycle. Without this, a
    /// fresh object allocated between two GCs would read as already-marked
    /// on every other cycle purely because its `MARK` bit defaults clear,
    /// and could be swept while still reachable.
    pub fn set_current_mark(&mut self, mark: bool) {
        self.current_mark = mark;
    }

    pub fn get(&self, index: OteIndex) -> &Ote {
        &self.entries[index as usize]
    }

    pub fn get_mut(&mut self, index: OteIndex) -> &mut Ote {
        &mut self.entries[index as usize]
    }

    pub fn try_get(&self, index: OteIndex) -> Result<&Ote> {
        self.entries.get(index as usize).ok_or(ObjectMemoryError::IndexOutOfRange {
            index: index as usize,
            capacity: self.entries.len(),
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (OteIndex, &Ote)> {
        self.entries.iter().enumerate().map(|(i, ote)| (i as OteIndex, ote))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (OteIndex, &mut Ote)> {
        self.entries.iter_mut().enumerate().map(|(i, ote)| (i as OteIndex, ote))
    }

    /// Index of the last occupied entry, mirroring the source's
    /// `lastOTEntry`. Returns `num_permanent - 1` if the table beyond the
    /// permanent prefix is entirely free.
    pub fn last_occupied(&self) -> OteIndex {
        let mut i = self.entries.len() - 1;
        while i > 0 && self.entries[i].is_free() {
            i -= 1;
        }
        i as OteIndex
    }

    fn grow(&mut self, additional: usize) {
        let start = self.entries.len();
        let new_len = start + additional;
        self.entries.reserve(additional);
        for i in start..new_len {
            let next = if i + 1 < new_len { Some((i + 1) as OteIndex) } else { self.free_head };
            self.entries.push(Ote::free(next));
        }
        self.free_head = Some(start as OteIndex);
        self.free_count += additional;
        trace!("object table grew by {additional} entries (capacity now {new_len})");
    }

    /// Pop a free OTE, growing the table if necessary, and install the
    /// given class/body/flags. Returns the new entry's index.
    pub fn allocate(&mut self, class: OopRef, flags: OteFlags, body: OteBody) -> OteIndex {
        let index = match self.free_head {
            Some(index) => index,
            None => {
                let growth = self.growth_size;
                self.grow(growth);
                self.free_head.expect("grow() always creates free entries")
            }
        };
        let next_free = match &self.entries[index as usize].body {
            OteBody::Free { link } => *link,
            _ => unreachable!("free list pointed at a non-free OTE"),
        };
        self.free_head = next_free;
        self.free_count -= 1;
        let mut flags = flags;
        if self.current_mark {
            flags.insert(OteFlags::MARK);
        } else {
            flags.remove(OteFlags::MARK);
        }
        self.entries[index as usize] = Ote { class, flags, refcount: 0, body };
        index
    }

    /// Return an OTE to the free list. Caller is responsible for having
    /// already released any references the body held.
    pub fn deallocate(&mut self, index: OteIndex) {
        debug_assert!(!self.entries[index as usize].is_free());
        let head = self.free_head;
        self.entries[index as usize] = Ote::free(head);
        self.free_head = Some(index);
        self.free_count += 1;
    }

    /// Direct low-level overwrite used by the compactor, which manages the
    /// free list itself during the rewrite pass rather than going through
    /// `allocate`/`deallocate`.
    pub fn set(&mut self, index: OteIndex, ote: Ote) {
        self.entries[index as usize] = ote;
    }

    pub fn free_head(&self) -> Option<OteIndex> {
        self.free_head
    }

    pub fn set_free_head(&mut self, head: Option<OteIndex>) {
        self.free_head = head;
    }

    pub fn set_free_count(&mut self, count: usize) {
        self.free_count = count;
    }
}
