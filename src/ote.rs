//! The object table entry (OTE): the fixed-size record the whole
//! subsystem indexes by, and the object body it describes.

use bitflags::bitflags;

use crate::oop::{OteIndex, OopRef};

bitflags! {
    /// The packed flags byte of an OTE.
    ///
    /// `SPACE_LO`/`SPACE_HI` form a 2-bit space tag (normal heap, pool,
    /// permanent, or reserved) read alongside the single-bit flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OteFlags: u8 {
        /// Entry is on the free list; `body` is `OteBody::Free`.
        const FREE      = 0b0000_0001;
        /// Body is an opaque byte blob rather than a sequence of `Oop`s.
        const BYTES     = 0b0000_0010;
        /// Only `[0..F)` of this pointer object's fields are strong; the
        /// rest are weak slots subject to corpse substitution.
        const WEAK      = 0b0000_0100;
        /// Object should be queued for finalization the next time it is
        /// found unreachable. Cleared once queued (fires at most once).
        const FINALIZE  = 0b0000_1000;
        /// Toggling mark bit. "Reached this cycle" iff this bit equals
        /// the space's current mark value, not by a fixed polarity.
        const MARK      = 0b0001_0000;
        /// Permanently reachable; never reclaimed even at refcount 0.
        const STICKY    = 0b0010_0000;
        const SPACE_LO  = 0b0100_0000;
        const SPACE_HI  = 0b1000_0000;
    }
}

impl OteFlags {
    pub const SPACE_MASK: OteFlags = OteFlags::SPACE_LO.union(OteFlags::SPACE_HI);

    pub fn space(&self) -> Space {
        match (self.bits() & Self::SPACE_MASK.bits()) >> 6 {
            0 => Space::Normal,
            1 => Space::Pool,
            2 => Space::Permanent,
            _ => Space::Reserved,
        }
    }

    pub fn with_space(mut self, space: Space) -> Self {
        self.remove(Self::SPACE_MASK);
        self.insert(Self::from_bits_truncate((space as u8) << 6));
        self
    }
}

/// Which heap region an OTE's body lives in. The GC reads this only to
/// decide stickiness defaults; allocation/placement policy is otherwise out
/// of scope here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Space {
    Normal = 0,
    Pool = 1,
    Permanent = 2,
    Reserved = 3,
}

/// An object's body: either a sequence of tagged references, or an opaque
/// byte blob, or (when the OTE is free) the free-list/forwarding link that
/// reuses the same storage slot the body pointer would otherwise occupy.
#[derive(Debug, Clone)]
pub enum OteBody {
    /// Free entries thread the free list (and, transiently during
    /// compaction, a forwarding target) through this single link field —
    /// mirroring the source design's reuse of the body pointer field.
    Free { link: Option<OteIndex> },
    Pointers(Vec<OopRef>),
    Bytes(Box<[u8]>),
}

impl OteBody {
    pub fn is_free(&self) -> bool {
        matches!(self, OteBody::Free { .. })
    }

    pub fn byte_size(&self) -> usize {
        match self {
            OteBody::Free { .. } => 0,
            OteBody::Pointers(fields) => fields.len() * std::mem::size_of::<OopRef>(),
            OteBody::Bytes(bytes) => bytes.len(),
        }
    }
}

/// An object table entry.
#[derive(Debug, Clone)]
pub struct Ote {
    /// The object's class. Meaningless while `flags.contains(FREE)`.
    pub class: OopRef,
    pub flags: OteFlags,
    /// Saturating 8-bit reference count. `u8::MAX` is sticky-by-saturation:
    /// once reached it is never decremented again, and the object is
    /// reclaimed only by tracing.
    pub refcount: u8,
    pub body: OteBody,
}

pub const REFCOUNT_MAX: u8 = u8::MAX;

impl Ote {
    pub fn free(link: Option<OteIndex>) -> Self {
        Self {
            class: OopRef::nil(),
            flags: OteFlags::FREE,
            refcount: 0,
            body: OteBody::Free { link },
        }
    }

    pub fn is_free(&self) -> bool {
        self.flags.contains(OteFlags::FREE)
    }

    pub fn is_bytes(&self) -> bool {
        self.flags.contains(OteFlags::BYTES)
    }

    pub fn is_pointers(&self) -> bool {
        !self.is_bytes() && !self.is_free()
    }

    pub fn is_weak(&self) -> bool {
        self.flags.contains(OteFlags::WEAK)
    }

    pub fn is_sticky(&self) -> bool {
        self.flags.contains(OteFlags::STICKY)
    }

    pub fn needs_finalization(&self) -> bool {
        self.flags.contains(OteFlags::FINALIZE)
    }

    /// Saturating increment. Once at `REFCOUNT_MAX` the count never moves
    /// again; the object becomes reclaimable only by tracing.
    pub fn inc_ref(&mut self) {
        if self.refcount != REFCOUNT_MAX {
            self.refcount += 1;
        }
    }

    /// Saturating decrement. Returns `true` if this decrement landed the
    /// count on zero (the caller must then push the OTE to the ZCT).
    /// No-op (and returns `false`) once saturated.
    pub fn dec_ref(&mut self) -> bool {
        if self.refcount == REFCOUNT_MAX {
            return false;
        }
        debug_assert!(self.refcount > 0, "refcount underflow");
        self.refcount -= 1;
        self.refcount == 0
    }

    pub fn is_saturated(&self) -> bool {
        self.refcount == REFCOUNT_MAX
    }

    /// The fields considered for strong reachability: all of them for a
    /// non-weak pointer object, only the fixed prefix `[0..fixed_fields)`
    /// for a weak one.
    pub fn strong_fields(&self, fixed_fields: usize) -> &[OopRef] {
        match &self.body {
            OteBody::Pointers(fields) => {
                if self.is_weak() {
                    &fields[..fixed_fields.min(fields.len())]
                } else {
                    fields
                }
            }
            _ => &[],
        }
    }

    /// The weak, indexable slots `[fixed_fields..N)` of a weak pointer
    /// object. Empty for non-weak or non-pointer objects.
    pub fn weak_fields(&self, fixed_fields: usize) -> &[OopRef] {
        match &self.body {
            OteBody::Pointers(fields) if self.is_weak() => {
                let start = fixed_fields.min(fields.len());
                &fields[start..]
            }
            _ => &[],
        }
    }

    pub fn weak_fields_mut(&mut self, fixed_fields: usize) -> &mut [OopRef] {
        match &mut self.body {
            OteBody::Pointers(fields) if self.flags.contains(OteFlags::WEAK) => {
                let start = fixed_fields.min(fields.len());
                &mut fields[start..]
            }
            _ => &mut [],
        }
    }

    /// All non-immediate fields of a pointer object, regardless of
    /// weakness. Used by the debug auditor (which must recount every
    /// incoming reference, strong or weak) and by one-level deallocation
    /// decref (which must release every field, not just the strong ones).
    pub fn all_fields(&self) -> &[OopRef] {
        match &self.body {
            OteBody::Pointers(fields) => fields,
            _ => &[],
        }
    }
}
