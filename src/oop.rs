//! Tagged object references (`Oop`s) and OT indices.

use std::fmt;

/// Index of an entry in the object table. Object identity *is* this index:
/// it never changes for the lifetime of an object, even across compaction
/// (compaction only ever moves OTEs, and the old index becomes a forwarding
/// entry so existing `OopRef`s keep working until the rewrite phase updates
/// the fields that held them).
pub type OteIndex = u32;

/// A tagged reference to an object: either an OT index (a real object) or an
/// immediate small integer packed into the reference itself.
///
/// Mirrors the source VM's `Oop`: the low bit distinguishes the two cases so
/// that `SmallInteger` arithmetic never needs an OT lookup and is never
/// visited by the tracer.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct OopRef(u32);

const TAG_BIT: u32 = 1;

impl OopRef {
    /// Build a reference to an OT entry. Panics if `index` cannot be
    /// represented (would collide with the immediate tag).
    #[inline]
    pub fn from_index(index: OteIndex) -> Self {
        let word = index << 1;
        assert_eq!(word >> 1, index, "OTE index too large to tag");
        Self(word)
    }

    /// Build an immediate small-integer reference. Only the low 31 bits of
    /// `value` are preserved.
    #[inline]
    pub fn from_small_integer(value: i32) -> Self {
        Self(((value as u32) << 1) | TAG_BIT)
    }

    /// The distinguished `nil` reference always lives at OT index 0.
    #[inline]
    pub fn nil() -> Self {
        Self::from_index(0)
    }

    #[inline]
    pub fn is_immediate(&self) -> bool {
        self.0 & TAG_BIT != 0
    }

    #[inline]
    pub fn is_ote(&self) -> bool {
        !self.is_immediate()
    }

    /// The OT index this reference points at. Panics if this is an
    /// immediate; callers must check [`OopRef::is_ote`] first.
    #[inline]
    pub fn index(&self) -> OteIndex {
        debug_assert!(self.is_ote());
        self.0 >> 1
    }

    /// The integer value of an immediate. Panics if this is an OTE
    /// reference.
    #[inline]
    pub fn small_integer_value(&self) -> i32 {
        debug_assert!(self.is_immediate());
        (self.0 as i32) >> 1
    }
}

impl fmt::Debug for OopRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_immediate() {
            write!(f, "OopRef::SmallInteger({})", self.small_integer_value())
        } else {
            write!(f, "OopRef::Ote({})", self.index())
        }
    }
}
