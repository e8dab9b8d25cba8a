//! Class (`Behavior`) instance specifications.
//!
//! The GC only ever needs a narrow slice of what a class object actually
//! carries: whether its instances are byte or pointer objects, how many
//! fixed (always-strong) fields they have, whether they're weak, and
//! whether they're a weak "mourner" that wants bereavement notifications.
//! Everything else about a class (superclass, method dictionary, subclass
//! set) lives in its OTE body like any other object and is opaque here.

use std::collections::HashMap;

use crate::oop::OteIndex;

/// The instance specification the collector reads off a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstanceSpec {
    /// Number of always-strong fixed fields. For weak classes, fields
    /// `[0..fixed_fields)` are strongly traced and `[fixed_fields..N)` are
    /// weak indexable slots.
    pub fixed_fields: usize,
    pub is_weak: bool,
    /// A weak mourner class wants `queue_for_bereavement` notifications
    /// when one of its instances loses a weak referent.
    pub is_mourner: bool,
}

impl Default for InstanceSpec {
    /// Non-weak, no fixed-field boundary (every field is strong). Used for
    /// any class the host never registered a spec for.
    fn default() -> Self {
        Self { fixed_fields: usize::MAX, is_weak: false, is_mourner: false }
    }
}

/// Registry mapping a class's OTE index to its instance specification.
#[derive(Default)]
pub struct ClassTable {
    specs: HashMap<OteIndex, InstanceSpec>,
}

impl ClassTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, class: OteIndex, spec: InstanceSpec) {
        self.specs.insert(class, spec);
    }

    pub fn spec_for(&self, class: OteIndex) -> InstanceSpec {
        self.specs.get(&class).copied().unwrap_or_default()
    }
}
