//! Error types for the object memory subsystem.

use thiserror::Error;

/// Fatal or refusal-path errors raised by [`crate::memory::ObjectMemory`].
///
/// Recoverable conditions (refcount audit mismatches, bereavement queue
/// backpressure) are reported through the `log` stream instead of via this
/// type, since collection must not be interrupted by them.
#[derive(Debug, Error)]
pub enum ObjectMemoryError {
    #[error("GC invoked before the Corpse object was registered")]
    CorpseNotRegistered,

    #[error("object table exhausted: {capacity} entries and growth is disabled")]
    TableExhausted { capacity: usize },

    #[error("allocator out of memory: requested {requested} bytes")]
    OutOfMemory { requested: usize },

    #[error("heap corruption: OTE index {index} out of range (table has {capacity} entries)")]
    IndexOutOfRange { index: usize, capacity: usize },

    #[error("heap corruption: field at {context} points at a free OTE (index {index})")]
    DanglingReference { context: &'static str, index: usize },

    #[error("invalid configuration: {0}")]
    Configuration(String),
}

pub type Result<T> = std::result::Result<T, ObjectMemoryError>;
