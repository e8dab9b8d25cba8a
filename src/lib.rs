//! Object memory and garbage collector for a Smalltalk-style virtual
//! machine: an object table indexed by identity-stable handles, deferred
//! reference counting bridged to a tracing mark-sweep collector via a
//! Zero-Count Table, weak-reference bereavement, finalization queueing,
//! and OT compaction by forwarding pointer.
//!
//! The mutator and collector never run concurrently; the interpreter
//! drives collection from well-defined safe points by implementing
//! [`VmCollaborator`] and calling [`ObjectMemory::async_gc`] or
//! [`ObjectMemory::compact`].

pub mod async_protect;
pub mod audit;
pub mod class;
pub mod collaborator;
pub mod compact;
pub mod config;
pub mod error;
pub mod mark;
pub mod memory;
pub mod oop;
pub mod ote;
pub mod sweep;
pub mod table;
pub mod zct;

#[cfg(test)]
mod scenarios;

pub use collaborator::{GcFlags, NullCollaborator, VmCollaborator};
pub use config::{ObjectMemoryConfig, ObjectMemoryConfigBuilder};
pub use error::{ObjectMemoryError, Result};
pub use mark::Marker;
pub use memory::ObjectMemory;
pub use oop::{OopRef, OteIndex};
pub use ote::{Ote, OteBody, OteFlags, Space};
