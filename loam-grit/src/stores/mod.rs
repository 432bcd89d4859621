//! Interchangeable storage back-ends for objects and references.

pub mod file;
pub mod memory;

pub use file::{FileObjectStore, FileReferences};
pub use memory::{MemoryObjectStore, MemoryReferences};
