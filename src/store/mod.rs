//! Store implementations of the [`crate::contract`] traits.
//!
//! - [`memory`]: process-local stores, used by tests and embedders
//! - [`fs`]: a content-addressed artifact directory and a JSON repository file, used by the CLI

pub mod fs;
pub mod memory;

pub use fs::{FileRepositoryStore, FsArtifactStore};
pub use memory::{MemoryArtifactStore, MemoryRepositoryStore, RepositoryState};
