//! Durable store implementations.
//!
//! - [`MemoryStore`]: in-memory, for tests and development
//! - [`FsStore`]: one JSON file per record under a root directory, the
//!   single-node replacement for the object-store layout

pub mod fs;
pub mod memory;

pub use fs::FsStore;
pub use memory::MemoryStore;
