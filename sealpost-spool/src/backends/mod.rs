//! Backend storage implementations for the spool
//!
//! - `memory`: In-memory storage for tests and transient queues
//! - `test`: Memory storage with synchronization and failure injection
//! - `file`: File-based storage for production use

pub mod file;
pub mod memory;

pub use file::{FileBackingStore, FileBackingStoreBuilder};
pub use memory::MemoryBackingStore;
pub use test::TestBackingStore;
