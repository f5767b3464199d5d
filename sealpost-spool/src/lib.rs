//! Durable storage for pending jobs.
//!
//! Each job is persisted as a [`JobRecord`] keyed by a [`JobId`]. The executor
//! talks to storage only through the [`BackingStore`] trait so that file and
//! memory backends are interchangeable.

pub mod backends;
pub mod config;
pub mod error;
pub mod record;
pub mod r#trait;
pub mod types;

pub use backends::{FileBackingStore, MemoryBackingStore, TestBackingStore};
pub use config::SpoolConfig;
pub use error::{Result, SerializationError, SpoolError, ValidationError};
pub use record::JobRecord;
pub use r#trait::BackingStore;
pub use types::JobId;
