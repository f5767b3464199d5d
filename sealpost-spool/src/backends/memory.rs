use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use async_trait::async_trait;

use crate::{JobRecord, SpoolError, r#trait::BackingStore, types::JobId};

/// In-memory backing store implementation
///
/// Stores records in a `HashMap` behind an `RwLock`. Nothing survives a
/// restart, so this is meant for tests and for deployments that accept losing
/// queued work.
///
/// # Capacity Management
/// The store can be configured with a maximum capacity. Once reached, `write`
/// fails until a record is deleted.
#[derive(Debug, Clone)]
pub struct MemoryBackingStore {
    pub(crate) records: Arc<RwLock<HashMap<JobId, JobRecord>>>,
    /// Maximum number of records to store (None = unlimited)
    capacity: Option<usize>,
}

impl MemoryBackingStore {
    /// Create a new empty memory-backed store with unlimited capacity
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
            capacity: None,
        }
    }

    /// Create a new memory-backed store with a capacity limit
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
            capacity: Some(capacity),
        }
    }

    /// Number of stored records
    ///
    /// Recovers gracefully if the lock is poisoned.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get the configured capacity (None = unlimited)
    #[must_use]
    pub const fn capacity(&self) -> Option<usize> {
        self.capacity
    }
}

impl Default for MemoryBackingStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BackingStore for MemoryBackingStore {
    async fn write(&self, record: &JobRecord) -> crate::Result<()> {
        let mut records = self.records.write()?;

        if records.contains_key(&record.id) {
            return Err(SpoolError::AlreadyExists(record.id));
        }

        if let Some(cap) = self.capacity
            && records.len() >= cap
        {
            return Err(SpoolError::Internal(format!(
                "Memory spool capacity exceeded: {}/{cap} jobs",
                records.len()
            )));
        }

        records.insert(record.id, record.clone());
        Ok(())
    }

    async fn list(&self) -> crate::Result<Vec<JobId>> {
        let mut ids: Vec<_> = self.records.read()?.keys().copied().collect();
        ids.sort();
        Ok(ids)
    }

    async fn read(&self, id: &JobId) -> crate::Result<JobRecord> {
        self.records
            .read()?
            .get(id)
            .cloned()
            .ok_or(SpoolError::NotFound(*id))
    }

    async fn update(&self, record: &JobRecord) -> crate::Result<()> {
        match self.records.write()?.get_mut(&record.id) {
            Some(existing) => {
                existing.clone_from(record);
                Ok(())
            }
            None => Err(SpoolError::NotFound(record.id)),
        }
    }

    async fn delete(&self, id: &JobId) -> crate::Result<()> {
        self.records
            .write()?
            .remove(id)
            .ok_or(SpoolError::NotFound(*id))?;
        Ok(())
    }
}
