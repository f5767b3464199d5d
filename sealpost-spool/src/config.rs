use std::{path::PathBuf, sync::Arc};

use serde::Deserialize;

use crate::{
    backends::{FileBackingStore, MemoryBackingStore},
    r#trait::BackingStore,
};

/// Configuration for the job spool
///
/// File-backed spool in RON config:
/// ```ron
/// spool: File(
///     path: "/var/spool/sealpost",
/// ),
/// ```
///
/// Memory-backed spool with a capacity limit:
/// ```ron
/// spool: Memory(
///     capacity: Some(1000),
/// ),
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub enum SpoolConfig {
    /// File-based spool (production)
    File { path: PathBuf },
    /// Memory-based spool (testing/development); jobs do not survive restart
    Memory {
        #[serde(default)]
        capacity: Option<usize>,
    },
}

impl Default for SpoolConfig {
    fn default() -> Self {
        Self::File {
            path: FileBackingStore::default().path().to_path_buf(),
        }
    }
}

impl SpoolConfig {
    /// The filesystem path for file-backed spools
    #[must_use]
    pub fn path(&self) -> Option<&std::path::Path> {
        match self {
            Self::File { path } => Some(path),
            Self::Memory { .. } => None,
        }
    }

    /// Build and initialise the configured backing store
    ///
    /// # Errors
    /// If the path fails validation or the spool directory cannot be prepared
    pub fn open(self) -> crate::Result<Arc<dyn BackingStore>> {
        match self {
            Self::File { path } => {
                let store = FileBackingStore::builder().path(path).build()?;
                store.init()?;
                Ok(Arc::new(store))
            }
            Self::Memory { capacity } => Ok(capacity.map_or_else(
                || Arc::new(MemoryBackingStore::new()) as Arc<dyn BackingStore>,
                |capacity| Arc::new(MemoryBackingStore::with_capacity(capacity)),
            )),
        }
    }
}
