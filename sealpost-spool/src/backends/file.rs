use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use sealpost_common::internal;
use serde::Deserialize;
use tokio::fs;

use crate::{
    JobRecord, SpoolError, ValidationError, error::SerializationError, r#trait::BackingStore,
    types::JobId,
};

/// File-based backing store implementation
///
/// Each job lives in a single `{job_id}.job` file holding the bincode-encoded
/// [`JobRecord`].
///
/// # Atomicity
/// Writes and updates go to `.tmp_{job_id}.job` first and are renamed into
/// place, so a crash never leaves a half-written record visible to `list`.
/// Deletes rename to `{job_id}.job.deleted` before removing; leftovers of
/// either kind are cleaned up by [`FileBackingStore::init`].
#[derive(Debug, Clone)]
pub struct FileBackingStore {
    path: PathBuf,
}

impl Default for FileBackingStore {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/spool/sealpost"),
        }
    }
}

impl<'de> Deserialize<'de> for FileBackingStore {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct FileBackingStoreHelper {
            path: PathBuf,
        }

        let helper = FileBackingStoreHelper::deserialize(deserializer)?;
        Self::validate_path(&helper.path).map_err(serde::de::Error::custom)?;

        Ok(Self { path: helper.path })
    }
}

impl FileBackingStore {
    /// Validate a spool path
    ///
    /// # Security Checks
    /// - Rejects paths containing `..`
    /// - Rejects relative paths
    /// - Rejects paths inside sensitive system directories
    ///
    /// # Errors
    /// Returns an error if the path is invalid or potentially dangerous
    pub fn validate_path(path: &Path) -> Result<(), ValidationError> {
        if path.components().any(|c| c == Component::ParentDir) {
            return Err(ValidationError::ParentComponent(path.display().to_string()));
        }

        if !path.is_absolute() {
            return Err(ValidationError::NotAbsolute(path.display().to_string()));
        }

        let sensitive_prefixes = [
            "/etc",
            "/bin",
            "/sbin",
            "/usr/bin",
            "/usr/sbin",
            "/boot",
            "/sys",
            "/proc",
            "/dev",
        ];

        if let Some(prefix) = sensitive_prefixes
            .iter()
            .find(|prefix| path.starts_with(prefix))
        {
            return Err(ValidationError::SystemDirectory {
                prefix: (*prefix).to_string(),
                path: path.display().to_string(),
            });
        }

        Ok(())
    }

    #[must_use]
    pub fn builder() -> FileBackingStoreBuilder {
        FileBackingStoreBuilder::default()
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Initialize the file-backed spool
    ///
    /// Creates the spool directory if it doesn't exist and removes orphaned
    /// `.deleted` and `.tmp_` files left by a crash.
    ///
    /// # Errors
    /// - If the spool path cannot be created
    /// - If the path exists but is not a directory
    pub fn init(&self) -> crate::Result<()> {
        internal!("Initialising job spool ...");

        let path = self.path.as_path();
        if !path.try_exists()? {
            internal!("{:#?} does not exist, creating...", self.path);
            std::fs::create_dir_all(path)?;
        } else if !path.is_dir() {
            return Err(ValidationError::NotDirectory(path.display().to_string()).into());
        }

        self.cleanup_orphans()?;

        Ok(())
    }

    fn cleanup_orphans(&self) -> crate::Result<()> {
        let mut cleaned = 0;

        for entry in std::fs::read_dir(&self.path)? {
            let entry = entry?;
            let filename = entry.file_name();
            let filename = filename.to_string_lossy();

            if filename.ends_with(".deleted") || filename.starts_with(".tmp_") {
                std::fs::remove_file(entry.path())?;
                cleaned += 1;
            }
        }

        if cleaned > 0 {
            internal!(
                level = INFO,
                "Cleaned up {cleaned} orphaned files from job spool"
            );
        }

        Ok(())
    }

    fn record_path(&self, id: &JobId) -> PathBuf {
        self.path.join(id.filename())
    }

    async fn write_atomically(&self, record: &JobRecord) -> crate::Result<()> {
        let bytes = record.to_bytes()?;
        let temp_path = self.path.join(format!(".tmp_{}", record.id.filename()));

        fs::write(&temp_path, &bytes).await?;
        fs::rename(&temp_path, self.record_path(&record.id)).await?;

        Ok(())
    }
}

#[async_trait]
impl BackingStore for FileBackingStore {
    #[tracing::instrument(level = "debug", skip(self, record), fields(id = %record.id))]
    async fn write(&self, record: &JobRecord) -> crate::Result<()> {
        if fs::try_exists(self.record_path(&record.id)).await? {
            return Err(SpoolError::AlreadyExists(record.id));
        }

        self.write_atomically(record).await?;
        internal!(level = DEBUG, job = record.id; "Spooled job");

        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn list(&self) -> crate::Result<Vec<JobId>> {
        let mut entries = fs::read_dir(&self.path).await?;
        let mut ids = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let filename = entry.file_name();
            let filename = filename.to_string_lossy();

            if !filename.starts_with(".tmp_")
                && let Some(id) = JobId::from_filename(&filename)
            {
                ids.push(id);
            }
        }

        ids.sort();
        internal!(level = DEBUG, "Found {} jobs in spool", ids.len());

        Ok(ids)
    }

    #[tracing::instrument(level = "debug", skip(self), fields(id = %id))]
    async fn read(&self, id: &JobId) -> crate::Result<JobRecord> {
        let bytes = match fs::read(self.record_path(id)).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(SpoolError::NotFound(*id));
            }
            Err(err) => return Err(err.into()),
        };

        let record = JobRecord::from_bytes(&bytes)?;
        if record.id != *id {
            return Err(SerializationError::Corrupted(format!(
                "file for {id} holds job {}",
                record.id
            ))
            .into());
        }

        Ok(record)
    }

    #[tracing::instrument(level = "debug", skip(self, record), fields(id = %record.id))]
    async fn update(&self, record: &JobRecord) -> crate::Result<()> {
        if !fs::try_exists(self.record_path(&record.id)).await? {
            return Err(SpoolError::NotFound(record.id));
        }

        self.write_atomically(record).await
    }

    #[tracing::instrument(level = "debug", skip(self), fields(id = %id))]
    async fn delete(&self, id: &JobId) -> crate::Result<()> {
        let path = self.record_path(id);
        let deleted_path = self.path.join(format!("{}.deleted", id.filename()));

        match fs::rename(&path, &deleted_path).await {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(SpoolError::NotFound(*id));
            }
            Err(err) => return Err(err.into()),
        }

        fs::remove_file(&deleted_path).await?;
        internal!(level = DEBUG, job = id; "Deleted job from spool");

        Ok(())
    }
}

/// Builder for `FileBackingStore`
#[derive(Debug, Default)]
pub struct FileBackingStoreBuilder {
    path: PathBuf,
}

impl FileBackingStoreBuilder {
    #[must_use]
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = path.into();
        self
    }

    /// Build the final `FileBackingStore`
    ///
    /// # Errors
    /// Returns an error if the path is invalid or potentially dangerous
    pub fn build(self) -> Result<FileBackingStore, ValidationError> {
        FileBackingStore::validate_path(&self.path)?;
        Ok(FileBackingStore { path: self.path })
    }
}
