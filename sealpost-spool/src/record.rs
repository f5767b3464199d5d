use std::time::SystemTime;

use sealpost_common::RequirementKind;
use serde::{Deserialize, Serialize};

use crate::{JobId, error::SerializationError};

/// Everything needed to reschedule a job after a restart.
///
/// The job body itself is opaque to the spool and is carried as `payload`,
/// already encoded by the executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    /// Job kind tag, used for logging and to sanity-check decoding.
    pub kind: String,
    /// Enqueue order. Retries receive a fresh, larger sequence.
    pub sequence: u64,
    pub group: Option<String>,
    pub requirements: Vec<RequirementKind>,
    pub retry_budget: u32,
    pub retries_used: u32,
    /// Earliest wall-clock time the job may run again (pending backoff).
    pub next_run_at: Option<SystemTime>,
    pub enqueued_at: SystemTime,
    pub payload: Vec<u8>,
}

impl JobRecord {
    /// Retries left before the job becomes terminal.
    #[must_use]
    pub const fn remaining_retries(&self) -> u32 {
        self.retry_budget.saturating_sub(self.retries_used)
    }

    /// Encode the record for storage.
    ///
    /// # Errors
    /// If bincode fails to encode the record
    pub fn to_bytes(&self) -> Result<Vec<u8>, SerializationError> {
        Ok(bincode::serde::encode_to_vec(
            self,
            bincode::config::standard(),
        )?)
    }

    /// Decode a record previously produced by [`Self::to_bytes`].
    ///
    /// # Errors
    /// If the bytes are not a complete, valid record
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SerializationError> {
        let (record, read): (Self, usize) =
            bincode::serde::decode_from_slice(bytes, bincode::config::standard())?;

        if read != bytes.len() {
            return Err(SerializationError::Corrupted(format!(
                "{} trailing bytes after record",
                bytes.len() - read
            )));
        }

        Ok(record)
    }
}
