//! Push account and pre-key collaborators used by the maintenance job.

use async_trait::async_trait;
use thiserror::Error;

use crate::crypto::MasterSecret;

#[derive(Debug, Error)]
pub enum PushError {
    /// The request never got an answer.
    #[error("Push network error: {0}")]
    Network(String),

    #[error("Push server responded {code}: {message}")]
    NonSuccessfulResponse { code: u16, message: String },
}

/// Freshly generated keys, ready to upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreKeyBundle {
    pub identity_key: Vec<u8>,
    pub pre_keys: Vec<Vec<u8>>,
    pub last_resort_key: Vec<u8>,
    pub signed_pre_key: Vec<u8>,
}

/// The push service account.
#[async_trait]
pub trait AccountManager: Send + Sync + std::fmt::Debug {
    async fn is_push_registered(&self) -> bool;

    async fn is_signed_pre_key_registered(&self) -> bool;

    async fn set_signed_pre_key_registered(&self, registered: bool);

    /// Number of one-time pre-keys the server still holds for us.
    async fn pre_key_count(&self) -> Result<usize, PushError>;

    async fn upload_pre_keys(&self, bundle: &PreKeyBundle) -> Result<(), PushError>;
}

/// Key generation lives with identity management.
pub trait PreKeyGenerator: Send + Sync + std::fmt::Debug {
    fn generate(&self, master: &MasterSecret) -> PreKeyBundle;
}
