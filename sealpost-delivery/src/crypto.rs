//! Master secret cache and the session cipher boundary.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use parking_lot::RwLock;
use sealpost_common::SystemState;
use thiserror::Error;

/// The decrypted master secret.
///
/// Cloning shares the same allocation. `Debug` never prints the bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct MasterSecret(Arc<[u8]>);

impl MasterSecret {
    #[must_use]
    pub fn new(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self(bytes.into())
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for MasterSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MasterSecret").field(&"[REDACTED]").finish()
    }
}

/// Holds the master secret while the user has it unlocked, and mirrors its
/// presence into [`SystemState`] so that jobs gated on the key wake up.
#[derive(Debug)]
pub struct KeyCache {
    secret: RwLock<Option<MasterSecret>>,
    system: SystemState,
}

impl KeyCache {
    #[must_use]
    pub fn new(system: SystemState) -> Self {
        Self {
            secret: RwLock::new(None),
            system,
        }
    }

    pub fn unlock(&self, secret: MasterSecret) {
        *self.secret.write() = Some(secret);
        self.system.set_master_key_cached(true);
    }

    pub fn lock(&self) {
        self.secret.write().take();
        self.system.set_master_key_cached(false);
    }

    #[must_use]
    pub fn get(&self) -> Option<MasterSecret> {
        self.secret.read().clone()
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("No session established with {0}")]
    NoSession(String),

    #[error("Encryption failed: {0}")]
    Encryption(String),
}

/// Encrypts payloads with the recipient's established session.
#[async_trait]
pub trait SessionCipher: Send + Sync + fmt::Debug {
    async fn encrypt(
        &self,
        master: &MasterSecret,
        recipient: &str,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, SessionError>;
}
