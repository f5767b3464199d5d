use sealpost_common::RequirementKind;
use sealpost_jobs::JobParameters;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::DeliveryContext;
use crate::error::DeliveryError;

/// Below this many one-time pre-keys on the server, a fresh batch is uploaded.
pub const PREKEY_MINIMUM: usize = 10;

const GROUP: &str = "RefreshPreKeysJob";
const RETRY_BUDGET: u32 = 5;

/// Keeps the push server stocked with pre-keys.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshPreKeysJob;

impl RefreshPreKeysJob {
    pub(super) fn parameters(self) -> JobParameters {
        JobParameters::builder()
            .requirement(RequirementKind::NetworkAvailable)
            .requirement(RequirementKind::MasterKeyCached)
            .group(GROUP)
            .retry_budget(RETRY_BUDGET)
            .build()
    }

    pub(super) async fn on_run(self, context: &DeliveryContext) -> Result<(), DeliveryError> {
        let accounts = &context.accounts;

        if !accounts.is_push_registered().await {
            debug!("Not registered for push, skipping pre-key refresh");
            return Ok(());
        }

        let available = accounts.pre_key_count().await?;
        if available >= PREKEY_MINIMUM && accounts.is_signed_pre_key_registered().await {
            debug!(available, "Available pre-keys sufficient");
            return Ok(());
        }

        let master = context
            .keys
            .get()
            .ok_or(DeliveryError::MasterSecretUnavailable)?;
        let bundle = context.pre_keys.generate(&master);

        info!(
            available,
            generated = bundle.pre_keys.len(),
            "Registering new pre-keys"
        );
        accounts.upload_pre_keys(&bundle).await?;
        accounts.set_signed_pre_key_registered(true).await;

        Ok(())
    }

    /// Network failures are worth retrying; an explicit rejection is not.
    pub(super) const fn should_retry(self, error: &DeliveryError) -> bool {
        error.is_temporary()
    }
}
