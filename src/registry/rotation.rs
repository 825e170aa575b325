//! Re-encryption of every stored password under a new key.

use super::Registry;
use crate::crypto::EncryptionKey;
use crate::domain::User;
use crate::errors::{BrokerError, Result};
use tracing::{error, info, instrument, Instrument};
use zeroize::Zeroizing;

impl Registry {
    /// Decrypt every user's password with `old_key` and store it again under
    /// `new_key`.
    ///
    /// Users are processed one at a time. With `fail_fast` the first failure
    /// is returned as-is; otherwise all users are attempted and any failures
    /// are reported together as [`BrokerError::KeyRotation`]. Rows already
    /// rotated are not rolled back. Returns the number of users rotated.
    #[instrument(skip(self, old_key, new_key))]
    pub async fn rotate_key(
        &self,
        old_key: &EncryptionKey,
        new_key: &EncryptionKey,
        fail_fast: bool,
    ) -> Result<usize> {
        let mut rotated = 0;
        let mut failures = 0;

        for instance_id in self.instances.list_ids().await? {
            let Some(instance) = self.instances.find(&instance_id).await? else {
                continue;
            };

            for user in instance.users {
                let span = crate::db_span!("rotate_user", instance_id = %instance_id);
                match self.rotate_user(user, old_key, new_key).instrument(span).await {
                    Ok(()) => rotated += 1,
                    Err(e) if fail_fast => return Err(e),
                    Err(_) => failures += 1,
                }
            }
        }

        if failures > 0 {
            return Err(BrokerError::KeyRotation { failures });
        }

        info!(rotated, "Key rotation completed");
        Ok(rotated)
    }

    async fn rotate_user(
        &self,
        mut user: User,
        old_key: &EncryptionKey,
        new_key: &EncryptionKey,
    ) -> Result<()> {
        let password = Zeroizing::new(user.password(old_key).inspect_err(|e| {
            error!(error = %e, instance_id = %user.instance_id, username = %user.username, "Failed to decrypt password");
        })?);

        user.set_password(&password, new_key).inspect_err(|e| {
            error!(error = %e, instance_id = %user.instance_id, username = %user.username, "Failed to encrypt password");
        })?;

        self.users.update_password(&user).await.inspect_err(|e| {
            error!(error = %e, instance_id = %user.instance_id, username = %user.username, "Failed to save password");
        })
    }
}
