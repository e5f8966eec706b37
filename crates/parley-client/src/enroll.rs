//! First-run enrollment.

use parley_crypto::KeyPair;
use parley_proto::UserSummary;

use crate::{ClientError, KeyDirectory, LocalIdentity, LocalKeyStore};

/// Create an identity for this device.
///
/// Generates a key pair, registers the public half under `username`, then
/// saves the private half locally. The key is saved only after the directory
/// accepted it; a rejected username leaves the keystore untouched.
///
/// # Errors
///
/// - `ClientError::Server` with `CONFLICT` if the username is taken
/// - `ClientError::Storage` if the directory accepted the key but it could not
///   be saved; the directory entry is then orphaned and the username must be
///   re-registered under a new name
pub async fn enroll<D, K>(
    directory: &D,
    keystore: &K,
    username: &str,
) -> Result<(LocalIdentity, UserSummary), ClientError>
where
    D: KeyDirectory + ?Sized,
    K: LocalKeyStore + ?Sized,
{
    let keys = KeyPair::generate()?;
    let summary = directory.register_user(username, &keys.public_key().to_encoded()).await?;

    let (_, private_key) = keys.into_parts();
    let identity = LocalIdentity::new(summary.user_id, summary.username.clone(), private_key);
    keystore.save(&identity)?;

    tracing::info!(user_id = %summary.user_id, username = %summary.username, "enrolled");
    Ok((identity, summary))
}
