//! Device-local identity storage.
//!
//! The private key never leaves the device, and this store holds the only
//! durable copy of it. Clearing the store is a logout: every conversation the
//! key took part in becomes unreadable on this device.

use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    sync::Mutex,
};

use parley_crypto::{PrivateKey, PublicKey};
use parley_proto::UserId;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::ClientError;

/// The enrolled identity of this device.
#[derive(Debug, Clone)]
pub struct LocalIdentity {
    user_id: UserId,
    username: String,
    private_key: PrivateKey,
}

impl LocalIdentity {
    /// Bundle an identity assigned by the directory with its private key.
    pub fn new(user_id: UserId, username: impl Into<String>, private_key: PrivateKey) -> Self {
        Self { user_id, username: username.into(), private_key }
    }

    /// Directory-assigned identifier
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Registered display name
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Private half of the registered key pair
    pub fn private_key(&self) -> &PrivateKey {
        &self.private_key
    }

    /// Public half, as registered in the directory
    pub fn public_key(&self) -> PublicKey {
        self.private_key.public_key()
    }
}

/// Where a device keeps its identity between runs.
pub trait LocalKeyStore: Send + Sync {
    /// Stored identity, or `None` if the device has not enrolled.
    fn load(&self) -> Result<Option<LocalIdentity>, ClientError>;

    /// Replace the stored identity.
    fn save(&self, identity: &LocalIdentity) -> Result<(), ClientError>;

    /// Forget the identity. Clearing an empty store is not an error.
    fn clear(&self) -> Result<(), ClientError>;
}

/// Keystore that lives as long as the process. For tests and ephemeral
/// clients.
#[derive(Debug, Default)]
pub struct MemoryKeyStore {
    identity: Mutex<Option<LocalIdentity>>,
}

impl MemoryKeyStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-loaded with `identity`
    pub fn with_identity(identity: LocalIdentity) -> Self {
        Self { identity: Mutex::new(Some(identity)) }
    }

    fn slot(&self) -> Result<std::sync::MutexGuard<'_, Option<LocalIdentity>>, ClientError> {
        self.identity.lock().map_err(|_| ClientError::Storage("keystore lock poisoned".into()))
    }
}

impl LocalKeyStore for MemoryKeyStore {
    fn load(&self) -> Result<Option<LocalIdentity>, ClientError> {
        Ok(self.slot()?.clone())
    }

    fn save(&self, identity: &LocalIdentity) -> Result<(), ClientError> {
        *self.slot()? = Some(identity.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), ClientError> {
        *self.slot()? = None;
        Ok(())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct IdentityRef<'a> {
    user_id: UserId,
    username: &'a str,
    private_key: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdentityFile {
    user_id: UserId,
    username: String,
    private_key: String,
}

/// Keystore backed by a single CBOR file.
///
/// Writes go to a sibling temp file that is synced and then renamed over the
/// target, so a crash leaves either the old identity or the new one. On unix
/// the file is created with mode `0600`.
#[derive(Debug, Clone)]
pub struct FileKeyStore {
    path: PathBuf,
}

impl FileKeyStore {
    /// Store at `path`. The file is created on first save.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the identity file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().map(ToOwned::to_owned).unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl LocalKeyStore for FileKeyStore {
    fn load(&self) -> Result<Option<LocalIdentity>, ClientError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => Zeroizing::new(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let file: IdentityFile = ciborium::de::from_reader(bytes.as_slice())
            .map_err(|e| ClientError::Storage(format!("corrupt identity file: {e}")))?;
        let encoded = Zeroizing::new(file.private_key);
        let private_key = PrivateKey::from_encoded(&encoded)?;

        Ok(Some(LocalIdentity::new(file.user_id, file.username, private_key)))
    }

    fn save(&self, identity: &LocalIdentity) -> Result<(), ClientError> {
        let encoded = identity.private_key.to_encoded();
        let record = IdentityRef {
            user_id: identity.user_id,
            username: &identity.username,
            private_key: &encoded,
        };

        let mut bytes = Zeroizing::new(Vec::new());
        ciborium::ser::into_writer(&record, &mut *bytes)
            .map_err(|e| ClientError::Storage(format!("identity encode failed: {e}")))?;

        let temp = self.temp_path();
        {
            let mut file = create_private(&temp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&temp, &self.path)?;

        tracing::debug!(user_id = %identity.user_id, path = %self.path.display(), "identity saved");
        Ok(())
    }

    fn clear(&self) -> Result<(), ClientError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(unix)]
fn create_private(path: &Path) -> io::Result<fs::File> {
    use std::os::unix::fs::OpenOptionsExt;

    fs::OpenOptions::new().write(true).create(true).truncate(true).mode(0o600).open(path)
}

#[cfg(not(unix))]
fn create_private(path: &Path) -> io::Result<fs::File> {
    fs::OpenOptions::new().write(true).create(true).truncate(true).open(path)
}
