use std::{
    fmt, io,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use organizer_core::storage::StorageError;
use rand::{rngs::OsRng, RngCore};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::cipher::decode_hex;

/// Length of the symmetric key in bytes (AES-256).
pub const KEY_LEN: usize = 32;

const APP_DIR: &str = "academic-organizer";
const KEY_FILE: &str = "encryption.key";

/// Key material used for encryption at rest. Zeroed on drop and never printed.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial {
    bytes: [u8; KEY_LEN],
}

impl KeyMaterial {
    #[cfg(test)]
    pub(crate) fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self { bytes }
    }

    /// Fresh key from the OS CSPRNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        let material = Self { bytes };
        bytes.zeroize();
        material
    }

    /// Parse a key from lowercase hex. Anything but 64 lowercase hex digits is rejected.
    pub fn from_hex(hex: &str) -> Result<Self, KeyError> {
        let bytes = Zeroizing::new(decode_hex(hex).map_err(KeyError::Decode)?);
        Self::from_slice(&bytes)
    }

    fn from_slice(bytes: &[u8]) -> Result<Self, KeyError> {
        if bytes.len() != KEY_LEN {
            return Err(KeyError::Decode(format!(
                "expected {KEY_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        let mut out = [0u8; KEY_LEN];
        out.copy_from_slice(bytes);
        Ok(Self { bytes: out })
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }

    /// Lowercase hex form, zeroed when dropped.
    pub fn to_hex(&self) -> Zeroizing<String> {
        Zeroizing::new(hex::encode(&self.bytes))
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("bytes", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("key file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("decode error: {0}")]
    Decode(String),
    #[error("generation error: {0}")]
    Generation(String),
    #[error("no application data directory available on this platform")]
    NoDataDir,
}

impl From<KeyError> for StorageError {
    fn from(err: KeyError) -> Self {
        StorageError::EncryptionInit(Box::new(err))
    }
}

/// Provides access to the long-lived storage key (key file in production; memory in tests).
#[async_trait]
pub trait KeyProvider: Send + Sync {
    async fn get_or_create(&self) -> Result<KeyMaterial, KeyError>;
}

/// Key persisted as 32 raw bytes in a file, created on first use.
///
/// Two processes creating the key for the first time at the same moment race:
/// each may generate its own key and the file ends up holding whichever write
/// lands last (or an interleaving of both). The loser keeps encrypting under a
/// key that no longer exists on disk. Nothing here guards against that.
#[derive(Debug, Clone)]
pub struct FileKeyProvider {
    path: PathBuf,
}

impl FileKeyProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<data dir>/academic-organizer/encryption.key` for the current user.
    pub fn default_location() -> Result<Self, KeyError> {
        let base = dirs::data_dir().ok_or(KeyError::NoDataDir)?;
        Ok(Self::new(base.join(APP_DIR).join(KEY_FILE)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Ensure a key exists on disk and return it hex-encoded.
    pub async fn initialize_encryption(&self) -> Result<Zeroizing<String>, KeyError> {
        let material = self.load_or_create().await?;
        Ok(material.to_hex())
    }

    #[instrument(skip_all, fields(path = %self.path.display()))]
    async fn load_or_create(&self) -> Result<KeyMaterial, KeyError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| self.io_err(source))?;
        }

        match tokio::fs::read(&self.path).await {
            Ok(bytes) => {
                let bytes = Zeroizing::new(bytes);
                debug!("loaded existing key");
                KeyMaterial::from_slice(&bytes)
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                let material = KeyMaterial::generate();
                self.write_key(&material).await?;
                info!("generated new storage key");
                Ok(material)
            }
            Err(err) => Err(self.io_err(err)),
        }
    }

    async fn write_key(&self, material: &KeyMaterial) -> Result<(), KeyError> {
        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options
            .open(&self.path)
            .await
            .map_err(|source| self.io_err(source))?;
        file.write_all(material.as_bytes())
            .await
            .map_err(|source| self.io_err(source))?;
        file.sync_all().await.map_err(|source| self.io_err(source))
    }

    fn io_err(&self, source: io::Error) -> KeyError {
        KeyError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

#[async_trait]
impl KeyProvider for FileKeyProvider {
    async fn get_or_create(&self) -> Result<KeyMaterial, KeyError> {
        self.load_or_create().await
    }
}

/// In-memory key provider for tests and ephemeral sessions.
#[derive(Debug, Default, Clone)]
pub struct InMemoryKeyProvider {
    inner: Arc<Mutex<Option<KeyMaterial>>>,
}

impl InMemoryKeyProvider {
    /// Provider that always hands out `material`.
    pub fn with_key(material: KeyMaterial) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(material))),
        }
    }
}

#[async_trait]
impl KeyProvider for InMemoryKeyProvider {
    async fn get_or_create(&self) -> Result<KeyMaterial, KeyError> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|err| KeyError::Generation(format!("lock poisoned: {err}")))?;

        if let Some(existing) = guard.clone() {
            return Ok(existing);
        }

        let material = KeyMaterial::generate();
        *guard = Some(material.clone());
        Ok(material)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_provider_returns_same_key() {
        let provider = InMemoryKeyProvider::default();
        let first = provider.get_or_create().await.unwrap();
        let second = provider.get_or_create().await.unwrap();

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn file_provider_creates_key_and_parent_dirs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join(APP_DIR).join(KEY_FILE);
        let provider = FileKeyProvider::new(&path);

        let key_hex = provider.initialize_encryption().await.expect("init");
        assert_eq!(key_hex.len(), 64);
        assert!(key_hex
            .bytes()
            .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')));

        let raw = std::fs::read(&path).expect("key file");
        assert_eq!(raw.len(), KEY_LEN);
        assert_eq!(hex::encode(&raw), key_hex.as_str());
    }

    #[tokio::test]
    async fn file_provider_returns_same_key_twice() {
        let dir = tempfile::tempdir().expect("tempdir");
        let provider = FileKeyProvider::new(dir.path().join(KEY_FILE));

        let first = provider.initialize_encryption().await.expect("first");
        let second = provider.initialize_encryption().await.expect("second");
        assert_eq!(first, second);

        let reopened = FileKeyProvider::new(dir.path().join(KEY_FILE));
        let third = reopened.get_or_create().await.expect("third");
        assert_eq!(third.to_hex(), first);
    }

    #[tokio::test]
    async fn file_provider_rejects_truncated_key_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(KEY_FILE);
        std::fs::write(&path, [7u8; 10]).expect("write short key");

        let err = FileKeyProvider::new(&path)
            .get_or_create()
            .await
            .expect_err("short key file must be rejected");
        assert!(matches!(err, KeyError::Decode(_)));
        // the bad file is left alone rather than regenerated
        assert_eq!(std::fs::read(&path).expect("read").len(), 10);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn file_provider_writes_owner_only_key() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(KEY_FILE);
        FileKeyProvider::new(&path)
            .get_or_create()
            .await
            .expect("create");

        let mode = std::fs::metadata(&path).expect("metadata").permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn from_hex_rejects_wrong_length() {
        let err = KeyMaterial::from_hex("abcd").expect_err("should reject wrong length");
        assert!(matches!(err, KeyError::Decode(_)));
    }

    #[test]
    fn from_hex_rejects_uppercase() {
        let upper = "AB".repeat(KEY_LEN);
        assert!(KeyMaterial::from_hex(&upper).is_err());
        assert!(KeyMaterial::from_hex(&upper.to_lowercase()).is_ok());
    }

    #[test]
    fn debug_output_redacts_key_bytes() {
        let material = KeyMaterial::from_bytes([0xab; KEY_LEN]);
        let printed = format!("{material:?}");
        assert!(!printed.contains("ab, ab") && !printed.contains("171"));
        assert!(printed.contains("redacted"));
    }

    #[test]
    fn key_error_converts_to_encryption_init() {
        let err: StorageError = KeyError::NoDataDir.into();
        assert!(matches!(err, StorageError::EncryptionInit(_)));
    }
}
