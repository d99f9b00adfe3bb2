use std::{
    io::{self, Write},
    path::{Path, PathBuf},
    sync::atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
    Engine as _,
};
use organizer_core::storage::{SecureStore, StorageError};
use serde::{de::DeserializeOwned, Serialize};
use tempfile::NamedTempFile;
use tokio::sync::OnceCell;
use tracing::{debug, instrument, warn};

use crate::{
    cipher::{self, CipherError},
    key_provider::{KeyMaterial, KeyProvider},
    shred,
};

/// Lifecycle of a store. There is no way back from `Ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreState {
    Uninitialized,
    Initializing,
    Ready,
}

/// Longest entry name, in bytes, accepted by the `SecureStore` methods. Names
/// are stored as unpadded URL-safe base64, and 191 bytes encode to 255
/// characters, the usual file-name limit.
pub const MAX_NAME_LEN: usize = 191;

/// AES-GCM encrypted file store rooted at a directory.
///
/// Every file written through the store holds exactly one envelope; plaintext
/// never reaches the disk. The key is fetched from the `KeyProvider` once, on
/// the first successful `initialize_storage`, and shared read-only afterwards.
/// There is no per-path locking: concurrent writers to one path race and the
/// last rename wins.
pub struct SecureFileStore<P: KeyProvider> {
    root: PathBuf,
    key_provider: P,
    key: OnceCell<KeyMaterial>,
    pending: AtomicUsize,
}

impl<P: KeyProvider> SecureFileStore<P> {
    pub fn new(root: impl Into<PathBuf>, key_provider: P) -> Self {
        Self {
            root: root.into(),
            key_provider,
            key: OnceCell::new(),
            pending: AtomicUsize::new(0),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn state(&self) -> StoreState {
        if self.key.initialized() {
            StoreState::Ready
        } else if self.pending.load(Ordering::Acquire) > 0 {
            StoreState::Initializing
        } else {
            StoreState::Uninitialized
        }
    }

    /// Create the storage root and load (or create) the key. Safe to call
    /// repeatedly and concurrently; the key provider runs at most once per
    /// successful initialization.
    #[instrument(skip_all, fields(root = %self.root.display()))]
    pub async fn initialize_storage(&self) -> Result<&Path, StorageError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|err| self.init_err(err))?;

        if self.key.initialized() {
            return Ok(self.root.as_path());
        }

        let _pending = PendingInit::enter(&self.pending);
        let loaded = self
            .key
            .get_or_try_init(|| async {
                self.key_provider
                    .get_or_create()
                    .await
                    .map_err(StorageError::from)
            })
            .await;

        match loaded {
            Ok(_) => {
                debug!("storage ready");
                Ok(self.root.as_path())
            }
            Err(err) => Err(self.init_err(err)),
        }
    }

    /// Encrypt `content` and write the envelope to `path`, replacing whatever was there.
    #[instrument(skip_all, fields(path = %path.display()))]
    pub async fn save_file<T: Serialize + ?Sized>(
        &self,
        path: &Path,
        content: &T,
    ) -> Result<(), StorageError> {
        let key = self.key()?;
        let envelope = cipher::encrypt_with_key(content, key)?;
        write_envelope(path, envelope).await?;
        debug!("saved encrypted file");
        Ok(())
    }

    /// Read the envelope at `path` and decrypt it.
    #[instrument(skip_all, fields(path = %path.display()))]
    pub async fn load_file<T: DeserializeOwned>(&self, path: &Path) -> Result<T, StorageError> {
        let key = self.key()?;
        let bytes = tokio::fs::read(path).await.map_err(|err| {
            if err.kind() == io::ErrorKind::NotFound {
                StorageError::NotFound {
                    path: path.to_path_buf(),
                }
            } else {
                StorageError::FileRead {
                    path: path.to_path_buf(),
                    source: err,
                }
            }
        })?;
        let text = String::from_utf8(bytes).map_err(|_| StorageError::MalformedEnvelope {
            reason: "file is not UTF-8 text".to_string(),
        })?;

        cipher::decrypt_with_key(&text, key).map_err(|err: CipherError| {
            warn!(error = %err, "rejected stored envelope");
            StorageError::from(err)
        })
    }

    /// Overwrite `path` with random bytes, then remove it. Missing files are
    /// ignored. If the overwrite fails the file is left in place, partially
    /// overwritten, and the error is returned.
    #[instrument(skip_all, fields(path = %path.display()))]
    pub async fn delete_file(&self, path: &Path) -> Result<(), StorageError> {
        let existed = shred::shred_file(path)
            .await
            .map_err(|source| StorageError::FileDelete {
                path: path.to_path_buf(),
                source,
            })?;
        debug!(existed, "deleted file");
        Ok(())
    }

    fn key(&self) -> Result<&KeyMaterial, StorageError> {
        self.key.get().ok_or(StorageError::NotInitialized)
    }

    fn path_for(&self, name: &str) -> Result<PathBuf, StorageError> {
        if name.is_empty() {
            return Err(StorageError::InvalidName {
                reason: "name is empty".to_string(),
            });
        }
        if name.len() > MAX_NAME_LEN {
            return Err(StorageError::InvalidName {
                reason: format!("name is {} bytes, limit is {MAX_NAME_LEN}", name.len()),
            });
        }
        Ok(self.root.join(sanitize_name(name)))
    }

    fn init_err(&self, source: impl Into<organizer_core::storage::BoxError>) -> StorageError {
        StorageError::StorageInit {
            path: self.root.clone(),
            source: source.into(),
        }
    }
}

#[async_trait]
impl<P: KeyProvider> SecureStore for SecureFileStore<P> {
    #[instrument(skip_all, fields(name = %name))]
    async fn put(&self, name: &str, value: &[u8]) -> Result<(), StorageError> {
        let path = self.path_for(name)?;
        self.initialize_storage().await?;
        let encoded = STANDARD.encode(value);
        self.save_file(&path, &encoded).await
    }

    #[instrument(skip_all, fields(name = %name))]
    async fn get(&self, name: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.path_for(name)?;
        self.initialize_storage().await?;
        let encoded: String = self.load_file(&path).await?;
        STANDARD
            .decode(encoded)
            .map_err(|e| StorageError::MalformedEnvelope {
                reason: format!("payload is not base64: {e}"),
            })
    }

    #[instrument(skip_all, fields(name = %name))]
    async fn delete(&self, name: &str) -> Result<(), StorageError> {
        self.delete_file(&self.path_for(name)?).await
    }
}

/// Marks one caller inside `initialize_storage`. Dropping it, including on
/// cancellation, takes the caller back out.
struct PendingInit<'a>(&'a AtomicUsize);

impl<'a> PendingInit<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for PendingInit<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Write through a temp file in the target directory, then rename over `path`,
/// so readers see either the previous envelope or the new one.
async fn write_envelope(path: &Path, envelope: String) -> Result<(), StorageError> {
    let target = path.to_path_buf();
    tokio::task::spawn_blocking(move || write_envelope_blocking(&target, envelope.as_bytes()))
        .await
        .map_err(|err| StorageError::FileWrite {
            path: path.to_path_buf(),
            source: io::Error::new(io::ErrorKind::Other, err),
        })?
}

fn write_envelope_blocking(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    let write_err = |source: io::Error| StorageError::FileWrite {
        path: path.to_path_buf(),
        source,
    };
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut tmp = NamedTempFile::new_in(parent).map_err(write_err)?;
    tmp.write_all(bytes).map_err(write_err)?;
    tmp.as_file().sync_all().map_err(write_err)?;
    tmp.persist(path).map_err(|e| write_err(e.error))?;
    Ok(())
}

fn sanitize_name(name: &str) -> String {
    URL_SAFE_NO_PAD.encode(name)
}
