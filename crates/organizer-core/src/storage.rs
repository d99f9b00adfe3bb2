use std::{io, path::PathBuf};

use async_trait::async_trait;
use thiserror::Error;

/// Boxed cause carried by initialization failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors produced by secure storage implementations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The long-lived key could not be read or created.
    #[error("failed to initialize encryption: {0}")]
    EncryptionInit(#[source] BoxError),
    /// The storage root (or the key behind it) could not be prepared.
    #[error("failed to initialize storage at {}: {source}", path.display())]
    StorageInit {
        path: PathBuf,
        #[source]
        source: BoxError,
    },
    /// Key material is not 32 bytes of lowercase hex.
    #[error("invalid key: {reason}")]
    InvalidKey { reason: String },
    /// A value could not be converted to or from its JSON form.
    #[error("serialization failed: {0}")]
    Serialization(#[source] serde_json::Error),
    /// The cipher refused the plaintext.
    #[error("encryption failed: {reason}")]
    Encryption { reason: String },
    /// Stored text is not a well-formed envelope.
    #[error("malformed envelope: {reason}")]
    MalformedEnvelope { reason: String },
    /// Tag verification failed: wrong key, tampering, or corruption.
    #[error("authentication failed: data was tampered with or encrypted under another key")]
    Authentication,
    /// An operation ran before `initialize_storage` succeeded.
    #[error("storage not initialized")]
    NotInitialized,
    /// An entry name that cannot be mapped to a file.
    #[error("invalid entry name: {reason}")]
    InvalidName { reason: String },
    /// Requested entry does not exist.
    #[error("entry not found: {}", path.display())]
    NotFound { path: PathBuf },
    #[error("failed to read {}: {source}", path.display())]
    FileRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write {}: {source}", path.display())]
    FileWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to delete {}: {source}", path.display())]
    FileDelete {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Narrow contract for encrypted-at-rest blobs used by the application's
/// course, note, and attachment layers. Entries are addressed by name; callers
/// never see file paths, envelopes, or key material.
#[async_trait]
pub trait SecureStore: Send + Sync {
    /// Persist a value under a name, overwriting any existing entry.
    async fn put(&self, name: &str, value: &[u8]) -> Result<(), StorageError>;

    /// Retrieve the value stored under a name.
    async fn get(&self, name: &str) -> Result<Vec<u8>, StorageError>;

    /// Remove a name and its value (idempotent).
    async fn delete(&self, name: &str) -> Result<(), StorageError>;
}

#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use super::*;

    #[test]
    fn storage_init_keeps_the_underlying_cause() {
        let cause = StorageError::EncryptionInit(Box::new(io::Error::new(
            io::ErrorKind::PermissionDenied,
            "denied",
        )));
        let err = StorageError::StorageInit {
            path: PathBuf::from("/tmp/store"),
            source: Box::new(cause),
        };

        let message = err.to_string();
        assert!(message.contains("/tmp/store"));
        assert!(message.contains("denied"));

        let source = err.source().expect("storage init has a source");
        assert!(source.to_string().starts_with("failed to initialize encryption"));
        assert!(source.source().is_some());
    }

    #[test]
    fn file_errors_expose_io_source() {
        let err = StorageError::FileWrite {
            path: PathBuf::from("a.txt"),
            source: io::Error::new(io::ErrorKind::Other, "disk full"),
        };
        let source = err
            .source()
            .and_then(|s| s.downcast_ref::<io::Error>())
            .expect("io source");
        assert_eq!(source.to_string(), "disk full");
    }
}
