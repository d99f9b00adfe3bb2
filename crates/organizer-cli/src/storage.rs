use std::path::PathBuf;

use crate::config::Config;
use color_eyre::Result;
use dirs::data_dir;
use organizer_storage::{key_provider::FileKeyProvider, secure_file_store::SecureFileStore};
#[cfg(test)]
use organizer_storage::key_provider::InMemoryKeyProvider;
use tracing::debug;

/// Environment override for the storage root.
pub const DATA_DIR_ENV: &str = "ACADEMIC_ORGANIZER_DATA_DIR";

/// Resolve the default storage root.
pub fn default_data_dir() -> Result<PathBuf> {
    let base = data_dir().ok_or_else(|| color_eyre::eyre::eyre!("no data dir available"))?;
    Ok(base.join("academic-organizer").join("storage"))
}

/// Storage root: environment override, then config, then the platform default.
pub fn resolve_root(config: &Config, env_override: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(root) = env_override {
        return Ok(root);
    }
    if let Some(root) = &config.data_dir {
        return Ok(root.clone());
    }
    default_data_dir()
}

/// Key file: config override, then `<data dir>/academic-organizer/encryption.key`.
pub fn key_provider(config: &Config) -> Result<FileKeyProvider> {
    match &config.key_path {
        Some(path) => Ok(FileKeyProvider::new(path.clone())),
        None => Ok(FileKeyProvider::default_location()?),
    }
}

/// Build the production store from config and environment overrides.
pub fn store_from_config(config: &Config) -> Result<SecureFileStore<FileKeyProvider>> {
    let env_override = std::env::var_os(DATA_DIR_ENV).map(PathBuf::from);
    let root = resolve_root(config, env_override)?;
    let keys = key_provider(config)?;
    debug!(?root, key_path = ?keys.path(), "configuring encrypted store");
    Ok(SecureFileStore::new(root, keys))
}

/// Helper for tests to construct a store rooted at a temp dir with an in-memory key.
#[cfg(test)]
pub fn test_store(root: impl Into<PathBuf>) -> SecureFileStore<InMemoryKeyProvider> {
    SecureFileStore::new(root, InMemoryKeyProvider::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_override_wins_over_config() {
        let config = Config {
            data_dir: Some(PathBuf::from("/from/config")),
            key_path: None,
        };
        let root = resolve_root(&config, Some(PathBuf::from("/from/env"))).expect("root");
        assert_eq!(root, PathBuf::from("/from/env"));

        let root = resolve_root(&config, None).expect("root");
        assert_eq!(root, PathBuf::from("/from/config"));
    }

    #[test]
    fn key_path_override_is_used() {
        let config = Config {
            data_dir: None,
            key_path: Some(PathBuf::from("/keys/encryption.key")),
        };
        let provider = key_provider(&config).expect("provider");
        assert_eq!(provider.path(), PathBuf::from("/keys/encryption.key").as_path());
    }
}
