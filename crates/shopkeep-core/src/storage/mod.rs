//! Durable key-value storage for the session fields.
//!
//! The session is persisted as a small map of scalar fields (`token`,
//! `refreshToken`, `tokenExpires`, `user`, `rememberMe`). Every backend
//! writes the whole map in one operation so a reader never observes a mix of
//! old and new fields.
//!
//! Backends:
//! - `MemoryStore`: process-local, used in tests
//! - `FileStore`: plain JSON in the cache directory
//! - `EncryptedFileStore`: the same map sealed with ChaCha20-Poly1305
//! - `KeyringStore`: one secret in the OS keychain

pub mod cipher;
pub mod file;
pub mod keychain;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use file::{EncryptedFileStore, FileStore};
pub use keychain::KeyringStore;

/// Field name → value, exactly as persisted.
pub type StoredFields = BTreeMap<String, String>;

/// Names of the persisted session fields.
pub mod keys {
    pub const TOKEN: &str = "token";
    pub const REFRESH_TOKEN: &str = "refreshToken";
    pub const TOKEN_EXPIRES: &str = "tokenExpires";
    pub const USER: &str = "user";
    pub const REMEMBER_ME: &str = "rememberMe";
    pub const REFRESH_TOKEN_EXPIRES: &str = "refreshTokenExpires";
}

/// Session file name in cache directory
pub const SESSION_FILE: &str = "session.json";

/// Encrypted session file name in cache directory
pub const ENCRYPTED_SESSION_FILE: &str = "session.bin";

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt session data: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("Keychain error: {0}")]
    Keychain(#[from] keyring::Error),

    #[error("Encryption error: {0}")]
    Cipher(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;

pub trait KeyValueStore: Send + Sync {
    /// Read every stored field. A store that was never written returns an
    /// empty map.
    fn load(&self) -> Result<StoredFields>;

    /// Replace all stored fields with `fields`.
    fn store(&self, fields: &StoredFields) -> Result<()>;

    /// Remove all stored fields. Clearing an empty store is not an error.
    fn clear(&self) -> Result<()>;
}

/// Which backend holds the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageKind {
    #[default]
    File,
    EncryptedFile,
    Keyring,
    Memory,
}

/// Open the configured backend rooted at `cache_dir`.
pub fn open(kind: StorageKind, cache_dir: &Path) -> Result<Box<dyn KeyValueStore>> {
    Ok(match kind {
        StorageKind::File => Box::new(FileStore::new(cache_dir.join(SESSION_FILE))),
        StorageKind::EncryptedFile => Box::new(EncryptedFileStore::with_keychain_passphrase(
            cache_dir.join(ENCRYPTED_SESSION_FILE),
        )?),
        StorageKind::Keyring => Box::new(KeyringStore::new()),
        StorageKind::Memory => Box::new(MemoryStore::default()),
    })
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    fields: Mutex<StoredFields>,
}

impl MemoryStore {
    pub fn with_fields(fields: StoredFields) -> Self {
        Self {
            fields: Mutex::new(fields),
        }
    }
}

impl KeyValueStore for MemoryStore {
    fn load(&self) -> Result<StoredFields> {
        Ok(self
            .fields
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone())
    }

    fn store(&self, fields: &StoredFields) -> Result<()> {
        *self
            .fields
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = fields.clone();
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.fields
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_replaces_whole_map() {
        let store = MemoryStore::default();
        let mut first = StoredFields::new();
        first.insert(keys::TOKEN.to_string(), "T1".to_string());
        first.insert(keys::REFRESH_TOKEN.to_string(), "R1".to_string());
        store.store(&first).unwrap();

        let mut second = StoredFields::new();
        second.insert(keys::TOKEN.to_string(), "T2".to_string());
        store.store(&second).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.get(keys::TOKEN).map(String::as_str), Some("T2"));
        assert!(!loaded.contains_key(keys::REFRESH_TOKEN));
    }

    #[test]
    fn test_memory_store_clear_is_idempotent() {
        let store = MemoryStore::default();
        store.clear().unwrap();
        store.clear().unwrap();
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_storage_kind_config_names() {
        let kind: StorageKind = serde_json::from_str("\"encrypted_file\"").unwrap();
        assert_eq!(kind, StorageKind::EncryptedFile);
        assert_eq!(StorageKind::default(), StorageKind::File);
    }
}
