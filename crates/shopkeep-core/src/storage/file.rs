use std::path::{Path, PathBuf};

use super::{cipher, keychain, KeyValueStore, Result, StoredFields};

/// Write `contents` next to `path` and rename it into place, so a crash or
/// a concurrent reader never sees a half-written file.
fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Session fields as a pretty-printed JSON object on disk.
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl KeyValueStore for FileStore {
    fn load(&self) -> Result<StoredFields> {
        if !self.path.exists() {
            return Ok(StoredFields::new());
        }
        let contents = std::fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    fn store(&self, fields: &StoredFields) -> Result<()> {
        let contents = serde_json::to_string_pretty(fields)?;
        write_atomic(&self.path, contents.as_bytes())
    }

    fn clear(&self) -> Result<()> {
        remove_if_exists(&self.path)
    }
}

/// Session fields sealed with a passphrase before they touch the disk.
pub struct EncryptedFileStore {
    path: PathBuf,
    passphrase: String,
}

impl EncryptedFileStore {
    pub fn new(path: PathBuf, passphrase: String) -> Self {
        Self { path, passphrase }
    }

    /// Use the passphrase kept in the OS keychain, generating one if needed.
    pub fn with_keychain_passphrase(path: PathBuf) -> Result<Self> {
        Ok(Self::new(path, keychain::session_passphrase()?))
    }
}

impl KeyValueStore for EncryptedFileStore {
    fn load(&self) -> Result<StoredFields> {
        if !self.path.exists() {
            return Ok(StoredFields::new());
        }
        let sealed = std::fs::read(&self.path)?;
        let plaintext = cipher::open(&self.passphrase, &sealed)?;
        Ok(serde_json::from_slice(&plaintext)?)
    }

    fn store(&self, fields: &StoredFields) -> Result<()> {
        let plaintext = serde_json::to_vec(fields)?;
        let sealed = cipher::seal(&self.passphrase, &plaintext)?;
        write_atomic(&self.path, &sealed)
    }

    fn clear(&self) -> Result<()> {
        remove_if_exists(&self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{keys, StorageError};

    fn sample() -> StoredFields {
        let mut fields = StoredFields::new();
        fields.insert(keys::TOKEN.to_string(), "T1".to_string());
        fields.insert(keys::TOKEN_EXPIRES.to_string(), "2099-01-01T00:00:00+00:00".to_string());
        fields.insert(keys::REMEMBER_ME.to_string(), "true".to_string());
        fields
    }

    #[test]
    fn test_file_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("session.json");

        FileStore::new(path.clone()).store(&sample()).unwrap();
        let reopened = FileStore::new(path.clone());
        assert_eq!(reopened.load().unwrap(), sample());
        // No temp file left behind
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_file_store_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("session.json"));
        assert!(store.load().unwrap().is_empty());
        store.clear().unwrap();
    }

    #[test]
    fn test_file_store_clear_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("session.json"));
        store.store(&sample()).unwrap();
        store.clear().unwrap();
        assert!(!store.path().exists());
        store.clear().unwrap();
    }

    #[test]
    fn test_encrypted_store_does_not_leak_plaintext() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.bin");
        let store = EncryptedFileStore::new(path.clone(), "pw".to_string());
        store.store(&sample()).unwrap();

        let raw = std::fs::read(&path).unwrap();
        assert!(!raw.windows(12).any(|w| w == b"tokenExpires"));
        assert_eq!(store.load().unwrap(), sample());
    }

    #[test]
    fn test_encrypted_store_wrong_passphrase() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.bin");
        EncryptedFileStore::new(path.clone(), "pw".to_string())
            .store(&sample())
            .unwrap();

        let other = EncryptedFileStore::new(path, "not-pw".to_string());
        assert!(matches!(other.load(), Err(StorageError::Cipher(_))));
    }
}
