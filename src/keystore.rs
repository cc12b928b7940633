//! Secure persistent key-value storage for the reconciled receipt.
//!
//! The default [`FileStore`] keeps records under
//! `dirs::data_dir()/<namespace>/` with SHA-256-hashed key filenames and
//! temp file + rename for atomic writes. Platform keychain integrations
//! implement the same trait.

use crate::LedgerError;
use std::fs;
use std::path::PathBuf;

/// Durable key-value store surviving process restarts.
pub trait SecureStore: Send + Sync {
    /// Read the bytes stored under `key`, if any.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, LedgerError>;

    /// Write `value` under `key`, replacing any previous value atomically.
    fn set(&self, key: &str, value: &[u8]) -> Result<(), LedgerError>;

    /// Remove every stored record.
    fn remove_all(&self) -> Result<(), LedgerError>;
}

/// File-based secure store backend.
pub struct FileStore {
    /// Directory for stored records.
    store_dir: PathBuf,
}

impl FileStore {
    /// Create a new file store with the given namespace.
    ///
    /// Records are stored under `dirs::data_dir()/<namespace>/`.
    pub fn new(namespace: &str) -> Result<Self, LedgerError> {
        let base_dir = dirs::data_dir()
            .ok_or_else(|| LedgerError::StoreIO("Could not find data directory".to_string()))?;
        Self::with_path(base_dir.join(namespace))
    }

    /// Create a file store at a specific path.
    pub fn with_path(store_dir: PathBuf) -> Result<Self, LedgerError> {
        fs::create_dir_all(&store_dir)
            .map_err(|e| LedgerError::StoreIO(format!("Failed to create store dir: {}", e)))?;
        Ok(Self { store_dir })
    }

    /// Path for a record, keyed by hashed name to keep filenames opaque.
    fn record_path(&self, key: &str) -> PathBuf {
        let hash = hash_key(key);
        self.store_dir.join(format!("{}.json", &hash[..16]))
    }
}

impl SecureStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, LedgerError> {
        let path = self.record_path(key);
        if !path.exists() {
            return Ok(None);
        }
        fs::read(&path)
            .map(Some)
            .map_err(|e| LedgerError::StoreIO(format!("Failed to read record: {}", e)))
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), LedgerError> {
        let target_path = self.record_path(key);
        let temp_path = self.store_dir.join(format!("{}.tmp", hash_key(key)));

        // Write to temp file
        fs::write(&temp_path, value)
            .map_err(|e| LedgerError::StoreIO(format!("Failed to write temp file: {}", e)))?;

        // Atomic rename
        fs::rename(&temp_path, &target_path)
            .map_err(|e| LedgerError::StoreIO(format!("Failed to rename record: {}", e)))?;

        Ok(())
    }

    fn remove_all(&self) -> Result<(), LedgerError> {
        for entry in fs::read_dir(&self.store_dir)
            .map_err(|e| LedgerError::StoreIO(format!("Failed to read store dir: {}", e)))?
        {
            let entry =
                entry.map_err(|e| LedgerError::StoreIO(format!("Failed to read entry: {}", e)))?;
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                fs::remove_file(&path)
                    .map_err(|e| LedgerError::StoreIO(format!("Failed to delete: {}", e)))?;
            }
        }
        Ok(())
    }
}

/// SHA-256 hash of a storage key, hex-encoded.
///
/// Keeps key names out of the filesystem.
fn hash_key(key: &str) -> String {
    use sha2::{Digest, Sha256};
    let hash = Sha256::digest(key.as_bytes());
    hex::encode(hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileStore::with_path(temp_dir.path().to_path_buf()).unwrap();

        store.set("receipt", b"{\"entitlements\":{}}").unwrap();
        let loaded = store.get("receipt").unwrap();
        assert_eq!(loaded.as_deref(), Some(b"{\"entitlements\":{}}".as_ref()));
    }

    #[test]
    fn get_missing_key_is_none() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileStore::with_path(temp_dir.path().to_path_buf()).unwrap();
        assert!(store.get("nonexistent").unwrap().is_none());
    }

    #[test]
    fn set_replaces_previous_value_atomically() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileStore::with_path(temp_dir.path().to_path_buf()).unwrap();

        store.set("receipt", b"first").unwrap();
        store.set("receipt", b"second").unwrap();
        assert_eq!(store.get("receipt").unwrap().as_deref(), Some(&b"second"[..]));
    }

    #[test]
    fn remove_all_clears_every_record() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileStore::with_path(temp_dir.path().to_path_buf()).unwrap();

        store.set("receipt", b"a").unwrap();
        store.set("other", b"b").unwrap();
        store.remove_all().unwrap();

        assert!(store.get("receipt").unwrap().is_none());
        assert!(store.get("other").unwrap().is_none());
    }

    #[test]
    fn filenames_do_not_contain_key() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileStore::with_path(temp_dir.path().to_path_buf()).unwrap();
        store.set("receipt", b"a").unwrap();

        let names: Vec<String> = fs::read_dir(temp_dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert!(names.iter().all(|name| !name.contains("receipt")));
    }
}
