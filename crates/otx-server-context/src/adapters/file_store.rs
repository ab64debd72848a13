//! File-backed key-value store.
//!
//! Keeps the whole map in memory and rewrites the file on every change,
//! via a temp file and rename.

use crate::domain::ContextError;
use crate::ports::{BatchOperation, KeyValueStore};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Durable store for a single wallet.
pub struct FileBackedKVStore {
    data: Mutex<HashMap<Vec<u8>, Vec<u8>>>,
    path: PathBuf,
}

impl FileBackedKVStore {
    /// Open (or create) the store at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ContextError> {
        let path = path.as_ref().to_path_buf();
        let data = match std::fs::File::open(&path) {
            Ok(mut file) => {
                let mut bytes = Vec::new();
                file.read_to_end(&mut bytes)
                    .map_err(|e| ContextError::Storage(e.to_string()))?;
                let data = Self::decode(&bytes);
                info!(path = %path.display(), keys = data.len(), "Loaded wallet store");
                data
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "No wallet store yet");
                HashMap::new()
            }
            Err(e) => return Err(ContextError::Storage(e.to_string())),
        };
        Ok(Self {
            data: Mutex::new(data),
            path,
        })
    }

    // [key_len:u32][key][value_len:u32][value]...
    fn decode(bytes: &[u8]) -> HashMap<Vec<u8>, Vec<u8>> {
        let mut data = HashMap::new();
        let mut cursor = 0;
        let read_len = |at: usize| -> Option<usize> {
            let raw: [u8; 4] = bytes.get(at..at + 4)?.try_into().ok()?;
            Some(u32::from_le_bytes(raw) as usize)
        };

        while let Some(key_len) = read_len(cursor) {
            cursor += 4;
            let Some(key) = bytes.get(cursor..cursor + key_len) else { break };
            cursor += key_len;
            let Some(value_len) = read_len(cursor) else { break };
            cursor += 4;
            let Some(value) = bytes.get(cursor..cursor + value_len) else { break };
            cursor += value_len;
            data.insert(key.to_vec(), value.to_vec());
        }

        if cursor != bytes.len() {
            warn!(trailing = bytes.len() - cursor, "Ignoring truncated store tail");
        }
        data
    }

    fn save(&self, data: &HashMap<Vec<u8>, Vec<u8>>) -> Result<(), ContextError> {
        let io = |e: std::io::Error| ContextError::Storage(e.to_string());

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(io)?;
        }

        let mut bytes = Vec::new();
        for (key, value) in data {
            bytes.extend_from_slice(&(key.len() as u32).to_le_bytes());
            bytes.extend_from_slice(key);
            bytes.extend_from_slice(&(value.len() as u32).to_le_bytes());
            bytes.extend_from_slice(value);
        }

        let temp_path = self.path.with_extension("tmp");
        let mut file = std::fs::File::create(&temp_path).map_err(io)?;
        file.write_all(&bytes).map_err(io)?;
        file.sync_all().map_err(io)?;
        std::fs::rename(&temp_path, &self.path).map_err(io)
    }
}

impl KeyValueStore for FileBackedKVStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, ContextError> {
        Ok(self.data.lock().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), ContextError> {
        let mut data = self.data.lock();
        data.insert(key.to_vec(), value.to_vec());
        self.save(&data)
    }

    fn delete(&self, key: &[u8]) -> Result<(), ContextError> {
        let mut data = self.data.lock();
        if data.remove(key).is_some() {
            self.save(&data)?;
        }
        Ok(())
    }

    fn atomic_batch_write(&self, operations: Vec<BatchOperation>) -> Result<(), ContextError> {
        let mut data = self.data.lock();
        let mut staged = data.clone();
        for op in operations {
            match op {
                BatchOperation::Put { key, value } => {
                    staged.insert(key, value);
                }
                BatchOperation::Delete { key } => {
                    staged.remove(&key);
                }
            }
        }
        self.save(&staged)?;
        *data = staged;
        Ok(())
    }

    fn exists(&self, key: &[u8]) -> Result<bool, ContextError> {
        Ok(self.data.lock().contains_key(key))
    }

    fn prefix_scan(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, ContextError> {
        let mut results: Vec<_> = self
            .data
            .lock()
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        results.sort();
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("otx-store-{}-{name}.bin", std::process::id()))
    }

    #[test]
    fn test_survives_reopen() {
        let path = temp_path("reopen");
        {
            let store = FileBackedKVStore::open(&path).unwrap();
            store.put(b"context/nym/notary", b"record").unwrap();
            store.put(b"ledger/x", b"ledger").unwrap();
            store.delete(b"ledger/x").unwrap();
        }
        let store = FileBackedKVStore::open(&path).unwrap();
        assert_eq!(store.get(b"context/nym/notary").unwrap(), Some(b"record".to_vec()));
        assert!(!store.exists(b"ledger/x").unwrap());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_truncated_tail_is_ignored() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.push(b'k');
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.push(b'v');
        bytes.extend_from_slice(&9u32.to_le_bytes());
        let data = FileBackedKVStore::decode(&bytes);
        assert_eq!(data.get(b"k".as_slice()), Some(&b"v".to_vec()));
        assert_eq!(data.len(), 1);
    }
}
