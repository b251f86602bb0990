// src/store/file.rs
//! File-backed key-value store, one JSON file per key

use super::KeyValueStore;
use crate::error::{RecorderError, Result};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct FileStore {
    base_dir: PathBuf,
}

impl FileStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        fs::create_dir_all(&base_dir).map_err(|e| {
            RecorderError::Storage(format!(
                "Failed to create data directory {}: {}",
                base_dir.display(),
                e
            ))
        })?;
        Ok(Self { base_dir })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(RecorderError::Storage(format!("Invalid store key '{}'", key)));
        }
        Ok(self.base_dir.join(format!("{}.json", key)))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(RecorderError::Io(e)),
        }
    }

    /// Replace the value atomically: write a temp file, then rename over
    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        let path = self.path_for(key)?;
        let temp_path = path.with_extension("tmp");

        let mut file = fs::File::create(&temp_path)?;
        file.write_all(value)?;
        file.sync_all()?;

        match fs::rename(&temp_path, &path) {
            Ok(()) => Ok(()),
            Err(_) if path.exists() => {
                let _ = fs::remove_file(&path);
                fs::rename(&temp_path, &path).map_err(RecorderError::Io)
            }
            Err(e) => Err(RecorderError::Io(e)),
        }
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(RecorderError::Io(e)),
        }
    }
}
