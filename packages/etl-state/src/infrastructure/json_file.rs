//! JSON-file watermark store
//!
//! One JSON object per file, `{"<key>": "<rfc3339>", ...}`. Writes go to a
//! sibling `.tmp` file which is fsynced and renamed over the target, so a
//! crash mid-write leaves the previous map intact.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind as IoErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::domain::{Checkpoint, WatermarkStore};
use crate::error::StorageError;
use crate::Result;

type CheckpointMap = BTreeMap<String, Checkpoint>;

pub struct JsonFileWatermarkStore {
    path: PathBuf,
    // Serializes read-modify-write cycles within this process.
    write_lock: Mutex<()>,
}

impl JsonFileWatermarkStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whole map as stored on disk; a missing file is an empty map.
    pub fn load(&self) -> Result<CheckpointMap> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(CheckpointMap::new()),
            Err(e) => {
                return Err(StorageError::io(format!(
                    "Failed to read {}: {}",
                    self.path.display(),
                    e
                ))
                .with_source(e))
            }
        };

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(CheckpointMap::new());
        }

        serde_json::from_slice(&bytes)
            .map_err(|e| StorageError::corrupted(self.path.display(), e.to_string()).with_source(e))
    }

    fn store(&self, key: &str, checkpoint: Checkpoint) -> Result<()> {
        let _guard = self.write_lock.lock();

        let mut map = self.load()?;
        map.insert(key.to_string(), checkpoint);
        let encoded = serde_json::to_vec_pretty(&map)?;

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;

        let mut tmp_path = self.path.clone().into_os_string();
        tmp_path.push(".tmp");
        let tmp_path = PathBuf::from(tmp_path);

        {
            let mut tmp = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp_path)?;
            tmp.write_all(&encoded)?;
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;

        // Persist the rename itself.
        #[cfg(unix)]
        File::open(&dir)?.sync_all()?;

        Ok(())
    }
}

#[async_trait]
impl WatermarkStore for JsonFileWatermarkStore {
    async fn get(&self, key: &str) -> Result<Option<Checkpoint>> {
        Ok(self.load()?.get(key).copied())
    }

    async fn set(&self, key: &str, checkpoint: Checkpoint) -> Result<()> {
        self.store(key, checkpoint)
    }
}
