//! Durable options backed by a TOML state file.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;

use crate::cache::{ConfigStore, StoreError};

/// Options persisted as a flat TOML table.
///
/// Writes go to a sibling temp file first and are renamed into place, so a
/// crash mid-write leaves the previous state intact.
pub struct FileConfigStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Result<BTreeMap<String, String>, StoreError> {
        let raw = match fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(err) => return Err(err.into()),
        };
        toml::from_str(&raw).map_err(|err| {
            StoreError::Malformed(format!("{}: {err}", self.path.display()))
        })
    }
}

#[async_trait]
impl ConfigStore for FileConfigStore {
    async fn load_option(&self, name: &str) -> Result<Option<String>, StoreError> {
        Ok(self.read_all().await?.remove(name))
    }

    async fn save_option(&self, name: &str, value: &str) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;

        let mut options = self.read_all().await?;
        options.insert(name.to_string(), value.to_string());
        let encoded = toml::to_string(&options)
            .map_err(|err| StoreError::Malformed(format!("failed to encode options: {err}")))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        let staging = self.path.with_extension("toml.tmp");
        fs::write(&staging, encoded).await?;
        fs::rename(&staging, &self.path).await?;

        debug!(path = %self.path.display(), option = name, "Saved option");
        Ok(())
    }
}
