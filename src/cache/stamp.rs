//! Generation stamps.
//!
//! Every effective key starts with the current stamp. Rotating the stamp
//! orphans all previously stored blocks at once; the store evicts them later
//! through expiry or capacity pressure.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use metrics::counter;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use super::lock::{rw_read, rw_write};
use super::store::StoreError;

const SOURCE: &str = "cache::stamp";

/// Option name the stamp is persisted under.
pub const STAMP_OPTION: &str = "CBF";

pub(crate) const METRIC_GENERATION_ROTATE: &str = "blockcache_generation_rotate_total";

/// Durable named settings.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn load_option(&self, name: &str) -> Result<Option<String>, StoreError>;

    async fn save_option(&self, name: &str, value: &str) -> Result<(), StoreError>;
}

/// Options held in memory only; suitable for tests and single-process use.
#[derive(Default)]
pub struct MemoryConfigStore {
    options: RwLock<HashMap<String, String>>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn load_option(&self, name: &str) -> Result<Option<String>, StoreError> {
        Ok(rw_read(&self.options, SOURCE, "load_option")
            .get(name)
            .cloned())
    }

    async fn save_option(&self, name: &str, value: &str) -> Result<(), StoreError> {
        rw_write(&self.options, SOURCE, "save_option")
            .insert(name.to_string(), value.to_string());
        Ok(())
    }
}

/// Owner of the current generation stamp.
///
/// Reads are a lock-guarded `Arc` clone. Rotation is serialized so two
/// concurrent flushes cannot persist out of order.
pub struct GenerationStamps {
    options: Arc<dyn ConfigStore>,
    current: RwLock<Arc<str>>,
    rotate_lock: Mutex<()>,
}

impl GenerationStamps {
    /// Read the persisted stamp, creating and saving one if absent.
    pub async fn load(options: Arc<dyn ConfigStore>) -> Result<Self, StoreError> {
        let stamp = match options.load_option(STAMP_OPTION).await? {
            Some(stamp) if !stamp.is_empty() => stamp,
            _ => {
                let stamp = new_stamp(None);
                options.save_option(STAMP_OPTION, &stamp).await?;
                info!(stamp = %stamp, "Created generation stamp");
                stamp
            }
        };

        Ok(Self {
            options,
            current: RwLock::new(Arc::from(stamp)),
            rotate_lock: Mutex::new(()),
        })
    }

    /// Stamp held by this process.
    ///
    /// Rotations made by another process through the same option store are
    /// only seen after [`refresh`](Self::refresh).
    pub fn current(&self) -> Arc<str> {
        rw_read(&self.current, SOURCE, "current").clone()
    }

    /// Re-read the persisted stamp and adopt it if it changed.
    ///
    /// Returns `true` when the stamp was replaced. A missing or empty option
    /// keeps the held stamp.
    pub async fn refresh(&self) -> Result<bool, StoreError> {
        let _serialized = self.rotate_lock.lock().await;
        let Some(stored) = self
            .options
            .load_option(STAMP_OPTION)
            .await?
            .filter(|stamp| !stamp.is_empty())
        else {
            return Ok(false);
        };

        let mut current = rw_write(&self.current, SOURCE, "refresh");
        if **current == *stored {
            return Ok(false);
        }
        let next: Arc<str> = Arc::from(stored);
        let previous = std::mem::replace(&mut *current, Arc::clone(&next));
        drop(current);

        info!(previous = %previous, current = %next, "Adopted persisted generation stamp");
        Ok(true)
    }

    /// Replace the stamp with a fresh one and persist it.
    ///
    /// The new value is visible to readers only after it has been saved.
    pub async fn rotate(&self) -> Result<Arc<str>, StoreError> {
        let _serialized = self.rotate_lock.lock().await;
        let previous = self.current();
        let next = new_stamp(Some(&*previous));

        self.options.save_option(STAMP_OPTION, &next).await?;
        let next: Arc<str> = Arc::from(next);
        *rw_write(&self.current, SOURCE, "rotate") = Arc::clone(&next);

        counter!(METRIC_GENERATION_ROTATE).increment(1);
        info!(previous = %previous, current = %next, "Rotated generation stamp");
        Ok(next)
    }
}

/// `CBF_<unix seconds>_<8 hex>_`, never equal to `previous`.
fn new_stamp(previous: Option<&str>) -> String {
    let seconds = OffsetDateTime::now_utc().unix_timestamp();
    loop {
        let nonce = Uuid::new_v4().simple().to_string();
        let stamp = format!("{STAMP_OPTION}_{seconds}_{}_", &nonce[..8]);
        if previous != Some(stamp.as_str()) {
            return stamp;
        }
    }
}
