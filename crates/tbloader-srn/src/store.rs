//! Durable storage for allocation records, keyed by identity.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::allocation::SrnAllocationInfo;
use crate::error::SrnResult;

/// File name of the default store.
pub const STORE_FILE_NAME: &str = "tbsrnstore.json";

#[async_trait]
pub trait SrnStore: Send + Sync {
    async fn load(&self, identity: &str) -> SrnResult<Option<SrnAllocationInfo>>;

    /// Must not return until the record is durable.
    async fn save(&self, identity: &str, record: &SrnAllocationInfo) -> SrnResult<()>;

    async fn identities(&self) -> SrnResult<Vec<String>>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreContents {
    #[serde(default)]
    identities: BTreeMap<String, SrnAllocationInfo>,
}

/// All records in one JSON document, replaced atomically on every save.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// `<data dir>/tbloader/tbsrnstore.json`, if the platform has a data dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::data_dir().map(|dir| dir.join("tbloader").join(STORE_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_contents(&self) -> SrnResult<StoreContents> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(StoreContents::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Write to `<path>.new`, flush to disk, then rename over the original.
    async fn write_contents(&self, contents: &StoreContents) -> SrnResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut staged = self.path.clone().into_os_string();
        staged.push(".new");
        let staged = PathBuf::from(staged);

        let json = serde_json::to_vec_pretty(contents)?;
        let mut file = tokio::fs::File::create(&staged).await?;
        file.write_all(&json).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&staged, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl SrnStore for JsonFileStore {
    async fn load(&self, identity: &str) -> SrnResult<Option<SrnAllocationInfo>> {
        let _guard = self.lock.lock().await;
        Ok(self.read_contents().await?.identities.remove(identity))
    }

    async fn save(&self, identity: &str, record: &SrnAllocationInfo) -> SrnResult<()> {
        let _guard = self.lock.lock().await;
        let mut contents = self.read_contents().await?;
        contents.identities.insert(identity.to_string(), record.clone());
        self.write_contents(&contents).await?;
        tracing::debug!(identity, path = %self.path.display(), next = record.next_srn, "saved allocation record");
        Ok(())
    }

    async fn identities(&self) -> SrnResult<Vec<String>> {
        let _guard = self.lock.lock().await;
        Ok(self.read_contents().await?.identities.into_keys().collect())
    }
}

/// In-process store, for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<BTreeMap<String, SrnAllocationInfo>>,
    fail_saves: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent save fail, as a full or removed disk would.
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl SrnStore for MemoryStore {
    async fn load(&self, identity: &str) -> SrnResult<Option<SrnAllocationInfo>> {
        Ok(self.records.lock().await.get(identity).cloned())
    }

    async fn save(&self, identity: &str, record: &SrnAllocationInfo) -> SrnResult<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(io::Error::other("store is failing saves").into());
        }
        self.records
            .lock()
            .await
            .insert(identity.to_string(), record.clone());
        Ok(())
    }

    async fn identities(&self) -> SrnResult<Vec<String>> {
        Ok(self.records.lock().await.keys().cloned().collect())
    }
}
