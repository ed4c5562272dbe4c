//! Ordered key-value store
//!
//! The store offers per-key atomic get/set/delete, ordered prefix scans and a
//! compare-and-swap commit over several keys. Backends implement
//! [`KvBackend`]; the rest of the crate talks to the typed [`KvStore`] handle,
//! which is built once at startup and cloned into every repository.

pub mod key;
pub mod memory;
pub mod postgres;

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio_stream::{Stream, StreamExt};

pub use key::Key;
pub use memory::MemoryBackend;
pub use postgres::PostgresBackend;

/// Store-assigned write version of an entry. Strictly increases with every
/// write made through the same backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Versionstamp(pub u64);

impl std::fmt::Display for Versionstamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:020}", self.0)
    }
}

/// Raw entry as returned by a backend
#[derive(Debug, Clone, PartialEq)]
pub struct KvEntry {
    pub key: Key,
    pub value: Value,
    pub versionstamp: Versionstamp,
}

/// Decoded entry together with the versionstamp it was read at
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub key: Key,
    pub value: T,
    pub versionstamp: Versionstamp,
}

/// Store layer errors. Never interpreted as domain outcomes.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt entry at {key}: {message}")]
    Corrupt { key: Key, message: String },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Lazy, finite, ordered sequence of entries. Each scan call yields a fresh
/// snapshot; it is not a live view.
pub type KvStream = Pin<Box<dyn Stream<Item = StoreResult<KvEntry>> + Send>>;

/// Precondition of an atomic commit
#[derive(Debug, Clone, PartialEq)]
pub struct Check {
    pub key: Key,
    /// `None` requires the key to be absent.
    pub versionstamp: Option<Versionstamp>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    Set { key: Key, value: Value },
    Delete { key: Key },
}

/// Checks plus mutations applied all-or-nothing by [`KvBackend::commit`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AtomicOperation {
    pub checks: Vec<Check>,
    pub mutations: Vec<Mutation>,
}

impl AtomicOperation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `key` to still be at `versionstamp` (or absent for `None`).
    pub fn check(&mut self, key: Key, versionstamp: Option<Versionstamp>) -> &mut Self {
        self.checks.push(Check { key, versionstamp });
        self
    }

    pub fn set<T: Serialize>(&mut self, key: Key, value: &T) -> StoreResult<&mut Self> {
        let value = serde_json::to_value(value)?;
        self.mutations.push(Mutation::Set { key, value });
        Ok(self)
    }

    pub fn delete(&mut self, key: Key) -> &mut Self {
        self.mutations.push(Mutation::Delete { key });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }
}

/// Result of an atomic commit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed(Versionstamp),
    /// At least one check no longer held; nothing was written.
    CheckFailed,
}

/// Storage backend contract
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KvBackend: Send + Sync {
    async fn get(&self, key: &Key) -> StoreResult<Option<KvEntry>>;

    async fn set(&self, key: &Key, value: Value) -> StoreResult<Versionstamp>;

    async fn delete(&self, key: &Key) -> StoreResult<()>;

    /// Entries whose key starts with `prefix`, in key order.
    async fn scan_prefix(&self, prefix: &Key) -> StoreResult<KvStream>;

    async fn commit(&self, operation: AtomicOperation) -> StoreResult<CommitOutcome>;

    async fn ping(&self) -> StoreResult<()>;
}

/// Typed handle over a backend, cheap to clone
#[derive(Clone)]
pub struct KvStore {
    backend: Arc<dyn KvBackend>,
}

impl KvStore {
    pub fn new(backend: Arc<dyn KvBackend>) -> Self {
        Self { backend }
    }

    /// In-process store, used by tests and by `store.backend = "memory"`.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &Key) -> StoreResult<Option<Versioned<T>>> {
        match self.backend.get(key).await? {
            Some(entry) => decode(entry).map(Some),
            None => Ok(None),
        }
    }

    pub async fn get_raw(&self, key: &Key) -> StoreResult<Option<KvEntry>> {
        self.backend.get(key).await
    }

    pub async fn set<T: Serialize>(&self, key: &Key, value: &T) -> StoreResult<Versionstamp> {
        let value = serde_json::to_value(value)?;
        self.backend.set(key, value).await
    }

    pub async fn delete(&self, key: &Key) -> StoreResult<()> {
        self.backend.delete(key).await
    }

    pub async fn scan_prefix(&self, prefix: &Key) -> StoreResult<KvStream> {
        self.backend.scan_prefix(prefix).await
    }

    /// Decodes every entry under `prefix` whose key has exactly `depth`
    /// segments, skipping deeper keys that share the prefix.
    pub async fn list<T: DeserializeOwned>(
        &self,
        prefix: &Key,
        depth: usize,
    ) -> StoreResult<Vec<Versioned<T>>> {
        let mut stream = self.backend.scan_prefix(prefix).await?;
        let mut out = Vec::new();
        while let Some(entry) = stream.next().await {
            let entry = entry?;
            if entry.key.len() != depth {
                continue;
            }
            out.push(decode(entry)?);
        }
        Ok(out)
    }

    /// Keys under `prefix` with exactly `depth` segments.
    pub async fn list_keys(&self, prefix: &Key, depth: usize) -> StoreResult<Vec<Key>> {
        let mut stream = self.backend.scan_prefix(prefix).await?;
        let mut out = Vec::new();
        while let Some(entry) = stream.next().await {
            let entry = entry?;
            if entry.key.len() == depth {
                out.push(entry.key);
            }
        }
        Ok(out)
    }

    pub async fn commit(&self, operation: AtomicOperation) -> StoreResult<CommitOutcome> {
        self.backend.commit(operation).await
    }

    pub async fn ping(&self) -> StoreResult<()> {
        self.backend.ping().await
    }
}

fn decode<T: DeserializeOwned>(entry: KvEntry) -> StoreResult<Versioned<T>> {
    let value = serde_json::from_value(entry.value).map_err(|e| StoreError::Corrupt {
        key: entry.key.clone(),
        message: e.to_string(),
    })?;
    Ok(Versioned {
        key: entry.key,
        value,
        versionstamp: entry.versionstamp,
    })
}
