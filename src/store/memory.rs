//! In-process backend over an ordered map

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use super::{
    AtomicOperation, CommitOutcome, Key, KvBackend, KvEntry, KvStream, Mutation, StoreResult,
    Versionstamp,
};

#[derive(Debug, Default)]
struct Inner {
    entries: BTreeMap<Key, (Value, Versionstamp)>,
    last_versionstamp: u64,
}

impl Inner {
    fn next_versionstamp(&mut self) -> Versionstamp {
        self.last_versionstamp += 1;
        Versionstamp(self.last_versionstamp)
    }

    fn current(&self, key: &Key) -> Option<Versionstamp> {
        self.entries.get(key).map(|(_, vs)| *vs)
    }
}

/// Ordered in-memory backend. Every operation holds the map lock for its
/// whole duration, so single-key operations and commits are atomic.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    inner: RwLock<Inner>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl KvBackend for MemoryBackend {
    async fn get(&self, key: &Key) -> StoreResult<Option<KvEntry>> {
        let inner = self.inner.read().await;
        Ok(inner.entries.get(key).map(|(value, versionstamp)| KvEntry {
            key: key.clone(),
            value: value.clone(),
            versionstamp: *versionstamp,
        }))
    }

    async fn set(&self, key: &Key, value: Value) -> StoreResult<Versionstamp> {
        let mut inner = self.inner.write().await;
        let versionstamp = inner.next_versionstamp();
        inner.entries.insert(key.clone(), (value, versionstamp));
        Ok(versionstamp)
    }

    async fn delete(&self, key: &Key) -> StoreResult<()> {
        self.inner.write().await.entries.remove(key);
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &Key) -> StoreResult<KvStream> {
        let inner = self.inner.read().await;
        let snapshot: Vec<StoreResult<KvEntry>> = inner
            .entries
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, (value, versionstamp))| {
                Ok(KvEntry {
                    key: key.clone(),
                    value: value.clone(),
                    versionstamp: *versionstamp,
                })
            })
            .collect();
        Ok(Box::pin(tokio_stream::iter(snapshot)))
    }

    async fn commit(&self, operation: AtomicOperation) -> StoreResult<CommitOutcome> {
        let mut inner = self.inner.write().await;

        for check in &operation.checks {
            if inner.current(&check.key) != check.versionstamp {
                return Ok(CommitOutcome::CheckFailed);
            }
        }

        let versionstamp = inner.next_versionstamp();
        for mutation in operation.mutations {
            match mutation {
                Mutation::Set { key, value } => {
                    inner.entries.insert(key, (value, versionstamp));
                }
                Mutation::Delete { key } => {
                    inner.entries.remove(&key);
                }
            }
        }

        Ok(CommitOutcome::Committed(versionstamp))
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}
