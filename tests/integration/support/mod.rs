//! Shared fixtures for the integration tests

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use biblion_server::{
    config::{AppConfig, LoansConfig},
    models::{
        book::{BookCategory, NewBook},
        user::{NewUser, User, UserRole},
    },
    repository::Repository,
    services::{auth::Argon2Hasher, loans::LoansService, Services},
    store::{
        AtomicOperation, CommitOutcome, Key, KvBackend, KvEntry, KvStore, KvStream, MemoryBackend,
        StoreResult, Versionstamp,
    },
    AppState,
};

/// In-memory backend that hands control back to the scheduler before every
/// call, so that concurrent operations on a current-thread runtime interleave
/// at each store access.
#[derive(Default)]
pub struct YieldingBackend {
    inner: MemoryBackend,
}

#[async_trait]
impl KvBackend for YieldingBackend {
    async fn get(&self, key: &Key) -> StoreResult<Option<KvEntry>> {
        tokio::task::yield_now().await;
        self.inner.get(key).await
    }

    async fn set(&self, key: &Key, value: Value) -> StoreResult<Versionstamp> {
        tokio::task::yield_now().await;
        self.inner.set(key, value).await
    }

    async fn delete(&self, key: &Key) -> StoreResult<()> {
        tokio::task::yield_now().await;
        self.inner.delete(key).await
    }

    async fn scan_prefix(&self, prefix: &Key) -> StoreResult<KvStream> {
        tokio::task::yield_now().await;
        self.inner.scan_prefix(prefix).await
    }

    async fn commit(&self, operation: AtomicOperation) -> StoreResult<CommitOutcome> {
        tokio::task::yield_now().await;
        self.inner.commit(operation).await
    }

    async fn ping(&self) -> StoreResult<()> {
        self.inner.ping().await
    }
}

/// Hands control back to the scheduler `n` times, shifting where a task
/// starts relative to the others on a [`YieldingBackend`].
pub async fn yields(n: usize) {
    for _ in 0..n {
        tokio::task::yield_now().await;
    }
}

/// Interleavings swept by the race tests
pub const DELAYS: std::ops::Range<usize> = 0..30;

pub fn repository() -> Repository {
    Repository::with_defaults(KvStore::in_memory())
}

pub fn yielding_repository() -> Repository {
    Repository::with_defaults(KvStore::new(Arc::new(YieldingBackend::default())))
}

pub fn loans(repository: &Repository) -> LoansService {
    LoansService::new(repository.clone(), LoansConfig::default())
}

pub fn app_state(repository: &Repository) -> AppState {
    let config = AppConfig::default();
    let services = Services::new(repository.clone(), &config, Arc::new(Argon2Hasher));
    AppState {
        config: Arc::new(config),
        services: Arc::new(services),
    }
}

pub fn new_book(isbn: &str, total_copies: i32) -> NewBook {
    NewBook {
        isbn: isbn.to_string(),
        title: "Clean Code".to_string(),
        author: "Robert C. Martin".to_string(),
        publisher: "Prentice Hall".to_string(),
        year: 2008,
        category: BookCategory::Technology,
        total_copies,
        available_copies: total_copies,
    }
}

pub async fn create_user(repository: &Repository, email: &str, role: UserRole) -> User {
    repository
        .users
        .create(NewUser {
            email: email.to_string(),
            credential_hash: "unused".to_string(),
            first_name: "Test".to_string(),
            last_name: "User".to_string(),
            role,
        })
        .await
        .unwrap()
}

pub const CLEAN_CODE: &str = "9780132350884";
pub const PRAGMATIC: &str = "9780201616224";
