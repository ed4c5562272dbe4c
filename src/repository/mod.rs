//! Repository layer over the key-value store
//!
//! Each repository owns one primary key space plus the secondary indexes
//! derived from it. Write order is fixed: on create/update the primary record
//! is written before its index entries, on delete the index entries go first.
//! An interrupted sequence therefore leaves, at worst, a record that is
//! reachable by id but not by natural key, which [`reconcile`] repairs.
//!
//! Books share their record with the loan coordinator, so book updates and
//! deletes go through one guarded commit instead of a write sequence.

pub mod books;
pub mod loans;
pub mod reconcile;
pub mod users;

use std::sync::Arc;

use crate::{
    clock::{Clock, SystemClock},
    ids::{IdGenerator, UuidGenerator},
    store::KvStore,
};

/// Bound on optimistic retries of a guarded repository write
pub const MAX_COMMIT_ATTEMPTS: u32 = 16;

/// Main repository struct holding the store handle
#[derive(Clone)]
pub struct Repository {
    pub store: KvStore,
    pub books: books::BooksRepository,
    pub users: users::UsersRepository,
    pub loans: loans::LoansRepository,
    pub clock: Arc<dyn Clock>,
}

impl Repository {
    /// Create a new repository over `store`
    pub fn new(store: KvStore, clock: Arc<dyn Clock>, ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            books: books::BooksRepository::new(store.clone(), clock.clone(), ids.clone()),
            users: users::UsersRepository::new(store.clone(), clock.clone(), ids.clone()),
            loans: loans::LoansRepository::new(store.clone(), clock.clone(), ids),
            store,
            clock,
        }
    }

    /// Repository with the wall clock and UUID identifiers
    pub fn with_defaults(store: KvStore) -> Self {
        Self::new(store, Arc::new(SystemClock), Arc::new(UuidGenerator))
    }

    pub fn reconciler(&self) -> reconcile::IndexReconciler {
        reconcile::IndexReconciler::new(self.store.clone())
    }
}
