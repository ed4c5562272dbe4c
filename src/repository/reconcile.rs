//! Secondary index reconciliation
//!
//! Rebuilds index entries missing for existing primaries and removes index
//! entries whose primary is gone or no longer carries the indexed key.
//!
//! Decisions are taken on snapshots, so every repair is committed with checks
//! pinning both the index entry and its primary to what the snapshot saw. A
//! repair whose entry or primary changed in the meantime is skipped and left
//! to the next pass. The pass is therefore safe alongside live traffic.

use std::collections::HashMap;

use serde::{de::DeserializeOwned, Serialize};
use utoipa::ToSchema;

use super::{
    books::{book_key, isbn_key, BOOKS, BOOKS_BY_ISBN},
    loans::{
        active_key, by_book_key, by_user_key, loan_key, LOANS, LOANS_ACTIVE, LOANS_BY_BOOK,
        LOANS_BY_USER, PRESENT,
    },
    users::{email_key, user_key, USERS, USERS_BY_EMAIL},
};
use crate::{
    error::AppResult,
    key,
    models::{Book, Loan, User},
    store::{AtomicOperation, CommitOutcome, Key, KvStore, Versioned, Versionstamp},
};

/// What a reconciliation pass changed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct ReconcileReport {
    /// Index entries written for primaries that had none
    pub restored: u64,
    /// Index entries deleted because nothing valid backs them
    pub removed: u64,
    /// Natural keys claimed by more than one primary; left untouched
    pub conflicts: u64,
    /// Repairs dropped because the entry or its primary changed meanwhile
    pub skipped: u64,
}

/// Primary record an index entry is judged against, as seen by the snapshot
struct Backing {
    key: Key,
    versionstamp: Option<Versionstamp>,
}

impl Backing {
    fn of<T>(primary: &Versioned<T>) -> Self {
        Self {
            key: primary.key.clone(),
            versionstamp: Some(primary.versionstamp),
        }
    }

    fn lookup<T>(key: Key, snapshot: Option<&Versioned<T>>) -> Self {
        Self {
            key,
            versionstamp: snapshot.map(|primary| primary.versionstamp),
        }
    }
}

type Snapshot<T> = HashMap<String, Versioned<T>>;

#[derive(Clone)]
pub struct IndexReconciler {
    store: KvStore,
}

impl IndexReconciler {
    pub fn new(store: KvStore) -> Self {
        Self { store }
    }

    pub async fn run(&self) -> AppResult<ReconcileReport> {
        let mut report = ReconcileReport::default();

        self.reconcile_books(&mut report).await?;
        self.reconcile_users(&mut report).await?;
        self.reconcile_loans(&mut report).await?;

        if report.restored > 0 || report.removed > 0 || report.conflicts > 0 {
            tracing::warn!(
                restored = report.restored,
                removed = report.removed,
                conflicts = report.conflicts,
                skipped = report.skipped,
                "Secondary indexes were out of sync"
            );
        } else {
            tracing::info!(skipped = report.skipped, "Secondary indexes are consistent");
        }
        Ok(report)
    }

    /// Primaries under `namespace`, keyed by the id segment of their key.
    async fn snapshot<T: DeserializeOwned>(&self, namespace: &str) -> AppResult<Snapshot<T>> {
        Ok(self
            .store
            .list::<T>(&key![namespace], 2)
            .await?
            .into_iter()
            .filter_map(|entry| Some((entry.key.segment(1)?.to_string(), entry)))
            .collect())
    }

    async fn reconcile_books(&self, report: &mut ReconcileReport) -> AppResult<()> {
        let books = self.snapshot::<Book>(BOOKS).await?;

        for book in books.values() {
            let isbn = &book.value.isbn;
            self.ensure_pointer(isbn_key(isbn), &book.value.id, Backing::of(book), report, |owner| {
                books.get(owner).map_or(false, |other| &other.value.isbn == isbn)
            })
            .await?;
        }

        for entry in self.store.list::<String>(&key![BOOKS_BY_ISBN], 2).await? {
            let isbn = entry.key.segment(1).unwrap_or_default();
            let owner = books.get(&entry.value);
            if owner.map_or(false, |book| book.value.isbn == isbn) {
                continue;
            }
            let backing = Backing::lookup(book_key(&entry.value), owner);
            self.remove(&entry.key, entry.versionstamp, backing, report)
                .await?;
        }
        Ok(())
    }

    async fn reconcile_users(&self, report: &mut ReconcileReport) -> AppResult<()> {
        let users = self.snapshot::<User>(USERS).await?;

        for user in users.values() {
            let wanted = user.value.email_key();
            self.ensure_pointer(
                email_key(&user.value.email),
                &user.value.id,
                Backing::of(user),
                report,
                |owner| users.get(owner).map_or(false, |other| other.value.email_key() == wanted),
            )
            .await?;
        }

        for entry in self.store.list::<String>(&key![USERS_BY_EMAIL], 2).await? {
            let email = entry.key.segment(1).unwrap_or_default();
            let owner = users.get(&entry.value);
            if owner.map_or(false, |user| user.value.email_key() == email) {
                continue;
            }
            let backing = Backing::lookup(user_key(&entry.value), owner);
            self.remove(&entry.key, entry.versionstamp, backing, report)
                .await?;
        }
        Ok(())
    }

    async fn reconcile_loans(&self, report: &mut ReconcileReport) -> AppResult<()> {
        let loans = self.snapshot::<Loan>(LOANS).await?;

        for versioned in loans.values() {
            let loan = &versioned.value;
            for marker in [
                by_user_key(&loan.user_id, &loan.id),
                by_book_key(&loan.book_id, &loan.id),
            ] {
                if self.store.get_raw(&marker).await?.is_some() {
                    continue;
                }
                let mut operation = AtomicOperation::new();
                operation
                    .check(marker.clone(), None)
                    .check(versioned.key.clone(), Some(versioned.versionstamp))
                    .set(marker.clone(), &PRESENT)?;
                if self.apply(operation, &marker, report).await? {
                    tracing::debug!(key = %marker, "Restored loan marker");
                    report.restored += 1;
                }
            }

            if loan.is_active() {
                self.ensure_pointer(
                    active_key(&loan.user_id, &loan.book_id),
                    &loan.id,
                    Backing::of(versioned),
                    report,
                    |owner| {
                        loans.get(owner).map_or(false, |other| {
                            other.value.is_active()
                                && other.value.user_id == loan.user_id
                                && other.value.book_id == loan.book_id
                        })
                    },
                )
                .await?;
            }
        }

        self.prune_markers(LOANS_BY_USER, &loans, |loan| &loan.user_id, report)
            .await?;
        self.prune_markers(LOANS_BY_BOOK, &loans, |loan| &loan.book_id, report)
            .await?;

        for entry in self.store.list::<String>(&key![LOANS_ACTIVE], 3).await? {
            let user_id = entry.key.segment(1).unwrap_or_default();
            let book_id = entry.key.segment(2).unwrap_or_default();
            let owner = loans.get(&entry.value);
            let valid = owner.map_or(false, |loan| {
                loan.value.is_active() && loan.value.user_id == user_id && loan.value.book_id == book_id
            });
            if valid {
                continue;
            }
            let backing = Backing::lookup(loan_key(&entry.value), owner);
            self.remove(&entry.key, entry.versionstamp, backing, report)
                .await?;
        }
        Ok(())
    }

    /// Drops `{namespace}/{parent}/{loan}` markers whose loan is gone or
    /// belongs to another parent.
    async fn prune_markers<F>(
        &self,
        namespace: &str,
        loans: &Snapshot<Loan>,
        parent_of: F,
        report: &mut ReconcileReport,
    ) -> AppResult<()>
    where
        F: Fn(&Loan) -> &String,
    {
        for entry in self.store.list::<bool>(&key![namespace], 3).await? {
            let parent = entry.key.segment(1).unwrap_or_default();
            let loan_id = entry.key.segment(2).unwrap_or_default();
            let owner = loans.get(loan_id);
            if owner.map_or(false, |loan| parent_of(&loan.value) == parent) {
                continue;
            }
            let backing = Backing::lookup(loan_key(loan_id), owner);
            self.remove(&entry.key, entry.versionstamp, backing, report)
                .await?;
        }
        Ok(())
    }

    /// Makes `key` point at `id` unless another live owner holds it.
    async fn ensure_pointer<F>(
        &self,
        key: Key,
        id: &str,
        backing: Backing,
        report: &mut ReconcileReport,
        owner_is_live: F,
    ) -> AppResult<()>
    where
        F: Fn(&str) -> bool,
    {
        let current = self.store.get::<String>(&key).await?;
        match &current {
            Some(current) if current.value == id => return Ok(()),
            Some(current) if owner_is_live(&current.value) => {
                tracing::warn!(key = %key, id = %id, owner = %current.value, "Index key claimed twice");
                report.conflicts += 1;
                return Ok(());
            }
            _ => {}
        }

        let mut operation = AtomicOperation::new();
        operation
            .check(key.clone(), current.map(|entry| entry.versionstamp))
            .check(backing.key, backing.versionstamp)
            .set(key.clone(), &id)?;
        if self.apply(operation, &key, report).await? {
            tracing::debug!(key = %key, id = %id, "Restored index entry");
            report.restored += 1;
        }
        Ok(())
    }

    /// Deletes an index entry, provided neither it nor the primary it was
    /// judged against has changed since.
    async fn remove(
        &self,
        key: &Key,
        versionstamp: Versionstamp,
        backing: Backing,
        report: &mut ReconcileReport,
    ) -> AppResult<()> {
        let mut operation = AtomicOperation::new();
        operation
            .check(key.clone(), Some(versionstamp))
            .check(backing.key, backing.versionstamp)
            .delete(key.clone());
        if self.apply(operation, key, report).await? {
            tracing::debug!(key = %key, "Removed orphan index entry");
            report.removed += 1;
        }
        Ok(())
    }

    async fn apply(
        &self,
        operation: AtomicOperation,
        key: &Key,
        report: &mut ReconcileReport,
    ) -> AppResult<bool> {
        match self.store.commit(operation).await? {
            CommitOutcome::Committed(_) => Ok(true),
            CommitOutcome::CheckFailed => {
                tracing::debug!(key = %key, "Index entry changed during reconciliation, skipped");
                report.skipped += 1;
                Ok(false)
            }
        }
    }
}
