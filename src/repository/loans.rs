//! Loans repository
//!
//! Besides the primary record a loan is indexed three ways:
//! `loans_by_user/{user}/{loan}` and `loans_by_book/{book}/{loan}` hold a
//! presence marker, and `loans_active/{user}/{book}` names the one loan that
//! is currently out for that pair.

use std::sync::Arc;

use crate::{
    clock::Clock,
    error::AppResult,
    ids::IdGenerator,
    key,
    models::loan::{Loan, NewLoan, UpdateLoan},
    store::{AtomicOperation, Key, KvStore, Versioned},
};

pub const LOANS: &str = "loans";
pub const LOANS_BY_USER: &str = "loans_by_user";
pub const LOANS_BY_BOOK: &str = "loans_by_book";
pub const LOANS_ACTIVE: &str = "loans_active";

/// Value stored under the foreign-key indexes
pub const PRESENT: bool = true;

pub fn loan_key(id: &str) -> Key {
    key![LOANS, id]
}

pub fn by_user_key(user_id: &str, loan_id: &str) -> Key {
    key![LOANS_BY_USER, user_id, loan_id]
}

pub fn by_book_key(book_id: &str, loan_id: &str) -> Key {
    key![LOANS_BY_BOOK, book_id, loan_id]
}

pub fn active_key(user_id: &str, book_id: &str) -> Key {
    key![LOANS_ACTIVE, user_id, book_id]
}

#[derive(Clone)]
pub struct LoansRepository {
    store: KvStore,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl LoansRepository {
    pub fn new(store: KvStore, clock: Arc<dyn Clock>, ids: Arc<dyn IdGenerator>) -> Self {
        Self { store, clock, ids }
    }

    /// Builds a loan record with a fresh id without writing it.
    pub fn prepare(&self, new: NewLoan) -> Loan {
        Loan::from_new(self.ids.generate(), new, self.clock.now())
    }

    /// Create a new loan with sequential writes, primary first.
    ///
    /// Does not touch inventory; borrowing goes through the loans service.
    pub async fn create(&self, new: NewLoan) -> AppResult<Loan> {
        let loan = self.prepare(new);

        self.store.set(&loan_key(&loan.id), &loan).await?;
        self.store
            .set(&by_user_key(&loan.user_id, &loan.id), &PRESENT)
            .await?;
        self.store
            .set(&by_book_key(&loan.book_id, &loan.id), &PRESENT)
            .await?;
        if loan.is_active() {
            self.store
                .set(&active_key(&loan.user_id, &loan.book_id), &loan.id)
                .await?;
        }

        tracing::debug!(loan_id = %loan.id, "Loan created");
        Ok(loan)
    }

    /// Get loan by ID
    pub async fn find_by_id(&self, id: &str) -> AppResult<Option<Loan>> {
        Ok(self.find_versioned(id).await?.map(|entry| entry.value))
    }

    pub async fn find_versioned(&self, id: &str) -> AppResult<Option<Versioned<Loan>>> {
        Ok(self.store.get::<Loan>(&loan_key(id)).await?)
    }

    /// List all loans in key order
    pub async fn find_all(&self) -> AppResult<Vec<Loan>> {
        let entries = self.store.list::<Loan>(&key![LOANS], 2).await?;
        Ok(entries.into_iter().map(|entry| entry.value).collect())
    }

    /// Loans of a user, optionally only the active ones
    pub async fn find_by_user(&self, user_id: &str, active_only: bool) -> AppResult<Vec<Loan>> {
        self.resolve_index(key![LOANS_BY_USER, user_id], active_only)
            .await
    }

    /// Loans of a book, optionally only the active ones
    pub async fn find_by_book(&self, book_id: &str, active_only: bool) -> AppResult<Vec<Loan>> {
        self.resolve_index(key![LOANS_BY_BOOK, book_id], active_only)
            .await
    }

    /// The loan currently out for this user and book, if any
    pub async fn find_active_by_user_and_book(
        &self,
        user_id: &str,
        book_id: &str,
    ) -> AppResult<Option<Loan>> {
        if let Some(guard) = self.active_guard(user_id, book_id).await? {
            if let Some(loan) = self.find_by_id(&guard.value).await? {
                if loan.is_active() && loan.user_id == user_id && loan.book_id == book_id {
                    return Ok(Some(loan));
                }
            }
        }

        // Guard missing or stale: fall back to the user's loans.
        Ok(self
            .find_by_user(user_id, true)
            .await?
            .into_iter()
            .find(|loan| loan.book_id == book_id))
    }

    /// Raw active-loan guard entry for a user/book pair
    pub async fn active_guard(
        &self,
        user_id: &str,
        book_id: &str,
    ) -> AppResult<Option<Versioned<String>>> {
        Ok(self.store.get::<String>(&active_key(user_id, book_id)).await?)
    }

    /// Update a loan; `None` when it does not exist
    pub async fn update(&self, id: &str, patch: UpdateLoan) -> AppResult<Option<Loan>> {
        let Some(existing) = self.find_by_id(id).await? else {
            return Ok(None);
        };

        let updated = existing.apply(patch, self.clock.now())?;
        self.store.set(&loan_key(id), &updated).await?;

        if existing.is_active() && !updated.is_active() {
            self.remove_active_guard(&existing).await?;
        }

        Ok(Some(updated))
    }

    /// Delete a loan and every index entry derived from it
    pub async fn delete(&self, id: &str) -> AppResult<bool> {
        let Some(existing) = self.find_by_id(id).await? else {
            return Ok(false);
        };

        self.store
            .delete(&by_user_key(&existing.user_id, id))
            .await?;
        self.store
            .delete(&by_book_key(&existing.book_id, id))
            .await?;
        self.remove_active_guard(&existing).await?;
        self.store.delete(&loan_key(id)).await?;

        tracing::debug!(loan_id = %id, "Loan deleted");
        Ok(true)
    }

    /// Adds the writes of a new active loan to `operation`. The commit only
    /// goes through if the active-loan guard is unchanged since `guard` was
    /// read; a stale guard left by an interrupted write is overwritten.
    pub fn stage_create(
        &self,
        operation: &mut AtomicOperation,
        loan: &Loan,
        guard: Option<&Versioned<String>>,
    ) -> AppResult<()> {
        let guard_key = active_key(&loan.user_id, &loan.book_id);
        operation
            .check(guard_key.clone(), guard.map(|g| g.versionstamp))
            .set(loan_key(&loan.id), loan)?
            .set(by_user_key(&loan.user_id, &loan.id), &PRESENT)?
            .set(by_book_key(&loan.book_id, &loan.id), &PRESENT)?
            .set(guard_key, &loan.id)?;
        Ok(())
    }

    /// Adds the return of `observed` to `operation`, guarded on the loan not
    /// having changed since it was read. `guard` is the active-loan entry as
    /// read alongside it; it is cleared only if it names this loan.
    pub fn stage_return(
        &self,
        operation: &mut AtomicOperation,
        observed: &Versioned<Loan>,
        returned: &Loan,
        guard: Option<&Versioned<String>>,
    ) -> AppResult<()> {
        operation
            .check(observed.key.clone(), Some(observed.versionstamp))
            .set(loan_key(&returned.id), returned)?;

        if let Some(guard) = guard.filter(|g| g.value == returned.id) {
            operation
                .check(guard.key.clone(), Some(guard.versionstamp))
                .delete(guard.key.clone());
        }
        Ok(())
    }

    async fn remove_active_guard(&self, loan: &Loan) -> AppResult<()> {
        let key = active_key(&loan.user_id, &loan.book_id);
        if let Some(guard) = self.store.get::<String>(&key).await? {
            if guard.value == loan.id {
                self.store.delete(&key).await?;
            }
        }
        Ok(())
    }

    /// Prefix scan over a foreign-key index, then one primary lookup per hit.
    /// Hits whose primary record is gone are skipped.
    async fn resolve_index(&self, prefix: Key, active_only: bool) -> AppResult<Vec<Loan>> {
        let keys = self.store.list_keys(&prefix, 3).await?;

        let mut loans = Vec::with_capacity(keys.len());
        for key in keys {
            let Some(loan_id) = key.last() else {
                continue;
            };
            if let Some(loan) = self.find_by_id(loan_id).await? {
                if !active_only || loan.is_active() {
                    loans.push(loan);
                }
            }
        }
        Ok(loans)
    }
}
