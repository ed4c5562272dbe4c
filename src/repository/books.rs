//! Books repository

use std::sync::Arc;

use super::MAX_COMMIT_ATTEMPTS;
use crate::{
    clock::Clock,
    error::{AppError, AppResult},
    ids::IdGenerator,
    key,
    models::book::{Book, BookQuery, NewBook, UpdateBook},
    store::{AtomicOperation, CommitOutcome, Key, KvStore, Versioned},
};

pub const BOOKS: &str = "books";
pub const BOOKS_BY_ISBN: &str = "books_by_isbn";

pub fn book_key(id: &str) -> Key {
    key![BOOKS, id]
}

pub fn isbn_key(isbn: &str) -> Key {
    key![BOOKS_BY_ISBN, isbn]
}

#[derive(Clone)]
pub struct BooksRepository {
    store: KvStore,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl BooksRepository {
    pub fn new(store: KvStore, clock: Arc<dyn Clock>, ids: Arc<dyn IdGenerator>) -> Self {
        Self { store, clock, ids }
    }

    /// Create a new book. Uniqueness of the ISBN is the caller's concern.
    pub async fn create(&self, new: NewBook) -> AppResult<Book> {
        let book = Book::from_new(self.ids.generate(), new, self.clock.now())?;

        self.store.set(&book_key(&book.id), &book).await?;
        self.store.set(&isbn_key(&book.isbn), &book.id).await?;

        tracing::debug!(book_id = %book.id, isbn = %book.isbn, "Book created");
        Ok(book)
    }

    /// Get book by ID
    pub async fn find_by_id(&self, id: &str) -> AppResult<Option<Book>> {
        Ok(self.find_versioned(id).await?.map(|entry| entry.value))
    }

    /// Get book by ID along with the versionstamp it was read at
    pub async fn find_versioned(&self, id: &str) -> AppResult<Option<Versioned<Book>>> {
        Ok(self.store.get::<Book>(&book_key(id)).await?)
    }

    /// Get book by ISBN (exact match on the supplied form)
    pub async fn find_by_isbn(&self, isbn: &str) -> AppResult<Option<Book>> {
        let Some(id) = self.store.get::<String>(&isbn_key(isbn)).await? else {
            return Ok(None);
        };

        // A stale index entry pointing at a re-keyed record counts as a miss.
        Ok(self
            .find_by_id(&id.value)
            .await?
            .filter(|book| book.isbn == isbn))
    }

    /// List books in key order, optionally filtered
    pub async fn find_all(&self, query: &BookQuery) -> AppResult<Vec<Book>> {
        let entries = self.store.list::<Book>(&key![BOOKS], 2).await?;
        Ok(entries
            .into_iter()
            .map(|entry| entry.value)
            .filter(|book| query.matches(book))
            .collect())
    }

    /// Update a book; `None` when it does not exist.
    ///
    /// The record and any ISBN move are committed together, pinned to the
    /// versionstamp the book was read at, so a concurrent borrow or return is
    /// never overwritten. A lost race re-reads and merges the patch again.
    pub async fn update(&self, id: &str, patch: UpdateBook) -> AppResult<Option<Book>> {
        for attempt in 1..=MAX_COMMIT_ATTEMPTS {
            let Some(observed) = self.find_versioned(id).await? else {
                return Ok(None);
            };
            let existing = &observed.value;
            let updated = existing.apply(patch.clone(), self.clock.now())?;

            let mut operation = AtomicOperation::new();
            operation
                .check(observed.key.clone(), Some(observed.versionstamp))
                .set(book_key(id), &updated)?;

            let moved = updated.isbn != existing.isbn;
            if moved {
                self.stage_isbn_release(&mut operation, &existing.isbn, id)
                    .await?;
                let target = isbn_key(&updated.isbn);
                let current = self.store.get_raw(&target).await?;
                operation
                    .check(target.clone(), current.map(|entry| entry.versionstamp))
                    .set(target, &updated.id)?;
            }

            if let CommitOutcome::Committed(_) = self.store.commit(operation).await? {
                if moved {
                    tracing::debug!(book_id = %id, old = %existing.isbn, new = %updated.isbn, "ISBN index moved");
                }
                return Ok(Some(updated));
            }
            tracing::debug!(book_id = %id, attempt, "Book update lost a race, retrying");
        }

        Err(AppError::Conflict(
            "Book is being updated concurrently, try again".to_string(),
        ))
    }

    /// Delete a book and its ISBN index entry; `false` when absent
    pub async fn delete(&self, id: &str) -> AppResult<bool> {
        for attempt in 1..=MAX_COMMIT_ATTEMPTS {
            let Some(observed) = self.find_versioned(id).await? else {
                return Ok(false);
            };

            let mut operation = AtomicOperation::new();
            self.stage_isbn_release(&mut operation, &observed.value.isbn, id)
                .await?;
            operation
                .check(observed.key.clone(), Some(observed.versionstamp))
                .delete(book_key(id));

            if let CommitOutcome::Committed(_) = self.store.commit(operation).await? {
                tracing::debug!(book_id = %id, "Book deleted");
                return Ok(true);
            }
            tracing::debug!(book_id = %id, attempt, "Book delete lost a race, retrying");
        }

        Err(AppError::Conflict(
            "Book is being updated concurrently, try again".to_string(),
        ))
    }

    /// Adds a guarded inventory write to `operation`: the commit only goes
    /// through if the book is still at the versionstamp it was read at.
    pub fn stage_inventory(
        &self,
        operation: &mut AtomicOperation,
        observed: &Versioned<Book>,
        updated: &Book,
    ) -> AppResult<()> {
        operation
            .check(observed.key.clone(), Some(observed.versionstamp))
            .set(book_key(&updated.id), updated)?;
        Ok(())
    }

    /// Stages removal of the ISBN entry if it still points at `id`.
    async fn stage_isbn_release(
        &self,
        operation: &mut AtomicOperation,
        isbn: &str,
        id: &str,
    ) -> AppResult<()> {
        let key = isbn_key(isbn);
        if let Some(owner) = self.store.get::<String>(&key).await? {
            if owner.value == id {
                operation
                    .check(key.clone(), Some(owner.versionstamp))
                    .delete(key);
            }
        }
        Ok(())
    }
}
