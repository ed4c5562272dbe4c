//! Loan lifecycle: borrow and return
//!
//! Both operations read what they need, validate, then write every change in
//! one atomic commit whose checks pin the versionstamps they read. A commit
//! that loses a race is not an error: the whole operation runs again on
//! fresh state, up to `loans.max_commit_attempts` times.

use crate::{
    config::LoansConfig,
    error::{AppError, AppResult},
    models::{
        loan::{Loan, NewLoan},
        user::Actor,
    },
    repository::{books::book_key, Repository},
    store::{AtomicOperation, CommitOutcome},
};

#[derive(Clone)]
pub struct LoansService {
    repository: Repository,
    config: LoansConfig,
}

impl LoansService {
    pub fn new(repository: Repository, config: LoansConfig) -> Self {
        Self { repository, config }
    }

    /// Lend one copy of `book_id` to `user_id`.
    ///
    /// Fails with `NotFound` for an unknown book, `Conflict` when the user
    /// already holds an active loan for it, and `Unavailable` when no copy
    /// is left.
    pub async fn borrow(&self, user_id: &str, book_id: &str) -> AppResult<Loan> {
        for attempt in 1..=self.config.max_commit_attempts {
            if let Some(loan) = self.try_borrow(user_id, book_id).await? {
                tracing::info!(
                    loan_id = %loan.id,
                    book_id = %book_id,
                    user_id = %user_id,
                    "Book borrowed"
                );
                return Ok(loan);
            }
            tracing::debug!(book_id = %book_id, attempt, "Borrow commit lost a race, retrying");
        }

        tracing::warn!(book_id = %book_id, "Borrow gave up after repeated commit conflicts");
        Err(AppError::Conflict(
            "Book is being updated concurrently, try again".to_string(),
        ))
    }

    /// Close an active loan and put the copy back on the shelf.
    ///
    /// Only the borrower or a librarian may return a loan.
    pub async fn return_loan(&self, loan_id: &str, actor: &Actor) -> AppResult<Loan> {
        for attempt in 1..=self.config.max_commit_attempts {
            if let Some(loan) = self.try_return(loan_id, actor).await? {
                tracing::info!(
                    loan_id = %loan.id,
                    book_id = %loan.book_id,
                    by = %actor.user_id,
                    "Book returned"
                );
                return Ok(loan);
            }
            tracing::debug!(loan_id = %loan_id, attempt, "Return commit lost a race, retrying");
        }

        tracing::warn!(loan_id = %loan_id, "Return gave up after repeated commit conflicts");
        Err(AppError::Conflict(
            "Loan is being updated concurrently, try again".to_string(),
        ))
    }

    /// Loans of one user, optionally only the ones still out
    pub async fn user_loans(&self, user_id: &str, active_only: bool) -> AppResult<Vec<Loan>> {
        self.repository.loans.find_by_user(user_id, active_only).await
    }

    /// Every loan in the system
    pub async fn list_all(&self) -> AppResult<Vec<Loan>> {
        self.repository.loans.find_all().await
    }

    /// One borrow attempt; `None` when the commit lost a race.
    async fn try_borrow(&self, user_id: &str, book_id: &str) -> AppResult<Option<Loan>> {
        let books = &self.repository.books;
        let loans = &self.repository.loans;

        let Some(observed) = books.find_versioned(book_id).await? else {
            return Err(AppError::NotFound("Book not found".to_string()));
        };

        // Read the guard before checking for an active loan so that a guard
        // written in between is caught by the commit check.
        let guard = loans.active_guard(user_id, book_id).await?;
        if loans
            .find_active_by_user_and_book(user_id, book_id)
            .await?
            .is_some()
        {
            return Err(AppError::Conflict(
                "You have already borrowed this book".to_string(),
            ));
        }

        if !observed.value.has_copy_to_lend() {
            return Err(AppError::Unavailable(
                "Book is not available for borrowing".to_string(),
            ));
        }

        let now = self.repository.clock.now();
        let loan = loans.prepare(NewLoan::active(
            book_id,
            user_id,
            now,
            self.config.duration_days,
        ));
        let book = observed.value.adjust_available(-1, now);

        let mut operation = AtomicOperation::new();
        books.stage_inventory(&mut operation, &observed, &book)?;
        loans.stage_create(&mut operation, &loan, guard.as_ref())?;

        match self.repository.store.commit(operation).await? {
            CommitOutcome::Committed(_) => Ok(Some(loan)),
            CommitOutcome::CheckFailed => Ok(None),
        }
    }

    /// One return attempt; `None` when the commit lost a race.
    async fn try_return(&self, loan_id: &str, actor: &Actor) -> AppResult<Option<Loan>> {
        let books = &self.repository.books;
        let loans = &self.repository.loans;

        let Some(observed) = loans.find_versioned(loan_id).await? else {
            return Err(AppError::NotFound("Loan not found".to_string()));
        };
        let loan = &observed.value;

        if loan.user_id != actor.user_id && !actor.is_librarian() {
            return Err(AppError::Authorization(
                "You can only return your own loans".to_string(),
            ));
        }
        if !loan.is_active() {
            return Err(AppError::InvalidState(
                "Book has already been returned".to_string(),
            ));
        }

        let guard = loans.active_guard(&loan.user_id, &loan.book_id).await?;
        let book = books.find_versioned(&loan.book_id).await?;

        let now = self.repository.clock.now();
        let returned = loan.mark_returned(now);

        let mut operation = AtomicOperation::new();
        loans.stage_return(&mut operation, &observed, &returned, guard.as_ref())?;

        match &book {
            Some(book) => {
                let restocked = book.value.adjust_available(1, now);
                if restocked.available_copies > restocked.total_copies {
                    tracing::warn!(
                        book_id = %restocked.id,
                        available = restocked.available_copies,
                        total = restocked.total_copies,
                        "Available copies exceed total copies after return"
                    );
                }
                books.stage_inventory(&mut operation, book, &restocked)?;
            }
            None => {
                tracing::warn!(loan_id = %loan.id, book_id = %loan.book_id, "Returning a loan whose book no longer exists");
                operation.check(book_key(&loan.book_id), None);
            }
        }

        match self.repository.store.commit(operation).await? {
            CommitOutcome::Committed(_) => Ok(Some(returned)),
            CommitOutcome::CheckFailed => Ok(None),
        }
    }
}
