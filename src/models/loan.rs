//! Loan (borrow) model and related types

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use crate::error::{AppError, AppResult};

/// Loan state. `Active -> Returned` is the only transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum LoanStatus {
    Active,
    Returned,
}

impl std::fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoanStatus::Active => write!(f, "active"),
            LoanStatus::Returned => write!(f, "returned"),
        }
    }
}

/// Stored loan record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Loan {
    pub id: String,
    pub book_id: String,
    pub user_id: String,
    pub borrow_date: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_date: Option<DateTime<Utc>>,
    pub status: LoanStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Loan {
    pub fn from_new(id: String, new: NewLoan, now: DateTime<Utc>) -> Self {
        Self {
            id,
            book_id: new.book_id,
            user_id: new.user_id,
            borrow_date: new.borrow_date,
            due_date: new.due_date,
            return_date: None,
            status: new.status,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == LoanStatus::Active
    }

    /// Returned copy of this loan, stamped at `now`.
    pub fn mark_returned(&self, now: DateTime<Utc>) -> Self {
        Self {
            return_date: Some(now),
            status: LoanStatus::Returned,
            updated_at: now,
            ..self.clone()
        }
    }

    /// Merges a patch. `id`, `created_at` and the book/user references never
    /// change, and a returned loan cannot become active again.
    pub fn apply(&self, patch: UpdateLoan, now: DateTime<Utc>) -> AppResult<Self> {
        let status = patch.status.unwrap_or(self.status);
        if self.status == LoanStatus::Returned && status == LoanStatus::Active {
            return Err(AppError::InvalidState(
                "A returned loan cannot be reactivated".to_string(),
            ));
        }

        Ok(Self {
            id: self.id.clone(),
            book_id: self.book_id.clone(),
            user_id: self.user_id.clone(),
            borrow_date: self.borrow_date,
            due_date: patch.due_date.unwrap_or(self.due_date),
            return_date: patch.return_date.or(self.return_date),
            status,
            created_at: self.created_at,
            updated_at: now,
        })
    }
}

/// Fields supplied when creating a loan
#[derive(Debug, Clone, PartialEq)]
pub struct NewLoan {
    pub book_id: String,
    pub user_id: String,
    pub borrow_date: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
    pub status: LoanStatus,
}

impl NewLoan {
    /// Active loan starting at `now`, due `duration_days` later.
    pub fn active(book_id: &str, user_id: &str, now: DateTime<Utc>, duration_days: i64) -> Self {
        Self {
            book_id: book_id.to_string(),
            user_id: user_id.to_string(),
            borrow_date: now,
            due_date: now + Duration::days(duration_days),
            status: LoanStatus::Active,
        }
    }
}

/// Partial update; absent fields keep their stored value
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateLoan {
    pub due_date: Option<DateTime<Utc>>,
    pub return_date: Option<DateTime<Utc>>,
    pub status: Option<LoanStatus>,
}

/// Borrow request
#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateLoanRequest {
    #[validate(length(min = 1, message = "Missing bookId"))]
    pub book_id: String,
}

/// Loan listing filters
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct LoanQuery {
    /// Only loans that are still out
    pub active: Option<bool>,
}
