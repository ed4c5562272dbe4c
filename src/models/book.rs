//! Book (catalog entry) model and related types

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use validator::{Validate, ValidationError};

use crate::{
    error::{AppError, AppResult},
    validation::validate_isbn,
};

/// Catalog category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum BookCategory {
    Fiction,
    NonFiction,
    Science,
    Technology,
    History,
    Biography,
    Other,
}

impl BookCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookCategory::Fiction => "fiction",
            BookCategory::NonFiction => "non-fiction",
            BookCategory::Science => "science",
            BookCategory::Technology => "technology",
            BookCategory::History => "history",
            BookCategory::Biography => "biography",
            BookCategory::Other => "other",
        }
    }
}

impl std::fmt::Display for BookCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for BookCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fiction" => Ok(BookCategory::Fiction),
            "non-fiction" => Ok(BookCategory::NonFiction),
            "science" => Ok(BookCategory::Science),
            "technology" => Ok(BookCategory::Technology),
            "history" => Ok(BookCategory::History),
            "biography" => Ok(BookCategory::Biography),
            "other" => Ok(BookCategory::Other),
            _ => Err(format!("Invalid book category: {}", s)),
        }
    }
}

/// Stored book record
///
/// `available` is derived from `available_copies` and is rewritten on every
/// mutation; it is stored so that listings can filter on it directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Book {
    pub id: String,
    pub isbn: String,
    pub title: String,
    pub author: String,
    pub publisher: String,
    pub year: i32,
    pub category: BookCategory,
    pub total_copies: i32,
    pub available_copies: i32,
    pub available: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Book {
    /// Builds the stored record for a freshly created book.
    pub fn from_new(id: String, new: NewBook, now: DateTime<Utc>) -> AppResult<Self> {
        let book = Self {
            id,
            isbn: new.isbn,
            title: new.title,
            author: new.author,
            publisher: new.publisher,
            year: new.year,
            category: new.category,
            total_copies: new.total_copies,
            available_copies: new.available_copies,
            available: new.available_copies > 0,
            created_at: now,
            updated_at: now,
        };
        book.check_inventory()?;
        Ok(book)
    }

    /// `0 <= available_copies <= total_copies`, `total_copies >= 1`.
    pub fn check_inventory(&self) -> AppResult<()> {
        if self.total_copies < 1 {
            return Err(AppError::Validation(
                "Total copies must be at least 1".to_string(),
            ));
        }
        if self.available_copies < 0 || self.available_copies > self.total_copies {
            return Err(AppError::Validation(format!(
                "Available copies must be between 0 and {}",
                self.total_copies
            )));
        }
        Ok(())
    }

    /// Copies currently out on loan
    pub fn copies_on_loan(&self) -> i32 {
        self.total_copies - self.available_copies
    }

    /// Merges a patch onto this record. `id` and `created_at` never change,
    /// `available` is recomputed, `updated_at` is refreshed.
    ///
    /// Copies on loan are carried over: a new `total_copies` moves
    /// `available_copies` by the same amount, and neither may leave fewer
    /// shelf slots than copies still out.
    pub fn apply(&self, patch: UpdateBook, now: DateTime<Utc>) -> AppResult<Self> {
        let total_copies = patch.total_copies.unwrap_or(self.total_copies);
        let on_loan = self.copies_on_loan();
        if total_copies < on_loan {
            return Err(AppError::Validation(format!(
                "Total copies cannot be below the {} copies on loan",
                on_loan
            )));
        }

        let shelf = total_copies - on_loan;
        let available_copies = patch.available_copies.unwrap_or(shelf);
        if available_copies > shelf {
            return Err(AppError::Validation(format!(
                "Available copies cannot exceed {} while {} copies are on loan",
                shelf, on_loan
            )));
        }

        let updated = Self {
            id: self.id.clone(),
            isbn: patch.isbn.unwrap_or_else(|| self.isbn.clone()),
            title: patch.title.unwrap_or_else(|| self.title.clone()),
            author: patch.author.unwrap_or_else(|| self.author.clone()),
            publisher: patch.publisher.unwrap_or_else(|| self.publisher.clone()),
            year: patch.year.unwrap_or(self.year),
            category: patch.category.unwrap_or(self.category),
            total_copies,
            available_copies,
            available: available_copies > 0,
            created_at: self.created_at,
            updated_at: now,
        };
        updated.check_inventory()?;
        Ok(updated)
    }

    /// Copy of this record with `delta` applied to the available count.
    ///
    /// Used by the loan coordinator once its checks have passed. The upper
    /// bound is not enforced here.
    pub fn adjust_available(&self, delta: i32, now: DateTime<Utc>) -> Self {
        let available_copies = self.available_copies + delta;
        Self {
            available_copies,
            available: available_copies > 0,
            updated_at: now,
            ..self.clone()
        }
    }

    pub fn has_copy_to_lend(&self) -> bool {
        self.available && self.available_copies > 0
    }
}

/// Fields supplied when creating a book
#[derive(Debug, Clone, PartialEq)]
pub struct NewBook {
    pub isbn: String,
    pub title: String,
    pub author: String,
    pub publisher: String,
    pub year: i32,
    pub category: BookCategory,
    pub total_copies: i32,
    pub available_copies: i32,
}

/// Partial update; absent fields keep their stored value
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateBook {
    #[validate(custom(function = "validate_isbn"))]
    pub isbn: Option<String>,
    #[validate(length(min = 1, message = "Title cannot be empty"))]
    pub title: Option<String>,
    #[validate(length(min = 1, message = "Author cannot be empty"))]
    pub author: Option<String>,
    #[validate(length(min = 1, message = "Publisher cannot be empty"))]
    pub publisher: Option<String>,
    #[validate(custom(function = "validate_year"))]
    pub year: Option<i32>,
    pub category: Option<BookCategory>,
    #[validate(range(min = 1, message = "Total copies must be at least 1"))]
    pub total_copies: Option<i32>,
    #[validate(range(min = 0, message = "Available copies cannot be negative"))]
    pub available_copies: Option<i32>,
}

/// Create book request
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateBook {
    /// ISBN-13, hyphens and spaces allowed
    #[validate(custom(function = "validate_isbn"))]
    pub isbn: String,
    #[validate(length(min = 1, message = "Title is required"))]
    pub title: String,
    #[validate(length(min = 1, message = "Author is required"))]
    pub author: String,
    #[validate(length(min = 1, message = "Publisher is required"))]
    pub publisher: String,
    #[validate(custom(function = "validate_year"))]
    pub year: i32,
    pub category: BookCategory,
    #[validate(range(min = 1, message = "Total copies must be at least 1"))]
    pub total_copies: i32,
}

impl From<CreateBook> for NewBook {
    fn from(request: CreateBook) -> Self {
        Self {
            isbn: request.isbn,
            title: request.title,
            author: request.author,
            publisher: request.publisher,
            year: request.year,
            category: request.category,
            total_copies: request.total_copies,
            available_copies: request.total_copies,
        }
    }
}

/// Listing filters
#[derive(Debug, Clone, Default, Deserialize, IntoParams, ToSchema)]
#[into_params(parameter_in = Query)]
pub struct BookQuery {
    pub category: Option<BookCategory>,
    pub available: Option<bool>,
}

impl BookQuery {
    pub fn matches(&self, book: &Book) -> bool {
        self.category.map_or(true, |c| book.category == c)
            && self.available.map_or(true, |a| book.available == a)
    }
}

/// Publication year between 1000 and next year.
fn validate_year<T: std::borrow::Borrow<i32>>(year: T) -> Result<(), ValidationError> {
    let year = year.borrow();
    let max = Utc::now().year() + 1;
    if (1000..=max).contains(year) {
        Ok(())
    } else {
        Err(ValidationError::new("year").with_message("Invalid year".into()))
    }
}
