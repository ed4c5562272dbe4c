//! Catalog management service

use crate::{
    error::{AppError, AppResult},
    models::book::{Book, BookQuery, CreateBook, NewBook, UpdateBook},
    repository::Repository,
    validation::clean_isbn,
};

#[derive(Clone)]
pub struct CatalogService {
    repository: Repository,
}

impl CatalogService {
    pub fn new(repository: Repository) -> Self {
        Self { repository }
    }

    /// List books with optional filters
    pub async fn list_books(&self, query: &BookQuery) -> AppResult<Vec<Book>> {
        self.repository.books.find_all(query).await
    }

    pub async fn get_book(&self, id: &str) -> AppResult<Book> {
        self.repository
            .books
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound("Book not found".to_string()))
    }

    /// Create a book; the ISBN must not be in use.
    ///
    /// ISBNs are stored without the printed separators, so hyphenated and
    /// bare forms of the same number collide.
    pub async fn create_book(&self, request: CreateBook) -> AppResult<Book> {
        let mut new = NewBook::from(request);
        new.isbn = clean_isbn(&new.isbn);
        if self.repository.books.find_by_isbn(&new.isbn).await?.is_some() {
            return Err(AppError::Conflict(
                "Book with this ISBN already exists".to_string(),
            ));
        }

        let book = self.repository.books.create(new).await?;
        tracing::info!(book_id = %book.id, isbn = %book.isbn, "Book added to catalog");
        Ok(book)
    }

    /// Partial update; moving to an ISBN held by another book is a conflict.
    pub async fn update_book(&self, id: &str, mut patch: UpdateBook) -> AppResult<Book> {
        patch.isbn = patch.isbn.as_deref().map(clean_isbn);
        if let Some(isbn) = &patch.isbn {
            if let Some(other) = self.repository.books.find_by_isbn(isbn).await? {
                if other.id != id {
                    return Err(AppError::Conflict(
                        "Book with this ISBN already exists".to_string(),
                    ));
                }
            }
        }

        self.repository
            .books
            .update(id, patch)
            .await?
            .ok_or_else(|| AppError::NotFound("Book not found".to_string()))
    }

    pub async fn delete_book(&self, id: &str) -> AppResult<()> {
        if !self.repository.books.delete(id).await? {
            return Err(AppError::NotFound("Book not found".to_string()));
        }
        tracing::info!(book_id = %id, "Book removed from catalog");
        Ok(())
    }
}
