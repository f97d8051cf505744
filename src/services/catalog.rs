//! Catalog management service

use validator::Validate;

use crate::{
    error::{AppError, AppResult, ErrorCode},
    models::book::{Book, BookQuery, CreateBook, UpdateBook},
    repository::Repository,
};

#[derive(Clone)]
pub struct CatalogService {
    repository: Repository,
}

impl CatalogService {
    pub fn new(repository: Repository) -> Self {
        Self { repository }
    }

    /// Search books with filters
    pub async fn search_books(&self, query: &BookQuery) -> AppResult<(Vec<Book>, i64)> {
        self.repository.books.search(query).await
    }

    pub async fn get_book(&self, id: i32) -> AppResult<Book> {
        self.repository.books.get_by_id(id).await
    }

    /// Create a new book; the ISBN must not belong to another live book
    pub async fn create_book(&self, book: CreateBook) -> AppResult<Book> {
        book.validate()?;
        if let Some(ref isbn) = book.isbn {
            if self.repository.books.isbn_exists(isbn, None).await? {
                return Err(AppError::Conflict(format!("A book with ISBN {} already exists", isbn)));
            }
        }

        let created = self.repository.books.create(&book).await?;
        tracing::info!(book_id = created.id, name = %created.name, "Book created");
        Ok(created)
    }

    pub async fn update_book(&self, id: i32, book: UpdateBook) -> AppResult<Book> {
        book.validate()?;
        if let Some(ref isbn) = book.isbn {
            if self.repository.books.isbn_exists(isbn, Some(id)).await? {
                return Err(AppError::Conflict(format!("A book with ISBN {} already exists", isbn)));
            }
        }
        self.repository.books.update(id, &book).await
    }

    /// Soft delete a book; books with copies out on loan cannot be deleted
    pub async fn delete_book(&self, id: i32) -> AppResult<()> {
        if !self.repository.books.soft_delete(id).await? {
            return Err(AppError::BusinessRule(
                ErrorCode::BookHasActiveLoans,
                "Book has copies out on loan".to_string(),
            ));
        }
        tracing::info!(book_id = id, "Book deleted");
        Ok(())
    }
}
