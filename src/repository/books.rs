//! Books repository for database operations

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Postgres};

use crate::{
    error::{AppError, AppResult},
    models::book::{Book, BookQuery, CreateBook, UpdateBook},
    services::circulation::{CatalogStore, StoreResult},
};

#[derive(Clone)]
pub struct BooksRepository {
    pool: Pool<Postgres>,
}

impl BooksRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Get a live (not deleted) book by ID
    pub async fn get_by_id(&self, id: i32) -> AppResult<Book> {
        sqlx::query_as::<_, Book>("SELECT * FROM books WHERE id = $1 AND deleted_at IS NULL")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Book with id {} not found", id)))
    }

    /// Check if an ISBN is already used by a live book
    pub async fn isbn_exists(&self, isbn: &str, exclude_id: Option<i32>) -> AppResult<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM books
                WHERE isbn = $1 AND deleted_at IS NULL
                  AND ($2::INTEGER IS NULL OR id != $2)
            )
            "#,
        )
        .bind(isbn)
        .bind(exclude_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    /// Search books with pagination
    pub async fn search(&self, query: &BookQuery) -> AppResult<(Vec<Book>, i64)> {
        let page = query.page.unwrap_or(1).max(1);
        let per_page = query.per_page.unwrap_or(20).clamp(1, 200);
        let offset = (page - 1) * per_page;

        let name = query.name.as_ref().map(|n| format!("%{}%", n.to_lowercase()));
        let author = query.author.as_ref().map(|a| format!("%{}%", a.to_lowercase()));
        let isbn = query.isbn.as_ref().map(|i| i.replace('-', ""));

        let filter = r#"
            WHERE deleted_at IS NULL
              AND ($1::TEXT IS NULL OR LOWER(name) LIKE $1)
              AND ($2::TEXT IS NULL OR LOWER(author) LIKE $2)
              AND ($3::TEXT IS NULL OR REPLACE(isbn, '-', '') = $3)
              AND ($4::BOOLEAN IS NULL OR NOT $4 OR quantity_available > 0)
        "#;

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM books {}", filter))
            .bind(&name)
            .bind(&author)
            .bind(&isbn)
            .bind(query.available)
            .fetch_one(&self.pool)
            .await?;

        let books = sqlx::query_as::<_, Book>(&format!(
            "SELECT * FROM books {} ORDER BY name, id LIMIT $5 OFFSET $6",
            filter
        ))
        .bind(&name)
        .bind(&author)
        .bind(&isbn)
        .bind(query.available)
        .bind(per_page)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok((books, total))
    }

    /// Create a new book
    pub async fn create(&self, book: &CreateBook) -> AppResult<Book> {
        let now = Utc::now();
        let created = sqlx::query_as::<_, Book>(
            r#"
            INSERT INTO books (name, author, isbn, description, daily_rate,
                               quantity_available, subscription_days, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8)
            RETURNING *
            "#,
        )
        .bind(&book.name)
        .bind(&book.author)
        .bind(&book.isbn)
        .bind(&book.description)
        .bind(book.daily_rate)
        .bind(book.quantity_available)
        .bind(book.subscription_days)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(created)
    }

    /// Update a book; absent fields keep their value
    pub async fn update(&self, id: i32, book: &UpdateBook) -> AppResult<Book> {
        sqlx::query_as::<_, Book>(
            r#"
            UPDATE books SET
                name = COALESCE($2, name),
                author = COALESCE($3, author),
                isbn = COALESCE($4, isbn),
                description = COALESCE($5, description),
                daily_rate = COALESCE($6, daily_rate),
                quantity_available = COALESCE($7, quantity_available),
                subscription_days = COALESCE($8, subscription_days),
                updated_at = $9
            WHERE id = $1 AND deleted_at IS NULL
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&book.name)
        .bind(&book.author)
        .bind(&book.isbn)
        .bind(&book.description)
        .bind(book.daily_rate)
        .bind(book.quantity_available)
        .bind(book.subscription_days)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Book with id {} not found", id)))
    }

    /// Soft delete a book. Returns false if copies are still out on loan.
    pub async fn soft_delete(&self, id: i32) -> AppResult<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query_scalar::<_, i32>(
            "SELECT id FROM books WHERE id = $1 AND deleted_at IS NULL FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Book with id {} not found", id)))?;

        let loans: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM active_loans WHERE book_id = $1")
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;
        if loans > 0 {
            return Ok(false);
        }

        sqlx::query("UPDATE books SET deleted_at = $2, updated_at = $2 WHERE id = $1")
            .bind(id)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(true)
    }
}

#[async_trait]
impl CatalogStore for BooksRepository {
    async fn find_book(&self, book_id: i32) -> StoreResult<Option<Book>> {
        sqlx::query_as::<_, Book>("SELECT * FROM books WHERE id = $1")
            .bind(book_id)
            .fetch_optional(&self.pool)
            .await
    }
}
