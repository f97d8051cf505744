//! Reviews repository

use chrono::Utc;
use sqlx::{Pool, Postgres, Transaction};

use crate::{
    error::{AppError, AppResult},
    models::review::{RatingSummary, Review, UpsertReview},
};

#[derive(Clone)]
pub struct ReviewsRepository {
    pool: Pool<Postgres>,
}

/// Recompute the book's rating aggregate from its reviews
async fn refresh_rating(tx: &mut Transaction<'_, Postgres>, book_id: i32) -> AppResult<RatingSummary> {
    let (average_rating, rating_count): (Option<f64>, i32) = sqlx::query_as(
        r#"
        UPDATE books SET
            average_rating = stats.average,
            rating_count = stats.total,
            updated_at = NOW()
        FROM (
            SELECT AVG(rating)::DOUBLE PRECISION AS average, COUNT(*)::INTEGER AS total
            FROM reviews WHERE book_id = $1
        ) AS stats
        WHERE books.id = $1
        RETURNING books.average_rating, books.rating_count
        "#,
    )
    .bind(book_id)
    .fetch_one(&mut **tx)
    .await?;

    Ok(RatingSummary {
        book_id,
        average_rating,
        rating_count,
    })
}

impl ReviewsRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    pub async fn list_for_book(&self, book_id: i32) -> AppResult<Vec<Review>> {
        let reviews = sqlx::query_as::<_, Review>(
            "SELECT * FROM reviews WHERE book_id = $1 ORDER BY updated_at DESC",
        )
        .bind(book_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(reviews)
    }

    pub async fn get_by_id(&self, id: i32) -> AppResult<Review> {
        sqlx::query_as::<_, Review>("SELECT * FROM reviews WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Review with id {} not found", id)))
    }

    /// Create or replace the user's review and refresh the book's rating
    pub async fn upsert(
        &self,
        user_id: i32,
        book_id: i32,
        review: &UpsertReview,
    ) -> AppResult<(Review, RatingSummary)> {
        let mut tx = self.pool.begin().await?;

        let saved = sqlx::query_as::<_, Review>(
            r#"
            INSERT INTO reviews (book_id, user_id, rating, comment, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $5)
            ON CONFLICT (user_id, book_id) DO UPDATE SET
                rating = EXCLUDED.rating,
                comment = EXCLUDED.comment,
                updated_at = EXCLUDED.updated_at
            RETURNING *
            "#,
        )
        .bind(book_id)
        .bind(user_id)
        .bind(review.rating)
        .bind(&review.comment)
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await?;

        let summary = refresh_rating(&mut tx, book_id).await?;
        tx.commit().await?;
        Ok((saved, summary))
    }

    pub async fn delete(&self, review: &Review) -> AppResult<RatingSummary> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM reviews WHERE id = $1")
            .bind(review.id)
            .execute(&mut *tx)
            .await?;

        let summary = refresh_rating(&mut tx, review.book_id).await?;
        tx.commit().await?;
        Ok(summary)
    }
}
