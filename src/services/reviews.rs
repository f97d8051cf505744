//! Book reviews and ratings

use validator::Validate;

use crate::{
    error::{AppError, AppResult},
    models::{
        review::{RatingSummary, Review, UpsertReview},
        user::UserClaims,
    },
    repository::Repository,
};

#[derive(Clone)]
pub struct ReviewsService {
    repository: Repository,
}

impl ReviewsService {
    pub fn new(repository: Repository) -> Self {
        Self { repository }
    }

    pub async fn list_for_book(&self, book_id: i32) -> AppResult<Vec<Review>> {
        self.repository.books.get_by_id(book_id).await?;
        self.repository.reviews.list_for_book(book_id).await
    }

    /// Create or replace the user's review of a live book
    pub async fn upsert(
        &self,
        user_id: i32,
        book_id: i32,
        review: UpsertReview,
    ) -> AppResult<(Review, RatingSummary)> {
        review.validate()?;
        self.repository.books.get_by_id(book_id).await?;
        self.repository.reviews.upsert(user_id, book_id, &review).await
    }

    /// Authors may delete their own review, staff may delete any
    pub async fn delete(&self, claims: &UserClaims, review_id: i32) -> AppResult<RatingSummary> {
        let review = self.repository.reviews.get_by_id(review_id).await?;
        if review.user_id != claims.user_id && !claims.is_staff() {
            return Err(AppError::Authorization("Not the author of this review".to_string()));
        }
        self.repository.reviews.delete(&review).await
    }
}
