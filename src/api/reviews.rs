//! Review endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use utoipa::ToSchema;

use crate::{
    error::AppResult,
    models::review::{RatingSummary, Review, UpsertReview},
};

use super::AuthenticatedUser;

#[derive(Serialize, ToSchema)]
pub struct ReviewResponse {
    pub review: Review,
    pub rating: RatingSummary,
}

/// List reviews of a book
#[utoipa::path(
    get,
    path = "/books/{id}/reviews",
    tag = "reviews",
    params(
        ("id" = i32, Path, description = "Book ID")
    ),
    responses(
        (status = 200, description = "Reviews, most recent first", body = Vec<Review>),
        (status = 404, description = "Book not found")
    )
)]
pub async fn list_reviews(
    State(state): State<crate::AppState>,
    Path(book_id): Path<i32>,
) -> AppResult<Json<Vec<Review>>> {
    let reviews = state.services.reviews.list_for_book(book_id).await?;
    Ok(Json(reviews))
}

/// Create or replace own review of a book
#[utoipa::path(
    put,
    path = "/books/{id}/reviews",
    tag = "reviews",
    security(("bearer_auth" = [])),
    params(
        ("id" = i32, Path, description = "Book ID")
    ),
    request_body = UpsertReview,
    responses(
        (status = 200, description = "Review saved", body = ReviewResponse),
        (status = 400, description = "Invalid rating or comment"),
        (status = 404, description = "Book not found")
    )
)]
pub async fn upsert_review(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(book_id): Path<i32>,
    Json(review): Json<UpsertReview>,
) -> AppResult<Json<ReviewResponse>> {
    let (review, rating) = state
        .services
        .reviews
        .upsert(claims.user_id, book_id, review)
        .await?;
    Ok(Json(ReviewResponse { review, rating }))
}

/// Delete a review
#[utoipa::path(
    delete,
    path = "/reviews/{id}",
    tag = "reviews",
    security(("bearer_auth" = [])),
    params(
        ("id" = i32, Path, description = "Review ID")
    ),
    responses(
        (status = 204, description = "Review deleted"),
        (status = 403, description = "Not the author"),
        (status = 404, description = "Review not found")
    )
)]
pub async fn delete_review(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(id): Path<i32>,
) -> AppResult<StatusCode> {
    state.services.reviews.delete(&claims, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
