//! Circulation endpoints: issue, return and loan listings

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};

use crate::{
    error::{AppError, AppResult},
    models::{
        loan::{IssueBook, LoanDetails, ReturnBook, ReturnOutcome},
        ActiveLoan, HistoryEntry,
    },
};

use super::{claim_idempotency, release_idempotency, AuthenticatedUser};

/// Issue a book
///
/// Members borrow for themselves; staff may issue to any user.
#[utoipa::path(
    post,
    path = "/loans/issue",
    tag = "loans",
    security(("bearer_auth" = [])),
    params(
        ("Idempotency-Key" = Option<String>, Header, description = "Rejects replays of the same request")
    ),
    request_body = IssueBook,
    responses(
        (status = 201, description = "Book issued", body = ActiveLoan),
        (status = 400, description = "Issue date in the past", body = crate::error::ErrorResponse),
        (status = 404, description = "Book or user not found", body = crate::error::ErrorResponse),
        (status = 409, description = "Duplicate loan, out of stock, loan limit or outstanding debt", body = crate::error::ErrorResponse),
        (status = 502, description = "Storage failure", body = crate::error::ErrorResponse)
    )
)]
pub async fn issue_book(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    headers: HeaderMap,
    Json(request): Json<IssueBook>,
) -> AppResult<(StatusCode, Json<ActiveLoan>)> {
    let user_id = request.user_id.unwrap_or(claims.user_id);
    claims.require_self_or_staff(user_id)?;

    let key = claim_idempotency(&state, &headers, "issue", user_id).await?;
    match state
        .services
        .circulation
        .issue_book(request.book_id, user_id, request.issue_date)
        .await
    {
        Ok(loan) => Ok((StatusCode::CREATED, Json(loan))),
        Err(e) => {
            release_idempotency(&state, key, "issue", user_id).await;
            Err(e.into())
        }
    }
}

/// Return a book
///
/// Overdue days not yet billed are added to the user's due charges.
#[utoipa::path(
    post,
    path = "/loans/return",
    tag = "loans",
    security(("bearer_auth" = [])),
    params(
        ("Idempotency-Key" = Option<String>, Header, description = "Rejects replays of the same request")
    ),
    request_body = ReturnBook,
    responses(
        (status = 200, description = "Book returned", body = ReturnOutcome),
        (status = 404, description = "Book, user or loan not found", body = crate::error::ErrorResponse),
        (status = 502, description = "Storage failure", body = crate::error::ErrorResponse)
    )
)]
pub async fn return_book(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    headers: HeaderMap,
    Json(request): Json<ReturnBook>,
) -> AppResult<Json<ReturnOutcome>> {
    let user_id = request.user_id.unwrap_or(claims.user_id);
    claims.require_self_or_staff(user_id)?;
    if request.returned_at.is_some() && !claims.is_staff() {
        return Err(AppError::Authorization(
            "Only staff may set the return date".to_string(),
        ));
    }

    let key = claim_idempotency(&state, &headers, "return", user_id).await?;
    match state
        .services
        .circulation
        .return_book(request.book_id, user_id, request.returned_at)
        .await
    {
        Ok(outcome) => Ok(Json(outcome)),
        Err(e) => {
            release_idempotency(&state, key, "return", user_id).await;
            Err(e.into())
        }
    }
}

/// Get loans for a specific user
#[utoipa::path(
    get,
    path = "/users/{id}/loans",
    tag = "loans",
    security(("bearer_auth" = [])),
    params(
        ("id" = i32, Path, description = "User ID")
    ),
    responses(
        (status = 200, description = "User's active loans", body = Vec<LoanDetails>),
        (status = 404, description = "User not found")
    )
)]
pub async fn get_user_loans(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(user_id): Path<i32>,
) -> AppResult<Json<Vec<LoanDetails>>> {
    claims.require_self_or_staff(user_id)?;

    let loans = state.services.circulation.user_loans(user_id).await?;
    Ok(Json(loans))
}

/// Issue history of a user
#[utoipa::path(
    get,
    path = "/users/{id}/history",
    tag = "loans",
    security(("bearer_auth" = [])),
    params(
        ("id" = i32, Path, description = "User ID")
    ),
    responses(
        (status = 200, description = "Issue history, newest first", body = Vec<HistoryEntry>),
        (status = 404, description = "User not found")
    )
)]
pub async fn get_user_history(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(user_id): Path<i32>,
) -> AppResult<Json<Vec<HistoryEntry>>> {
    claims.require_self_or_staff(user_id)?;

    let history = state.services.circulation.user_history(user_id).await?;
    Ok(Json(history))
}
