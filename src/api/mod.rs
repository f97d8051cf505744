//! API handlers for Libris REST endpoints

pub mod admin;
pub mod auth;
pub mod books;
pub mod health;
pub mod loans;
pub mod openapi;
pub mod payments;
pub mod reviews;
pub mod users;

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap},
    RequestPartsExt,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use serde::Serialize;
use utoipa::ToSchema;

use crate::{
    error::{AppError, AppResult, ErrorCode},
    models::{book::Book, user::{UserClaims, UserShort}},
    AppState,
};

/// Paginated response wrapper
#[derive(Serialize, ToSchema)]
#[aliases(BookPage = PaginatedResponse<Book>, UserPage = PaginatedResponse<UserShort>)]
pub struct PaginatedResponse<T> {
    pub items: Vec<T>,
    /// Total number of matches
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
}

/// Extractor for authenticated user from JWT token
pub struct AuthenticatedUser(pub UserClaims);

#[async_trait]
impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) = parts
            .extract::<TypedHeader<Authorization<Bearer>>>()
            .await
            .map_err(|_| AppError::Authentication("Missing or invalid authorization header".to_string()))?;

        // Validate JWT token using the secret from configuration
        let claims = UserClaims::from_token(bearer.token(), &state.config.auth.jwt_secret)
            .map_err(|e| AppError::Authentication(e.to_string()))?;

        Ok(AuthenticatedUser(claims))
    }
}

pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// Claim the request's `Idempotency-Key`, if any.
///
/// Returns the key so it can be released when the operation fails. A key
/// that was already used for this operation is a `DuplicateRequest`.
pub async fn claim_idempotency(
    state: &AppState,
    headers: &HeaderMap,
    operation: &str,
    user_id: i32,
) -> AppResult<Option<String>> {
    let Some(value) = headers.get(IDEMPOTENCY_HEADER) else {
        return Ok(None);
    };
    let key = value
        .to_str()
        .ok()
        .filter(|k| !k.is_empty() && k.len() <= 255)
        .ok_or_else(|| AppError::BadRequest("Invalid Idempotency-Key header".to_string()))?
        .to_string();

    if !state
        .services
        .redis
        .claim_idempotency_key(operation, user_id, &key)
        .await?
    {
        return Err(AppError::BusinessRule(
            ErrorCode::DuplicateRequest,
            "This request has already been processed".to_string(),
        ));
    }
    Ok(Some(key))
}

/// Release a claimed key after a failed operation so the client may retry
pub async fn release_idempotency(state: &AppState, key: Option<String>, operation: &str, user_id: i32) {
    if let Some(key) = key {
        if let Err(e) = state
            .services
            .redis
            .release_idempotency_key(operation, user_id, &key)
            .await
        {
            tracing::warn!("Failed to release idempotency key: {}", e);
        }
    }
}
