//! Payment card and dues endpoints

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use uuid::Uuid;

use crate::{
    error::AppResult,
    models::payment::{AddCard, PayDues, Payment, PaymentCard, PaymentReceipt},
};

use super::{claim_idempotency, release_idempotency, AuthenticatedUser};

/// List own payment cards
#[utoipa::path(
    get,
    path = "/payments/cards",
    tag = "payments",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Stored cards", body = Vec<PaymentCard>)
    )
)]
pub async fn list_cards(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
) -> AppResult<Json<Vec<PaymentCard>>> {
    let cards = state.services.payments.list_cards(claims.user_id).await?;
    Ok(Json(cards))
}

/// Store a card tokenized by the payment processor
#[utoipa::path(
    post,
    path = "/payments/cards",
    tag = "payments",
    security(("bearer_auth" = [])),
    request_body = AddCard,
    responses(
        (status = 201, description = "Card stored", body = PaymentCard),
        (status = 400, description = "Invalid token"),
        (status = 502, description = "Payment processor unavailable")
    )
)]
pub async fn add_card(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Json(card): Json<AddCard>,
) -> AppResult<(StatusCode, Json<PaymentCard>)> {
    let card = state.services.payments.add_card(claims.user_id, card).await?;
    Ok((StatusCode::CREATED, Json(card)))
}

/// Remove a stored card
#[utoipa::path(
    delete,
    path = "/payments/cards/{id}",
    tag = "payments",
    security(("bearer_auth" = [])),
    params(
        ("id" = i32, Path, description = "Card ID")
    ),
    responses(
        (status = 204, description = "Card removed"),
        (status = 404, description = "Card not found")
    )
)]
pub async fn remove_card(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(id): Path<i32>,
) -> AppResult<StatusCode> {
    state.services.payments.remove_card(claims.user_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Pay due charges with a stored card
///
/// A failed request may be retried with the same `Idempotency-Key`: the
/// retry resumes the pending payment instead of charging the card again.
#[utoipa::path(
    post,
    path = "/payments/dues",
    tag = "payments",
    security(("bearer_auth" = [])),
    params(
        ("Idempotency-Key" = Option<String>, Header, description = "Identifies the payment across retries")
    ),
    request_body = PayDues,
    responses(
        (status = 200, description = "Payment settled", body = PaymentReceipt),
        (status = 400, description = "Invalid amount", body = crate::error::ErrorResponse),
        (status = 404, description = "Card not found", body = crate::error::ErrorResponse),
        (status = 409, description = "Amount exceeds due charges or request already settled", body = crate::error::ErrorResponse),
        (status = 502, description = "Charge declined, processor unavailable or charge not yet recorded", body = crate::error::ErrorResponse)
    )
)]
pub async fn pay_dues(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    headers: HeaderMap,
    Json(payment): Json<PayDues>,
) -> AppResult<Json<PaymentReceipt>> {
    let user_id = claims.user_id;
    let key = claim_idempotency(&state, &headers, "pay_dues", user_id).await?;
    let request_key = key.clone().unwrap_or_else(|| Uuid::new_v4().to_string());

    match state
        .services
        .payments
        .pay_dues(user_id, payment, &request_key)
        .await
    {
        Ok(receipt) => Ok(Json(receipt)),
        Err(e) => {
            release_idempotency(&state, key, "pay_dues", user_id).await;
            Err(e)
        }
    }
}

/// List own settled payments
#[utoipa::path(
    get,
    path = "/payments",
    tag = "payments",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Payments, newest first", body = Vec<Payment>)
    )
)]
pub async fn list_payments(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
) -> AppResult<Json<Vec<Payment>>> {
    let payments = state.services.payments.list_payments(claims.user_id).await?;
    Ok(Json(payments))
}
