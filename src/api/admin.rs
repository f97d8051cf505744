//! Administrative endpoints

use axum::{extract::State, Json};

use crate::{error::AppResult, services::circulation::accrual::AccrualReport};

use super::AuthenticatedUser;

/// Run the late-charge accrual sweep now
#[utoipa::path(
    post,
    path = "/admin/accrual/run",
    tag = "admin",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Sweep finished", body = AccrualReport),
        (status = 403, description = "Admin only")
    )
)]
pub async fn run_accrual(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
) -> AppResult<Json<AccrualReport>> {
    claims.require_admin()?;

    tracing::info!(user_id = claims.user_id, "Accrual run requested");
    let report = state.services.accrual.run().await?;
    Ok(Json(report))
}
