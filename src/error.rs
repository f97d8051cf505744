//! Error types for Libris server

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::services::{
    circulation::{CirculationError, ErrorKind},
    payments::ProcessorError,
};

/// Application error codes returned in every error body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCode {
    Failure = 1,
    NotAuthorized = 2,
    DbFailure = 3,
    NoSuchUser = 4,
    NoSuchBook = 5,
    NoSuchLoan = 6,
    OutOfStock = 7,
    Duplicate = 8,
    DuplicateLoan = 9,
    DependencyFailure = 10,
    LoanLimitReached = 11,
    OutstandingDebt = 12,
    InvalidIssueDate = 13,
    PaymentFailure = 14,
    DuplicateRequest = 15,
    ExceedsDueCharges = 16,
    BadValue = 18,
    NoSuchData = 20,
    UserHasActiveLoans = 21,
    BookHasActiveLoans = 22,
}

/// Main application error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Authorization failed: {0}")]
    Authorization(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Business rule violation: {1}")]
    BusinessRule(ErrorCode, String),

    #[error(transparent)]
    Circulation(#[from] CirculationError),

    #[error("Payment processor error: {0}")]
    Processor(#[from] ProcessorError),
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        AppError::Validation(errors.to_string())
    }
}

/// Error response body
#[derive(Serialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    pub code: u32,
    pub error: String,
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Authentication(msg) => {
                (StatusCode::UNAUTHORIZED, ErrorCode::NotAuthorized, msg.clone())
            }
            AppError::Authorization(msg) => {
                (StatusCode::FORBIDDEN, ErrorCode::NotAuthorized, msg.clone())
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, ErrorCode::NoSuchData, msg.clone()),
            AppError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, ErrorCode::BadValue, msg.clone())
            }
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorCode::DbFailure,
                    "Database error".to_string(),
                )
            }
            AppError::Conflict(msg) => (StatusCode::CONFLICT, ErrorCode::Duplicate, msg.clone()),
            AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, ErrorCode::BadValue, msg.clone())
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorCode::Failure,
                    "Internal server error".to_string(),
                )
            }
            AppError::BusinessRule(ErrorCode::DuplicateRequest, msg) => {
                (StatusCode::CONFLICT, ErrorCode::DuplicateRequest, msg.clone())
            }
            AppError::BusinessRule(code, msg) => {
                (StatusCode::UNPROCESSABLE_ENTITY, *code, msg.clone())
            }
            AppError::Circulation(e) => circulation_response(e),
            AppError::Processor(e) => {
                tracing::error!("Payment processor error: {}", e);
                (
                    StatusCode::BAD_GATEWAY,
                    ErrorCode::DependencyFailure,
                    "Payment processor unavailable".to_string(),
                )
            }
        };

        let body = Json(ErrorResponse {
            code: code as u32,
            error: format!("{:?}", code),
            message,
        });

        (status, body).into_response()
    }
}

fn circulation_response(e: &CirculationError) -> (StatusCode, ErrorCode, String) {
    let code = match e {
        CirculationError::BookNotFound(_) => ErrorCode::NoSuchBook,
        CirculationError::UserNotFound(_) => ErrorCode::NoSuchUser,
        CirculationError::LoanNotFound { .. } => ErrorCode::NoSuchLoan,
        CirculationError::DuplicateLoan { .. } => ErrorCode::DuplicateLoan,
        CirculationError::OutOfStock(_) => ErrorCode::OutOfStock,
        CirculationError::LoanLimitExceeded { .. } => ErrorCode::LoanLimitReached,
        CirculationError::OutstandingDebt { .. } => ErrorCode::OutstandingDebt,
        CirculationError::InvalidIssueDate(_) => ErrorCode::InvalidIssueDate,
        CirculationError::PaymentFailed(_) | CirculationError::SettlementFailed { .. } => {
            ErrorCode::PaymentFailure
        }
        CirculationError::InvalidAmount(_) => ErrorCode::BadValue,
        CirculationError::ExceedsDueCharges { .. } => ErrorCode::ExceedsDueCharges,
        CirculationError::DuplicatePayment(_) => ErrorCode::DuplicateRequest,
        CirculationError::AssignmentFailed(_)
        | CirculationError::CatalogUpdateFailed(_)
        | CirculationError::ReturnProcessingFailed(_)
        | CirculationError::Store(_) => ErrorCode::DependencyFailure,
        CirculationError::Internal(_) => ErrorCode::Failure,
    };

    match e.kind() {
        ErrorKind::NotFound => (StatusCode::NOT_FOUND, code, e.to_string()),
        ErrorKind::Conflict => (StatusCode::CONFLICT, code, e.to_string()),
        ErrorKind::InvalidInput => (StatusCode::BAD_REQUEST, code, e.to_string()),
        // Message carries the charge id of a payment taken but not recorded
        ErrorKind::DependencyFailure if matches!(e, CirculationError::SettlementFailed { .. }) => {
            (StatusCode::BAD_GATEWAY, code, e.to_string())
        }
        ErrorKind::DependencyFailure => {
            tracing::error!("Circulation dependency failure: {}", e);
            (
                StatusCode::BAD_GATEWAY,
                code,
                "The operation could not be completed".to_string(),
            )
        }
        ErrorKind::Internal => {
            tracing::error!("Circulation internal error: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorCode::Failure,
                "Internal server error".to_string(),
            )
        }
    }
}

/// Result type alias for application operations
pub type AppResult<T> = Result<T, AppError>;
