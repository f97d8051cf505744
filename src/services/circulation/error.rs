//! Circulation errors and their classification

use chrono::NaiveDate;
use rust_decimal::Decimal;
use thiserror::Error;

/// Broad class of a circulation failure, used to pick the HTTP status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    InvalidInput,
    DependencyFailure,
    Internal,
}

#[derive(Error, Debug)]
pub enum CirculationError {
    #[error("Book {0} not found")]
    BookNotFound(i32),

    #[error("User {0} not found")]
    UserNotFound(i32),

    #[error("User {user_id} has no active loan for book {book_id}")]
    LoanNotFound { user_id: i32, book_id: i32 },

    #[error("User {user_id} already has book {book_id} on loan")]
    DuplicateLoan { user_id: i32, book_id: i32 },

    #[error("No copies of book {0} are available")]
    OutOfStock(i32),

    #[error("Maximum active loans reached ({active}/{limit})")]
    LoanLimitExceeded { active: i64, limit: i64 },

    #[error("Due charges of {balance} exceed the allowed {threshold}")]
    OutstandingDebt { balance: Decimal, threshold: Decimal },

    #[error("Issue date {0} is in the past")]
    InvalidIssueDate(NaiveDate),

    #[error("Failed to record loan: {0}")]
    AssignmentFailed(String),

    #[error("Failed to update catalog: {0}")]
    CatalogUpdateFailed(String),

    #[error("Failed to process return: {0}")]
    ReturnProcessingFailed(String),

    #[error("Payment failed: {0}")]
    PaymentFailed(String),

    #[error("Amount {0} is not a whole number of currency minor units")]
    InvalidAmount(Decimal),

    #[error("Amount {amount} exceeds the {available} of due charges not already being paid")]
    ExceedsDueCharges { amount: Decimal, available: Decimal },

    #[error("Payment request was already settled as payment {0}")]
    DuplicatePayment(i64),

    #[error("Charge {confirmation_id} succeeded but payment {payment_id} is not settled yet")]
    SettlementFailed { payment_id: i64, confirmation_id: String },

    #[error("Storage error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("Ledger inconsistency: {0}")]
    Internal(String),
}

impl CirculationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CirculationError::BookNotFound(_)
            | CirculationError::UserNotFound(_)
            | CirculationError::LoanNotFound { .. } => ErrorKind::NotFound,
            CirculationError::DuplicateLoan { .. }
            | CirculationError::OutOfStock(_)
            | CirculationError::LoanLimitExceeded { .. }
            | CirculationError::OutstandingDebt { .. }
            | CirculationError::ExceedsDueCharges { .. }
            | CirculationError::DuplicatePayment(_) => ErrorKind::Conflict,
            CirculationError::InvalidIssueDate(_) | CirculationError::InvalidAmount(_) => {
                ErrorKind::InvalidInput
            }
            CirculationError::AssignmentFailed(_)
            | CirculationError::CatalogUpdateFailed(_)
            | CirculationError::ReturnProcessingFailed(_)
            | CirculationError::PaymentFailed(_)
            | CirculationError::SettlementFailed { .. }
            | CirculationError::Store(_) => ErrorKind::DependencyFailure,
            CirculationError::Internal(_) => ErrorKind::Internal,
        }
    }
}
