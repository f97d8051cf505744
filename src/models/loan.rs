//! Loan and book history models

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

/// An outstanding loan. Exists for as long as the book has not been returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct ActiveLoan {
    pub user_id: i32,
    pub book_id: i32,
    pub issue_date: DateTime<Utc>,
    /// Extra days before billing starts, granted when the last copy was issued
    pub free_days: Option<i32>,
    /// Last day already billed by the accrual job
    pub charged_through: Option<NaiveDate>,
}

/// One issue event. `return_date` is stamped when the book comes back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct HistoryEntry {
    pub id: i64,
    pub book_id: i32,
    pub user_id: i32,
    pub issue_date: DateTime<Utc>,
    pub return_date: Option<DateTime<Utc>>,
}

/// Active loan with book details, for display
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LoanDetails {
    pub book_id: i32,
    pub book_name: String,
    pub issue_date: DateTime<Utc>,
    /// First day on which late charges apply, if the book carries a tariff
    pub billing_starts: Option<NaiveDate>,
    /// Charge that would be added if the book were returned today
    pub pending_charge: Decimal,
    pub is_overdue: bool,
}

/// Issue request handed to the ledger
#[derive(Debug, Clone)]
pub struct NewLoan {
    pub user_id: i32,
    pub book_id: i32,
    pub issue_date: DateTime<Utc>,
    /// Applied only if the issued copy turns out to be the last one on the shelf
    pub last_copy_free_days: i32,
    pub max_active_loans: i64,
    pub debt_threshold: Decimal,
}

/// Result of a committed return
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnReceipt {
    pub charge: Decimal,
    pub due_charges: Decimal,
}

/// Confirmation sent back after a return
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReturnOutcome {
    pub book_id: i32,
    pub user_id: i32,
    pub returned_at: DateTime<Utc>,
    /// Amount added to the balance by this return
    pub charge: Decimal,
    pub due_charges: Decimal,
    pub note: String,
}

/// Issue request body
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct IssueBook {
    pub book_id: i32,
    /// Defaults to the authenticated user; staff may issue for others
    pub user_id: Option<i32>,
    /// Start the loan on a later day
    pub issue_date: Option<NaiveDate>,
}

/// Return request body
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ReturnBook {
    pub book_id: i32,
    pub user_id: Option<i32>,
    /// Staff only: back-date the return
    pub returned_at: Option<DateTime<Utc>>,
}
