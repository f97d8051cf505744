//! Collaborators of the circulation engine

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;

use crate::models::{
    loan::{NewLoan, ReturnReceipt},
    ActiveLoan, Book, HistoryEntry,
};

use super::{charges::Tariff, CirculationError};

pub type StoreResult<T> = Result<T, sqlx::Error>;

/// The part of a user record the engine needs
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Borrower {
    pub id: i32,
    pub email: String,
    pub due_charges: Decimal,
}

/// Source of the current time. All circulation dates are UTC.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Soft-deleted books are returned as well
    async fn find_book(&self, book_id: i32) -> StoreResult<Option<Book>>;
}

/// Users, outstanding loans and the issue history.
///
/// The `commit_*` methods are atomic: either every write lands or none does.
/// They re-check the guards they depend on so a concurrent request cannot
/// push a count or a balance past its limit between the engine's reads and
/// the write.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Deleted users are not returned
    async fn find_borrower(&self, user_id: i32) -> StoreResult<Option<Borrower>>;

    async fn active_loans(&self, user_id: i32) -> StoreResult<Vec<ActiveLoan>>;

    async fn all_active_loans(&self) -> StoreResult<Vec<ActiveLoan>>;

    async fn book_history(&self, book_id: i32) -> StoreResult<Vec<HistoryEntry>>;

    async fn user_history(&self, user_id: i32) -> StoreResult<Vec<HistoryEntry>>;

    /// Records the loan, takes one copy off the shelf and opens a history entry
    async fn commit_issue(&self, loan: &NewLoan) -> Result<ActiveLoan, CirculationError>;

    /// Bills the overdue days of the locked loan row, puts the copy back on the
    /// shelf, removes the loan and stamps its history entry
    async fn commit_return(
        &self,
        user_id: i32,
        book_id: i32,
        submitted_at: DateTime<Utc>,
        tariff: Option<Tariff>,
    ) -> Result<ReturnReceipt, CirculationError>;

    /// Bills the days between the loan's last billed day and `through`, then
    /// advances `charged_through`. Returns the amount added (zero when the
    /// loan is gone or already billed through that day).
    async fn commit_accrual(
        &self,
        user_id: i32,
        book_id: i32,
        tariff: Tariff,
        through: NaiveDate,
    ) -> StoreResult<Decimal>;

    /// Reserves `amount` of the user's due charges as a pending payment
    /// before the card is charged. Pending payments count against the
    /// balance, so concurrent reservations cannot exceed it together.
    ///
    /// A request key that already has a pending payment of the same amount
    /// resumes it and returns its id; a settled one is a `DuplicatePayment`.
    async fn reserve_payment(
        &self,
        user_id: i32,
        amount: Decimal,
        request_key: &str,
    ) -> Result<i64, CirculationError>;

    /// Subtracts a settled payment from the balance and records it, settling
    /// the `reservation` if there is one.
    /// Returns the new balance, or `None` if the user does not exist.
    async fn apply_payment(
        &self,
        user_id: i32,
        amount: Decimal,
        confirmation_id: &str,
        reservation: Option<i64>,
    ) -> StoreResult<Option<Decimal>>;

    /// Drops a pending payment whose charge was declined
    async fn release_payment(&self, reservation: i64) -> StoreResult<()>;
}
