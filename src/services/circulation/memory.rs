//! In-memory catalog and ledger for engine tests

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;

use crate::models::{
    loan::{NewLoan, ReturnReceipt},
    ActiveLoan, Book, HistoryEntry,
};

use super::{
    charges::Tariff,
    store::{Borrower, CatalogStore, Clock, LedgerStore, StoreResult},
    CirculationError,
};

struct PaymentRow {
    id: i64,
    user_id: i32,
    amount: Decimal,
    request_key: Option<String>,
    confirmation_id: Option<String>,
    settled: bool,
}

#[derive(Default)]
struct State {
    books: Vec<Book>,
    users: Vec<Borrower>,
    loans: Vec<ActiveLoan>,
    history: Vec<HistoryEntry>,
    payments: Vec<PaymentRow>,
    next_payment_id: i64,
    failing_reads: usize,
    failing_catalog_writes: bool,
    failing_settlements: bool,
    charge_before_issue: Option<Decimal>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_book(&self, id: i32, quantity: i32, daily_rate: Decimal, subscription_days: Option<i32>) {
        let now = Utc::now();
        self.state.lock().unwrap().books.push(Book {
            id,
            name: format!("Book {}", id),
            author: None,
            isbn: None,
            description: None,
            daily_rate,
            quantity_available: quantity,
            subscription_days,
            issue_count: 0,
            submit_count: 0,
            average_rating: None,
            rating_count: 0,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        });
    }

    pub fn delete_book(&self, id: i32) {
        let mut state = self.state.lock().unwrap();
        if let Some(book) = state.books.iter_mut().find(|b| b.id == id) {
            book.deleted_at = Some(Utc::now());
        }
    }

    pub fn add_user(&self, id: i32, due_charges: Decimal) {
        self.state.lock().unwrap().users.push(Borrower {
            id,
            email: format!("user{}@example.org", id),
            due_charges,
        });
    }

    pub fn book(&self, id: i32) -> Book {
        let state = self.state.lock().unwrap();
        state.books.iter().find(|b| b.id == id).cloned().unwrap()
    }

    pub fn balance(&self, user_id: i32) -> Decimal {
        let state = self.state.lock().unwrap();
        state.users.iter().find(|u| u.id == user_id).unwrap().due_charges
    }

    pub fn loans_of(&self, user_id: i32) -> Vec<ActiveLoan> {
        let state = self.state.lock().unwrap();
        state.loans.iter().filter(|l| l.user_id == user_id).cloned().collect()
    }

    pub fn history(&self) -> Vec<HistoryEntry> {
        self.state.lock().unwrap().history.clone()
    }

    /// Settled payments as (user, amount, confirmation id)
    pub fn payments(&self) -> Vec<(i32, Decimal, String)> {
        let state = self.state.lock().unwrap();
        state
            .payments
            .iter()
            .filter(|p| p.settled)
            .map(|p| (p.user_id, p.amount, p.confirmation_id.clone().unwrap_or_default()))
            .collect()
    }

    /// Reserved payments not settled yet as (id, user, amount)
    pub fn pending_payments(&self) -> Vec<(i64, i32, Decimal)> {
        let state = self.state.lock().unwrap();
        state
            .payments
            .iter()
            .filter(|p| !p.settled)
            .map(|p| (p.id, p.user_id, p.amount))
            .collect()
    }

    /// Settling a payment fails with a pool timeout
    pub fn fail_settlements(&self) {
        self.state.lock().unwrap().failing_settlements = true;
    }

    /// Lands a charge on the borrower inside the next issue commit, after
    /// the engine has read the balance
    pub fn charge_before_issue(&self, amount: Decimal) {
        self.state.lock().unwrap().charge_before_issue = Some(amount);
    }

    /// The next `count` reads fail with a pool timeout
    pub fn fail_reads(&self, count: usize) {
        self.state.lock().unwrap().failing_reads = count;
    }

    pub fn fail_catalog_writes(&self) {
        self.state.lock().unwrap().failing_catalog_writes = true;
    }

    fn read_guard(state: &mut State) -> StoreResult<()> {
        if state.failing_reads > 0 {
            state.failing_reads -= 1;
            return Err(sqlx::Error::PoolTimedOut);
        }
        Ok(())
    }
}

#[async_trait]
impl CatalogStore for MemoryStore {
    async fn find_book(&self, book_id: i32) -> StoreResult<Option<Book>> {
        let mut state = self.state.lock().unwrap();
        Self::read_guard(&mut state)?;
        Ok(state.books.iter().find(|b| b.id == book_id).cloned())
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn find_borrower(&self, user_id: i32) -> StoreResult<Option<Borrower>> {
        let mut state = self.state.lock().unwrap();
        Self::read_guard(&mut state)?;
        Ok(state.users.iter().find(|u| u.id == user_id).cloned())
    }

    async fn active_loans(&self, user_id: i32) -> StoreResult<Vec<ActiveLoan>> {
        let mut state = self.state.lock().unwrap();
        Self::read_guard(&mut state)?;
        Ok(state.loans.iter().filter(|l| l.user_id == user_id).cloned().collect())
    }

    async fn all_active_loans(&self) -> StoreResult<Vec<ActiveLoan>> {
        let mut state = self.state.lock().unwrap();
        Self::read_guard(&mut state)?;
        Ok(state.loans.clone())
    }

    async fn book_history(&self, book_id: i32) -> StoreResult<Vec<HistoryEntry>> {
        let state = self.state.lock().unwrap();
        Ok(state.history.iter().filter(|h| h.book_id == book_id).cloned().collect())
    }

    async fn user_history(&self, user_id: i32) -> StoreResult<Vec<HistoryEntry>> {
        let state = self.state.lock().unwrap();
        Ok(state.history.iter().filter(|h| h.user_id == user_id).cloned().collect())
    }

    async fn commit_issue(&self, loan: &NewLoan) -> Result<ActiveLoan, CirculationError> {
        let mut state = self.state.lock().unwrap();

        let pending_charge = state.charge_before_issue.take();
        let user = state
            .users
            .iter_mut()
            .find(|u| u.id == loan.user_id)
            .ok_or(CirculationError::UserNotFound(loan.user_id))?;
        if let Some(amount) = pending_charge {
            user.due_charges += amount;
        }
        if user.due_charges > loan.debt_threshold {
            return Err(CirculationError::OutstandingDebt {
                balance: user.due_charges,
                threshold: loan.debt_threshold,
            });
        }

        let active = state.loans.iter().filter(|l| l.user_id == loan.user_id).count() as i64;
        if active >= loan.max_active_loans {
            return Err(CirculationError::LoanLimitExceeded {
                active,
                limit: loan.max_active_loans,
            });
        }
        if state
            .loans
            .iter()
            .any(|l| l.user_id == loan.user_id && l.book_id == loan.book_id)
        {
            return Err(CirculationError::DuplicateLoan {
                user_id: loan.user_id,
                book_id: loan.book_id,
            });
        }
        if state.failing_catalog_writes {
            return Err(CirculationError::CatalogUpdateFailed("injected failure".to_string()));
        }

        let book = state
            .books
            .iter_mut()
            .find(|b| b.id == loan.book_id && b.deleted_at.is_none())
            .ok_or(CirculationError::BookNotFound(loan.book_id))?;
        if book.quantity_available <= 0 {
            return Err(CirculationError::OutOfStock(loan.book_id));
        }
        let previous = book.quantity_available;
        book.quantity_available -= 1;
        book.issue_count += 1;

        let created = ActiveLoan {
            user_id: loan.user_id,
            book_id: loan.book_id,
            issue_date: loan.issue_date,
            free_days: (previous == 1).then_some(loan.last_copy_free_days),
            charged_through: None,
        };
        state.loans.push(created.clone());
        let id = state.history.len() as i64 + 1;
        state.history.push(HistoryEntry {
            id,
            book_id: loan.book_id,
            user_id: loan.user_id,
            issue_date: loan.issue_date,
            return_date: None,
        });
        Ok(created)
    }

    async fn commit_return(
        &self,
        user_id: i32,
        book_id: i32,
        submitted_at: DateTime<Utc>,
        tariff: Option<Tariff>,
    ) -> Result<ReturnReceipt, CirculationError> {
        let mut state = self.state.lock().unwrap();

        let position = state
            .loans
            .iter()
            .position(|l| l.user_id == user_id && l.book_id == book_id && l.issue_date <= submitted_at)
            .ok_or(CirculationError::LoanNotFound { user_id, book_id })?;
        if state.failing_catalog_writes {
            return Err(CirculationError::ReturnProcessingFailed("injected failure".to_string()));
        }

        let charge = tariff
            .map(|t| t.return_charge(&state.loans[position], submitted_at.date_naive()))
            .unwrap_or(Decimal::ZERO);
        state.loans.remove(position);

        let book = state.books.iter_mut().find(|b| b.id == book_id).unwrap();
        book.quantity_available += 1;
        book.submit_count += 1;

        let entry = state
            .history
            .iter_mut()
            .find(|h| h.book_id == book_id && h.user_id == user_id && h.return_date.is_none())
            .ok_or_else(|| CirculationError::Internal("open history entry missing".to_string()))?;
        entry.return_date = Some(submitted_at);

        let user = state.users.iter_mut().find(|u| u.id == user_id).unwrap();
        user.due_charges += charge;
        Ok(ReturnReceipt {
            charge,
            due_charges: user.due_charges,
        })
    }

    async fn commit_accrual(
        &self,
        user_id: i32,
        book_id: i32,
        tariff: Tariff,
        through: NaiveDate,
    ) -> StoreResult<Decimal> {
        let mut state = self.state.lock().unwrap();
        let Some(loan) = state
            .loans
            .iter_mut()
            .find(|l| l.user_id == user_id && l.book_id == book_id)
        else {
            return Ok(Decimal::ZERO);
        };
        let charge = tariff.charge(loan, through);
        if charge <= Decimal::ZERO {
            return Ok(Decimal::ZERO);
        }
        loan.charged_through = Some(through);
        if let Some(user) = state.users.iter_mut().find(|u| u.id == user_id) {
            user.due_charges += charge;
        }
        Ok(charge)
    }

    async fn reserve_payment(
        &self,
        user_id: i32,
        amount: Decimal,
        request_key: &str,
    ) -> Result<i64, CirculationError> {
        let mut state = self.state.lock().unwrap();
        let balance = state
            .users
            .iter()
            .find(|u| u.id == user_id)
            .map(|u| u.due_charges)
            .ok_or(CirculationError::UserNotFound(user_id))?;

        if let Some(existing) = state
            .payments
            .iter()
            .find(|p| p.user_id == user_id && p.request_key.as_deref() == Some(request_key))
        {
            return if !existing.settled && existing.amount == amount {
                Ok(existing.id)
            } else {
                Err(CirculationError::DuplicatePayment(existing.id))
            };
        }

        let pending: Decimal = state
            .payments
            .iter()
            .filter(|p| p.user_id == user_id && !p.settled)
            .map(|p| p.amount)
            .sum();
        let available = balance - pending;
        if amount > available {
            return Err(CirculationError::ExceedsDueCharges { amount, available });
        }

        state.next_payment_id += 1;
        let id = state.next_payment_id;
        state.payments.push(PaymentRow {
            id,
            user_id,
            amount,
            request_key: Some(request_key.to_string()),
            confirmation_id: None,
            settled: false,
        });
        Ok(id)
    }

    async fn apply_payment(
        &self,
        user_id: i32,
        amount: Decimal,
        confirmation_id: &str,
        reservation: Option<i64>,
    ) -> StoreResult<Option<Decimal>> {
        let mut state = self.state.lock().unwrap();
        if state.failing_settlements {
            return Err(sqlx::Error::PoolTimedOut);
        }
        if !state.users.iter().any(|u| u.id == user_id) {
            return Ok(None);
        }

        match reservation {
            Some(id) => {
                let row = state
                    .payments
                    .iter_mut()
                    .find(|p| p.id == id && p.user_id == user_id && !p.settled)
                    .ok_or(sqlx::Error::RowNotFound)?;
                row.settled = true;
                row.confirmation_id = Some(confirmation_id.to_string());
            }
            None => {
                state.next_payment_id += 1;
                let id = state.next_payment_id;
                state.payments.push(PaymentRow {
                    id,
                    user_id,
                    amount,
                    request_key: None,
                    confirmation_id: Some(confirmation_id.to_string()),
                    settled: true,
                });
            }
        }

        let user = state.users.iter_mut().find(|u| u.id == user_id).unwrap();
        user.due_charges -= amount;
        Ok(Some(user.due_charges))
    }

    async fn release_payment(&self, reservation: i64) -> StoreResult<()> {
        let mut state = self.state.lock().unwrap();
        state.payments.retain(|p| p.id != reservation || p.settled);
        Ok(())
    }
}

/// Clock pinned to a settable instant
pub struct TestClock(Mutex<DateTime<Utc>>);

impl TestClock {
    /// Noon UTC on the given day of March 2025
    pub fn on_day(day: u32) -> Self {
        Self(Mutex::new(Utc.with_ymd_and_hms(2025, 3, day, 12, 0, 0).unwrap()))
    }

    pub fn advance_days(&self, days: i64) {
        let mut now = self.0.lock().unwrap();
        *now += Duration::days(days);
    }
}

impl Clock for TestClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}
