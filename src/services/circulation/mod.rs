//! Book circulation: issuing, returning and late charges

pub mod accrual;
pub mod charges;
mod error;
pub mod store;

#[cfg(test)]
pub(crate) mod memory;

use std::{future::Future, sync::Arc};

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;

use crate::{
    config::CirculationConfig,
    models::{
        loan::{LoanDetails, NewLoan, ReturnOutcome},
        ActiveLoan, Book, HistoryEntry,
    },
};

pub use charges::Tariff;
pub use error::{CirculationError, ErrorKind};
pub use store::{Borrower, CatalogStore, Clock, LedgerStore, StoreResult, SystemClock};

/// Runs a read, retrying it once if the store fails
async fn read_retrying<T, F, Fut>(what: &str, mut read: F) -> Result<T, CirculationError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StoreResult<T>>,
{
    match read().await {
        Ok(value) => Ok(value),
        Err(e) => {
            tracing::warn!("Reading {} failed, retrying once: {}", what, e);
            Ok(read().await?)
        }
    }
}

#[derive(Clone)]
pub struct CirculationService {
    catalog: Arc<dyn CatalogStore>,
    ledger: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
    rules: CirculationConfig,
}

impl CirculationService {
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        ledger: Arc<dyn LedgerStore>,
        clock: Arc<dyn Clock>,
        rules: CirculationConfig,
    ) -> Self {
        Self {
            catalog,
            ledger,
            clock,
            rules,
        }
    }

    async fn live_book(&self, book_id: i32) -> Result<Book, CirculationError> {
        read_retrying("book", || self.catalog.find_book(book_id))
            .await?
            .filter(|book| !book.is_deleted())
            .ok_or(CirculationError::BookNotFound(book_id))
    }

    async fn borrower(&self, user_id: i32) -> Result<Borrower, CirculationError> {
        read_retrying("user", || self.ledger.find_borrower(user_id))
            .await?
            .ok_or(CirculationError::UserNotFound(user_id))
    }

    /// Issue a book to a user.
    ///
    /// Checks run in a fixed order and the first failing one is reported.
    /// `requested_date` lets a loan start on a later day; it may not be in
    /// the past.
    pub async fn issue_book(
        &self,
        book_id: i32,
        user_id: i32,
        requested_date: Option<NaiveDate>,
    ) -> Result<ActiveLoan, CirculationError> {
        let book = self.live_book(book_id).await?;
        let borrower = self.borrower(user_id).await?;
        let loans = read_retrying("active loans", || self.ledger.active_loans(user_id)).await?;

        if loans.iter().any(|loan| loan.book_id == book_id) {
            return Err(CirculationError::DuplicateLoan { user_id, book_id });
        }
        if book.quantity_available <= 0 {
            return Err(CirculationError::OutOfStock(book_id));
        }
        let active = loans.len() as i64;
        if active >= self.rules.max_active_loans {
            return Err(CirculationError::LoanLimitExceeded {
                active,
                limit: self.rules.max_active_loans,
            });
        }
        if borrower.due_charges > self.rules.debt_threshold {
            return Err(CirculationError::OutstandingDebt {
                balance: borrower.due_charges,
                threshold: self.rules.debt_threshold,
            });
        }

        let now = self.clock.now();
        let today = now.date_naive();
        let issue_date = match requested_date {
            Some(date) if date < today => return Err(CirculationError::InvalidIssueDate(date)),
            Some(date) if date > today => date.and_time(NaiveTime::MIN).and_utc(),
            _ => now,
        };

        let new_loan = NewLoan {
            user_id,
            book_id,
            issue_date,
            last_copy_free_days: (issue_date.date_naive() - today).num_days().max(0) as i32,
            max_active_loans: self.rules.max_active_loans,
            debt_threshold: self.rules.debt_threshold,
        };
        let loan = self.ledger.commit_issue(&new_loan).await?;

        tracing::info!(
            user_id,
            book_id,
            issue_date = %loan.issue_date,
            free_days = ?loan.free_days,
            "Book issued"
        );
        Ok(loan)
    }

    /// Take a book back, billing any overdue days not yet accrued
    pub async fn return_book(
        &self,
        book_id: i32,
        user_id: i32,
        submitted_at: Option<DateTime<Utc>>,
    ) -> Result<ReturnOutcome, CirculationError> {
        let book = read_retrying("book", || self.catalog.find_book(book_id))
            .await?
            .ok_or(CirculationError::BookNotFound(book_id))?;
        self.borrower(user_id).await?;

        let submitted_at = submitted_at.unwrap_or_else(|| self.clock.now());
        let loans = read_retrying("active loans", || self.ledger.active_loans(user_id)).await?;
        if !loans
            .iter()
            .any(|loan| loan.book_id == book_id && loan.issue_date <= submitted_at)
        {
            return Err(CirculationError::LoanNotFound { user_id, book_id });
        }

        let receipt = self
            .ledger
            .commit_return(user_id, book_id, submitted_at, Tariff::for_book(&book))
            .await?;

        tracing::info!(
            user_id,
            book_id,
            charge = %receipt.charge,
            due_charges = %receipt.due_charges,
            "Book returned"
        );
        Ok(ReturnOutcome {
            book_id,
            user_id,
            returned_at: submitted_at,
            charge: receipt.charge,
            due_charges: receipt.due_charges,
            note: format!("Book returned. Total due charges: {}", receipt.due_charges),
        })
    }

    /// Outstanding loans of a user with the charge each would incur today
    pub async fn user_loans(&self, user_id: i32) -> Result<Vec<LoanDetails>, CirculationError> {
        self.borrower(user_id).await?;
        let loans = read_retrying("active loans", || self.ledger.active_loans(user_id)).await?;
        let today = self.clock.today();

        let mut details = Vec::with_capacity(loans.len());
        for loan in loans {
            let book = read_retrying("book", || self.catalog.find_book(loan.book_id)).await?;
            let tariff = book.as_ref().and_then(Tariff::for_book);
            let pending_charge = tariff
                .map(|t| t.charge(&loan, today))
                .unwrap_or(Decimal::ZERO);
            details.push(LoanDetails {
                book_id: loan.book_id,
                book_name: book.map(|b| b.name).unwrap_or_default(),
                issue_date: loan.issue_date,
                billing_starts: tariff.map(|t| t.billing_start(&loan)),
                pending_charge,
                is_overdue: tariff.is_some_and(|t| t.overdue_days(&loan, today) > 0),
            });
        }
        Ok(details)
    }

    pub async fn book_history(&self, book_id: i32) -> Result<Vec<HistoryEntry>, CirculationError> {
        read_retrying("book", || self.catalog.find_book(book_id))
            .await?
            .ok_or(CirculationError::BookNotFound(book_id))?;
        Ok(read_retrying("history", || self.ledger.book_history(book_id)).await?)
    }

    pub async fn user_history(&self, user_id: i32) -> Result<Vec<HistoryEntry>, CirculationError> {
        self.borrower(user_id).await?;
        Ok(read_retrying("history", || self.ledger.user_history(user_id)).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memory::{MemoryStore, TestClock};
    use rust_decimal_macros::dec;

    fn rules() -> CirculationConfig {
        CirculationConfig {
            max_active_loans: 5,
            debt_threshold: dec!(500),
        }
    }

    fn engine(store: &Arc<MemoryStore>, clock: &Arc<TestClock>) -> CirculationService {
        CirculationService::new(store.clone(), store.clone(), clock.clone(), rules())
    }

    fn setup() -> (Arc<MemoryStore>, Arc<TestClock>, CirculationService) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(TestClock::on_day(1));
        store.add_user(1, Decimal::ZERO);
        store.add_book(10, 3, dec!(10), Some(2));
        let service = engine(&store, &clock);
        (store, clock, service)
    }

    #[tokio::test]
    async fn test_issue_then_return_restores_catalog() {
        let (store, _clock, service) = setup();

        service.issue_book(10, 1, None).await.unwrap();
        assert_eq!(store.book(10).quantity_available, 2);
        assert_eq!(store.loans_of(1).len(), 1);
        assert_eq!(store.history().len(), 1);
        assert!(store.history()[0].return_date.is_none());

        let outcome = service.return_book(10, 1, None).await.unwrap();
        assert_eq!(outcome.charge, Decimal::ZERO);
        let book = store.book(10);
        assert_eq!(book.quantity_available, 3);
        assert_eq!(book.issue_count, 1);
        assert_eq!(book.submit_count, 1);
        assert!(store.loans_of(1).is_empty());
        assert!(store.history()[0].return_date.is_some());
    }

    #[tokio::test]
    async fn test_overdue_return_adds_charge() {
        let (store, clock, service) = setup();

        service.issue_book(10, 1, None).await.unwrap();
        clock.advance_days(5);
        let outcome = service.return_book(10, 1, None).await.unwrap();

        assert_eq!(outcome.charge, dec!(30));
        assert_eq!(outcome.due_charges, dec!(30));
        assert_eq!(store.balance(1), dec!(30));
        assert_eq!(outcome.note, "Book returned. Total due charges: 30");
    }

    #[tokio::test]
    async fn test_backdated_return_credits_accrued_days() {
        let (store, clock, service) = setup();
        service.issue_book(10, 1, None).await.unwrap();

        let tariff = Tariff::for_book(&store.book(10)).unwrap();
        let through = NaiveDate::from_ymd_opt(2025, 3, 7).unwrap();
        assert_eq!(store.commit_accrual(1, 10, tariff, through).await.unwrap(), dec!(40));
        assert_eq!(store.balance(1), dec!(40));

        // handed in on day 5, processed on day 8
        let handed_in = clock.now() + chrono::Duration::days(4);
        clock.advance_days(7);
        let outcome = service.return_book(10, 1, Some(handed_in)).await.unwrap();

        assert_eq!(outcome.charge, dec!(-20));
        assert_eq!(outcome.due_charges, dec!(20));
        assert_eq!(store.balance(1), dec!(20));
    }

    #[tokio::test]
    async fn test_unknown_or_deleted_book() {
        let (store, _clock, service) = setup();
        assert!(matches!(
            service.issue_book(99, 1, None).await,
            Err(CirculationError::BookNotFound(99))
        ));
        store.delete_book(10);
        assert!(matches!(
            service.issue_book(10, 1, None).await,
            Err(CirculationError::BookNotFound(10))
        ));
    }

    #[tokio::test]
    async fn test_unknown_user() {
        let (_store, _clock, service) = setup();
        assert!(matches!(
            service.issue_book(10, 42, None).await,
            Err(CirculationError::UserNotFound(42))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_loan_rejected() {
        let (store, _clock, service) = setup();
        service.issue_book(10, 1, None).await.unwrap();
        assert!(matches!(
            service.issue_book(10, 1, None).await,
            Err(CirculationError::DuplicateLoan { user_id: 1, book_id: 10 })
        ));
        assert_eq!(store.book(10).quantity_available, 2);
    }

    #[tokio::test]
    async fn test_out_of_stock_never_goes_negative() {
        let (store, _clock, service) = setup();
        store.add_book(11, 1, dec!(1), Some(7));
        store.add_user(2, Decimal::ZERO);

        service.issue_book(11, 1, None).await.unwrap();
        assert_eq!(store.book(11).quantity_available, 0);
        assert!(matches!(
            service.issue_book(11, 2, None).await,
            Err(CirculationError::OutOfStock(11))
        ));
        assert_eq!(store.book(11).quantity_available, 0);
    }

    #[tokio::test]
    async fn test_loan_limit() {
        let (store, _clock, service) = setup();
        for id in 20..26 {
            store.add_book(id, 1, dec!(1), Some(7));
        }
        for id in 20..25 {
            service.issue_book(id, 1, None).await.unwrap();
        }
        assert!(matches!(
            service.issue_book(25, 1, None).await,
            Err(CirculationError::LoanLimitExceeded { active: 5, limit: 5 })
        ));
        assert_eq!(store.loans_of(1).len(), 5);
        assert_eq!(store.book(25).quantity_available, 1);
    }

    #[tokio::test]
    async fn test_outstanding_debt_blocks_issue() {
        let (store, _clock, service) = setup();
        store.add_user(2, dec!(600));

        assert!(matches!(
            service.issue_book(10, 2, None).await,
            Err(CirculationError::OutstandingDebt { .. })
        ));
        assert_eq!(store.book(10).quantity_available, 3);
        assert!(store.loans_of(2).is_empty());
        assert!(store.history().is_empty());

        // exactly at the threshold is still allowed
        store.add_user(3, dec!(500));
        assert!(service.issue_book(10, 3, None).await.is_ok());
    }

    #[tokio::test]
    async fn test_debt_rechecked_when_committing_issue() {
        let (store, _clock, service) = setup();
        // a charge lands after the engine read a clean balance
        store.charge_before_issue(dec!(501));

        assert!(matches!(
            service.issue_book(10, 1, None).await,
            Err(CirculationError::OutstandingDebt { balance, .. }) if balance == dec!(501)
        ));
        assert_eq!(store.book(10).quantity_available, 3);
        assert!(store.loans_of(1).is_empty());
        assert!(store.history().is_empty());
    }

    #[tokio::test]
    async fn test_checks_run_in_order() {
        let (store, _clock, service) = setup();
        store.add_book(11, 0, dec!(1), Some(7));
        store.add_user(2, dec!(600));
        // out of stock is reported before the debt
        assert!(matches!(
            service.issue_book(11, 2, None).await,
            Err(CirculationError::OutOfStock(11))
        ));
        // debt is reported before a bad date
        let yesterday = NaiveDate::from_ymd_opt(2025, 2, 28).unwrap();
        assert!(matches!(
            service.issue_book(10, 2, Some(yesterday)).await,
            Err(CirculationError::OutstandingDebt { .. })
        ));
    }

    #[tokio::test]
    async fn test_issue_date_in_past_rejected() {
        let (store, _clock, service) = setup();
        let yesterday = NaiveDate::from_ymd_opt(2025, 2, 28).unwrap();
        assert!(matches!(
            service.issue_book(10, 1, Some(yesterday)).await,
            Err(CirculationError::InvalidIssueDate(d)) if d == yesterday
        ));
        assert!(store.loans_of(1).is_empty());

        // today is fine, time of day is ignored
        let today = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        assert!(service.issue_book(10, 1, Some(today)).await.is_ok());
    }

    #[tokio::test]
    async fn test_last_copy_gets_free_days() {
        let (store, _clock, service) = setup();
        store.add_book(11, 1, dec!(10), Some(2));
        let later = NaiveDate::from_ymd_opt(2025, 3, 4).unwrap();

        let loan = service.issue_book(11, 1, Some(later)).await.unwrap();
        assert_eq!(loan.free_days, Some(3));
        assert_eq!(loan.issue_date.date_naive(), later);

        // free days stack on top of a deferred start
        let tariff = Tariff::for_book(&store.book(11)).unwrap();
        assert_eq!(
            tariff.billing_start(&loan),
            NaiveDate::from_ymd_opt(2025, 3, 9).unwrap()
        );

        // not the last copy: no free days even for a future start
        let loan = service.issue_book(10, 1, Some(later)).await.unwrap();
        assert_eq!(loan.free_days, None);
        assert_eq!(store.loans_of(1).len(), 2);
    }

    #[tokio::test]
    async fn test_return_without_loan() {
        let (_store, _clock, service) = setup();
        assert!(matches!(
            service.return_book(10, 1, None).await,
            Err(CirculationError::LoanNotFound { user_id: 1, book_id: 10 })
        ));
    }

    #[tokio::test]
    async fn test_return_before_issue_date_rejected() {
        let (store, clock, service) = setup();
        let later = NaiveDate::from_ymd_opt(2025, 3, 10).unwrap();
        service.issue_book(10, 1, Some(later)).await.unwrap();

        assert!(matches!(
            service.return_book(10, 1, Some(clock.now())).await,
            Err(CirculationError::LoanNotFound { .. })
        ));
        assert_eq!(store.loans_of(1).len(), 1);
    }

    #[tokio::test]
    async fn test_failed_catalog_write_leaves_no_loan() {
        let (store, _clock, service) = setup();
        store.fail_catalog_writes();

        assert!(matches!(
            service.issue_book(10, 1, None).await,
            Err(CirculationError::CatalogUpdateFailed(_))
        ));
        assert!(store.loans_of(1).is_empty());
        assert_eq!(store.book(10).quantity_available, 3);
        assert!(store.history().is_empty());
    }

    #[tokio::test]
    async fn test_reads_are_retried_once() {
        let (store, _clock, service) = setup();
        store.fail_reads(1);
        assert!(service.issue_book(10, 1, None).await.is_ok());

        store.fail_reads(2);
        assert!(matches!(
            service.user_loans(1).await,
            Err(CirculationError::Store(_))
        ));
    }

    #[tokio::test]
    async fn test_user_loans_show_pending_charge() {
        let (_store, clock, service) = setup();
        service.issue_book(10, 1, None).await.unwrap();
        clock.advance_days(4);

        let loans = service.user_loans(1).await.unwrap();
        assert_eq!(loans.len(), 1);
        assert_eq!(loans[0].book_name, "Book 10");
        assert_eq!(loans[0].pending_charge, dec!(20));
        assert!(loans[0].is_overdue);
    }

    #[tokio::test]
    async fn test_history_tracks_each_issue() {
        let (_store, clock, service) = setup();
        service.issue_book(10, 1, None).await.unwrap();
        service.return_book(10, 1, None).await.unwrap();
        clock.advance_days(1);
        service.issue_book(10, 1, None).await.unwrap();

        let history = service.book_history(10).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history.iter().filter(|h| h.return_date.is_none()).count(), 1);
        assert_eq!(service.user_history(1).await.unwrap().len(), 2);
    }
}
