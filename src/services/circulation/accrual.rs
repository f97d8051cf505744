//! Periodic late-charge sweep over every outstanding loan

use std::{collections::HashMap, sync::Arc, time::Duration};

use rust_decimal::Decimal;
use serde::Serialize;
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use utoipa::ToSchema;

use crate::models::Book;

use super::{
    charges::Tariff,
    store::{CatalogStore, Clock, LedgerStore},
    CirculationError,
};

/// Summary of one sweep
#[derive(Debug, Clone, Default, PartialEq, Serialize, ToSchema)]
pub struct AccrualReport {
    /// Loans looked at
    pub scanned: usize,
    /// Loans that produced a charge
    pub charged: usize,
    /// Loans whose book is missing or carries no tariff
    pub skipped: usize,
    /// Loans that could not be billed; they are retried on the next run
    pub failed: usize,
    pub total_charged: Decimal,
}

#[derive(Clone)]
pub struct AccrualJob {
    catalog: Arc<dyn CatalogStore>,
    ledger: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
}

impl AccrualJob {
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        ledger: Arc<dyn LedgerStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            catalog,
            ledger,
            clock,
        }
    }

    /// Bill every loan through today.
    ///
    /// Each loan only pays for the days after its `charged_through` date,
    /// so running twice on the same day adds nothing the second time.
    pub async fn run(&self) -> Result<AccrualReport, CirculationError> {
        let today = self.clock.today();
        let loans = self.ledger.all_active_loans().await?;
        let mut books: HashMap<i32, Option<Book>> = HashMap::new();
        let mut report = AccrualReport::default();

        for loan in loans {
            report.scanned += 1;

            let book = match books.get(&loan.book_id) {
                Some(book) => book.clone(),
                None => match self.catalog.find_book(loan.book_id).await {
                    Ok(book) => {
                        books.insert(loan.book_id, book.clone());
                        book
                    }
                    Err(e) => {
                        tracing::warn!(book_id = loan.book_id, "Accrual: book lookup failed: {}", e);
                        report.failed += 1;
                        continue;
                    }
                },
            };

            let Some(tariff) = book
                .filter(|b| !b.is_deleted())
                .as_ref()
                .and_then(Tariff::for_book)
            else {
                report.skipped += 1;
                continue;
            };

            if tariff.overdue_days(&loan, today) == 0 {
                continue;
            }

            match self
                .ledger
                .commit_accrual(loan.user_id, loan.book_id, tariff, today)
                .await
            {
                Ok(charge) if charge > Decimal::ZERO => {
                    report.charged += 1;
                    report.total_charged += charge;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(
                        user_id = loan.user_id,
                        book_id = loan.book_id,
                        "Accrual: charge failed: {}",
                        e
                    );
                    report.failed += 1;
                }
            }
        }

        tracing::info!(
            scanned = report.scanned,
            charged = report.charged,
            skipped = report.skipped,
            failed = report.failed,
            total = %report.total_charged,
            "Accrual run finished"
        );
        Ok(report)
    }
}

/// Run the job every `period`, starting immediately
pub fn spawn(job: AccrualJob, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = job.run().await {
                tracing::error!("Accrual run failed: {}", e);
            }
        }
    })
}
