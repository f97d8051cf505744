//! Loans repository: active loans, issue history and balances

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::{Pool, Postgres};

use crate::{
    models::{
        loan::{NewLoan, ReturnReceipt},
        ActiveLoan, HistoryEntry,
    },
    services::circulation::{Borrower, CirculationError, LedgerStore, StoreResult, Tariff},
};

#[derive(Clone)]
pub struct LoansRepository {
    pool: Pool<Postgres>,
}

impl LoansRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LedgerStore for LoansRepository {
    async fn find_borrower(&self, user_id: i32) -> StoreResult<Option<Borrower>> {
        sqlx::query_as::<_, Borrower>(
            "SELECT id, email, due_charges FROM users WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn active_loans(&self, user_id: i32) -> StoreResult<Vec<ActiveLoan>> {
        sqlx::query_as::<_, ActiveLoan>(
            "SELECT * FROM active_loans WHERE user_id = $1 ORDER BY issue_date",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
    }

    async fn all_active_loans(&self) -> StoreResult<Vec<ActiveLoan>> {
        sqlx::query_as::<_, ActiveLoan>("SELECT * FROM active_loans ORDER BY user_id, book_id")
            .fetch_all(&self.pool)
            .await
    }

    async fn book_history(&self, book_id: i32) -> StoreResult<Vec<HistoryEntry>> {
        sqlx::query_as::<_, HistoryEntry>(
            "SELECT * FROM book_history WHERE book_id = $1 ORDER BY issue_date DESC, id DESC",
        )
        .bind(book_id)
        .fetch_all(&self.pool)
        .await
    }

    async fn user_history(&self, user_id: i32) -> StoreResult<Vec<HistoryEntry>> {
        sqlx::query_as::<_, HistoryEntry>(
            "SELECT * FROM book_history WHERE user_id = $1 ORDER BY issue_date DESC, id DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
    }

    async fn commit_issue(&self, loan: &NewLoan) -> Result<ActiveLoan, CirculationError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| CirculationError::AssignmentFailed(e.to_string()))?;

        // Serializes issues and payments of the same user so the count and
        // balance below stay valid until commit
        let balance: Decimal = sqlx::query_scalar(
            "SELECT due_charges FROM users WHERE id = $1 AND deleted_at IS NULL FOR UPDATE",
        )
        .bind(loan.user_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(CirculationError::UserNotFound(loan.user_id))?;
        if balance > loan.debt_threshold {
            return Err(CirculationError::OutstandingDebt {
                balance,
                threshold: loan.debt_threshold,
            });
        }

        let active: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM active_loans WHERE user_id = $1")
            .bind(loan.user_id)
            .fetch_one(&mut *tx)
            .await?;
        if active >= loan.max_active_loans {
            return Err(CirculationError::LoanLimitExceeded {
                active,
                limit: loan.max_active_loans,
            });
        }

        let duplicate: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM active_loans WHERE user_id = $1 AND book_id = $2)",
        )
        .bind(loan.user_id)
        .bind(loan.book_id)
        .fetch_one(&mut *tx)
        .await?;
        if duplicate {
            return Err(CirculationError::DuplicateLoan {
                user_id: loan.user_id,
                book_id: loan.book_id,
            });
        }

        let previous: Option<i32> = sqlx::query_scalar(
            r#"
            UPDATE books SET
                quantity_available = quantity_available - 1,
                issue_count = issue_count + 1,
                updated_at = NOW()
            WHERE id = $1 AND deleted_at IS NULL AND quantity_available > 0
            RETURNING quantity_available + 1
            "#,
        )
        .bind(loan.book_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| CirculationError::CatalogUpdateFailed(e.to_string()))?;

        let Some(previous) = previous else {
            let on_shelf: Option<i32> = sqlx::query_scalar(
                "SELECT quantity_available FROM books WHERE id = $1 AND deleted_at IS NULL",
            )
            .bind(loan.book_id)
            .fetch_optional(&mut *tx)
            .await?;
            return Err(match on_shelf {
                Some(_) => CirculationError::OutOfStock(loan.book_id),
                None => CirculationError::BookNotFound(loan.book_id),
            });
        };

        let free_days = (previous == 1).then_some(loan.last_copy_free_days);
        let created = sqlx::query_as::<_, ActiveLoan>(
            r#"
            INSERT INTO active_loans (user_id, book_id, issue_date, free_days)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id, book_id) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(loan.user_id)
        .bind(loan.book_id)
        .bind(loan.issue_date)
        .bind(free_days)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| CirculationError::AssignmentFailed(e.to_string()))?
        .ok_or(CirculationError::DuplicateLoan {
            user_id: loan.user_id,
            book_id: loan.book_id,
        })?;

        sqlx::query("INSERT INTO book_history (book_id, user_id, issue_date) VALUES ($1, $2, $3)")
            .bind(loan.book_id)
            .bind(loan.user_id)
            .bind(loan.issue_date)
            .execute(&mut *tx)
            .await
            .map_err(|e| CirculationError::AssignmentFailed(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| CirculationError::AssignmentFailed(e.to_string()))?;
        Ok(created)
    }

    async fn commit_return(
        &self,
        user_id: i32,
        book_id: i32,
        submitted_at: DateTime<Utc>,
        tariff: Option<Tariff>,
    ) -> Result<ReturnReceipt, CirculationError> {
        let failed = |e: sqlx::Error| CirculationError::ReturnProcessingFailed(e.to_string());
        let mut tx = self.pool.begin().await?;

        // The row lock keeps the accrual sweep from billing the same days
        let loan = sqlx::query_as::<_, ActiveLoan>(
            r#"
            SELECT * FROM active_loans
            WHERE user_id = $1 AND book_id = $2 AND issue_date <= $3
            FOR UPDATE
            "#,
        )
        .bind(user_id)
        .bind(book_id)
        .bind(submitted_at)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(CirculationError::LoanNotFound { user_id, book_id })?;

        let charge = tariff
            .map(|t| t.return_charge(&loan, submitted_at.date_naive()))
            .unwrap_or(Decimal::ZERO);

        sqlx::query("DELETE FROM active_loans WHERE user_id = $1 AND book_id = $2")
            .bind(user_id)
            .bind(book_id)
            .execute(&mut *tx)
            .await
            .map_err(failed)?;

        let shelved = sqlx::query(
            r#"
            UPDATE books SET
                quantity_available = quantity_available + 1,
                submit_count = submit_count + 1,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(book_id)
        .execute(&mut *tx)
        .await
        .map_err(failed)?;
        if shelved.rows_affected() == 0 {
            return Err(CirculationError::ReturnProcessingFailed(format!(
                "book {} vanished",
                book_id
            )));
        }

        let stamped = sqlx::query(
            r#"
            UPDATE book_history SET return_date = $3
            WHERE book_id = $1 AND user_id = $2 AND return_date IS NULL
            "#,
        )
        .bind(book_id)
        .bind(user_id)
        .bind(submitted_at)
        .execute(&mut *tx)
        .await
        .map_err(failed)?;
        if stamped.rows_affected() != 1 {
            return Err(CirculationError::Internal(format!(
                "{} open history entries for user {} and book {}",
                stamped.rows_affected(),
                user_id,
                book_id
            )));
        }

        let due_charges: Decimal = sqlx::query_scalar(
            r#"
            UPDATE users SET due_charges = due_charges + $2, updated_at = NOW()
            WHERE id = $1
            RETURNING due_charges
            "#,
        )
        .bind(user_id)
        .bind(charge)
        .fetch_optional(&mut *tx)
        .await
        .map_err(failed)?
        .ok_or(CirculationError::UserNotFound(user_id))?;

        tx.commit().await.map_err(failed)?;
        Ok(ReturnReceipt {
            charge,
            due_charges,
        })
    }

    async fn commit_accrual(
        &self,
        user_id: i32,
        book_id: i32,
        tariff: Tariff,
        through: NaiveDate,
    ) -> StoreResult<Decimal> {
        let mut tx = self.pool.begin().await?;

        let loan = sqlx::query_as::<_, ActiveLoan>(
            "SELECT * FROM active_loans WHERE user_id = $1 AND book_id = $2 FOR UPDATE",
        )
        .bind(user_id)
        .bind(book_id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(loan) = loan else {
            return Ok(Decimal::ZERO);
        };

        let charge = tariff.charge(&loan, through);
        if charge <= Decimal::ZERO {
            return Ok(Decimal::ZERO);
        }

        sqlx::query("UPDATE active_loans SET charged_through = $3 WHERE user_id = $1 AND book_id = $2")
            .bind(user_id)
            .bind(book_id)
            .bind(through)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE users SET due_charges = due_charges + $2, updated_at = NOW() WHERE id = $1")
            .bind(user_id)
            .bind(charge)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(charge)
    }

    async fn reserve_payment(
        &self,
        user_id: i32,
        amount: Decimal,
        request_key: &str,
    ) -> Result<i64, CirculationError> {
        let mut tx = self.pool.begin().await?;

        let balance: Decimal = sqlx::query_scalar(
            "SELECT due_charges FROM users WHERE id = $1 AND deleted_at IS NULL FOR UPDATE",
        )
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(CirculationError::UserNotFound(user_id))?;

        let existing: Option<(i64, Decimal, String)> = sqlx::query_as(
            "SELECT id, amount, status FROM payments WHERE user_id = $1 AND request_key = $2",
        )
        .bind(user_id)
        .bind(request_key)
        .fetch_optional(&mut *tx)
        .await?;
        if let Some((id, reserved, status)) = existing {
            return if status == "pending" && reserved == amount {
                Ok(id)
            } else {
                Err(CirculationError::DuplicatePayment(id))
            };
        }

        let pending: Decimal = sqlx::query_scalar(
            "SELECT COALESCE(SUM(amount), 0) FROM payments WHERE user_id = $1 AND status = 'pending'",
        )
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;
        let available = balance - pending;
        if amount > available {
            return Err(CirculationError::ExceedsDueCharges { amount, available });
        }

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO payments (user_id, amount, status, request_key)
            VALUES ($1, $2, 'pending', $3)
            RETURNING id
            "#,
        )
        .bind(user_id)
        .bind(amount)
        .bind(request_key)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(id)
    }

    async fn apply_payment(
        &self,
        user_id: i32,
        amount: Decimal,
        confirmation_id: &str,
        reservation: Option<i64>,
    ) -> StoreResult<Option<Decimal>> {
        let mut tx = self.pool.begin().await?;

        let balance: Option<Decimal> = sqlx::query_scalar(
            r#"
            UPDATE users SET due_charges = due_charges - $2, updated_at = NOW()
            WHERE id = $1
            RETURNING due_charges
            "#,
        )
        .bind(user_id)
        .bind(amount)
        .fetch_optional(&mut *tx)
        .await?;
        if balance.is_none() {
            return Ok(None);
        }

        match reservation {
            Some(id) => {
                let settled = sqlx::query(
                    r#"
                    UPDATE payments SET status = 'settled', confirmation_id = $3, settled_at = NOW()
                    WHERE id = $1 AND user_id = $2 AND status = 'pending'
                    "#,
                )
                .bind(id)
                .bind(user_id)
                .bind(confirmation_id)
                .execute(&mut *tx)
                .await?;
                if settled.rows_affected() != 1 {
                    return Err(sqlx::Error::RowNotFound);
                }
            }
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO payments (user_id, amount, status, confirmation_id, settled_at)
                    VALUES ($1, $2, 'settled', $3, NOW())
                    "#,
                )
                .bind(user_id)
                .bind(amount)
                .bind(confirmation_id)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(balance)
    }

    async fn release_payment(&self, reservation: i64) -> StoreResult<()> {
        sqlx::query("DELETE FROM payments WHERE id = $1 AND status = 'pending'")
            .bind(reservation)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
