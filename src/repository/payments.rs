//! Payment cards and payment records

use sqlx::{Pool, Postgres};

use crate::{
    error::{AppError, AppResult},
    models::payment::{Payment, PaymentCard},
    services::payments::CardDetails,
};

#[derive(Clone)]
pub struct PaymentsRepository {
    pool: Pool<Postgres>,
}

impl PaymentsRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    pub async fn list_cards(&self, user_id: i32) -> AppResult<Vec<PaymentCard>> {
        let cards = sqlx::query_as::<_, PaymentCard>(
            "SELECT * FROM payment_cards WHERE user_id = $1 ORDER BY created_at",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(cards)
    }

    /// Get a card owned by the user
    pub async fn get_card(&self, user_id: i32, card_id: i32) -> AppResult<PaymentCard> {
        sqlx::query_as::<_, PaymentCard>(
            "SELECT * FROM payment_cards WHERE id = $1 AND user_id = $2",
        )
        .bind(card_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Card with id {} not found", card_id)))
    }

    pub async fn insert_card(&self, user_id: i32, card: &CardDetails) -> AppResult<PaymentCard> {
        let saved = sqlx::query_as::<_, PaymentCard>(
            r#"
            INSERT INTO payment_cards (user_id, processor_method_id, brand, last4, exp_month, exp_year)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(&card.method_id)
        .bind(&card.brand)
        .bind(&card.last4)
        .bind(card.exp_month)
        .bind(card.exp_year)
        .fetch_one(&self.pool)
        .await?;
        Ok(saved)
    }

    pub async fn delete_card(&self, card_id: i32) -> AppResult<()> {
        sqlx::query("DELETE FROM payment_cards WHERE id = $1")
            .bind(card_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn list_payments(&self, user_id: i32) -> AppResult<Vec<Payment>> {
        let payments = sqlx::query_as::<_, Payment>(
            "SELECT * FROM payments WHERE user_id = $1 AND status = 'settled' ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(payments)
    }
}
