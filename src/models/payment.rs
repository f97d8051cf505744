//! Payment cards and settled payments

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use validator::{Validate, ValidationError};

fn validate_positive(value: &Decimal) -> Result<(), ValidationError> {
    if *value > Decimal::ZERO {
        Ok(())
    } else {
        Err(ValidationError::new("positive"))
    }
}

/// Card stored with the payment processor, as known locally
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct PaymentCard {
    pub id: i32,
    pub user_id: i32,
    #[serde(skip_serializing)]
    pub processor_method_id: String,
    pub brand: Option<String>,
    pub last4: Option<String>,
    pub exp_month: Option<i16>,
    pub exp_year: Option<i16>,
    pub created_at: DateTime<Utc>,
}

/// A card payment against due charges
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Payment {
    pub id: i64,
    pub user_id: i32,
    pub amount: Decimal,
    /// `pending` until the balance has been lowered, then `settled`
    pub status: String,
    #[serde(skip_serializing)]
    pub request_key: Option<String>,
    /// Processor charge id, known once the card has been charged
    pub confirmation_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

/// Register a card tokenized client-side by the payment processor
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct AddCard {
    #[validate(length(min = 1, max = 255, message = "Card token is required"))]
    pub card_token: String,
}

/// Pay (part of) the caller's due charges with a stored card
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct PayDues {
    #[validate(custom(function = "validate_positive", message = "Amount must be positive"))]
    pub amount: Decimal,
    pub card_id: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PaymentReceipt {
    pub amount: Decimal,
    pub confirmation_id: String,
    /// Due charges left after the payment
    pub due_charges: Decimal,
}
