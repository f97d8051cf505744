//! External payment processor client

use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::{prelude::ToPrimitive, Decimal};
use serde::Deserialize;
use thiserror::Error;

use crate::config::PaymentsConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargeStatus {
    Succeeded,
    RequiresConfirmation,
    Processing,
    Failed,
}

impl ChargeStatus {
    fn parse(status: &str) -> Self {
        match status {
            "succeeded" => Self::Succeeded,
            "requires_confirmation" => Self::RequiresConfirmation,
            "processing" => Self::Processing,
            _ => Self::Failed,
        }
    }
}

/// What the processor reported for a charge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeOutcome {
    pub status: ChargeStatus,
    pub confirmation_id: String,
}

/// Card attached to a customer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardDetails {
    pub method_id: String,
    pub brand: Option<String>,
    pub last4: Option<String>,
    pub exp_month: Option<i16>,
    pub exp_year: Option<i16>,
}

#[derive(Error, Debug)]
pub enum ProcessorError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Rejected by processor: {0}")]
    Rejected(String),
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    /// Returns the processor's customer id
    async fn create_customer(&self, email: &str) -> Result<String, ProcessorError>;

    async fn attach_card(&self, customer_id: &str, card_token: &str) -> Result<CardDetails, ProcessorError>;

    async fn detach_card(&self, method_id: &str) -> Result<(), ProcessorError>;

    /// `amount` is in major currency units. Calls sharing
    /// `idempotency_key` return the same charge.
    async fn create_charge(
        &self,
        amount: Decimal,
        method_id: &str,
        customer_id: &str,
        idempotency_key: &str,
    ) -> Result<ChargeOutcome, ProcessorError>;

    async fn confirm(&self, confirmation_id: &str) -> Result<ChargeStatus, ProcessorError>;
}

#[derive(Deserialize)]
struct IdResponse {
    id: String,
}

#[derive(Deserialize)]
struct IntentResponse {
    id: String,
    status: String,
}

#[derive(Deserialize)]
struct CardResponse {
    brand: Option<String>,
    last4: Option<String>,
    exp_month: Option<i16>,
    exp_year: Option<i16>,
}

#[derive(Deserialize)]
struct MethodResponse {
    id: String,
    card: Option<CardResponse>,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    error: ApiError,
}

#[derive(Deserialize)]
struct ApiError {
    message: Option<String>,
}

/// Client for a Stripe-compatible REST API
#[derive(Clone)]
pub struct StripeProcessor {
    client: reqwest::Client,
    config: PaymentsConfig,
}

impl StripeProcessor {
    pub fn new(config: PaymentsConfig) -> Result<Self, ProcessorError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.config.api_base.trim_end_matches('/'), path)
    }

    /// Amount in the currency's smallest unit, which must be exact
    fn minor_units(&self, amount: Decimal) -> Result<i64, ProcessorError> {
        let minor = amount * Decimal::from(self.config.minor_units);
        if !minor.fract().is_zero() {
            return Err(ProcessorError::Rejected(format!(
                "Amount {} is finer than the currency allows",
                amount
            )));
        }
        minor
            .to_i64()
            .ok_or_else(|| ProcessorError::Rejected(format!("Amount out of range: {}", amount)))
    }

    async fn post<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        form: &[(&str, String)],
        idempotency_key: Option<String>,
    ) -> Result<T, ProcessorError> {
        let mut request = self
            .client
            .post(self.url(path))
            .bearer_auth(&self.config.secret_key)
            .form(form);
        if let Some(key) = idempotency_key {
            request = request.header("Idempotency-Key", key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let message = response
                .json::<ApiErrorBody>()
                .await
                .ok()
                .and_then(|body| body.error.message)
                .unwrap_or_else(|| status.to_string());
            return Err(ProcessorError::Rejected(message));
        }
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl PaymentProcessor for StripeProcessor {
    async fn create_customer(&self, email: &str) -> Result<String, ProcessorError> {
        let customer: IdResponse = self
            .post("customers", &[("email", email.to_string())], None)
            .await?;
        Ok(customer.id)
    }

    async fn attach_card(&self, customer_id: &str, card_token: &str) -> Result<CardDetails, ProcessorError> {
        let method: MethodResponse = self
            .post(
                &format!("payment_methods/{}/attach", card_token),
                &[("customer", customer_id.to_string())],
                None,
            )
            .await?;
        let card = method.card.unwrap_or(CardResponse {
            brand: None,
            last4: None,
            exp_month: None,
            exp_year: None,
        });
        Ok(CardDetails {
            method_id: method.id,
            brand: card.brand,
            last4: card.last4,
            exp_month: card.exp_month,
            exp_year: card.exp_year,
        })
    }

    async fn detach_card(&self, method_id: &str) -> Result<(), ProcessorError> {
        let _: IdResponse = self
            .post(&format!("payment_methods/{}/detach", method_id), &[], None)
            .await?;
        Ok(())
    }

    async fn create_charge(
        &self,
        amount: Decimal,
        method_id: &str,
        customer_id: &str,
        idempotency_key: &str,
    ) -> Result<ChargeOutcome, ProcessorError> {
        let form = [
            ("amount", self.minor_units(amount)?.to_string()),
            ("currency", self.config.currency.clone()),
            ("customer", customer_id.to_string()),
            ("payment_method", method_id.to_string()),
            ("off_session", "true".to_string()),
            ("confirm", "true".to_string()),
        ];
        let intent: IntentResponse = self
            .post("payment_intents", &form, Some(idempotency_key.to_string()))
            .await?;
        tracing::debug!("Payment intent {} is {}", intent.id, intent.status);
        Ok(ChargeOutcome {
            status: ChargeStatus::parse(&intent.status),
            confirmation_id: intent.id,
        })
    }

    async fn confirm(&self, confirmation_id: &str) -> Result<ChargeStatus, ProcessorError> {
        let intent: IntentResponse = self
            .post(&format!("payment_intents/{}/confirm", confirmation_id), &[], None)
            .await?;
        Ok(ChargeStatus::parse(&intent.status))
    }
}
