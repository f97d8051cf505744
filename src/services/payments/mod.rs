//! Payment cards and settlement of due charges

pub mod processor;

use std::sync::Arc;

use rust_decimal::Decimal;
use validator::Validate;

use crate::{
    error::{AppError, AppResult, ErrorCode},
    models::payment::{AddCard, PayDues, Payment, PaymentCard, PaymentReceipt},
    repository::Repository,
    services::{
        circulation::{CirculationError, LedgerStore},
        email::EmailService,
    },
};

pub use processor::{
    CardDetails, ChargeOutcome, ChargeStatus, PaymentProcessor, ProcessorError, StripeProcessor,
};

/// Turns confirmed processor charges into balance decrements
#[derive(Clone)]
pub struct Settlement {
    ledger: Arc<dyn LedgerStore>,
    processor: Arc<dyn PaymentProcessor>,
    minor_units: u32,
}

impl Settlement {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        processor: Arc<dyn PaymentProcessor>,
        minor_units: u32,
    ) -> Self {
        Self {
            ledger,
            processor,
            minor_units,
        }
    }

    /// Amounts must be positive and land on a whole minor unit
    fn check_amount(&self, amount: Decimal) -> Result<(), CirculationError> {
        let minor = amount * Decimal::from(self.minor_units);
        if amount <= Decimal::ZERO || !minor.fract().is_zero() {
            return Err(CirculationError::InvalidAmount(amount));
        }
        Ok(())
    }

    /// Subtract `amount` from the balance once the processor has reported
    /// success. Any other status leaves the balance untouched. The balance
    /// is not clamped and may go negative.
    pub async fn apply_payment(
        &self,
        user_id: i32,
        amount: Decimal,
        confirmation: &ChargeOutcome,
        reservation: Option<i64>,
    ) -> Result<Decimal, CirculationError> {
        if confirmation.status != ChargeStatus::Succeeded {
            return Err(CirculationError::PaymentFailed(format!(
                "charge {} is {:?}",
                confirmation.confirmation_id, confirmation.status
            )));
        }
        self.ledger
            .apply_payment(user_id, amount, &confirmation.confirmation_id, reservation)
            .await?
            .ok_or(CirculationError::UserNotFound(user_id))
    }

    async fn release(&self, user_id: i32, reservation: i64) {
        if let Err(e) = self.ledger.release_payment(reservation).await {
            tracing::warn!(user_id, payment_id = reservation, "Failed to release payment: {}", e);
        }
    }

    /// Charge a stored card and settle the amount.
    ///
    /// The amount is reserved against the balance before the processor is
    /// called. Requests sharing `request_key` resume the same reservation
    /// and reuse its processor idempotency key, so a retried request never
    /// charges twice. Declined charges release the reservation. Charges
    /// with an unknown outcome keep it until a retry settles it.
    pub async fn charge(
        &self,
        user_id: i32,
        amount: Decimal,
        method_id: &str,
        customer_id: &str,
        request_key: &str,
    ) -> Result<PaymentReceipt, CirculationError> {
        self.check_amount(amount)?;
        let reservation = self.ledger.reserve_payment(user_id, amount, request_key).await?;
        let charge_key = format!("dues-{}", reservation);

        let outcome = match self.submit(amount, method_id, customer_id, &charge_key).await {
            Ok(outcome) => outcome,
            Err(ProcessorError::Rejected(message)) => {
                self.release(user_id, reservation).await;
                return Err(CirculationError::PaymentFailed(message));
            }
            Err(e) => {
                tracing::warn!(
                    user_id,
                    payment_id = reservation,
                    "Charge outcome unknown, payment left pending: {}",
                    e
                );
                return Err(CirculationError::PaymentFailed(e.to_string()));
            }
        };

        match outcome.status {
            ChargeStatus::Succeeded => {}
            ChargeStatus::Failed => {
                self.release(user_id, reservation).await;
                return Err(CirculationError::PaymentFailed(format!(
                    "charge {} failed",
                    outcome.confirmation_id
                )));
            }
            status => {
                tracing::warn!(
                    user_id,
                    payment_id = reservation,
                    confirmation_id = %outcome.confirmation_id,
                    "Charge is {:?}, payment left pending",
                    status
                );
                return Err(CirculationError::PaymentFailed(format!(
                    "charge {} is {:?}",
                    outcome.confirmation_id, status
                )));
            }
        }

        let due_charges = match self
            .apply_payment(user_id, amount, &outcome, Some(reservation))
            .await
        {
            Ok(balance) => balance,
            Err(e) => {
                tracing::error!(
                    user_id,
                    amount = %amount,
                    payment_id = reservation,
                    confirmation_id = %outcome.confirmation_id,
                    "Charge succeeded but settling it failed: {}",
                    e
                );
                return Err(CirculationError::SettlementFailed {
                    payment_id: reservation,
                    confirmation_id: outcome.confirmation_id,
                });
            }
        };

        tracing::info!(
            user_id,
            amount = %amount,
            payment_id = reservation,
            confirmation_id = %outcome.confirmation_id,
            "Payment settled"
        );
        Ok(PaymentReceipt {
            amount,
            confirmation_id: outcome.confirmation_id,
            due_charges,
        })
    }

    async fn submit(
        &self,
        amount: Decimal,
        method_id: &str,
        customer_id: &str,
        charge_key: &str,
    ) -> Result<ChargeOutcome, ProcessorError> {
        let mut outcome = self
            .processor
            .create_charge(amount, method_id, customer_id, charge_key)
            .await?;
        if outcome.status == ChargeStatus::RequiresConfirmation {
            outcome.status = self.processor.confirm(&outcome.confirmation_id).await?;
        }
        Ok(outcome)
    }
}

#[derive(Clone)]
pub struct PaymentsService {
    repository: Repository,
    processor: Arc<dyn PaymentProcessor>,
    settlement: Settlement,
    email: EmailService,
}

impl PaymentsService {
    pub fn new(
        repository: Repository,
        ledger: Arc<dyn LedgerStore>,
        processor: Arc<dyn PaymentProcessor>,
        minor_units: u32,
        email: EmailService,
    ) -> Self {
        Self {
            repository,
            settlement: Settlement::new(ledger, processor.clone(), minor_units),
            processor,
            email,
        }
    }

    pub async fn list_cards(&self, user_id: i32) -> AppResult<Vec<PaymentCard>> {
        self.repository.payments.list_cards(user_id).await
    }

    /// Attach a card token to the user's processor customer, creating the
    /// customer on first use
    pub async fn add_card(&self, user_id: i32, card: AddCard) -> AppResult<PaymentCard> {
        card.validate()?;
        let user = self.repository.users.get_by_id(user_id).await?;

        let customer_id = match user.processor_customer_id {
            Some(id) => id,
            None => {
                let id = self.processor.create_customer(&user.email).await?;
                self.repository.users.set_processor_customer(user_id, &id).await?;
                id
            }
        };

        let details = self.processor.attach_card(&customer_id, &card.card_token).await?;
        let card = self.repository.payments.insert_card(user_id, &details).await?;
        tracing::info!(user_id, card_id = card.id, "Payment card added");
        Ok(card)
    }

    pub async fn remove_card(&self, user_id: i32, card_id: i32) -> AppResult<()> {
        let card = self.repository.payments.get_card(user_id, card_id).await?;
        self.processor.detach_card(&card.processor_method_id).await?;
        self.repository.payments.delete_card(card.id).await
    }

    /// Pay off (part of) the user's due charges with a stored card.
    /// Retries must carry the same `request_key` to resume a payment.
    pub async fn pay_dues(
        &self,
        user_id: i32,
        payment: PayDues,
        request_key: &str,
    ) -> AppResult<PaymentReceipt> {
        payment.validate()?;
        let user = self.repository.users.get_by_id(user_id).await?;

        let card = self.repository.payments.get_card(user_id, payment.card_id).await?;
        let customer_id = user.processor_customer_id.ok_or_else(|| {
            AppError::BusinessRule(ErrorCode::PaymentFailure, "No payment customer on file".to_string())
        })?;

        let receipt = self
            .settlement
            .charge(
                user_id,
                payment.amount,
                &card.processor_method_id,
                &customer_id,
                request_key,
            )
            .await?;

        if self.email.is_enabled() {
            let email = self.email.clone();
            let to = user.email.clone();
            let receipt = receipt.clone();
            tokio::spawn(async move {
                if let Err(e) = email.send_payment_receipt(&to, &receipt).await {
                    tracing::warn!("Failed to send payment receipt to {}: {}", to, e);
                }
            });
        }

        Ok(receipt)
    }

    pub async fn list_payments(&self, user_id: i32) -> AppResult<Vec<Payment>> {
        self.repository.payments.list_payments(user_id).await
    }
}
