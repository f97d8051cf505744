//! Business logic services

pub mod catalog;
pub mod circulation;
pub mod email;
pub mod payments;
pub mod redis;
pub mod reviews;
pub mod users;

use std::sync::Arc;

use crate::{config::AppConfig, repository::Repository};

use circulation::{accrual::AccrualJob, CatalogStore, CirculationService, Clock, LedgerStore, SystemClock};
use payments::PaymentProcessor;

/// Container for all services
#[derive(Clone)]
pub struct Services {
    pub users: users::UsersService,
    pub catalog: catalog::CatalogService,
    pub circulation: CirculationService,
    pub accrual: AccrualJob,
    pub reviews: reviews::ReviewsService,
    pub payments: payments::PaymentsService,
    pub email: email::EmailService,
    pub redis: redis::RedisService,
}

impl Services {
    /// Create all services with the given repository
    pub fn new(
        repository: Repository,
        config: &AppConfig,
        redis_service: redis::RedisService,
        processor: Arc<dyn PaymentProcessor>,
    ) -> Self {
        let catalog_store: Arc<dyn CatalogStore> = Arc::new(repository.books.clone());
        let ledger: Arc<dyn LedgerStore> = Arc::new(repository.loans.clone());
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let email = email::EmailService::new(config.email.clone());

        Self {
            users: users::UsersService::new(repository.clone(), config.auth.clone()),
            catalog: catalog::CatalogService::new(repository.clone()),
            circulation: CirculationService::new(
                catalog_store.clone(),
                ledger.clone(),
                clock.clone(),
                config.circulation.clone(),
            ),
            accrual: AccrualJob::new(catalog_store, ledger.clone(), clock),
            reviews: reviews::ReviewsService::new(repository.clone()),
            payments: payments::PaymentsService::new(
                repository,
                ledger,
                processor,
                config.payments.minor_units,
                email.clone(),
            ),
            email,
            redis: redis_service,
        }
    }
}
