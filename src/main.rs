//! Libris Server - library circulation and dues
//!
//! REST API server for lending, late charges and payments.

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use libris_server::{
    api,
    config::{AppConfig, LoggingConfig},
    repository::Repository,
    services::{circulation::accrual, payments::StripeProcessor, redis::RedisService, Services},
    AppState,
};

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("libris_server={},tower_http=debug", logging.level).into());

    let registry = tracing_subscriber::registry().with(filter);
    if logging.format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let config = AppConfig::load()?;
    init_tracing(&config.logging);

    tracing::info!("Starting Libris Server v{}", env!("CARGO_PKG_VERSION"));

    // Create database connection pool
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .connect(&config.database.url)
        .await?;

    tracing::info!("Connected to database");

    sqlx::migrate!("./migrations").run(&pool).await?;

    tracing::info!("Database migrations completed");

    let redis_service =
        RedisService::new(&config.redis.url, config.redis.idempotency_ttl_seconds).await?;

    tracing::info!("Connected to Redis");

    let processor = Arc::new(StripeProcessor::new(config.payments.clone())?);
    let repository = Repository::new(pool.clone());
    let services = Services::new(repository, &config, redis_service, processor);
    services.users.ensure_admin().await?;

    if config.accrual.enabled {
        let period = Duration::from_secs(config.accrual.interval_hours.max(1) * 3600);
        accrual::spawn(services.accrual.clone(), period);
        tracing::info!("Accrual sweep scheduled every {} hours", config.accrual.interval_hours.max(1));
    }

    let addr = SocketAddr::new(config.server.host.parse()?, config.server.port);

    // Create application state
    let state = AppState {
        config: Arc::new(config),
        services: Arc::new(services),
        pool,
    };

    let app = create_router(state);

    tracing::info!("Server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Create the application router with all routes
fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // API v1 routes
    let api_v1 = Router::new()
        // Health check
        .route("/health", get(api::health::health_check))
        .route("/ready", get(api::health::readiness_check))
        // Authentication
        .route("/auth/register", post(api::auth::register))
        .route("/auth/login", post(api::auth::login))
        .route("/auth/me", get(api::auth::me))
        .route("/auth/profile", put(api::auth::update_profile))
        // Books
        .route("/books", get(api::books::list_books).post(api::books::create_book))
        .route(
            "/books/:id",
            get(api::books::get_book)
                .put(api::books::update_book)
                .delete(api::books::delete_book),
        )
        .route("/books/:id/history", get(api::books::book_history))
        .route(
            "/books/:id/reviews",
            get(api::reviews::list_reviews).put(api::reviews::upsert_review),
        )
        .route("/reviews/:id", delete(api::reviews::delete_review))
        // Users
        .route("/users", get(api::users::list_users).post(api::users::create_user))
        .route("/users/:id", get(api::users::get_user).delete(api::users::delete_user))
        .route("/users/:id/role", put(api::users::update_role))
        .route("/users/:id/loans", get(api::loans::get_user_loans))
        .route("/users/:id/history", get(api::loans::get_user_history))
        // Loans
        .route("/loans/issue", post(api::loans::issue_book))
        .route("/loans/return", post(api::loans::return_book))
        // Payments
        .route("/payments", get(api::payments::list_payments))
        .route("/payments/cards", get(api::payments::list_cards).post(api::payments::add_card))
        .route("/payments/cards/:id", delete(api::payments::remove_card))
        .route("/payments/dues", post(api::payments::pay_dues))
        // Admin
        .route("/admin/accrual/run", post(api::admin::run_accrual))
        .with_state(state);

    // OpenAPI documentation
    let openapi = api::openapi::create_openapi_router();

    Router::new()
        .nest("/api/v1", api_v1)
        .merge(openapi)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
