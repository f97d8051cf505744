//! Libris library circulation server
//!
//! REST JSON API for a lending library: catalog, users, issuing and
//! returning books, late charges with a daily accrual sweep, reviews, and
//! payment of due charges through an external card processor.

use std::sync::Arc;

use sqlx::{Pool, Postgres};

pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod repository;
pub mod services;

pub use config::AppConfig;
pub use error::{AppError, AppResult};

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub services: Arc<services::Services>,
    pub pool: Pool<Postgres>,
}
