//! Book (catalog entry) model and related types

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::{IntoParams, ToSchema};
use validator::{Validate, ValidationError};

/// ISBN-10 or ISBN-13, hyphens allowed
static ISBN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:97[89]-?)?(?:\d-?){9}[\dXx]$").expect("valid ISBN pattern"));

fn validate_isbn(isbn: &str) -> Result<(), ValidationError> {
    if ISBN_RE.is_match(isbn) {
        Ok(())
    } else {
        Err(ValidationError::new("isbn"))
    }
}

fn validate_non_negative(value: &Decimal) -> Result<(), ValidationError> {
    if value.is_sign_negative() {
        Err(ValidationError::new("non_negative"))
    } else {
        Ok(())
    }
}

/// Book model from database
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Book {
    pub id: i32,
    pub name: String,
    pub author: Option<String>,
    pub isbn: Option<String>,
    pub description: Option<String>,
    /// Late charge per overdue day
    pub daily_rate: Decimal,
    pub quantity_available: i32,
    /// Days a borrower may keep the book before late charges start
    pub subscription_days: Option<i32>,
    pub issue_count: i32,
    pub submit_count: i32,
    pub average_rating: Option<f64>,
    pub rating_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Book {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Book query parameters
#[derive(Debug, Deserialize, IntoParams, ToSchema)]
pub struct BookQuery {
    /// Search in name
    pub name: Option<String>,
    /// Search by author
    pub author: Option<String>,
    pub isbn: Option<String>,
    /// Only books with at least one copy on the shelf
    pub available: Option<bool>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

/// Create book request
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateBook {
    #[validate(length(min = 1, max = 255, message = "Name must be 1-255 characters"))]
    pub name: String,
    #[validate(length(max = 255))]
    pub author: Option<String>,
    #[validate(custom(function = "validate_isbn", message = "Invalid ISBN"))]
    pub isbn: Option<String>,
    pub description: Option<String>,
    #[validate(custom(function = "validate_non_negative", message = "Daily rate cannot be negative"))]
    pub daily_rate: Decimal,
    #[validate(range(min = 0, message = "Quantity cannot be negative"))]
    pub quantity_available: i32,
    #[validate(range(min = 0, message = "Subscription days cannot be negative"))]
    pub subscription_days: Option<i32>,
}

/// Update book request; absent fields are left unchanged
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct UpdateBook {
    #[validate(length(min = 1, max = 255, message = "Name must be 1-255 characters"))]
    pub name: Option<String>,
    #[validate(length(max = 255))]
    pub author: Option<String>,
    #[validate(custom(function = "validate_isbn", message = "Invalid ISBN"))]
    pub isbn: Option<String>,
    pub description: Option<String>,
    #[validate(custom(function = "validate_non_negative", message = "Daily rate cannot be negative"))]
    pub daily_rate: Option<Decimal>,
    #[validate(range(min = 0, message = "Quantity cannot be negative"))]
    pub quantity_available: Option<i32>,
    #[validate(range(min = 0, message = "Subscription days cannot be negative"))]
    pub subscription_days: Option<i32>,
}
