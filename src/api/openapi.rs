//! OpenAPI documentation

use axum::Router;
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

use crate::api::{admin, auth, books, health, loans, payments, reviews, users};

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Libris API",
        version = "0.4.0",
        description = "Library circulation and dues REST API",
        license(name = "AGPL-3.0", url = "https://www.gnu.org/licenses/agpl-3.0.html")
    ),
    servers(
        (url = "/api/v1", description = "API v1")
    ),
    paths(
        // Health
        health::health_check,
        health::readiness_check,
        // Auth
        auth::login,
        auth::register,
        auth::me,
        auth::update_profile,
        // Books
        books::list_books,
        books::get_book,
        books::create_book,
        books::update_book,
        books::delete_book,
        books::book_history,
        // Users
        users::list_users,
        users::get_user,
        users::create_user,
        users::update_role,
        users::delete_user,
        // Loans
        loans::issue_book,
        loans::return_book,
        loans::get_user_loans,
        loans::get_user_history,
        // Reviews
        reviews::list_reviews,
        reviews::upsert_review,
        reviews::delete_review,
        // Payments
        payments::list_cards,
        payments::add_card,
        payments::remove_card,
        payments::pay_dues,
        payments::list_payments,
        // Admin
        admin::run_accrual,
    ),
    components(
        schemas(
            // Auth
            auth::LoginRequest,
            auth::LoginResponse,
            auth::UserInfo,
            // Books
            crate::models::book::Book,
            crate::models::book::BookQuery,
            crate::models::book::CreateBook,
            crate::models::book::UpdateBook,
            crate::api::BookPage,
            // Users
            crate::models::user::Role,
            crate::models::user::User,
            crate::models::user::UserShort,
            crate::models::user::UserQuery,
            crate::models::user::RegisterUser,
            crate::models::user::CreateUser,
            crate::models::user::UpdateProfile,
            crate::models::user::UpdateRole,
            crate::api::UserPage,
            // Loans
            crate::models::loan::ActiveLoan,
            crate::models::loan::HistoryEntry,
            crate::models::loan::LoanDetails,
            crate::models::loan::IssueBook,
            crate::models::loan::ReturnBook,
            crate::models::loan::ReturnOutcome,
            // Reviews
            crate::models::review::Review,
            crate::models::review::UpsertReview,
            crate::models::review::RatingSummary,
            reviews::ReviewResponse,
            // Payments
            crate::models::payment::PaymentCard,
            crate::models::payment::Payment,
            crate::models::payment::AddCard,
            crate::models::payment::PayDues,
            crate::models::payment::PaymentReceipt,
            // Admin
            crate::services::circulation::accrual::AccrualReport,
            // Health
            health::HealthResponse,
            // Errors
            crate::error::ErrorResponse,
        )
    ),
    modifiers(&BearerAuth),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "auth", description = "Authentication endpoints"),
        (name = "books", description = "Catalog management"),
        (name = "users", description = "User management"),
        (name = "loans", description = "Issuing and returning books"),
        (name = "reviews", description = "Ratings and reviews"),
        (name = "payments", description = "Cards and due charges"),
        (name = "admin", description = "Administration")
    )
)]
pub struct ApiDoc;

/// Create the OpenAPI documentation router
pub fn create_openapi_router() -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
}
