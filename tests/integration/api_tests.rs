//! API integration tests
//!
//! Need a running server with a bootstrap admin configured
//! (`LIBRIS_AUTH__BOOTSTRAP_ADMIN_EMAIL` / `LIBRIS_AUTH__BOOTSTRAP_ADMIN_PASSWORD`).

use reqwest::Client;
use serde_json::{json, Value};
use uuid::Uuid;

const BASE_URL: &str = "http://localhost:8080/api/v1";

fn admin_credentials() -> (String, String) {
    (
        std::env::var("LIBRIS_TEST_ADMIN_EMAIL").unwrap_or_else(|_| "admin@libris.local".into()),
        std::env::var("LIBRIS_TEST_ADMIN_PASSWORD").unwrap_or_else(|_| "change-me-please".into()),
    )
}

/// Decimals are serialized as strings
fn amount(value: &Value) -> f64 {
    match value {
        Value::String(s) => s.parse().expect("Not a decimal"),
        other => other.as_f64().expect("Not a number"),
    }
}

async fn login(client: &Client, email: &str, password: &str) -> Value {
    let response = client
        .post(format!("{}/auth/login", BASE_URL))
        .json(&json!({ "email": email, "password": password }))
        .send()
        .await
        .expect("Failed to send login request");

    assert!(response.status().is_success(), "login failed: {}", response.status());
    response.json().await.expect("Failed to parse login response")
}

/// Helper to get an admin token
async fn get_admin_token(client: &Client) -> String {
    let (email, password) = admin_credentials();
    let body = login(client, &email, &password).await;
    body["token"].as_str().expect("No token in response").to_string()
}

/// Registers a fresh member and returns (token, user id)
async fn register_member(client: &Client) -> (String, i64) {
    let email = format!("member-{}@example.com", Uuid::new_v4());
    let response = client
        .post(format!("{}/auth/register", BASE_URL))
        .json(&json!({
            "email": email,
            "password": "member-password",
            "firstname": "Test",
            "lastname": "Member"
        }))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), 201);
    let body: Value = response.json().await.expect("Failed to parse response");
    (
        body["token"].as_str().expect("No token").to_string(),
        body["user"]["id"].as_i64().expect("No user id"),
    )
}

async fn create_book(client: &Client, token: &str, quantity: i32) -> i64 {
    let response = client
        .post(format!("{}/books", BASE_URL))
        .bearer_auth(token)
        .json(&json!({
            "name": format!("Integration Book {}", Uuid::new_v4()),
            "author": "Test Author",
            "daily_rate": "10.00",
            "quantity_available": quantity,
            "subscription_days": 14
        }))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), 201);
    let body: Value = response.json().await.expect("Failed to parse response");
    body["id"].as_i64().expect("No book id")
}

#[tokio::test]
#[ignore] // Run with: cargo test -- --ignored
async fn test_health_check() {
    let client = Client::new();

    let response = client
        .get(format!("{}/health", BASE_URL))
        .send()
        .await
        .expect("Failed to send request");

    assert!(response.status().is_success());

    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
#[ignore]
async fn test_readiness_check() {
    let client = Client::new();

    let response = client
        .get(format!("{}/ready", BASE_URL))
        .send()
        .await
        .expect("Failed to send request");

    assert!(response.status().is_success());
}

#[tokio::test]
#[ignore]
async fn test_login() {
    let client = Client::new();
    let (email, password) = admin_credentials();

    let body = login(&client, &email, &password).await;
    assert!(body["token"].is_string());
    assert_eq!(body["token_type"], "Bearer");
    assert_eq!(body["user"]["role"], "admin");
}

#[tokio::test]
#[ignore]
async fn test_login_invalid_credentials() {
    let client = Client::new();
    let (email, _) = admin_credentials();

    let response = client
        .post(format!("{}/auth/login", BASE_URL))
        .json(&json!({ "email": email, "password": "wrong-password" }))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), 401);
}

#[tokio::test]
#[ignore]
async fn test_register_and_me() {
    let client = Client::new();
    let (token, user_id) = register_member(&client).await;

    let response = client
        .get(format!("{}/auth/me", BASE_URL))
        .bearer_auth(&token)
        .send()
        .await
        .expect("Failed to send request");

    assert!(response.status().is_success());
    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["id"].as_i64(), Some(user_id));
    assert_eq!(body["role"], "user");
    assert_eq!(amount(&body["due_charges"]), 0.0);
}

#[tokio::test]
#[ignore]
async fn test_unauthorized_access() {
    let client = Client::new();

    let response = client
        .post(format!("{}/loans/issue", BASE_URL))
        .json(&json!({ "book_id": 1 }))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), 401);
}

#[tokio::test]
#[ignore]
async fn test_member_cannot_create_book() {
    let client = Client::new();
    let (token, _) = register_member(&client).await;

    let response = client
        .post(format!("{}/books", BASE_URL))
        .bearer_auth(&token)
        .json(&json!({ "name": "Nope", "daily_rate": "1.00", "quantity_available": 1 }))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), 403);
}

#[tokio::test]
#[ignore]
async fn test_list_books() {
    let client = Client::new();

    let response = client
        .get(format!("{}/books?per_page=5", BASE_URL))
        .send()
        .await
        .expect("Failed to send request");

    assert!(response.status().is_success());

    let body: Value = response.json().await.expect("Failed to parse response");
    assert!(body["items"].is_array());
    assert!(body["total"].is_number());
}

#[tokio::test]
#[ignore]
async fn test_issue_and_return_flow() {
    let client = Client::new();
    let admin = get_admin_token(&client).await;
    let book_id = create_book(&client, &admin, 2).await;
    let (member, user_id) = register_member(&client).await;

    let response = client
        .post(format!("{}/loans/issue", BASE_URL))
        .bearer_auth(&member)
        .json(&json!({ "book_id": book_id }))
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), 201);

    let book: Value = client
        .get(format!("{}/books/{}", BASE_URL, book_id))
        .send()
        .await
        .expect("Failed to send request")
        .json()
        .await
        .expect("Failed to parse response");
    assert_eq!(book["quantity_available"], 1);

    // Same book twice
    let response = client
        .post(format!("{}/loans/issue", BASE_URL))
        .bearer_auth(&member)
        .json(&json!({ "book_id": book_id }))
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), 409);

    let loans: Value = client
        .get(format!("{}/users/{}/loans", BASE_URL, user_id))
        .bearer_auth(&member)
        .send()
        .await
        .expect("Failed to send request")
        .json()
        .await
        .expect("Failed to parse response");
    assert_eq!(loans.as_array().map(Vec::len), Some(1));

    let response = client
        .post(format!("{}/loans/return", BASE_URL))
        .bearer_auth(&member)
        .json(&json!({ "book_id": book_id }))
        .send()
        .await
        .expect("Failed to send request");
    assert!(response.status().is_success());
    let outcome: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(amount(&outcome["charge"]), 0.0);

    let history: Value = client
        .get(format!("{}/users/{}/history", BASE_URL, user_id))
        .bearer_auth(&member)
        .send()
        .await
        .expect("Failed to send request")
        .json()
        .await
        .expect("Failed to parse response");
    assert!(history[0]["return_date"].is_string());
}

#[tokio::test]
#[ignore]
async fn test_return_without_loan() {
    let client = Client::new();
    let admin = get_admin_token(&client).await;
    let book_id = create_book(&client, &admin, 1).await;
    let (member, _) = register_member(&client).await;

    let response = client
        .post(format!("{}/loans/return", BASE_URL))
        .bearer_auth(&member)
        .json(&json!({ "book_id": book_id }))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), 404);
}

#[tokio::test]
#[ignore]
async fn test_replayed_idempotency_key() {
    let client = Client::new();
    let admin = get_admin_token(&client).await;
    let book_id = create_book(&client, &admin, 3).await;
    let (member, _) = register_member(&client).await;
    let key = Uuid::new_v4().to_string();

    let first = client
        .post(format!("{}/loans/issue", BASE_URL))
        .bearer_auth(&member)
        .header("Idempotency-Key", &key)
        .json(&json!({ "book_id": book_id }))
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(first.status(), 201);

    let replay = client
        .post(format!("{}/loans/issue", BASE_URL))
        .bearer_auth(&member)
        .header("Idempotency-Key", &key)
        .json(&json!({ "book_id": book_id }))
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(replay.status(), 409);

    let body: Value = replay.json().await.expect("Failed to parse response");
    assert_eq!(body["error"], "DuplicateRequest");
}

#[tokio::test]
#[ignore]
async fn test_accrual_run_requires_admin() {
    let client = Client::new();
    let (member, _) = register_member(&client).await;

    let response = client
        .post(format!("{}/admin/accrual/run", BASE_URL))
        .bearer_auth(&member)
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), 403);

    let admin = get_admin_token(&client).await;
    let response = client
        .post(format!("{}/admin/accrual/run", BASE_URL))
        .bearer_auth(&admin)
        .send()
        .await
        .expect("Failed to send request");
    assert!(response.status().is_success());

    let report: Value = response.json().await.expect("Failed to parse response");
    assert!(report["scanned"].is_number());
}
