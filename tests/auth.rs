//! Authentication tests
//!
//! Covers signup, login, token refresh/revocation, and the current-user
//! endpoint.

mod common;

use axum::http::StatusCode;
use common::{app, DEFAULT_PASSWORD};
use serde_json::json;

// ===========================================================================
// Signup
// ===========================================================================

#[tokio::test]
async fn signup_valid() {
    let app = app().await;

    let resp = app
        .post_json(
            "/auth/signup",
            json!({
                "email": "signup_valid@example.com",
                "name": "Signup Valid",
                "password": DEFAULT_PASSWORD
            }),
            None,
        )
        .await;

    assert_eq!(resp.status, StatusCode::OK);
    let body = resp.json();
    assert!(body["id"].is_string());
    assert_eq!(body["email"].as_str().unwrap(), "signup_valid@example.com");
    assert_eq!(body["name"].as_str().unwrap(), "Signup Valid");
    assert!(body["password_hash"].is_null());
}

#[tokio::test]
async fn signup_rejects_bad_email() {
    let app = app().await;

    let resp = app
        .post_json(
            "/auth/signup",
            json!({ "email": "not-an-email", "name": "X", "password": DEFAULT_PASSWORD }),
            None,
        )
        .await;

    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    assert_eq!(resp.error_message(), "a valid email is required");
}

#[tokio::test]
async fn signup_rejects_short_password() {
    let app = app().await;

    let resp = app
        .post_json(
            "/auth/signup",
            json!({ "email": "shortpw@example.com", "name": "X", "password": "short" }),
            None,
        )
        .await;

    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    assert_eq!(resp.error_message(), "password must be at least 8 characters");
}

#[tokio::test]
async fn signup_duplicate_email_conflicts() {
    let app = app().await;
    let user = app.create_user("dup_email").await;

    let resp = app
        .post_json(
            "/auth/signup",
            json!({ "email": user.email, "name": "Other", "password": DEFAULT_PASSWORD }),
            None,
        )
        .await;

    assert_eq!(resp.status, StatusCode::CONFLICT);
    assert_eq!(resp.error_message(), "email already registered");
}

// ===========================================================================
// Login
// ===========================================================================

#[tokio::test]
async fn login_valid() {
    let app = app().await;
    let user = app.create_user("login_valid").await;

    let resp = app
        .post_json(
            "/auth/login",
            json!({ "email": user.email, "password": DEFAULT_PASSWORD }),
            None,
        )
        .await;

    assert_eq!(resp.status, StatusCode::OK);
    let body = resp.json();
    assert!(body["access_token"].is_string());
    assert!(body["refresh_token"].is_string());
}

#[tokio::test]
async fn login_wrong_password() {
    let app = app().await;
    let user = app.create_user("login_wrongpw").await;

    let resp = app
        .post_json(
            "/auth/login",
            json!({ "email": user.email, "password": "wrong-password" }),
            None,
        )
        .await;

    assert_eq!(resp.status, StatusCode::UNAUTHORIZED);
    assert_eq!(resp.error_message(), "invalid credentials");
}

#[tokio::test]
async fn login_unknown_email() {
    let app = app().await;

    let resp = app
        .post_json(
            "/auth/login",
            json!({ "email": "nobody@example.com", "password": DEFAULT_PASSWORD }),
            None,
        )
        .await;

    assert_eq!(resp.status, StatusCode::UNAUTHORIZED);
}

// ===========================================================================
// Refresh / revoke
// ===========================================================================

#[tokio::test]
async fn refresh_rotates_token() {
    let app = app().await;
    let user = app.create_user("refresh_rotate").await;

    let resp = app
        .post_json(
            "/auth/refresh",
            json!({ "refresh_token": user.refresh_token }),
            None,
        )
        .await;

    assert_eq!(resp.status, StatusCode::OK);
    let body = resp.json();
    assert!(body["access_token"].is_string());
    let new_refresh = body["refresh_token"].as_str().unwrap().to_string();
    assert_ne!(new_refresh, user.refresh_token);

    // Old refresh token is revoked by rotation.
    let resp = app
        .post_json(
            "/auth/refresh",
            json!({ "refresh_token": user.refresh_token }),
            None,
        )
        .await;
    assert_eq!(resp.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn revoked_token_cannot_refresh() {
    let app = app().await;
    let user = app.create_user("revoke").await;

    let resp = app
        .post_json(
            "/auth/revoke",
            json!({ "refresh_token": user.refresh_token }),
            None,
        )
        .await;
    assert_eq!(resp.status, StatusCode::NO_CONTENT);

    let resp = app
        .post_json(
            "/auth/refresh",
            json!({ "refresh_token": user.refresh_token }),
            None,
        )
        .await;
    assert_eq!(resp.status, StatusCode::UNAUTHORIZED);
}

// ===========================================================================
// Current user
// ===========================================================================

#[tokio::test]
async fn me_returns_current_user() {
    let app = app().await;
    let user = app.create_user("me").await;

    let resp = app.get("/auth/me", Some(&user.access_token)).await;

    assert_eq!(resp.status, StatusCode::OK);
    let body = resp.json();
    assert_eq!(body["id"].as_str().unwrap(), user.id.to_string());
    assert_eq!(body["email"].as_str().unwrap(), user.email);
}

#[tokio::test]
async fn me_requires_auth() {
    let app = app().await;

    let resp = app.get("/auth/me", None).await;

    assert_eq!(resp.status, StatusCode::UNAUTHORIZED);
    assert_eq!(resp.error_message(), "missing Authorization header");
}

#[tokio::test]
async fn garbage_token_rejected() {
    let app = app().await;

    let resp = app.get("/auth/me", Some("not-a-real-token")).await;

    assert_eq!(resp.status, StatusCode::UNAUTHORIZED);
    assert_eq!(resp.error_message(), "invalid token");
}
