use axum::routing::{delete, get, post};
use axum::Router;

use crate::http::handlers;
use crate::AppState;

pub fn health() -> Router<AppState> {
    Router::new().route("/health", get(handlers::health))
}

pub fn auth() -> Router<AppState> {
    Router::new()
        .route("/auth/signup", post(handlers::signup))
        .route("/auth/login", post(handlers::login))
        .route("/auth/refresh", post(handlers::refresh_token))
        .route("/auth/revoke", post(handlers::revoke_token))
        .route("/auth/me", get(handlers::get_current_user))
}

pub fn users() -> Router<AppState> {
    Router::new()
        .route(
            "/users/:id",
            get(handlers::get_user).patch(handlers::update_profile),
        )
        .route("/users/:id/posts", get(handlers::list_user_posts))
}

pub fn posts() -> Router<AppState> {
    Router::new()
        .route("/posts", post(handlers::create_post).get(handlers::list_posts))
        .route(
            "/posts/:id",
            get(handlers::get_post)
                .patch(handlers::update_post)
                .delete(handlers::delete_post),
        )
        .route(
            "/posts/:id/like",
            post(handlers::like_post).delete(handlers::unlike_post),
        )
        .route("/posts/:id/stats", get(handlers::post_stats))
        .route(
            "/posts/:id/comments",
            post(handlers::comment_post).get(handlers::list_post_comments),
        )
        .route(
            "/posts/:id/comments/:comment_id",
            delete(handlers::delete_comment),
        )
}

pub fn feed() -> Router<AppState> {
    Router::new().route("/feed", get(handlers::feed))
}
