use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::app::auth::AuthService;
use crate::app::engagement::EngagementService;
use crate::app::posts::PostService;
use crate::app::users::UserService;
use crate::domain::engagement::{Comment, Like, PostStats};
use crate::domain::post::Post;
use crate::domain::user::User;
use crate::feed::reducer::FeedState;
use crate::http::{AppError, AuthUser};
use crate::AppState;

const MAX_PASSWORD_LEN: usize = 128;
const MAX_TITLE_LEN: usize = 200;
const MAX_CONTENT_LEN: usize = 20_000;
const MAX_COMMENT_LEN: usize = 2_000;

#[derive(Serialize)]
pub(crate) struct HealthResponse {
    status: &'static str,
}

#[derive(Deserialize)]
pub struct PaginationQuery {
    pub limit: Option<i64>,
    pub cursor: Option<String>,
}

#[derive(Serialize)]
pub struct ListResponse<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
}

/// Keyset cursor for newest-first listings: the creation timestamp and row
/// id of the last row on the previous page, encoded as `rfc3339/uuid`.
struct Cursor {
    created_at: OffsetDateTime,
    id: Uuid,
}

impl Cursor {
    fn parse(raw: &str) -> Option<Self> {
        let (timestamp, id) = raw.split_once('/')?;
        Some(Self {
            created_at: OffsetDateTime::parse(timestamp, &Rfc3339).ok()?,
            id: Uuid::parse_str(id).ok()?,
        })
    }

    fn encode(&self) -> Option<String> {
        let timestamp = self.created_at.format(&Rfc3339).ok()?;
        Some(format!("{}/{}", timestamp, self.id))
    }
}

fn cursor_from_query(query: &PaginationQuery) -> Result<Option<(OffsetDateTime, Uuid)>, AppError> {
    match &query.cursor {
        None => Ok(None),
        Some(raw) => {
            let cursor =
                Cursor::parse(raw).ok_or_else(|| AppError::bad_request("invalid cursor"))?;
            Ok(Some((cursor.created_at, cursor.id)))
        }
    }
}

/// Trim an over-fetched page (`limit + 1` rows) down to `limit`; the extra
/// row, when present, proves there is a next page and supplies its cursor.
fn into_page<T>(
    mut items: Vec<T>,
    limit: i64,
    cursor_of: impl Fn(&T) -> Cursor,
) -> ListResponse<T> {
    let next_cursor = if items.len() > limit as usize {
        items.pop().and_then(|last| cursor_of(&last).encode())
    } else {
        None
    };

    ListResponse { items, next_cursor }
}

/// True when the error is a Postgres violation of the named constraint kind.
fn violates(err: &anyhow::Error, code: &str, constraint_fragment: &str) -> bool {
    if let Some(sqlx_err) = err.downcast_ref::<sqlx::Error>() {
        if let Some(db_err) = sqlx_err.as_database_error() {
            if db_err.code().as_deref() == Some(code) {
                return db_err
                    .constraint()
                    .unwrap_or_default()
                    .contains(constraint_fragment);
            }
        }
    }
    false
}

pub(crate) async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let db = state.db.ping().await.is_ok();
    let status = if db { "ok" } else { "degraded" };

    Json(HealthResponse { status })
}

// ---------------------------------------------------------------------------
// Auth
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct SignupRequest {
    pub email: String,
    pub name: String,
    pub password: String,
}

pub async fn signup(
    State(state): State<AppState>,
    Json(payload): Json<SignupRequest>,
) -> Result<Json<User>, AppError> {
    let email = payload.email.trim().to_string();
    let name = payload.name.trim().to_string();

    if email.is_empty() || !email.contains('@') {
        return Err(AppError::bad_request("a valid email is required"));
    }
    if name.is_empty() {
        return Err(AppError::bad_request("name cannot be empty"));
    }
    if payload.password.trim().len() < 8 {
        return Err(AppError::bad_request("password must be at least 8 characters"));
    }
    if payload.password.len() > MAX_PASSWORD_LEN {
        return Err(AppError::bad_request("password must be at most 128 characters"));
    }

    let service = auth_service(&state);
    let user = service
        .signup(email, name, payload.password)
        .await
        .map_err(|err| {
            if violates(&err, "23505", "users_email_key") {
                return AppError::conflict("email already registered");
            }
            tracing::error!(error = ?err, "failed to sign up");
            AppError::internal("failed to sign up")
        })?;

    Ok(Json(user))
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct AuthTokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(with = "time::serde::rfc3339")]
    pub access_expires_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub refresh_expires_at: OffsetDateTime,
}

pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<AuthTokenResponse>, AppError> {
    if payload.email.trim().is_empty() || payload.password.trim().is_empty() {
        return Err(AppError::bad_request("email and password are required"));
    }
    if payload.password.len() > MAX_PASSWORD_LEN {
        return Err(AppError::bad_request("password must be at most 128 characters"));
    }

    let service = auth_service(&state);
    let tokens = service
        .login(&payload.email, &payload.password)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, "failed to login");
            AppError::internal("failed to login")
        })?;

    match tokens {
        Some(tokens) => Ok(Json(token_response(tokens))),
        None => Err(AppError::unauthorized("invalid credentials")),
    }
}

#[derive(Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

pub async fn refresh_token(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> Result<Json<AuthTokenResponse>, AppError> {
    let service = auth_service(&state);
    let tokens = service
        .refresh(&payload.refresh_token)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, "failed to refresh token");
            AppError::internal("failed to refresh token")
        })?;

    match tokens {
        Some(tokens) => Ok(Json(token_response(tokens))),
        None => Err(AppError::unauthorized("invalid refresh token")),
    }
}

pub async fn revoke_token(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> Result<StatusCode, AppError> {
    let service = auth_service(&state);
    service
        .revoke_refresh_token(&payload.refresh_token)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, "failed to revoke token");
            AppError::internal("failed to revoke token")
        })?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_current_user(
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<User>, AppError> {
    let service = auth_service(&state);
    let user = service
        .get_current_user(auth.user_id)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, "failed to load current user");
            AppError::internal("failed to load current user")
        })?;

    match user {
        Some(user) => Ok(Json(user)),
        None => Err(AppError::not_found("user not found")),
    }
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

pub async fn get_user(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<User>, AppError> {
    let service = UserService::new(state.db.clone());
    let user = service.get_user(id).await.map_err(|err| {
        tracing::error!(error = ?err, user_id = %id, "failed to load user");
        AppError::internal("failed to load user")
    })?;

    match user {
        Some(user) => Ok(Json(user)),
        None => Err(AppError::not_found("user not found")),
    }
}

#[derive(Deserialize)]
pub struct UpdateProfileRequest {
    pub name: Option<String>,
    /// Absent: leave unchanged. Explicit null: clear. String: set.
    #[serde(default, deserialize_with = "double_option")]
    pub avatar_url: Option<Option<String>>,
}

fn double_option<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
where
    T: Deserialize<'de>,
    D: serde::Deserializer<'de>,
{
    T::deserialize(deserializer).map(Some)
}

pub async fn update_profile(
    Path(id): Path<Uuid>,
    auth: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<UpdateProfileRequest>,
) -> Result<Json<User>, AppError> {
    if auth.user_id != id {
        return Err(AppError::forbidden("cannot update other users"));
    }

    if let Some(name) = &payload.name {
        if name.trim().is_empty() {
            return Err(AppError::bad_request("name cannot be empty"));
        }
    }

    let service = UserService::new(state.db.clone());
    let user = service
        .update_profile(id, payload.name, payload.avatar_url)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, user_id = %id, "failed to update profile");
            AppError::internal("failed to update profile")
        })?;

    match user {
        Some(user) => Ok(Json(user)),
        None => Err(AppError::not_found("user not found")),
    }
}

pub async fn list_user_posts(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Query(query): Query<PaginationQuery>,
) -> Result<Json<ListResponse<Post>>, AppError> {
    let limit = query.limit.unwrap_or(30);
    if !(1..=200).contains(&limit) {
        return Err(AppError::bad_request("limit must be between 1 and 200"));
    }
    let cursor = cursor_from_query(&query)?;

    let service = PostService::new(state.db.clone());
    let posts = service
        .list_posts_by_author(id, cursor, limit + 1)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, user_id = %id, "failed to list user posts");
            AppError::internal("failed to list user posts")
        })?;

    Ok(Json(into_page(posts, limit, |post| Cursor {
        created_at: post.created_at,
        id: post.id,
    })))
}

// ---------------------------------------------------------------------------
// Posts
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct PostRequest {
    pub title: String,
    pub content: String,
}

fn validate_post_body(payload: &PostRequest) -> Result<(String, String), AppError> {
    let title = payload.title.trim().to_string();
    let content = payload.content.trim().to_string();

    if title.is_empty() || content.is_empty() {
        return Err(AppError::bad_request("title and content cannot be empty"));
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(AppError::bad_request("title must be at most 200 characters"));
    }
    if content.chars().count() > MAX_CONTENT_LEN {
        return Err(AppError::bad_request("content must be at most 20000 characters"));
    }

    Ok((title, content))
}

pub async fn create_post(
    auth: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<PostRequest>,
) -> Result<Json<Post>, AppError> {
    let (title, content) = validate_post_body(&payload)?;

    let service = PostService::new(state.db.clone());
    let post = service
        .create_post(auth.user_id, title, content)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, "failed to create post");
            AppError::internal("failed to create post")
        })?;

    Ok(Json(post))
}

pub async fn list_posts(
    State(state): State<AppState>,
    Query(query): Query<PaginationQuery>,
) -> Result<Json<ListResponse<Post>>, AppError> {
    let limit = query.limit.unwrap_or(30);
    if !(1..=200).contains(&limit) {
        return Err(AppError::bad_request("limit must be between 1 and 200"));
    }
    let cursor = cursor_from_query(&query)?;

    let service = PostService::new(state.db.clone());
    let posts = service.list_posts(cursor, limit + 1).await.map_err(|err| {
        tracing::error!(error = ?err, "failed to list posts");
        AppError::internal("failed to list posts")
    })?;

    Ok(Json(into_page(posts, limit, |post| Cursor {
        created_at: post.created_at,
        id: post.id,
    })))
}

pub async fn get_post(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<Post>, AppError> {
    let service = PostService::new(state.db.clone());
    let post = service.get_post(id).await.map_err(|err| {
        tracing::error!(error = ?err, post_id = %id, "failed to load post");
        AppError::internal("failed to load post")
    })?;

    match post {
        Some(post) => Ok(Json(post)),
        None => Err(AppError::not_found("post not found")),
    }
}

pub async fn update_post(
    Path(id): Path<Uuid>,
    auth: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<PostRequest>,
) -> Result<Json<Post>, AppError> {
    let (title, content) = validate_post_body(&payload)?;

    let service = PostService::new(state.db.clone());
    let post = service
        .update_post(id, auth.user_id, title, content)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, post_id = %id, "failed to update post");
            AppError::internal("failed to update post")
        })?;

    match post {
        Some(post) => Ok(Json(post)),
        None => Err(AppError::not_found("post not found")),
    }
}

pub async fn delete_post(
    Path(id): Path<Uuid>,
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<StatusCode, AppError> {
    let service = PostService::new(state.db.clone());
    let deleted = service
        .delete_post(id, auth.user_id)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, post_id = %id, "failed to delete post");
            AppError::internal("failed to delete post")
        })?;

    if deleted {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::not_found("post not found"))
    }
}

// ---------------------------------------------------------------------------
// Likes and comments
// ---------------------------------------------------------------------------

pub async fn like_post(
    Path(id): Path<Uuid>,
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<Like>, AppError> {
    let service = EngagementService::new(state.db.clone());
    let like = service.like_post(auth.user_id, id).await.map_err(|err| {
        if violates(&err, "23503", "likes_post_id_fkey") {
            return AppError::not_found("post not found");
        }
        tracing::error!(error = ?err, post_id = %id, "failed to like post");
        AppError::internal("failed to like post")
    })?;

    match like {
        Some(like) => Ok(Json(like)),
        None => Err(AppError::conflict("post already liked")),
    }
}

pub async fn unlike_post(
    Path(id): Path<Uuid>,
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<StatusCode, AppError> {
    let service = EngagementService::new(state.db.clone());
    let removed = service
        .unlike_post(auth.user_id, id)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, post_id = %id, "failed to unlike post");
            AppError::internal("failed to unlike post")
        })?;

    if removed {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::not_found("like not found"))
    }
}

pub async fn post_stats(
    Path(id): Path<Uuid>,
    auth: Option<AuthUser>,
    State(state): State<AppState>,
) -> Result<Json<PostStats>, AppError> {
    let viewer_id = auth.map(|user| user.user_id);

    let service = EngagementService::new(state.db.clone());
    let stats = service.post_stats(id, viewer_id).await.map_err(|err| {
        tracing::error!(error = ?err, post_id = %id, "failed to load post stats");
        AppError::internal("failed to load post stats")
    })?;

    Ok(Json(stats))
}

#[derive(Deserialize)]
pub struct CommentRequest {
    pub text: String,
}

pub async fn comment_post(
    Path(id): Path<Uuid>,
    auth: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<CommentRequest>,
) -> Result<Json<Comment>, AppError> {
    let text = payload.text.trim().to_string();
    if text.is_empty() {
        return Err(AppError::bad_request("comment cannot be empty"));
    }
    if text.chars().count() > MAX_COMMENT_LEN {
        return Err(AppError::bad_request("comment must be at most 2000 characters"));
    }

    let service = EngagementService::new(state.db.clone());
    let comment = service
        .comment_post(auth.user_id, id, text)
        .await
        .map_err(|err| {
            if violates(&err, "23503", "comments_post_id_fkey") {
                return AppError::not_found("post not found");
            }
            tracing::error!(error = ?err, post_id = %id, "failed to comment on post");
            AppError::internal("failed to comment on post")
        })?;

    Ok(Json(comment))
}

pub async fn list_post_comments(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Query(query): Query<PaginationQuery>,
) -> Result<Json<ListResponse<Comment>>, AppError> {
    let limit = query.limit.unwrap_or(50);
    if !(1..=200).contains(&limit) {
        return Err(AppError::bad_request("limit must be between 1 and 200"));
    }
    let cursor = cursor_from_query(&query)?;

    let service = EngagementService::new(state.db.clone());
    let comments = service
        .list_comments(id, cursor, limit + 1)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, post_id = %id, "failed to list comments");
            AppError::internal("failed to list comments")
        })?;

    Ok(Json(into_page(comments, limit, |comment| Cursor {
        created_at: comment.created_at,
        id: comment.id,
    })))
}

pub async fn delete_comment(
    Path((id, comment_id)): Path<(Uuid, Uuid)>,
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<StatusCode, AppError> {
    let service = EngagementService::new(state.db.clone());
    let deleted = service
        .delete_comment(comment_id, id, auth.user_id)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, comment_id = %comment_id, "failed to delete comment");
            AppError::internal("failed to delete comment")
        })?;

    if deleted {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::not_found("comment not found"))
    }
}

// ---------------------------------------------------------------------------
// Feed
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct FeedResponse {
    pub items: Vec<Post>,
}

/// Current snapshot of the reconciled feed. 503 while the feed is still
/// seeding or after a terminal seed failure.
pub async fn feed(State(state): State<AppState>) -> Result<Json<FeedResponse>, AppError> {
    match state.feed.snapshot().await {
        FeedState::Ready(items) => Ok(Json(FeedResponse { items })),
        FeedState::Loading => Err(AppError::unavailable("feed is still loading")),
        FeedState::Failed(reason) => {
            tracing::warn!(reason, "feed requested while unavailable");
            Err(AppError::unavailable("feed unavailable"))
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn auth_service(state: &AppState) -> AuthService {
    AuthService::new(
        state.db.clone(),
        state.paseto_access_key,
        state.paseto_refresh_key,
        state.access_ttl_minutes,
        state.refresh_ttl_days,
    )
}

fn token_response(tokens: crate::app::auth::TokenPair) -> AuthTokenResponse {
    AuthTokenResponse {
        access_token: tokens.access_token,
        refresh_token: tokens.refresh_token,
        access_expires_at: tokens.access_expires_at,
        refresh_expires_at: tokens.refresh_expires_at,
    }
}
