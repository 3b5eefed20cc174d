//! Live feed tests
//!
//! These exercise the full pipeline: HTTP mutation -> transactional
//! pg_notify -> change broker -> reconciler -> /feed snapshot. Delivery is
//! asynchronous, so assertions poll until the snapshot converges.
//!
//! Each test builds its own broker + reconciler rig so the background
//! workers live in the test's own tokio runtime.

mod common;

use axum::http::{Method, StatusCode};
use axum::Router;
use common::{app, request_on};
use serde_json::{json, Value};
use std::time::Duration;

/// Poll GET /feed on the rig router until `check` passes or time runs out.
async fn wait_for_feed<F>(router: &Router, check: F) -> Value
where
    F: Fn(&Value) -> bool,
{
    let mut last = Value::Null;
    for _ in 0..200 {
        let resp = request_on(router, Method::GET, "/feed", None, &[]).await;
        if resp.status == StatusCode::OK {
            last = resp.json();
            if check(&last) {
                return last;
            }
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("feed did not converge; last snapshot: {}", last);
}

fn feed_ids(snapshot: &Value) -> Vec<String> {
    snapshot["items"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .map(|p| p["id"].as_str().unwrap_or("").to_string())
                .collect()
        })
        .unwrap_or_default()
}

#[tokio::test]
async fn feed_serves_seeded_snapshot() {
    let app = app().await;
    let user = app.create_user("feed_seed").await;
    // Inserted directly, with no change notification; only the seed fetch
    // can make it visible.
    let post_id = app.create_post_for_user(user.id).await;

    let (router, reconciler, broker) = app.feed_rig().await;

    let snapshot =
        wait_for_feed(&router, |s| feed_ids(s).contains(&post_id.to_string())).await;
    assert!(feed_ids(&snapshot).contains(&post_id.to_string()));

    reconciler.teardown();
    broker.shutdown();
}

#[tokio::test]
async fn created_post_appears_at_front() {
    let app = app().await;
    let user = app.create_user("feed_create").await;

    let (router, reconciler, broker) = app.feed_rig().await;
    // Wait until seeded before mutating.
    wait_for_feed(&router, |_| true).await;

    let resp = request_on(
        &router,
        Method::POST,
        "/posts",
        Some(json!({ "title": "Live", "content": "pushed through the stream" })),
        &[("Authorization", &format!("Bearer {}", user.access_token))],
    )
    .await;
    assert_eq!(resp.status, StatusCode::OK);
    let post_id = resp.json()["id"].as_str().unwrap().to_string();

    let snapshot = wait_for_feed(&router, |s| feed_ids(s).contains(&post_id)).await;
    // Newest-first: the fresh post leads the feed.
    assert_eq!(feed_ids(&snapshot)[0], post_id);

    reconciler.teardown();
    broker.shutdown();
}

#[tokio::test]
async fn updated_post_changes_in_place() {
    let app = app().await;
    let user = app.create_user("feed_update").await;

    let (router, reconciler, broker) = app.feed_rig().await;
    wait_for_feed(&router, |_| true).await;

    let auth = format!("Bearer {}", user.access_token);
    let resp = request_on(
        &router,
        Method::POST,
        "/posts",
        Some(json!({ "title": "Before", "content": "original" })),
        &[("Authorization", &auth)],
    )
    .await;
    let post_id = resp.json()["id"].as_str().unwrap().to_string();
    let snapshot = wait_for_feed(&router, |s| feed_ids(s).contains(&post_id)).await;
    let position = feed_ids(&snapshot)
        .iter()
        .position(|id| id == &post_id)
        .unwrap();

    let resp = request_on(
        &router,
        Method::PATCH,
        &format!("/posts/{}", post_id),
        Some(json!({ "title": "After", "content": "edited" })),
        &[("Authorization", &auth)],
    )
    .await;
    assert_eq!(resp.status, StatusCode::OK);

    let snapshot = wait_for_feed(&router, |s| {
        s["items"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .any(|p| p["id"] == post_id.as_str() && p["title"] == "After")
            })
            .unwrap_or(false)
    })
    .await;
    // The edit does not move the post; feed order follows created_at.
    let new_position = feed_ids(&snapshot)
        .iter()
        .position(|id| id == &post_id)
        .unwrap();
    assert_eq!(new_position, position);

    reconciler.teardown();
    broker.shutdown();
}

#[tokio::test]
async fn deleted_post_disappears() {
    let app = app().await;
    let user = app.create_user("feed_delete").await;

    let (router, reconciler, broker) = app.feed_rig().await;
    wait_for_feed(&router, |_| true).await;

    let auth = format!("Bearer {}", user.access_token);
    let resp = request_on(
        &router,
        Method::POST,
        "/posts",
        Some(json!({ "title": "Doomed", "content": "soon gone" })),
        &[("Authorization", &auth)],
    )
    .await;
    let post_id = resp.json()["id"].as_str().unwrap().to_string();
    wait_for_feed(&router, |s| feed_ids(s).contains(&post_id)).await;

    let resp = request_on(
        &router,
        Method::DELETE,
        &format!("/posts/{}", post_id),
        None,
        &[("Authorization", &auth)],
    )
    .await;
    assert_eq!(resp.status, StatusCode::NO_CONTENT);

    wait_for_feed(&router, |s| !feed_ids(s).contains(&post_id)).await;

    reconciler.teardown();
    broker.shutdown();
}

#[tokio::test]
async fn likes_and_comments_do_not_touch_feed() {
    let app = app().await;
    let user = app.create_user("feed_engage").await;

    let (router, reconciler, broker) = app.feed_rig().await;
    wait_for_feed(&router, |_| true).await;

    let auth = format!("Bearer {}", user.access_token);
    let resp = request_on(
        &router,
        Method::POST,
        "/posts",
        Some(json!({ "title": "Quiet", "content": "engagement happens off-feed" })),
        &[("Authorization", &auth)],
    )
    .await;
    let post_id = resp.json()["id"].as_str().unwrap().to_string();
    let before = wait_for_feed(&router, |s| feed_ids(s).contains(&post_id)).await;

    request_on(
        &router,
        Method::POST,
        &format!("/posts/{}/like", post_id),
        Some(json!({})),
        &[("Authorization", &auth)],
    )
    .await;
    request_on(
        &router,
        Method::POST,
        &format!("/posts/{}/comments", post_id),
        Some(json!({ "text": "shh" })),
        &[("Authorization", &auth)],
    )
    .await;

    // Give any misdirected notification time to arrive, then compare.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let resp = request_on(&router, Method::GET, "/feed", None, &[]).await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(feed_ids(&resp.json()), feed_ids(&before));

    reconciler.teardown();
    broker.shutdown();
}
