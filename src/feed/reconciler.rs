use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::domain::post::Post;
use crate::feed::reducer::{self, DuplicatePolicy, FeedEvent, FeedState};
use crate::infra::changes::{ChangeEvent, ChangeOp};

pub const POSTS_TABLE: &str = "posts";

/// Where the reconciler reads posts from. The production implementation is
/// `PostService`; tests substitute controllable in-memory sources.
#[async_trait]
pub trait PostSource: Send + Sync + 'static {
    /// Bulk fetch of all posts, newest first, author-joined.
    async fn fetch_feed(&self) -> Result<Vec<Post>>;

    /// Point fetch of one post, author-joined.
    async fn fetch_post(&self, id: Uuid) -> Result<Option<Post>>;
}

struct Shared {
    state: RwLock<FeedState>,
    closed: AtomicBool,
}

/// Cheap read handle onto the reconciled feed. Cloneable; outlives teardown
/// (a torn-down feed just stops changing).
#[derive(Clone)]
pub struct FeedHandle {
    shared: Arc<Shared>,
}

impl FeedHandle {
    pub async fn snapshot(&self) -> FeedState {
        self.shared.state.read().await.clone()
    }
}

/// Keeps an in-memory newest-first post list consistent with the store by
/// applying row-level change events, seeded by one bulk fetch. Owns the
/// subscription receiver for its lifetime; `teardown` consumes the value,
/// so release happens exactly once.
pub struct FeedReconciler {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl FeedReconciler {
    pub async fn start<S: PostSource>(
        source: Arc<S>,
        events: broadcast::Receiver<ChangeEvent>,
        policy: DuplicatePolicy,
    ) -> Self {
        let shared = Arc::new(Shared {
            state: RwLock::new(FeedState::Loading),
            closed: AtomicBool::new(false),
        });

        // Seed before subscribing to events; until the seed lands there is
        // nothing to apply events to.
        match source.fetch_feed().await {
            Ok(posts) => {
                transition(&shared, FeedEvent::Loaded(posts), policy).await;
            }
            Err(err) => {
                // Terminal for this instance; the caller surfaces the outage,
                // no retry loop.
                tracing::error!(error = ?err, "feed seed fetch failed");
                transition(&shared, FeedEvent::LoadFailed(err.to_string()), policy).await;
                return Self {
                    shared,
                    worker: None,
                };
            }
        }

        let worker = tokio::spawn(run(source, events, policy, shared.clone()));
        Self {
            shared,
            worker: Some(worker),
        }
    }

    pub fn handle(&self) -> FeedHandle {
        FeedHandle {
            shared: self.shared.clone(),
        }
    }

    /// Stops the worker and drops the subscription receiver. An in-flight
    /// point fetch that resolves after this is never applied.
    pub fn teardown(self) {
        self.shared.closed.store(true, Ordering::Release);
        if let Some(worker) = self.worker {
            worker.abort();
        }
    }
}

async fn run<S: PostSource>(
    source: Arc<S>,
    mut events: broadcast::Receiver<ChangeEvent>,
    policy: DuplicatePolicy,
    shared: Arc<Shared>,
) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                // Best effort: lost notifications stay lost, the feed drifts
                // until the next event for the affected rows.
                tracing::warn!(skipped, "feed subscriber lagged, change events dropped");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => {
                tracing::info!("change stream closed, feed worker stopping");
                break;
            }
        };

        if event.table != POSTS_TABLE {
            continue;
        }

        let feed_event = match event.op {
            ChangeOp::Insert => match source.fetch_post(event.id).await {
                Ok(Some(post)) => FeedEvent::Created(post),
                Ok(None) => {
                    tracing::debug!(id = %event.id, "created post gone before point fetch");
                    continue;
                }
                Err(err) => {
                    tracing::debug!(error = ?err, id = %event.id, "point fetch failed, insert dropped");
                    continue;
                }
            },
            ChangeOp::Update => match source.fetch_post(event.id).await {
                Ok(Some(post)) => FeedEvent::Updated(post),
                Ok(None) => {
                    tracing::debug!(id = %event.id, "updated post gone before point fetch");
                    continue;
                }
                Err(err) => {
                    tracing::debug!(error = ?err, id = %event.id, "point fetch failed, update dropped");
                    continue;
                }
            },
            ChangeOp::Delete => FeedEvent::Deleted(event.id),
        };

        // The point fetch may have raced a teardown; a late result must not
        // land on detached state.
        if shared.closed.load(Ordering::Acquire) {
            break;
        }

        transition(&shared, feed_event, policy).await;
    }
}

async fn transition(shared: &Shared, event: FeedEvent, policy: DuplicatePolicy) {
    let mut state = shared.state.write().await;
    let current = std::mem::replace(&mut *state, FeedState::Loading);
    *state = reducer::apply(current, event, policy);
}
