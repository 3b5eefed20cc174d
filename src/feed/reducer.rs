use uuid::Uuid;

use crate::domain::post::Post;

/// What to do with a create event whose id is already in the feed.
/// Duplicate delivery is possible; neither choice is obviously right,
/// so it stays configurable (FEED_DUPLICATE_POLICY).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicatePolicy {
    /// Drop the duplicate, keep the entry we already hold.
    Ignore,
    /// Overwrite the held entry in place with the freshly fetched record.
    Replace,
}

impl DuplicatePolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ignore" => Some(Self::Ignore),
            "replace" => Some(Self::Replace),
            _ => None,
        }
    }
}

/// Feed lifecycle: Loading -> {Ready, Failed}. Ready self-transitions on
/// each applied event; Failed is terminal for the feed instance.
#[derive(Debug, Clone)]
pub enum FeedState {
    Loading,
    Ready(Vec<Post>),
    Failed(String),
}

impl FeedState {
    pub fn posts(&self) -> Option<&[Post]> {
        match self {
            Self::Ready(posts) => Some(posts),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum FeedEvent {
    /// Initial bulk fetch completed, newest first.
    Loaded(Vec<Post>),
    /// Initial bulk fetch errored; the feed stays down for this instance.
    LoadFailed(String),
    Created(Post),
    Updated(Post),
    Deleted(Uuid),
}

/// Pure transition function; all feed consistency decisions live here so
/// they can be tested without any I/O.
pub fn apply(state: FeedState, event: FeedEvent, policy: DuplicatePolicy) -> FeedState {
    match (state, event) {
        (FeedState::Loading, FeedEvent::Loaded(posts)) => FeedState::Ready(posts),
        (FeedState::Loading, FeedEvent::LoadFailed(reason)) => FeedState::Failed(reason),
        (FeedState::Ready(mut posts), FeedEvent::Created(post)) => {
            match posts.iter().position(|held| held.id == post.id) {
                Some(index) => {
                    if policy == DuplicatePolicy::Replace {
                        posts[index] = post;
                    }
                }
                None => posts.insert(0, post),
            }
            FeedState::Ready(posts)
        }
        (FeedState::Ready(mut posts), FeedEvent::Updated(post)) => {
            if let Some(held) = posts.iter_mut().find(|held| held.id == post.id) {
                // Notifications can arrive out of commit order; drop update
                // snapshots older than what we already hold. Position is
                // preserved: the feed orders by created_at, which updates
                // never change.
                if post.updated_at >= held.updated_at {
                    *held = post;
                }
            }
            FeedState::Ready(posts)
        }
        (FeedState::Ready(mut posts), FeedEvent::Deleted(id)) => {
            posts.retain(|held| held.id != id);
            FeedState::Ready(posts)
        }
        // Failed is terminal; change events before Loaded have nothing to
        // apply to. Both fall through unchanged.
        (state, _) => state,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::user::UserSummary;
    use time::{Duration, OffsetDateTime};

    fn post(title: &str, seconds_ago: i64) -> Post {
        let at = OffsetDateTime::now_utc() - Duration::seconds(seconds_ago);
        Post {
            id: Uuid::new_v4(),
            author_id: Uuid::new_v4(),
            title: title.to_string(),
            content: format!("{} content", title),
            created_at: at,
            updated_at: at,
            author: UserSummary {
                id: Uuid::new_v4(),
                name: "author".to_string(),
                avatar_url: None,
            },
        }
    }

    fn ready(posts: Vec<Post>) -> FeedState {
        FeedState::Ready(posts)
    }

    fn titles(state: &FeedState) -> Vec<&str> {
        state
            .posts()
            .unwrap()
            .iter()
            .map(|post| post.title.as_str())
            .collect()
    }

    #[test]
    fn load_transitions_to_ready() {
        let state = apply(
            FeedState::Loading,
            FeedEvent::Loaded(vec![post("a", 10)]),
            DuplicatePolicy::Ignore,
        );
        assert_eq!(titles(&state), vec!["a"]);
    }

    #[test]
    fn load_failure_is_terminal() {
        let state = apply(
            FeedState::Loading,
            FeedEvent::LoadFailed("schema relationship missing".to_string()),
            DuplicatePolicy::Ignore,
        );
        assert!(matches!(state, FeedState::Failed(_)));

        // Nothing applies after failure.
        let state = apply(
            state,
            FeedEvent::Created(post("late", 0)),
            DuplicatePolicy::Ignore,
        );
        assert!(matches!(state, FeedState::Failed(_)));
    }

    #[test]
    fn create_update_delete_scenario() {
        // Seed [A@t3, B@t2, C@t1] newest first.
        let a = post("A", 10);
        let b = post("B", 20);
        let c = post("C", 30);
        let (a_id, b_id) = (a.id, b.id);
        let mut state = ready(vec![a.clone(), b, c]);

        // Create D -> prepended.
        let d = post("D", 0);
        state = apply(state, FeedEvent::Created(d), DuplicatePolicy::Ignore);
        assert_eq!(titles(&state), vec!["D", "A", "B", "C"]);

        // Delete B -> removed.
        state = apply(state, FeedEvent::Deleted(b_id), DuplicatePolicy::Ignore);
        assert_eq!(titles(&state), vec!["D", "A", "C"]);

        // Update A -> replaced in place, position unchanged.
        let mut a_edited = a;
        a_edited.title = "X".to_string();
        a_edited.updated_at = OffsetDateTime::now_utc();
        state = apply(state, FeedEvent::Updated(a_edited), DuplicatePolicy::Ignore);
        assert_eq!(titles(&state), vec!["D", "X", "C"]);
        assert!(state.posts().unwrap()[1].edited());
        assert_eq!(state.posts().unwrap()[1].id, a_id);
    }

    #[test]
    fn update_for_missing_id_is_noop() {
        let state = ready(vec![post("a", 10)]);
        let state = apply(
            state,
            FeedEvent::Updated(post("ghost", 0)),
            DuplicatePolicy::Ignore,
        );
        assert_eq!(titles(&state), vec!["a"]);
    }

    #[test]
    fn delete_for_missing_id_is_noop() {
        let state = ready(vec![post("a", 10)]);
        let state = apply(
            state,
            FeedEvent::Deleted(Uuid::new_v4()),
            DuplicatePolicy::Ignore,
        );
        assert_eq!(titles(&state), vec!["a"]);
    }

    #[test]
    fn stale_update_is_dropped() {
        let mut current = post("current", 10);
        current.updated_at = OffsetDateTime::now_utc();
        let mut stale = current.clone();
        stale.title = "stale".to_string();
        stale.updated_at = current.updated_at - Duration::seconds(5);

        let state = ready(vec![current]);
        let state = apply(state, FeedEvent::Updated(stale), DuplicatePolicy::Ignore);
        assert_eq!(titles(&state), vec!["current"]);
    }

    #[test]
    fn duplicate_create_ignored_by_default_policy() {
        let a = post("a", 10);
        let mut duplicate = a.clone();
        duplicate.title = "a-refetched".to_string();

        let state = ready(vec![a]);
        let state = apply(state, FeedEvent::Created(duplicate), DuplicatePolicy::Ignore);
        assert_eq!(titles(&state), vec!["a"]);
    }

    #[test]
    fn duplicate_create_replaces_under_replace_policy() {
        let a = post("a", 10);
        let b = post("b", 20);
        let mut duplicate = a.clone();
        duplicate.title = "a-refetched".to_string();

        let state = ready(vec![a, b]);
        let state = apply(
            state,
            FeedEvent::Created(duplicate),
            DuplicatePolicy::Replace,
        );
        // Replaced in place, not prepended again.
        assert_eq!(titles(&state), vec!["a-refetched", "b"]);
    }
}
