//! Process-local tracker store
//!
//! Keeps every tracker in ordered maps behind one async lock. Used by tests
//! and by the CLI's dry-run mode.

use crate::error::{Result, TrackingError};
use crate::keys::TrackerKey;
use crate::storage::{check_range, check_template, CounterBatch, TrackerStore};
use crate::types::{
    ContentCounters, ContentKind, ContentTracker, CounterUpdate, TrackerKind, TrackerTemplate,
    UserTracker,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Default)]
struct State {
    posts: BTreeMap<String, ContentTracker>,
    comments: BTreeMap<String, ContentTracker>,
    users: BTreeMap<String, UserTracker>,
    /// Entity ids whose increments are forced to fail
    failing: HashSet<String>,
}

impl State {
    fn content_map(&mut self, kind: ContentKind) -> &mut BTreeMap<String, ContentTracker> {
        match kind {
            ContentKind::Post => &mut self.posts,
            ContentKind::Comment => &mut self.comments,
        }
    }

    fn content_map_ref(&self, kind: ContentKind) -> &BTreeMap<String, ContentTracker> {
        match kind {
            ContentKind::Post => &self.posts,
            ContentKind::Comment => &self.comments,
        }
    }
}

/// In-memory [`TrackerStore`]
#[derive(Debug, Default)]
pub struct MemoryTrackerStore {
    state: RwLock<State>,
}

impl MemoryTrackerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later increment against `entity_id` fail with a storage error
    #[cfg(test)]
    pub async fn fail_increments_for(&self, entity_id: impl Into<String>) {
        self.state.write().await.failing.insert(entity_id.into());
    }

    /// Number of trackers of each kind currently held
    pub async fn len(&self) -> (usize, usize, usize) {
        let state = self.state.read().await;
        (state.users.len(), state.posts.len(), state.comments.len())
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == (0, 0, 0)
    }
}

fn content_kind(key: &TrackerKey) -> Result<ContentKind> {
    match key.kind() {
        TrackerKind::Post => Ok(ContentKind::Post),
        TrackerKind::Comment => Ok(ContentKind::Comment),
        TrackerKind::User => Err(TrackingError::InvariantViolation(format!(
            "{} is a user key, not a content key",
            key.id()
        ))),
    }
}

#[async_trait]
impl TrackerStore for MemoryTrackerStore {
    async fn ensure_exists(&self, key: &TrackerKey, template: &TrackerTemplate) -> Result<bool> {
        check_template(key, template)?;
        let mut state = self.state.write().await;

        let created = match template {
            TrackerTemplate::User { user_id } => {
                if state.users.contains_key(key.id()) {
                    false
                } else {
                    let tracker = UserTracker::zero(
                        key.id(),
                        user_id.clone(),
                        key.period_start(),
                        key.days_in_month(),
                    );
                    state.users.insert(key.id().to_string(), tracker);
                    true
                }
            }
            TrackerTemplate::Post { author_id, .. } | TrackerTemplate::Comment { author_id, .. } => {
                let kind = content_kind(key)?;
                let map = state.content_map(kind);
                if map.contains_key(key.id()) {
                    false
                } else {
                    map.insert(
                        key.id().to_string(),
                        ContentTracker {
                            id: key.id().to_string(),
                            kind,
                            content_id: key.entity_id().to_string(),
                            owner_id: author_id.clone(),
                            day: key.period_start(),
                            counters: ContentCounters::zero(kind),
                        },
                    );
                    true
                }
            }
        };

        debug!("ensure_exists {} {} created={}", key.kind(), key.id(), created);
        Ok(created)
    }

    async fn increment(&self, key: &TrackerKey, updates: &[CounterUpdate]) -> Result<()> {
        let batch = CounterBatch::for_key(key, updates)?;
        let mut state = self.state.write().await;

        if state.failing.contains(key.entity_id()) {
            return Err(TrackingError::storage(key.id(), "injected increment failure"));
        }

        // Deltas land on copies first so an overflow leaves the tracker untouched
        let overflow = |e: TrackingError| TrackingError::storage(key.id(), e.to_string());
        match batch {
            CounterBatch::User(deltas) => {
                let tracker = state.users.get_mut(key.id()).ok_or_else(|| {
                    TrackingError::storage(key.id(), "user tracker was not preallocated")
                })?;
                let slot = key.day_of_month().checked_sub(1).map(|i| i as usize);
                let day = slot
                    .and_then(|i| tracker.days.get_mut(i))
                    .ok_or_else(|| {
                        TrackingError::storage(
                            key.id(),
                            format!("no day slot {} in tracker", key.day_of_month()),
                        )
                    })?;
                let mut next_day = *day;
                let mut next_month = tracker.monthly;
                for (counter, delta) in deltas {
                    next_day.add(counter, delta).map_err(overflow)?;
                    next_month.add(counter, delta).map_err(overflow)?;
                }
                *day = next_day;
                tracker.monthly = next_month;
            }
            CounterBatch::Post(deltas) => {
                let tracker = state.posts.get_mut(key.id()).ok_or_else(|| {
                    TrackingError::storage(key.id(), "post tracker was not preallocated")
                })?;
                if let ContentCounters::Post(counters) = &mut tracker.counters {
                    let mut next = *counters;
                    for (counter, delta) in deltas {
                        next.add(counter, delta).map_err(overflow)?;
                    }
                    *counters = next;
                }
            }
            CounterBatch::Comment(deltas) => {
                let tracker = state.comments.get_mut(key.id()).ok_or_else(|| {
                    TrackingError::storage(key.id(), "comment tracker was not preallocated")
                })?;
                if let ContentCounters::Comment(counters) = &mut tracker.counters {
                    let mut next = *counters;
                    for (counter, delta) in deltas {
                        next.add(counter, delta).map_err(overflow)?;
                    }
                    *counters = next;
                }
            }
        }

        debug!("Incremented {} {} ({} updates)", key.kind(), key.id(), updates.len());
        Ok(())
    }

    async fn get_content(&self, key: &TrackerKey) -> Result<Option<ContentTracker>> {
        let kind = content_kind(key)?;
        let state = self.state.read().await;
        Ok(state.content_map_ref(kind).get(key.id()).cloned())
    }

    async fn get_user(&self, key: &TrackerKey) -> Result<Option<UserTracker>> {
        if key.kind() != TrackerKind::User {
            return Err(TrackingError::InvariantViolation(format!(
                "{} is not a user key",
                key.id()
            )));
        }
        let state = self.state.read().await;
        Ok(state.users.get(key.id()).cloned())
    }

    async fn range_content(
        &self,
        kind: ContentKind,
        entity_id: &str,
        from: &TrackerKey,
        to: &TrackerKey,
    ) -> Result<Vec<ContentTracker>> {
        check_range(kind.tracker_kind(), entity_id, from, to)?;
        if from.id() > to.id() {
            return Ok(Vec::new());
        }
        let state = self.state.read().await;
        Ok(state
            .content_map_ref(kind)
            .range(from.id().to_string()..=to.id().to_string())
            .map(|(_, tracker)| tracker)
            .filter(|tracker| tracker.content_id == entity_id)
            .cloned()
            .collect())
    }

    async fn range_user(
        &self,
        entity_id: &str,
        from: &TrackerKey,
        to: &TrackerKey,
    ) -> Result<Vec<UserTracker>> {
        check_range(TrackerKind::User, entity_id, from, to)?;
        if from.id() > to.id() {
            return Ok(Vec::new());
        }
        let state = self.state.read().await;
        Ok(state
            .users
            .range(from.id().to_string()..=to.id().to_string())
            .map(|(_, tracker)| tracker)
            .filter(|tracker| tracker.user_id == entity_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counters::{PostCounter, UserCounter};
    use crate::keys::build_key;
    use chrono::NaiveDate;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 10, d).unwrap()
    }

    fn user_template(id: &str) -> TrackerTemplate {
        TrackerTemplate::User {
            user_id: id.to_string(),
        }
    }

    #[tokio::test]
    async fn test_ensure_exists_is_idempotent() {
        let store = MemoryTrackerStore::new();
        let key = build_key(TrackerKind::User, "u1", day(17)).unwrap();

        assert!(store.ensure_exists(&key, &user_template("u1")).await.unwrap());
        store
            .increment(&key, &[CounterUpdate::user("u1", UserCounter::CommentsCreated, 1)])
            .await
            .unwrap();
        assert!(!store.ensure_exists(&key, &user_template("u1")).await.unwrap());

        let tracker = store.get_user(&key).await.unwrap().unwrap();
        assert_eq!(tracker.monthly.comments_created, 1);
        assert_eq!(tracker.days.len(), 31);
        assert_eq!(tracker.day(17).unwrap().comments_created, 1);
        assert!(tracker.is_consistent());
    }

    #[tokio::test]
    async fn test_increment_requires_preallocation() {
        let store = MemoryTrackerStore::new();
        let key = build_key(TrackerKind::Post, "p1", day(1)).unwrap();
        let err = store
            .increment(&key, &[CounterUpdate::post("p1", PostCounter::Views, 1)])
            .await
            .unwrap_err();
        assert!(matches!(err, TrackingError::Storage { .. }));
    }

    #[tokio::test]
    async fn test_template_must_match_key() {
        let store = MemoryTrackerStore::new();
        let key = build_key(TrackerKind::User, "u1", day(1)).unwrap();
        assert!(matches!(
            store.ensure_exists(&key, &user_template("u2")).await,
            Err(TrackingError::InvariantViolation(_))
        ));
    }

    #[tokio::test]
    async fn test_range_excludes_prefix_neighbours() {
        let store = MemoryTrackerStore::new();
        // "p124" on 2010-01-15 is "p124100115", inside "p1241001"..="p1241031"
        let neighbour = NaiveDate::from_ymd_opt(2010, 1, 15).unwrap();
        for (id, d) in [("p1", day(16)), ("p1", day(17)), ("p124", neighbour)] {
            let key = build_key(TrackerKind::Post, id, d).unwrap();
            let template = TrackerTemplate::Post {
                post_id: id.to_string(),
                author_id: "a".to_string(),
            };
            store.ensure_exists(&key, &template).await.unwrap();
        }

        let from = build_key(TrackerKind::Post, "p1", day(1)).unwrap();
        let to = build_key(TrackerKind::Post, "p1", day(31)).unwrap();
        let found = store
            .range_content(ContentKind::Post, "p1", &from, &to)
            .await
            .unwrap();
        let ids: Vec<_> = found.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["p1241016", "p1241017"]);
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let store = MemoryTrackerStore::new();
        let key = build_key(TrackerKind::User, "u1", day(2)).unwrap();
        store.ensure_exists(&key, &user_template("u1")).await.unwrap();
        store.fail_increments_for("u1").await;

        let result = store
            .increment(&key, &[CounterUpdate::user("u1", UserCounter::ViewsOfOthers, 1)])
            .await;
        assert!(result.is_err());
        let tracker = store.get_user(&key).await.unwrap().unwrap();
        assert!(tracker.monthly.is_zero());
    }

    #[tokio::test]
    async fn test_overflowing_increment_leaves_tracker_untouched() {
        let store = MemoryTrackerStore::new();
        let key = build_key(TrackerKind::User, "u1", day(5)).unwrap();
        store.ensure_exists(&key, &user_template("u1")).await.unwrap();
        store
            .increment(&key, &[CounterUpdate::user("u1", UserCounter::ViewsOfOwned, i64::MAX)])
            .await
            .unwrap();

        let err = store
            .increment(
                &key,
                &[
                    CounterUpdate::user("u1", UserCounter::CommentsOnOwnedContent, 1),
                    CounterUpdate::user("u1", UserCounter::ViewsOfOwned, 1),
                ],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TrackingError::Storage { .. }));

        let tracker = store.get_user(&key).await.unwrap().unwrap();
        assert_eq!(tracker.monthly.views_of_owned, i64::MAX);
        assert_eq!(tracker.monthly.comments_on_owned_content, 0);
        assert!(tracker.is_consistent());
    }
}
