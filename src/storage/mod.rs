//! Storage layer for tracker documents
//!
//! Provides the [`TrackerStore`] abstraction and two implementations: a libSQL
//! backend for persistent storage and a process-local in-memory store.

pub mod libsql;
pub mod memory;
pub mod test_utils;

use crate::counters::{CommentCounter, PostCounter, UserCounter};
use crate::error::{Result, TrackingError};
use crate::keys::TrackerKey;
use crate::types::{ContentKind, ContentTracker, Counter, CounterUpdate, TrackerTemplate, UserTracker};
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Storage backend trait for tracker documents
#[async_trait]
pub trait TrackerStore: Send + Sync {
    /// Create a zeroed tracker at `key` unless one already exists.
    ///
    /// Returns whether this call created it. Never resets existing counters.
    async fn ensure_exists(&self, key: &TrackerKey, template: &TrackerTemplate) -> Result<bool>;

    /// Apply every delta to the tracker at `key` in one atomic operation.
    ///
    /// User deltas land on both the monthly counters and the day slot of
    /// `key.day_of_month()`.
    async fn increment(&self, key: &TrackerKey, updates: &[CounterUpdate]) -> Result<()>;

    /// Point lookup of a post or comment tracker
    async fn get_content(&self, key: &TrackerKey) -> Result<Option<ContentTracker>>;

    /// Point lookup of a user tracker
    async fn get_user(&self, key: &TrackerKey) -> Result<Option<UserTracker>>;

    /// Trackers of one content item with keys in `from..=to`, ascending
    async fn range_content(
        &self,
        kind: ContentKind,
        entity_id: &str,
        from: &TrackerKey,
        to: &TrackerKey,
    ) -> Result<Vec<ContentTracker>>;

    /// Trackers of one user with keys in `from..=to`, ascending
    async fn range_user(
        &self,
        entity_id: &str,
        from: &TrackerKey,
        to: &TrackerKey,
    ) -> Result<Vec<UserTracker>>;
}

/// Deltas for one tracker, merged per counter and checked against the key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CounterBatch {
    User(BTreeMap<UserCounter, i64>),
    Post(BTreeMap<PostCounter, i64>),
    Comment(BTreeMap<CommentCounter, i64>),
}

impl CounterBatch {
    /// Merge `updates` for the tracker at `key`.
    ///
    /// Every update must target the key's entity with a counter of the key's
    /// kind; anything else is a caller bug.
    pub fn for_key(key: &TrackerKey, updates: &[CounterUpdate]) -> Result<Self> {
        let mut user = BTreeMap::new();
        let mut post = BTreeMap::new();
        let mut comment = BTreeMap::new();

        for update in updates {
            let target = update.target();
            if target.kind() != key.kind() || target.entity_id() != key.entity_id() {
                return Err(TrackingError::InvariantViolation(format!(
                    "update for {} does not belong to tracker {} ({} {})",
                    target,
                    key.id(),
                    key.kind(),
                    key.entity_id()
                )));
            }

            match update.counter() {
                Counter::User(c) => merge(&mut user, c, update.delta())?,
                Counter::Post(c) => merge(&mut post, c, update.delta())?,
                Counter::Comment(c) => merge(&mut comment, c, update.delta())?,
            }
        }

        Ok(match key.kind() {
            crate::types::TrackerKind::User => CounterBatch::User(user),
            crate::types::TrackerKind::Post => CounterBatch::Post(post),
            crate::types::TrackerKind::Comment => CounterBatch::Comment(comment),
        })
    }

    pub fn is_empty(&self) -> bool {
        match self {
            CounterBatch::User(m) => m.is_empty(),
            CounterBatch::Post(m) => m.is_empty(),
            CounterBatch::Comment(m) => m.is_empty(),
        }
    }

    /// `(column, delta)` pairs in a stable order
    pub fn columns(&self) -> Vec<(&'static str, i64)> {
        match self {
            CounterBatch::User(m) => m.iter().map(|(c, d)| (c.column(), *d)).collect(),
            CounterBatch::Post(m) => m.iter().map(|(c, d)| (c.column(), *d)).collect(),
            CounterBatch::Comment(m) => m.iter().map(|(c, d)| (c.column(), *d)).collect(),
        }
    }
}

fn merge<C: Ord + Copy + std::fmt::Display>(
    deltas: &mut BTreeMap<C, i64>,
    counter: C,
    delta: i64,
) -> Result<()> {
    let merged = deltas.entry(counter).or_insert(0);
    *merged = merged.checked_add(delta).ok_or_else(|| {
        TrackingError::InvariantViolation(format!("merged delta for {} overflows", counter))
    })?;
    Ok(())
}

/// Check that a template describes the entity a key points at
pub(crate) fn check_template(key: &TrackerKey, template: &TrackerTemplate) -> Result<()> {
    if template.kind() != key.kind() || template.entity_id() != key.entity_id() {
        return Err(TrackingError::InvariantViolation(format!(
            "template for {} does not match tracker {}",
            template.target(),
            key.id()
        )));
    }
    Ok(())
}

/// Check that both ends of a range scan address the requested entity
pub(crate) fn check_range(
    kind: crate::types::TrackerKind,
    entity_id: &str,
    from: &TrackerKey,
    to: &TrackerKey,
) -> Result<()> {
    for key in [from, to] {
        if key.kind() != kind || key.entity_id() != entity_id {
            return Err(TrackingError::InvariantViolation(format!(
                "range bound {} is not a {} key of {}",
                key.id(),
                kind,
                entity_id
            )));
        }
    }
    Ok(())
}
