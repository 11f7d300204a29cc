//! Common test utilities and helpers

#![allow(dead_code)]

use chrono::NaiveDate;
use std::sync::Arc;
use tracking_core::{
    build_key, storage::test_utils, ContentKind, ContentTracker, MemoryDirectory, TrackerKind,
    TrackerStore, TrackingEngine, UserTracker,
};

pub const ALICE: &str = "alice";
pub const BOB: &str = "bob";
pub const CAROL: &str = "carol";

pub fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid test date")
}

/// Directory where alice wrote post p1 and bob wrote comment c1 on it
pub fn directory() -> Arc<MemoryDirectory> {
    Arc::new(
        MemoryDirectory::new()
            .with_post("p1", ALICE)
            .with_comment("c1", BOB),
    )
}

/// Every store implementation, labelled for assertion messages
pub async fn stores() -> Vec<(&'static str, Arc<dyn TrackerStore>)> {
    let libsql: Arc<dyn TrackerStore> = test_utils::create_test_store()
        .await
        .expect("Failed to create test storage");
    let memory: Arc<dyn TrackerStore> = test_utils::create_memory_store();
    vec![("memory", memory), ("libsql", libsql)]
}

pub fn engine(store: Arc<dyn TrackerStore>) -> TrackingEngine {
    TrackingEngine::new(store, directory())
}

pub async fn user_tracker(store: &Arc<dyn TrackerStore>, user: &str, at: NaiveDate) -> Option<UserTracker> {
    let key = build_key(TrackerKind::User, user, at).expect("valid key");
    store.get_user(&key).await.expect("user lookup")
}

pub async fn content_tracker(
    store: &Arc<dyn TrackerStore>,
    kind: ContentKind,
    id: &str,
    at: NaiveDate,
) -> Option<ContentTracker> {
    let key = build_key(kind.tracker_kind(), id, at).expect("valid key");
    store.get_content(&key).await.expect("content lookup")
}
