//! Tracking - attribution and aggregation of social content activity
//!
//! Records votes, views, opens, creations and comments on posts and
//! comments, and rolls them into time-bucketed counters:
//! - Per-day trackers for every post and comment
//! - Per-month trackers for every user, with one slot per day
//! - Range reads over a date window
//!
//! # Architecture
//!
//! The system is organized into several layers:
//! - **Types**: Events, counters and tracker documents
//! - **Keys**: Sortable, time-encoded tracker addresses
//! - **Attribution**: Pure classification of an event into counter updates
//! - **Engine**: Preallocate-then-increment commit against a store
//! - **Storage**: libSQL and in-memory tracker stores
//! - **Resolver**: Point lookups and range scans for readers
//!
//! # Example
//!
//! ```ignore
//! use tracking_core::{
//!     Actor, LibsqlTrackerStore, MemoryDirectory, RangeQueryResolver, TrackingEngine,
//!     TrackingEvent, Vote,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> tracking_core::Result<()> {
//!     let store = Arc::new(LibsqlTrackerStore::open_local("tracking.db").await?);
//!     let directory = Arc::new(MemoryDirectory::new().with_post("p1", "alice"));
//!     let engine = TrackingEngine::new(store.clone(), directory);
//!
//!     let vote = TrackingEvent::update_post(Actor::user("bob"), "alice", "p1").with_vote(Vote::Up);
//!     engine.record(&vote).await?;
//!
//!     let resolver = RangeQueryResolver::new(store);
//!     let today = resolver.fetch_user_tracker("alice", None, None).await?;
//!     println!("{:?}", today);
//!     Ok(())
//! }
//! ```

pub mod attribution;
pub mod config;
pub mod counters;
pub mod directory;
pub mod engine;
pub mod error;
pub mod keys;
pub mod resolver;
pub mod storage;
pub mod types;

// Re-export commonly used types
pub use attribution::{plan, Attribution, Authorship, Plan, Quadrant};
pub use config::TrackingConfig;
pub use counters::{
    CommentCounter, CommentCounters, PostCounter, PostCounters, UserCounter, UserCounters,
};
pub use directory::{ContentDirectory, MemoryDirectory};
pub use engine::{RecordOutcome, TrackingEngine};
pub use error::{Result, TrackingError};
pub use keys::{build_key, parse_stats_date, TrackerKey};
pub use resolver::{RangeQueryResolver, TrackerSelection};
pub use storage::{
    libsql::{ConnectionMode, LibsqlTrackerStore},
    memory::MemoryTrackerStore,
    TrackerStore,
};
pub use types::{
    Actor, ContentCounters, ContentKind, ContentTracker, Counter, CounterUpdate, OperationKind,
    Target, TrackerKind, TrackerTemplate, TrackingEvent, UserTracker, Vote, MAX_EVENT_COUNT,
};
