//! Read side: resolve an optional date window into a point lookup or a
//! range scan.

use crate::error::{Result, TrackingError};
use crate::keys::{build_key, same_period};
use crate::storage::TrackerStore;
use crate::types::{ContentKind, ContentTracker, TrackerKind, UserTracker};
use chrono::{NaiveDate, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// Default bound on how many days one request may span
pub const DEFAULT_MAX_RANGE_DAYS: u32 = 366;

/// Trackers selected by a read request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "selection", content = "trackers")]
pub enum TrackerSelection<T> {
    /// Exact key lookup; `None` when nothing was recorded in that period
    Point(Option<T>),
    /// Inclusive key range, ascending; possibly empty
    Range(Vec<T>),
}

impl<T> TrackerSelection<T> {
    pub fn into_vec(self) -> Vec<T> {
        match self {
            TrackerSelection::Point(tracker) => tracker.into_iter().collect(),
            TrackerSelection::Range(trackers) => trackers,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            TrackerSelection::Point(tracker) => tracker.iter().count(),
            TrackerSelection::Range(trackers) => trackers.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Date window after defaulting and validation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    Point(NaiveDate),
    Range(NaiveDate, NaiveDate),
}

/// Resolves read requests against a [`TrackerStore`]
pub struct RangeQueryResolver {
    store: Arc<dyn TrackerStore>,
    max_range_days: u32,
}

impl RangeQueryResolver {
    pub fn new(store: Arc<dyn TrackerStore>) -> Self {
        Self::with_max_range_days(store, DEFAULT_MAX_RANGE_DAYS)
    }

    pub fn with_max_range_days(store: Arc<dyn TrackerStore>, max_range_days: u32) -> Self {
        Self {
            store,
            max_range_days,
        }
    }

    /// Turn optional `start`/`end` dates into a point or a range.
    ///
    /// No dates means the current period; `start` alone runs to `today`.
    pub fn resolve_window(
        &self,
        kind: TrackerKind,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
        today: NaiveDate,
    ) -> Result<Window> {
        let (start, end) = match (start, end) {
            (None, Some(end)) => {
                return Err(TrackingError::InvalidRequest(format!(
                    "end date {} given without a start date",
                    end
                )))
            }
            (None, None) => return Ok(Window::Point(today)),
            (Some(start), None) => (start, today),
            (Some(start), Some(end)) => (start, end),
        };

        if start > end {
            return Err(TrackingError::InvalidRequest(format!(
                "start date {} is after end date {}",
                start, end
            )));
        }

        if same_period(kind, start, end) {
            return Ok(Window::Point(start));
        }

        let days = (end - start).num_days() + 1;
        if days > i64::from(self.max_range_days) {
            return Err(TrackingError::InvalidRequest(format!(
                "window {}..={} spans {} days, more than the allowed {}",
                start, end, days, self.max_range_days
            )));
        }

        Ok(Window::Range(start, end))
    }

    /// Trackers of one post or comment over an optional window
    pub async fn fetch_content_tracker(
        &self,
        kind: ContentKind,
        content_id: &str,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<TrackerSelection<ContentTracker>> {
        self.fetch_content_tracker_at(kind, content_id, start, end, Utc::now().date_naive())
            .await
    }

    pub async fn fetch_content_tracker_at(
        &self,
        kind: ContentKind,
        content_id: &str,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
        today: NaiveDate,
    ) -> Result<TrackerSelection<ContentTracker>> {
        if content_id.is_empty() {
            return Err(TrackingError::InvalidRequest(
                "missing content id".to_string(),
            ));
        }

        let tracker_kind = kind.tracker_kind();
        match self.resolve_window(tracker_kind, start, end, today)? {
            Window::Point(day) => {
                let key = build_key(tracker_kind, content_id, day)?;
                debug!("Point lookup {} {}", tracker_kind, key);
                Ok(TrackerSelection::Point(self.store.get_content(&key).await?))
            }
            Window::Range(from, to) => {
                let from = build_key(tracker_kind, content_id, from)?;
                let to = build_key(tracker_kind, content_id, to)?;
                debug!("Range scan {} {}..={}", tracker_kind, from, to);
                Ok(TrackerSelection::Range(
                    self.store
                        .range_content(kind, content_id, &from, &to)
                        .await?,
                ))
            }
        }
    }

    /// Monthly trackers of one user over an optional window
    pub async fn fetch_user_tracker(
        &self,
        user_id: &str,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<TrackerSelection<UserTracker>> {
        self.fetch_user_tracker_at(user_id, start, end, Utc::now().date_naive())
            .await
    }

    pub async fn fetch_user_tracker_at(
        &self,
        user_id: &str,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
        today: NaiveDate,
    ) -> Result<TrackerSelection<UserTracker>> {
        if user_id.is_empty() {
            return Err(TrackingError::InvalidRequest("missing user id".to_string()));
        }

        match self.resolve_window(TrackerKind::User, start, end, today)? {
            Window::Point(day) => {
                let key = build_key(TrackerKind::User, user_id, day)?;
                debug!("Point lookup user {}", key);
                Ok(TrackerSelection::Point(self.store.get_user(&key).await?))
            }
            Window::Range(from, to) => {
                let from = build_key(TrackerKind::User, user_id, from)?;
                let to = build_key(TrackerKind::User, user_id, to)?;
                debug!("Range scan user {}..={}", from, to);
                Ok(TrackerSelection::Range(
                    self.store.range_user(user_id, &from, &to).await?,
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryTrackerStore;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn resolver() -> RangeQueryResolver {
        RangeQueryResolver::with_max_range_days(Arc::new(MemoryTrackerStore::new()), 31)
    }

    #[test]
    fn test_window_rules() {
        let r = resolver();
        let today = date(2024, 10, 17);

        assert!(matches!(
            r.resolve_window(TrackerKind::Post, None, Some(today), today),
            Err(TrackingError::InvalidRequest(_))
        ));
        assert_eq!(
            r.resolve_window(TrackerKind::Post, None, None, today).unwrap(),
            Window::Point(today)
        );
        assert_eq!(
            r.resolve_window(TrackerKind::Post, Some(date(2024, 10, 10)), None, today)
                .unwrap(),
            Window::Range(date(2024, 10, 10), today)
        );
        assert!(matches!(
            r.resolve_window(TrackerKind::Post, Some(date(2024, 10, 12)), Some(date(2024, 10, 11)), today),
            Err(TrackingError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_same_period_is_point() {
        let r = resolver();
        let today = date(2024, 10, 17);
        assert_eq!(
            r.resolve_window(TrackerKind::Comment, Some(today), Some(today), today)
                .unwrap(),
            Window::Point(today)
        );
        assert_eq!(
            r.resolve_window(TrackerKind::User, Some(date(2024, 9, 1)), Some(date(2024, 9, 30)), today)
                .unwrap(),
            Window::Point(date(2024, 9, 1))
        );
    }

    #[test]
    fn test_window_is_bounded() {
        let r = resolver();
        let today = date(2024, 10, 17);
        assert!(r
            .resolve_window(TrackerKind::Post, Some(date(2024, 9, 17)), Some(today), today)
            .is_ok());
        assert!(matches!(
            r.resolve_window(TrackerKind::Post, Some(date(2024, 9, 16)), Some(today), today),
            Err(TrackingError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_ids_are_invalid_requests() {
        let r = resolver();
        assert!(matches!(
            r.fetch_user_tracker("", None, None).await,
            Err(TrackingError::InvalidRequest(_))
        ));
        assert!(matches!(
            r.fetch_content_tracker(ContentKind::Post, "", None, None).await,
            Err(TrackingError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_range_is_not_an_error() {
        let r = resolver();
        let today = date(2024, 10, 17);
        let selection = r
            .fetch_content_tracker_at(ContentKind::Post, "p1", Some(date(2024, 10, 1)), None, today)
            .await
            .unwrap();
        assert_eq!(selection, TrackerSelection::Range(Vec::new()));
        assert!(selection.is_empty());
    }
}
