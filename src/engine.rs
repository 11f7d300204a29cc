//! Tracking engine
//!
//! Turns one [`TrackingEvent`] into committed counter increments:
//! validate, resolve authors, classify, preallocate every tracker the event
//! touches, then run one atomic increment per tracker.

use crate::attribution::{self, Attribution, Authorship, Quadrant};
use crate::directory::ContentDirectory;
use crate::error::{Result, TrackingError};
use crate::keys::{build_key, TrackerKey};
use crate::storage::TrackerStore;
use crate::types::{CounterUpdate, OperationKind, TrackerTemplate, TrackingEvent};
use chrono::{NaiveDate, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Result of recording one event
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecordOutcome {
    /// Keys of every tracker the event touched, in commit order
    pub keys: Vec<String>,
    /// Keys whose increments were committed
    pub applied: Vec<String>,
    pub updates: Vec<CounterUpdate>,
    pub attributions: Vec<Attribution>,
    /// The event was classified as not countable and nothing was written
    pub rejected: bool,
}

/// One tracker's share of an event
struct KeyedBatch {
    key: TrackerKey,
    template: TrackerTemplate,
    updates: Vec<CounterUpdate>,
}

/// Attribution and aggregation engine
pub struct TrackingEngine {
    store: Arc<dyn TrackerStore>,
    directory: Arc<dyn ContentDirectory>,
}

impl TrackingEngine {
    pub fn new(store: Arc<dyn TrackerStore>, directory: Arc<dyn ContentDirectory>) -> Self {
        Self { store, directory }
    }

    pub fn store(&self) -> Arc<dyn TrackerStore> {
        Arc::clone(&self.store)
    }

    /// Record an event against today's (UTC) trackers
    pub async fn record(&self, event: &TrackingEvent) -> Result<RecordOutcome> {
        self.record_at(event, Utc::now().date_naive()).await
    }

    /// Record an event against the trackers covering `at`
    pub async fn record_at(&self, event: &TrackingEvent, at: NaiveDate) -> Result<RecordOutcome> {
        if let Err(e) = event.validate() {
            error!("Rejected malformed event on {}: {}", event.content_id, e);
            return Err(e);
        }

        let authors = self.resolve_authors(event).await?;
        let plan = attribution::plan(event, &authors).map_err(|e| {
            if let TrackingError::InvariantViolation(_) = e {
                error!("Classification failed for {}: {}", event.content_id, e);
            }
            e
        })?;

        if plan.is_unsupported() {
            warn!(
                "{:?} on {} by {:?} is not counted",
                event.operation, event.content_id, event.actor
            );
            return Ok(RecordOutcome {
                attributions: plan.attributions,
                rejected: true,
                ..Default::default()
            });
        }

        for attribution in &plan.attributions {
            if attribution.quadrant == Quadrant::SelfOnOwn && event.has_voted() {
                warn!(
                    "Ignoring self vote by {} on {}",
                    attribution.user_id, event.content_id
                );
            }
        }

        let mut batches = Vec::with_capacity(plan.trackers.len());
        for template in &plan.trackers {
            let key = build_key(template.kind(), template.entity_id(), at)?;
            batches.push(KeyedBatch {
                key,
                template: template.clone(),
                updates: plan.updates_for(&template.target()),
            });
        }

        for batch in &batches {
            let created = self
                .store
                .ensure_exists(&batch.key, &batch.template)
                .await
                .map_err(|e| with_applied(e, &batch.key, &[]))?;
            if created {
                debug!("Preallocated {} tracker {}", batch.key.kind(), batch.key);
            }
        }

        let mut applied: Vec<String> = Vec::new();
        for batch in &batches {
            if batch.updates.is_empty() {
                continue;
            }
            if let Err(e) = self.store.increment(&batch.key, &batch.updates).await {
                if !applied.is_empty() {
                    error!(
                        "Partial commit: increment on {} failed after {:?} were applied: {}",
                        batch.key, applied, e
                    );
                }
                return Err(with_applied(e, &batch.key, &applied));
            }
            debug!("Applied {} updates to {}", batch.updates.len(), batch.key);
            applied.push(batch.key.id().to_string());
        }

        info!(
            "Recorded {:?} on {}: {} updates across {} trackers",
            event.operation,
            event.content_id,
            plan.updates.len(),
            batches.len()
        );

        Ok(RecordOutcome {
            keys: batches.iter().map(|b| b.key.id().to_string()).collect(),
            applied,
            updates: plan.updates,
            attributions: plan.attributions,
            rejected: false,
        })
    }

    /// Look up the authors classification needs
    async fn resolve_authors(&self, event: &TrackingEvent) -> Result<Authorship> {
        let parent_owner = match (&event.operation, &event.parent_content_id) {
            (OperationKind::CreateComment | OperationKind::UpdateComment, Some(post_id)) => Some(
                self.directory
                    .post_author(post_id)
                    .await?
                    .ok_or_else(|| {
                        TrackingError::Lookup(format!("author of post {} not found", post_id))
                    })?,
            ),
            _ => None,
        };

        let content_owner = match event.operation {
            OperationKind::CreateContent | OperationKind::CreateComment => event
                .actor
                .user_id()
                .map(str::to_string)
                .unwrap_or_default(),
            OperationKind::UpdateContent => {
                if event.content_owner_id.is_empty() {
                    return Err(TrackingError::Lookup(format!(
                        "owner of post {} not given",
                        event.content_id
                    )));
                }
                event.content_owner_id.clone()
            }
            OperationKind::UpdateComment => {
                let author = self
                    .directory
                    .comment_author(&event.content_id)
                    .await?
                    .ok_or_else(|| {
                        TrackingError::Lookup(format!(
                            "author of comment {} not found",
                            event.content_id
                        ))
                    })?;
                if !event.content_owner_id.is_empty() && event.content_owner_id != author {
                    warn!(
                        "Event names {} as author of comment {} but the directory says {}",
                        event.content_owner_id, event.content_id, author
                    );
                }
                author
            }
        };

        Ok(Authorship {
            content_owner,
            parent_owner,
        })
    }
}

/// Attach the failing key and the keys already committed to a store error
fn with_applied(err: TrackingError, key: &TrackerKey, applied: &[String]) -> TrackingError {
    match err {
        TrackingError::Storage { message, .. } | TrackingError::Database(message) => {
            TrackingError::Storage {
                key: key.id().to_string(),
                message,
                applied: applied.to_vec(),
            }
        }
        other => other,
    }
}
