//! Core data types for the tracking engine
//!
//! Events flow in as [`TrackingEvent`]s, get classified into
//! [`CounterUpdate`]s, and end up as [`ContentTracker`] and [`UserTracker`]
//! documents in a store.

use crate::counters::{
    CommentCounter, CommentCounters, PostCounter, PostCounters, UserCounter, UserCounters,
};
use crate::error::{Result, TrackingError};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Kind of tracked entity, which also fixes the bucketing grain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackerKind {
    /// Monthly document with day slots
    User,
    /// Daily document
    Post,
    /// Daily document
    Comment,
}

impl TrackerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackerKind::User => "user",
            TrackerKind::Post => "post",
            TrackerKind::Comment => "comment",
        }
    }

    pub fn is_monthly(&self) -> bool {
        matches!(self, TrackerKind::User)
    }
}

impl std::fmt::Display for TrackerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of content item an event is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Post,
    Comment,
}

impl ContentKind {
    pub fn tracker_kind(&self) -> TrackerKind {
        match self {
            ContentKind::Post => TrackerKind::Post,
            ContentKind::Comment => TrackerKind::Comment,
        }
    }
}

impl std::str::FromStr for ContentKind {
    type Err = TrackingError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "post" | "blah" => Ok(ContentKind::Post),
            "comment" => Ok(ContentKind::Comment),
            other => Err(TrackingError::InvalidArgument(format!(
                "unknown content kind '{}'",
                other
            ))),
        }
    }
}

/// Lifecycle operation that produced an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    CreateContent,
    UpdateContent,
    CreateComment,
    UpdateComment,
}

impl OperationKind {
    pub fn content_kind(&self) -> ContentKind {
        match self {
            OperationKind::CreateContent | OperationKind::UpdateContent => ContentKind::Post,
            OperationKind::CreateComment | OperationKind::UpdateComment => ContentKind::Comment,
        }
    }

    pub fn is_create(&self) -> bool {
        matches!(
            self,
            OperationKind::CreateContent | OperationKind::CreateComment
        )
    }
}

impl std::str::FromStr for OperationKind {
    type Err = TrackingError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().replace(['-', '_'], "").as_str() {
            "createcontent" => Ok(OperationKind::CreateContent),
            "updatecontent" => Ok(OperationKind::UpdateContent),
            "createcomment" => Ok(OperationKind::CreateComment),
            "updatecomment" => Ok(OperationKind::UpdateComment),
            other => Err(TrackingError::InvalidArgument(format!(
                "unknown operation '{}'",
                other
            ))),
        }
    }
}

/// Direction of a vote
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Vote {
    Up,
    Down,
}

impl Vote {
    /// Build from the pair of flags a lifecycle manager usually carries.
    ///
    /// Both flags set at once is a malformed event.
    pub fn from_flags(up: bool, down: bool) -> Result<Option<Vote>> {
        match (up, down) {
            (true, true) => Err(TrackingError::InvariantViolation(
                "an event cannot vote both up and down".to_string(),
            )),
            (true, false) => Ok(Some(Vote::Up)),
            (false, true) => Ok(Some(Vote::Down)),
            (false, false) => Ok(None),
        }
    }
}

impl std::str::FromStr for Vote {
    type Err = TrackingError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "up" | "+1" => Ok(Vote::Up),
            "down" | "-1" => Ok(Vote::Down),
            other => Err(TrackingError::InvalidArgument(format!(
                "unknown vote '{}'",
                other
            ))),
        }
    }
}

/// Who performed the action
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "id")]
pub enum Actor {
    User(String),
    /// Unauthenticated visitor; only accepted for post updates
    Anonymous,
}

impl Actor {
    pub fn user(id: impl Into<String>) -> Self {
        Actor::User(id.into())
    }

    pub fn user_id(&self) -> Option<&str> {
        match self {
            Actor::User(id) => Some(id.as_str()),
            Actor::Anonymous => None,
        }
    }
}

/// Largest view or open count a single event may carry
pub const MAX_EVENT_COUNT: u64 = 1_000_000;

/// One user action against a post or comment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingEvent {
    pub operation: OperationKind,
    pub actor: Actor,
    /// Author of the post (post operations) or of the comment (comment operations)
    pub content_owner_id: String,
    pub content_kind: ContentKind,
    pub is_new_content: bool,
    pub content_id: String,
    /// Post a comment belongs to; required for comment operations
    pub parent_content_id: Option<String>,
    pub vote: Option<Vote>,
    pub view_count: u64,
    pub open_count: u64,
}

impl TrackingEvent {
    fn new(
        operation: OperationKind,
        actor: Actor,
        content_owner_id: impl Into<String>,
        content_id: impl Into<String>,
        parent_content_id: Option<String>,
    ) -> Self {
        Self {
            operation,
            actor,
            content_owner_id: content_owner_id.into(),
            content_kind: operation.content_kind(),
            is_new_content: operation.is_create(),
            content_id: content_id.into(),
            parent_content_id,
            vote: None,
            view_count: 0,
            open_count: 0,
        }
    }

    /// A user created a post
    pub fn create_post(author_id: impl Into<String>, post_id: impl Into<String>) -> Self {
        let author_id = author_id.into();
        Self::new(
            OperationKind::CreateContent,
            Actor::User(author_id.clone()),
            author_id,
            post_id,
            None,
        )
    }

    /// Someone voted on, viewed or opened an existing post
    pub fn update_post(
        actor: Actor,
        owner_id: impl Into<String>,
        post_id: impl Into<String>,
    ) -> Self {
        Self::new(OperationKind::UpdateContent, actor, owner_id, post_id, None)
    }

    /// A user commented on a post
    pub fn create_comment(
        author_id: impl Into<String>,
        comment_id: impl Into<String>,
        post_id: impl Into<String>,
    ) -> Self {
        let author_id = author_id.into();
        Self::new(
            OperationKind::CreateComment,
            Actor::User(author_id.clone()),
            author_id,
            comment_id,
            Some(post_id.into()),
        )
    }

    /// A user voted on, viewed or opened an existing comment
    pub fn update_comment(
        actor_id: impl Into<String>,
        comment_author_id: impl Into<String>,
        comment_id: impl Into<String>,
        post_id: impl Into<String>,
    ) -> Self {
        Self::new(
            OperationKind::UpdateComment,
            Actor::User(actor_id.into()),
            comment_author_id,
            comment_id,
            Some(post_id.into()),
        )
    }

    pub fn with_vote(mut self, vote: Vote) -> Self {
        self.vote = Some(vote);
        self
    }

    /// Apply the up/down flag pair, rejecting both at once
    pub fn with_vote_flags(mut self, up: bool, down: bool) -> Result<Self> {
        self.vote = Vote::from_flags(up, down)?;
        Ok(self)
    }

    pub fn with_views(mut self, count: u64) -> Self {
        self.view_count = count;
        self
    }

    pub fn with_opens(mut self, count: u64) -> Self {
        self.open_count = count;
        self
    }

    pub fn has_voted(&self) -> bool {
        self.vote.is_some()
    }

    pub fn has_viewed(&self) -> bool {
        self.view_count > 0
    }

    pub fn has_opened(&self) -> bool {
        self.open_count > 0
    }

    /// Check the structural rules every event must satisfy before classification
    pub fn validate(&self) -> Result<()> {
        if self.content_id.is_empty() {
            return Err(TrackingError::InvariantViolation(
                "event has an empty content id".to_string(),
            ));
        }

        if self.operation.content_kind() != self.content_kind {
            return Err(TrackingError::InvariantViolation(format!(
                "operation {:?} does not apply to content kind {:?}",
                self.operation, self.content_kind
            )));
        }

        if self.operation.is_create() != self.is_new_content {
            return Err(TrackingError::InvariantViolation(format!(
                "operation {:?} disagrees with is_new_content={}",
                self.operation, self.is_new_content
            )));
        }

        match (&self.content_kind, &self.parent_content_id) {
            (ContentKind::Comment, None) => {
                return Err(TrackingError::InvariantViolation(format!(
                    "comment {} has no parent content id",
                    self.content_id
                )))
            }
            (ContentKind::Comment, Some(parent)) if parent.is_empty() => {
                return Err(TrackingError::InvariantViolation(format!(
                    "comment {} has an empty parent content id",
                    self.content_id
                )))
            }
            (ContentKind::Post, Some(parent)) => {
                return Err(TrackingError::InvariantViolation(format!(
                    "post {} cannot have a parent ({})",
                    self.content_id, parent
                )))
            }
            _ => {}
        }

        match &self.actor {
            Actor::Anonymous if self.operation != OperationKind::UpdateContent => {
                return Err(TrackingError::InvariantViolation(format!(
                    "anonymous actor is not allowed for {:?}",
                    self.operation
                )))
            }
            Actor::User(id) if id.is_empty() => {
                return Err(TrackingError::InvariantViolation(
                    "event has an empty actor id".to_string(),
                ))
            }
            _ => {}
        }

        for (field, count) in [("view_count", self.view_count), ("open_count", self.open_count)] {
            if count > MAX_EVENT_COUNT {
                return Err(TrackingError::InvariantViolation(format!(
                    "{} {} on {} exceeds the per-event limit of {}",
                    field, count, self.content_id, MAX_EVENT_COUNT
                )));
            }
        }

        Ok(())
    }
}

/// Entity a counter update is addressed to
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "id")]
pub enum Target {
    User(String),
    Post(String),
    Comment(String),
}

impl Target {
    pub fn kind(&self) -> TrackerKind {
        match self {
            Target::User(_) => TrackerKind::User,
            Target::Post(_) => TrackerKind::Post,
            Target::Comment(_) => TrackerKind::Comment,
        }
    }

    pub fn entity_id(&self) -> &str {
        match self {
            Target::User(id) | Target::Post(id) | Target::Comment(id) => id,
        }
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind(), self.entity_id())
    }
}

/// A counter from the vocabulary of one tracker kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "name")]
pub enum Counter {
    User(UserCounter),
    Post(PostCounter),
    Comment(CommentCounter),
}

impl Counter {
    pub fn kind(&self) -> TrackerKind {
        match self {
            Counter::User(_) => TrackerKind::User,
            Counter::Post(_) => TrackerKind::Post,
            Counter::Comment(_) => TrackerKind::Comment,
        }
    }

    pub fn column(&self) -> &'static str {
        match self {
            Counter::User(c) => c.column(),
            Counter::Post(c) => c.column(),
            Counter::Comment(c) => c.column(),
        }
    }
}

/// A single delta against one counter of one entity.
///
/// The constructors tie the counter vocabulary to the target kind, so a
/// post counter can never be addressed to a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterUpdate {
    target: Target,
    counter: Counter,
    delta: i64,
}

impl CounterUpdate {
    pub fn user(user_id: impl Into<String>, counter: UserCounter, delta: i64) -> Self {
        Self {
            target: Target::User(user_id.into()),
            counter: Counter::User(counter),
            delta,
        }
    }

    pub fn post(post_id: impl Into<String>, counter: PostCounter, delta: i64) -> Self {
        Self {
            target: Target::Post(post_id.into()),
            counter: Counter::Post(counter),
            delta,
        }
    }

    pub fn comment(comment_id: impl Into<String>, counter: CommentCounter, delta: i64) -> Self {
        Self {
            target: Target::Comment(comment_id.into()),
            counter: Counter::Comment(counter),
            delta,
        }
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn counter(&self) -> Counter {
        self.counter
    }

    pub fn delta(&self) -> i64 {
        self.delta
    }
}

/// What a store needs to preallocate a missing tracker
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum TrackerTemplate {
    User { user_id: String },
    Post { post_id: String, author_id: String },
    Comment { comment_id: String, author_id: String },
}

impl TrackerTemplate {
    pub fn kind(&self) -> TrackerKind {
        match self {
            TrackerTemplate::User { .. } => TrackerKind::User,
            TrackerTemplate::Post { .. } => TrackerKind::Post,
            TrackerTemplate::Comment { .. } => TrackerKind::Comment,
        }
    }

    pub fn entity_id(&self) -> &str {
        match self {
            TrackerTemplate::User { user_id } => user_id,
            TrackerTemplate::Post { post_id, .. } => post_id,
            TrackerTemplate::Comment { comment_id, .. } => comment_id,
        }
    }

    pub fn target(&self) -> Target {
        match self {
            TrackerTemplate::User { user_id } => Target::User(user_id.clone()),
            TrackerTemplate::Post { post_id, .. } => Target::Post(post_id.clone()),
            TrackerTemplate::Comment { comment_id, .. } => Target::Comment(comment_id.clone()),
        }
    }
}

/// Counters of a daily content tracker, by content kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "counters")]
pub enum ContentCounters {
    Post(PostCounters),
    Comment(CommentCounters),
}

impl ContentCounters {
    pub fn zero(kind: ContentKind) -> Self {
        match kind {
            ContentKind::Post => ContentCounters::Post(PostCounters::default()),
            ContentKind::Comment => ContentCounters::Comment(CommentCounters::default()),
        }
    }

    pub fn as_post(&self) -> Option<&PostCounters> {
        match self {
            ContentCounters::Post(c) => Some(c),
            ContentCounters::Comment(_) => None,
        }
    }

    pub fn as_comment(&self) -> Option<&CommentCounters> {
        match self {
            ContentCounters::Comment(c) => Some(c),
            ContentCounters::Post(_) => None,
        }
    }
}

/// One post or comment's counters for one UTC day
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentTracker {
    pub id: String,
    pub kind: ContentKind,
    pub content_id: String,
    pub owner_id: String,
    pub day: NaiveDate,
    pub counters: ContentCounters,
}

/// One user's counters for one UTC month, with a slot per day
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserTracker {
    pub id: String,
    pub user_id: String,
    /// First day of the month
    pub month: NaiveDate,
    pub days_in_month: u32,
    pub monthly: UserCounters,
    /// `days[0]` is the 1st of the month
    pub days: Vec<UserCounters>,
}

impl UserTracker {
    /// Zeroed tracker with every day slot allocated
    pub fn zero(id: impl Into<String>, user_id: impl Into<String>, month: NaiveDate, days_in_month: u32) -> Self {
        Self {
            id: id.into(),
            user_id: user_id.into(),
            month,
            days_in_month,
            monthly: UserCounters::default(),
            days: vec![UserCounters::default(); days_in_month as usize],
        }
    }

    /// Day slot for a 1-based day of the month
    pub fn day(&self, day_of_month: u32) -> Option<&UserCounters> {
        day_of_month
            .checked_sub(1)
            .and_then(|i| self.days.get(i as usize))
    }

    /// Sum of one counter across every day slot
    pub fn daily_total(&self, counter: UserCounter) -> i64 {
        self.days.iter().map(|d| d.get(counter)).sum()
    }

    /// Whether every monthly counter equals the sum of its day slots
    pub fn is_consistent(&self) -> bool {
        self.days.len() == self.days_in_month as usize
            && UserCounter::ALL
                .iter()
                .all(|c| self.monthly.get(*c) == self.daily_total(*c))
    }
}
