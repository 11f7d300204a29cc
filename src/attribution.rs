//! Attribution of events to trackers
//!
//! [`plan`] is a pure function: given a validated event and the authors it
//! involves, it decides which trackers are touched, in which role
//! ([`Quadrant`]), and with which counter deltas. Nothing here talks to
//! storage.

use crate::counters::{CommentCounter, PostCounter, UserCounter};
use crate::error::{Result, TrackingError};
use crate::types::{
    Actor, CounterUpdate, OperationKind, Target, TrackerTemplate, TrackingEvent, Vote,
};
use serde::{Deserialize, Serialize};

/// Role a tracked user plays in an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quadrant {
    /// The actor acts on content they own
    SelfOnOwn,
    /// The actor acts on someone else's content
    ActorOnOthers,
    /// The owner of content someone else acted on
    OwnerReceiving,
    /// A combination that is deliberately not counted
    Unsupported,
}

/// One user tracker and the role it plays
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribution {
    pub user_id: String,
    pub quadrant: Quadrant,
}

impl Attribution {
    fn new(user_id: &str, quadrant: Quadrant) -> Self {
        Self {
            user_id: user_id.to_string(),
            quadrant,
        }
    }
}

/// Authors an event involves, resolved before classification
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Authorship {
    /// Author of the post (post operations) or of the comment (comment operations)
    pub content_owner: String,
    /// Author of a comment's parent post
    pub parent_owner: Option<String>,
}

/// Everything one event does to the trackers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    pub attributions: Vec<Attribution>,
    /// Trackers to preallocate, in commit order
    pub trackers: Vec<TrackerTemplate>,
    pub updates: Vec<CounterUpdate>,
}

impl Plan {
    /// Whether the event was classified as not countable
    pub fn is_unsupported(&self) -> bool {
        self.attributions
            .iter()
            .any(|a| a.quadrant == Quadrant::Unsupported)
    }

    /// Updates addressed to one tracker
    pub fn updates_for(&self, target: &Target) -> Vec<CounterUpdate> {
        self.updates
            .iter()
            .filter(|u| u.target() == target)
            .cloned()
            .collect()
    }

    fn track(&mut self, template: TrackerTemplate) {
        if !self.trackers.contains(&template) {
            self.trackers.push(template);
        }
    }

    fn user(&mut self, user_id: &str, quadrant: Quadrant, counters: &[(UserCounter, i64)]) {
        self.attributions.push(Attribution::new(user_id, quadrant));
        self.track(TrackerTemplate::User {
            user_id: user_id.to_string(),
        });
        for (counter, delta) in counters {
            if *delta != 0 {
                self.updates
                    .push(CounterUpdate::user(user_id, *counter, *delta));
            }
        }
    }

    fn post(&mut self, post_id: &str, author_id: &str, counters: &[(PostCounter, i64)]) {
        self.track(TrackerTemplate::Post {
            post_id: post_id.to_string(),
            author_id: author_id.to_string(),
        });
        for (counter, delta) in counters {
            if *delta != 0 {
                self.updates.push(CounterUpdate::post(post_id, *counter, *delta));
            }
        }
    }

    fn comment(&mut self, comment_id: &str, author_id: &str, counters: &[(CommentCounter, i64)]) {
        self.track(TrackerTemplate::Comment {
            comment_id: comment_id.to_string(),
            author_id: author_id.to_string(),
        });
        for (counter, delta) in counters {
            if *delta != 0 {
                self.updates
                    .push(CounterUpdate::comment(comment_id, *counter, *delta));
            }
        }
    }
}

/// What kind of thing was voted on, viewed or opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Subject {
    Content,
    Comment,
}

/// Vote, view and open activity carried by one event
#[derive(Debug, Clone, Copy, Default)]
struct Activity {
    vote: Option<Vote>,
    views: i64,
    opens: i64,
}

impl Activity {
    fn of(event: &TrackingEvent) -> Result<Self> {
        Ok(Self {
            vote: event.vote,
            views: to_delta(event.view_count, "view_count")?,
            opens: to_delta(event.open_count, "open_count")?,
        })
    }

    fn vote_only(self) -> Self {
        Self {
            vote: self.vote,
            views: 0,
            opens: 0,
        }
    }

    fn up(&self) -> i64 {
        (self.vote == Some(Vote::Up)) as i64
    }

    fn down(&self) -> i64 {
        (self.vote == Some(Vote::Down)) as i64
    }

    fn voted(&self) -> i64 {
        self.vote.is_some() as i64
    }
}

fn to_delta(count: u64, field: &str) -> Result<i64> {
    i64::try_from(count)
        .map_err(|_| TrackingError::InvariantViolation(format!("{} {} is out of range", field, count)))
}

/// User counters for one quadrant of a vote/view/open interaction
fn interaction_counters(
    quadrant: Quadrant,
    subject: Subject,
    activity: Activity,
) -> Vec<(UserCounter, i64)> {
    use UserCounter::*;

    match (quadrant, subject) {
        (Quadrant::ActorOnOthers, Subject::Content) => vec![
            (VotesForOthers, activity.voted()),
            (UpVotesForOthers, activity.up()),
            (DownVotesForOthers, activity.down()),
            (ViewsOfOthers, activity.views),
            (OpensOfOthers, activity.opens),
        ],
        (Quadrant::OwnerReceiving, Subject::Content) => vec![
            (VotesForOwned, activity.voted()),
            (UpVotesForOwned, activity.up()),
            (DownVotesForOwned, activity.down()),
            (ViewsOfOwned, activity.views),
            (OpensOfOwned, activity.opens),
        ],
        // Self votes are never counted
        (Quadrant::SelfOnOwn, Subject::Content) => vec![
            (ViewsOfOwnedBySelf, activity.views),
            (OpensOfOwnedBySelf, activity.opens),
        ],
        (Quadrant::ActorOnOthers, Subject::Comment) => vec![
            (VotesForOthersComments, activity.voted()),
            (UpVotesForOthersComments, activity.up()),
            (DownVotesForOthersComments, activity.down()),
            (ViewsOfOthersComments, activity.views),
            (OpensOfOthersComments, activity.opens),
        ],
        (Quadrant::OwnerReceiving, Subject::Comment) => vec![
            (VotesForOwnedComments, activity.voted()),
            (UpVotesForOwnedComments, activity.up()),
            (DownVotesForOwnedComments, activity.down()),
            (ViewsOfOwnedComments, activity.views),
            (OpensOfOwnedComments, activity.opens),
        ],
        (Quadrant::SelfOnOwn, Subject::Comment) | (Quadrant::Unsupported, _) => Vec::new(),
    }
}

fn actor_id(event: &TrackingEvent) -> Result<&str> {
    event.actor.user_id().ok_or_else(|| {
        TrackingError::InvariantViolation(format!(
            "{:?} requires an identified actor",
            event.operation
        ))
    })
}

fn parent_id(event: &TrackingEvent) -> Result<&str> {
    event.parent_content_id.as_deref().ok_or_else(|| {
        TrackingError::InvariantViolation(format!(
            "comment {} has no parent content id",
            event.content_id
        ))
    })
}

fn parent_owner(authors: &Authorship) -> Result<&str> {
    authors
        .parent_owner
        .as_deref()
        .ok_or_else(|| TrackingError::Lookup("author of parent post was not resolved".to_string()))
}

/// Classify an event and derive its counter updates
pub fn plan(event: &TrackingEvent, authors: &Authorship) -> Result<Plan> {
    let activity = Activity::of(event)?;
    let mut plan = Plan::default();

    match event.operation {
        OperationKind::CreateContent => {
            let actor = actor_id(event)?;
            plan.user(
                actor,
                Quadrant::SelfOnOwn,
                &[(UserCounter::ContentItemsCreated, 1)],
            );
            plan.post(&event.content_id, actor, &[]);
        }

        OperationKind::UpdateContent => {
            let owner = authors.content_owner.as_str();
            if owner.is_empty() {
                return Err(TrackingError::Lookup(format!(
                    "owner of post {} was not resolved",
                    event.content_id
                )));
            }
            match &event.actor {
                Actor::User(actor) if actor == owner => {
                    plan.user(
                        actor,
                        Quadrant::SelfOnOwn,
                        &interaction_counters(Quadrant::SelfOnOwn, Subject::Content, activity),
                    );
                    plan.post(
                        &event.content_id,
                        owner,
                        &[
                            (PostCounter::Views, activity.views),
                            (PostCounter::Opens, activity.opens),
                        ],
                    );
                }
                Actor::User(actor) => {
                    plan.user(
                        actor,
                        Quadrant::ActorOnOthers,
                        &interaction_counters(Quadrant::ActorOnOthers, Subject::Content, activity),
                    );
                    plan.user(
                        owner,
                        Quadrant::OwnerReceiving,
                        &interaction_counters(Quadrant::OwnerReceiving, Subject::Content, activity),
                    );
                    plan.post(&event.content_id, owner, &post_activity(activity));
                }
                Actor::Anonymous => {
                    plan.user(
                        owner,
                        Quadrant::OwnerReceiving,
                        &interaction_counters(Quadrant::OwnerReceiving, Subject::Content, activity),
                    );
                    plan.post(&event.content_id, owner, &post_activity(activity));
                }
            }
        }

        OperationKind::CreateComment => {
            let actor = actor_id(event)?;
            let post_id = parent_id(event)?;
            let post_owner = parent_owner(authors)?;
            let carried = activity.vote_only();

            if actor == post_owner {
                plan.user(
                    actor,
                    Quadrant::SelfOnOwn,
                    &[
                        (UserCounter::CommentsCreated, 1),
                        (UserCounter::CommentsCreatedOnOwnContentBySelf, 1),
                    ],
                );
                plan.post(post_id, post_owner, &[(PostCounter::CommentsReceived, 1)]);
                plan.comment(
                    &event.content_id,
                    actor,
                    &[
                        (CommentCounter::Views, activity.views),
                        (CommentCounter::Opens, activity.opens),
                    ],
                );
            } else {
                let mut actor_counters = vec![
                    (UserCounter::CommentsCreated, 1),
                    (UserCounter::CommentsOnOthersContent, 1),
                ];
                actor_counters.extend(interaction_counters(
                    Quadrant::ActorOnOthers,
                    Subject::Content,
                    carried,
                ));
                plan.user(actor, Quadrant::ActorOnOthers, &actor_counters);

                let mut owner_counters = vec![(UserCounter::CommentsOnOwnedContent, 1)];
                owner_counters.extend(interaction_counters(
                    Quadrant::OwnerReceiving,
                    Subject::Content,
                    carried,
                ));
                plan.user(post_owner, Quadrant::OwnerReceiving, &owner_counters);

                plan.post(
                    post_id,
                    post_owner,
                    &[
                        (PostCounter::CommentsReceived, 1),
                        (PostCounter::UpVotes, carried.up()),
                        (PostCounter::DownVotes, carried.down()),
                    ],
                );
                plan.comment(
                    &event.content_id,
                    actor,
                    &[
                        (CommentCounter::ParentUpVotes, carried.up()),
                        (CommentCounter::ParentDownVotes, carried.down()),
                        (CommentCounter::Views, activity.views),
                        (CommentCounter::Opens, activity.opens),
                    ],
                );
            }
        }

        OperationKind::UpdateComment => {
            let actor = actor_id(event)?;
            let comment_author = authors.content_owner.as_str();
            let post_owner = parent_owner(authors)?;

            if actor == comment_author || actor == post_owner {
                plan.attributions
                    .push(Attribution::new(actor, Quadrant::Unsupported));
                return Ok(plan);
            }

            plan.user(
                actor,
                Quadrant::ActorOnOthers,
                &interaction_counters(Quadrant::ActorOnOthers, Subject::Comment, activity),
            );
            plan.user(
                comment_author,
                Quadrant::OwnerReceiving,
                &interaction_counters(Quadrant::OwnerReceiving, Subject::Comment, activity),
            );
            plan.comment(
                &event.content_id,
                comment_author,
                &[
                    (CommentCounter::UpVotes, activity.up()),
                    (CommentCounter::DownVotes, activity.down()),
                    (CommentCounter::Views, activity.views),
                    (CommentCounter::Opens, activity.opens),
                ],
            );
        }
    }

    Ok(plan)
}

fn post_activity(activity: Activity) -> [(PostCounter, i64); 4] {
    [
        (PostCounter::UpVotes, activity.up()),
        (PostCounter::DownVotes, activity.down()),
        (PostCounter::Views, activity.views),
        (PostCounter::Opens, activity.opens),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owned_by(owner: &str) -> Authorship {
        Authorship {
            content_owner: owner.to_string(),
            parent_owner: None,
        }
    }

    fn comment_authors(comment_author: &str, post_owner: &str) -> Authorship {
        Authorship {
            content_owner: comment_author.to_string(),
            parent_owner: Some(post_owner.to_string()),
        }
    }

    fn has(plan: &Plan, update: CounterUpdate) -> bool {
        plan.updates.contains(&update)
    }

    #[test]
    fn test_create_content_counts_one_item() {
        let event = TrackingEvent::create_post("u1", "p1");
        let plan = plan(&event, &owned_by("u1")).unwrap();

        assert_eq!(
            plan.updates,
            vec![CounterUpdate::user("u1", UserCounter::ContentItemsCreated, 1)]
        );
        assert_eq!(plan.trackers.len(), 2);
        assert!(plan.trackers.contains(&TrackerTemplate::Post {
            post_id: "p1".into(),
            author_id: "u1".into()
        }));
    }

    #[test]
    fn test_vote_on_others_post() {
        let event = TrackingEvent::update_post(Actor::user("u1"), "u2", "p1")
            .with_vote(Vote::Up)
            .with_views(3);
        let plan = plan(&event, &owned_by("u2")).unwrap();

        assert!(has(&plan, CounterUpdate::user("u1", UserCounter::VotesForOthers, 1)));
        assert!(has(&plan, CounterUpdate::user("u1", UserCounter::UpVotesForOthers, 1)));
        assert!(has(&plan, CounterUpdate::user("u1", UserCounter::ViewsOfOthers, 3)));
        assert!(has(&plan, CounterUpdate::user("u2", UserCounter::VotesForOwned, 1)));
        assert!(has(&plan, CounterUpdate::user("u2", UserCounter::UpVotesForOwned, 1)));
        assert!(has(&plan, CounterUpdate::user("u2", UserCounter::ViewsOfOwned, 3)));
        assert!(has(&plan, CounterUpdate::post("p1", PostCounter::UpVotes, 1)));
        assert!(has(&plan, CounterUpdate::post("p1", PostCounter::Views, 3)));
        assert!(!has(&plan, CounterUpdate::user("u1", UserCounter::DownVotesForOthers, 1)));
        assert_eq!(
            plan.attributions.iter().map(|a| a.quadrant).collect::<Vec<_>>(),
            vec![Quadrant::ActorOnOthers, Quadrant::OwnerReceiving]
        );
    }

    #[test]
    fn test_self_vote_is_never_counted() {
        let event = TrackingEvent::update_post(Actor::user("u1"), "u1", "p1")
            .with_vote(Vote::Down)
            .with_views(2)
            .with_opens(1);
        let plan = plan(&event, &owned_by("u1")).unwrap();

        assert_eq!(
            plan.updates,
            vec![
                CounterUpdate::user("u1", UserCounter::ViewsOfOwnedBySelf, 2),
                CounterUpdate::user("u1", UserCounter::OpensOfOwnedBySelf, 1),
                CounterUpdate::post("p1", PostCounter::Views, 2),
                CounterUpdate::post("p1", PostCounter::Opens, 1),
            ]
        );
    }

    #[test]
    fn test_anonymous_view_credits_owner_only() {
        let event = TrackingEvent::update_post(Actor::Anonymous, "u2", "p1").with_views(1);
        let plan = plan(&event, &owned_by("u2")).unwrap();

        assert_eq!(
            plan.updates,
            vec![
                CounterUpdate::user("u2", UserCounter::ViewsOfOwned, 1),
                CounterUpdate::post("p1", PostCounter::Views, 1),
            ]
        );
        assert_eq!(plan.attributions.len(), 1);
    }

    #[test]
    fn test_comment_on_own_post() {
        let event = TrackingEvent::create_comment("u1", "c1", "p1").with_vote(Vote::Up);
        let plan = plan(&event, &comment_authors("u1", "u1")).unwrap();

        assert_eq!(
            plan.updates,
            vec![
                CounterUpdate::user("u1", UserCounter::CommentsCreated, 1),
                CounterUpdate::user("u1", UserCounter::CommentsCreatedOnOwnContentBySelf, 1),
                CounterUpdate::post("p1", PostCounter::CommentsReceived, 1),
            ]
        );
        // comment tracker is preallocated even without increments
        assert!(plan.trackers.contains(&TrackerTemplate::Comment {
            comment_id: "c1".into(),
            author_id: "u1".into()
        }));
    }

    #[test]
    fn test_comment_with_vote_on_others_post() {
        let event = TrackingEvent::create_comment("u1", "c1", "p1").with_vote(Vote::Down);
        let plan = plan(&event, &comment_authors("u1", "u2")).unwrap();

        for update in [
            CounterUpdate::user("u1", UserCounter::CommentsCreated, 1),
            CounterUpdate::user("u1", UserCounter::CommentsOnOthersContent, 1),
            CounterUpdate::user("u1", UserCounter::VotesForOthers, 1),
            CounterUpdate::user("u1", UserCounter::DownVotesForOthers, 1),
            CounterUpdate::user("u2", UserCounter::CommentsOnOwnedContent, 1),
            CounterUpdate::user("u2", UserCounter::VotesForOwned, 1),
            CounterUpdate::user("u2", UserCounter::DownVotesForOwned, 1),
            CounterUpdate::post("p1", PostCounter::CommentsReceived, 1),
            CounterUpdate::post("p1", PostCounter::DownVotes, 1),
            CounterUpdate::comment("c1", CommentCounter::ParentDownVotes, 1),
        ] {
            assert!(has(&plan, update.clone()), "missing {:?}", update);
        }
        assert_eq!(plan.updates.len(), 10);
    }

    #[test]
    fn test_update_comment_by_author_or_post_owner_is_unsupported() {
        let event = TrackingEvent::update_comment("u1", "u1", "c1", "p1").with_vote(Vote::Up);
        let plan_author = plan(&event, &comment_authors("u1", "u2")).unwrap();
        assert!(plan_author.updates.is_empty());
        assert!(plan_author.trackers.is_empty());
        assert!(plan_author.is_unsupported());

        let event = TrackingEvent::update_comment("u2", "u1", "c1", "p1").with_vote(Vote::Up);
        let plan_owner = plan(&event, &comment_authors("u1", "u2")).unwrap();
        assert!(plan_owner.updates.is_empty());
        assert!(plan_owner.is_unsupported());
    }

    #[test]
    fn test_update_comment_by_third_party() {
        let event = TrackingEvent::update_comment("u3", "u1", "c1", "p1")
            .with_vote(Vote::Up)
            .with_opens(2);
        let plan = plan(&event, &comment_authors("u1", "u2")).unwrap();

        assert!(has(&plan, CounterUpdate::user("u3", UserCounter::VotesForOthersComments, 1)));
        assert!(has(&plan, CounterUpdate::user("u3", UserCounter::UpVotesForOthersComments, 1)));
        assert!(has(&plan, CounterUpdate::user("u3", UserCounter::OpensOfOthersComments, 2)));
        assert!(has(&plan, CounterUpdate::user("u1", UserCounter::VotesForOwnedComments, 1)));
        assert!(has(&plan, CounterUpdate::user("u1", UserCounter::OpensOfOwnedComments, 2)));
        assert!(has(&plan, CounterUpdate::comment("c1", CommentCounter::UpVotes, 1)));
        assert!(has(&plan, CounterUpdate::comment("c1", CommentCounter::Opens, 2)));
        // the post owner is not involved
        assert!(plan.updates.iter().all(|u| u.target().entity_id() != "u2"));
    }

    #[test]
    fn test_unresolved_post_owner_is_lookup_error() {
        let event = TrackingEvent::update_post(Actor::Anonymous, "", "p1").with_views(1);
        assert!(matches!(
            plan(&event, &owned_by("")),
            Err(TrackingError::Lookup(_))
        ));
    }

    #[test]
    fn test_missing_parent_owner_is_lookup_error() {
        let event = TrackingEvent::create_comment("u1", "c1", "p1");
        assert!(matches!(
            plan(&event, &owned_by("u1")),
            Err(TrackingError::Lookup(_))
        ));
    }
}
