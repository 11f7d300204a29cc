//! Property tests: user day slots always roll up to the monthly totals, and
//! post counters match a simple model of the events that were recorded

mod common;

use common::{day, stores, ALICE, BOB, CAROL};
use proptest::prelude::*;
use std::sync::Arc;
use tracking_core::{
    build_key, Actor, ContentKind, MemoryDirectory, TrackerKind, TrackingEngine, TrackingEvent,
    UserCounter, Vote,
};

const USERS: [&str; 3] = [ALICE, BOB, CAROL];

#[derive(Clone, Debug)]
enum Action {
    CreatePost { author: usize, seq: u16 },
    ViewPost { actor: Option<usize>, post: usize, vote: Option<bool>, views: u8 },
    Comment { author: usize, post: usize, vote: Option<bool>, seq: u16 },
    VoteComment { actor: usize, up: bool },
}

fn arb_action() -> impl Strategy<Value = Action> {
    prop_oneof![
        (0usize..3, any::<u16>()).prop_map(|(author, seq)| Action::CreatePost { author, seq }),
        (
            proptest::option::of(0usize..3),
            0usize..2,
            proptest::option::of(any::<bool>()),
            0u8..4
        )
            .prop_map(|(actor, post, vote, views)| Action::ViewPost {
                actor,
                post,
                vote,
                views
            }),
        (0usize..3, 0usize..2, proptest::option::of(any::<bool>()), any::<u16>())
            .prop_map(|(author, post, vote, seq)| Action::Comment {
                author,
                post,
                vote,
                seq
            }),
        (0usize..3, any::<bool>()).prop_map(|(actor, up)| Action::VoteComment { actor, up }),
    ]
}

fn vote(flag: Option<bool>) -> Option<Vote> {
    flag.map(|up| if up { Vote::Up } else { Vote::Down })
}

/// p1 by alice, p2 by bob, c1 by bob on p1
fn directory() -> Arc<MemoryDirectory> {
    Arc::new(
        MemoryDirectory::new()
            .with_post("p1", ALICE)
            .with_post("p2", BOB)
            .with_comment("c1", BOB),
    )
}

const POSTS: [(&str, &str); 2] = [("p1", ALICE), ("p2", BOB)];

fn to_event(action: &Action) -> TrackingEvent {
    match action {
        Action::CreatePost { author, seq } => {
            TrackingEvent::create_post(USERS[*author], format!("new{}", seq))
        }
        Action::ViewPost {
            actor,
            post,
            vote: flag,
            views,
        } => {
            let actor = match actor {
                Some(i) => Actor::user(USERS[*i]),
                None => Actor::Anonymous,
            };
            let (post_id, owner) = POSTS[*post];
            let mut event = TrackingEvent::update_post(actor, owner, post_id)
                .with_views(u64::from(*views));
            event.vote = vote(*flag);
            event
        }
        Action::Comment {
            author,
            post,
            vote: flag,
            seq,
        } => {
            let mut event =
                TrackingEvent::create_comment(USERS[*author], format!("c{}", seq), POSTS[*post].0);
            event.vote = vote(*flag);
            event
        }
        Action::VoteComment { actor, up } => {
            TrackingEvent::update_comment(USERS[*actor], BOB, "c1", "p1")
                .with_vote(if *up { Vote::Up } else { Vote::Down })
        }
    }
}

/// Views p1 should have received, and the share alice sees as owner
fn expected_p1_views(actions: &[Action]) -> (i64, i64) {
    let mut total = 0;
    let mut by_others = 0;
    for action in actions {
        if let Action::ViewPost {
            actor,
            post: 0,
            views,
            ..
        } = action
        {
            total += i64::from(*views);
            if *actor != Some(0) {
                by_others += i64::from(*views);
            }
        }
    }
    (total, by_others)
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 24, .. ProptestConfig::default() })]
    #[test]
    fn daily_slots_roll_up_to_monthly_totals(
        actions in proptest::collection::vec((arb_action(), 1u32..=31), 0..40)
    ) {
        tokio_test::block_on(async move {
            for (name, store) in stores().await {
                let engine = TrackingEngine::new(store.clone(), directory());
                for (action, day_of_month) in &actions {
                    engine
                        .record_at(&to_event(action), day(2024, 10, *day_of_month))
                        .await
                        .unwrap();
                }

                let month_start = day(2024, 10, 1);
                for user in USERS {
                    let key = build_key(TrackerKind::User, user, month_start).unwrap();
                    if let Some(tracker) = store.get_user(&key).await.unwrap() {
                        assert_eq!(tracker.days.len(), 31, "{name} {user}");
                        assert!(tracker.is_consistent(), "{name} {user}: {:?}", tracker);
                        // every counted vote is either up or down
                        assert_eq!(
                            tracker.monthly.get(UserCounter::VotesForOthers),
                            tracker.monthly.get(UserCounter::UpVotesForOthers)
                                + tracker.monthly.get(UserCounter::DownVotesForOthers),
                            "{name} {user}"
                        );
                    }
                }

                let plain: Vec<Action> = actions.iter().map(|(a, _)| a.clone()).collect();
                let (p1_views, p1_views_by_others) = expected_p1_views(&plain);

                let from = build_key(TrackerKind::Post, "p1", month_start).unwrap();
                let to = build_key(TrackerKind::Post, "p1", day(2024, 10, 31)).unwrap();
                let trackers = store
                    .range_content(ContentKind::Post, "p1", &from, &to)
                    .await
                    .unwrap();
                let views: i64 = trackers
                    .iter()
                    .filter_map(|t| t.counters.as_post())
                    .map(|c| c.views)
                    .sum();
                assert_eq!(views, p1_views, "{name}");

                let alice_key = build_key(TrackerKind::User, ALICE, month_start).unwrap();
                let alice_owned_views = store
                    .get_user(&alice_key)
                    .await
                    .unwrap()
                    .map(|t| t.monthly.views_of_owned)
                    .unwrap_or(0);
                assert_eq!(alice_owned_views, p1_views_by_others, "{name}");
            }
        });
    }
}
