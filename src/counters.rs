//! Counter vocabularies for each tracker kind
//!
//! Every tracker kind has a closed counter enum and a matching struct with one
//! named field per counter. The enum drives storage (column names, zero
//! templates, increments); the struct is what readers get back. Adding a
//! counter to a `counter_set!` invocation adds it everywhere at once, so an
//! increment can never target an undeclared field.

use crate::error::{Result, TrackingError};
use serde::{Deserialize, Serialize};

macro_rules! counter_set {
    (
        $(#[$emeta:meta])*
        enum $counter:ident;
        $(#[$smeta:meta])*
        struct $set:ident;
        { $( $(#[$vmeta:meta])* $variant:ident => $field:ident ),+ $(,)? }
    ) => {
        $(#[$emeta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $counter {
            $( $(#[$vmeta])* $variant ),+
        }

        impl $counter {
            /// Every declared counter, in storage column order
            pub const ALL: &'static [$counter] = &[ $( $counter::$variant ),+ ];

            /// Storage column (and serialized field) name
            pub fn column(self) -> &'static str {
                match self {
                    $( $counter::$variant => stringify!($field) ),+
                }
            }

            pub fn from_column(name: &str) -> Option<Self> {
                match name {
                    $( stringify!($field) => Some($counter::$variant), )+
                    _ => None,
                }
            }
        }

        impl std::fmt::Display for $counter {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.column())
            }
        }

        $(#[$smeta])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
        pub struct $set {
            $( pub $field: i64 ),+
        }

        impl $set {
            pub fn get(&self, counter: $counter) -> i64 {
                match counter {
                    $( $counter::$variant => self.$field ),+
                }
            }

            /// Add `delta` to one counter, refusing to overflow
            pub fn add(&mut self, counter: $counter, delta: i64) -> Result<()> {
                let value = match counter {
                    $( $counter::$variant => &mut self.$field ),+
                };
                let current = *value;
                *value = current.checked_add(delta).ok_or_else(|| {
                    TrackingError::InvariantViolation(format!(
                        "{} = {} cannot take {} more",
                        counter, current, delta
                    ))
                })?;
                Ok(())
            }

            pub fn set(&mut self, counter: $counter, value: i64) {
                match counter {
                    $( $counter::$variant => self.$field = value ),+
                }
            }

            pub fn is_zero(&self) -> bool {
                $( self.$field == 0 )&&+
            }
        }
    };
}

counter_set! {
    /// Counters kept on a user's monthly tracker and on each of its day slots
    enum UserCounter;
    /// One value per [`UserCounter`]
    struct UserCounters;
    {
        ContentItemsCreated => content_items_created,
        CommentsOnOwnedContent => comments_on_owned_content,
        CommentsOnOthersContent => comments_on_others_content,
        VotesForOwned => votes_for_owned,
        UpVotesForOwned => up_votes_for_owned,
        DownVotesForOwned => down_votes_for_owned,
        ViewsOfOwned => views_of_owned,
        ViewsOfOwnedBySelf => views_of_owned_by_self,
        OpensOfOwned => opens_of_owned,
        OpensOfOwnedBySelf => opens_of_owned_by_self,
        VotesForOthers => votes_for_others,
        UpVotesForOthers => up_votes_for_others,
        DownVotesForOthers => down_votes_for_others,
        ViewsOfOthers => views_of_others,
        OpensOfOthers => opens_of_others,
        CommentsCreated => comments_created,
        CommentsCreatedOnOwnContentBySelf => comments_created_on_own_content_by_self,
        VotesForOwnedComments => votes_for_owned_comments,
        UpVotesForOwnedComments => up_votes_for_owned_comments,
        DownVotesForOwnedComments => down_votes_for_owned_comments,
        ViewsOfOwnedComments => views_of_owned_comments,
        OpensOfOwnedComments => opens_of_owned_comments,
        VotesForOthersComments => votes_for_others_comments,
        UpVotesForOthersComments => up_votes_for_others_comments,
        DownVotesForOthersComments => down_votes_for_others_comments,
        ViewsOfOthersComments => views_of_others_comments,
        OpensOfOthersComments => opens_of_others_comments,
    }
}

counter_set! {
    /// Counters kept on a post's daily tracker
    enum PostCounter;
    struct PostCounters;
    {
        CommentsReceived => comments_received,
        UpVotes => up_votes,
        DownVotes => down_votes,
        Views => views,
        Opens => opens,
    }
}

counter_set! {
    /// Counters kept on a comment's daily tracker
    enum CommentCounter;
    struct CommentCounters;
    {
        UpVotes => up_votes,
        DownVotes => down_votes,
        Views => views,
        Opens => opens,
        /// Vote the comment carried on its parent post when it was created
        ParentUpVotes => parent_up_votes,
        ParentDownVotes => parent_down_votes,
    }
}
