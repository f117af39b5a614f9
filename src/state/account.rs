//! Accounts, posts and relationship kinds
//!
//! These are the records the crawl collects. They double as the wire shape of the
//! API collaborator and of seed source records, so every profile attribute is
//! optional: a record may carry nothing but an id.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable numeric account identifier
pub type AccountId = i64;

/// Profile metadata for an account
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,

    #[serde(default)]
    pub screen_name: Option<String>,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub created_at: Option<String>,

    #[serde(default)]
    pub followers_count: Option<i64>,

    #[serde(default)]
    pub friends_count: Option<i64>,

    #[serde(default)]
    pub statuses_count: Option<i64>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub location: Option<String>,

    #[serde(default)]
    pub lang: Option<String>,

    /// True for accounts from the original seed input
    #[serde(default)]
    pub is_seed: bool,
}

impl Account {
    /// Creates an account with only an id
    pub fn with_id(id: AccountId) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }

    /// Returns true if any profile attribute beyond the id is present
    pub fn has_profile_data(&self) -> bool {
        self.screen_name.is_some()
            || self.name.is_some()
            || self.created_at.is_some()
            || self.followers_count.is_some()
            || self.friends_count.is_some()
            || self.statuses_count.is_some()
            || self.description.is_some()
            || self.location.is_some()
            || self.lang.is_some()
    }
}

/// A single post from an account's timeline
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,

    /// Owning account; filled in by the client when the payload omits it
    #[serde(default)]
    pub account_id: AccountId,

    #[serde(default)]
    pub text: String,

    #[serde(default)]
    pub created_at: Option<String>,

    #[serde(default)]
    pub in_reply_to_id: Option<String>,
}

/// Direction of a relationship edge, read as `source <kind> target`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    /// `source` follows `target` (target is a friend of source)
    Follows,

    /// `source` is followed by `target` (target is a follower of source)
    FollowedBy,
}

impl EdgeKind {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Follows => "follows",
            Self::FollowedBy => "followed_by",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "follows" => Some(Self::Follows),
            "followed_by" => Some(Self::FollowedBy),
            _ => None,
        }
    }
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
