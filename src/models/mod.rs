use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// User represents a registered account.
/// Credential material is stored twice: a fast SHA-256 lookup digest and a
/// slow salted bcrypt hash. Neither is ever serialized out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    #[serde(skip_serializing, default)]
    pub api_key_hash: String,
    #[serde(skip_serializing, default)]
    pub api_key_digest: String,
    pub created_at: DateTime<Utc>,
}

/// Tweet is a short text post owned by its author.
/// Ids are assigned monotonically, so id order doubles as recency order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tweet {
    pub id: i64,
    pub author_id: i64,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Media is an uploaded binary payload, referenced by an opaque storage key.
/// It starts unattached (`tweet_id` = None) and may be attached to exactly
/// one tweet; once set, the reference never changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Media {
    pub id: i64,
    pub storage_key: String,
    pub tweet_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Minimal (id, name) pair for profile and liker listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRef {
    pub id: i64,
    pub name: String,
}

/// One fully-populated feed candidate as loaded from storage: the tweet with
/// its author, every liker (id + name), and every attached media row.
/// No field here triggers further queries.
#[derive(Debug, Clone)]
pub struct FeedCandidate {
    pub tweet: Tweet,
    pub author: UserRef,
    pub likes: Vec<UserRef>,
    pub media: Vec<Media>,
}

/// Feed view-model for one tweet.
#[derive(Debug, Clone, Serialize)]
pub struct FeedTweet {
    pub id: i64,
    pub content: String,
    pub attachments: Vec<String>,
    pub author: UserRef,
    pub likes: Vec<UserRef>,
}

/// The ranked feed returned to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct Feed {
    pub tweets: Vec<FeedTweet>,
}

/// Profile summary for a user as seen by another user.
#[derive(Debug, Clone, Serialize)]
pub struct UserProfile {
    pub id: i64,
    pub name: String,
    pub follower_count: i64,
    pub following_count: i64,
    pub is_following: bool,
}
