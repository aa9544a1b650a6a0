use std::sync::Arc;

use crate::error::{Error, Result};
use crate::media::{self, MediaStorage};
use crate::models::{Media, Tweet, UserProfile, UserRef};
use crate::store::Store;

/// Maximum tweet length in characters.
pub const MAX_TWEET_LEN: usize = 280;

// ==================== Follow Service ====================

/// Mutations and queries on the follow graph.
pub struct FollowService {
    store: Arc<Store>,
}

impl FollowService {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Self-follow is rejected before storage is touched; a missing target
    /// user is NotFound. Runs for both follow and unfollow.
    fn validate_pair(&self, actor_id: i64, target_id: i64) -> Result<()> {
        if actor_id == target_id {
            log::warn!("User {} attempted to follow/unfollow themselves", actor_id);
            return Err(Error::PermissionDenied(
                "You cannot follow yourself".to_string(),
            ));
        }
        if !self.store.user_exists(target_id)? {
            return Err(Error::NotFound(format!("User {}", target_id)));
        }
        Ok(())
    }

    pub fn follow(&self, actor_id: i64, target_id: i64) -> Result<()> {
        log::info!("User {} following user {}", actor_id, target_id);
        self.validate_pair(actor_id, target_id)?;

        if self.store.follow_exists(actor_id, target_id)? {
            return Err(Error::Conflict(
                "You are already following this user".to_string(),
            ));
        }

        // A racing identical request may still hit the unique constraint;
        // the store remaps that to Conflict as well.
        self.store.add_follow(actor_id, target_id)?;
        Ok(())
    }

    pub fn unfollow(&self, actor_id: i64, target_id: i64) -> Result<()> {
        log::info!("User {} unfollowing user {}", actor_id, target_id);
        self.validate_pair(actor_id, target_id)?;

        if !self.store.follow_exists(actor_id, target_id)? {
            return Err(Error::NotFound(
                "You are not following this user".to_string(),
            ));
        }

        self.store.remove_follow(actor_id, target_id)?;
        Ok(())
    }

    pub fn followers_of(&self, user_id: i64) -> Result<Vec<UserRef>> {
        Ok(self.store.list_followers(user_id)?)
    }

    pub fn following_of(&self, user_id: i64) -> Result<Vec<UserRef>> {
        Ok(self.store.list_following(user_id)?)
    }

    pub fn follow_stats(&self, user_id: i64) -> Result<(i64, i64)> {
        Ok(self.store.follow_stats(user_id)?)
    }

    /// Profile of `target_id` as seen by `current_id`.
    pub fn profile(&self, current_id: i64, target_id: i64) -> Result<UserProfile> {
        let user = self.store.get_user(target_id)?;
        let (follower_count, following_count) = self.store.follow_stats(target_id)?;
        let is_following = if current_id == target_id {
            false
        } else {
            self.store.follow_exists(current_id, target_id)?
        };
        Ok(UserProfile {
            id: user.id,
            name: user.name,
            follower_count,
            following_count,
            is_following,
        })
    }
}

// ==================== Like Service ====================

/// Like / unlike mutations and counts.
pub struct LikeService {
    store: Arc<Store>,
}

impl LikeService {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub fn like(&self, actor_id: i64, tweet_id: i64) -> Result<()> {
        log::info!("User {} liking tweet {}", actor_id, tweet_id);

        if !self.store.tweet_exists(tweet_id)? {
            return Err(Error::NotFound(format!("Tweet {}", tweet_id)));
        }
        if self.store.like_exists(actor_id, tweet_id)? {
            return Err(Error::Conflict(
                "You have already liked this tweet".to_string(),
            ));
        }

        self.store.add_like(actor_id, tweet_id)?;
        Ok(())
    }

    pub fn unlike(&self, actor_id: i64, tweet_id: i64) -> Result<()> {
        log::info!("User {} unliking tweet {}", actor_id, tweet_id);

        if !self.store.like_exists(actor_id, tweet_id)? {
            return Err(Error::NotFound("Like not found".to_string()));
        }

        self.store.remove_like(actor_id, tweet_id)?;
        Ok(())
    }

    pub fn like_count(&self, tweet_id: i64) -> Result<i64> {
        Ok(self.store.like_count(tweet_id)?)
    }
}

// ==================== Media Service ====================

/// Registers uploaded payloads and resolves media ids. Attachment itself
/// happens inside tweet creation, never here.
pub struct MediaService {
    store: Arc<Store>,
    storage: Arc<dyn MediaStorage>,
}

impl MediaService {
    pub fn new(store: Arc<Store>, storage: Arc<dyn MediaStorage>) -> Self {
        Self { store, storage }
    }

    /// Store the payload and register it as an unattached media row.
    /// If the row insert fails the just-written payload is removed again.
    pub fn upload(&self, bytes: &[u8]) -> Result<Media> {
        let key = self.storage.put(bytes)?;
        match self.store.create_media(&key) {
            Ok(media) => {
                log::info!("Media {} registered under key {}", media.id, key);
                Ok(media)
            }
            Err(e) => {
                media::delete_files(self.storage.as_ref(), &[key]);
                Err(e.into())
            }
        }
    }

    pub fn resolve(&self, media_id: i64) -> Result<Media> {
        Ok(self.store.get_media(media_id)?)
    }
}

// ==================== Tweet Service ====================

/// Tweet lifecycle: creation with media attachment and owner-only deletion
/// with full cascade.
pub struct TweetService {
    store: Arc<Store>,
    storage: Arc<dyn MediaStorage>,
}

impl TweetService {
    pub fn new(store: Arc<Store>, storage: Arc<dyn MediaStorage>) -> Self {
        Self { store, storage }
    }

    /// Create a tweet, attaching each media id exactly once. The insert and
    /// every attachment commit together or not at all.
    pub fn create_tweet(&self, author_id: i64, content: &str, media_ids: &[i64]) -> Result<i64> {
        if content.is_empty() {
            return Err(Error::BadRequest("Tweet content is empty".to_string()));
        }
        if content.chars().count() > MAX_TWEET_LEN {
            return Err(Error::BadRequest(format!(
                "Tweet content exceeds {} characters",
                MAX_TWEET_LEN
            )));
        }

        let tweet_id = self
            .store
            .create_tweet_with_media(author_id, content, media_ids)?;
        log::info!("User {} created tweet {}", author_id, tweet_id);
        Ok(tweet_id)
    }

    pub fn get_tweet(&self, tweet_id: i64) -> Result<Tweet> {
        Ok(self.store.get_tweet(tweet_id)?)
    }

    /// Delete a tweet the actor owns. The database transaction removes the
    /// tweet plus its like and media rows; the byte payloads are deleted
    /// afterwards, best-effort, and a payload failure does not change the
    /// reported outcome.
    pub fn delete_tweet(&self, tweet_id: i64, actor_id: i64) -> Result<()> {
        let tweet = self.store.get_tweet(tweet_id)?;

        if tweet.author_id != actor_id {
            log::warn!(
                "User {} attempted to delete tweet {} owned by user {}",
                actor_id,
                tweet_id,
                tweet.author_id
            );
            return Err(Error::PermissionDenied(
                "You cannot delete this tweet".to_string(),
            ));
        }

        let keys = self.store.media_keys_for_tweet(tweet_id)?;
        self.store.delete_tweet(tweet_id)?;
        log::info!(
            "Tweet {} deleted with {} media attachments",
            tweet_id,
            keys.len()
        );

        if !keys.is_empty() {
            media::delete_files(self.storage.as_ref(), &keys);
        }
        Ok(())
    }
}
