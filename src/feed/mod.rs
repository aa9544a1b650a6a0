use std::sync::Arc;

use crate::error::Result;
use crate::media::media_url;
use crate::models::{Feed, FeedTweet};
use crate::store::Store;

/// Assembles the ranked feed for a user: tweets by everyone they follow plus
/// their own, ordered by like count descending with newer tweets first among
/// equals. The ordering itself lives in the candidates query; this engine
/// owns the author set and the projection to view models.
pub struct FeedEngine {
    store: Arc<Store>,
}

impl FeedEngine {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub fn build_feed(&self, user_id: i64) -> Result<Feed> {
        log::info!("Building feed for user {}", user_id);

        let mut author_ids = self.store.following_ids(user_id)?;
        // A user always sees their own tweets, even with zero followees.
        author_ids.push(user_id);
        log::debug!("Feed author set for user {}: {:?}", user_id, author_ids);

        let candidates = self.store.feed_candidates(&author_ids)?;

        let tweets = candidates
            .into_iter()
            .map(|c| FeedTweet {
                id: c.tweet.id,
                content: c.tweet.content,
                attachments: c.media.iter().map(|m| media_url(&m.storage_key)).collect(),
                author: c.author,
                likes: c.likes,
            })
            .collect::<Vec<_>>();

        log::info!("Feed for user {} has {} tweets", user_id, tweets.len());
        Ok(Feed { tweets })
    }
}
