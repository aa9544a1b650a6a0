use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use chirp::error::{Error, Result};
use chirp::media::MediaStorage;
use chirp::models::User;
use chirp::services::{LikeService, MediaService, TweetService, MAX_TWEET_LEN};
use chirp::store::Store;

/// In-memory storage stub that records every delete call.
struct RecordingStorage {
    next_key: AtomicI64,
    deleted: Mutex<Vec<String>>,
}

impl RecordingStorage {
    fn new() -> Self {
        Self {
            next_key: AtomicI64::new(1),
            deleted: Mutex::new(Vec::new()),
        }
    }

    fn deleted_keys(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

impl MediaStorage for RecordingStorage {
    fn put(&self, _bytes: &[u8]) -> Result<String> {
        let n = self.next_key.fetch_add(1, Ordering::SeqCst);
        Ok(format!("key-{}", n))
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.deleted.lock().unwrap().push(key.to_string());
        Ok(())
    }
}

fn setup() -> (Arc<Store>, Arc<RecordingStorage>, TweetService, MediaService) {
    let store = Arc::new(Store::in_memory().unwrap());
    let storage = Arc::new(RecordingStorage::new());
    let tweets = TweetService::new(store.clone(), storage.clone());
    let media = MediaService::new(store.clone(), storage.clone());
    (store, storage, tweets, media)
}

fn create_user(store: &Store, name: &str) -> User {
    store
        .create_user(name, "hash", &format!("digest-{}", name))
        .unwrap()
}

#[test]
fn test_create_tweet_without_media() {
    let (store, _, tweets, _) = setup();
    let alice = create_user(&store, "alice");

    let tweet_id = tweets.create_tweet(alice.id, "hello", &[]).unwrap();
    let tweet = tweets.get_tweet(tweet_id).unwrap();
    assert_eq!(tweet.author_id, alice.id);
    assert_eq!(tweet.content, "hello");
}

#[test]
fn test_create_tweet_with_media_attaches_all() {
    let (store, _, tweets, media) = setup();
    let alice = create_user(&store, "alice");

    let m1 = media.upload(b"one").unwrap();
    let m2 = media.upload(b"two").unwrap();
    assert_eq!(m1.tweet_id, None);

    let tweet_id = tweets
        .create_tweet(alice.id, "with media", &[m1.id, m2.id])
        .unwrap();

    // Both media rows now reference the new tweet.
    assert_eq!(media.resolve(m1.id).unwrap().tweet_id, Some(tweet_id));
    assert_eq!(media.resolve(m2.id).unwrap().tweet_id, Some(tweet_id));

    let keys = store.media_keys_for_tweet(tweet_id).unwrap();
    assert_eq!(keys.len(), 2);
}

#[test]
fn test_create_tweet_with_missing_media_rolls_back() {
    let (store, _, tweets, media) = setup();
    let alice = create_user(&store, "alice");
    let m1 = media.upload(b"one").unwrap();

    let err = tweets
        .create_tweet(alice.id, "broken", &[m1.id, 999])
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));

    // Nothing committed: no tweet row, m1 still unattached.
    assert!(store.feed_candidates(&[alice.id]).unwrap().is_empty());
    assert_eq!(media.resolve(m1.id).unwrap().tweet_id, None);
}

#[test]
fn test_attaching_attached_media_is_conflict_and_reference_unchanged() {
    let (store, _, tweets, media) = setup();
    let alice = create_user(&store, "alice");
    let bob = create_user(&store, "bob");
    let m1 = media.upload(b"one").unwrap();

    let first = tweets.create_tweet(alice.id, "mine", &[m1.id]).unwrap();

    let err = tweets
        .create_tweet(bob.id, "stealing", &[m1.id])
        .unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));

    // Original attachment is untouched and Bob's tweet never existed.
    assert_eq!(media.resolve(m1.id).unwrap().tweet_id, Some(first));
    assert!(store.feed_candidates(&[bob.id]).unwrap().is_empty());
}

#[test]
fn test_delete_tweet_cascades_and_deletes_payloads() {
    let (store, storage, tweets, media) = setup();
    let alice = create_user(&store, "alice");
    let nick = create_user(&store, "nick");
    let bob = create_user(&store, "bob");
    let likes = LikeService::new(store.clone());

    let m1 = media.upload(b"one").unwrap();
    let m2 = media.upload(b"two").unwrap();
    let tweet_id = tweets
        .create_tweet(alice.id, "doomed", &[m1.id, m2.id])
        .unwrap();
    likes.like(nick.id, tweet_id).unwrap();
    likes.like(bob.id, tweet_id).unwrap();

    tweets.delete_tweet(tweet_id, alice.id).unwrap();

    // All like rows and media rows are gone.
    assert_eq!(store.like_count(tweet_id).unwrap(), 0);
    assert_eq!(store.count_media_rows().unwrap(), 0);
    assert!(matches!(
        tweets.get_tweet(tweet_id),
        Err(Error::NotFound(_))
    ));

    // Exactly one physical delete per storage key.
    let mut deleted = storage.deleted_keys();
    deleted.sort();
    assert_eq!(deleted, vec![m1.storage_key.clone(), m2.storage_key.clone()]);
}

#[test]
fn test_delete_tweet_requires_ownership() {
    let (store, storage, tweets, media) = setup();
    let alice = create_user(&store, "alice");
    let bob = create_user(&store, "bob");
    let m1 = media.upload(b"one").unwrap();
    let tweet_id = tweets.create_tweet(alice.id, "mine", &[m1.id]).unwrap();

    let err = tweets.delete_tweet(tweet_id, bob.id).unwrap_err();
    assert!(matches!(err, Error::PermissionDenied(_)));

    // Tweet, media row, and payload all survive.
    assert!(tweets.get_tweet(tweet_id).is_ok());
    assert_eq!(store.count_media_rows().unwrap(), 1);
    assert!(storage.deleted_keys().is_empty());
}

#[test]
fn test_delete_missing_tweet_is_not_found() {
    let (store, _, tweets, _) = setup();
    let alice = create_user(&store, "alice");

    assert!(matches!(
        tweets.delete_tweet(999, alice.id),
        Err(Error::NotFound(_))
    ));
}

#[test]
fn test_content_bounds() {
    let (store, _, tweets, _) = setup();
    let alice = create_user(&store, "alice");

    assert!(matches!(
        tweets.create_tweet(alice.id, "", &[]),
        Err(Error::BadRequest(_))
    ));

    let too_long = "x".repeat(MAX_TWEET_LEN + 1);
    assert!(matches!(
        tweets.create_tweet(alice.id, &too_long, &[]),
        Err(Error::BadRequest(_))
    ));

    let at_limit = "x".repeat(MAX_TWEET_LEN);
    assert!(tweets.create_tweet(alice.id, &at_limit, &[]).is_ok());
}
