use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

use crate::models::*;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// True when the error is SQLite reporting a UNIQUE/PRIMARY KEY or CHECK
/// violation. These are expected under concurrent identical writes and get
/// remapped to Conflict instead of surfacing as raw database errors.
fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

/// True when a constraint failure is specifically a missing foreign key;
/// those remap to NotFound rather than Conflict.
fn is_foreign_key_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY
    )
}

/// Thread-safe SQLite store.
///
/// All invariants on the relation tables (one Follow per ordered pair, no
/// self-follow, one Like per (user, tweet), one tweet per media) are enforced
/// by the schema itself, so racing writers cannot violate them.
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Create a new store with the given database path
    pub fn new(db_path: &str) -> StoreResult<Self> {
        let conn = Connection::open(db_path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store for testing
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                api_key_hash TEXT NOT NULL,
                api_key_digest TEXT NOT NULL UNIQUE,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS tweets (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                author_id INTEGER NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (author_id) REFERENCES users(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS media (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                storage_key TEXT NOT NULL UNIQUE,
                tweet_id INTEGER,
                created_at TEXT NOT NULL,
                FOREIGN KEY (tweet_id) REFERENCES tweets(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS likes (
                user_id INTEGER NOT NULL,
                tweet_id INTEGER NOT NULL,
                PRIMARY KEY (user_id, tweet_id),
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE,
                FOREIGN KEY (tweet_id) REFERENCES tweets(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS follows (
                follower_id INTEGER NOT NULL,
                followee_id INTEGER NOT NULL,
                PRIMARY KEY (follower_id, followee_id),
                CHECK (follower_id != followee_id),
                FOREIGN KEY (follower_id) REFERENCES users(id) ON DELETE CASCADE,
                FOREIGN KEY (followee_id) REFERENCES users(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_tweets_author_id ON tweets(author_id);
            CREATE INDEX IF NOT EXISTS idx_media_tweet_id ON media(tweet_id);
            CREATE INDEX IF NOT EXISTS idx_likes_tweet_id ON likes(tweet_id);
            CREATE INDEX IF NOT EXISTS idx_follows_followee_id ON follows(followee_id);
            "#,
        )?;
        Ok(())
    }

    // ==================== User Operations ====================

    pub fn create_user(
        &self,
        name: &str,
        api_key_hash: &str,
        api_key_digest: &str,
    ) -> StoreResult<User> {
        let conn = self.conn.lock().unwrap();
        let created_at = Utc::now();
        conn.execute(
            r#"INSERT INTO users (name, api_key_hash, api_key_digest, created_at)
               VALUES (?1, ?2, ?3, ?4)"#,
            params![name, api_key_hash, api_key_digest, created_at.to_rfc3339()],
        )
        .map_err(|e| {
            if is_constraint_violation(&e) {
                StoreError::Conflict("Credential digest already in use".to_string())
            } else {
                StoreError::Database(e)
            }
        })?;
        Ok(User {
            id: conn.last_insert_rowid(),
            name: name.to_string(),
            api_key_hash: api_key_hash.to_string(),
            api_key_digest: api_key_digest.to_string(),
            created_at,
        })
    }

    pub fn get_user(&self, id: i64) -> StoreResult<User> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT * FROM users WHERE id = ?1", params![id], |row| {
            row_to_user(row)
        })
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound(format!("User {}", id)),
            _ => StoreError::Database(e),
        })
    }

    /// Fast-digest stage of credential verification: look up the user whose
    /// stored lookup digest matches. Absence is normal here, not an error.
    pub fn get_user_by_digest(&self, api_key_digest: &str) -> StoreResult<Option<User>> {
        let conn = self.conn.lock().unwrap();
        let user = conn
            .query_row(
                "SELECT * FROM users WHERE api_key_digest = ?1",
                params![api_key_digest],
                |row| row_to_user(row),
            )
            .optional()?;
        Ok(user)
    }

    pub fn user_exists(&self, id: i64) -> StoreResult<bool> {
        let conn = self.conn.lock().unwrap();
        let found: Option<i64> = conn
            .query_row("SELECT 1 FROM users WHERE id = ?1", params![id], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(found.is_some())
    }

    pub fn count_users(&self) -> StoreResult<i64> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        Ok(count)
    }

    // ==================== Follow Operations ====================

    pub fn follow_exists(&self, follower_id: i64, followee_id: i64) -> StoreResult<bool> {
        let conn = self.conn.lock().unwrap();
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM follows WHERE follower_id = ?1 AND followee_id = ?2",
                params![follower_id, followee_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Insert one Follow edge. A duplicate-pair violation (a racing identical
    /// request that slipped past the service pre-check) comes back as
    /// Conflict, never as a raw database error.
    pub fn add_follow(&self, follower_id: i64, followee_id: i64) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO follows (follower_id, followee_id) VALUES (?1, ?2)",
            params![follower_id, followee_id],
        )
        .map_err(|e| {
            if is_foreign_key_violation(&e) {
                StoreError::NotFound(format!("User {}", followee_id))
            } else if is_constraint_violation(&e) {
                StoreError::Conflict(format!(
                    "Follow {} -> {} already exists",
                    follower_id, followee_id
                ))
            } else {
                StoreError::Database(e)
            }
        })?;
        Ok(())
    }

    pub fn remove_follow(&self, follower_id: i64, followee_id: i64) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        let affected = conn.execute(
            "DELETE FROM follows WHERE follower_id = ?1 AND followee_id = ?2",
            params![follower_id, followee_id],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound(format!(
                "Follow {} -> {}",
                follower_id, followee_id
            )));
        }
        Ok(())
    }

    /// Ids of everyone the user follows; used to build feed author sets.
    pub fn following_ids(&self, user_id: i64) -> StoreResult<Vec<i64>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT followee_id FROM follows WHERE follower_id = ?1")?;
        let ids = stmt
            .query_map(params![user_id], |row| row.get(0))?
            .collect::<Result<Vec<i64>, _>>()?;
        Ok(ids)
    }

    /// (id, name) of everyone following the user, joined in one query.
    pub fn list_followers(&self, user_id: i64) -> StoreResult<Vec<UserRef>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"SELECT u.id, u.name FROM follows f
               JOIN users u ON u.id = f.follower_id
               WHERE f.followee_id = ?1
               ORDER BY u.id"#,
        )?;
        let users = stmt
            .query_map(params![user_id], |row| {
                Ok(UserRef {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(users)
    }

    /// (id, name) of everyone the user follows, joined in one query.
    pub fn list_following(&self, user_id: i64) -> StoreResult<Vec<UserRef>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"SELECT u.id, u.name FROM follows f
               JOIN users u ON u.id = f.followee_id
               WHERE f.follower_id = ?1
               ORDER BY u.id"#,
        )?;
        let users = stmt
            .query_map(params![user_id], |row| {
                Ok(UserRef {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(users)
    }

    /// (follower count, following count) for a profile header.
    pub fn follow_stats(&self, user_id: i64) -> StoreResult<(i64, i64)> {
        let conn = self.conn.lock().unwrap();
        let followers: i64 = conn.query_row(
            "SELECT COUNT(*) FROM follows WHERE followee_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?;
        let following: i64 = conn.query_row(
            "SELECT COUNT(*) FROM follows WHERE follower_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok((followers, following))
    }

    // ==================== Like Operations ====================

    pub fn like_exists(&self, user_id: i64, tweet_id: i64) -> StoreResult<bool> {
        let conn = self.conn.lock().unwrap();
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM likes WHERE user_id = ?1 AND tweet_id = ?2",
                params![user_id, tweet_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Single atomic insert; a duplicate (user, tweet) pair surfaces as
    /// Conflict, a missing tweet/user foreign key as NotFound.
    pub fn add_like(&self, user_id: i64, tweet_id: i64) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO likes (user_id, tweet_id) VALUES (?1, ?2)",
            params![user_id, tweet_id],
        )
        .map_err(|e| {
            if is_foreign_key_violation(&e) {
                StoreError::NotFound(format!("Tweet {}", tweet_id))
            } else if is_constraint_violation(&e) {
                StoreError::Conflict(format!(
                    "Like ({}, {}) already exists",
                    user_id, tweet_id
                ))
            } else {
                StoreError::Database(e)
            }
        })?;
        Ok(())
    }

    pub fn remove_like(&self, user_id: i64, tweet_id: i64) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        let affected = conn.execute(
            "DELETE FROM likes WHERE user_id = ?1 AND tweet_id = ?2",
            params![user_id, tweet_id],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound(format!(
                "Like ({}, {})",
                user_id, tweet_id
            )));
        }
        Ok(())
    }

    pub fn like_count(&self, tweet_id: i64) -> StoreResult<i64> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM likes WHERE tweet_id = ?1",
            params![tweet_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // ==================== Media Operations ====================

    /// Register an uploaded payload as an unattached media row.
    pub fn create_media(&self, storage_key: &str) -> StoreResult<Media> {
        let conn = self.conn.lock().unwrap();
        let created_at = Utc::now();
        conn.execute(
            "INSERT INTO media (storage_key, tweet_id, created_at) VALUES (?1, NULL, ?2)",
            params![storage_key, created_at.to_rfc3339()],
        )
        .map_err(|e| {
            if is_constraint_violation(&e) {
                StoreError::Conflict(format!("Storage key '{}' already registered", storage_key))
            } else {
                StoreError::Database(e)
            }
        })?;
        Ok(Media {
            id: conn.last_insert_rowid(),
            storage_key: storage_key.to_string(),
            tweet_id: None,
            created_at,
        })
    }

    pub fn get_media(&self, id: i64) -> StoreResult<Media> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT * FROM media WHERE id = ?1", params![id], |row| {
            row_to_media(row)
        })
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound(format!("Media {}", id)),
            _ => StoreError::Database(e),
        })
    }

    /// Storage keys of every media row attached to the tweet; collected
    /// before deletion so the byte payloads can be removed after commit.
    pub fn media_keys_for_tweet(&self, tweet_id: i64) -> StoreResult<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT storage_key FROM media WHERE tweet_id = ?1 ORDER BY id")?;
        let keys = stmt
            .query_map(params![tweet_id], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(keys)
    }

    // ==================== Tweet Operations ====================

    pub fn get_tweet(&self, id: i64) -> StoreResult<Tweet> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT * FROM tweets WHERE id = ?1", params![id], |row| {
            row_to_tweet(row)
        })
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound(format!("Tweet {}", id)),
            _ => StoreError::Database(e),
        })
    }

    pub fn tweet_exists(&self, id: i64) -> StoreResult<bool> {
        let conn = self.conn.lock().unwrap();
        let found: Option<i64> = conn
            .query_row("SELECT 1 FROM tweets WHERE id = ?1", params![id], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(found.is_some())
    }

    /// Insert a tweet and attach its media in one transaction.
    ///
    /// Every media id is re-validated inside the transaction: NotFound if the
    /// row is missing, Conflict if its tweet reference is already set (the
    /// attach UPDATE is guarded on `tweet_id IS NULL`, so a racing attach
    /// loses cleanly). Any failure after the tweet row is inserted rolls the
    /// whole sequence back; no tweet is ever left with partial attachments.
    pub fn create_tweet_with_media(
        &self,
        author_id: i64,
        content: &str,
        media_ids: &[i64],
    ) -> StoreResult<i64> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO tweets (author_id, content, created_at) VALUES (?1, ?2, ?3)",
            params![author_id, content, Utc::now().to_rfc3339()],
        )?;
        let tweet_id = tx.last_insert_rowid();

        for &media_id in media_ids {
            attach_media(&tx, media_id, tweet_id)?;
        }

        tx.commit()?;
        Ok(tweet_id)
    }

    /// Attach a single media row outside of tweet creation. Same rules as
    /// the in-transaction path: NotFound for a missing row, Conflict when the
    /// tweet reference is already set, whatever the target.
    pub fn attach_media(&self, media_id: i64, tweet_id: i64) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        attach_media(&conn, media_id, tweet_id)
    }

    /// Delete a tweet in one transaction. Like rows and media rows go with it
    /// via ON DELETE CASCADE; the caller handles physical byte deletion after
    /// this returns.
    pub fn delete_tweet(&self, tweet_id: i64) -> StoreResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let affected = tx.execute("DELETE FROM tweets WHERE id = ?1", params![tweet_id])?;
        if affected == 0 {
            return Err(StoreError::NotFound(format!("Tweet {}", tweet_id)));
        }
        tx.commit()?;
        Ok(())
    }

    pub fn count_media_rows(&self) -> StoreResult<i64> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM media", [], |row| row.get(0))?;
        Ok(count)
    }

    // ==================== Feed Candidates ====================

    /// Load every tweet by the given authors, fully populated and already
    /// ranked: like count descending, then tweet id descending (newer first
    /// among equally-liked tweets). Returns immediately with no query when
    /// the author set is empty.
    pub fn feed_candidates(&self, author_ids: &[i64]) -> StoreResult<Vec<FeedCandidate>> {
        if author_ids.is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.conn.lock().unwrap();
        let placeholders = vec!["?"; author_ids.len()].join(",");

        // Tweets with author and like count, ranked in SQL.
        let sql = format!(
            r#"SELECT t.id, t.author_id, t.content, t.created_at, u.name,
                      COALESCE(lc.like_count, 0) AS like_count
               FROM tweets t
               JOIN users u ON u.id = t.author_id
               LEFT JOIN (
                   SELECT tweet_id, COUNT(*) AS like_count FROM likes GROUP BY tweet_id
               ) lc ON lc.tweet_id = t.id
               WHERE t.author_id IN ({})
               ORDER BY like_count DESC, t.id DESC"#,
            placeholders
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut candidates = stmt
            .query_map(params_from_iter(author_ids.iter()), |row| {
                Ok(FeedCandidate {
                    tweet: Tweet {
                        id: row.get(0)?,
                        author_id: row.get(1)?,
                        content: row.get(2)?,
                        created_at: parse_datetime(row.get::<_, String>(3)?),
                    },
                    author: UserRef {
                        id: row.get(1)?,
                        name: row.get(4)?,
                    },
                    likes: Vec::new(),
                    media: Vec::new(),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        if candidates.is_empty() {
            return Ok(candidates);
        }

        let tweet_ids: Vec<i64> = candidates.iter().map(|c| c.tweet.id).collect();
        let tweet_placeholders = vec!["?"; tweet_ids.len()].join(",");

        // Likers (id + name) for the whole tweet set in one batched query.
        let sql = format!(
            r#"SELECT l.tweet_id, u.id, u.name FROM likes l
               JOIN users u ON u.id = l.user_id
               WHERE l.tweet_id IN ({})
               ORDER BY u.id"#,
            tweet_placeholders
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut likes_by_tweet: HashMap<i64, Vec<UserRef>> = HashMap::new();
        let rows = stmt.query_map(params_from_iter(tweet_ids.iter()), |row| {
            Ok((
                row.get::<_, i64>(0)?,
                UserRef {
                    id: row.get(1)?,
                    name: row.get(2)?,
                },
            ))
        })?;
        for row in rows {
            let (tweet_id, liker) = row?;
            likes_by_tweet.entry(tweet_id).or_default().push(liker);
        }

        // Media rows for the whole tweet set, also batched.
        let sql = format!(
            r#"SELECT id, storage_key, tweet_id, created_at FROM media
               WHERE tweet_id IN ({})
               ORDER BY id"#,
            tweet_placeholders
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut media_by_tweet: HashMap<i64, Vec<Media>> = HashMap::new();
        let rows = stmt.query_map(params_from_iter(tweet_ids.iter()), |row| {
            Ok(Media {
                id: row.get(0)?,
                storage_key: row.get(1)?,
                tweet_id: row.get(2)?,
                created_at: parse_datetime(row.get::<_, String>(3)?),
            })
        })?;
        for row in rows {
            let media = row?;
            if let Some(tweet_id) = media.tweet_id {
                media_by_tweet.entry(tweet_id).or_default().push(media);
            }
        }

        for candidate in &mut candidates {
            if let Some(likes) = likes_by_tweet.remove(&candidate.tweet.id) {
                candidate.likes = likes;
            }
            if let Some(media) = media_by_tweet.remove(&candidate.tweet.id) {
                candidate.media = media;
            }
        }

        Ok(candidates)
    }
}

/// Set a media row's tweet reference, failing if it is already set.
///
/// The UPDATE is guarded on `tweet_id IS NULL`, so even a writer racing
/// between the check and the update cannot reassign an attached media; the
/// loser observes zero affected rows and reports Conflict.
fn attach_media(conn: &Connection, media_id: i64, tweet_id: i64) -> StoreResult<()> {
    let existing: Option<Option<i64>> = conn
        .query_row(
            "SELECT tweet_id FROM media WHERE id = ?1",
            params![media_id],
            |row| row.get(0),
        )
        .optional()?;
    match existing {
        None => {
            return Err(StoreError::NotFound(format!("Media {}", media_id)));
        }
        Some(Some(owner)) => {
            return Err(StoreError::Conflict(format!(
                "Media {} is already attached to tweet {}",
                media_id, owner
            )));
        }
        Some(None) => {}
    }

    let affected = conn.execute(
        "UPDATE media SET tweet_id = ?1 WHERE id = ?2 AND tweet_id IS NULL",
        params![tweet_id, media_id],
    )?;
    if affected == 0 {
        return Err(StoreError::Conflict(format!(
            "Media {} is already attached",
            media_id
        )));
    }
    Ok(())
}

// ==================== Row Mappers ====================

fn row_to_user(row: &rusqlite::Row) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get("id")?,
        name: row.get("name")?,
        api_key_hash: row.get("api_key_hash")?,
        api_key_digest: row.get("api_key_digest")?,
        created_at: parse_datetime(row.get::<_, String>("created_at")?),
    })
}

fn row_to_tweet(row: &rusqlite::Row) -> rusqlite::Result<Tweet> {
    Ok(Tweet {
        id: row.get("id")?,
        author_id: row.get("author_id")?,
        content: row.get("content")?,
        created_at: parse_datetime(row.get::<_, String>("created_at")?),
    })
}

fn row_to_media(row: &rusqlite::Row) -> rusqlite::Result<Media> {
    Ok(Media {
        id: row.get("id")?,
        storage_key: row.get("storage_key")?,
        tweet_id: row.get("tweet_id")?,
        created_at: parse_datetime(row.get::<_, String>("created_at")?),
    })
}

fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
