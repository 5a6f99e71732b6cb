use anyhow::Result;

use super::schema::Database;
use super::types::{CacheStats, CachedPost};

/// Posts cached longer than this are stale and evicted on the next read.
pub const CACHE_TTL_HOURS: i64 = 10;

impl Database {
    // ========================================================================
    // Article Cache Operations
    // ========================================================================

    /// Store a batch of posts, stamping each with a fresh `cached_at`.
    ///
    /// Each post is upserted independently: a malformed entry (missing `id`
    /// or `created_at`) or a failed row write is logged and skipped without
    /// aborting the rest of the batch. Existing rows are fully overwritten,
    /// which also resets their `cached_at`.
    ///
    /// Returns the number of posts actually stored.
    pub async fn save_posts(&self, posts: &[serde_json::Value]) -> Result<usize> {
        let mut stored = 0usize;

        for post in posts {
            let (id, created_at, category_id) = match post_columns(post) {
                Some(columns) => columns,
                None => {
                    tracing::warn!("Post missing id or created_at, skipping");
                    continue;
                }
            };

            let document = post.to_string();
            let result = sqlx::query(
                r#"
                INSERT OR REPLACE INTO cached_posts
                    (id, created_at, cached_at, category_id, document)
                VALUES (?, ?, datetime('now'), ?, ?)
            "#,
            )
            .bind(id)
            .bind(&created_at)
            .bind(category_id)
            .bind(&document)
            .execute(&self.pool)
            .await;

            match result {
                Ok(_) => stored += 1,
                Err(e) => {
                    tracing::warn!(post_id = id, error = %e, "Failed to store post, skipping")
                }
            }
        }

        Ok(stored)
    }

    /// All cached posts, newest first by `created_at`.
    ///
    /// Expired entries are evicted before the read, so the result never
    /// contains a post older than [`CACHE_TTL_HOURS`]. A row whose stored
    /// document no longer parses is skipped with a warning.
    pub async fn get_posts(&self) -> Result<Vec<CachedPost>> {
        self.prune_expired().await?;

        let rows: Vec<(i64, String, String, Option<i64>, String)> = sqlx::query_as(
            r#"
            SELECT id, created_at, cached_at, category_id, document
            FROM cached_posts
            ORDER BY created_at DESC
        "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut posts = Vec::with_capacity(rows.len());
        for (id, created_at, cached_at, category_id, document) in rows {
            match serde_json::from_str(&document) {
                Ok(document) => posts.push(CachedPost {
                    id,
                    created_at,
                    cached_at,
                    category_id,
                    document,
                }),
                Err(e) => {
                    tracing::warn!(post_id = id, error = %e, "Cached post document is corrupt, skipping")
                }
            }
        }

        Ok(posts)
    }

    /// Highest post ID currently cached, or `0` for an empty store.
    ///
    /// Used to ask the server only for posts newer than what we already
    /// have (`GET /posts/sync?last_id=N`).
    pub async fn latest_post_id(&self) -> Result<i64> {
        let row: (Option<i64>,) = sqlx::query_as("SELECT MAX(id) FROM cached_posts")
            .fetch_one(&self.pool)
            .await?;

        Ok(row.0.unwrap_or(0))
    }

    /// Delete every post whose `cached_at` is past the TTL boundary.
    ///
    /// Returns the number of entries evicted.
    pub async fn prune_expired(&self) -> Result<u64> {
        let ttl_modifier = format!("-{CACHE_TTL_HOURS} hours");

        let result = sqlx::query("DELETE FROM cached_posts WHERE cached_at < datetime('now', ?)")
            .bind(&ttl_modifier)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    /// Delete the oldest posts (by `created_at`) until at most `max_count`
    /// remain. Run after [`prune_expired`](Self::prune_expired): expiry is
    /// the staleness guard, this is the hard ceiling on store size.
    ///
    /// Returns the number of entries deleted.
    pub async fn prune_to_limit(&self, max_count: u64) -> Result<u64> {
        let excess = self.cached_post_count().await? - max_count as i64;
        if excess <= 0 {
            return Ok(0);
        }

        let result = sqlx::query(
            r#"
            DELETE FROM cached_posts WHERE id IN (
                SELECT id FROM cached_posts ORDER BY created_at ASC LIMIT ?
            )
        "#,
        )
        .bind(excess)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Number of posts currently cached, expired or not.
    pub async fn cached_post_count(&self) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM cached_posts")
            .fetch_one(&self.pool)
            .await?;

        Ok(row.0)
    }

    /// Compute aggregate cache statistics.
    pub async fn cache_stats(&self) -> Result<CacheStats> {
        let row: (i64, Option<String>, Option<String>) = sqlx::query_as(
            r#"
            SELECT COUNT(*), MIN(cached_at), MAX(cached_at)
            FROM cached_posts
        "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(CacheStats {
            total_posts: row.0,
            oldest_entry: row.1,
            newest_entry: row.2,
        })
    }
}

/// Pull the indexed columns out of a post document.
///
/// Returns `None` when `id` or `created_at` is missing or the wrong type;
/// such posts cannot be cached. `category_id` is optional on the wire.
fn post_columns(post: &serde_json::Value) -> Option<(i64, String, Option<i64>)> {
    let id = post.get("id")?.as_i64()?;
    let created_at = post.get("created_at")?.as_str()?;
    let category_id = post
        .get("category")
        .and_then(|c| c.get("id"))
        .and_then(|v| v.as_i64());

    Some((id, normalize_timestamp(created_at), category_id))
}

/// Normalize a server timestamp to SQLite datetime text in UTC.
///
/// The server sends RFC 3339 with arbitrary offsets; stored rows are
/// compared lexicographically against each other and against SQLite's
/// `datetime('now')` output, so everything must land in one format and
/// one zone. Unparseable input is stored as-is.
fn normalize_timestamp(raw: &str) -> String {
    match chrono::DateTime::parse_from_rfc3339(raw) {
        Ok(dt) => dt
            .with_timezone(&chrono::Utc)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string(),
        Err(_) => raw.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::{normalize_timestamp, CACHE_TTL_HOURS};
    use crate::storage::Database;

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    fn sample_post(id: i64, created_at: &str) -> serde_json::Value {
        serde_json::json!({
            "id": id,
            "title": format!("Post {id}"),
            "description": "Body text",
            "status": "published",
            "created_at": created_at,
            "last_modified": created_at,
            "author": "newsroom",
            "category": { "id": 3, "name": "Tech" },
            "topics": []
        })
    }

    /// Rewrite a row's cached_at so TTL behavior can be tested without
    /// waiting ten hours.
    async fn age_post(db: &Database, id: i64, modifier: &str) {
        sqlx::query("UPDATE cached_posts SET cached_at = datetime('now', ?) WHERE id = ?")
            .bind(modifier)
            .bind(id)
            .execute(&db.pool)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_save_and_get_posts() {
        let db = test_db().await;

        let stored = db
            .save_posts(&[
                sample_post(1, "2024-01-10T08:00:00Z"),
                sample_post(2, "2024-01-12T08:00:00Z"),
                sample_post(3, "2024-01-11T08:00:00Z"),
            ])
            .await
            .unwrap();
        assert_eq!(stored, 3);

        let posts = db.get_posts().await.unwrap();
        assert_eq!(posts.len(), 3);
        // Newest created_at first
        assert_eq!(posts[0].id, 2);
        assert_eq!(posts[1].id, 3);
        assert_eq!(posts[2].id, 1);
        assert_eq!(posts[0].title(), Some("Post 2"));
        assert_eq!(posts[0].category_id, Some(3));
    }

    #[tokio::test]
    async fn test_save_posts_overwrites_document() {
        let db = test_db().await;

        db.save_posts(&[sample_post(1, "2024-01-10T08:00:00Z")])
            .await
            .unwrap();

        let mut updated = sample_post(1, "2024-01-10T08:00:00Z");
        updated["title"] = serde_json::json!("Corrected headline");
        db.save_posts(&[updated]).await.unwrap();

        let posts = db.get_posts().await.unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].title(), Some("Corrected headline"));
    }

    #[tokio::test]
    async fn test_save_posts_refreshes_cached_at() {
        let db = test_db().await;

        db.save_posts(&[sample_post(1, "2024-01-10T08:00:00Z")])
            .await
            .unwrap();
        age_post(&db, 1, "-9 hours").await;

        // Re-fetching the same post resets its age
        db.save_posts(&[sample_post(1, "2024-01-10T08:00:00Z")])
            .await
            .unwrap();

        let (fresh,): (bool,) = sqlx::query_as(
            "SELECT cached_at >= datetime('now', '-1 minute') FROM cached_posts WHERE id = 1",
        )
        .fetch_one(&db.pool)
        .await
        .unwrap();
        assert!(fresh, "re-saving a post should reset cached_at");
    }

    #[tokio::test]
    async fn test_save_posts_skips_malformed() {
        let db = test_db().await;

        let no_id = serde_json::json!({ "title": "orphan", "created_at": "2024-01-10T08:00:00Z" });
        let no_created = serde_json::json!({ "id": 9, "title": "undated" });

        let stored = db
            .save_posts(&[
                sample_post(1, "2024-01-10T08:00:00Z"),
                no_id,
                no_created,
                sample_post(2, "2024-01-11T08:00:00Z"),
            ])
            .await
            .unwrap();

        assert_eq!(stored, 2);
        assert_eq!(db.cached_post_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_latest_post_id_empty_returns_zero() {
        let db = test_db().await;
        assert_eq!(db.latest_post_id().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_latest_post_id_returns_max() {
        let db = test_db().await;
        db.save_posts(&[
            sample_post(5, "2024-01-10T08:00:00Z"),
            sample_post(12, "2024-01-09T08:00:00Z"),
            sample_post(7, "2024-01-11T08:00:00Z"),
        ])
        .await
        .unwrap();

        // Highest id wins, regardless of created_at ordering
        assert_eq!(db.latest_post_id().await.unwrap(), 12);
    }

    #[tokio::test]
    async fn test_ttl_boundary() {
        let db = test_db().await;
        db.save_posts(&[
            sample_post(1, "2024-01-10T08:00:00Z"),
            sample_post(2, "2024-01-11T08:00:00Z"),
        ])
        .await
        .unwrap();

        age_post(&db, 1, "-11 hours").await;
        age_post(&db, 2, "-9 hours").await;

        let posts = db.get_posts().await.unwrap();
        assert_eq!(posts.len(), 1, "11h-old post is past the 10h TTL");
        assert_eq!(posts[0].id, 2);

        // The expired row is gone from the store, not just filtered
        assert_eq!(db.cached_post_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_prune_expired_counts_deletions() {
        let db = test_db().await;
        db.save_posts(&[
            sample_post(1, "2024-01-10T08:00:00Z"),
            sample_post(2, "2024-01-11T08:00:00Z"),
            sample_post(3, "2024-01-12T08:00:00Z"),
        ])
        .await
        .unwrap();

        age_post(&db, 1, &format!("-{} hours", CACHE_TTL_HOURS + 2)).await;
        age_post(&db, 2, &format!("-{} hours", CACHE_TTL_HOURS + 1)).await;

        assert_eq!(db.prune_expired().await.unwrap(), 2);
        assert_eq!(db.prune_expired().await.unwrap(), 0);
        assert_eq!(db.cached_post_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_prune_to_limit_deletes_oldest() {
        let db = test_db().await;

        let posts: Vec<_> = (1..=7)
            .map(|i| sample_post(i, &format!("2024-01-{:02}T08:00:00Z", i)))
            .collect();
        db.save_posts(&posts).await.unwrap();

        let deleted = db.prune_to_limit(5).await.unwrap();
        assert_eq!(deleted, 2);

        let remaining = db.get_posts().await.unwrap();
        let ids: Vec<i64> = remaining.iter().map(|p| p.id).collect();
        // The two oldest by created_at (ids 1 and 2) are gone
        assert_eq!(ids, vec![7, 6, 5, 4, 3]);
    }

    #[tokio::test]
    async fn test_prune_to_limit_under_limit_is_noop() {
        let db = test_db().await;
        db.save_posts(&[sample_post(1, "2024-01-10T08:00:00Z")])
            .await
            .unwrap();

        assert_eq!(db.prune_to_limit(5).await.unwrap(), 0);
        assert_eq!(db.cached_post_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_cache_stats() {
        let db = test_db().await;

        let stats = db.cache_stats().await.unwrap();
        assert_eq!(stats.total_posts, 0);
        assert!(stats.oldest_entry.is_none());
        assert!(stats.newest_entry.is_none());

        db.save_posts(&[
            sample_post(1, "2024-01-10T08:00:00Z"),
            sample_post(2, "2024-01-11T08:00:00Z"),
        ])
        .await
        .unwrap();

        let stats = db.cache_stats().await.unwrap();
        assert_eq!(stats.total_posts, 2);
        assert!(stats.oldest_entry.is_some());
        assert!(stats.newest_entry.is_some());
    }

    #[test]
    fn test_normalize_timestamp_converts_offsets_to_utc() {
        // Same instant written with two offsets must normalize identically,
        // otherwise lexicographic ordering breaks across timezones.
        assert_eq!(
            normalize_timestamp("2024-01-15T10:30:00+06:00"),
            "2024-01-15 04:30:00"
        );
        assert_eq!(
            normalize_timestamp("2024-01-15T04:30:00Z"),
            "2024-01-15 04:30:00"
        );
    }

    #[test]
    fn test_normalize_timestamp_passes_through_unparseable() {
        assert_eq!(normalize_timestamp("not a date"), "not a date");
        assert_eq!(
            normalize_timestamp("2024-01-15 04:30:00"),
            "2024-01-15 04:30:00"
        );
    }
}
