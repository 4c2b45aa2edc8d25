//! Response memoization over the embedded store
//!
//! Keyed by `(model id, normalized request hash)`. Hit counts and
//! last-accessed times live in the `cached_responses` table so they survive
//! restarts; eviction works off the expiry and last-accessed indexes.

use chrono::{DateTime, Duration, Utc};
use sqlx::Row;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use audit_trail::DatabaseManager;

use crate::clock::Clock;
use crate::GatewayError;

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub cache_key: String,
    pub model_id: String,
    pub request_hash: String,
    pub response_data: String,
    pub cached_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub hit_count: u64,
    pub last_accessed: DateTime<Utc>,
}

pub struct ResponseCache {
    db: Arc<DatabaseManager>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    max_entries: u64,
}

impl ResponseCache {
    pub fn new(
        db: Arc<DatabaseManager>,
        clock: Arc<dyn Clock>,
        ttl_seconds: u64,
        max_entries: u64,
    ) -> Self {
        Self {
            db,
            clock,
            ttl: Duration::seconds(ttl_seconds as i64),
            max_entries,
        }
    }

    fn request_hash(prompt: &str) -> String {
        let mut hasher = DefaultHasher::new();
        prompt.trim().hash(&mut hasher);
        format!("{:016x}", hasher.finish())
    }

    fn cache_key(model_id: &str, request_hash: &str) -> String {
        format!("{model_id}:{request_hash}")
    }

    /// Look up a cached response. A hit bumps the hit count and
    /// last-accessed time; an expired entry is deleted and treated as a
    /// miss.
    pub async fn get(&self, model_id: &str, prompt: &str) -> Result<Option<String>, GatewayError> {
        let key = Self::cache_key(model_id, &Self::request_hash(prompt));
        let now = self.clock.now();

        let row = sqlx::query(
            "SELECT response_data, expires_at FROM cached_responses WHERE cache_key = ?",
        )
        .bind(&key)
        .fetch_optional(self.db.pool())
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let expires_at: i64 = row.try_get("expires_at")?;
        if expires_at <= now.timestamp_micros() {
            sqlx::query("DELETE FROM cached_responses WHERE cache_key = ?")
                .bind(&key)
                .execute(self.db.pool())
                .await?;
            tracing::trace!(cache_key = %key, "expired cache entry evicted");
            return Ok(None);
        }

        sqlx::query(
            "UPDATE cached_responses SET hit_count = hit_count + 1, last_accessed = ? WHERE cache_key = ?",
        )
        .bind(now.timestamp_micros())
        .bind(&key)
        .execute(self.db.pool())
        .await?;

        Ok(Some(row.try_get("response_data")?))
    }

    pub async fn put(
        &self,
        model_id: &str,
        prompt: &str,
        response_data: &str,
    ) -> Result<(), GatewayError> {
        let request_hash = Self::request_hash(prompt);
        let key = Self::cache_key(model_id, &request_hash);
        let now = self.clock.now();

        sqlx::query(
            "INSERT OR REPLACE INTO cached_responses
                (cache_key, model_id, request_hash, response_data, cached_at, expires_at, hit_count, last_accessed)
             VALUES (?, ?, ?, ?, ?, ?, 0, ?)",
        )
        .bind(&key)
        .bind(model_id)
        .bind(&request_hash)
        .bind(response_data)
        .bind(now.timestamp_micros())
        .bind((now + self.ttl).timestamp_micros())
        .bind(now.timestamp_micros())
        .execute(self.db.pool())
        .await?;

        self.enforce_capacity().await?;
        Ok(())
    }

    /// Delete expired entries. Returns the count removed.
    pub async fn evict_expired(&self) -> Result<u64, GatewayError> {
        let result = sqlx::query("DELETE FROM cached_responses WHERE expires_at <= ?")
            .bind(self.clock.now().timestamp_micros())
            .execute(self.db.pool())
            .await?;
        Ok(result.rows_affected())
    }

    /// Least-recently-accessed entries beyond `max_entries` are dropped.
    async fn enforce_capacity(&self) -> Result<(), GatewayError> {
        let result = sqlx::query(
            "DELETE FROM cached_responses WHERE cache_key IN (
                SELECT cache_key FROM cached_responses
                ORDER BY last_accessed DESC
                LIMIT -1 OFFSET ?
            )",
        )
        .bind(self.max_entries as i64)
        .execute(self.db.pool())
        .await?;

        if result.rows_affected() > 0 {
            tracing::debug!(evicted = result.rows_affected(), "cache trimmed to capacity");
        }
        Ok(())
    }

    /// Full entry, for inspection.
    pub async fn entry(
        &self,
        model_id: &str,
        prompt: &str,
    ) -> Result<Option<CacheEntry>, GatewayError> {
        let key = Self::cache_key(model_id, &Self::request_hash(prompt));
        let row = sqlx::query(
            "SELECT cache_key, model_id, request_hash, response_data, cached_at, expires_at, hit_count, last_accessed
             FROM cached_responses WHERE cache_key = ?",
        )
        .bind(&key)
        .fetch_optional(self.db.pool())
        .await?;

        row.map(|row| {
            Ok(CacheEntry {
                cache_key: row.try_get("cache_key")?,
                model_id: row.try_get("model_id")?,
                request_hash: row.try_get("request_hash")?,
                response_data: row.try_get("response_data")?,
                cached_at: DateTime::from_timestamp_micros(row.try_get("cached_at")?)
                    .unwrap_or_else(Utc::now),
                expires_at: DateTime::from_timestamp_micros(row.try_get("expires_at")?)
                    .unwrap_or_else(Utc::now),
                hit_count: row.try_get::<i64, _>("hit_count")? as u64,
                last_accessed: DateTime::from_timestamp_micros(row.try_get("last_accessed")?)
                    .unwrap_or_else(Utc::now),
            })
        })
        .transpose()
    }

    pub async fn len(&self) -> Result<u64, GatewayError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM cached_responses")
            .fetch_one(self.db.pool())
            .await?;
        Ok(row.try_get::<i64, _>("n")? as u64)
    }

    pub async fn is_empty(&self) -> Result<bool, GatewayError> {
        Ok(self.len().await? == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;

    async fn cache(ttl_seconds: u64, max_entries: u64) -> (ResponseCache, Arc<ManualClock>) {
        let db = Arc::new(DatabaseManager::open_in_memory().await.unwrap());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 6, 2, 12, 0, 0).unwrap(),
        ));
        (
            ResponseCache::new(db, clock.clone() as Arc<dyn Clock>, ttl_seconds, max_entries),
            clock,
        )
    }

    #[tokio::test]
    async fn hit_increments_count_and_touches_access_time() {
        let (cache, clock) = cache(3600, 100).await;
        cache.put("m1", "what is rust", "a language").await.unwrap();

        assert_eq!(
            cache.get("m1", "what is rust").await.unwrap().as_deref(),
            Some("a language")
        );
        clock.advance(Duration::seconds(5));
        assert!(cache.get("m1", "what is rust").await.unwrap().is_some());

        let entry = cache.entry("m1", "what is rust").await.unwrap().unwrap();
        assert_eq!(entry.hit_count, 2);
        assert!(entry.last_accessed > entry.cached_at);
    }

    #[tokio::test]
    async fn expired_entries_are_skipped_and_removed() {
        let (cache, clock) = cache(60, 100).await;
        cache.put("m1", "prompt", "cached").await.unwrap();

        clock.advance(Duration::seconds(61));
        assert!(cache.get("m1", "prompt").await.unwrap().is_none());
        assert!(cache.entry("m1", "prompt").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn keys_are_scoped_per_model() {
        let (cache, _clock) = cache(3600, 100).await;
        cache.put("m1", "prompt", "from m1").await.unwrap();
        assert!(cache.get("m2", "prompt").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn normalization_ignores_surrounding_whitespace() {
        let (cache, _clock) = cache(3600, 100).await;
        cache.put("m1", "prompt", "cached").await.unwrap();
        assert!(cache.get("m1", "  prompt  ").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn capacity_evicts_least_recently_accessed() {
        let (cache, clock) = cache(3600, 2).await;
        cache.put("m1", "first", "1").await.unwrap();
        clock.advance(Duration::seconds(1));
        cache.put("m1", "second", "2").await.unwrap();
        clock.advance(Duration::seconds(1));
        // Touch "first" so "second" is now the coldest.
        cache.get("m1", "first").await.unwrap();
        clock.advance(Duration::seconds(1));
        cache.put("m1", "third", "3").await.unwrap();

        assert_eq!(cache.len().await.unwrap(), 2);
        assert!(cache.get("m1", "second").await.unwrap().is_none());
        assert!(cache.get("m1", "first").await.unwrap().is_some());
        assert!(cache.get("m1", "third").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn evict_expired_reports_count() {
        let (cache, clock) = cache(60, 100).await;
        cache.put("m1", "a", "1").await.unwrap();
        cache.put("m1", "b", "2").await.unwrap();
        clock.advance(Duration::seconds(61));
        cache.put("m1", "c", "3").await.unwrap();

        assert_eq!(cache.evict_expired().await.unwrap(), 2);
        assert_eq!(cache.len().await.unwrap(), 1);
    }
}
