//! Embedded store initialization and forward-only migrations
//!
//! One SQLite database backs the whole kernel: the audit trail plus the
//! cost, performance, cache, health, and rate-limit tables used by the model
//! gateway. The schema evolves through numbered migrations recorded in
//! `schema_version`; opening a database written by a newer binary fails.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::path::{Path, PathBuf};

use crate::AuditError;

/// Highest schema version this binary understands.
pub const SCHEMA_VERSION: i64 = 1;

const TABLES: &[&str] = &[
    "audit_entries",
    "cost_records",
    "performance_records",
    "cached_responses",
    "health_checks",
    "rate_limit_events",
    "failover_events",
    "schema_version",
];

/// Owns the SQLite pool and the schema lifecycle.
#[derive(Debug, Clone)]
pub struct DatabaseManager {
    pool: SqlitePool,
    path: Option<PathBuf>,
}

impl DatabaseManager {
    /// Open (creating if necessary) the store at `path` and bring the schema
    /// up to [`SCHEMA_VERSION`].
    pub async fn open(path: &Path) -> Result<Self, AuditError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let manager = Self {
            pool,
            path: Some(path.to_path_buf()),
        };
        manager.initialize().await?;
        Ok(manager)
    }

    /// Open a private in-memory store. Single connection: every connection
    /// to `:memory:` is a distinct database.
    pub async fn open_in_memory() -> Result<Self, AuditError> {
        let options = SqliteConnectOptions::new()
            .filename(":memory:")
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let manager = Self { pool, path: None };
        manager.initialize().await?;
        Ok(manager)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    async fn initialize(&self) -> Result<(), AuditError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        let current = self.schema_version().await?;
        if current > SCHEMA_VERSION {
            return Err(AuditError::SchemaVersion {
                found: current,
                supported: SCHEMA_VERSION,
            });
        }

        if current < SCHEMA_VERSION {
            tracing::info!(
                from_version = current,
                to_version = SCHEMA_VERSION,
                "migrating embedded store"
            );
            self.run_migrations(current).await?;
        }

        Ok(())
    }

    async fn schema_version(&self) -> Result<i64, AuditError> {
        let row = sqlx::query("SELECT MAX(version) AS version FROM schema_version")
            .fetch_one(&self.pool)
            .await?;
        let version: Option<i64> = row.try_get("version")?;
        Ok(version.unwrap_or(0))
    }

    async fn run_migrations(&self, from: i64) -> Result<(), AuditError> {
        if from < 1 {
            self.migrate_to_v1().await?;
            self.set_schema_version(1).await?;
        }
        Ok(())
    }

    async fn set_schema_version(&self, version: i64) -> Result<(), AuditError> {
        sqlx::query("INSERT INTO schema_version (version, applied_at) VALUES (?, ?)")
            .bind(version)
            .bind(chrono::Utc::now().timestamp_micros())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn migrate_to_v1(&self) -> Result<(), AuditError> {
        let statements = [
            "CREATE TABLE IF NOT EXISTS audit_entries (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                timestamp INTEGER NOT NULL,
                kind TEXT NOT NULL,
                severity TEXT NOT NULL,
                user_id TEXT,
                conversation_id TEXT,
                request_id TEXT,
                workflow_id TEXT,
                agent_id TEXT,
                action TEXT NOT NULL,
                category TEXT NOT NULL,
                payload TEXT,
                metadata TEXT
            )",
            "CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_entries(timestamp)",
            "CREATE INDEX IF NOT EXISTS idx_audit_user_id ON audit_entries(user_id)",
            "CREATE INDEX IF NOT EXISTS idx_audit_request_id ON audit_entries(request_id)",
            "CREATE INDEX IF NOT EXISTS idx_audit_workflow_id ON audit_entries(workflow_id)",
            "CREATE INDEX IF NOT EXISTS idx_audit_kind ON audit_entries(kind)",
            "CREATE INDEX IF NOT EXISTS idx_audit_category ON audit_entries(category)",
            "CREATE INDEX IF NOT EXISTS idx_audit_severity ON audit_entries(severity)",
            "CREATE TABLE IF NOT EXISTS cost_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp INTEGER NOT NULL,
                model_id TEXT NOT NULL,
                agent_role TEXT NOT NULL,
                task_id TEXT NOT NULL,
                input_tokens INTEGER NOT NULL,
                output_tokens INTEGER NOT NULL,
                cost REAL NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_cost_timestamp ON cost_records(timestamp)",
            "CREATE INDEX IF NOT EXISTS idx_cost_model_id ON cost_records(model_id)",
            "CREATE INDEX IF NOT EXISTS idx_cost_agent_role ON cost_records(agent_role)",
            "CREATE TABLE IF NOT EXISTS performance_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp INTEGER NOT NULL,
                model_id TEXT NOT NULL,
                agent_role TEXT NOT NULL,
                task_id TEXT NOT NULL,
                latency_ms REAL NOT NULL,
                success INTEGER NOT NULL,
                quality_score REAL
            )",
            "CREATE INDEX IF NOT EXISTS idx_perf_timestamp ON performance_records(timestamp)",
            "CREATE INDEX IF NOT EXISTS idx_perf_model_id ON performance_records(model_id)",
            "CREATE TABLE IF NOT EXISTS cached_responses (
                cache_key TEXT PRIMARY KEY,
                model_id TEXT NOT NULL,
                request_hash TEXT NOT NULL,
                response_data TEXT NOT NULL,
                cached_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL,
                hit_count INTEGER NOT NULL DEFAULT 0,
                last_accessed INTEGER NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_cache_expires_at ON cached_responses(expires_at)",
            "CREATE INDEX IF NOT EXISTS idx_cache_last_accessed ON cached_responses(last_accessed)",
            "CREATE TABLE IF NOT EXISTS health_checks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp INTEGER NOT NULL,
                model_id TEXT NOT NULL,
                is_available INTEGER NOT NULL,
                response_time_ms REAL,
                error_message TEXT
            )",
            "CREATE INDEX IF NOT EXISTS idx_health_timestamp ON health_checks(timestamp)",
            "CREATE INDEX IF NOT EXISTS idx_health_model_id ON health_checks(model_id)",
            "CREATE TABLE IF NOT EXISTS rate_limit_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp INTEGER NOT NULL,
                model_id TEXT NOT NULL,
                event_type TEXT NOT NULL,
                reset_time INTEGER
            )",
            "CREATE INDEX IF NOT EXISTS idx_ratelimit_timestamp ON rate_limit_events(timestamp)",
            "CREATE INDEX IF NOT EXISTS idx_ratelimit_model_id ON rate_limit_events(model_id)",
            "CREATE TABLE IF NOT EXISTS failover_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp INTEGER NOT NULL,
                original_model TEXT NOT NULL,
                alternative_model TEXT NOT NULL,
                reason TEXT NOT NULL,
                task_id TEXT NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_failover_timestamp ON failover_events(timestamp)",
            "CREATE INDEX IF NOT EXISTS idx_failover_original_model ON failover_events(original_model)",
        ];

        for statement in statements {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        tracing::debug!("embedded store migrated to v1");
        Ok(())
    }

    /// Check that every expected table exists.
    pub async fn verify_schema(&self) -> Result<bool, AuditError> {
        let rows = sqlx::query(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
        )
        .fetch_all(&self.pool)
        .await?;

        let existing: std::collections::HashSet<String> = rows
            .iter()
            .map(|row| row.try_get::<String, _>("name"))
            .collect::<Result<_, _>>()?;

        let missing: Vec<&&str> = TABLES.iter().filter(|t| !existing.contains(**t)).collect();
        if !missing.is_empty() {
            tracing::error!(?missing, "embedded store is missing tables");
            return Ok(false);
        }
        Ok(true)
    }

    /// Delete rows older than `days_to_keep` from one of the known
    /// timestamped tables. Returns the number of rows removed.
    pub async fn cleanup_old_records(
        &self,
        table: &str,
        days_to_keep: u32,
    ) -> Result<u64, AuditError> {
        // Table names cannot be bound as parameters, so only allow known ones.
        if !TABLES.contains(&table) || table == "schema_version" || table == "cached_responses" {
            return Err(AuditError::UnknownTable(table.to_string()));
        }

        let cutoff = chrono::Utc::now() - chrono::Duration::days(i64::from(days_to_keep));
        let result = sqlx::query(&format!("DELETE FROM {table} WHERE timestamp < ?"))
            .bind(cutoff.timestamp_micros())
            .execute(&self.pool)
            .await?;

        tracing::info!(
            table = table,
            deleted = result.rows_affected(),
            days_to_keep = days_to_keep,
            "cleaned up old records"
        );
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fresh_store_reaches_current_version() {
        let db = DatabaseManager::open_in_memory().await.unwrap();
        assert_eq!(db.schema_version().await.unwrap(), SCHEMA_VERSION);
        assert!(db.verify_schema().await.unwrap());
    }

    #[tokio::test]
    async fn newer_schema_is_refused() {
        let db = DatabaseManager::open_in_memory().await.unwrap();
        db.set_schema_version(SCHEMA_VERSION + 1).await.unwrap();

        let result = db.initialize().await;
        assert!(matches!(
            result,
            Err(AuditError::SchemaVersion { found, .. }) if found == SCHEMA_VERSION + 1
        ));
    }

    #[tokio::test]
    async fn cleanup_rejects_unknown_tables() {
        let db = DatabaseManager::open_in_memory().await.unwrap();
        assert!(matches!(
            db.cleanup_old_records("users; DROP TABLE audit_entries", 30).await,
            Err(AuditError::UnknownTable(_))
        ));
    }

    #[tokio::test]
    async fn open_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("store.db");
        let db = DatabaseManager::open(&path).await.unwrap();
        assert!(db.verify_schema().await.unwrap());
        assert!(path.exists());
    }
}
