//! Durable audit trail for the orchestration kernel
//!
//! Every significant decision in the system lands here: request ingress,
//! workflow decisions, agent lifecycle events, and errors. Entries are
//! persisted to a single embedded SQLite store with secondary indexes for
//! point-in-time queries. Writes are never silently dropped; a failed write
//! surfaces to the caller.

pub mod database;
pub mod entry;
pub mod sink;
pub mod trail;

pub use database::{DatabaseManager, SCHEMA_VERSION};
pub use entry::{
    ActorIds, AuditEntry, AuditPayload, EntryFilter, EntryKind, Severity,
};
pub use sink::{AuditSink, InMemoryAuditSink, NullAuditSink};
pub use trail::{AuditTrail, ErrorSummary, UserActivitySummary};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("schema version {found} is newer than supported version {supported}")]
    SchemaVersion { found: i64, supported: i64 },

    #[error("unknown table: {0}")]
    UnknownTable(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid stored value: {0}")]
    Decode(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
