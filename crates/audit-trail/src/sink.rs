//! The `AuditSink` capability
//!
//! Components do not reach for a global trail; they are handed an
//! `Arc<dyn AuditSink>` at construction. Production wires in [`AuditTrail`],
//! tests wire in [`InMemoryAuditSink`].

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::entry::AuditEntry;
use crate::trail::AuditTrail;
use crate::AuditError;

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, entry: AuditEntry) -> Result<Uuid, AuditError>;
}

#[async_trait]
impl AuditSink for AuditTrail {
    async fn record(&self, entry: AuditEntry) -> Result<Uuid, AuditError> {
        AuditTrail::record(self, entry).await
    }
}

/// Collects entries in memory. Intended for tests.
#[derive(Debug, Default)]
pub struct InMemoryAuditSink {
    entries: Mutex<Vec<AuditEntry>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditSink {
    async fn record(&self, entry: AuditEntry) -> Result<Uuid, AuditError> {
        let id = entry.id;
        self.entries.lock().push(entry);
        Ok(id)
    }
}

/// Discards everything. Useful when a component is exercised in isolation
/// and the trail is irrelevant.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullAuditSink;

#[async_trait]
impl AuditSink for NullAuditSink {
    async fn record(&self, entry: AuditEntry) -> Result<Uuid, AuditError> {
        Ok(entry.id)
    }
}
