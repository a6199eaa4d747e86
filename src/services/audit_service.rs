//! Audit service - read access to the mutation history

use std::sync::Arc;

use tracing::{info, warn};

use crate::db::audit::{self, ChainReport};
use crate::db::{AuditEntity, AuditEntry, RegistryDb};
use crate::error::RegistryError;

/// Audit service
pub struct AuditService {
    db: Arc<RegistryDb>,
}

impl AuditService {
    pub fn new(db: Arc<RegistryDb>) -> Self {
        Self { db }
    }

    /// Every entry recorded for one record, oldest first
    pub fn history(&self, entity: AuditEntity, record_id: &str) -> Result<Vec<AuditEntry>, RegistryError> {
        self.db.with_conn(|conn| audit::history(conn, entity, record_id))
    }

    /// Walk the whole hash chain
    pub fn verify_chain(&self) -> Result<ChainReport, RegistryError> {
        let report = self.db.with_conn(audit::verify_chain)?;
        match report.first_broken_seq {
            None => info!(entries = report.entries_checked, "Audit chain intact"),
            Some(seq) => warn!(seq, entries = report.entries_checked, "Audit chain broken"),
        }
        Ok(report)
    }
}
