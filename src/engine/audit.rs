//! Audit recording for registry mutations
//!
//! Snapshots are the serde representation of the row before and after the
//! mutation. The record is written on the mutation's own connection, so it
//! commits or rolls back with it.

use rusqlite::Connection;
use serde::Serialize;
use tracing::debug;

use crate::db::audit::{self, NewAuditEntry};
use crate::db::{ActorContext, AuditEntity, AuditEntry, AuditOperation};
use crate::error::RegistryError;

/// Record one mutation of `record_id`
#[allow(clippy::too_many_arguments)]
pub fn record<T: Serialize>(
    conn: &Connection,
    entity: AuditEntity,
    operation: AuditOperation,
    record_id: &str,
    before: Option<&T>,
    after: Option<&T>,
    actor: &ActorContext,
    at: &str,
) -> Result<AuditEntry, RegistryError> {
    let before = before.map(serde_json::to_value).transpose()?;
    let after = after.map(serde_json::to_value).transpose()?;

    let entry = audit::append(conn, NewAuditEntry {
        entity,
        record_id,
        operation,
        before,
        after,
        user_id: actor.user_id(),
        jurisdiction: actor.jurisdiction(),
        recorded_at: at,
    })?;

    debug!(
        seq = entry.seq,
        entity = %entity,
        record_id = %record_id,
        operation = %operation,
        actor = %actor,
        "Audit entry recorded"
    );
    Ok(entry)
}

pub fn record_create<T: Serialize>(
    conn: &Connection,
    entity: AuditEntity,
    record_id: &str,
    after: &T,
    actor: &ActorContext,
    at: &str,
) -> Result<AuditEntry, RegistryError> {
    record(conn, entity, AuditOperation::Create, record_id, None, Some(after), actor, at)
}

pub fn record_update<T: Serialize>(
    conn: &Connection,
    entity: AuditEntity,
    record_id: &str,
    before: &T,
    after: &T,
    actor: &ActorContext,
    at: &str,
) -> Result<AuditEntry, RegistryError> {
    record(conn, entity, AuditOperation::Update, record_id, Some(before), Some(after), actor, at)
}

pub fn record_deactivate<T: Serialize>(
    conn: &Connection,
    entity: AuditEntity,
    record_id: &str,
    before: &T,
    after: &T,
    actor: &ActorContext,
    at: &str,
) -> Result<AuditEntry, RegistryError> {
    record(conn, entity, AuditOperation::Deactivate, record_id, Some(before), Some(after), actor, at)
}
