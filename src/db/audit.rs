//! Append-only audit log storage
//!
//! Each entry carries a SHA-256 chain hash over the previous entry's hash
//! and its own stored content. Rewriting any stored entry (bypassing the
//! table triggers) breaks the chain from that entry on.

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::models::text_enum;
use crate::error::RegistryError;

text_enum! {
    /// Audited entity kinds
    pub enum AuditEntity as "entity" {
        Resident => "resident",
        Household => "household",
        HouseholdMembership => "household_membership",
    }
}

text_enum! {
    pub enum AuditOperation as "operation" {
        Create => "create",
        Update => "update",
        Deactivate => "deactivate",
    }
}

/// Hash preceding the first entry
const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// One stored audit entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEntry {
    pub seq: i64,
    pub entity: AuditEntity,
    pub record_id: String,
    pub operation: AuditOperation,
    pub before: Option<serde_json::Value>,
    pub after: Option<serde_json::Value>,
    pub user_id: String,
    pub jurisdiction: String,
    pub recorded_at: String,
    pub chain_hash: String,
}

/// Entry as stored: snapshots kept as the exact text that was hashed
struct StoredEntry {
    seq: i64,
    entity: AuditEntity,
    record_id: String,
    operation: AuditOperation,
    before_json: Option<String>,
    after_json: Option<String>,
    user_id: String,
    jurisdiction: String,
    recorded_at: String,
    chain_hash: String,
}

impl StoredEntry {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            seq: row.get("seq")?,
            entity: row.get("entity")?,
            record_id: row.get("record_id")?,
            operation: row.get("operation")?,
            before_json: row.get("before_json")?,
            after_json: row.get("after_json")?,
            user_id: row.get("user_id")?,
            jurisdiction: row.get("jurisdiction")?,
            recorded_at: row.get("recorded_at")?,
            chain_hash: row.get("chain_hash")?,
        })
    }

    fn content(&self) -> EntryContent<'_> {
        EntryContent {
            entity: self.entity,
            record_id: &self.record_id,
            operation: self.operation,
            before_json: self.before_json.as_deref(),
            after_json: self.after_json.as_deref(),
            user_id: &self.user_id,
            jurisdiction: &self.jurisdiction,
            recorded_at: &self.recorded_at,
        }
    }

    fn into_entry(self) -> Result<AuditEntry, RegistryError> {
        let parse = |json: Option<String>| -> Result<Option<serde_json::Value>, RegistryError> {
            json.map(|s| serde_json::from_str(&s)).transpose().map_err(RegistryError::from)
        };
        Ok(AuditEntry {
            seq: self.seq,
            entity: self.entity,
            record_id: self.record_id,
            operation: self.operation,
            before: parse(self.before_json)?,
            after: parse(self.after_json)?,
            user_id: self.user_id,
            jurisdiction: self.jurisdiction,
            recorded_at: self.recorded_at,
            chain_hash: self.chain_hash,
        })
    }
}

/// The hashed part of an entry
struct EntryContent<'a> {
    entity: AuditEntity,
    record_id: &'a str,
    operation: AuditOperation,
    before_json: Option<&'a str>,
    after_json: Option<&'a str>,
    user_id: &'a str,
    jurisdiction: &'a str,
    recorded_at: &'a str,
}

impl EntryContent<'_> {
    fn chain_hash(&self, prev_hash: &str) -> String {
        let mut hasher = Sha256::new();
        hash_field(&mut hasher, prev_hash);
        hash_field(&mut hasher, self.entity.as_str());
        hash_field(&mut hasher, self.record_id);
        hash_field(&mut hasher, self.operation.as_str());
        hash_snapshot(&mut hasher, self.before_json);
        hash_snapshot(&mut hasher, self.after_json);
        hash_field(&mut hasher, self.user_id);
        hash_field(&mut hasher, self.jurisdiction);
        hash_field(&mut hasher, self.recorded_at);
        hex::encode(hasher.finalize())
    }
}

/// Length prefix keeps field boundaries unambiguous
fn hash_field(hasher: &mut Sha256, value: &str) {
    hasher.update((value.len() as u64).to_be_bytes());
    hasher.update(value.as_bytes());
}

/// Presence tag first, so an absent snapshot never collides with a JSON `null`
fn hash_snapshot(hasher: &mut Sha256, value: Option<&str>) {
    match value {
        Some(json) => {
            hasher.update([1u8]);
            hash_field(hasher, json);
        }
        None => hasher.update([0u8]),
    }
}

/// Input for one audit record
#[derive(Debug, Clone)]
pub struct NewAuditEntry<'a> {
    pub entity: AuditEntity,
    pub record_id: &'a str,
    pub operation: AuditOperation,
    pub before: Option<serde_json::Value>,
    pub after: Option<serde_json::Value>,
    pub user_id: &'a str,
    pub jurisdiction: &'a str,
    pub recorded_at: &'a str,
}

/// Hash of the latest entry, or the genesis hash for an empty log
pub fn last_hash(conn: &Connection) -> Result<String, RegistryError> {
    let hash: Option<String> = conn
        .query_row("SELECT chain_hash FROM audit_log ORDER BY seq DESC LIMIT 1", [], |row| row.get(0))
        .optional()?;
    Ok(hash.unwrap_or_else(|| GENESIS_HASH.to_string()))
}

/// Append an entry, chaining it to the latest stored entry
pub fn append(conn: &Connection, new: NewAuditEntry<'_>) -> Result<AuditEntry, RegistryError> {
    let before_json = new.before.as_ref().map(serde_json::to_string).transpose()?;
    let after_json = new.after.as_ref().map(serde_json::to_string).transpose()?;

    let content = EntryContent {
        entity: new.entity,
        record_id: new.record_id,
        operation: new.operation,
        before_json: before_json.as_deref(),
        after_json: after_json.as_deref(),
        user_id: new.user_id,
        jurisdiction: new.jurisdiction,
        recorded_at: new.recorded_at,
    };
    let chain_hash = content.chain_hash(&last_hash(conn)?);

    conn.execute(
        r#"
        INSERT INTO audit_log (
            entity, record_id, operation, before_json, after_json,
            user_id, jurisdiction, recorded_at, chain_hash
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        "#,
        params![
            new.entity, new.record_id, new.operation, before_json, after_json,
            new.user_id, new.jurisdiction, new.recorded_at, chain_hash,
        ],
    )?;

    Ok(AuditEntry {
        seq: conn.last_insert_rowid(),
        entity: new.entity,
        record_id: new.record_id.to_string(),
        operation: new.operation,
        before: new.before,
        after: new.after,
        user_id: new.user_id.to_string(),
        jurisdiction: new.jurisdiction.to_string(),
        recorded_at: new.recorded_at.to_string(),
        chain_hash,
    })
}

/// Audit history of one record, oldest first
pub fn history(conn: &Connection, entity: AuditEntity, record_id: &str) -> Result<Vec<AuditEntry>, RegistryError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM audit_log WHERE entity = ? AND record_id = ? ORDER BY seq",
    )?;
    let stored = stmt
        .query_map(params![entity, record_id], StoredEntry::from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    stored.into_iter().map(StoredEntry::into_entry).collect()
}

/// Outcome of walking the whole chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainReport {
    pub entries_checked: u64,
    /// Sequence number of the first entry whose hash does not match
    pub first_broken_seq: Option<i64>,
}

impl ChainReport {
    pub fn is_intact(&self) -> bool {
        self.first_broken_seq.is_none()
    }
}

/// Recompute every chain hash in sequence order
pub fn verify_chain(conn: &Connection) -> Result<ChainReport, RegistryError> {
    let mut stmt = conn.prepare("SELECT * FROM audit_log ORDER BY seq")?;
    let mut rows = stmt.query([])?;

    let mut prev = GENESIS_HASH.to_string();
    let mut entries_checked = 0u64;
    while let Some(row) = rows.next()? {
        let entry = StoredEntry::from_row(row)?;
        entries_checked += 1;
        if entry.content().chain_hash(&prev) != entry.chain_hash {
            return Ok(ChainReport {
                entries_checked,
                first_broken_seq: Some(entry.seq),
            });
        }
        prev = entry.chain_hash;
    }

    Ok(ChainReport {
        entries_checked,
        first_broken_seq: None,
    })
}
