//! Per-scope sequence counters
//!
//! Allocation is a single upsert statement, so two units of work can never
//! be handed the same value for a scope: the statement runs under the
//! transaction's write lock and the counter row only moves forward.

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::RegistryError;

/// Allocate the next value for `scope_key`.
///
/// `floor` is the largest value already in use in the scope; the result is
/// always greater than both `floor` and the last issued value.
pub fn allocate(conn: &Connection, scope_key: &str, floor: i64) -> Result<i64, RegistryError> {
    let value: i64 = conn.query_row(
        r#"
        INSERT INTO sequence_counters (scope_key, last_value) VALUES (?1, ?2 + 1)
        ON CONFLICT(scope_key) DO UPDATE SET
            last_value = MAX(sequence_counters.last_value, ?2) + 1
        RETURNING last_value
        "#,
        params![scope_key, floor],
        |row| row.get(0),
    )?;
    Ok(value)
}

/// Last value issued for a scope, if any
pub fn current(conn: &Connection, scope_key: &str) -> Result<Option<i64>, RegistryError> {
    conn.query_row(
        "SELECT last_value FROM sequence_counters WHERE scope_key = ?",
        params![scope_key],
        |row| row.get(0),
    )
    .optional()
    .map_err(RegistryError::from)
}

/// Scope key for subdivision numbering within a barangay
pub fn subdivision_scope(barangay_code: &str) -> String {
    format!("subdivision:{}", barangay_code)
}

/// Scope key for street numbering within (barangay, subdivision)
pub fn street_scope(barangay_code: &str, subdivision_id: Option<&str>) -> String {
    format!("street:{}:{}", barangay_code, subdivision_id.unwrap_or("-"))
}

/// Scope key for house numbering within (barangay, subdivision, street)
pub fn house_scope(barangay_code: &str, subdivision_id: Option<&str>, street_id: Option<&str>) -> String {
    format!(
        "house:{}:{}:{}",
        barangay_code,
        subdivision_id.unwrap_or("-"),
        street_id.unwrap_or("-")
    )
}
