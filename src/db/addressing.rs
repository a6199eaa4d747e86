//! Subdivisions and streets registered under a barangay
//!
//! Each row receives its sequence number at registration: the creation-order
//! rank within its scope, drawn from the scope's counter.

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::sequences;
use crate::error::RegistryError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubdivisionRow {
    pub id: String,
    pub barangay_code: String,
    pub name: String,
    pub sequence_no: i64,
    pub created_by: String,
    pub created_at: String,
}

impl SubdivisionRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            barangay_code: row.get("barangay_code")?,
            name: row.get("name")?,
            sequence_no: row.get("sequence_no")?,
            created_by: row.get("created_by")?,
            created_at: row.get("created_at")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreetRow {
    pub id: String,
    pub barangay_code: String,
    pub subdivision_id: Option<String>,
    pub name: String,
    pub sequence_no: i64,
    pub created_by: String,
    pub created_at: String,
}

impl StreetRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            barangay_code: row.get("barangay_code")?,
            subdivision_id: row.get("subdivision_id")?,
            name: row.get("name")?,
            sequence_no: row.get("sequence_no")?,
            created_by: row.get("created_by")?,
            created_at: row.get("created_at")?,
        })
    }
}

pub fn get_subdivision(conn: &Connection, id: &str) -> Result<Option<SubdivisionRow>, RegistryError> {
    conn.query_row(
        "SELECT * FROM subdivisions WHERE id = ?",
        params![id],
        SubdivisionRow::from_row,
    )
    .optional()
    .map_err(RegistryError::from)
}

pub fn get_street(conn: &Connection, id: &str) -> Result<Option<StreetRow>, RegistryError> {
    conn.query_row("SELECT * FROM streets WHERE id = ?", params![id], StreetRow::from_row)
        .optional()
        .map_err(RegistryError::from)
}

/// Register a subdivision under a barangay
pub fn create_subdivision(
    conn: &Connection,
    barangay_code: &str,
    name: &str,
    created_by: &str,
    now: &str,
) -> Result<SubdivisionRow, RegistryError> {
    let floor: i64 = conn.query_row(
        "SELECT COALESCE(MAX(sequence_no), 0) FROM subdivisions WHERE barangay_code = ?",
        params![barangay_code],
        |row| row.get(0),
    )?;
    let sequence_no = sequences::allocate(conn, &sequences::subdivision_scope(barangay_code), floor)?;
    let id = Uuid::new_v4().to_string();

    conn.execute(
        r#"
        INSERT INTO subdivisions (id, barangay_code, name, sequence_no, created_by, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
        params![id, barangay_code, name, sequence_no, created_by, now],
    )?;

    get_subdivision(conn, &id)?
        .ok_or_else(|| RegistryError::Internal("Subdivision not found after insert".into()))
}

/// Register a street under (barangay, subdivision)
pub fn create_street(
    conn: &Connection,
    barangay_code: &str,
    subdivision_id: Option<&str>,
    name: &str,
    created_by: &str,
    now: &str,
) -> Result<StreetRow, RegistryError> {
    let scope_key = sequences::street_scope(barangay_code, subdivision_id);
    let floor: i64 = conn.query_row(
        "SELECT COALESCE(MAX(sequence_no), 0) FROM streets WHERE scope_key = ?",
        params![scope_key],
        |row| row.get(0),
    )?;
    let sequence_no = sequences::allocate(conn, &scope_key, floor)?;
    let id = Uuid::new_v4().to_string();

    conn.execute(
        r#"
        INSERT INTO streets (id, barangay_code, subdivision_id, scope_key, name, sequence_no, created_by, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        params![id, barangay_code, subdivision_id, scope_key, name, sequence_no, created_by, now],
    )?;

    get_street(conn, &id)?
        .ok_or_else(|| RegistryError::Internal("Street not found after insert".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::init_schema;

    #[test]
    fn test_sequence_numbers_follow_creation_order_per_scope() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        let now = "2024-01-01T00:00:00.000000Z";

        let a = create_subdivision(&conn, "042114014", "Villa Aurora", "u1", now).unwrap();
        let b = create_subdivision(&conn, "042114014", "Camella", "u1", now).unwrap();
        let other = create_subdivision(&conn, "042114015", "Lancaster", "u1", now).unwrap();
        assert_eq!((a.sequence_no, b.sequence_no, other.sequence_no), (1, 2, 1));

        let s1 = create_street(&conn, "042114014", Some(&a.id), "Rizal St", "u1", now).unwrap();
        let s2 = create_street(&conn, "042114014", None, "Mabini St", "u1", now).unwrap();
        let s3 = create_street(&conn, "042114014", Some(&a.id), "Bonifacio St", "u1", now).unwrap();
        assert_eq!((s1.sequence_no, s2.sequence_no, s3.sequence_no), (1, 1, 2));
    }

    #[test]
    fn test_duplicate_subdivision_name_is_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        let now = "2024-01-01T00:00:00.000000Z";

        create_subdivision(&conn, "042114014", "Villa Aurora", "u1", now).unwrap();
        let err = create_subdivision(&conn, "042114014", "Villa Aurora", "u1", now).unwrap_err();
        assert!(err.is_unique_violation());
    }
}
