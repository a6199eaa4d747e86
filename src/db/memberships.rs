//! Household membership storage
//!
//! The membership table is the single association between residents and
//! households. Rows are never deleted: leaving a household clears
//! `is_active` and stamps `left_at`.

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use super::models::MemberPosition;
use crate::error::RegistryError;

/// Membership row from database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipRow {
    pub id: String,
    pub household_id: String,
    pub resident_id: String,
    pub position: MemberPosition,
    pub is_active: bool,
    pub joined_at: String,
    pub left_at: Option<String>,
    pub created_by: String,
    pub updated_by: String,
    pub created_at: String,
    pub updated_at: String,
}

impl MembershipRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            household_id: row.get("household_id")?,
            resident_id: row.get("resident_id")?,
            position: row.get("position")?,
            is_active: row.get("is_active")?,
            joined_at: row.get("joined_at")?,
            left_at: row.get("left_at")?,
            created_by: row.get("created_by")?,
            updated_by: row.get("updated_by")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Aggregation inputs of one active member
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveMember {
    pub membership_id: String,
    pub resident_id: String,
    pub position: MemberPosition,
    pub last_name: String,
    pub monthly_income_centavos: i64,
    pub is_migrant: bool,
}

pub fn get_membership(conn: &Connection, id: &str) -> Result<Option<MembershipRow>, RegistryError> {
    conn.query_row(
        "SELECT * FROM household_members WHERE id = ?",
        params![id],
        MembershipRow::from_row,
    )
    .optional()
    .map_err(RegistryError::from)
}

/// Get membership by ID, failing with NotFound when absent
pub fn require_membership(conn: &Connection, id: &str) -> Result<MembershipRow, RegistryError> {
    get_membership(conn, id)?.ok_or_else(|| RegistryError::not_found("Household membership", id))
}

/// The resident's active membership, if any
pub fn active_for_resident(conn: &Connection, resident_id: &str) -> Result<Option<MembershipRow>, RegistryError> {
    conn.query_row(
        "SELECT * FROM household_members WHERE resident_id = ? AND is_active = 1",
        params![resident_id],
        MembershipRow::from_row,
    )
    .optional()
    .map_err(RegistryError::from)
}

/// The household's active head membership, if any
pub fn active_head(conn: &Connection, household_id: &str) -> Result<Option<MembershipRow>, RegistryError> {
    conn.query_row(
        "SELECT * FROM household_members WHERE household_id = ? AND is_active = 1 AND position = 'head'",
        params![household_id],
        MembershipRow::from_row,
    )
    .optional()
    .map_err(RegistryError::from)
}

/// Memberships of a household in join order
pub fn for_household(
    conn: &Connection,
    household_id: &str,
    include_inactive: bool,
) -> Result<Vec<MembershipRow>, RegistryError> {
    let sql = if include_inactive {
        "SELECT * FROM household_members WHERE household_id = ? ORDER BY joined_at, id"
    } else {
        "SELECT * FROM household_members WHERE household_id = ? AND is_active = 1 ORDER BY joined_at, id"
    };

    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params![household_id], MembershipRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(rows)
}

/// Read the aggregation inputs of every active member of a household
pub fn active_member_inputs(conn: &Connection, household_id: &str) -> Result<Vec<ActiveMember>, RegistryError> {
    let mut stmt = conn.prepare(
        r#"
        SELECT m.id, m.resident_id, m.position, r.last_name, r.monthly_income_centavos, r.is_migrant
        FROM household_members m
        JOIN residents r ON r.id = m.resident_id
        WHERE m.household_id = ? AND m.is_active = 1
        ORDER BY m.joined_at, m.id
        "#,
    )?;

    let rows = stmt
        .query_map(params![household_id], |row| {
            Ok(ActiveMember {
                membership_id: row.get(0)?,
                resident_id: row.get(1)?,
                position: row.get(2)?,
                last_name: row.get(3)?,
                monthly_income_centavos: row.get(4)?,
                is_migrant: row.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(rows)
}

pub fn insert_membership(conn: &Connection, m: &MembershipRow) -> Result<(), RegistryError> {
    conn.execute(
        r#"
        INSERT INTO household_members (
            id, household_id, resident_id, position, is_active, joined_at, left_at,
            created_by, updated_by, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
        "#,
        params![
            m.id, m.household_id, m.resident_id, m.position, m.is_active, m.joined_at, m.left_at,
            m.created_by, m.updated_by, m.created_at, m.updated_at,
        ],
    )?;
    Ok(())
}

/// Overwrite position, activity and stamps of an existing membership
pub fn update_membership(conn: &Connection, m: &MembershipRow) -> Result<(), RegistryError> {
    let changed = conn.execute(
        r#"
        UPDATE household_members SET
            position = ?2, is_active = ?3, left_at = ?4, updated_by = ?5, updated_at = ?6
        WHERE id = ?1
        "#,
        params![m.id, m.position, m.is_active, m.left_at, m.updated_by, m.updated_at],
    )?;

    if changed == 0 {
        return Err(RegistryError::not_found("Household membership", &m.id));
    }
    Ok(())
}
