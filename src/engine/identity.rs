//! Household identity codes
//!
//! A household code is `LLLLLLLLL-SSSS-TTTT-HHHH`: the 9-digit barangay
//! code, then the subdivision, street and house sequence numbers, each
//! zero-padded to four digits. `0000` marks a missing subdivision or street.

use std::fmt;
use std::str::FromStr;

use rusqlite::Connection;
use tracing::warn;

use crate::db::{addressing, households, sequences};
use crate::error::RegistryError;

/// Digits in a barangay (leaf) code
pub const LEAF_CODE_LEN: usize = 9;

/// Largest sequence number a four-digit segment can carry
pub const MAX_SEQUENCE: i64 = 9999;

/// A validated 9-digit leaf code: region (2), province (2),
/// city/municipality (2), barangay (3)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LeafCode(String);

impl LeafCode {
    pub fn parse(code: &str) -> Result<Self, RegistryError> {
        if code.len() != LEAF_CODE_LEN || !code.bytes().all(|b| b.is_ascii_digit()) {
            return Err(RegistryError::validation(
                "barangay_code",
                format!("'{}' is not a {}-digit code", code, LEAF_CODE_LEN),
            ));
        }
        Ok(Self(code.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn region_segment(&self) -> &str {
        &self.0[0..2]
    }

    pub fn province_segment(&self) -> &str {
        &self.0[2..4]
    }

    pub fn city_segment(&self) -> &str {
        &self.0[4..6]
    }

    pub fn barangay_segment(&self) -> &str {
        &self.0[6..9]
    }

    /// Leading digits shared by every unit in the same city/municipality
    pub fn city_prefix(&self) -> &str {
        &self.0[0..6]
    }
}

impl fmt::Display for LeafCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for LeafCode {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Composite household identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HouseholdCode {
    leaf: LeafCode,
    subdivision_seq: i64,
    street_seq: i64,
    house_seq: i64,
}

impl HouseholdCode {
    pub fn new(leaf: LeafCode, subdivision_seq: i64, street_seq: i64, house_seq: i64) -> Result<Self, RegistryError> {
        check_segment("subdivision_seq", subdivision_seq, 0)?;
        check_segment("street_seq", street_seq, 0)?;
        check_segment("house_seq", house_seq, 1)?;
        Ok(Self {
            leaf,
            subdivision_seq,
            street_seq,
            house_seq,
        })
    }

    /// Validate and decompose a persisted code
    pub fn parse(code: &str) -> Result<Self, RegistryError> {
        let invalid = || RegistryError::validation("household_code", format!("malformed household code '{}'", code));

        let mut parts = code.split('-');
        let (Some(leaf), Some(sub), Some(street), Some(house), None) =
            (parts.next(), parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };

        let seq = |part: &str| -> Result<i64, RegistryError> {
            if part.len() != 4 || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid());
            }
            part.parse().map_err(|_| invalid())
        };

        let leaf = LeafCode::parse(leaf).map_err(|_| invalid())?;
        Self::new(leaf, seq(sub)?, seq(street)?, seq(house)?)
    }

    pub fn leaf(&self) -> &LeafCode {
        &self.leaf
    }

    pub fn subdivision_seq(&self) -> i64 {
        self.subdivision_seq
    }

    pub fn street_seq(&self) -> i64 {
        self.street_seq
    }

    pub fn house_seq(&self) -> i64 {
        self.house_seq
    }
}

impl fmt::Display for HouseholdCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{:04}-{:04}-{:04}",
            self.leaf, self.subdivision_seq, self.street_seq, self.house_seq
        )
    }
}

impl FromStr for HouseholdCode {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn check_segment(field: &str, value: i64, min: i64) -> Result<(), RegistryError> {
    if value > MAX_SEQUENCE {
        return Err(RegistryError::validation(
            field,
            format!("sequence {} exceeds the four-digit limit {}", value, MAX_SEQUENCE),
        ));
    }
    if value < min {
        return Err(RegistryError::validation(field, format!("sequence {} is below {}", value, min)));
    }
    Ok(())
}

/// Resolve the subdivision/street sequence numbers of a placement and
/// allocate the next house sequence in its scope.
///
/// The subdivision and street must be registered under `leaf`, and the
/// street under the same subdivision.
pub fn allocate_code(
    conn: &Connection,
    leaf: &LeafCode,
    subdivision_id: Option<&str>,
    street_id: Option<&str>,
) -> Result<HouseholdCode, RegistryError> {
    let subdivision_seq = match subdivision_id {
        Some(id) => {
            let subdivision = addressing::get_subdivision(conn, id)?
                .ok_or_else(|| RegistryError::not_found("Subdivision", id))?;
            if subdivision.barangay_code != leaf.as_str() {
                return Err(RegistryError::validation(
                    "subdivision_id",
                    format!("subdivision {} is registered under {}, not {}", id, subdivision.barangay_code, leaf),
                ));
            }
            subdivision.sequence_no
        }
        None => 0,
    };

    let street_seq = match street_id {
        Some(id) => {
            let street = addressing::get_street(conn, id)?
                .ok_or_else(|| RegistryError::not_found("Street", id))?;
            if street.barangay_code != leaf.as_str() {
                return Err(RegistryError::validation(
                    "street_id",
                    format!("street {} is registered under {}, not {}", id, street.barangay_code, leaf),
                ));
            }
            if street.subdivision_id.as_deref() != subdivision_id {
                return Err(RegistryError::validation(
                    "street_id",
                    format!("street {} belongs to a different subdivision", id),
                ));
            }
            street.sequence_no
        }
        None => 0,
    };

    let floor = households::max_house_seq(conn, leaf.as_str(), subdivision_id, street_id)?;
    let scope = sequences::house_scope(leaf.as_str(), subdivision_id, street_id);
    let house_seq = sequences::allocate(conn, &scope, floor)?;

    HouseholdCode::new(leaf.clone(), subdivision_seq, street_seq, house_seq)
}

/// Allocate a code and hand it to `write`, retrying with a fresh
/// allocation when the write hits the code's UNIQUE constraint.
///
/// Gives up with a Conflict after `retry_limit` attempts.
pub fn with_fresh_code<T, F>(
    conn: &Connection,
    leaf: &LeafCode,
    subdivision_id: Option<&str>,
    street_id: Option<&str>,
    retry_limit: u32,
    mut write: F,
) -> Result<T, RegistryError>
where
    F: FnMut(&HouseholdCode) -> Result<T, RegistryError>,
{
    let attempts = retry_limit.max(1);
    for attempt in 1..=attempts {
        let code = allocate_code(conn, leaf, subdivision_id, street_id)?;
        match write(&code) {
            Err(e) if e.is_unique_violation() => {
                warn!(code = %code, attempt, "Household code collision, allocating again");
            }
            other => return other,
        }
    }

    Err(RegistryError::Conflict(format!(
        "could not allocate a unique household code in {} after {} attempts",
        sequences::house_scope(leaf.as_str(), subdivision_id, street_id),
        attempts
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::init_schema;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn
    }

    #[test]
    fn test_leaf_code_segments() {
        let leaf = LeafCode::parse("042114014").unwrap();
        assert_eq!(leaf.region_segment(), "04");
        assert_eq!(leaf.province_segment(), "21");
        assert_eq!(leaf.city_segment(), "14");
        assert_eq!(leaf.barangay_segment(), "014");
        assert_eq!(leaf.city_prefix(), "042114");
    }

    #[test]
    fn test_malformed_leaf_codes() {
        for bad in ["04211401", "0421140141", "04211401A", ""] {
            let err = LeafCode::parse(bad).unwrap_err();
            assert_eq!(err.field(), Some("barangay_code"));
        }
    }

    #[test]
    fn test_household_code_format_and_parse() {
        let code = HouseholdCode::new(LeafCode::parse("042114014").unwrap(), 0, 3, 12).unwrap();
        assert_eq!(code.to_string(), "042114014-0000-0003-0012");

        let parsed: HouseholdCode = "042114014-0000-0003-0012".parse().unwrap();
        assert_eq!(parsed, code);

        for bad in ["042114014-0000-0003", "042114014-000-0003-0012", "042114014-0000-0003-0000", "x-0000-0000-0001"] {
            assert!(HouseholdCode::parse(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn test_sequence_beyond_four_digits_is_rejected() {
        let leaf = LeafCode::parse("042114014").unwrap();
        let err = HouseholdCode::new(leaf, 0, 0, 10_000).unwrap_err();
        assert!(matches!(err, RegistryError::Validation { .. }));
    }

    #[test]
    fn test_allocation_in_scope() {
        let conn = conn();
        let leaf = LeafCode::parse("042114014").unwrap();
        let now = "2024-01-01T00:00:00.000000Z";

        assert_eq!(allocate_code(&conn, &leaf, None, None).unwrap().to_string(), "042114014-0000-0000-0001");
        assert_eq!(allocate_code(&conn, &leaf, None, None).unwrap().to_string(), "042114014-0000-0000-0002");

        addressing::create_subdivision(&conn, "042114014", "Villa Aurora", "u1", now).unwrap();
        let sub = addressing::create_subdivision(&conn, "042114014", "Camella", "u1", now).unwrap();
        let street = addressing::create_street(&conn, "042114014", Some(&sub.id), "Rizal St", "u1", now).unwrap();

        let code = allocate_code(&conn, &leaf, Some(&sub.id), Some(&street.id)).unwrap();
        assert_eq!(code.to_string(), "042114014-0002-0001-0001");
    }

    #[test]
    fn test_foreign_scope_references_are_rejected() {
        let conn = conn();
        let now = "2024-01-01T00:00:00.000000Z";
        let other = addressing::create_subdivision(&conn, "042114015", "Lancaster", "u1", now).unwrap();
        let loose = addressing::create_street(&conn, "042114014", None, "Mabini St", "u1", now).unwrap();
        let sub = addressing::create_subdivision(&conn, "042114014", "Camella", "u1", now).unwrap();
        let leaf = LeafCode::parse("042114014").unwrap();

        let err = allocate_code(&conn, &leaf, Some(&other.id), None).unwrap_err();
        assert_eq!(err.field(), Some("subdivision_id"));

        let err = allocate_code(&conn, &leaf, Some(&sub.id), Some(&loose.id)).unwrap_err();
        assert_eq!(err.field(), Some("street_id"));

        assert!(matches!(
            allocate_code(&conn, &leaf, Some("missing"), None),
            Err(RegistryError::NotFound { .. })
        ));
    }

    #[test]
    fn test_collision_retries_then_conflicts() {
        let conn = conn();
        let leaf = LeafCode::parse("042114014").unwrap();
        conn.execute("INSERT INTO sequence_counters (scope_key, last_value) VALUES ('dup', 1)", []).unwrap();

        let mut calls = 0;
        let code = with_fresh_code(&conn, &leaf, None, None, 5, |code| {
            calls += 1;
            if calls < 3 {
                conn.execute("INSERT INTO sequence_counters (scope_key, last_value) VALUES ('dup', 1)", [])?;
            }
            Ok(code.to_string())
        });
        // First two attempts collide on the counter primary key
        assert_eq!(code.unwrap(), "042114014-0000-0000-0003");

        let err = with_fresh_code(&conn, &leaf, None, None, 2, |_| {
            conn.execute("INSERT INTO sequence_counters (scope_key, last_value) VALUES ('dup', 1)", [])?;
            Ok(())
        })
        .unwrap_err();
        assert!(matches!(err, RegistryError::Conflict(_)));
    }
}
