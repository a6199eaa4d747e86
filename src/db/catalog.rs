//! Reference catalog lookups (geographic units and occupations)
//!
//! The catalogs are filled by external import pipelines; the registry only
//! reads them. `upsert_*` exists for seeding and tests.

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use super::models::GeoLevel;
use crate::error::RegistryError;

/// One unit of the geographic reference hierarchy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeoUnit {
    pub code: String,
    pub name: String,
    pub level: GeoLevel,
    pub parent_code: Option<String>,
}

impl GeoUnit {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            code: row.get("code")?,
            name: row.get("name")?,
            level: row.get("level")?,
            parent_code: row.get("parent_code")?,
        })
    }
}

/// Occupation descriptor from the occupation code catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Occupation {
    pub code: String,
    pub title: String,
    pub major_group: Option<String>,
}

impl Occupation {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            code: row.get("code")?,
            title: row.get("title")?,
            major_group: row.get("major_group")?,
        })
    }
}

/// Get a geographic unit by code
pub fn get_geo_unit(conn: &Connection, code: &str) -> Result<Option<GeoUnit>, RegistryError> {
    conn.query_row(
        "SELECT code, name, level, parent_code FROM geo_units WHERE code = ?",
        params![code],
        GeoUnit::from_row,
    )
    .optional()
    .map_err(RegistryError::from)
}

/// Get a geographic unit by code, failing with NotFound when absent
pub fn lookup_geo_unit(conn: &Connection, code: &str) -> Result<GeoUnit, RegistryError> {
    get_geo_unit(conn, code)?.ok_or_else(|| RegistryError::not_found("Geographic unit", code))
}

/// Insert or replace a geographic unit
pub fn upsert_geo_unit(conn: &Connection, unit: &GeoUnit) -> Result<(), RegistryError> {
    conn.execute(
        r#"
        INSERT INTO geo_units (code, name, level, parent_code) VALUES (?, ?, ?, ?)
        ON CONFLICT(code) DO UPDATE SET
            name = excluded.name,
            level = excluded.level,
            parent_code = excluded.parent_code
        "#,
        params![unit.code, unit.name, unit.level, unit.parent_code],
    )?;
    Ok(())
}

/// Get an occupation by code, failing with NotFound when absent
pub fn lookup_occupation(conn: &Connection, code: &str) -> Result<Occupation, RegistryError> {
    conn.query_row(
        "SELECT code, title, major_group FROM occupations WHERE code = ?",
        params![code],
        Occupation::from_row,
    )
    .optional()?
    .ok_or_else(|| RegistryError::not_found("Occupation", code))
}

/// Search occupations by code prefix or title substring
pub fn search_occupations(
    conn: &Connection,
    text: &str,
    limit: u32,
) -> Result<Vec<Occupation>, RegistryError> {
    let mut stmt = conn.prepare(
        r#"
        SELECT code, title, major_group FROM occupations
        WHERE code LIKE ?1 || '%' OR title LIKE '%' || ?1 || '%'
        ORDER BY code
        LIMIT ?2
        "#,
    )?;

    let rows = stmt
        .query_map(params![text, limit], Occupation::from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(rows)
}

/// Insert or replace an occupation
pub fn upsert_occupation(conn: &Connection, occupation: &Occupation) -> Result<(), RegistryError> {
    conn.execute(
        r#"
        INSERT INTO occupations (code, title, major_group) VALUES (?, ?, ?)
        ON CONFLICT(code) DO UPDATE SET
            title = excluded.title,
            major_group = excluded.major_group
        "#,
        params![occupation.code, occupation.title, occupation.major_group],
    )?;
    Ok(())
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
    fn test_geo_unit_lookup() {
        let conn = conn();
        upsert_geo_unit(&conn, &GeoUnit {
            code: "040000000".into(),
            name: "CALABARZON".into(),
            level: GeoLevel::Region,
            parent_code: None,
        })
        .unwrap();

        let unit = lookup_geo_unit(&conn, "040000000").unwrap();
        assert_eq!(unit.level, GeoLevel::Region);

        let missing = lookup_geo_unit(&conn, "999999999").unwrap_err();
        assert!(matches!(missing, RegistryError::NotFound { .. }));
    }

    #[test]
    fn test_occupation_search() {
        let conn = conn();
        for (code, title) in [("2211", "Generalist medical practitioners"), ("6111", "Field crop growers")] {
            upsert_occupation(&conn, &Occupation {
                code: code.into(),
                title: title.into(),
                major_group: None,
            })
            .unwrap();
        }

        let by_title = search_occupations(&conn, "crop", 10).unwrap();
        assert_eq!(by_title.len(), 1);
        assert_eq!(by_title[0].code, "6111");

        let by_code = search_occupations(&conn, "22", 10).unwrap();
        assert_eq!(by_code[0].title, "Generalist medical practitioners");

        assert!(lookup_occupation(&conn, "0000").is_err());
    }
}
