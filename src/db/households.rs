//! Household row storage
//!
//! Placement, identity and classification metadata are written by the
//! household service through [`insert_household`] / [`update_household`].
//! Aggregate columns and the head reference are only touched by
//! [`write_aggregates`], which the household aggregator owns.

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use super::models::{double_option, HouseholdType, HousingUnitType, IncomeTier, TenureStatus};
use crate::error::RegistryError;

/// Household row from database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HouseholdRow {
    pub id: String,
    pub household_code: String,
    pub house_number: Option<String>,

    pub barangay_code: String,
    pub city_code: String,
    pub province_code: Option<String>,
    pub region_code: String,
    pub subdivision_id: Option<String>,
    pub street_id: Option<String>,
    pub house_seq: i64,

    pub household_type: Option<HouseholdType>,
    pub tenure_status: Option<TenureStatus>,
    pub unit_type: Option<HousingUnitType>,

    pub head_resident_id: Option<String>,
    pub household_name: Option<String>,
    pub member_count: i64,
    pub migrant_count: i64,
    pub monthly_income_centavos: i64,
    pub income_tier: IncomeTier,

    pub is_active: bool,
    pub created_by: String,
    pub updated_by: String,
    pub created_at: String,
    pub updated_at: String,
}

impl HouseholdRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            household_code: row.get("household_code")?,
            house_number: row.get("house_number")?,
            barangay_code: row.get("barangay_code")?,
            city_code: row.get("city_code")?,
            province_code: row.get("province_code")?,
            region_code: row.get("region_code")?,
            subdivision_id: row.get("subdivision_id")?,
            street_id: row.get("street_id")?,
            house_seq: row.get("house_seq")?,
            household_type: row.get("household_type")?,
            tenure_status: row.get("tenure_status")?,
            unit_type: row.get("unit_type")?,
            head_resident_id: row.get("head_resident_id")?,
            household_name: row.get("household_name")?,
            member_count: row.get("member_count")?,
            migrant_count: row.get("migrant_count")?,
            monthly_income_centavos: row.get("monthly_income_centavos")?,
            income_tier: row.get("income_tier")?,
            is_active: row.get("is_active")?,
            created_by: row.get("created_by")?,
            updated_by: row.get("updated_by")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    /// Current aggregate columns
    pub fn aggregates(&self) -> HouseholdAggregates {
        HouseholdAggregates {
            member_count: self.member_count,
            migrant_count: self.migrant_count,
            monthly_income_centavos: self.monthly_income_centavos,
            income_tier: self.income_tier,
            head_resident_id: self.head_resident_id.clone(),
            household_name: self.household_name.clone(),
        }
    }
}

/// Aggregate columns of a household, derived from its active members
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HouseholdAggregates {
    pub member_count: i64,
    pub migrant_count: i64,
    pub monthly_income_centavos: i64,
    pub income_tier: IncomeTier,
    pub head_resident_id: Option<String>,
    pub household_name: Option<String>,
}

impl Default for HouseholdAggregates {
    fn default() -> Self {
        Self {
            member_count: 0,
            migrant_count: 0,
            monthly_income_centavos: 0,
            income_tier: IncomeTier::Poor,
            head_resident_id: None,
            household_name: None,
        }
    }
}

/// Input for registering a household
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateHouseholdInput {
    /// Leaf geographic unit; the actor's jurisdiction is used when absent
    #[serde(default)]
    pub barangay_code: Option<String>,
    #[serde(default)]
    pub subdivision_id: Option<String>,
    #[serde(default)]
    pub street_id: Option<String>,
    #[serde(default)]
    pub house_number: Option<String>,
    #[serde(default)]
    pub household_type: Option<HouseholdType>,
    #[serde(default)]
    pub tenure_status: Option<TenureStatus>,
    #[serde(default)]
    pub unit_type: Option<HousingUnitType>,
}

/// Partial update; absent fields are left unchanged.
///
/// Changing the barangay, subdivision or street moves the household to a new
/// identity scope and regenerates its code.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateHouseholdInput {
    pub barangay_code: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub subdivision_id: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub street_id: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub house_number: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub household_type: Option<Option<HouseholdType>>,
    #[serde(default, deserialize_with = "double_option")]
    pub tenure_status: Option<Option<TenureStatus>>,
    #[serde(default, deserialize_with = "double_option")]
    pub unit_type: Option<Option<HousingUnitType>>,
}

impl UpdateHouseholdInput {
    /// Whether the update touches the identity scope
    pub fn changes_placement(&self) -> bool {
        self.barangay_code.is_some() || self.subdivision_id.is_some() || self.street_id.is_some()
    }
}

/// Query for households within a jurisdiction by income tier
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HouseholdTierQuery {
    /// Matches any level of the stored chain (region/province/city/barangay)
    pub jurisdiction: String,
    /// Empty matches every tier
    #[serde(default)]
    pub tiers: Vec<IncomeTier>,
    #[serde(default)]
    pub include_inactive: bool,
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

fn default_limit() -> u32 { 100 }

/// Get household by ID
pub fn get_household(conn: &Connection, id: &str) -> Result<Option<HouseholdRow>, RegistryError> {
    conn.query_row("SELECT * FROM households WHERE id = ?", params![id], HouseholdRow::from_row)
        .optional()
        .map_err(RegistryError::from)
}

/// Get household by ID, failing with NotFound when absent
pub fn require_household(conn: &Connection, id: &str) -> Result<HouseholdRow, RegistryError> {
    get_household(conn, id)?.ok_or_else(|| RegistryError::not_found("Household", id))
}

/// Get household by its composite code
pub fn get_household_by_code(conn: &Connection, code: &str) -> Result<Option<HouseholdRow>, RegistryError> {
    conn.query_row(
        "SELECT * FROM households WHERE household_code = ?",
        params![code],
        HouseholdRow::from_row,
    )
    .optional()
    .map_err(RegistryError::from)
}

/// Insert a household row.
///
/// A duplicate `household_code` surfaces as a unique-violation database
/// error; the identity allocation loop turns it into a retry.
pub fn insert_household(conn: &Connection, h: &HouseholdRow) -> Result<(), RegistryError> {
    conn.execute(
        r#"
        INSERT INTO households (
            id, household_code, house_number,
            barangay_code, city_code, province_code, region_code,
            subdivision_id, street_id, house_seq,
            household_type, tenure_status, unit_type,
            head_resident_id, household_name, member_count, migrant_count,
            monthly_income_centavos, income_tier,
            is_active, created_by, updated_by, created_at, updated_at
        ) VALUES (
            ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12,
            ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24
        )
        "#,
        params![
            h.id, h.household_code, h.house_number,
            h.barangay_code, h.city_code, h.province_code, h.region_code,
            h.subdivision_id, h.street_id, h.house_seq,
            h.household_type, h.tenure_status, h.unit_type,
            h.head_resident_id, h.household_name, h.member_count, h.migrant_count,
            h.monthly_income_centavos, h.income_tier,
            h.is_active, h.created_by, h.updated_by, h.created_at, h.updated_at,
        ],
    )?;
    Ok(())
}

/// Overwrite placement, identity and metadata columns.
///
/// Aggregate columns are left alone.
pub fn update_household(conn: &Connection, h: &HouseholdRow) -> Result<(), RegistryError> {
    let changed = conn.execute(
        r#"
        UPDATE households SET
            household_code = ?2, house_number = ?3,
            barangay_code = ?4, city_code = ?5, province_code = ?6, region_code = ?7,
            subdivision_id = ?8, street_id = ?9, house_seq = ?10,
            household_type = ?11, tenure_status = ?12, unit_type = ?13,
            is_active = ?14, updated_by = ?15, updated_at = ?16
        WHERE id = ?1
        "#,
        params![
            h.id, h.household_code, h.house_number,
            h.barangay_code, h.city_code, h.province_code, h.region_code,
            h.subdivision_id, h.street_id, h.house_seq,
            h.household_type, h.tenure_status, h.unit_type,
            h.is_active, h.updated_by, h.updated_at,
        ],
    )?;

    if changed == 0 {
        return Err(RegistryError::not_found("Household", &h.id));
    }
    Ok(())
}

/// Write the aggregate columns and head reference
pub(crate) fn write_aggregates(
    conn: &Connection,
    household_id: &str,
    aggregates: &HouseholdAggregates,
    updated_by: &str,
    updated_at: &str,
) -> Result<(), RegistryError> {
    let changed = conn.execute(
        r#"
        UPDATE households SET
            member_count = ?2, migrant_count = ?3, monthly_income_centavos = ?4,
            income_tier = ?5, head_resident_id = ?6, household_name = ?7,
            updated_by = ?8, updated_at = ?9
        WHERE id = ?1
        "#,
        params![
            household_id,
            aggregates.member_count,
            aggregates.migrant_count,
            aggregates.monthly_income_centavos,
            aggregates.income_tier,
            aggregates.head_resident_id,
            aggregates.household_name,
            updated_by,
            updated_at,
        ],
    )?;

    if changed == 0 {
        return Err(RegistryError::not_found("Household", household_id));
    }
    Ok(())
}

/// Largest house sequence already used in a (barangay, subdivision, street) scope
pub fn max_house_seq(
    conn: &Connection,
    barangay_code: &str,
    subdivision_id: Option<&str>,
    street_id: Option<&str>,
) -> Result<i64, RegistryError> {
    // `IS` compares NULL scopes as equal
    let max: i64 = conn.query_row(
        r#"
        SELECT COALESCE(MAX(house_seq), 0) FROM households
        WHERE barangay_code = ?1 AND subdivision_id IS ?2 AND street_id IS ?3
        "#,
        params![barangay_code, subdivision_id, street_id],
        |row| row.get(0),
    )?;
    Ok(max)
}

/// Households within a jurisdiction in any of the requested tiers
pub fn list_by_tier(conn: &Connection, query: &HouseholdTierQuery) -> Result<Vec<HouseholdRow>, RegistryError> {
    let mut conditions = vec![
        "(barangay_code = ?1 OR city_code = ?1 OR province_code = ?1 OR region_code = ?1)".to_string(),
    ];
    if !query.include_inactive {
        conditions.push("is_active = 1".to_string());
    }
    if !query.tiers.is_empty() {
        let tags: Vec<String> = query.tiers.iter().map(|t| format!("'{}'", t.as_str())).collect();
        conditions.push(format!("income_tier IN ({})", tags.join(", ")));
    }

    let sql = format!(
        "SELECT * FROM households WHERE {} ORDER BY household_code LIMIT ?2 OFFSET ?3",
        conditions.join(" AND ")
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![query.jurisdiction, query.limit, query.offset], HouseholdRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(rows)
}
