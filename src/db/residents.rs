//! Resident row storage
//!
//! Rows are written whole: the resident service assembles the complete row
//! (inputs, derived flags, geography, stamps) and this module persists it.

use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use super::models::{double_option, CivilStatus, EducationLevel, EmploymentStatus, MemberPosition, SectorFlag, Sex};
use crate::error::RegistryError;

/// Resident row from database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResidentRow {
    pub id: String,
    pub first_name: String,
    pub middle_name: Option<String>,
    pub last_name: String,
    pub extension_name: Option<String>,
    pub birthdate: NaiveDate,
    pub sex: Sex,
    pub civil_status: CivilStatus,
    pub education_level: EducationLevel,
    pub education_completed: bool,
    pub employment_status: Option<EmploymentStatus>,
    pub occupation_code: Option<String>,

    pub region_code: String,
    pub province_code: Option<String>,
    pub city_code: String,
    pub barangay_code: String,

    pub monthly_income_centavos: i64,

    pub is_senior_citizen: bool,
    pub is_labor_force: bool,
    pub is_employed: bool,
    pub is_unemployed: bool,
    pub is_out_of_school_children: bool,
    pub is_out_of_school_youth: bool,

    pub is_migrant: bool,
    pub is_person_with_disability: bool,
    pub is_solo_parent: bool,
    pub is_indigenous: bool,
    pub is_overseas_worker: bool,
    pub is_registered_senior_citizen: bool,

    pub is_active: bool,
    pub created_by: String,
    pub updated_by: String,
    pub created_at: String,
    pub updated_at: String,

    /// Household of the active membership; resolved on read, never stored
    /// on the row and never part of an audit snapshot
    #[serde(skip)]
    pub household_id: Option<String>,
}

impl ResidentRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            first_name: row.get("first_name")?,
            middle_name: row.get("middle_name")?,
            last_name: row.get("last_name")?,
            extension_name: row.get("extension_name")?,
            birthdate: row.get("birthdate")?,
            sex: row.get("sex")?,
            civil_status: row.get("civil_status")?,
            education_level: row.get("education_level")?,
            education_completed: row.get("education_completed")?,
            employment_status: row.get("employment_status")?,
            occupation_code: row.get("occupation_code")?,
            region_code: row.get("region_code")?,
            province_code: row.get("province_code")?,
            city_code: row.get("city_code")?,
            barangay_code: row.get("barangay_code")?,
            monthly_income_centavos: row.get("monthly_income_centavos")?,
            is_senior_citizen: row.get("is_senior_citizen")?,
            is_labor_force: row.get("is_labor_force")?,
            is_employed: row.get("is_employed")?,
            is_unemployed: row.get("is_unemployed")?,
            is_out_of_school_children: row.get("is_out_of_school_children")?,
            is_out_of_school_youth: row.get("is_out_of_school_youth")?,
            is_migrant: row.get("is_migrant")?,
            is_person_with_disability: row.get("is_person_with_disability")?,
            is_solo_parent: row.get("is_solo_parent")?,
            is_indigenous: row.get("is_indigenous")?,
            is_overseas_worker: row.get("is_overseas_worker")?,
            is_registered_senior_citizen: row.get("is_registered_senior_citizen")?,
            is_active: row.get("is_active")?,
            created_by: row.get("created_by")?,
            updated_by: row.get("updated_by")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            household_id: row.get("household_id")?,
        })
    }

    /// Read a sector flag by name
    pub fn flag(&self, flag: SectorFlag) -> bool {
        match flag {
            SectorFlag::SeniorCitizen => self.is_senior_citizen,
            SectorFlag::LaborForce => self.is_labor_force,
            SectorFlag::Employed => self.is_employed,
            SectorFlag::Unemployed => self.is_unemployed,
            SectorFlag::OutOfSchoolChildren => self.is_out_of_school_children,
            SectorFlag::OutOfSchoolYouth => self.is_out_of_school_youth,
            SectorFlag::Migrant => self.is_migrant,
            SectorFlag::PersonWithDisability => self.is_person_with_disability,
            SectorFlag::SoloParent => self.is_solo_parent,
            SectorFlag::Indigenous => self.is_indigenous,
            SectorFlag::OverseasWorker => self.is_overseas_worker,
            SectorFlag::RegisteredSeniorCitizen => self.is_registered_senior_citizen,
        }
    }

    pub fn full_name(&self) -> String {
        let mut parts = vec![self.first_name.as_str()];
        if let Some(middle) = self.middle_name.as_deref() {
            parts.push(middle);
        }
        parts.push(&self.last_name);
        if let Some(ext) = self.extension_name.as_deref() {
            parts.push(ext);
        }
        parts.join(" ")
    }
}

/// Input for registering a resident
#[derive(Debug, Clone, Deserialize)]
pub struct CreateResidentInput {
    pub first_name: String,
    #[serde(default)]
    pub middle_name: Option<String>,
    pub last_name: String,
    #[serde(default)]
    pub extension_name: Option<String>,
    pub birthdate: NaiveDate,
    pub sex: Sex,
    pub civil_status: CivilStatus,
    pub education_level: EducationLevel,
    #[serde(default)]
    pub education_completed: bool,
    #[serde(default)]
    pub employment_status: Option<EmploymentStatus>,
    #[serde(default)]
    pub occupation_code: Option<String>,
    /// Leaf geographic unit; the actor's jurisdiction is used when absent
    #[serde(default)]
    pub barangay_code: Option<String>,
    #[serde(default)]
    pub monthly_income_centavos: i64,
    #[serde(default)]
    pub is_migrant: bool,
    #[serde(default)]
    pub is_person_with_disability: bool,
    #[serde(default)]
    pub is_solo_parent: bool,
    #[serde(default)]
    pub is_indigenous: bool,
    #[serde(default)]
    pub is_overseas_worker: bool,
    #[serde(default)]
    pub is_registered_senior_citizen: bool,
    /// Join this household in the same unit of work
    #[serde(default)]
    pub household_id: Option<String>,
    #[serde(default)]
    pub position: Option<MemberPosition>,
}

/// Partial update; absent fields are left unchanged.
///
/// Nullable columns use `Option<Option<_>>`: `Some(None)` clears the value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateResidentInput {
    pub first_name: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub middle_name: Option<Option<String>>,
    pub last_name: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub extension_name: Option<Option<String>>,
    pub birthdate: Option<NaiveDate>,
    pub sex: Option<Sex>,
    pub civil_status: Option<CivilStatus>,
    pub education_level: Option<EducationLevel>,
    pub education_completed: Option<bool>,
    #[serde(default, deserialize_with = "double_option")]
    pub employment_status: Option<Option<EmploymentStatus>>,
    #[serde(default, deserialize_with = "double_option")]
    pub occupation_code: Option<Option<String>>,
    pub barangay_code: Option<String>,
    pub monthly_income_centavos: Option<i64>,
    pub is_migrant: Option<bool>,
    pub is_person_with_disability: Option<bool>,
    pub is_solo_parent: Option<bool>,
    pub is_indigenous: Option<bool>,
    pub is_overseas_worker: Option<bool>,
    pub is_registered_senior_citizen: Option<bool>,
}

/// Query for residents carrying every listed flag within a jurisdiction
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResidentFlagQuery {
    /// Matches any level of the stored chain (region/province/city/barangay)
    pub jurisdiction: String,
    #[serde(default)]
    pub flags: Vec<SectorFlag>,
    #[serde(default)]
    pub include_inactive: bool,
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

fn default_limit() -> u32 { 100 }

const SELECT_RESIDENT: &str = r#"
    SELECT r.*,
        (SELECT m.household_id FROM household_members m
         WHERE m.resident_id = r.id AND m.is_active = 1) AS household_id
    FROM residents r
"#;

/// Get resident by ID
pub fn get_resident(conn: &Connection, id: &str) -> Result<Option<ResidentRow>, RegistryError> {
    conn.query_row(
        &format!("{} WHERE r.id = ?", SELECT_RESIDENT),
        params![id],
        ResidentRow::from_row,
    )
    .optional()
    .map_err(RegistryError::from)
}

/// Get resident by ID, failing with NotFound when absent
pub fn require_resident(conn: &Connection, id: &str) -> Result<ResidentRow, RegistryError> {
    get_resident(conn, id)?.ok_or_else(|| RegistryError::not_found("Resident", id))
}

/// Insert a fully assembled resident row
pub fn insert_resident(conn: &Connection, r: &ResidentRow) -> Result<(), RegistryError> {
    conn.execute(
        r#"
        INSERT INTO residents (
            id, first_name, middle_name, last_name, extension_name,
            birthdate, sex, civil_status, education_level, education_completed,
            employment_status, occupation_code,
            region_code, province_code, city_code, barangay_code,
            monthly_income_centavos,
            is_senior_citizen, is_labor_force, is_employed, is_unemployed,
            is_out_of_school_children, is_out_of_school_youth,
            is_migrant, is_person_with_disability, is_solo_parent, is_indigenous,
            is_overseas_worker, is_registered_senior_citizen,
            is_active, created_by, updated_by, created_at, updated_at
        ) VALUES (
            ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17,
            ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28, ?29, ?30, ?31, ?32, ?33, ?34
        )
        "#,
        params![
            r.id, r.first_name, r.middle_name, r.last_name, r.extension_name,
            r.birthdate, r.sex, r.civil_status, r.education_level, r.education_completed,
            r.employment_status, r.occupation_code,
            r.region_code, r.province_code, r.city_code, r.barangay_code,
            r.monthly_income_centavos,
            r.is_senior_citizen, r.is_labor_force, r.is_employed, r.is_unemployed,
            r.is_out_of_school_children, r.is_out_of_school_youth,
            r.is_migrant, r.is_person_with_disability, r.is_solo_parent, r.is_indigenous,
            r.is_overseas_worker, r.is_registered_senior_citizen,
            r.is_active, r.created_by, r.updated_by, r.created_at, r.updated_at,
        ],
    )?;
    Ok(())
}

/// Overwrite every mutable column of an existing resident
pub fn update_resident(conn: &Connection, r: &ResidentRow) -> Result<(), RegistryError> {
    let changed = conn.execute(
        r#"
        UPDATE residents SET
            first_name = ?2, middle_name = ?3, last_name = ?4, extension_name = ?5,
            birthdate = ?6, sex = ?7, civil_status = ?8, education_level = ?9,
            education_completed = ?10, employment_status = ?11, occupation_code = ?12,
            region_code = ?13, province_code = ?14, city_code = ?15, barangay_code = ?16,
            monthly_income_centavos = ?17,
            is_senior_citizen = ?18, is_labor_force = ?19, is_employed = ?20, is_unemployed = ?21,
            is_out_of_school_children = ?22, is_out_of_school_youth = ?23,
            is_migrant = ?24, is_person_with_disability = ?25, is_solo_parent = ?26,
            is_indigenous = ?27, is_overseas_worker = ?28, is_registered_senior_citizen = ?29,
            is_active = ?30, updated_by = ?31, updated_at = ?32
        WHERE id = ?1
        "#,
        params![
            r.id, r.first_name, r.middle_name, r.last_name, r.extension_name,
            r.birthdate, r.sex, r.civil_status, r.education_level,
            r.education_completed, r.employment_status, r.occupation_code,
            r.region_code, r.province_code, r.city_code, r.barangay_code,
            r.monthly_income_centavos,
            r.is_senior_citizen, r.is_labor_force, r.is_employed, r.is_unemployed,
            r.is_out_of_school_children, r.is_out_of_school_youth,
            r.is_migrant, r.is_person_with_disability, r.is_solo_parent,
            r.is_indigenous, r.is_overseas_worker, r.is_registered_senior_citizen,
            r.is_active, r.updated_by, r.updated_at,
        ],
    )?;

    if changed == 0 {
        return Err(RegistryError::not_found("Resident", &r.id));
    }
    Ok(())
}

/// Residents within a jurisdiction carrying all requested flags
pub fn list_by_flags(conn: &Connection, query: &ResidentFlagQuery) -> Result<Vec<ResidentRow>, RegistryError> {
    let mut conditions = vec![
        "(r.barangay_code = ?1 OR r.city_code = ?1 OR r.province_code = ?1 OR r.region_code = ?1)".to_string(),
    ];
    if !query.include_inactive {
        conditions.push("r.is_active = 1".to_string());
    }
    for flag in &query.flags {
        // Column names come from a closed enum, never from input text
        conditions.push(format!("r.{} = 1", flag.column()));
    }

    let sql = format!(
        "{} WHERE {} ORDER BY r.last_name, r.first_name, r.id LIMIT ?2 OFFSET ?3",
        SELECT_RESIDENT,
        conditions.join(" AND ")
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![query.jurisdiction, query.limit, query.offset], ResidentRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(rows)
}

/// IDs of active residents within a jurisdiction
pub fn active_ids_in_jurisdiction(conn: &Connection, jurisdiction: &str) -> Result<Vec<String>, RegistryError> {
    let mut stmt = conn.prepare(
        r#"
        SELECT id FROM residents
        WHERE is_active = 1
          AND (barangay_code = ?1 OR city_code = ?1 OR province_code = ?1 OR region_code = ?1)
        ORDER BY id
        "#,
    )?;
    let ids = stmt
        .query_map(params![jurisdiction], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(ids)
}
