//! Database schema definitions

use rusqlite::Connection;
use tracing::info;

use crate::error::RegistryError;

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> Result<(), RegistryError> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        info!("Creating new registry schema v{}", SCHEMA_VERSION);
        create_tables(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if current_version < SCHEMA_VERSION {
        info!("Migrating schema from v{} to v{}", current_version, SCHEMA_VERSION);
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else {
        info!("Registry schema is up to date (v{})", current_version);
    }

    Ok(())
}

/// Get current schema version (0 if not initialized)
fn get_schema_version(conn: &Connection) -> Result<i32, RegistryError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
        [],
    )?;

    let version: i32 = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
        .unwrap_or(0);

    Ok(version)
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<(), RegistryError> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?)", [version])?;
    Ok(())
}

fn create_tables(conn: &Connection) -> Result<(), RegistryError> {
    conn.execute_batch(CATALOG_SCHEMA)
        .map_err(|e| RegistryError::Internal(format!("Failed to create catalog tables: {}", e)))?;

    conn.execute_batch(REGISTRY_SCHEMA)
        .map_err(|e| RegistryError::Internal(format!("Failed to create registry tables: {}", e)))?;

    conn.execute_batch(AUDIT_SCHEMA)
        .map_err(|e| RegistryError::Internal(format!("Failed to create audit tables: {}", e)))?;

    conn.execute_batch(INDEXES_SCHEMA)
        .map_err(|e| RegistryError::Internal(format!("Failed to create indexes: {}", e)))?;

    Ok(())
}

/// Reference catalogs (loaded by external import pipelines)
const CATALOG_SCHEMA: &str = r#"
-- Geographic hierarchy: region > province > city/municipality > barangay.
-- Independent cities hang directly off their region (no province row).
CREATE TABLE IF NOT EXISTS geo_units (
    code TEXT PRIMARY KEY NOT NULL,
    name TEXT NOT NULL,
    level TEXT NOT NULL,
    parent_code TEXT
);

CREATE TABLE IF NOT EXISTS occupations (
    code TEXT PRIMARY KEY NOT NULL,
    title TEXT NOT NULL,
    major_group TEXT
);
"#;

/// Residents, households, memberships and their addressing references
const REGISTRY_SCHEMA: &str = r#"
-- One row per allocation scope; the only source of sequence numbers
CREATE TABLE IF NOT EXISTS sequence_counters (
    scope_key TEXT PRIMARY KEY NOT NULL,
    last_value INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS subdivisions (
    id TEXT PRIMARY KEY NOT NULL,
    barangay_code TEXT NOT NULL,
    name TEXT NOT NULL,
    sequence_no INTEGER NOT NULL,
    created_by TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE (barangay_code, sequence_no),
    UNIQUE (barangay_code, name)
);

CREATE TABLE IF NOT EXISTS streets (
    id TEXT PRIMARY KEY NOT NULL,
    barangay_code TEXT NOT NULL,
    subdivision_id TEXT REFERENCES subdivisions(id),
    scope_key TEXT NOT NULL,
    name TEXT NOT NULL,
    sequence_no INTEGER NOT NULL,
    created_by TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE (scope_key, sequence_no),
    UNIQUE (scope_key, name)
);

CREATE TABLE IF NOT EXISTS households (
    id TEXT PRIMARY KEY NOT NULL,
    household_code TEXT NOT NULL UNIQUE,
    house_number TEXT,

    -- Geographic placement (leaf + derived ancestry)
    barangay_code TEXT NOT NULL,
    city_code TEXT NOT NULL,
    province_code TEXT,
    region_code TEXT NOT NULL,
    subdivision_id TEXT REFERENCES subdivisions(id),
    street_id TEXT REFERENCES streets(id),
    house_seq INTEGER NOT NULL,

    -- Classification metadata
    household_type TEXT,
    tenure_status TEXT,
    unit_type TEXT,

    -- Aggregates, written only by the household aggregator
    head_resident_id TEXT,
    household_name TEXT,
    member_count INTEGER NOT NULL DEFAULT 0 CHECK (member_count >= 0),
    migrant_count INTEGER NOT NULL DEFAULT 0 CHECK (migrant_count >= 0 AND migrant_count <= member_count),
    monthly_income_centavos INTEGER NOT NULL DEFAULT 0 CHECK (monthly_income_centavos >= 0),
    income_tier TEXT NOT NULL DEFAULT 'poor',

    is_active INTEGER NOT NULL DEFAULT 1,
    created_by TEXT NOT NULL,
    updated_by TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS residents (
    id TEXT PRIMARY KEY NOT NULL,
    first_name TEXT NOT NULL,
    middle_name TEXT,
    last_name TEXT NOT NULL,
    extension_name TEXT,
    birthdate TEXT NOT NULL,
    sex TEXT NOT NULL,
    civil_status TEXT NOT NULL,
    education_level TEXT NOT NULL,
    education_completed INTEGER NOT NULL DEFAULT 0,
    employment_status TEXT,
    occupation_code TEXT REFERENCES occupations(code),

    region_code TEXT NOT NULL,
    province_code TEXT,
    city_code TEXT NOT NULL,
    barangay_code TEXT NOT NULL,

    monthly_income_centavos INTEGER NOT NULL DEFAULT 0 CHECK (monthly_income_centavos >= 0),

    -- Derived sector flags
    is_senior_citizen INTEGER NOT NULL DEFAULT 0,
    is_labor_force INTEGER NOT NULL DEFAULT 0,
    is_employed INTEGER NOT NULL DEFAULT 0,
    is_unemployed INTEGER NOT NULL DEFAULT 0,
    is_out_of_school_children INTEGER NOT NULL DEFAULT 0,
    is_out_of_school_youth INTEGER NOT NULL DEFAULT 0,

    -- Operator-maintained sector flags
    is_migrant INTEGER NOT NULL DEFAULT 0,
    is_person_with_disability INTEGER NOT NULL DEFAULT 0,
    is_solo_parent INTEGER NOT NULL DEFAULT 0,
    is_indigenous INTEGER NOT NULL DEFAULT 0,
    is_overseas_worker INTEGER NOT NULL DEFAULT 0,
    is_registered_senior_citizen INTEGER NOT NULL DEFAULT 0,

    is_active INTEGER NOT NULL DEFAULT 1,
    created_by TEXT NOT NULL,
    updated_by TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS household_members (
    id TEXT PRIMARY KEY NOT NULL,
    household_id TEXT NOT NULL REFERENCES households(id),
    resident_id TEXT NOT NULL REFERENCES residents(id),
    position TEXT NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1,
    joined_at TEXT NOT NULL,
    left_at TEXT,
    created_by TEXT NOT NULL,
    updated_by TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

/// Append-only audit trail
const AUDIT_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS audit_log (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    entity TEXT NOT NULL,
    record_id TEXT NOT NULL,
    operation TEXT NOT NULL,
    before_json TEXT,
    after_json TEXT,
    user_id TEXT NOT NULL,
    jurisdiction TEXT NOT NULL,
    recorded_at TEXT NOT NULL,
    chain_hash TEXT NOT NULL
);

CREATE TRIGGER IF NOT EXISTS audit_log_no_update
BEFORE UPDATE ON audit_log
BEGIN
    SELECT RAISE(ABORT, 'audit_log is append-only');
END;

CREATE TRIGGER IF NOT EXISTS audit_log_no_delete
BEFORE DELETE ON audit_log
BEGIN
    SELECT RAISE(ABORT, 'audit_log is append-only');
END;
"#;

const INDEXES_SCHEMA: &str = r#"
CREATE INDEX IF NOT EXISTS idx_geo_units_parent ON geo_units(parent_code);
CREATE INDEX IF NOT EXISTS idx_residents_barangay ON residents(barangay_code);
CREATE INDEX IF NOT EXISTS idx_residents_city ON residents(city_code);
CREATE INDEX IF NOT EXISTS idx_households_barangay ON households(barangay_code);
CREATE INDEX IF NOT EXISTS idx_households_scope ON households(barangay_code, subdivision_id, street_id);
CREATE INDEX IF NOT EXISTS idx_members_household ON household_members(household_id, is_active);

-- At most one active membership per resident, one active head per household
CREATE UNIQUE INDEX IF NOT EXISTS idx_members_active_resident
    ON household_members(resident_id) WHERE is_active = 1;
CREATE UNIQUE INDEX IF NOT EXISTS idx_members_active_head
    ON household_members(household_id) WHERE is_active = 1 AND position = 'head';

CREATE INDEX IF NOT EXISTS idx_audit_record ON audit_log(entity, record_id, seq);
"#;
