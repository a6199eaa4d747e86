//! SQLite store for the civil registry
//!
//! Repository functions live in the submodules and take a plain
//! `&Connection`; callers run them inside [`RegistryDb::transaction`] so
//! that an entity write, every derived-field write and the audit record
//! commit together or not at all.
//!
//! ## Tables
//!
//! - `geo_units`, `occupations` - read-only reference catalogs
//! - `subdivisions`, `streets` - addressing references per barangay
//! - `sequence_counters` - per-scope sequence allocation
//! - `residents`, `households`, `household_members` - registry entities
//! - `audit_log` - append-only mutation history

pub mod schema;
pub mod context;
pub mod models;
pub mod catalog;
pub mod sequences;
pub mod addressing;
pub mod residents;
pub mod households;
pub mod memberships;
pub mod audit;

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use rusqlite::{Connection, Transaction, TransactionBehavior};
use tracing::{debug, info};

use crate::config::Config;
use crate::error::RegistryError;

/// SQLite database for the registry
pub struct RegistryDb {
    conn: Mutex<Connection>,
}

impl RegistryDb {
    /// Open or create the registry database described by `config`
    pub fn open(config: &Config) -> Result<Self, RegistryError> {
        std::fs::create_dir_all(&config.storage_dir)?;
        Self::open_path(
            &config.database_path(),
            Duration::from_millis(config.busy_timeout_ms),
        )
    }

    /// Open or create a registry database at an explicit path
    pub fn open_path(db_path: &Path, busy_timeout: Duration) -> Result<Self, RegistryError> {
        info!("Opening registry database at {:?}", db_path);

        let conn = Connection::open(db_path)
            .map_err(|e| RegistryError::Internal(format!("Failed to open SQLite: {}", e)))?;

        conn.busy_timeout(busy_timeout)?;
        // WAL keeps readers off the writer's lock
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA foreign_keys=ON;")
            .map_err(|e| RegistryError::Internal(format!("Failed to set PRAGMA: {}", e)))?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;

        Ok(db)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self, RegistryError> {
        debug!("Opening in-memory SQLite database");

        let conn = Connection::open_in_memory()
            .map_err(|e| RegistryError::Internal(format!("Failed to open in-memory SQLite: {}", e)))?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;

        Ok(db)
    }

    fn init_schema(&self) -> Result<(), RegistryError> {
        self.with_conn(schema::init_schema)
    }

    /// Run a read-only closure against the connection
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, RegistryError>
    where
        F: FnOnce(&Connection) -> Result<T, RegistryError>,
    {
        let conn = self.conn.lock()
            .map_err(|e| RegistryError::Internal(format!("Lock poisoned: {}", e)))?;
        f(&conn)
    }

    /// Run `f` as one unit of work.
    ///
    /// The transaction is opened with `BEGIN IMMEDIATE`, so the SQLite write
    /// lock is held from the first read; concurrent writers (threads or other
    /// processes on the same file) are serialized. Any error rolls back.
    pub fn transaction<F, T>(&self, f: F) -> Result<T, RegistryError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, RegistryError>,
    {
        let mut conn = self.conn.lock()
            .map_err(|e| RegistryError::Internal(format!("Lock poisoned: {}", e)))?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    /// Get database statistics
    pub fn stats(&self) -> Result<DbStats, RegistryError> {
        self.with_conn(|conn| {
            let count = |sql: &str| -> Result<u64, RegistryError> {
                let n: i64 = conn.query_row(sql, [], |row| row.get(0))?;
                Ok(n as u64)
            };

            Ok(DbStats {
                active_residents: count("SELECT COUNT(*) FROM residents WHERE is_active = 1")?,
                active_households: count("SELECT COUNT(*) FROM households WHERE is_active = 1")?,
                active_memberships: count("SELECT COUNT(*) FROM household_members WHERE is_active = 1")?,
                audit_entries: count("SELECT COUNT(*) FROM audit_log")?,
                geo_units: count("SELECT COUNT(*) FROM geo_units")?,
            })
        })
    }
}

/// Database statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct DbStats {
    pub active_residents: u64,
    pub active_households: u64,
    pub active_memberships: u64,
    pub audit_entries: u64,
    pub geo_units: u64,
}

// Re-exports
pub use context::ActorContext;
pub use residents::{CreateResidentInput, ResidentRow, UpdateResidentInput};
pub use households::{CreateHouseholdInput, HouseholdRow, UpdateHouseholdInput};
pub use memberships::MembershipRow;
pub use audit::{AuditEntity, AuditEntry, AuditOperation};
