//! Search service - classification and income tier queries
//!
//! A jurisdiction matches any level of the stored geographic chain, so a
//! city code finds every resident or household in that city.

use std::sync::Arc;

use crate::db::households::{self, HouseholdTierQuery};
use crate::db::residents::{self, ResidentFlagQuery};
use crate::db::{HouseholdRow, RegistryDb, ResidentRow};
use crate::error::RegistryError;

/// Upper bound on one page of results
const MAX_LIMIT: u32 = 1000;

/// Search service
pub struct SearchService {
    db: Arc<RegistryDb>,
}

impl SearchService {
    pub fn new(db: Arc<RegistryDb>) -> Self {
        Self { db }
    }

    /// Residents carrying every requested sector flag
    pub fn residents_by_classification(&self, query: &ResidentFlagQuery) -> Result<Vec<ResidentRow>, RegistryError> {
        let query = ResidentFlagQuery {
            limit: query.limit.min(MAX_LIMIT),
            ..query.clone()
        };
        check_jurisdiction(&query.jurisdiction)?;
        self.db.with_conn(|conn| residents::list_by_flags(conn, &query))
    }

    /// Households in any of the requested income tiers
    pub fn households_by_tier(&self, query: &HouseholdTierQuery) -> Result<Vec<HouseholdRow>, RegistryError> {
        let query = HouseholdTierQuery {
            limit: query.limit.min(MAX_LIMIT),
            ..query.clone()
        };
        check_jurisdiction(&query.jurisdiction)?;
        self.db.with_conn(|conn| households::list_by_tier(conn, &query))
    }
}

fn check_jurisdiction(code: &str) -> Result<(), RegistryError> {
    if code.trim().is_empty() {
        return Err(RegistryError::validation("jurisdiction", "must not be empty"));
    }
    Ok(())
}
