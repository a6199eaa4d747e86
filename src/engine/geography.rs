//! Geographic ancestry resolution
//!
//! Walks `parent_code` links from a barangay up to its region. Independent
//! cities hang directly off their region, so the province is optional.
//! Resolved chains are memoized; the catalog does not change while the
//! registry runs.

use dashmap::DashMap;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::db::catalog;
use crate::db::models::GeoLevel;
use crate::db::{ActorContext, HouseholdRow, ResidentRow};
use crate::error::RegistryError;

/// Longest parent walk before the catalog is considered corrupt
const MAX_DEPTH: usize = 8;

/// Full ancestry of a barangay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeoChain {
    pub region_code: String,
    pub province_code: Option<String>,
    pub city_code: String,
    pub barangay_code: String,
}

impl GeoChain {
    pub fn of_household(household: &HouseholdRow) -> Self {
        Self {
            region_code: household.region_code.clone(),
            province_code: household.province_code.clone(),
            city_code: household.city_code.clone(),
            barangay_code: household.barangay_code.clone(),
        }
    }

    pub fn of_resident(resident: &ResidentRow) -> Self {
        Self {
            region_code: resident.region_code.clone(),
            province_code: resident.province_code.clone(),
            city_code: resident.city_code.clone(),
            barangay_code: resident.barangay_code.clone(),
        }
    }

    pub fn apply_to_resident(&self, resident: &mut ResidentRow) {
        resident.region_code = self.region_code.clone();
        resident.province_code = self.province_code.clone();
        resident.city_code = self.city_code.clone();
        resident.barangay_code = self.barangay_code.clone();
    }

    pub fn apply_to_household(&self, household: &mut HouseholdRow) {
        household.region_code = self.region_code.clone();
        household.province_code = self.province_code.clone();
        household.city_code = self.city_code.clone();
        household.barangay_code = self.barangay_code.clone();
    }
}

/// Walk the catalog from `barangay_code` to its region
pub fn geo_chain(conn: &Connection, barangay_code: &str) -> Result<GeoChain, RegistryError> {
    let leaf = catalog::lookup_geo_unit(conn, barangay_code)?;
    if leaf.level != GeoLevel::Barangay {
        return Err(RegistryError::validation(
            "barangay_code",
            format!("{} is a {} unit, not a barangay", barangay_code, leaf.level),
        ));
    }

    let mut province_code = None;
    let mut city_code = None;
    let mut parent = leaf.parent_code;

    for _ in 0..MAX_DEPTH {
        let code = parent.ok_or_else(|| {
            RegistryError::not_found("Geographic unit", format!("region above {}", barangay_code))
        })?;
        let unit = catalog::lookup_geo_unit(conn, &code)?;

        match unit.level {
            GeoLevel::Region => {
                let city_code = city_code.ok_or_else(|| {
                    RegistryError::not_found("Geographic unit", format!("city/municipality above {}", barangay_code))
                })?;
                return Ok(GeoChain {
                    region_code: unit.code,
                    province_code,
                    city_code,
                    barangay_code: barangay_code.to_string(),
                });
            }
            GeoLevel::Province => province_code = Some(unit.code),
            GeoLevel::City | GeoLevel::Municipality => city_code = Some(unit.code),
            GeoLevel::SubMunicipality => {}
            GeoLevel::Barangay => {
                return Err(RegistryError::validation(
                    "barangay_code",
                    format!("barangay {} has barangay {} as an ancestor", barangay_code, unit.code),
                ));
            }
        }
        parent = unit.parent_code;
    }

    Err(RegistryError::validation(
        "barangay_code",
        format!("ancestry of {} does not reach a region", barangay_code),
    ))
}

/// Concurrent read-through cache over [`geo_chain`]
#[derive(Debug, Default)]
pub struct GeoResolver {
    cache: DashMap<String, GeoChain>,
}

impl GeoResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve the chain of a barangay, consulting the cache first
    pub fn resolve(&self, conn: &Connection, barangay_code: &str) -> Result<GeoChain, RegistryError> {
        if let Some(chain) = self.cache.get(barangay_code) {
            return Ok(chain.clone());
        }

        let chain = geo_chain(conn, barangay_code)?;
        debug!(barangay = %barangay_code, region = %chain.region_code, "Resolved geographic chain");
        self.cache.insert(barangay_code.to_string(), chain.clone());
        Ok(chain)
    }

    /// Chain for a resident: the active household's chain, else the
    /// explicit barangay, else the actor's jurisdiction
    pub fn resident_chain(
        &self,
        conn: &Connection,
        household: Option<&HouseholdRow>,
        barangay_code: Option<&str>,
        actor: &ActorContext,
    ) -> Result<GeoChain, RegistryError> {
        match (household, barangay_code) {
            (Some(household), _) => Ok(GeoChain::of_household(household)),
            (None, Some(code)) => self.resolve(conn, code),
            (None, None) => self.resolve(conn, actor.jurisdiction()),
        }
    }

    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    pub fn clear(&self) {
        self.cache.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::catalog::GeoUnit;
    use crate::db::schema::init_schema;

    fn unit(code: &str, level: GeoLevel, parent: Option<&str>) -> GeoUnit {
        GeoUnit {
            code: code.into(),
            name: code.into(),
            level,
            parent_code: parent.map(str::to_string),
        }
    }

    fn seeded() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        for u in [
            unit("040000000", GeoLevel::Region, None),
            unit("042100000", GeoLevel::Province, Some("040000000")),
            unit("042114000", GeoLevel::Municipality, Some("042100000")),
            unit("042114014", GeoLevel::Barangay, Some("042114000")),
            unit("130000000", GeoLevel::Region, None),
            unit("137404000", GeoLevel::City, Some("130000000")),
            unit("137404001", GeoLevel::Barangay, Some("137404000")),
            unit("042199000", GeoLevel::Municipality, Some("049999999")),
            unit("042199001", GeoLevel::Barangay, Some("042199000")),
        ] {
            catalog::upsert_geo_unit(&conn, &u).unwrap();
        }
        conn
    }

    #[test]
    fn test_full_chain() {
        let conn = seeded();
        let chain = geo_chain(&conn, "042114014").unwrap();
        assert_eq!(chain.region_code, "040000000");
        assert_eq!(chain.province_code.as_deref(), Some("042100000"));
        assert_eq!(chain.city_code, "042114000");
    }

    #[test]
    fn test_independent_city_has_no_province() {
        let conn = seeded();
        let chain = geo_chain(&conn, "137404001").unwrap();
        assert_eq!(chain.region_code, "130000000");
        assert_eq!(chain.province_code, None);
        assert_eq!(chain.city_code, "137404000");
    }

    #[test]
    fn test_lookup_failures() {
        let conn = seeded();
        assert!(matches!(geo_chain(&conn, "999999999"), Err(RegistryError::NotFound { .. })));
        // Broken parent link
        assert!(matches!(geo_chain(&conn, "042199001"), Err(RegistryError::NotFound { .. })));

        let err = geo_chain(&conn, "042114000").unwrap_err();
        assert_eq!(err.field(), Some("barangay_code"));
    }

    #[test]
    fn test_resolver_caches_and_orders_sources() {
        let conn = seeded();
        let resolver = GeoResolver::new();
        let actor = ActorContext::new("u1", "137404001");

        let chain = resolver.resident_chain(&conn, None, Some("042114014"), &actor).unwrap();
        assert_eq!(chain.barangay_code, "042114014");

        let chain = resolver.resident_chain(&conn, None, None, &actor).unwrap();
        assert_eq!(chain.barangay_code, "137404001");
        assert_eq!(resolver.cached(), 2);

        resolver.clear();
        assert_eq!(resolver.cached(), 0);
    }
}
