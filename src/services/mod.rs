//! Service layer for the civil registry
//!
//! Services are the only entry point for mutations. Each one:
//! - Validates input before any write
//! - Opens one transaction for the whole unit of work
//! - Runs the derived-state rules in `engine`
//! - Emits events after commit
//!
//! ## Architecture
//!
//! ```text
//! API layer (external)
//!     ↓
//! Service Layer (validation, orchestration)
//!     ↓
//! Engine (identity, classification, aggregation, audit)
//!     ↓
//! Repository Layer (db/*.rs)
//!     ↓
//! SQLite Database
//! ```

pub mod events;
pub mod resident_service;
pub mod household_service;
pub mod audit_service;
pub mod search_service;

// Re-exports
pub use events::{EventBus, EventListener, RegistryEvent};
pub use resident_service::{ReclassifySummary, ResidentService};
pub use household_service::{HouseholdService, MembershipChange};
pub use audit_service::AuditService;
pub use search_service::SearchService;

use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::db::RegistryDb;
use crate::engine::GeoResolver;

/// Service container for dependency injection
///
/// Holds all services over one shared database, clock and geographic cache.
pub struct Services {
    pub residents: Arc<ResidentService>,
    pub households: Arc<HouseholdService>,
    pub audit: Arc<AuditService>,
    pub search: Arc<SearchService>,
    pub events: Arc<EventBus>,
    pub geo: Arc<GeoResolver>,
}

impl Services {
    /// Create all services on the wall clock
    pub fn new(db: Arc<RegistryDb>, config: &Config) -> Self {
        Self::with_clock(db, config, Arc::new(SystemClock))
    }

    /// Create all services with an explicit clock (for testing)
    pub fn with_clock(db: Arc<RegistryDb>, config: &Config, clock: Arc<dyn Clock>) -> Self {
        let events = Arc::new(EventBus::new());
        let geo = Arc::new(GeoResolver::new());

        Self {
            residents: Arc::new(ResidentService::new(db.clone(), events.clone(), clock.clone(), geo.clone())),
            households: Arc::new(HouseholdService::new(
                db.clone(),
                events.clone(),
                clock,
                geo.clone(),
                config.identity_retry_limit,
            )),
            audit: Arc::new(AuditService::new(db.clone())),
            search: Arc::new(SearchService::new(db)),
            events,
            geo,
        }
    }
}
