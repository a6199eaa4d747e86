//! Civil Registry - resident and household records for a barangay
//!
//! Keeps the derived state of a local civil registry consistent with the
//! records it is derived from.
//!
//! ## Architecture
//!
//! - **Services**: validate, open one transaction per mutation, emit events
//! - **Engine**: household codes, sector flags, income tiers, geographic
//!   ancestry, household aggregates, audit records
//! - **Store**: SQLite (WAL), one `BEGIN IMMEDIATE` transaction per unit of work
//!
//! ## Derived state
//!
//! | Field | Owner | Recomputed when |
//! |-------|-------|-----------------|
//! | household code | `engine::identity` | household created or moved |
//! | resident sector flags | `engine::classification` | birthdate, employment or education changes |
//! | household aggregates, head | `engine::aggregator` | membership or member income/migrant/surname changes |
//! | region/province/city codes | `engine::geography` | placement changes |
//! | audit entries | `engine::audit` | every create/update/deactivate |
//!
//! ## Storage Layout
//!
//! ```text
//! ~/.local/share/civil-registry/
//! ├── registry.db            # SQLite database (WAL mode)
//! └── config.toml            # Configuration
//! ```

pub mod clock;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod services;

// Re-exports
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::Config;
pub use db::{ActorContext, RegistryDb};
pub use db::models::{IncomeTier, MemberPosition, SectorFlag};
pub use error::{ErrorBody, ErrorKind, RegistryError};
pub use services::{EventBus, RegistryEvent, Services};
