//! Derived-state rules
//!
//! Everything in here runs inside a unit of work opened by the service
//! layer. The classification and income modules are pure; the others read
//! and write through the `&Connection` of the open transaction so every
//! derived value observes the same snapshot as the mutation that triggered
//! it.
//!
//! ```text
//! Service Layer
//!     ↓
//! identity / classification / income / geography / aggregator / audit
//!     ↓
//! Repository Layer (db/*.rs)
//! ```

pub mod identity;
pub mod classification;
pub mod income;
pub mod geography;
pub mod aggregator;
pub mod audit;

pub use aggregator::Recomputation;
pub use classification::DerivedFlags;
pub use geography::{GeoChain, GeoResolver};
pub use identity::{HouseholdCode, LeafCode};
