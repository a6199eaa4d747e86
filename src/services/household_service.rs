//! Household service - identity, placement and membership orchestration
//!
//! Every mutation runs in one `BEGIN IMMEDIATE` transaction: the entity
//! write, the identity allocation, member location updates, aggregate
//! recomputation and all audit records commit together.

use std::sync::Arc;

use rusqlite::Connection;
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::clock::Clock;
use crate::db::addressing::{self, StreetRow, SubdivisionRow};
use crate::db::models::{format_timestamp, IncomeTier, MemberPosition};
use crate::db::{households, memberships, residents, ActorContext, AuditEntity, RegistryDb};
use crate::db::{CreateHouseholdInput, HouseholdRow, MembershipRow, ResidentRow, UpdateHouseholdInput};
use crate::engine::{aggregator, audit, identity, GeoChain, GeoResolver, LeafCode, Recomputation};
use crate::error::RegistryError;

use super::events::{EventBus, RegistryEvent};

/// Membership mutation outcome: the membership and its household after
/// aggregate recomputation
#[derive(Debug, Clone, Serialize)]
pub struct MembershipChange {
    pub membership: MembershipRow,
    pub household: HouseholdRow,
}

/// Household service
pub struct HouseholdService {
    db: Arc<RegistryDb>,
    events: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    geo: Arc<GeoResolver>,
    identity_retry_limit: u32,
}

impl HouseholdService {
    pub fn new(
        db: Arc<RegistryDb>,
        events: Arc<EventBus>,
        clock: Arc<dyn Clock>,
        geo: Arc<GeoResolver>,
        identity_retry_limit: u32,
    ) -> Self {
        Self {
            db,
            events,
            clock,
            geo,
            identity_retry_limit,
        }
    }

    // =========================================================================
    // Read Operations
    // =========================================================================

    /// Get household by ID
    pub fn get(&self, id: &str) -> Result<Option<HouseholdRow>, RegistryError> {
        self.db.with_conn(|conn| households::get_household(conn, id))
    }

    /// Get household by its composite code
    pub fn get_by_code(&self, code: &str) -> Result<Option<HouseholdRow>, RegistryError> {
        identity::HouseholdCode::parse(code)?;
        self.db.with_conn(|conn| households::get_household_by_code(conn, code))
    }

    /// Memberships of a household in join order
    pub fn members(&self, household_id: &str, include_inactive: bool) -> Result<Vec<MembershipRow>, RegistryError> {
        self.db.with_conn(|conn| {
            households::require_household(conn, household_id)?;
            memberships::for_household(conn, household_id, include_inactive)
        })
    }

    // =========================================================================
    // Addressing
    // =========================================================================

    /// Register a subdivision; the actor's jurisdiction is used when no
    /// barangay is given
    pub fn register_subdivision(
        &self,
        actor: &ActorContext,
        barangay_code: Option<&str>,
        name: &str,
    ) -> Result<SubdivisionRow, RegistryError> {
        let name = required_name("name", name)?;
        let leaf = LeafCode::parse(barangay_code.unwrap_or(actor.jurisdiction()))?;
        let at = format_timestamp(self.clock.now());

        let row = self.db.transaction(|tx| {
            self.geo.resolve(tx, leaf.as_str())?;
            addressing::create_subdivision(tx, leaf.as_str(), &name, actor.user_id(), &at)
                .map_err(|e| duplicate_name(e, "subdivision", &name))
        })?;

        info!(id = %row.id, barangay = %row.barangay_code, seq = row.sequence_no, "Subdivision registered");
        Ok(row)
    }

    /// Register a street under a barangay and optional subdivision
    pub fn register_street(
        &self,
        actor: &ActorContext,
        barangay_code: Option<&str>,
        subdivision_id: Option<&str>,
        name: &str,
    ) -> Result<StreetRow, RegistryError> {
        let name = required_name("name", name)?;
        let leaf = LeafCode::parse(barangay_code.unwrap_or(actor.jurisdiction()))?;
        let at = format_timestamp(self.clock.now());

        let row = self.db.transaction(|tx| {
            self.geo.resolve(tx, leaf.as_str())?;
            if let Some(id) = subdivision_id {
                let subdivision = addressing::get_subdivision(tx, id)?
                    .ok_or_else(|| RegistryError::not_found("Subdivision", id))?;
                if subdivision.barangay_code != leaf.as_str() {
                    return Err(RegistryError::validation(
                        "subdivision_id",
                        format!("subdivision {} is registered under {}", id, subdivision.barangay_code),
                    ));
                }
            }
            addressing::create_street(tx, leaf.as_str(), subdivision_id, &name, actor.user_id(), &at)
                .map_err(|e| duplicate_name(e, "street", &name))
        })?;

        info!(id = %row.id, barangay = %row.barangay_code, seq = row.sequence_no, "Street registered");
        Ok(row)
    }

    // =========================================================================
    // Write Operations
    // =========================================================================

    /// Register a household and allocate its code
    pub fn create(&self, actor: &ActorContext, input: CreateHouseholdInput) -> Result<HouseholdRow, RegistryError> {
        let leaf = LeafCode::parse(input.barangay_code.as_deref().unwrap_or(actor.jurisdiction()))?;
        let house_number = optional_text(input.house_number);
        let at = format_timestamp(self.clock.now());

        let household = self.db.transaction(|tx| {
            let chain = self.geo.resolve(tx, leaf.as_str())?;

            let household = identity::with_fresh_code(
                tx,
                &leaf,
                input.subdivision_id.as_deref(),
                input.street_id.as_deref(),
                self.identity_retry_limit,
                |code| {
                    let row = HouseholdRow {
                        id: Uuid::new_v4().to_string(),
                        household_code: code.to_string(),
                        house_number: house_number.clone(),
                        barangay_code: chain.barangay_code.clone(),
                        city_code: chain.city_code.clone(),
                        province_code: chain.province_code.clone(),
                        region_code: chain.region_code.clone(),
                        subdivision_id: input.subdivision_id.clone(),
                        street_id: input.street_id.clone(),
                        house_seq: code.house_seq(),
                        household_type: input.household_type,
                        tenure_status: input.tenure_status,
                        unit_type: input.unit_type,
                        head_resident_id: None,
                        household_name: None,
                        member_count: 0,
                        migrant_count: 0,
                        monthly_income_centavos: 0,
                        income_tier: IncomeTier::Poor,
                        is_active: true,
                        created_by: actor.user_id().to_string(),
                        updated_by: actor.user_id().to_string(),
                        created_at: at.clone(),
                        updated_at: at.clone(),
                    };
                    households::insert_household(tx, &row)?;
                    Ok(row)
                },
            )?;

            audit::record_create(tx, AuditEntity::Household, &household.id, &household, actor, &at)?;
            households::require_household(tx, &household.id)
        })?;

        debug!(id = %household.id, code = %household.household_code, actor = %actor, "Household created");
        self.events.emit(RegistryEvent::HouseholdCreated {
            id: household.id.clone(),
            household_code: household.household_code.clone(),
        });
        Ok(household)
    }

    /// Update placement or classification metadata.
    ///
    /// A placement change allocates a new code in the new scope and moves
    /// every active member's location with the household.
    pub fn update(
        &self,
        actor: &ActorContext,
        id: &str,
        input: UpdateHouseholdInput,
    ) -> Result<HouseholdRow, RegistryError> {
        if let Some(code) = input.barangay_code.as_deref() {
            LeafCode::parse(code)?;
        }
        let at = format_timestamp(self.clock.now());

        let (household, changed, moved) = self.db.transaction(|tx| {
            let before = households::require_household(tx, id)?;
            require_active_household(&before)?;

            let mut after = before.clone();
            if let Some(house_number) = input.house_number.clone() {
                after.house_number = optional_text(house_number);
            }
            if let Some(household_type) = input.household_type {
                after.household_type = household_type;
            }
            if let Some(tenure_status) = input.tenure_status {
                after.tenure_status = tenure_status;
            }
            if let Some(unit_type) = input.unit_type {
                after.unit_type = unit_type;
            }
            if let Some(code) = input.barangay_code.clone() {
                after.barangay_code = code;
            }
            if let Some(subdivision_id) = input.subdivision_id.clone() {
                after.subdivision_id = subdivision_id;
            }
            if let Some(street_id) = input.street_id.clone() {
                after.street_id = street_id;
            }

            let moved = after.barangay_code != before.barangay_code
                || after.subdivision_id != before.subdivision_id
                || after.street_id != before.street_id;

            if !moved && after == before {
                return Ok((before, false, false));
            }

            after.updated_by = actor.user_id().to_string();
            after.updated_at = at.clone();

            if moved {
                let leaf = LeafCode::parse(&after.barangay_code)?;
                let chain = self.geo.resolve(tx, leaf.as_str())?;
                chain.apply_to_household(&mut after);

                identity::with_fresh_code(
                    tx,
                    &leaf,
                    after.subdivision_id.as_deref(),
                    after.street_id.as_deref(),
                    self.identity_retry_limit,
                    |code| {
                        let mut row = after.clone();
                        row.household_code = code.to_string();
                        row.house_seq = code.house_seq();
                        households::update_household(tx, &row)
                    },
                )?;
            } else {
                households::update_household(tx, &after)?;
            }

            let stored = households::require_household(tx, id)?;
            audit::record_update(tx, AuditEntity::Household, id, &before, &stored, actor, &at)?;

            if moved {
                let chain = GeoChain::of_household(&stored);
                for member in memberships::for_household(tx, id, false)? {
                    sync_resident_location(tx, &member.resident_id, &chain, actor, &at)?;
                }
            }

            Ok((stored, true, moved))
        })?;

        if !changed {
            return Ok(household);
        }
        if moved {
            info!(id = %household.id, code = %household.household_code, "Household moved");
        }
        self.events.emit(RegistryEvent::HouseholdUpdated {
            id: household.id.clone(),
            household_code: household.household_code.clone(),
        });
        Ok(household)
    }

    /// Deactivate a household that has no active members
    pub fn deactivate(&self, actor: &ActorContext, id: &str) -> Result<HouseholdRow, RegistryError> {
        let at = format_timestamp(self.clock.now());

        let household = self.db.transaction(|tx| {
            let before = households::require_household(tx, id)?;
            require_active_household(&before)?;
            if !memberships::for_household(tx, id, false)?.is_empty() {
                return Err(RegistryError::validation(
                    "member_count",
                    "household still has active members",
                ));
            }

            let mut after = before.clone();
            after.is_active = false;
            after.updated_by = actor.user_id().to_string();
            after.updated_at = at.clone();
            households::update_household(tx, &after)?;

            let stored = households::require_household(tx, id)?;
            audit::record_deactivate(tx, AuditEntity::Household, id, &before, &stored, actor, &at)?;
            Ok(stored)
        })?;

        debug!(id = %household.id, actor = %actor, "Household deactivated");
        self.events.emit(RegistryEvent::HouseholdDeactivated { id: household.id.clone() });
        Ok(household)
    }

    /// Add a resident to a household
    pub fn add_membership(
        &self,
        actor: &ActorContext,
        household_id: &str,
        resident_id: &str,
        position: MemberPosition,
    ) -> Result<MembershipChange, RegistryError> {
        let at = format_timestamp(self.clock.now());

        let (change, recomputation) = self.db.transaction(|tx| {
            let household = households::require_household(tx, household_id)?;
            let resident = residents::require_resident(tx, resident_id)?;
            let (membership, recomputation) = join_household(tx, &resident, &household, position, actor, &at)?;
            Ok((
                MembershipChange {
                    membership,
                    household: recomputation.after.clone(),
                },
                recomputation,
            ))
        })?;

        self.events.emit(RegistryEvent::MembershipAdded {
            id: change.membership.id.clone(),
            household_id: change.membership.household_id.clone(),
            resident_id: change.membership.resident_id.clone(),
            position: change.membership.position,
        });
        emit_recomputed(&self.events, &recomputation);
        Ok(change)
    }

    /// End an active membership; the history row is kept
    pub fn remove_membership(&self, actor: &ActorContext, membership_id: &str) -> Result<MembershipChange, RegistryError> {
        let at = format_timestamp(self.clock.now());

        let (change, recomputation) = self.db.transaction(|tx| {
            let membership = memberships::require_membership(tx, membership_id)?;
            let (membership, recomputation) = leave_household(tx, &membership, actor, &at)?;
            Ok((
                MembershipChange {
                    membership,
                    household: recomputation.after.clone(),
                },
                recomputation,
            ))
        })?;

        self.events.emit(RegistryEvent::MembershipRemoved {
            id: change.membership.id.clone(),
            household_id: change.membership.household_id.clone(),
            resident_id: change.membership.resident_id.clone(),
        });
        emit_recomputed(&self.events, &recomputation);
        Ok(change)
    }

    /// Change the position of an active membership
    pub fn update_membership(
        &self,
        actor: &ActorContext,
        membership_id: &str,
        position: MemberPosition,
    ) -> Result<MembershipChange, RegistryError> {
        let at = format_timestamp(self.clock.now());

        let (change, recomputation) = self.db.transaction(|tx| {
            let before = memberships::require_membership(tx, membership_id)?;
            if !before.is_active {
                return Err(RegistryError::validation("membership_id", "membership is no longer active"));
            }
            if before.position == position {
                let household = households::require_household(tx, &before.household_id)?;
                let unchanged = Recomputation {
                    before: household.clone(),
                    after: household.clone(),
                };
                return Ok((MembershipChange { membership: before, household }, unchanged));
            }
            if position == MemberPosition::Head {
                require_no_head(tx, &before.household_id)?;
            }

            let mut after = before.clone();
            after.position = position;
            after.updated_by = actor.user_id().to_string();
            after.updated_at = at.clone();
            memberships::update_membership(tx, &after)?;
            audit::record_update(tx, AuditEntity::HouseholdMembership, &after.id, &before, &after, actor, &at)?;

            let recomputation = aggregator::recompute(tx, &after.household_id, actor, &at)?;
            Ok((
                MembershipChange {
                    membership: after,
                    household: recomputation.after.clone(),
                },
                recomputation,
            ))
        })?;

        self.events.emit(RegistryEvent::MembershipUpdated {
            id: change.membership.id.clone(),
            position: change.membership.position,
        });
        emit_recomputed(&self.events, &recomputation);
        Ok(change)
    }

    /// Recompute a household's aggregates from its active members.
    ///
    /// Only writes (and audits) when the stored values are stale.
    pub fn recompute(&self, actor: &ActorContext, household_id: &str) -> Result<Recomputation, RegistryError> {
        let at = format_timestamp(self.clock.now());
        let recomputation = self.db.transaction(|tx| aggregator::recompute(tx, household_id, actor, &at))?;
        emit_recomputed(&self.events, &recomputation);
        Ok(recomputation)
    }
}

// =============================================================================
// Membership steps shared with the resident service
// =============================================================================

/// Insert an active membership, move the resident to the household's
/// location and recompute the household
pub(crate) fn join_household(
    conn: &Connection,
    resident: &ResidentRow,
    household: &HouseholdRow,
    position: MemberPosition,
    actor: &ActorContext,
    at: &str,
) -> Result<(MembershipRow, Recomputation), RegistryError> {
    if !household.is_active {
        return Err(RegistryError::validation("household_id", "household is inactive"));
    }
    if !resident.is_active {
        return Err(RegistryError::validation("resident_id", "resident is inactive"));
    }
    if let Some(existing) = memberships::active_for_resident(conn, &resident.id)? {
        return Err(RegistryError::validation(
            "resident_id",
            format!("resident is already an active member of household {}", existing.household_id),
        ));
    }
    if position == MemberPosition::Head {
        require_no_head(conn, &household.id)?;
    }

    let membership = MembershipRow {
        id: Uuid::new_v4().to_string(),
        household_id: household.id.clone(),
        resident_id: resident.id.clone(),
        position,
        is_active: true,
        joined_at: at.to_string(),
        left_at: None,
        created_by: actor.user_id().to_string(),
        updated_by: actor.user_id().to_string(),
        created_at: at.to_string(),
        updated_at: at.to_string(),
    };
    memberships::insert_membership(conn, &membership)?;
    audit::record_create(conn, AuditEntity::HouseholdMembership, &membership.id, &membership, actor, at)?;

    sync_resident_location(conn, &resident.id, &GeoChain::of_household(household), actor, at)?;
    let recomputation = aggregator::recompute(conn, &household.id, actor, at)?;

    Ok((membership, recomputation))
}

/// Deactivate a membership and recompute its household
pub(crate) fn leave_household(
    conn: &Connection,
    membership: &MembershipRow,
    actor: &ActorContext,
    at: &str,
) -> Result<(MembershipRow, Recomputation), RegistryError> {
    if !membership.is_active {
        return Err(RegistryError::validation("membership_id", "membership is no longer active"));
    }

    let mut after = membership.clone();
    after.is_active = false;
    after.left_at = Some(at.to_string());
    after.updated_by = actor.user_id().to_string();
    after.updated_at = at.to_string();
    memberships::update_membership(conn, &after)?;
    audit::record_deactivate(conn, AuditEntity::HouseholdMembership, &after.id, membership, &after, actor, at)?;

    let recomputation = aggregator::recompute(conn, &after.household_id, actor, at)?;
    Ok((after, recomputation))
}

/// Move a resident to `chain`, auditing the change; returns whether it moved
pub(crate) fn sync_resident_location(
    conn: &Connection,
    resident_id: &str,
    chain: &GeoChain,
    actor: &ActorContext,
    at: &str,
) -> Result<bool, RegistryError> {
    let before = residents::require_resident(conn, resident_id)?;
    if GeoChain::of_resident(&before) == *chain {
        return Ok(false);
    }

    let mut after = before.clone();
    chain.apply_to_resident(&mut after);
    after.updated_by = actor.user_id().to_string();
    after.updated_at = at.to_string();
    residents::update_resident(conn, &after)?;
    audit::record_update(conn, AuditEntity::Resident, resident_id, &before, &after, actor, at)?;
    Ok(true)
}

pub(crate) fn emit_recomputed(events: &EventBus, recomputation: &Recomputation) {
    if recomputation.changed() {
        events.emit(RegistryEvent::HouseholdRecomputed {
            id: recomputation.after.id.clone(),
            member_count: recomputation.after.member_count,
            income_tier: recomputation.after.income_tier,
        });
    }
}

fn require_no_head(conn: &Connection, household_id: &str) -> Result<(), RegistryError> {
    if let Some(head) = memberships::active_head(conn, household_id)? {
        return Err(RegistryError::validation(
            "position",
            format!("household already has an active head (resident {})", head.resident_id),
        ));
    }
    Ok(())
}

fn require_active_household(household: &HouseholdRow) -> Result<(), RegistryError> {
    if !household.is_active {
        return Err(RegistryError::validation("is_active", "household is inactive"));
    }
    Ok(())
}

/// Trimmed, non-empty name
pub(crate) fn required_name(field: &str, value: &str) -> Result<String, RegistryError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(RegistryError::validation(field, "must not be empty"));
    }
    Ok(trimmed.to_string())
}

/// Trimmed text, blank collapsed to `None`
pub(crate) fn optional_text(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn duplicate_name(err: RegistryError, kind: &str, name: &str) -> RegistryError {
    if err.is_unique_violation() {
        RegistryError::validation("name", format!("{} '{}' is already registered", kind, name))
    } else {
        err
    }
}
