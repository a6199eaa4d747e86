//! Household aggregate maintenance
//!
//! The aggregator is the only writer of a household's aggregate columns
//! and head reference. It reads the active membership set through the
//! caller's transaction, so it always sees the membership change that
//! triggered it.

use rusqlite::Connection;
use serde::Serialize;
use tracing::{debug, error};

use super::{audit, income};
use crate::db::households::{self, HouseholdAggregates};
use crate::db::memberships::{self, ActiveMember};
use crate::db::models::MemberPosition;
use crate::db::{ActorContext, AuditEntity, HouseholdRow};
use crate::error::RegistryError;

/// Compute aggregates from a household's active members
pub fn compute(members: &[ActiveMember]) -> Result<HouseholdAggregates, RegistryError> {
    let mut heads = members.iter().filter(|m| m.position == MemberPosition::Head);
    let head = heads.next();
    if heads.next().is_some() {
        return Err(RegistryError::Consistency("household has more than one active head".into()));
    }

    let mut monthly_income_centavos: i64 = 0;
    let mut migrant_count: i64 = 0;
    for member in members {
        if member.monthly_income_centavos < 0 {
            return Err(RegistryError::Consistency(format!(
                "resident {} has negative income {}",
                member.resident_id, member.monthly_income_centavos
            )));
        }
        monthly_income_centavos = monthly_income_centavos
            .checked_add(member.monthly_income_centavos)
            .ok_or_else(|| RegistryError::Consistency("household income overflows".into()))?;
        if member.is_migrant {
            migrant_count += 1;
        }
    }

    let member_count = i64::try_from(members.len())
        .map_err(|_| RegistryError::Consistency("member count overflows".into()))?;

    Ok(HouseholdAggregates {
        member_count,
        migrant_count,
        monthly_income_centavos,
        income_tier: income::classify(Some(monthly_income_centavos)),
        head_resident_id: head.map(|h| h.resident_id.clone()),
        household_name: head.map(|h| h.last_name.clone()),
    })
}

/// Result of one recomputation
#[derive(Debug, Clone, Serialize)]
pub struct Recomputation {
    pub before: HouseholdRow,
    pub after: HouseholdRow,
}

impl Recomputation {
    pub fn changed(&self) -> bool {
        self.before != self.after
    }
}

/// Recompute and persist the aggregates of `household_id`.
///
/// Writes (and audits as a household update) only when a value differs
/// from what is stored; an unchanged household is left untouched.
pub fn recompute(
    conn: &Connection,
    household_id: &str,
    actor: &ActorContext,
    at: &str,
) -> Result<Recomputation, RegistryError> {
    let before = households::require_household(conn, household_id)?;
    let members = memberships::active_member_inputs(conn, household_id)?;

    let aggregates = compute(&members).map_err(|e| {
        error!(household_id = %household_id, error = %e, "Household aggregate recomputation failed");
        e
    })?;

    if aggregates == before.aggregates() {
        return Ok(Recomputation {
            after: before.clone(),
            before,
        });
    }

    households::write_aggregates(conn, household_id, &aggregates, actor.user_id(), at)?;
    let after = households::require_household(conn, household_id)?;
    audit::record_update(conn, AuditEntity::Household, household_id, &before, &after, actor, at)?;

    debug!(
        household_id = %household_id,
        member_count = after.member_count,
        income_tier = %after.income_tier,
        "Household aggregates recomputed"
    );

    Ok(Recomputation { before, after })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::IncomeTier;

    fn member(resident: &str, position: MemberPosition, income: i64, migrant: bool) -> ActiveMember {
        ActiveMember {
            membership_id: format!("m-{}", resident),
            resident_id: resident.into(),
            position,
            last_name: format!("{}-surname", resident),
            monthly_income_centavos: income,
            is_migrant: migrant,
        }
    }

    #[test]
    fn test_empty_household() {
        assert_eq!(compute(&[]).unwrap(), HouseholdAggregates::default());
    }

    #[test]
    fn test_aggregates_over_members() {
        let members = [
            member("r1", MemberPosition::Head, 2_000_000, false),
            member("r2", MemberPosition::Spouse, 2_500_000, true),
            member("r3", MemberPosition::Child, 0, false),
        ];
        let aggregates = compute(&members).unwrap();

        assert_eq!(aggregates.member_count, 3);
        assert_eq!(aggregates.migrant_count, 1);
        assert_eq!(aggregates.monthly_income_centavos, 4_500_000);
        assert_eq!(aggregates.income_tier, IncomeTier::MiddleClass);
        assert_eq!(aggregates.head_resident_id.as_deref(), Some("r1"));
        assert_eq!(aggregates.household_name.as_deref(), Some("r1-surname"));
    }

    #[test]
    fn test_headless_household_has_no_name() {
        let aggregates = compute(&[member("r2", MemberPosition::Child, 100, false)]).unwrap();
        assert_eq!(aggregates.head_resident_id, None);
        assert_eq!(aggregates.household_name, None);
    }

    #[test]
    fn test_impossible_states_are_consistency_errors() {
        let two_heads = [
            member("r1", MemberPosition::Head, 0, false),
            member("r2", MemberPosition::Head, 0, false),
        ];
        assert!(matches!(compute(&two_heads), Err(RegistryError::Consistency(_))));

        let negative = [member("r1", MemberPosition::Head, -5, false)];
        assert!(matches!(compute(&negative), Err(RegistryError::Consistency(_))));

        let overflow = [
            member("r1", MemberPosition::Head, i64::MAX, false),
            member("r2", MemberPosition::Child, 1, false),
        ];
        assert!(matches!(compute(&overflow), Err(RegistryError::Consistency(_))));
    }
}
