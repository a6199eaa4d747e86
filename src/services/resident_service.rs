//! Resident service - registration, edits and classification upkeep
//!
//! Derived sector flags are recomputed in the same transaction as the edit
//! that changes one of their inputs, and a household whose aggregates depend
//! on the edited resident is recomputed before commit.

use std::sync::Arc;

use chrono::NaiveDate;
use rusqlite::Connection;
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::clock::Clock;
use crate::db::models::format_timestamp;
use crate::db::{catalog, households, memberships, residents, ActorContext, AuditEntity, RegistryDb};
use crate::db::{CreateResidentInput, ResidentRow, UpdateResidentInput};
use crate::engine::classification::{self, ClassificationInput};
use crate::engine::{aggregator, audit, DerivedFlags, GeoResolver, LeafCode, Recomputation};
use crate::error::RegistryError;

use super::events::{EventBus, RegistryEvent};
use super::household_service::{emit_recomputed, join_household, leave_household, optional_text, required_name};

/// Outcome of re-evaluating a jurisdiction's age-dependent flags
#[derive(Debug, Clone, Serialize)]
pub struct ReclassifySummary {
    pub jurisdiction: String,
    pub evaluated_on: NaiveDate,
    pub examined: usize,
    /// Residents whose stored flags changed
    pub changed: Vec<String>,
}

/// Resident service
pub struct ResidentService {
    db: Arc<RegistryDb>,
    events: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    geo: Arc<GeoResolver>,
}

impl ResidentService {
    pub fn new(db: Arc<RegistryDb>, events: Arc<EventBus>, clock: Arc<dyn Clock>, geo: Arc<GeoResolver>) -> Self {
        Self { db, events, clock, geo }
    }

    // =========================================================================
    // Read Operations
    // =========================================================================

    /// Get resident by ID
    pub fn get(&self, id: &str) -> Result<Option<ResidentRow>, RegistryError> {
        self.db.with_conn(|conn| residents::get_resident(conn, id))
    }

    // =========================================================================
    // Write Operations
    // =========================================================================

    /// Register a resident, optionally joining a household in the same
    /// unit of work
    pub fn create(&self, actor: &ActorContext, input: CreateResidentInput) -> Result<ResidentRow, RegistryError> {
        let first_name = required_name("first_name", &input.first_name)?;
        let last_name = required_name("last_name", &input.last_name)?;
        check_income(input.monthly_income_centavos)?;
        let position = match (&input.household_id, input.position) {
            (Some(_), None) => {
                return Err(RegistryError::validation("position", "required when joining a household"));
            }
            (None, Some(_)) => {
                return Err(RegistryError::validation("household_id", "required when a position is given"));
            }
            (_, position) => position,
        };
        match (input.barangay_code.as_deref(), &input.household_id) {
            (Some(code), _) => {
                LeafCode::parse(code)?;
            }
            (None, None) => {
                LeafCode::parse(actor.jurisdiction())?;
            }
            (None, Some(_)) => {}
        }

        let now = self.clock.now();
        let at = format_timestamp(now);
        let today = self.clock.today();

        let (resident, recomputation) = self.db.transaction(|tx| {
            let household = input
                .household_id
                .as_deref()
                .map(|id| households::require_household(tx, id))
                .transpose()?;
            if let Some(occupation) = input.occupation_code.as_deref() {
                check_occupation(tx, occupation)?;
            }

            let chain = self
                .geo
                .resident_chain(tx, household.as_ref(), input.barangay_code.as_deref(), actor)?;

            let mut row = ResidentRow {
                id: Uuid::new_v4().to_string(),
                first_name: first_name.clone(),
                middle_name: optional_text(input.middle_name.clone()),
                last_name: last_name.clone(),
                extension_name: optional_text(input.extension_name.clone()),
                birthdate: input.birthdate,
                sex: input.sex,
                civil_status: input.civil_status,
                education_level: input.education_level,
                education_completed: input.education_completed,
                employment_status: input.employment_status,
                occupation_code: input.occupation_code.clone(),
                region_code: chain.region_code.clone(),
                province_code: chain.province_code.clone(),
                city_code: chain.city_code.clone(),
                barangay_code: chain.barangay_code.clone(),
                monthly_income_centavos: input.monthly_income_centavos,
                is_senior_citizen: false,
                is_labor_force: false,
                is_employed: false,
                is_unemployed: false,
                is_out_of_school_children: false,
                is_out_of_school_youth: false,
                is_migrant: input.is_migrant,
                is_person_with_disability: input.is_person_with_disability,
                is_solo_parent: input.is_solo_parent,
                is_indigenous: input.is_indigenous,
                is_overseas_worker: input.is_overseas_worker,
                is_registered_senior_citizen: input.is_registered_senior_citizen,
                is_active: true,
                created_by: actor.user_id().to_string(),
                updated_by: actor.user_id().to_string(),
                created_at: at.clone(),
                updated_at: at.clone(),
                household_id: None,
            };
            classification::classify(&ClassificationInput::of(&row), today)?.apply_to(&mut row);
            check_registered_senior(&row)?;

            residents::insert_resident(tx, &row)?;
            audit::record_create(tx, AuditEntity::Resident, &row.id, &row, actor, &at)?;

            let recomputation = match (household, position) {
                (Some(household), Some(position)) => {
                    let (_, recomputation) = join_household(tx, &row, &household, position, actor, &at)?;
                    Some(recomputation)
                }
                _ => None,
            };

            Ok((residents::require_resident(tx, &row.id)?, recomputation))
        })?;

        debug!(id = %resident.id, barangay = %resident.barangay_code, actor = %actor, "Resident created");
        self.events.emit(RegistryEvent::ResidentCreated {
            id: resident.id.clone(),
            barangay_code: resident.barangay_code.clone(),
            household_id: resident.household_id.clone(),
        });
        if let Some(recomputation) = &recomputation {
            emit_recomputed(&self.events, recomputation);
        }
        Ok(resident)
    }

    /// Apply a partial update.
    ///
    /// Returns the stored row unchanged (and records nothing) when the
    /// update does not change any field.
    pub fn update(&self, actor: &ActorContext, id: &str, input: UpdateResidentInput) -> Result<ResidentRow, RegistryError> {
        let first_name = input.first_name.as_deref().map(|v| required_name("first_name", v)).transpose()?;
        let last_name = input.last_name.as_deref().map(|v| required_name("last_name", v)).transpose()?;
        if let Some(income) = input.monthly_income_centavos {
            check_income(income)?;
        }
        if let Some(code) = input.barangay_code.as_deref() {
            LeafCode::parse(code)?;
        }

        let at = format_timestamp(self.clock.now());
        let today = self.clock.today();

        let outcome = self.db.transaction(|tx| {
            let before = residents::require_resident(tx, id)?;
            if !before.is_active {
                return Err(RegistryError::validation("is_active", "resident is deactivated"));
            }

            let mut after = before.clone();
            if let Some(v) = first_name.clone() { after.first_name = v; }
            if let Some(v) = input.middle_name.clone() { after.middle_name = optional_text(v); }
            if let Some(v) = last_name.clone() { after.last_name = v; }
            if let Some(v) = input.extension_name.clone() { after.extension_name = optional_text(v); }
            if let Some(v) = input.birthdate { after.birthdate = v; }
            if let Some(v) = input.sex { after.sex = v; }
            if let Some(v) = input.civil_status { after.civil_status = v; }
            if let Some(v) = input.education_level { after.education_level = v; }
            if let Some(v) = input.education_completed { after.education_completed = v; }
            if let Some(v) = input.employment_status { after.employment_status = v; }
            if let Some(v) = input.occupation_code.clone() { after.occupation_code = v; }
            if let Some(v) = input.monthly_income_centavos { after.monthly_income_centavos = v; }
            if let Some(v) = input.is_migrant { after.is_migrant = v; }
            if let Some(v) = input.is_person_with_disability { after.is_person_with_disability = v; }
            if let Some(v) = input.is_solo_parent { after.is_solo_parent = v; }
            if let Some(v) = input.is_indigenous { after.is_indigenous = v; }
            if let Some(v) = input.is_overseas_worker { after.is_overseas_worker = v; }
            if let Some(v) = input.is_registered_senior_citizen { after.is_registered_senior_citizen = v; }

            if after.occupation_code != before.occupation_code {
                if let Some(occupation) = after.occupation_code.as_deref() {
                    check_occupation(tx, occupation)?;
                }
            }

            if let Some(code) = input.barangay_code.as_deref() {
                if code != before.barangay_code {
                    if let Some(household_id) = before.household_id.as_deref() {
                        return Err(RegistryError::validation(
                            "barangay_code",
                            format!("resident lives in household {} and shares its location", household_id),
                        ));
                    }
                    self.geo.resolve(tx, code)?.apply_to_resident(&mut after);
                }
            }

            if ClassificationInput::of(&after) != ClassificationInput::of(&before) {
                classification::classify(&ClassificationInput::of(&after), today)?.apply_to(&mut after);
            }
            check_registered_senior(&after)?;

            if after == before {
                return Ok(UpdateOutcome::Unchanged(before));
            }

            after.updated_by = actor.user_id().to_string();
            after.updated_at = at.clone();
            residents::update_resident(tx, &after)?;
            audit::record_update(tx, AuditEntity::Resident, id, &before, &after, actor, &at)?;

            let affects_household = after.monthly_income_centavos != before.monthly_income_centavos
                || after.is_migrant != before.is_migrant
                || after.last_name != before.last_name;
            let recomputation = match before.household_id.as_deref() {
                Some(household_id) if affects_household => {
                    Some(aggregator::recompute(tx, household_id, actor, &at)?)
                }
                _ => None,
            };

            Ok(UpdateOutcome::Updated(residents::require_resident(tx, id)?, recomputation))
        })?;

        match outcome {
            UpdateOutcome::Unchanged(resident) => Ok(resident),
            UpdateOutcome::Updated(resident, recomputation) => {
                debug!(id = %resident.id, actor = %actor, "Resident updated");
                self.events.emit(RegistryEvent::ResidentUpdated { id: resident.id.clone() });
                if let Some(recomputation) = &recomputation {
                    emit_recomputed(&self.events, recomputation);
                }
                Ok(resident)
            }
        }
    }

    /// Soft-delete a resident, ending its active membership
    pub fn deactivate(&self, actor: &ActorContext, id: &str) -> Result<ResidentRow, RegistryError> {
        let at = format_timestamp(self.clock.now());

        let (resident, left) = self.db.transaction(|tx| {
            let before = residents::require_resident(tx, id)?;
            if !before.is_active {
                return Err(RegistryError::validation("is_active", "resident is already deactivated"));
            }

            let mut after = before.clone();
            after.is_active = false;
            after.updated_by = actor.user_id().to_string();
            after.updated_at = at.clone();
            residents::update_resident(tx, &after)?;
            audit::record_deactivate(tx, AuditEntity::Resident, id, &before, &after, actor, &at)?;

            let left = match memberships::active_for_resident(tx, id)? {
                Some(membership) => Some(leave_household(tx, &membership, actor, &at)?),
                None => None,
            };

            Ok((residents::require_resident(tx, id)?, left))
        })?;

        debug!(id = %resident.id, actor = %actor, "Resident deactivated");
        self.events.emit(RegistryEvent::ResidentDeactivated { id: resident.id.clone() });
        if let Some((membership, recomputation)) = &left {
            self.events.emit(RegistryEvent::MembershipRemoved {
                id: membership.id.clone(),
                household_id: membership.household_id.clone(),
                resident_id: membership.resident_id.clone(),
            });
            emit_recomputed(&self.events, recomputation);
        }
        Ok(resident)
    }

    /// Re-evaluate the derived flags of every active resident in a
    /// jurisdiction as of `on`; only residents whose flags change are
    /// written and audited.
    ///
    /// `on` may not precede today: stored flags never move back in time.
    pub fn reclassify_jurisdiction(
        &self,
        actor: &ActorContext,
        jurisdiction: &str,
        on: NaiveDate,
    ) -> Result<ReclassifySummary, RegistryError> {
        let today = self.clock.today();
        if on < today {
            return Err(RegistryError::validation(
                "on",
                format!("evaluation date {} is before today ({})", on, today),
            ));
        }
        let at = format_timestamp(self.clock.now());

        let summary = self.db.transaction(|tx| {
            let ids = residents::active_ids_in_jurisdiction(tx, jurisdiction)?;
            let mut changed = Vec::new();
            for id in &ids {
                if reclassify_one(tx, id, on, actor, &at)? {
                    changed.push(id.clone());
                }
            }
            Ok(ReclassifySummary {
                jurisdiction: jurisdiction.to_string(),
                evaluated_on: on,
                examined: ids.len(),
                changed,
            })
        })?;

        info!(
            jurisdiction = %jurisdiction,
            examined = summary.examined,
            changed = summary.changed.len(),
            "Reclassified residents"
        );
        self.events.emit(RegistryEvent::ResidentsReclassified {
            jurisdiction: jurisdiction.to_string(),
            changed: summary.changed.len(),
        });
        Ok(summary)
    }
}

enum UpdateOutcome {
    Unchanged(ResidentRow),
    Updated(ResidentRow, Option<Recomputation>),
}

fn reclassify_one(
    conn: &Connection,
    id: &str,
    on: NaiveDate,
    actor: &ActorContext,
    at: &str,
) -> Result<bool, RegistryError> {
    let before = residents::require_resident(conn, id)?;
    let flags = classification::classify(&ClassificationInput::of(&before), on)?;
    if flags == DerivedFlags::stored(&before) {
        return Ok(false);
    }

    let mut after = before.clone();
    flags.apply_to(&mut after);
    check_registered_senior(&after)?;
    after.updated_by = actor.user_id().to_string();
    after.updated_at = at.to_string();
    residents::update_resident(conn, &after)?;
    audit::record_update(conn, AuditEntity::Resident, id, &before, &after, actor, at)?;
    Ok(true)
}

fn check_income(centavos: i64) -> Result<(), RegistryError> {
    if centavos < 0 {
        return Err(RegistryError::validation("monthly_income_centavos", "must not be negative"));
    }
    Ok(())
}

fn check_occupation(conn: &Connection, code: &str) -> Result<(), RegistryError> {
    match catalog::lookup_occupation(conn, code) {
        Ok(_) => Ok(()),
        Err(RegistryError::NotFound { .. }) => Err(RegistryError::validation(
            "occupation_code",
            format!("unknown occupation code '{}'", code),
        )),
        Err(e) => Err(e),
    }
}

fn check_registered_senior(row: &ResidentRow) -> Result<(), RegistryError> {
    if row.is_registered_senior_citizen && !row.is_senior_citizen {
        return Err(RegistryError::validation(
            "is_registered_senior_citizen",
            "only senior citizens can be registered as such",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::db::catalog::{GeoUnit, Occupation};
    use crate::db::models::{CivilStatus, EducationLevel, EmploymentStatus, GeoLevel, Sex};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn service() -> ResidentService {
        let db = Arc::new(RegistryDb::open_in_memory().unwrap());
        db.with_conn(|conn| {
            for (code, level, parent) in [
                ("040000000", GeoLevel::Region, None),
                ("042100000", GeoLevel::Province, Some("040000000")),
                ("042114000", GeoLevel::Municipality, Some("042100000")),
                ("042114014", GeoLevel::Barangay, Some("042114000")),
            ] {
                catalog::upsert_geo_unit(conn, &GeoUnit {
                    code: code.into(),
                    name: code.into(),
                    level,
                    parent_code: parent.map(str::to_string),
                })?;
            }
            catalog::upsert_occupation(conn, &Occupation {
                code: "6111".into(),
                title: "Field crop growers".into(),
                major_group: None,
            })
        })
        .unwrap();

        ResidentService::new(
            db,
            Arc::new(EventBus::new()),
            Arc::new(FixedClock::on(date(2024, 6, 1))),
            Arc::new(GeoResolver::new()),
        )
    }

    fn input(birthdate: NaiveDate) -> CreateResidentInput {
        CreateResidentInput {
            first_name: "Jose".into(),
            middle_name: None,
            last_name: "Rizal".into(),
            extension_name: None,
            birthdate,
            sex: Sex::Male,
            civil_status: CivilStatus::Single,
            education_level: EducationLevel::College,
            education_completed: true,
            employment_status: Some(EmploymentStatus::Employed),
            occupation_code: None,
            barangay_code: None,
            monthly_income_centavos: 0,
            is_migrant: false,
            is_person_with_disability: false,
            is_solo_parent: false,
            is_indigenous: false,
            is_overseas_worker: false,
            is_registered_senior_citizen: false,
            household_id: None,
            position: None,
        }
    }

    fn actor() -> ActorContext {
        ActorContext::new("clerk-1", "042114014")
    }

    #[test]
    fn test_create_derives_flags_and_location() {
        let service = service();
        let resident = service.create(&actor(), input(date(1990, 1, 1))).unwrap();

        assert!(resident.is_labor_force && resident.is_employed);
        assert!(!resident.is_senior_citizen);
        assert_eq!(resident.region_code, "040000000");
        assert_eq!(resident.household_id, None);
    }

    #[test]
    fn test_create_validation() {
        let service = service();

        let mut blank = input(date(1990, 1, 1));
        blank.last_name = "  ".into();
        assert_eq!(service.create(&actor(), blank).unwrap_err().field(), Some("last_name"));

        let future = input(date(2030, 1, 1));
        assert_eq!(service.create(&actor(), future).unwrap_err().field(), Some("birthdate"));

        let mut young_registered = input(date(1990, 1, 1));
        young_registered.is_registered_senior_citizen = true;
        assert_eq!(
            service.create(&actor(), young_registered).unwrap_err().field(),
            Some("is_registered_senior_citizen")
        );

        let mut unknown_job = input(date(1990, 1, 1));
        unknown_job.occupation_code = Some("0000".into());
        assert_eq!(service.create(&actor(), unknown_job).unwrap_err().field(), Some("occupation_code"));

        let mut dangling = input(date(1990, 1, 1));
        dangling.position = Some(crate::db::models::MemberPosition::Head);
        assert_eq!(service.create(&actor(), dangling).unwrap_err().field(), Some("household_id"));
    }

    #[test]
    fn test_update_recomputes_flags() {
        let service = service();
        let resident = service.create(&actor(), input(date(1990, 1, 1))).unwrap();

        let updated = service
            .update(&actor(), &resident.id, UpdateResidentInput {
                employment_status: Some(Some(EmploymentStatus::LookingForWork)),
                occupation_code: Some(Some("6111".into())),
                ..Default::default()
            })
            .unwrap();
        assert!(updated.is_unemployed && !updated.is_employed);
        assert_eq!(updated.occupation_code.as_deref(), Some("6111"));

        // Clearing employment drops the resident from the labor force
        let cleared = service
            .update(&actor(), &resident.id, UpdateResidentInput {
                employment_status: Some(None),
                ..Default::default()
            })
            .unwrap();
        assert!(!cleared.is_labor_force);
    }

    #[test]
    fn test_no_op_update_keeps_stamps() {
        let service = service();
        let resident = service.create(&actor(), input(date(1990, 1, 1))).unwrap();

        let same = service
            .update(&actor(), &resident.id, UpdateResidentInput {
                first_name: Some("Jose".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(same, resident);
    }

    #[test]
    fn test_deactivate_is_soft() {
        let service = service();
        let resident = service.create(&actor(), input(date(1990, 1, 1))).unwrap();

        let inactive = service.deactivate(&actor(), &resident.id).unwrap();
        assert!(!inactive.is_active);
        assert!(service.get(&resident.id).unwrap().is_some());

        let err = service
            .update(&actor(), &resident.id, UpdateResidentInput {
                first_name: Some("Pepe".into()),
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(err.field(), Some("is_active"));
    }

    #[test]
    fn test_reclassify_only_touches_changed_residents() {
        let service = service();
        let turning_sixty = service.create(&actor(), input(date(1964, 7, 1))).unwrap();
        let young = service.create(&actor(), input(date(1990, 1, 1))).unwrap();
        assert!(!turning_sixty.is_senior_citizen);

        let summary = service
            .reclassify_jurisdiction(&actor(), "042114000", date(2024, 7, 1))
            .unwrap();
        assert_eq!(summary.examined, 2);
        assert_eq!(summary.changed, vec![turning_sixty.id.clone()]);

        assert!(service.get(&turning_sixty.id).unwrap().unwrap().is_senior_citizen);
        assert_eq!(service.get(&young.id).unwrap().unwrap(), young);
    }

    #[test]
    fn test_malformed_barangay_code_is_rejected_before_lookup() {
        let service = service();

        let mut short = input(date(1990, 1, 1));
        short.barangay_code = Some("0421140".into());
        let err = service.create(&actor(), short).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);
        assert_eq!(err.field(), Some("barangay_code"));

        // The actor's jurisdiction stands in for a missing code
        let err = service
            .create(&ActorContext::new("clerk-9", "12"), input(date(1990, 1, 1)))
            .unwrap_err();
        assert_eq!(err.field(), Some("barangay_code"));

        let resident = service.create(&actor(), input(date(1990, 1, 1))).unwrap();
        let err = service
            .update(&actor(), &resident.id, UpdateResidentInput {
                barangay_code: Some("12".into()),
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);
        assert_eq!(err.field(), Some("barangay_code"));
    }

    #[test]
    fn test_birthdate_change_reclassifies() {
        let service = service();
        let mut pupil = input(date(1990, 1, 1));
        pupil.education_level = EducationLevel::Elementary;
        pupil.education_completed = false;
        pupil.employment_status = None;
        let resident = service.create(&actor(), pupil).unwrap();
        assert!(!resident.is_senior_citizen);
        assert!(!resident.is_out_of_school_children);

        let senior = service
            .update(&actor(), &resident.id, UpdateResidentInput {
                birthdate: Some(date(1960, 1, 1)),
                ..Default::default()
            })
            .unwrap();
        assert!(senior.is_senior_citizen);

        let child = service
            .update(&actor(), &resident.id, UpdateResidentInput {
                birthdate: Some(date(2014, 1, 15)),
                ..Default::default()
            })
            .unwrap();
        assert!(!child.is_senior_citizen);
        assert!(child.is_out_of_school_children);
        assert!(!child.is_out_of_school_youth);
    }

    #[test]
    fn test_reclassify_rejects_past_evaluation_date() {
        let service = service();
        let toddler = service.create(&actor(), input(date(2020, 1, 1))).unwrap();
        let senior = service.create(&actor(), input(date(1964, 5, 1))).unwrap();
        assert!(senior.is_senior_citizen);

        let err = service
            .reclassify_jurisdiction(&actor(), "042114014", date(2019, 1, 1))
            .unwrap_err();
        assert_eq!(err.field(), Some("on"));
        assert_eq!(service.get(&toddler.id).unwrap().unwrap(), toddler);
        assert_eq!(service.get(&senior.id).unwrap().unwrap(), senior);

        let summary = service
            .reclassify_jurisdiction(&actor(), "042114014", date(2024, 6, 1))
            .unwrap();
        assert_eq!(summary.examined, 2);
        assert!(summary.changed.is_empty());
    }
}
