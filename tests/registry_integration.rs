//! Integration tests for the civil registry service layer
//!
//! Every test runs against an on-disk SQLite database in a temporary
//! directory, the same way the CLI opens it.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::NaiveDate;
use civil_registry::db::catalog::{self, GeoUnit};
use civil_registry::db::households::HouseholdTierQuery;
use civil_registry::db::models::{CivilStatus, EducationLevel, EmploymentStatus, GeoLevel, Sex};
use civil_registry::db::residents::ResidentFlagQuery;
use civil_registry::db::{AuditEntity, AuditOperation, CreateHouseholdInput, CreateResidentInput, UpdateResidentInput};
use civil_registry::{
    ActorContext, Config, ErrorKind, FixedClock, IncomeTier, MemberPosition, RegistryDb, RegistryEvent, SectorFlag,
    Services,
};
use tempfile::TempDir;

const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Open (or reopen) the registry in `dir` with the reference catalog seeded
fn open_db(dir: &TempDir) -> Arc<RegistryDb> {
    let db = RegistryDb::open_path(&dir.path().join("registry.db"), BUSY_TIMEOUT).unwrap();
    db.with_conn(|conn| {
        for (code, level, parent) in [
            // Province-bound municipality
            ("040000000", GeoLevel::Region, None),
            ("042100000", GeoLevel::Province, Some("040000000")),
            ("042114000", GeoLevel::Municipality, Some("042100000")),
            ("042114014", GeoLevel::Barangay, Some("042114000")),
            ("042114015", GeoLevel::Barangay, Some("042114000")),
            // Independent city, no province
            ("130000000", GeoLevel::Region, None),
            ("137404000", GeoLevel::City, Some("130000000")),
            ("137404001", GeoLevel::Barangay, Some("137404000")),
        ] {
            catalog::upsert_geo_unit(conn, &GeoUnit {
                code: code.into(),
                name: code.into(),
                level,
                parent_code: parent.map(str::to_string),
            })?;
        }
        Ok(())
    })
    .unwrap();
    Arc::new(db)
}

fn services(db: Arc<RegistryDb>) -> Services {
    let clock = Arc::new(FixedClock::on(date(2024, 6, 1)));
    Services::with_clock(db, &Config::default(), clock)
}

fn clerk() -> ActorContext {
    ActorContext::new("clerk-1", "042114014")
}

fn resident(first_name: &str, last_name: &str, birthdate: NaiveDate) -> CreateResidentInput {
    CreateResidentInput {
        first_name: first_name.into(),
        middle_name: None,
        last_name: last_name.into(),
        extension_name: None,
        birthdate,
        sex: Sex::Female,
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

#[test]
fn test_household_codes_increment_within_barangay() {
    let temp = TempDir::new().unwrap();
    let services = services(open_db(&temp));

    let first = services.households.create(&clerk(), CreateHouseholdInput::default()).unwrap();
    let second = services.households.create(&clerk(), CreateHouseholdInput::default()).unwrap();
    assert_eq!(first.household_code, "042114014-0000-0000-0001");
    assert_eq!(second.household_code, "042114014-0000-0000-0002");

    // Another barangay starts its own sequence
    let other = services
        .households
        .create(&clerk(), CreateHouseholdInput {
            barangay_code: Some("042114015".into()),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(other.household_code, "042114015-0000-0000-0001");
}

#[test]
fn test_concurrent_household_creation_yields_distinct_codes() {
    const WRITERS: usize = 8;
    const PER_WRITER: usize = 5;

    let temp = TempDir::new().unwrap();
    // Create schema and catalog before the writers start
    drop(open_db(&temp));

    let handles: Vec<_> = (0..WRITERS)
        .map(|i| {
            let path = temp.path().join("registry.db");
            thread::spawn(move || {
                let db = Arc::new(RegistryDb::open_path(&path, BUSY_TIMEOUT).unwrap());
                let services = services(db);
                let actor = ActorContext::new(format!("clerk-{}", i), "042114014");
                (0..PER_WRITER)
                    .map(|_| {
                        services
                            .households
                            .create(&actor, CreateHouseholdInput::default())
                            .unwrap()
                            .household_code
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut codes: Vec<String> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
    codes.sort();
    let total = codes.len();
    codes.dedup();
    assert_eq!(codes.len(), total, "duplicate household codes allocated");
    assert_eq!(total, WRITERS * PER_WRITER);
    assert_eq!(codes.last().unwrap(), &format!("042114014-0000-0000-{:04}", WRITERS * PER_WRITER));
}

#[test]
fn test_audit_history_is_complete_and_chained() {
    let temp = TempDir::new().unwrap();
    let services = services(open_db(&temp));
    let actor = clerk();

    let created = services.residents.create(&actor, resident("Maria", "Clara", date(1990, 3, 4))).unwrap();
    for step in 1..=5i64 {
        services
            .residents
            .update(&actor, &created.id, UpdateResidentInput {
                monthly_income_centavos: Some(step * 1_000_000),
                ..Default::default()
            })
            .unwrap();
    }

    let history = services.audit.history(AuditEntity::Resident, &created.id).unwrap();
    assert_eq!(history.len(), 6);
    assert_eq!(history[0].operation, AuditOperation::Create);
    assert!(history[0].before.is_none());
    assert!(history[1..].iter().all(|e| e.operation == AuditOperation::Update));

    for pair in history.windows(2) {
        assert!(pair[0].seq < pair[1].seq);
        assert_eq!(pair[1].before, pair[0].after);
    }
    let last = history.last().unwrap().after.as_ref().unwrap();
    assert_eq!(last["monthly_income_centavos"], 5_000_000);

    let report = services.audit.verify_chain().unwrap();
    assert!(report.is_intact());
    assert_eq!(report.entries_checked, 6);
}

#[test]
fn test_independent_city_has_no_province() {
    let temp = TempDir::new().unwrap();
    let services = services(open_db(&temp));
    let actor = ActorContext::new("clerk-2", "137404001");

    let household = services.households.create(&actor, CreateHouseholdInput::default()).unwrap();
    assert_eq!(household.household_code, "137404001-0000-0000-0001");
    assert_eq!(household.region_code, "130000000");
    assert_eq!(household.city_code, "137404000");
    assert_eq!(household.province_code, None);

    let mut input = resident("Andres", "Bonifacio", date(1985, 11, 30));
    input.household_id = Some(household.id.clone());
    input.position = Some(MemberPosition::Head);
    let member = services.residents.create(&actor, input).unwrap();
    assert_eq!(member.barangay_code, "137404001");
    assert_eq!(member.region_code, "130000000");
    assert_eq!(member.province_code, None);
}

#[test]
fn test_recompute_is_idempotent() {
    let temp = TempDir::new().unwrap();
    let services = services(open_db(&temp));
    let actor = clerk();

    let household = services.households.create(&actor, CreateHouseholdInput::default()).unwrap();
    let mut input = resident("Juan", "Luna", date(1970, 1, 1));
    input.monthly_income_centavos = 5_000_000;
    input.household_id = Some(household.id.clone());
    input.position = Some(MemberPosition::Head);
    services.residents.create(&actor, input).unwrap();

    let audit_before = services.audit.history(AuditEntity::Household, &household.id).unwrap().len();

    let first = services.households.recompute(&actor, &household.id).unwrap();
    assert!(!first.changed());
    let second = services.households.recompute(&actor, &household.id).unwrap();
    assert!(!second.changed());
    assert_eq!(first.after, second.after);

    let audit_after = services.audit.history(AuditEntity::Household, &household.id).unwrap().len();
    assert_eq!(audit_before, audit_after);
}

#[test]
fn test_out_of_school_children_classification() {
    let temp = TempDir::new().unwrap();
    let services = services(open_db(&temp));
    let actor = clerk();

    let mut child = resident("Pepe", "Santos", date(2014, 1, 15));
    child.education_level = EducationLevel::Elementary;
    child.education_completed = false;
    child.employment_status = None;
    let child = services.residents.create(&actor, child).unwrap();
    assert!(child.is_out_of_school_children);
    assert!(!child.is_labor_force);

    let updated = services
        .residents
        .update(&actor, &child.id, UpdateResidentInput {
            education_completed: Some(true),
            ..Default::default()
        })
        .unwrap();
    assert!(!updated.is_out_of_school_children);

    let found = services
        .search
        .residents_by_classification(&ResidentFlagQuery {
            jurisdiction: "042100000".into(),
            flags: vec![SectorFlag::OutOfSchoolChildren],
            include_inactive: false,
            limit: 10,
            offset: 0,
        })
        .unwrap();
    assert!(found.is_empty());
}

#[test]
fn test_failed_unit_of_work_leaves_no_trace() {
    let temp = TempDir::new().unwrap();
    let db = open_db(&temp);
    let services = services(db.clone());
    let actor = clerk();

    let household = services.households.create(&actor, CreateHouseholdInput::default()).unwrap();
    let mut head = resident("Gabriela", "Silang", date(1980, 5, 5));
    head.household_id = Some(household.id.clone());
    head.position = Some(MemberPosition::Head);
    services.residents.create(&actor, head).unwrap();

    let stats_before = db.stats().unwrap();
    let mut events = services.events.subscribe();

    // The resident row and its audit entry are written before the second
    // head is rejected; all of it must roll back.
    let mut second_head = resident("Diego", "Silang", date(1978, 2, 2));
    second_head.household_id = Some(household.id.clone());
    second_head.position = Some(MemberPosition::Head);
    let err = services.residents.create(&actor, second_head).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let stats_after = db.stats().unwrap();
    assert_eq!(stats_before.active_residents, stats_after.active_residents);
    assert_eq!(stats_before.active_memberships, stats_after.active_memberships);
    assert_eq!(stats_before.audit_entries, stats_after.audit_entries);
    assert!(events.try_recv().is_err(), "no event for a rolled-back mutation");

    let household = services.households.get(&household.id).unwrap().unwrap();
    assert_eq!(household.member_count, 1);
    assert!(services.audit.verify_chain().unwrap().is_intact());
}

#[test]
fn test_membership_changes_drive_household_aggregates() {
    let temp = TempDir::new().unwrap();
    let services = services(open_db(&temp));
    let actor = clerk();
    let mut events = services.events.subscribe();

    let household = services.households.create(&actor, CreateHouseholdInput::default()).unwrap();
    assert_eq!(household.member_count, 0);
    assert_eq!(household.income_tier, IncomeTier::Poor);

    let mut head = resident("Emilio", "Aguinaldo", date(1969, 3, 22));
    head.monthly_income_centavos = 2_500_000;
    let head = services.residents.create(&actor, head).unwrap();
    let mut spouse = resident("Hilaria", "del Rosario", date(1972, 9, 17));
    spouse.monthly_income_centavos = 2_000_000;
    spouse.is_migrant = true;
    let spouse = services.residents.create(&actor, spouse).unwrap();

    let added = services
        .households
        .add_membership(&actor, &household.id, &head.id, MemberPosition::Head)
        .unwrap();
    assert_eq!(added.household.member_count, 1);
    assert_eq!(added.household.head_resident_id.as_deref(), Some(head.id.as_str()));
    assert_eq!(added.household.household_name.as_deref(), Some("Aguinaldo"));
    assert_eq!(added.household.income_tier, IncomeTier::LowerMiddleClass);

    let spouse_membership = services
        .households
        .add_membership(&actor, &household.id, &spouse.id, MemberPosition::Spouse)
        .unwrap();
    let current = &spouse_membership.household;
    assert_eq!(current.member_count, 2);
    assert_eq!(current.migrant_count, 1);
    assert_eq!(current.monthly_income_centavos, 4_500_000);
    assert_eq!(current.income_tier, IncomeTier::MiddleClass);

    let tiered = services
        .search
        .households_by_tier(&HouseholdTierQuery {
            jurisdiction: "042114000".into(),
            tiers: vec![IncomeTier::MiddleClass],
            limit: 10,
            ..Default::default()
        })
        .unwrap();
    assert_eq!(tiered.len(), 1);

    // Removing the head clears the head and the household name
    let removed = services.households.remove_membership(&actor, &added.membership.id).unwrap();
    assert!(!removed.membership.is_active);
    assert_eq!(removed.household.member_count, 1);
    assert_eq!(removed.household.head_resident_id, None);
    assert_eq!(removed.household.household_name, None);
    assert_eq!(removed.household.income_tier, IncomeTier::LowIncome);

    // Promote the spouse
    let promoted = services
        .households
        .update_membership(&actor, &spouse_membership.membership.id, MemberPosition::Head)
        .unwrap();
    assert_eq!(promoted.household.head_resident_id.as_deref(), Some(spouse.id.as_str()));
    assert_eq!(promoted.household.household_name.as_deref(), Some("del Rosario"));

    // Member income edits flow through to the household
    let updated = services
        .residents
        .update(&actor, &spouse.id, UpdateResidentInput {
            monthly_income_centavos: Some(0),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(updated.household_id.as_deref(), Some(household.id.as_str()));
    let household = services.households.get(&household.id).unwrap().unwrap();
    assert_eq!(household.monthly_income_centavos, 0);
    assert_eq!(household.income_tier, IncomeTier::Poor);

    let mut saw_recompute = false;
    while let Ok(event) = events.try_recv() {
        if matches!(event, RegistryEvent::HouseholdRecomputed { .. }) {
            saw_recompute = true;
        }
    }
    assert!(saw_recompute);
    assert!(services.audit.verify_chain().unwrap().is_intact());
}

#[test]
fn test_deactivated_resident_leaves_household() {
    let temp = TempDir::new().unwrap();
    let services = services(open_db(&temp));
    let actor = clerk();

    let household = services.households.create(&actor, CreateHouseholdInput::default()).unwrap();
    let mut input = resident("Melchora", "Aquino", date(1950, 1, 6));
    input.monthly_income_centavos = 1_000_000;
    input.household_id = Some(household.id.clone());
    input.position = Some(MemberPosition::Head);
    let member = services.residents.create(&actor, input).unwrap();
    assert!(member.is_senior_citizen);

    let err = services.households.deactivate(&actor, &household.id).unwrap_err();
    assert_eq!(err.field(), Some("member_count"));

    let gone = services.residents.deactivate(&actor, &member.id).unwrap();
    assert!(!gone.is_active);
    assert_eq!(gone.household_id, None);

    let household = services.households.get(&household.id).unwrap().unwrap();
    assert_eq!(household.member_count, 0);
    assert_eq!(household.head_resident_id, None);

    let closed = services.households.deactivate(&actor, &household.id).unwrap();
    assert!(!closed.is_active);

    let history = services.audit.history(AuditEntity::Resident, &member.id).unwrap();
    assert_eq!(history.last().unwrap().operation, AuditOperation::Deactivate);
}

#[test]
fn test_data_survives_reopen() {
    let temp = TempDir::new().unwrap();
    let household_id = {
        let services = services(open_db(&temp));
        services.households.create(&clerk(), CreateHouseholdInput::default()).unwrap().id
    };

    let services = services(open_db(&temp));
    let household = services.households.get(&household_id).unwrap().unwrap();
    assert_eq!(household.household_code, "042114014-0000-0000-0001");
    let next = services.households.create(&clerk(), CreateHouseholdInput::default()).unwrap();
    assert_eq!(next.household_code, "042114014-0000-0000-0002");
    assert!(services.audit.verify_chain().unwrap().is_intact());
}
