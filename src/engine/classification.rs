//! Sector flag derivation
//!
//! Pure functions from a resident's birthdate, employment status and
//! education to the six derived sector flags. The remaining flags on a
//! resident are operator-maintained and never touched here.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::db::models::{EducationLevel, EmploymentStatus};
use crate::db::ResidentRow;
use crate::error::RegistryError;

pub const SENIOR_CITIZEN_AGE: u32 = 60;

/// Ages (inclusive) for out-of-school children
pub const OUT_OF_SCHOOL_CHILDREN_AGES: (u32, u32) = (6, 14);

/// Ages (inclusive) for out-of-school youth
pub const OUT_OF_SCHOOL_YOUTH_AGES: (u32, u32) = (15, 24);

/// Whole years completed on `on`.
///
/// A birthday not yet reached in the evaluation year counts one year less.
pub fn age_on(birthdate: NaiveDate, on: NaiveDate) -> Result<u32, RegistryError> {
    if birthdate > on {
        return Err(RegistryError::validation(
            "birthdate",
            format!("birthdate {} is after the evaluation date {}", birthdate, on),
        ));
    }

    let mut years = on.year() - birthdate.year();
    if (on.month(), on.day()) < (birthdate.month(), birthdate.day()) {
        years -= 1;
    }
    Ok(years as u32)
}

/// Resident attributes the derived flags depend on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassificationInput {
    pub birthdate: NaiveDate,
    pub employment_status: Option<EmploymentStatus>,
    pub education_level: EducationLevel,
    pub education_completed: bool,
}

impl ClassificationInput {
    pub fn of(row: &ResidentRow) -> Self {
        Self {
            birthdate: row.birthdate,
            employment_status: row.employment_status,
            education_level: row.education_level,
            education_completed: row.education_completed,
        }
    }
}

/// The derived sector flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedFlags {
    pub senior_citizen: bool,
    pub labor_force: bool,
    pub employed: bool,
    pub unemployed: bool,
    pub out_of_school_children: bool,
    pub out_of_school_youth: bool,
}

impl DerivedFlags {
    /// Flags currently stored on a row
    pub fn stored(row: &ResidentRow) -> Self {
        Self {
            senior_citizen: row.is_senior_citizen,
            labor_force: row.is_labor_force,
            employed: row.is_employed,
            unemployed: row.is_unemployed,
            out_of_school_children: row.is_out_of_school_children,
            out_of_school_youth: row.is_out_of_school_youth,
        }
    }

    pub fn apply_to(&self, row: &mut ResidentRow) {
        row.is_senior_citizen = self.senior_citizen;
        row.is_labor_force = self.labor_force;
        row.is_employed = self.employed;
        row.is_unemployed = self.unemployed;
        row.is_out_of_school_children = self.out_of_school_children;
        row.is_out_of_school_youth = self.out_of_school_youth;
    }
}

/// Derive flags as of `on`
pub fn classify(input: &ClassificationInput, on: NaiveDate) -> Result<DerivedFlags, RegistryError> {
    let age = age_on(input.birthdate, on)?;
    Ok(classify_at_age(
        age,
        input.employment_status,
        input.education_level,
        input.education_completed,
    ))
}

/// Derive flags for a resident of a known age
pub fn classify_at_age(
    age: u32,
    employment: Option<EmploymentStatus>,
    education: EducationLevel,
    completed: bool,
) -> DerivedFlags {
    use EmploymentStatus::*;

    let labor_force = matches!(
        employment,
        Some(Employed | Unemployed | Underemployed | SelfEmployed | LookingForWork)
    );
    let employed = matches!(employment, Some(Employed | SelfEmployed));
    let unemployed = matches!(employment, Some(Unemployed | LookingForWork));

    let in_range = |(lo, hi): (u32, u32)| (lo..=hi).contains(&age);

    let out_of_school_children = in_range(OUT_OF_SCHOOL_CHILDREN_AGES)
        && !completed
        && matches!(education, EducationLevel::Elementary | EducationLevel::HighSchool);

    let out_of_school_youth = in_range(OUT_OF_SCHOOL_YOUTH_AGES)
        && !completed
        && !matches!(education, EducationLevel::College | EducationLevel::PostGraduate)
        && !employed;

    DerivedFlags {
        senior_citizen: age >= SENIOR_CITIZEN_AGE,
        labor_force,
        employed,
        unemployed,
        out_of_school_children,
        out_of_school_youth,
    }
}
