//! Shared column vocabularies and timestamp helpers
//!
//! Every classification domain is a closed enum stored as a TEXT tag.
//! The tags double as the serde representation so audit snapshots and
//! API payloads carry the same values as the columns.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer};

// ============================================================================
// Timestamp Helpers (SQLite stores timestamps as TEXT)
// ============================================================================

/// Format a UTC instant for SQLite TEXT columns (microsecond precision)
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Current UTC timestamp as ISO 8601 string
pub fn current_timestamp() -> String {
    format_timestamp(Utc::now())
}

/// Distinguish an explicit `null` (clear) from an absent field (keep)
/// in partial-update inputs
pub(crate) fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

// ============================================================================
// Closed vocabularies
// ============================================================================

/// Declares a closed enum backed by a TEXT column.
///
/// Generates `ALL`, `as_str`, `Display`, `FromStr` (unknown tags are a
/// validation error on the named field), serde and rusqlite conversions.
macro_rules! text_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident as $field:literal {
            $( $(#[$vmeta:meta])* $variant:ident => $tag:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        $vis enum $name {
            $( $(#[$vmeta])* $variant ),+
        }

        impl $name {
            /// Every variant in declaration order
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $tag),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::error::RegistryError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($tag => Ok($name::$variant),)+
                    other => Err($crate::error::RegistryError::validation(
                        $field,
                        format!("unknown value '{}'", other),
                    )),
                }
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                raw.parse().map_err(serde::de::Error::custom)
            }
        }

        impl rusqlite::types::ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
                Ok(rusqlite::types::ToSqlOutput::from(self.as_str()))
            }
        }

        impl rusqlite::types::FromSql for $name {
            fn column_result(value: rusqlite::types::ValueRef<'_>) -> rusqlite::types::FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|e| rusqlite::types::FromSqlError::Other(Box::new(e)))
            }
        }
    };
}

pub(crate) use text_enum;

text_enum! {
    /// Sex recorded at registration
    pub enum Sex as "sex" {
        Male => "male",
        Female => "female",
    }
}

text_enum! {
    pub enum CivilStatus as "civil_status" {
        Single => "single",
        Married => "married",
        LiveIn => "live_in",
        Widowed => "widowed",
        Separated => "separated",
        Divorced => "divorced",
        Annulled => "annulled",
    }
}

text_enum! {
    /// Highest education level attained or currently attended
    pub enum EducationLevel as "education_level" {
        NoFormalEducation => "no_formal_education",
        Preschool => "preschool",
        Elementary => "elementary",
        HighSchool => "high_school",
        Vocational => "vocational",
        College => "college",
        PostGraduate => "post_graduate",
    }
}

text_enum! {
    pub enum EmploymentStatus as "employment_status" {
        Employed => "employed",
        Unemployed => "unemployed",
        Underemployed => "underemployed",
        SelfEmployed => "self_employed",
        LookingForWork => "looking_for_work",
        Student => "student",
        Retired => "retired",
        Homemaker => "homemaker",
        UnableToWork => "unable_to_work",
    }
}

text_enum! {
    pub enum HouseholdType as "household_type" {
        Nuclear => "nuclear",
        Extended => "extended",
        SinglePerson => "single_person",
        SingleParent => "single_parent",
        Composite => "composite",
    }
}

text_enum! {
    /// Tenure status of the housing unit
    pub enum TenureStatus as "tenure_status" {
        Owned => "owned",
        Amortizing => "amortizing",
        Rented => "rented",
        RentFreeWithConsent => "rent_free_with_consent",
        RentFreeWithoutConsent => "rent_free_without_consent",
    }
}

text_enum! {
    pub enum HousingUnitType as "unit_type" {
        SingleHouse => "single_house",
        Duplex => "duplex",
        Apartment => "apartment",
        Condominium => "condominium",
        Makeshift => "makeshift",
        Institutional => "institutional",
    }
}

text_enum! {
    /// Position of a member relative to the household head
    pub enum MemberPosition as "position" {
        Head => "head",
        Spouse => "spouse",
        Child => "child",
        Parent => "parent",
        Sibling => "sibling",
        Grandchild => "grandchild",
        OtherRelative => "other_relative",
        NonRelative => "non_relative",
    }
}

text_enum! {
    /// Household income tier, ordered from lowest to highest
    pub enum IncomeTier as "income_tier" {
        Poor => "poor",
        LowIncome => "low_income",
        LowerMiddleClass => "lower_middle_class",
        MiddleClass => "middle_class",
        UpperMiddleIncome => "upper_middle_income",
        HighIncome => "high_income",
        Rich => "rich",
    }
}

text_enum! {
    /// Level of a unit in the geographic reference hierarchy
    pub enum GeoLevel as "level" {
        Region => "region",
        Province => "province",
        City => "city",
        Municipality => "municipality",
        SubMunicipality => "sub_municipality",
        Barangay => "barangay",
    }
}

text_enum! {
    /// Named sector flag on a resident
    pub enum SectorFlag as "flag" {
        SeniorCitizen => "senior_citizen",
        LaborForce => "labor_force",
        Employed => "employed",
        Unemployed => "unemployed",
        OutOfSchoolChildren => "out_of_school_children",
        OutOfSchoolYouth => "out_of_school_youth",
        Migrant => "migrant",
        PersonWithDisability => "person_with_disability",
        SoloParent => "solo_parent",
        Indigenous => "indigenous",
        OverseasWorker => "overseas_worker",
        RegisteredSeniorCitizen => "registered_senior_citizen",
    }
}

impl SectorFlag {
    /// Column holding the flag in `residents`
    pub fn column(&self) -> &'static str {
        match self {
            Self::SeniorCitizen => "is_senior_citizen",
            Self::LaborForce => "is_labor_force",
            Self::Employed => "is_employed",
            Self::Unemployed => "is_unemployed",
            Self::OutOfSchoolChildren => "is_out_of_school_children",
            Self::OutOfSchoolYouth => "is_out_of_school_youth",
            Self::Migrant => "is_migrant",
            Self::PersonWithDisability => "is_person_with_disability",
            Self::SoloParent => "is_solo_parent",
            Self::Indigenous => "is_indigenous",
            Self::OverseasWorker => "is_overseas_worker",
            Self::RegisteredSeniorCitizen => "is_registered_senior_citizen",
        }
    }

    /// Whether the classification engine derives this flag
    pub fn is_derived(&self) -> bool {
        matches!(
            self,
            Self::SeniorCitizen
                | Self::LaborForce
                | Self::Employed
                | Self::Unemployed
                | Self::OutOfSchoolChildren
                | Self::OutOfSchoolYouth
        )
    }
}
