//! Income tier classification
//!
//! Amounts are monthly household income in centavos.

use crate::db::models::IncomeTier;
use crate::error::RegistryError;

/// Lower bound (inclusive) of each tier above `Poor`, highest first
const TIER_FLOORS: [(i64, IncomeTier); 6] = [
    (21_914_000, IncomeTier::Rich),
    (13_148_400, IncomeTier::HighIncome),
    (7_666_900, IncomeTier::UpperMiddleIncome),
    (4_382_800, IncomeTier::MiddleClass),
    (2_119_400, IncomeTier::LowerMiddleClass),
    (952_000, IncomeTier::LowIncome),
];

/// Tier of a monthly income; unknown or negative income is `Poor`
pub fn classify(monthly_income_centavos: Option<i64>) -> IncomeTier {
    let Some(amount) = monthly_income_centavos else {
        return IncomeTier::Poor;
    };

    TIER_FLOORS
        .iter()
        .find(|(floor, _)| amount >= *floor)
        .map(|(_, tier)| *tier)
        .unwrap_or(IncomeTier::Poor)
}

impl IncomeTier {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Poor => "Poor",
            Self::LowIncome => "Low Income",
            Self::LowerMiddleClass => "Lower Middle Class",
            Self::MiddleClass => "Middle Class",
            Self::UpperMiddleIncome => "Upper Middle Income",
            Self::HighIncome => "High Income",
            Self::Rich => "Rich",
        }
    }

    /// Smallest monthly income (centavos) in this tier
    pub fn floor_centavos(&self) -> i64 {
        TIER_FLOORS
            .iter()
            .find(|(_, tier)| tier == self)
            .map(|(floor, _)| *floor)
            .unwrap_or(0)
    }
}

/// Parse a peso amount such as `12345`, `12,345.5` or `9519.99` into centavos
pub fn parse_pesos(text: &str) -> Result<i64, RegistryError> {
    let invalid = || RegistryError::validation("amount", format!("'{}' is not a peso amount", text));

    let cleaned: String = text.trim().chars().filter(|c| *c != ',').collect();
    let (negative, digits) = match cleaned.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, cleaned.as_str()),
    };

    let (whole, fraction) = match digits.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (digits, ""),
    };
    if whole.is_empty()
        || fraction.len() > 2
        || !whole.bytes().all(|b| b.is_ascii_digit())
        || !fraction.bytes().all(|b| b.is_ascii_digit())
    {
        return Err(invalid());
    }

    let pesos: i64 = whole.parse().map_err(|_| invalid())?;
    let centavos: i64 = match fraction.len() {
        0 => 0,
        1 => fraction.parse::<i64>().map_err(|_| invalid())? * 10,
        _ => fraction.parse().map_err(|_| invalid())?,
    };

    let total = pesos
        .checked_mul(100)
        .and_then(|v| v.checked_add(centavos))
        .ok_or_else(invalid)?;
    Ok(if negative { -total } else { total })
}

/// Render centavos as a peso amount with two decimals
pub fn format_pesos(centavos: i64) -> String {
    let sign = if centavos < 0 { "-" } else { "" };
    let abs = centavos.unsigned_abs();
    format!("{}{}.{:02}", sign, abs / 100, abs % 100)
}
