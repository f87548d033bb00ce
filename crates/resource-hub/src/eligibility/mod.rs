//! Deterministic eligibility calculators.
//!
//! Each calculator is a pure function of its input and the reference tables passed in; nothing
//! here reads configuration or the network. Money that is compared against a limit is handled in
//! integer cents so boundaries are exact.

mod income;
mod loan;
mod reference;
mod utility;

use std::fmt;

use serde::{Serialize, Serializer};

pub use income::{income_qualification, IncomeInput, IncomeQualification, IncomeThreshold};
pub use loan::{loan_payment, LoanInput, LoanQuote, MAX_TERM_YEARS};
pub use reference::{
    AmiTable, AssistanceTier, AssistanceTiers, FplTable, HouseholdTable, ReferenceData,
    ReferenceDataError,
};
pub use utility::{utility_assistance, UtilityAssistance, UtilityInput, UtilityType};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EligibilityError {
    #[error("{field} must be a finite number")]
    NotFinite { field: &'static str },
    #[error("{field} must not be negative (got {value})")]
    Negative { field: &'static str, value: f64 },
    #[error("{field} is too large to calculate with")]
    OutOfRange { field: &'static str },
    #[error("loan term must be between 1 and {max} years (got {years})")]
    Term { years: u32, max: u32 },
    #[error("household size must be at least 1")]
    EmptyHousehold,
    #[error("no {table} amount for a household of {size}")]
    UnknownHouseholdSize { table: &'static str, size: u8 },
    #[error("income threshold must be above 0% and at most 200% (got {percent})")]
    Threshold { percent: f64 },
}

/// Non-negative amount of money in whole cents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Cents(i64);

/// Largest dollar amount accepted as input; keeps every intermediate product inside `i128` with
/// room to spare and inside the exact integer range of `f64`.
const MAX_DOLLARS: f64 = 1.0e12;

impl Cents {
    pub const ZERO: Cents = Cents(0);

    pub const fn new(cents: i64) -> Self {
        Self(cents)
    }

    /// Rounds a dollar amount to the nearest cent.
    pub fn from_dollars(field: &'static str, dollars: f64) -> Result<Self, EligibilityError> {
        if !dollars.is_finite() {
            return Err(EligibilityError::NotFinite { field });
        }
        if dollars < 0.0 {
            return Err(EligibilityError::Negative {
                field,
                value: dollars,
            });
        }
        if dollars > MAX_DOLLARS {
            return Err(EligibilityError::OutOfRange { field });
        }
        Ok(Self((dollars * 100.0).round() as i64))
    }

    pub const fn get(self) -> i64 {
        self.0
    }

    pub fn dollars(self) -> f64 {
        self.0 as f64 / 100.0
    }
}

impl fmt::Display for Cents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}.{:02}", self.0 / 100, self.0 % 100)
    }
}

impl Serialize for Cents {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.dollars())
    }
}

/// `numerator / denominator * 100`, rounded half up. `denominator` must be positive.
pub(crate) fn rounded_percent(numerator: i64, denominator: i64) -> u32 {
    let numerator = i128::from(numerator.max(0));
    let denominator = i128::from(denominator.max(1));
    let value = (200 * numerator + denominator) / (2 * denominator);
    u32::try_from(value).unwrap_or(u32::MAX)
}

pub(crate) fn finite(field: &'static str, value: f64) -> Result<f64, EligibilityError> {
    if !value.is_finite() {
        return Err(EligibilityError::NotFinite { field });
    }
    if value < 0.0 {
        return Err(EligibilityError::Negative { field, value });
    }
    Ok(value)
}
