use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::{Cents, EligibilityError};

#[derive(Debug, thiserror::Error)]
pub enum ReferenceDataError {
    #[error("failed to open reference table {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse reference table: {0}")]
    Csv(#[from] csv::Error),
    #[error("{table} table has no rows")]
    Empty { table: &'static str },
    #[error("{table} table has an invalid household size '{value}'")]
    InvalidSize { table: &'static str, value: String },
    #[error("{table} table lists household size {size} more than once")]
    DuplicateSize { table: &'static str, size: u8 },
    #[error("{table} table has more than one '+' increment row")]
    DuplicateIncrement { table: &'static str },
    #[error("{table} table amount for '{row}' must be positive")]
    InvalidAmount { table: &'static str, row: String },
    #[error("assistance tier limits must strictly increase ({previous}% then {next}%)")]
    TierOrder { previous: u32, next: u32 },
    #[error("assistance percentages must not increase with income ({previous}% then {next}%)")]
    TierPercentage { previous: u8, next: u8 },
    #[error("assistance percentage {value} is outside 0..=100")]
    PercentageRange { value: u8 },
}

/// Annual amounts keyed by household size, with an optional per-member increment for households
/// larger than the biggest listed size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HouseholdTable {
    table: &'static str,
    amounts: BTreeMap<u8, Cents>,
    increment: Option<Cents>,
}

impl HouseholdTable {
    pub fn new(
        table: &'static str,
        amounts: impl IntoIterator<Item = (u8, Cents)>,
        increment: Option<Cents>,
    ) -> Result<Self, ReferenceDataError> {
        let mut by_size = BTreeMap::new();
        for (size, amount) in amounts {
            if size == 0 {
                return Err(ReferenceDataError::InvalidSize {
                    table,
                    value: size.to_string(),
                });
            }
            if amount.get() <= 0 {
                return Err(ReferenceDataError::InvalidAmount {
                    table,
                    row: size.to_string(),
                });
            }
            if by_size.insert(size, amount).is_some() {
                return Err(ReferenceDataError::DuplicateSize { table, size });
            }
        }
        if by_size.is_empty() {
            return Err(ReferenceDataError::Empty { table });
        }
        if increment.is_some_and(|step| step.get() <= 0) {
            return Err(ReferenceDataError::InvalidAmount {
                table,
                row: "+".to_string(),
            });
        }

        Ok(Self {
            table,
            amounts: by_size,
            increment,
        })
    }

    /// Reads `household_size,annual_amount` rows; a size of `+` sets the increment.
    pub fn from_reader<R: Read>(table: &'static str, reader: R) -> Result<Self, ReferenceDataError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut amounts = Vec::new();
        let mut increment = None;
        for record in csv_reader.deserialize::<HouseholdRow>() {
            let row = record?;
            let amount = Cents::from_dollars("annual_amount", row.annual_amount).map_err(|_| {
                ReferenceDataError::InvalidAmount {
                    table,
                    row: row.household_size.clone(),
                }
            })?;

            if row.household_size == "+" {
                if increment.replace(amount).is_some() {
                    return Err(ReferenceDataError::DuplicateIncrement { table });
                }
                continue;
            }

            let size = row
                .household_size
                .parse::<u8>()
                .map_err(|_| ReferenceDataError::InvalidSize {
                    table,
                    value: row.household_size.clone(),
                })?;
            amounts.push((size, amount));
        }

        Self::new(table, amounts, increment)
    }

    pub fn load(table: &'static str, path: &Path) -> Result<Self, ReferenceDataError> {
        let file = File::open(path).map_err(|source| ReferenceDataError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_reader(table, file)
    }

    pub fn amount_for(&self, household_size: u8) -> Result<Cents, EligibilityError> {
        if household_size == 0 {
            return Err(EligibilityError::EmptyHousehold);
        }
        if let Some(amount) = self.amounts.get(&household_size) {
            return Ok(*amount);
        }

        let unknown = EligibilityError::UnknownHouseholdSize {
            table: self.table,
            size: household_size,
        };
        let (largest, amount) = self
            .amounts
            .last_key_value()
            .ok_or_else(|| unknown.clone())?;
        match self.increment {
            Some(step) if household_size > *largest => {
                let extra = i64::from(household_size - largest);
                Ok(Cents::new(amount.get() + extra * step.get()))
            }
            _ => Err(unknown),
        }
    }
}

#[derive(Debug, Deserialize)]
struct HouseholdRow {
    household_size: String,
    annual_amount: f64,
}

/// Area median income by household size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmiTable(HouseholdTable);

impl AmiTable {
    pub fn new(table: HouseholdTable) -> Self {
        Self(table)
    }

    pub fn load(path: &Path) -> Result<Self, ReferenceDataError> {
        HouseholdTable::load("ami", path).map(Self)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, ReferenceDataError> {
        HouseholdTable::from_reader("ami", reader).map(Self)
    }

    pub fn median_for(&self, household_size: u8) -> Result<Cents, EligibilityError> {
        self.0.amount_for(household_size)
    }
}

/// Federal poverty guideline by household size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FplTable(HouseholdTable);

impl FplTable {
    pub fn new(table: HouseholdTable) -> Self {
        Self(table)
    }

    pub fn load(path: &Path) -> Result<Self, ReferenceDataError> {
        HouseholdTable::load("fpl", path).map(Self)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, ReferenceDataError> {
        HouseholdTable::from_reader("fpl", reader).map(Self)
    }

    pub fn guideline_for(&self, household_size: u8) -> Result<Cents, EligibilityError> {
        self.0.amount_for(household_size)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct AssistanceTier {
    /// Inclusive upper bound of the household's income as a percentage of FPL.
    pub max_fpl_percent: u32,
    pub assistance_percent: u8,
}

/// Step function from FPL ratio to assistance percentage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssistanceTiers {
    tiers: Vec<AssistanceTier>,
}

impl AssistanceTiers {
    pub fn new(tiers: Vec<AssistanceTier>) -> Result<Self, ReferenceDataError> {
        if tiers.is_empty() {
            return Err(ReferenceDataError::Empty {
                table: "utility tiers",
            });
        }
        for tier in &tiers {
            if tier.assistance_percent > 100 {
                return Err(ReferenceDataError::PercentageRange {
                    value: tier.assistance_percent,
                });
            }
        }
        for pair in tiers.windows(2) {
            if pair[1].max_fpl_percent <= pair[0].max_fpl_percent {
                return Err(ReferenceDataError::TierOrder {
                    previous: pair[0].max_fpl_percent,
                    next: pair[1].max_fpl_percent,
                });
            }
            if pair[1].assistance_percent > pair[0].assistance_percent {
                return Err(ReferenceDataError::TierPercentage {
                    previous: pair[0].assistance_percent,
                    next: pair[1].assistance_percent,
                });
            }
        }
        Ok(Self { tiers })
    }

    /// Reads `max_fpl_percent,assistance_percent` rows.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, ReferenceDataError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);
        let tiers = csv_reader
            .deserialize::<AssistanceTier>()
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(tiers)
    }

    pub fn load(path: &Path) -> Result<Self, ReferenceDataError> {
        let file = File::open(path).map_err(|source| ReferenceDataError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_reader(file)
    }

    /// Percentage for a household earning `annual_income` against a guideline of `poverty_line`.
    /// Incomes above the last limit get nothing.
    pub fn percentage_for(&self, annual_income: Cents, poverty_line: Cents) -> u8 {
        let income = i128::from(annual_income.get()) * 100;
        let line = i128::from(poverty_line.get());
        self.tiers
            .iter()
            .find(|tier| income <= i128::from(tier.max_fpl_percent) * line)
            .map_or(0, |tier| tier.assistance_percent)
    }

    pub fn tiers(&self) -> &[AssistanceTier] {
        &self.tiers
    }
}

/// The three tables the calculators need, loaded together at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceData {
    pub ami: AmiTable,
    pub fpl: FplTable,
    pub tiers: AssistanceTiers,
}

impl ReferenceData {
    pub fn load(ami: &Path, fpl: &Path, tiers: &Path) -> Result<Self, ReferenceDataError> {
        Ok(Self {
            ami: AmiTable::load(ami)?,
            fpl: FplTable::load(fpl)?,
            tiers: AssistanceTiers::load(tiers)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FPL_CSV: &str = "household_size,annual_amount\n1,15060\n2,20440\n3,25820\n+,5380\n";

    #[test]
    fn household_tables_extrapolate_with_the_increment_row() {
        let fpl = FplTable::from_reader(FPL_CSV.as_bytes()).expect("table parses");
        assert_eq!(fpl.guideline_for(2), Ok(Cents::new(2_044_000)));
        assert_eq!(fpl.guideline_for(5), Ok(Cents::new(3_658_000)));
        assert_eq!(fpl.guideline_for(0), Err(EligibilityError::EmptyHousehold));
    }

    #[test]
    fn sizes_past_the_table_without_increment_are_unknown() {
        let ami = AmiTable::from_reader("household_size,annual_amount\n1,70000\n2,80000\n".as_bytes())
            .expect("table parses");
        assert_eq!(
            ami.median_for(3),
            Err(EligibilityError::UnknownHouseholdSize {
                table: "ami",
                size: 3
            })
        );
    }

    #[test]
    fn malformed_household_rows_are_rejected() {
        let duplicate = "household_size,annual_amount\n1,100\n1,200\n";
        assert!(matches!(
            HouseholdTable::from_reader("ami", duplicate.as_bytes()),
            Err(ReferenceDataError::DuplicateSize { size: 1, .. })
        ));

        let bad_size = "household_size,annual_amount\nfour,100\n";
        assert!(matches!(
            HouseholdTable::from_reader("ami", bad_size.as_bytes()),
            Err(ReferenceDataError::InvalidSize { .. })
        ));

        let header_only = "household_size,annual_amount\n";
        assert!(matches!(
            HouseholdTable::from_reader("ami", header_only.as_bytes()),
            Err(ReferenceDataError::Empty { table: "ami" })
        ));
    }

    #[test]
    fn tiers_must_be_a_decreasing_step_function() {
        let rising = vec![
            AssistanceTier {
                max_fpl_percent: 100,
                assistance_percent: 50,
            },
            AssistanceTier {
                max_fpl_percent: 150,
                assistance_percent: 60,
            },
        ];
        assert!(matches!(
            AssistanceTiers::new(rising),
            Err(ReferenceDataError::TierPercentage { .. })
        ));

        let unordered = "max_fpl_percent,assistance_percent\n150,50\n100,40\n";
        assert!(matches!(
            AssistanceTiers::from_reader(unordered.as_bytes()),
            Err(ReferenceDataError::TierOrder { .. })
        ));
    }

    #[test]
    fn tier_limits_are_inclusive() {
        let tiers = AssistanceTiers::from_reader(
            "max_fpl_percent,assistance_percent\n100,90\n150,60\n200,30\n".as_bytes(),
        )
        .expect("tiers parse");
        let line = Cents::new(2_000_000);
        assert_eq!(tiers.percentage_for(Cents::new(2_000_000), line), 90);
        assert_eq!(tiers.percentage_for(Cents::new(2_000_001), line), 60);
        assert_eq!(tiers.percentage_for(Cents::new(4_000_000), line), 30);
        assert_eq!(tiers.percentage_for(Cents::new(4_000_001), line), 0);
    }
}
