use serde::{Deserialize, Serialize};

use super::reference::AmiTable;
use super::{rounded_percent, Cents, EligibilityError};

/// Share of area median income a household may earn, held in basis points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IncomeThreshold {
    basis_points: u32,
}

impl IncomeThreshold {
    pub fn from_percent(percent: f64) -> Result<Self, EligibilityError> {
        if !percent.is_finite() || percent <= 0.0 || percent > 200.0 {
            return Err(EligibilityError::Threshold { percent });
        }
        let basis_points = (percent * 100.0).round() as u32;
        if basis_points == 0 {
            return Err(EligibilityError::Threshold { percent });
        }
        Ok(Self { basis_points })
    }

    pub fn percent(self) -> f64 {
        f64::from(self.basis_points) / 100.0
    }

    fn apply(self, median: Cents) -> Cents {
        let scaled = i128::from(median.get()) * i128::from(self.basis_points);
        Cents::new(((scaled + 5_000) / 10_000) as i64)
    }
}

impl Default for IncomeThreshold {
    fn default() -> Self {
        Self { basis_points: 8_000 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IncomeInput {
    pub household_size: u8,
    pub annual_income: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct IncomeQualification {
    pub qualifies: bool,
    pub household_size: u8,
    pub annual_income: Cents,
    pub max_income_limit: Cents,
    pub area_median_income: Cents,
    pub threshold_percent: f64,
    pub qualification_percentage: u32,
}

/// Compares household income against `threshold` of the area median for its size.
///
/// Income exactly at the limit qualifies.
pub fn income_qualification(
    input: &IncomeInput,
    ami: &AmiTable,
    threshold: IncomeThreshold,
) -> Result<IncomeQualification, EligibilityError> {
    let annual_income = Cents::from_dollars("annual_income", input.annual_income)?;
    let area_median_income = ami.median_for(input.household_size)?;
    let max_income_limit = threshold.apply(area_median_income);
    if max_income_limit.get() <= 0 {
        return Err(EligibilityError::OutOfRange {
            field: "max_income_limit",
        });
    }

    Ok(IncomeQualification {
        qualifies: annual_income <= max_income_limit,
        household_size: input.household_size,
        annual_income,
        max_income_limit,
        area_median_income,
        threshold_percent: threshold.percent(),
        qualification_percentage: rounded_percent(annual_income.get(), max_income_limit.get()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ami() -> AmiTable {
        AmiTable::from_reader(
            "household_size,annual_amount\n1,62300\n2,71200\n3,80100\n4,88900\n+,7100\n".as_bytes(),
        )
        .expect("ami parses")
    }

    fn check(size: u8, income: f64) -> IncomeQualification {
        income_qualification(
            &IncomeInput {
                household_size: size,
                annual_income: income,
            },
            &ami(),
            IncomeThreshold::default(),
        )
        .expect("valid input")
    }

    #[test]
    fn limit_is_eighty_percent_of_median() {
        let result = check(4, 45_000.0);
        assert_eq!(result.area_median_income, Cents::new(8_890_000));
        assert_eq!(result.max_income_limit, Cents::new(7_112_000));
        assert!(result.qualifies);
        assert_eq!(result.qualification_percentage, 63);
    }

    #[test]
    fn boundary_is_inclusive_to_the_cent() {
        let at_limit = check(4, 71_120.0);
        assert!(at_limit.qualifies);
        assert_eq!(at_limit.qualification_percentage, 100);

        let over = check(4, 71_120.01);
        assert!(!over.qualifies);
    }

    #[test]
    fn custom_threshold_is_applied() {
        let result = income_qualification(
            &IncomeInput {
                household_size: 1,
                annual_income: 40_000.0,
            },
            &ami(),
            IncomeThreshold::from_percent(60.0).expect("valid threshold"),
        )
        .expect("valid input");
        assert_eq!(result.max_income_limit, Cents::new(3_738_000));
        assert!(!result.qualifies);
        assert_eq!(result.qualification_percentage, 107);
    }

    #[test]
    fn invalid_inputs_are_rejected() {
        let table = ami();
        let run = |size, income| {
            income_qualification(
                &IncomeInput {
                    household_size: size,
                    annual_income: income,
                },
                &table,
                IncomeThreshold::default(),
            )
        };
        assert_eq!(run(0, 1_000.0), Err(EligibilityError::EmptyHousehold));
        assert!(matches!(run(2, -5.0), Err(EligibilityError::Negative { .. })));
        assert!(IncomeThreshold::from_percent(0.0).is_err());
        assert!(IncomeThreshold::from_percent(f64::NAN).is_err());
    }

    #[test]
    fn threshold_below_one_basis_point_is_rejected() {
        assert_eq!(
            IncomeThreshold::from_percent(0.004),
            Err(EligibilityError::Threshold { percent: 0.004 })
        );
        let smallest = IncomeThreshold::from_percent(0.01).expect("one basis point");
        assert_eq!(smallest.percent(), 0.01);
    }
}
