use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::reference::{AssistanceTiers, FplTable};
use super::{Cents, EligibilityError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UtilityType {
    Electric,
    Gas,
    Water,
    #[default]
    Combined,
}

impl UtilityType {
    pub const fn label(self) -> &'static str {
        match self {
            UtilityType::Electric => "electric",
            UtilityType::Gas => "gas",
            UtilityType::Water => "water",
            UtilityType::Combined => "combined",
        }
    }
}

impl fmt::Display for UtilityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for UtilityType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "electric" => Ok(UtilityType::Electric),
            "gas" => Ok(UtilityType::Gas),
            "water" => Ok(UtilityType::Water),
            "combined" => Ok(UtilityType::Combined),
            other => Err(format!("unsupported utility type '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UtilityInput {
    pub household_size: u8,
    pub monthly_income: f64,
    pub monthly_utility_cost: f64,
    #[serde(default)]
    pub utility_type: UtilityType,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct UtilityAssistance {
    pub household_size: u8,
    pub annual_income: Cents,
    pub poverty_guideline: Cents,
    /// Annual income as a percentage of the poverty guideline, to one decimal.
    pub fpl_percentage: f64,
    pub assistance_percentage: u8,
    pub monthly_utility_cost: Cents,
    pub assistance_amount: Cents,
    pub cost_after_assistance: Cents,
    pub utility_type: UtilityType,
}

/// Monthly bill assistance from the household's income relative to the poverty guideline.
///
/// The amount is always between zero and the monthly cost.
pub fn utility_assistance(
    input: &UtilityInput,
    fpl: &FplTable,
    tiers: &AssistanceTiers,
) -> Result<UtilityAssistance, EligibilityError> {
    let monthly_income = Cents::from_dollars("monthly_income", input.monthly_income)?;
    let cost = Cents::from_dollars("monthly_utility_cost", input.monthly_utility_cost)?;
    let poverty_guideline = fpl.guideline_for(input.household_size)?;

    let annual_income = Cents::new(monthly_income.get() * 12);
    let assistance_percentage = tiers.percentage_for(annual_income, poverty_guideline);

    let share = i128::from(cost.get()) * i128::from(assistance_percentage) / 100;
    let assistance = (share as i64).clamp(0, cost.get());

    let ratio = annual_income.get() as f64 * 100.0 / poverty_guideline.get() as f64;
    Ok(UtilityAssistance {
        household_size: input.household_size,
        annual_income,
        poverty_guideline,
        fpl_percentage: (ratio * 10.0).round() / 10.0,
        assistance_percentage,
        monthly_utility_cost: cost,
        assistance_amount: Cents::new(assistance),
        cost_after_assistance: Cents::new(cost.get() - assistance),
        utility_type: input.utility_type,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tables() -> (FplTable, AssistanceTiers) {
        let fpl = FplTable::from_reader(
            "household_size,annual_amount\n1,15060\n2,20440\n3,25820\n4,31200\n+,5380\n".as_bytes(),
        )
        .expect("fpl parses");
        let tiers = AssistanceTiers::from_reader(
            "max_fpl_percent,assistance_percent\n100,75\n150,50\n200,25\n".as_bytes(),
        )
        .expect("tiers parse");
        (fpl, tiers)
    }

    fn run(size: u8, income: f64, cost: f64) -> UtilityAssistance {
        let (fpl, tiers) = tables();
        utility_assistance(
            &UtilityInput {
                household_size: size,
                monthly_income: income,
                monthly_utility_cost: cost,
                utility_type: UtilityType::Electric,
            },
            &fpl,
            &tiers,
        )
        .expect("valid input")
    }

    #[test]
    fn lower_income_gets_a_higher_tier() {
        let poor = run(3, 2_000.0, 200.0);
        assert_eq!(poor.assistance_percentage, 75);
        assert_eq!(poor.assistance_amount, Cents::new(15_000));
        assert_eq!(poor.cost_after_assistance, Cents::new(5_000));

        let middle = run(3, 3_500.0, 200.0);
        assert_eq!(middle.fpl_percentage, 162.7);
        assert_eq!(middle.assistance_percentage, 25);
        assert_eq!(middle.assistance_amount, Cents::new(5_000));
        assert_eq!(middle.utility_type, UtilityType::Electric);
    }

    #[test]
    fn income_above_every_tier_gets_nothing() {
        let result = run(1, 5_000.0, 180.0);
        assert_eq!(result.assistance_percentage, 0);
        assert_eq!(result.assistance_amount, Cents::ZERO);
        assert_eq!(result.cost_after_assistance, Cents::new(18_000));
    }

    #[test]
    fn zero_cost_yields_zero_assistance() {
        let result = run(2, 0.0, 0.0);
        assert_eq!(result.assistance_percentage, 75);
        assert_eq!(result.assistance_amount, Cents::ZERO);
    }

    #[test]
    fn utility_type_parses_case_insensitively() {
        assert_eq!("Gas".parse::<UtilityType>(), Ok(UtilityType::Gas));
        assert!("solar".parse::<UtilityType>().is_err());
    }
}
