//! Property checks for the eligibility calculators over randomized household inputs.

mod common {
    use resource_hub::eligibility::{AmiTable, AssistanceTiers, FplTable};

    pub(super) fn fpl() -> FplTable {
        FplTable::from_reader(
            "household_size,annual_amount\n1,15060\n2,20440\n3,25820\n4,31200\n+,5380\n"
                .as_bytes(),
        )
        .expect("fpl parses")
    }

    pub(super) fn ami() -> AmiTable {
        AmiTable::from_reader(
            "household_size,annual_amount\n1,62300\n2,71200\n3,80100\n4,88900\n+,7100\n"
                .as_bytes(),
        )
        .expect("ami parses")
    }

    pub(super) fn tiers() -> AssistanceTiers {
        AssistanceTiers::from_reader(
            "max_fpl_percent,assistance_percent\n50,100\n100,75\n150,50\n200,25\n".as_bytes(),
        )
        .expect("tiers parse")
    }
}

use common::*;
use proptest::prelude::*;
use resource_hub::eligibility::{
    income_qualification, loan_payment, utility_assistance, Cents, IncomeInput, IncomeThreshold,
    LoanInput, UtilityInput, UtilityType,
};

fn utility_type() -> impl Strategy<Value = UtilityType> {
    prop_oneof![
        Just(UtilityType::Electric),
        Just(UtilityType::Gas),
        Just(UtilityType::Water),
        Just(UtilityType::Combined),
    ]
}

proptest! {
    #[test]
    fn assistance_stays_between_zero_and_the_bill(
        household_size in 1u8..=12,
        monthly_income in 0.0f64..20_000.0,
        monthly_utility_cost in 0.0f64..2_000.0,
        utility_type in utility_type(),
    ) {
        let input = UtilityInput { household_size, monthly_income, monthly_utility_cost, utility_type };
        let result = utility_assistance(&input, &fpl(), &tiers()).expect("valid inputs");

        prop_assert!(result.assistance_amount >= Cents::ZERO);
        prop_assert!(result.assistance_amount <= result.monthly_utility_cost);
        prop_assert_eq!(
            result.assistance_amount.get() + result.cost_after_assistance.get(),
            result.monthly_utility_cost.get()
        );
        prop_assert_eq!(result.utility_type, utility_type);
    }

    #[test]
    fn more_income_never_earns_more_assistance(
        household_size in 1u8..=8,
        monthly_income in 0.0f64..10_000.0,
        raise in 0.0f64..5_000.0,
        monthly_utility_cost in 1.0f64..1_000.0,
    ) {
        let run = |income: f64| {
            utility_assistance(
                &UtilityInput {
                    household_size,
                    monthly_income: income,
                    monthly_utility_cost,
                    utility_type: UtilityType::Combined,
                },
                &fpl(),
                &tiers(),
            )
            .expect("valid inputs")
        };
        prop_assert!(run(monthly_income + raise).assistance_amount <= run(monthly_income).assistance_amount);
    }

    #[test]
    fn unusable_utility_inputs_are_errors_not_amounts(
        monthly_income in prop_oneof![Just(f64::NAN), Just(f64::INFINITY), -10_000.0f64..-0.01],
    ) {
        let input = UtilityInput {
            household_size: 2,
            monthly_income,
            monthly_utility_cost: 150.0,
            utility_type: UtilityType::Gas,
        };
        prop_assert!(utility_assistance(&input, &fpl(), &tiers()).is_err());
    }

    #[test]
    fn qualification_agrees_with_the_limit(
        household_size in 1u8..=10,
        annual_income in 0.0f64..250_000.0,
    ) {
        let result = income_qualification(
            &IncomeInput { household_size, annual_income },
            &ami(),
            IncomeThreshold::default(),
        )
        .expect("valid inputs");
        prop_assert_eq!(result.qualifies, result.annual_income <= result.max_income_limit);
        if result.qualifies {
            prop_assert!(result.qualification_percentage <= 100);
        }
    }

    #[test]
    fn loan_payments_are_finite_and_cover_the_principal(
        principal in 1_000.0f64..2_000_000.0,
        interest_rate in 0.0f64..15.0,
        loan_term_years in 1u32..=40,
    ) {
        let quote = loan_payment(&LoanInput { principal, interest_rate, loan_term_years })
            .expect("valid loan");
        prop_assert!(quote.monthly_payment.is_finite());
        prop_assert!(quote.monthly_payment > 0.0);
        prop_assert!(quote.total_cost + 1e-6 >= principal);
        prop_assert!(quote.total_interest >= 0.0);
    }

    #[test]
    fn near_zero_rates_approach_the_interest_free_payment(
        principal in 1_000.0f64..2_000_000.0,
        interest_rate in 1e-15f64..1e-6,
        loan_term_years in 1u32..=50,
    ) {
        let quote = loan_payment(&LoanInput { principal, interest_rate, loan_term_years })
            .expect("valid loan");
        let even = principal / f64::from(loan_term_years * 12);
        prop_assert!(quote.monthly_payment >= even * (1.0 - 1e-12));
        prop_assert!((quote.monthly_payment - even).abs() <= even * 1e-6);
        prop_assert!(quote.total_interest >= 0.0);
    }
}
