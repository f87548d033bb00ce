use serde::{Deserialize, Serialize};

use super::{finite, EligibilityError};

pub const MAX_TERM_YEARS: u32 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoanInput {
    pub principal: f64,
    /// Annual rate in percent, e.g. `4.5`.
    pub interest_rate: f64,
    pub loan_term_years: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LoanQuote {
    pub monthly_payment: f64,
    pub total_interest: f64,
    pub total_cost: f64,
    pub term_months: u32,
}

/// Fixed-rate amortized monthly payment.
///
/// A zero rate is an interest-free loan repaid in equal installments of `principal / months`.
pub fn loan_payment(input: &LoanInput) -> Result<LoanQuote, EligibilityError> {
    let principal = finite("principal", input.principal)?;
    let annual_rate = finite("interest_rate", input.interest_rate)?;
    if input.loan_term_years == 0 || input.loan_term_years > MAX_TERM_YEARS {
        return Err(EligibilityError::Term {
            years: input.loan_term_years,
            max: MAX_TERM_YEARS,
        });
    }

    let term_months = input.loan_term_years * 12;
    let months = f64::from(term_months);
    let monthly_rate = annual_rate / 100.0 / 12.0;

    if monthly_rate == 0.0 {
        return Ok(LoanQuote {
            monthly_payment: principal / months,
            total_interest: 0.0,
            total_cost: principal,
            term_months,
        });
    }

    // 1 - (1 + r)^-n, kept exact for rates too small to move 1 + r.
    let discount = -(-months * monthly_rate.ln_1p()).exp_m1();
    let monthly_payment = if discount > 0.0 {
        principal * monthly_rate / discount
    } else {
        principal / months
    };
    if !monthly_payment.is_finite() {
        return Err(EligibilityError::OutOfRange {
            field: "interest_rate",
        });
    }

    let total_cost = monthly_payment * months;
    Ok(LoanQuote {
        monthly_payment,
        total_interest: (total_cost - principal).max(0.0),
        total_cost,
        term_months,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quote(principal: f64, rate: f64, years: u32) -> Result<LoanQuote, EligibilityError> {
        loan_payment(&LoanInput {
            principal,
            interest_rate: rate,
            loan_term_years: years,
        })
    }

    #[test]
    fn thirty_year_mortgage_matches_amortization_tables() {
        let result = quote(150_000.0, 4.5, 30).expect("valid loan");
        assert!((result.monthly_payment - 760.03).abs() < 0.01);
        assert_eq!(result.term_months, 360);
        assert!((result.total_interest - 123_610.0).abs() < 5.0);
        assert!((result.total_cost - (result.total_interest + 150_000.0)).abs() < 1e-6);
    }

    #[test]
    fn zero_rate_divides_principal_evenly() {
        let result = quote(150_000.0, 0.0, 30).expect("valid loan");
        assert_eq!(result.monthly_payment, 150_000.0 / 360.0);
        assert_eq!(result.total_interest, 0.0);
        assert_eq!(result.total_cost, 150_000.0);
    }

    #[test]
    fn tiny_rates_converge_on_the_interest_free_payment() {
        let even = 150_000.0 / 360.0;
        for rate in [1e-14, 1e-9, 1e-300] {
            let result = quote(150_000.0, rate, 30).expect("valid loan");
            assert!(
                (result.monthly_payment - even).abs() < 1e-6,
                "rate {rate} gave {}",
                result.monthly_payment
            );
            assert!(result.total_interest >= 0.0);
        }
    }

    #[test]
    fn rejects_unusable_terms_and_amounts() {
        assert!(matches!(
            quote(10_000.0, 5.0, 0),
            Err(EligibilityError::Term { years: 0, .. })
        ));
        assert!(matches!(
            quote(f64::INFINITY, 5.0, 10),
            Err(EligibilityError::NotFinite { field: "principal" })
        ));
        assert!(matches!(
            quote(10_000.0, -1.0, 10),
            Err(EligibilityError::Negative { field: "interest_rate", .. })
        ));
    }
}
