use std::ops::AddAssign;

use serde::Serialize;

use super::tables::YearTables;
use super::types::{FilingStatus, TaxBracket, TaxTable};

/// Income for one year, split by how it is taxed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomeBreakdown {
    pub ordinary: f64,
    pub short_term_gains: f64,
    pub long_term_gains: f64,
    pub qualified_dividends: f64,
    pub depreciation_recapture: f64,
    pub social_security: f64,
    pub tax_exempt: f64,
}

impl IncomeBreakdown {
    pub fn capital_gains(&self) -> f64 {
        self.short_term_gains + self.long_term_gains
    }

    pub fn gross(&self) -> f64 {
        self.ordinary
            + self.short_term_gains
            + self.long_term_gains
            + self.qualified_dividends
            + self.depreciation_recapture
            + self.social_security
            + self.tax_exempt
    }
}

impl AddAssign for IncomeBreakdown {
    fn add_assign(&mut self, rhs: Self) {
        self.ordinary += rhs.ordinary;
        self.short_term_gains += rhs.short_term_gains;
        self.long_term_gains += rhs.long_term_gains;
        self.qualified_dividends += rhs.qualified_dividends;
        self.depreciation_recapture += rhs.depreciation_recapture;
        self.social_security += rhs.social_security;
        self.tax_exempt += rhs.tax_exempt;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxBreakdown {
    pub federal_ordinary_tax: f64,
    pub federal_capital_gains_tax: f64,
    pub federal_tax: f64,
    pub state_tax: f64,
    pub total_tax: f64,
    pub effective_rate: f64,
    pub taxable_social_security: f64,
}

/// Progressive tax on `taxable` over ascending brackets.
pub fn apply_brackets(taxable: f64, brackets: &[TaxBracket]) -> f64 {
    let income = taxable.max(0.0);
    let mut tax = 0.0;
    let mut previous_up_to = 0.0;
    for bracket in brackets {
        if income <= previous_up_to {
            break;
        }
        let top = income.min(bracket.up_to);
        tax += (top - previous_up_to) * bracket.rate;
        previous_up_to = bracket.up_to;
    }
    tax
}

fn tax_after_deduction(income: f64, table: &TaxTable) -> f64 {
    apply_brackets(income - table.standard_deduction, &table.brackets)
}

fn social_security_thresholds(status: FilingStatus) -> (f64, f64) {
    match status {
        FilingStatus::MarriedFilingJointly => (32_000.0, 44_000.0),
        FilingStatus::Single | FilingStatus::HeadOfHousehold => (25_000.0, 34_000.0),
        FilingStatus::MarriedFilingSeparately => (0.0, 0.0),
    }
}

/// Taxable portion of Social Security under the provisional-income rule (50% / 85% tiers).
pub fn taxable_social_security(benefits: f64, other_income: f64, status: FilingStatus) -> f64 {
    if benefits <= 0.0 {
        return 0.0;
    }
    let (base, upper) = social_security_thresholds(status);
    let provisional = other_income.max(0.0) + 0.5 * benefits;
    if provisional <= base {
        return 0.0;
    }
    if provisional <= upper {
        return (0.5 * (provisional - base)).min(0.5 * benefits);
    }
    let lower_tier = (0.5 * (upper - base)).min(0.5 * benefits);
    (0.85 * (provisional - upper) + lower_tier).min(0.85 * benefits)
}

pub fn primary_residence_exclusion(status: FilingStatus) -> f64 {
    match status {
        FilingStatus::MarriedFilingJointly => 500_000.0,
        _ => 250_000.0,
    }
}

/// Gain on a depreciated property split into ordinary-rate recapture and capital gain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SaleGain {
    pub recapture: f64,
    pub capital_gain: f64,
}

pub fn split_recapture(gain: f64, accumulated_depreciation: f64) -> SaleGain {
    let recapture = gain.min(accumulated_depreciation).max(0.0);
    SaleGain {
        recapture,
        capital_gain: gain - recapture,
    }
}

/// Year-scoped calculator over already-indexed tables. Stateless, so the
/// funding waterfall may call it as often as it needs.
#[derive(Debug, Clone, Copy)]
pub struct TaxCalculator<'a> {
    tables: &'a YearTables,
    filing_status: FilingStatus,
}

impl<'a> TaxCalculator<'a> {
    pub fn new(tables: &'a YearTables, filing_status: FilingStatus) -> Self {
        Self {
            tables,
            filing_status,
        }
    }

    pub fn compute(&self, income: &IncomeBreakdown) -> TaxBreakdown {
        let long_term = (income.long_term_gains + income.qualified_dividends).max(0.0);
        let short_term = income.short_term_gains.max(0.0);
        let other_income =
            income.ordinary + short_term + long_term + income.depreciation_recapture;
        let taxable_ss =
            taxable_social_security(income.social_security, other_income, self.filing_status);

        let ordinary_base =
            income.ordinary + short_term + income.depreciation_recapture + taxable_ss;
        let federal = &self.tables.federal;
        let federal_ordinary_tax = tax_after_deduction(ordinary_base, federal);
        let federal_capital_gains_tax = match &self.tables.federal_gains {
            Some(gains_table) => tax_after_deduction(long_term, gains_table),
            None => {
                tax_after_deduction(ordinary_base + long_term, federal) - federal_ordinary_tax
            }
        };
        let federal_tax = federal_ordinary_tax + federal_capital_gains_tax;

        let state_tax = self
            .tables
            .state
            .as_ref()
            .map(|state| {
                let base = income.ordinary + short_term + long_term + income.depreciation_recapture;
                tax_after_deduction(base, state)
            })
            .unwrap_or(0.0);

        let total_tax = federal_tax + state_tax;
        let gross = income.gross();
        let effective_rate = if gross > 0.0 { total_tax / gross } else { 0.0 };

        TaxBreakdown {
            federal_ordinary_tax,
            federal_capital_gains_tax,
            federal_tax,
            state_tax,
            total_tax,
            effective_rate,
            taxable_social_security: taxable_ss,
        }
    }
}
