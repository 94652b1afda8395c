use tracing::debug;

use super::error::SimulationError;
use super::types::{FilingStatus, IndexingPolicy, Scenario, TaxBracket, TaxFundingSettings, TaxTable};

pub const FEDERAL: &str = "FED";
pub const FEDERAL_LTCG: &str = "FED_LTCG";
pub const CALIFORNIA: &str = "CA";

const DEFAULT_SCHEDULE_YEAR: i32 = 2024;

/// Annual threshold growth rate implied by the indexing policy.
pub fn index_rate(policy: IndexingPolicy, inflation_rate: f64, custom_rate: Option<f64>) -> f64 {
    match policy {
        IndexingPolicy::ConstantNominal => 0.0,
        IndexingPolicy::ScenarioInflation => inflation_rate,
        IndexingPolicy::CustomRate => custom_rate.unwrap_or(0.0),
    }
}

/// Scales finite thresholds and the standard deduction by `(1 + rate)^(target_year - year_base)`.
/// Rates and the unbounded top bracket are left alone.
pub fn index_table(base: &TaxTable, target_year: i32, rate: f64) -> TaxTable {
    let factor = (1.0 + rate).powi(target_year - base.year_base);
    TaxTable {
        jurisdiction: base.jurisdiction.clone(),
        filing_status: base.filing_status,
        year_base: target_year,
        standard_deduction: base.standard_deduction * factor,
        brackets: base
            .brackets
            .iter()
            .map(|b| TaxBracket {
                up_to: if b.up_to.is_finite() {
                    b.up_to * factor
                } else {
                    b.up_to
                },
                rate: b.rate,
            })
            .collect(),
        notes: base.notes.clone(),
    }
}

pub fn resolve_table(
    base: &TaxTable,
    target_year: i32,
    policy: IndexingPolicy,
    inflation_rate: f64,
    custom_rate: Option<f64>,
) -> TaxTable {
    index_table(
        base,
        target_year,
        index_rate(policy, inflation_rate, custom_rate),
    )
}

/// Picks the newest table with `year_base <= year`, falling back to the earliest one.
pub fn select_base<'a>(
    tables: &'a [TaxTable],
    jurisdiction: &str,
    filing_status: FilingStatus,
    year: i32,
) -> Option<&'a TaxTable> {
    let mut candidates = tables
        .iter()
        .filter(|t| t.jurisdiction == jurisdiction && t.filing_status == filing_status);
    let first = candidates.next()?;
    let (mut best_before, mut earliest) = (None::<&TaxTable>, first);
    for t in std::iter::once(first).chain(candidates) {
        if t.year_base < earliest.year_base {
            earliest = t;
        }
        if t.year_base <= year && best_before.is_none_or(|b| t.year_base > b.year_base) {
            best_before = Some(t);
        }
    }
    Some(best_before.unwrap_or(earliest))
}

/// Effective tables for one simulated year.
#[derive(Debug, Clone, PartialEq)]
pub struct YearTables {
    pub federal: TaxTable,
    pub federal_gains: Option<TaxTable>,
    pub state: Option<TaxTable>,
}

pub fn resolve_year_tables(
    tables: &[TaxTable],
    scenario: &Scenario,
    settings: &TaxFundingSettings,
    year: i32,
) -> Result<YearTables, SimulationError> {
    let status = scenario.filing_status;
    let resolve = |base: &TaxTable| {
        resolve_table(
            base,
            year,
            settings.tax_table_indexing_policy,
            scenario.inflation_rate,
            settings.custom_index_rate,
        )
    };
    let missing = |jurisdiction: &str| SimulationError::MissingTaxTable {
        year,
        jurisdiction: jurisdiction.to_string(),
        filing_status: status,
    };

    let federal = select_base(tables, FEDERAL, status, year)
        .map(resolve)
        .ok_or_else(|| missing(FEDERAL))?;
    let federal_gains = select_base(tables, FEDERAL_LTCG, status, year).map(resolve);
    let state = match scenario.state_jurisdiction.as_deref() {
        Some(key) if !key.is_empty() => Some(
            select_base(tables, key, status, year)
                .map(resolve)
                .ok_or_else(|| missing(key))?,
        ),
        _ => None,
    };

    Ok(YearTables {
        federal,
        federal_gains,
        state,
    })
}

/// Resolves every simulated year up front so the year loop does no lookups.
pub fn resolve_all_years(
    tables: &[TaxTable],
    scenario: &Scenario,
    settings: &TaxFundingSettings,
) -> Result<Vec<YearTables>, SimulationError> {
    let span = scenario.end_age.saturating_sub(scenario.current_age);
    (0..=span)
        .map(|offset| {
            let year = scenario.base_year + offset as i32;
            resolve_year_tables(tables, scenario, settings, year)
        })
        .collect()
}

fn brackets(rows: &[(f64, f64)]) -> Vec<TaxBracket> {
    rows.iter()
        .map(|&(up_to, rate)| TaxBracket { up_to, rate })
        .collect()
}

const INF: f64 = f64::INFINITY;
const CA_RATES: [f64; 9] = [0.01, 0.02, 0.04, 0.06, 0.08, 0.093, 0.103, 0.113, 0.123];

fn ca_brackets(thresholds: [f64; 8]) -> Vec<TaxBracket> {
    thresholds
        .iter()
        .copied()
        .chain(std::iter::once(INF))
        .zip(CA_RATES)
        .map(|(up_to, rate)| TaxBracket { up_to, rate })
        .collect()
}

/// Built-in 2024 schedules as `(jurisdiction, standard deduction, brackets)`.
pub fn default_schedules(status: FilingStatus) -> Vec<(&'static str, f64, Vec<TaxBracket>)> {
    let federal = match status {
        FilingStatus::MarriedFilingJointly => (
            29_200.0,
            brackets(&[
                (23_200.0, 0.10),
                (94_300.0, 0.12),
                (201_050.0, 0.22),
                (383_900.0, 0.24),
                (487_450.0, 0.32),
                (731_200.0, 0.35),
                (INF, 0.37),
            ]),
        ),
        FilingStatus::Single => (
            14_600.0,
            brackets(&[
                (11_600.0, 0.10),
                (47_150.0, 0.12),
                (100_525.0, 0.22),
                (191_950.0, 0.24),
                (243_725.0, 0.32),
                (609_350.0, 0.35),
                (INF, 0.37),
            ]),
        ),
        FilingStatus::MarriedFilingSeparately => (
            14_600.0,
            brackets(&[
                (11_600.0, 0.10),
                (47_150.0, 0.12),
                (100_525.0, 0.22),
                (191_950.0, 0.24),
                (243_725.0, 0.32),
                (365_600.0, 0.35),
                (INF, 0.37),
            ]),
        ),
        FilingStatus::HeadOfHousehold => (
            21_900.0,
            brackets(&[
                (16_550.0, 0.10),
                (63_100.0, 0.12),
                (100_500.0, 0.22),
                (191_950.0, 0.24),
                (243_700.0, 0.32),
                (609_350.0, 0.35),
                (INF, 0.37),
            ]),
        ),
    };

    let (zero_top, fifteen_top) = match status {
        FilingStatus::MarriedFilingJointly => (94_050.0, 583_750.0),
        FilingStatus::Single => (47_025.0, 518_900.0),
        FilingStatus::MarriedFilingSeparately => (47_025.0, 291_850.0),
        FilingStatus::HeadOfHousehold => (63_100.0, 551_350.0),
    };
    let gains = brackets(&[(zero_top, 0.0), (fifteen_top, 0.15), (INF, 0.20)]);

    let state = match status {
        FilingStatus::MarriedFilingJointly | FilingStatus::HeadOfHousehold => (
            10_726.0,
            ca_brackets([
                20_824.0,
                49_368.0,
                77_918.0,
                108_162.0,
                136_692.0,
                698_272.0,
                837_922.0,
                1_396_542.0,
            ]),
        ),
        FilingStatus::Single | FilingStatus::MarriedFilingSeparately => (
            5_363.0,
            ca_brackets([
                10_412.0, 24_684.0, 38_959.0, 54_081.0, 68_346.0, 349_136.0, 418_961.0, 698_271.0,
            ]),
        ),
    };

    vec![
        (FEDERAL, federal.0, federal.1),
        (FEDERAL_LTCG, 0.0, gains),
        (CALIFORNIA, state.0, state.1),
    ]
}

/// Adds the built-in tables for every filing status that has none yet.
/// Existing tables are never replaced, so repeated calls are no-ops. Returns the number added.
pub fn seed_default_tax_tables(tables: &mut Vec<TaxTable>, scenario: &Scenario) -> usize {
    let mut added = 0;
    for status in FilingStatus::ALL {
        for (jurisdiction, standard_deduction, brackets) in default_schedules(status) {
            let exists = tables
                .iter()
                .any(|t| t.jurisdiction == jurisdiction && t.filing_status == status);
            if exists {
                continue;
            }
            tables.push(TaxTable {
                jurisdiction: jurisdiction.to_string(),
                filing_status: status,
                year_base: scenario.base_year,
                standard_deduction,
                brackets,
                notes: Some(format!(
                    "Seeded from {DEFAULT_SCHEDULE_YEAR} {jurisdiction} schedule"
                )),
            });
            added += 1;
        }
    }
    debug!(added, "seeded default tax tables");
    added
}
