use std::collections::HashSet;

use super::error::ValidationError;
use super::types::{
    AssetKind, IncomeKind, IndexingPolicy, SimulationInput, TaxFundingSettings, TaxTable,
};

const TRANCHE_SUM_TOLERANCE: f64 = 1e-6;

fn non_negative(field: impl Into<String>, value: f64) -> Result<(), ValidationError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ValidationError::Negative {
            field: field.into(),
            value,
        })
    }
}

fn in_range(field: impl Into<String>, value: f64, min: f64, max: f64) -> Result<(), ValidationError> {
    if value.is_finite() && (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ValidationError::OutOfRange {
            field: field.into(),
            value,
            min,
            max,
        })
    }
}

fn growth_rate(field: impl Into<String>, value: f64) -> Result<(), ValidationError> {
    in_range(field, value, -0.99, 10.0)
}

pub fn validate_table(table: &TaxTable) -> Result<(), ValidationError> {
    let id = || {
        (
            table.jurisdiction.clone(),
            table.filing_status,
            table.year_base,
        )
    };
    if table.brackets.is_empty() {
        let (jurisdiction, filing_status, year_base) = id();
        return Err(ValidationError::EmptyBrackets {
            jurisdiction,
            filing_status,
            year_base,
        });
    }
    non_negative(
        format!("{} standard_deduction", table.jurisdiction),
        table.standard_deduction,
    )?;

    let last = table.brackets.len() - 1;
    let mut previous = 0.0;
    for (i, bracket) in table.brackets.iter().enumerate() {
        in_range(format!("{} bracket rate", table.jurisdiction), bracket.rate, 0.0, 1.0)?;
        if bracket.up_to.is_infinite() != (i == last) || bracket.up_to.is_nan() {
            let (jurisdiction, filing_status, year_base) = id();
            return Err(ValidationError::UnboundedBracket {
                jurisdiction,
                filing_status,
                year_base,
            });
        }
        if bracket.up_to <= previous {
            let (jurisdiction, filing_status, year_base) = id();
            return Err(ValidationError::BracketOrder {
                jurisdiction,
                filing_status,
                year_base,
            });
        }
        previous = bracket.up_to;
    }
    Ok(())
}

pub fn validate_settings(settings: &TaxFundingSettings) -> Result<(), ValidationError> {
    if settings.funding_order.len() > 4 {
        return Err(ValidationError::TooManyFundingSources(
            settings.funding_order.len(),
        ));
    }
    for (i, source) in settings.funding_order.iter().enumerate() {
        if settings.funding_order[..i].contains(source) {
            return Err(ValidationError::DuplicateFundingSource(format!(
                "{source:?}"
            )));
        }
    }
    match (settings.tax_table_indexing_policy, settings.custom_index_rate) {
        (IndexingPolicy::CustomRate, None) => Err(ValidationError::MissingCustomRate),
        (IndexingPolicy::CustomRate, Some(rate)) => growth_rate("custom_index_rate", rate),
        _ => Ok(()),
    }
}

/// Rejects inconsistent configuration before the first simulated year.
pub fn validate_input(input: &SimulationInput) -> Result<(), ValidationError> {
    let scenario = &input.scenario;
    if scenario.end_age < scenario.current_age {
        return Err(ValidationError::AgeRange {
            current_age: scenario.current_age,
            end_age: scenario.end_age,
        });
    }
    growth_rate("inflation_rate", scenario.inflation_rate)?;
    growth_rate("bond_return_rate", scenario.bond_return_rate)?;
    non_negative(
        "annual_contribution_pre_retirement",
        scenario.annual_contribution_pre_retirement,
    )?;
    non_negative(
        "annual_spending_in_retirement",
        scenario.annual_spending_in_retirement,
    )?;

    if !(input.solver.tolerance.is_finite() && input.solver.tolerance > 0.0)
        || input.solver.max_iterations == 0
    {
        return Err(ValidationError::SolverBounds);
    }
    validate_settings(&input.settings)?;

    let mut table_keys = HashSet::new();
    for table in &input.tax_tables {
        validate_table(table)?;
        if !table_keys.insert((table.jurisdiction.as_str(), table.filing_status, table.year_base)) {
            return Err(ValidationError::DuplicateTable {
                jurisdiction: table.jurisdiction.clone(),
                filing_status: table.filing_status,
                year_base: table.year_base,
            });
        }
    }

    let mut ids = HashSet::new();
    for asset in &input.assets {
        if !ids.insert(asset.id) {
            return Err(ValidationError::DuplicateAsset(asset.id));
        }
        let field = |name: &str| format!("asset {} {name}", asset.id);
        match &asset.kind {
            AssetKind::Cash(c) => non_negative(field("balance"), c.balance)?,
            AssetKind::GeneralEquity(e) => {
                non_negative(field("balance"), e.balance)?;
                non_negative(field("cost_basis"), e.cost_basis)?;
                non_negative(field("annual_contribution"), e.annual_contribution)?;
                in_range(field("fee_rate"), e.fee_rate, 0.0, 1.0)?;
                if let Some(rate) = e.return_rate {
                    growth_rate(field("return_rate"), rate)?;
                }
            }
            AssetKind::RealEstate(p) => {
                non_negative(field("value"), p.value)?;
                non_negative(field("mortgage_balance"), p.mortgage_balance)?;
                non_negative(field("interest_rate"), p.interest_rate)?;
                non_negative(field("purchase_price"), p.purchase_price)?;
                non_negative(field("land_value"), p.land_value)?;
                non_negative(field("accumulated_depreciation"), p.accumulated_depreciation)?;
                non_negative(field("annual_rent"), p.annual_rent)?;
                non_negative(field("annual_property_tax"), p.annual_property_tax)?;
                non_negative(field("annual_insurance"), p.annual_insurance)?;
                in_range(field("annual_maintenance_pct"), p.annual_maintenance_pct, 0.0, 1.0)?;
                growth_rate(field("appreciation_rate"), p.appreciation_rate)?;
            }
            AssetKind::SpecificStock(s) => {
                non_negative(field("shares"), s.shares)?;
                non_negative(field("price"), s.price)?;
                non_negative(field("cost_basis"), s.cost_basis)?;
                in_range(field("dividend_yield"), s.dividend_yield, 0.0, 1.0)?;
                growth_rate(field("appreciation_rate"), s.appreciation_rate)?;
            }
            AssetKind::RsuGrant(g) => {
                non_negative(field("shares_granted"), g.shares_granted)?;
                non_negative(field("fmv_at_grant"), g.fmv_at_grant)?;
                if let Some(rate) = g.estimated_share_withholding_rate {
                    in_range(field("estimated_share_withholding_rate"), rate, 0.0, 1.0)?;
                }
                let mut sum = 0.0;
                for t in &g.tranches {
                    in_range(field("percentage_of_grant"), t.percentage_of_grant, 0.0, 1.0)?;
                    sum += t.percentage_of_grant;
                }
                if (sum - 1.0).abs() > TRANCHE_SUM_TOLERANCE {
                    return Err(ValidationError::TrancheSum {
                        asset_id: asset.id,
                        sum,
                    });
                }
                let mut seen = HashSet::new();
                for lot in &g.vested_lots {
                    if lot.tranche_index >= g.tranches.len() {
                        return Err(ValidationError::UnknownTranche {
                            asset_id: asset.id,
                            tranche_index: lot.tranche_index,
                        });
                    }
                    if !seen.insert(lot.tranche_index) {
                        return Err(ValidationError::DuplicateLot {
                            asset_id: asset.id,
                            tranche_index: lot.tranche_index,
                        });
                    }
                    non_negative(field("shares_held"), lot.shares_held)?;
                }
                if !g.security_ref.is_empty()
                    && !input.securities.iter().any(|s| s.symbol == g.security_ref)
                {
                    return Err(ValidationError::UnknownSecurity {
                        asset_id: asset.id,
                        symbol: g.security_ref.clone(),
                    });
                }
            }
        }
    }

    for source in &input.income_sources {
        non_negative(format!("income source {} amount", source.id), source.amount)?;
        let kind = match source.kind {
            IncomeKind::Income => continue,
            IncomeKind::Drawdown => "drawdown",
            IncomeKind::HouseSale => "house_sale",
        };
        let asset_id = source
            .linked_asset
            .ok_or(ValidationError::MissingLinkedAsset {
                source_id: source.id,
                kind,
            })?;
        let asset = input
            .assets
            .iter()
            .find(|a| a.id == asset_id)
            .ok_or(ValidationError::UnknownLinkedAsset {
                source_id: source.id,
                asset_id,
            })?;
        let is_property = matches!(asset.kind, AssetKind::RealEstate(_));
        let compatible = match source.kind {
            IncomeKind::HouseSale => is_property,
            _ => !is_property,
        };
        if !compatible {
            return Err(ValidationError::IncompatibleLink {
                source_id: source.id,
                kind,
                asset_kind: asset.kind.label(),
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{
        Asset, AssetKind, CashAccount, FilingStatus, FundingSource, IncomeSource, RsuGrant,
        Scenario, SolverConfig, TaxBracket, TaxTreatment, VestingTranche,
    };
    use chrono::NaiveDate;

    fn input() -> SimulationInput {
        SimulationInput {
            scenario: Scenario {
                current_age: 40,
                base_year: 2025,
                retirement_age: 60,
                end_age: 90,
                inflation_rate: 0.025,
                bond_return_rate: 0.04,
                filing_status: FilingStatus::Single,
                annual_contribution_pre_retirement: 10_000.0,
                annual_spending_in_retirement: 50_000.0,
                state_jurisdiction: Some("CA".to_string()),
            },
            assets: vec![Asset {
                id: 1,
                name: "cash".to_string(),
                kind: AssetKind::Cash(CashAccount { balance: 1_000.0 }),
            }],
            income_sources: Vec::new(),
            settings: TaxFundingSettings::default(),
            tax_tables: Vec::new(),
            securities: Vec::new(),
            solver: SolverConfig::default(),
        }
    }

    fn table(brackets: Vec<TaxBracket>) -> TaxTable {
        TaxTable {
            jurisdiction: "FED".to_string(),
            filing_status: FilingStatus::Single,
            year_base: 2025,
            standard_deduction: 0.0,
            brackets,
            notes: None,
        }
    }

    fn bracket(up_to: f64, rate: f64) -> TaxBracket {
        TaxBracket { up_to, rate }
    }

    #[test]
    fn accepts_minimal_input() {
        assert_eq!(validate_input(&input()), Ok(()));
    }

    #[test]
    fn rejects_unordered_and_unbounded_brackets() {
        let unordered = table(vec![
            bracket(20_000.0, 0.1),
            bracket(10_000.0, 0.2),
            bracket(f64::INFINITY, 0.3),
        ]);
        assert!(matches!(
            validate_table(&unordered),
            Err(ValidationError::BracketOrder { .. })
        ));

        let capped = table(vec![bracket(10_000.0, 0.1), bracket(20_000.0, 0.2)]);
        assert!(matches!(
            validate_table(&capped),
            Err(ValidationError::UnboundedBracket { .. })
        ));

        let bad_rate = table(vec![bracket(f64::INFINITY, 1.5)]);
        assert!(matches!(
            validate_table(&bad_rate),
            Err(ValidationError::OutOfRange { .. })
        ));
    }

    #[test]
    fn rejects_tranches_not_summing_to_one() {
        let mut inp = input();
        let date = NaiveDate::from_ymd_opt(2026, 1, 1).expect("date");
        inp.assets.push(Asset {
            id: 2,
            name: "rsu".to_string(),
            kind: AssetKind::RsuGrant(RsuGrant {
                security_ref: String::new(),
                grant_date: date,
                grant_value: 0.0,
                fmv_at_grant: 10.0,
                shares_granted: 100.0,
                tranches: vec![
                    VestingTranche {
                        vesting_date: date,
                        percentage_of_grant: 0.5,
                    },
                    VestingTranche {
                        vesting_date: date,
                        percentage_of_grant: 0.4,
                    },
                ],
                vested_lots: Vec::new(),
                estimated_share_withholding_rate: None,
            }),
        });
        assert!(matches!(
            validate_input(&inp),
            Err(ValidationError::TrancheSum { asset_id: 2, .. })
        ));
    }

    #[test]
    fn rejects_duplicate_funding_sources_and_missing_custom_rate() {
        let mut inp = input();
        inp.settings.funding_order = vec![FundingSource::Cash, FundingSource::Cash];
        assert!(matches!(
            validate_input(&inp),
            Err(ValidationError::DuplicateFundingSource(_))
        ));

        let mut inp = input();
        inp.settings.tax_table_indexing_policy = IndexingPolicy::CustomRate;
        assert_eq!(validate_input(&inp), Err(ValidationError::MissingCustomRate));
    }

    #[test]
    fn rejects_bad_links() {
        let mut inp = input();
        inp.income_sources.push(IncomeSource {
            id: 9,
            name: "sale".to_string(),
            kind: IncomeKind::HouseSale,
            amount: 0.0,
            start_age: 60,
            end_age: 60,
            appreciation_rate: 0.0,
            tax_treatment: TaxTreatment::Ordinary,
            linked_asset: Some(1),
        });
        assert!(matches!(
            validate_input(&inp),
            Err(ValidationError::IncompatibleLink { source_id: 9, .. })
        ));

        inp.income_sources[0].linked_asset = Some(42);
        assert!(matches!(
            validate_input(&inp),
            Err(ValidationError::UnknownLinkedAsset { asset_id: 42, .. })
        ));
    }

    #[test]
    fn rejects_negative_balance_and_reversed_ages() {
        let mut inp = input();
        inp.assets[0].kind = AssetKind::Cash(CashAccount { balance: -1.0 });
        assert!(matches!(
            validate_input(&inp),
            Err(ValidationError::Negative { .. })
        ));

        let mut inp = input();
        inp.scenario.end_age = 30;
        assert!(matches!(
            validate_input(&inp),
            Err(ValidationError::AgeRange { .. })
        ));
    }
}
