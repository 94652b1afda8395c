use std::collections::BTreeMap;

use serde::Serialize;

use super::portfolio::Portfolio;
use super::rsu::VestOutcome;
use super::tax::{IncomeBreakdown, TaxBreakdown};
use super::types::{AssetId, FundingYear};

/// RSU state for one grant over one year.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RsuYear {
    pub asset_id: AssetId,
    pub vest: VestOutcome,
    pub vested_holding_shares_end: f64,
    pub vested_holding_value_end: f64,
    pub estimated_net_shares: f64,
}

/// What the driver knows at the end of a year.
#[derive(Debug, Clone, Copy)]
pub struct YearRecord<'a> {
    pub year: i32,
    pub age: u32,
    pub income: &'a IncomeBreakdown,
    pub rsu_ordinary_income: f64,
    pub rsu: &'a [RsuYear],
    pub tax: &'a TaxBreakdown,
    pub funding: &'a FundingYear,
    pub portfolio: &'a Portfolio,
}

/// Checkpoint hooks called by the simulation driver.
pub trait YearRecorder {
    fn start_of_year(&mut self, _year: i32, _age: u32, _portfolio: &Portfolio) {}
    fn end_of_year(&mut self, _record: &YearRecord<'_>) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRecorder;

impl YearRecorder for NoopRecorder {}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RsuTrace {
    pub unvested_shares_start: f64,
    pub unvested_value_start: f64,
    pub shares_vested_this_year: f64,
    pub fmv_at_vest: f64,
    pub vested_value_this_year: f64,
    pub unvested_shares_end: f64,
    pub unvested_value_end: f64,
    pub vested_holding_shares_end: f64,
    pub vested_holding_value_end: f64,
    pub estimated_net_shares: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomeTrace {
    #[serde(flatten)]
    pub breakdown: IncomeBreakdown,
    pub rsu_ordinary_income: f64,
    pub gross_income_total: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetTotals {
    pub total_assets_start: f64,
    pub total_assets_end: f64,
    pub cash_start: f64,
    pub cash_end: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FundingTrace {
    pub iterations: u32,
    pub converged: bool,
    pub shortfall: f64,
    pub infeasible: bool,
    pub unpaid_tax: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugTraceEntry {
    pub year: i32,
    pub age: u32,
    pub rsu: BTreeMap<AssetId, RsuTrace>,
    pub income: IncomeTrace,
    pub asset_totals: AssetTotals,
    pub tax: TaxBreakdown,
    pub funding: FundingTrace,
}

/// Collects one [`DebugTraceEntry`] per simulated year.
#[derive(Debug, Default, Clone)]
pub struct TraceRecorder {
    entries: Vec<DebugTraceEntry>,
    opening: AssetTotals,
}

impl TraceRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[DebugTraceEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<DebugTraceEntry> {
        self.entries
    }
}

impl YearRecorder for TraceRecorder {
    fn start_of_year(&mut self, _year: i32, _age: u32, portfolio: &Portfolio) {
        self.opening = AssetTotals {
            total_assets_start: portfolio.total_value(),
            cash_start: portfolio.cash_balance(),
            ..AssetTotals::default()
        };
    }

    fn end_of_year(&mut self, record: &YearRecord<'_>) {
        let rsu = record
            .rsu
            .iter()
            .map(|r| {
                (
                    r.asset_id,
                    RsuTrace {
                        unvested_shares_start: r.vest.unvested_shares_start,
                        unvested_value_start: r.vest.unvested_value_start,
                        shares_vested_this_year: r.vest.shares_vested,
                        fmv_at_vest: r.vest.fmv_at_vest,
                        vested_value_this_year: r.vest.vested_value,
                        unvested_shares_end: r.vest.unvested_shares_end,
                        unvested_value_end: r.vest.unvested_value_end,
                        vested_holding_shares_end: r.vested_holding_shares_end,
                        vested_holding_value_end: r.vested_holding_value_end,
                        estimated_net_shares: r.estimated_net_shares,
                    },
                )
            })
            .collect();

        self.entries.push(DebugTraceEntry {
            year: record.year,
            age: record.age,
            rsu,
            income: IncomeTrace {
                breakdown: *record.income,
                rsu_ordinary_income: record.rsu_ordinary_income,
                gross_income_total: record.income.gross(),
            },
            asset_totals: AssetTotals {
                total_assets_end: record.portfolio.total_value(),
                cash_end: record.portfolio.cash_balance(),
                ..self.opening
            },
            tax: *record.tax,
            funding: FundingTrace {
                iterations: record.funding.iterations,
                converged: record.funding.converged,
                shortfall: record.funding.shortfall,
                infeasible: record.funding.infeasible,
                unpaid_tax: record.funding.unpaid_tax,
            },
        });
    }
}
