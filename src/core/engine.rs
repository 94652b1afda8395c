use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info, warn};

use super::assets::{advance_property, grow_equity, grow_stock};
use super::error::SimulationError;
use super::funding::fund_taxes;
use super::income::{AccruedIncome, accrue_income};
use super::portfolio::Portfolio;
use super::rsu;
use super::tables::{YearTables, resolve_all_years};
use super::tax::{IncomeBreakdown, TaxBreakdown, TaxCalculator};
use super::trace::{NoopRecorder, RsuYear, TraceRecorder, YearRecord, YearRecorder};
use super::types::{
    AccountType, AssetId, AssetKind, FundingYear, SimulationInput, SimulationResult, YearIssue,
};
use super::validate::validate_input;

/// Ordered checkpoints of one simulated year.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum YearPhase {
    StartOfYear,
    AccrueIncome,
    VestRsus,
    GrowAssets,
    ComputeTaxAndFund,
    ApplyContributionOrSpending,
    EndOfYear,
}

impl YearPhase {
    pub fn next(self) -> Option<YearPhase> {
        match self {
            YearPhase::StartOfYear => Some(YearPhase::AccrueIncome),
            YearPhase::AccrueIncome => Some(YearPhase::VestRsus),
            YearPhase::VestRsus => Some(YearPhase::GrowAssets),
            YearPhase::GrowAssets => Some(YearPhase::ComputeTaxAndFund),
            YearPhase::ComputeTaxAndFund => Some(YearPhase::ApplyContributionOrSpending),
            YearPhase::ApplyContributionOrSpending => Some(YearPhase::EndOfYear),
            YearPhase::EndOfYear => None,
        }
    }
}

/// Cooperative cancellation, checked between simulated years.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
struct YearState {
    offset: u32,
    year: i32,
    age: u32,
    price_index: f64,
    rsu_prices: BTreeMap<AssetId, f64>,
    accrued: AccruedIncome,
    income: IncomeBreakdown,
    rsu: Vec<RsuYear>,
    rsu_income: f64,
    cash_income: f64,
    household_costs: f64,
    tax: TaxBreakdown,
    funding: Option<FundingYear>,
    spending_required: f64,
    uncovered_spending: f64,
}

struct Driver<'a> {
    input: &'a SimulationInput,
    tables: Vec<YearTables>,
    portfolio: Portfolio,
    result: SimulationResult,
}

impl<'a> Driver<'a> {
    fn new(input: &'a SimulationInput, tables: Vec<YearTables>) -> Self {
        let portfolio = Portfolio::new(input.assets.clone(), input.scenario.base_year);
        let mut result = SimulationResult::default();
        for asset in portfolio.assets() {
            result.asset_values.insert(asset.id, Vec::new());
            result.debt_values.insert(asset.id, Vec::new());
        }
        for source in &input.income_sources {
            result.income.by_source.insert(source.id, Vec::new());
        }
        Self {
            input,
            tables,
            portfolio,
            result,
        }
    }

    fn run_year(&mut self, offset: u32, recorder: &mut dyn YearRecorder) {
        let scenario = &self.input.scenario;
        let mut state = YearState {
            offset,
            year: scenario.base_year + offset as i32,
            age: scenario.current_age + offset,
            price_index: (1.0 + scenario.inflation_rate).powi(offset as i32),
            ..YearState::default()
        };
        let mut phase = Some(YearPhase::StartOfYear);
        while let Some(current) = phase {
            self.enter(current, &mut state, recorder);
            phase = current.next();
        }
    }

    fn enter(&mut self, phase: YearPhase, state: &mut YearState, recorder: &mut dyn YearRecorder) {
        match phase {
            YearPhase::StartOfYear => self.start_of_year(state, recorder),
            YearPhase::AccrueIncome => self.accrue_income(state),
            YearPhase::VestRsus => self.vest_rsus(state),
            YearPhase::GrowAssets => self.grow_assets(state),
            YearPhase::ComputeTaxAndFund => self.compute_tax_and_fund(state),
            YearPhase::ApplyContributionOrSpending => self.apply_contribution_or_spending(state),
            YearPhase::EndOfYear => self.end_of_year(state, recorder),
        }
    }

    fn start_of_year(&mut self, state: &mut YearState, recorder: &mut dyn YearRecorder) {
        let base_year = self.input.scenario.base_year;
        state.rsu_prices = self
            .portfolio
            .assets()
            .iter()
            .filter_map(|asset| match &asset.kind {
                AssetKind::RsuGrant(grant) => {
                    let security = self
                        .input
                        .securities
                        .iter()
                        .find(|s| s.symbol == grant.security_ref);
                    Some((
                        asset.id,
                        rsu::projected_price(grant, security, base_year, state.year),
                    ))
                }
                _ => None,
            })
            .collect();
        self.portfolio.set_year(state.year, state.rsu_prices.clone());
        recorder.start_of_year(state.year, state.age, &self.portfolio);
    }

    fn accrue_income(&mut self, state: &mut YearState) {
        state.accrued = accrue_income(
            &mut self.portfolio,
            &self.input.income_sources,
            state.age,
            self.input.scenario.filing_status,
        );
        state.income = state.accrued.breakdown;
        state.cash_income = state.accrued.cash_received;
    }

    fn vest_rsus(&mut self, state: &mut YearState) {
        for asset in self.portfolio.assets_mut() {
            let AssetKind::RsuGrant(grant) = &mut asset.kind else {
                continue;
            };
            let price = state.rsu_prices.get(&asset.id).copied().unwrap_or(0.0);
            let vest = rsu::vest_year(grant, state.year, price);
            state.income.ordinary += vest.vested_value;
            state.rsu_income += vest.vested_value;
            state.rsu.push(RsuYear {
                asset_id: asset.id,
                vest,
                estimated_net_shares: rsu::estimated_net_shares(grant, vest.shares_vested),
                ..RsuYear::default()
            });
        }
    }

    fn grow_assets(&mut self, state: &mut YearState) {
        let default_return = self.input.scenario.bond_return_rate;
        let mut dividends = 0.0;
        let mut property_cash = 0.0;
        for asset in self.portfolio.assets_mut() {
            match &mut asset.kind {
                AssetKind::GeneralEquity(account) => grow_equity(account, default_return),
                AssetKind::SpecificStock(stock) => dividends += grow_stock(stock),
                AssetKind::RealEstate(property) => {
                    let outcome = advance_property(property, state.year, state.price_index);
                    state.income.ordinary += outcome.taxable_rental_income;
                    if outcome.net_cash_flow >= 0.0 {
                        property_cash += outcome.net_cash_flow;
                    } else {
                        state.household_costs -= outcome.net_cash_flow;
                    }
                }
                AssetKind::Cash(_) | AssetKind::RsuGrant(_) => {}
            }
        }
        state.income.qualified_dividends += dividends;
        state.cash_income += dividends + property_cash;
        self.portfolio.deposit_cash(dividends + property_cash);
    }

    fn compute_tax_and_fund(&mut self, state: &mut YearState) {
        let scenario = &self.input.scenario;
        let calculator = TaxCalculator::new(&self.tables[state.offset as usize], scenario.filing_status);
        let outcome = fund_taxes(
            &self.portfolio,
            &state.income,
            &calculator,
            &self.input.settings,
            self.input.solver,
        );

        if !outcome.converged {
            let residual = outcome.residual();
            warn!(
                year = state.year,
                iterations = outcome.iterations.len(),
                residual,
                "tax funding did not converge"
            );
            self.result.issues.push(YearIssue::ConvergenceWarning {
                year: state.year,
                iterations: outcome.iterations.len() as u32,
                residual,
            });
        }
        if outcome.shortfall > 0.0 {
            warn!(
                year = state.year,
                shortfall = outcome.shortfall,
                infeasible = outcome.infeasible,
                "insufficient funds to pay tax"
            );
            self.result.issues.push(YearIssue::FundingShortfall {
                year: state.year,
                shortfall: outcome.shortfall,
                infeasible: outcome.infeasible,
            });
        }

        state.funding = Some(FundingYear {
            year: state.year,
            tax_due: outcome.tax_due,
            converged: outcome.converged,
            iterations: outcome.iterations.len() as u32,
            shortfall: outcome.shortfall,
            infeasible: outcome.infeasible,
            unpaid_tax: outcome.unpaid_tax(),
            draws: outcome.draws,
        });
        state.income = outcome.income;
        state.tax = outcome.tax;
        self.portfolio = outcome.portfolio;
    }

    fn apply_contribution_or_spending(&mut self, state: &mut YearState) {
        let scenario = &self.input.scenario;
        let mut required = state.household_costs;
        if state.age < scenario.retirement_age {
            self.portfolio
                .deposit_cash(scenario.annual_contribution_pre_retirement * state.price_index);
            for asset in self.portfolio.assets_mut() {
                if let AssetKind::GeneralEquity(account) = &mut asset.kind {
                    let amount = account.annual_contribution * state.price_index;
                    account.balance += amount;
                    if account.account_type == AccountType::Taxable {
                        account.cost_basis += amount;
                    }
                }
            }
        } else {
            required += scenario.annual_spending_in_retirement * state.price_index;
        }
        let paid = self.portfolio.withdraw_cash(required);
        state.spending_required = required;
        state.uncovered_spending = (required - paid).max(0.0);
    }

    fn end_of_year(&mut self, state: &mut YearState, recorder: &mut dyn YearRecorder) {
        for entry in &mut state.rsu {
            if let Some(AssetKind::RsuGrant(grant)) =
                self.portfolio.get(entry.asset_id).map(|a| &a.kind)
            {
                entry.vested_holding_shares_end = rsu::vested_shares(grant);
                entry.vested_holding_value_end =
                    entry.vested_holding_shares_end * entry.vest.fmv_at_vest;
            }
        }

        let result = &mut self.result;
        result.ages.push(state.age);
        result.years.push(state.year);
        let mut total_debt = 0.0;
        for asset in self.portfolio.assets() {
            let value = self.portfolio.value_of(asset);
            let debt = Portfolio::debt_of(asset);
            total_debt += debt;
            result.asset_values.entry(asset.id).or_default().push(value);
            result.debt_values.entry(asset.id).or_default().push(debt);
        }
        let total_assets = self.portfolio.total_value();
        result.total_assets.push(total_assets);
        result.total_debt.push(total_debt);

        let income = &state.income;
        let series = &mut result.income;
        series.gross.push(income.gross());
        series.ordinary.push(income.ordinary + income.depreciation_recapture);
        series.capital_gains.push(income.capital_gains());
        series.qualified_dividends.push(income.qualified_dividends);
        series.depreciation_recapture.push(income.depreciation_recapture);
        series.social_security.push(income.social_security);
        series.tax_exempt.push(income.tax_exempt);
        series.rsu_vesting.push(state.rsu_income);
        for (id, amount) in &state.accrued.by_source {
            series.by_source.entry(*id).or_default().push(*amount);
        }

        result.taxes.federal.push(state.tax.federal_tax);
        result.taxes.state.push(state.tax.state_tax);
        result.taxes.total.push(state.tax.total_tax);
        result.taxes.effective_rate.push(state.tax.effective_rate);

        result
            .net_cash_flow
            .push(state.cash_income - state.tax.total_tax - state.spending_required);
        result.uncovered_spending.push(state.uncovered_spending);

        let funding = state.funding.take().unwrap_or(FundingYear {
            year: state.year,
            tax_due: 0.0,
            converged: true,
            iterations: 0,
            shortfall: 0.0,
            infeasible: false,
            unpaid_tax: 0.0,
            draws: Vec::new(),
        });

        debug!(
            year = state.year,
            age = state.age,
            gross_income = income.gross(),
            total_tax = state.tax.total_tax,
            total_assets,
            "year complete"
        );

        recorder.end_of_year(&YearRecord {
            year: state.year,
            age: state.age,
            income: &state.income,
            rsu_ordinary_income: state.rsu_income,
            rsu: &state.rsu,
            tax: &state.tax,
            funding: &funding,
            portfolio: &self.portfolio,
        });
        self.result.funding.push(funding);
    }
}

/// Runs the projection with a caller-supplied recorder and optional cancellation.
/// Configuration errors and missing tax tables abort before the first year;
/// per-year anomalies are reported in `issues`.
pub fn run_simulation_with(
    input: &SimulationInput,
    recorder: &mut dyn YearRecorder,
    cancel: Option<&CancelFlag>,
) -> Result<SimulationResult, SimulationError> {
    validate_input(input)?;
    let tables = resolve_all_years(&input.tax_tables, &input.scenario, &input.settings)?;

    let scenario = &input.scenario;
    let years = scenario.end_age - scenario.current_age + 1;
    info!(
        base_year = scenario.base_year,
        current_age = scenario.current_age,
        end_age = scenario.end_age,
        assets = input.assets.len(),
        income_sources = input.income_sources.len(),
        "starting simulation"
    );

    let mut driver = Driver::new(input, tables);
    for offset in 0..years {
        if cancel.is_some_and(CancelFlag::is_cancelled) {
            info!(completed_years = offset, "simulation cancelled");
            return Err(SimulationError::Cancelled {
                completed_years: offset as usize,
            });
        }
        driver.run_year(offset, recorder);
    }

    info!(
        years,
        issues = driver.result.issues.len(),
        "simulation finished"
    );
    Ok(driver.result)
}

pub fn run_simulation(input: &SimulationInput) -> Result<SimulationResult, SimulationError> {
    run_simulation_with(input, &mut NoopRecorder, None)
}

/// Like [`run_simulation`], with the per-year debug trace attached.
pub fn run_simulation_traced(
    input: &SimulationInput,
    cancel: Option<&CancelFlag>,
) -> Result<SimulationResult, SimulationError> {
    let mut recorder = TraceRecorder::new();
    let mut result = run_simulation_with(input, &mut recorder, cancel)?;
    result.debug_trace = Some(recorder.into_entries());
    Ok(result)
}
