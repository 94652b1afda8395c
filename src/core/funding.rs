use tracing::trace;

use super::portfolio::Portfolio;
use super::tax::{IncomeBreakdown, TaxBreakdown, TaxCalculator};
use super::types::{
    FundingDraw, FundingSource, InsufficientFundsBehavior, SolverConfig, TaxFundingSettings,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FundingIteration {
    pub iteration: u32,
    pub liability: f64,
    pub recomputed_tax: f64,
    pub paid: f64,
}

#[derive(Debug, Clone)]
pub struct FundingOutcome {
    /// Portfolio after the committed liquidations.
    pub portfolio: Portfolio,
    pub draws: Vec<FundingDraw>,
    /// Income including any gains realized by committed sales.
    pub income: IncomeBreakdown,
    pub tax: TaxBreakdown,
    /// Tax owed under the committed outcome.
    pub tax_due: f64,
    pub paid: f64,
    pub shortfall: f64,
    pub infeasible: bool,
    pub converged: bool,
    pub iterations: Vec<FundingIteration>,
}

impl FundingOutcome {
    pub fn residual(&self) -> f64 {
        self.iterations
            .last()
            .map_or(0.0, |it| (it.recomputed_tax - it.liability).abs())
    }

    /// Part of the reported tax that the committed draws did not pay.
    pub fn unpaid_tax(&self) -> f64 {
        (self.tax.total_tax - self.paid).max(0.0)
    }
}

#[derive(Debug, Clone, Default)]
struct Allocation {
    draws: Vec<FundingDraw>,
    realized: IncomeBreakdown,
    paid: f64,
}

fn permitted(source: FundingSource, settings: &TaxFundingSettings) -> bool {
    !source.is_retirement() || settings.allow_retirement_withdrawals
}

fn available(portfolio: &Portfolio, settings: &TaxFundingSettings) -> f64 {
    settings
        .funding_order
        .iter()
        .filter(|s| permitted(**s, settings))
        .map(|s| portfolio.source_capacity(*s))
        .sum()
}

/// Walks the funding order, draining each permitted source before moving on.
fn allocate(portfolio: &mut Portfolio, liability: f64, settings: &TaxFundingSettings) -> Allocation {
    let mut allocation = Allocation::default();
    for &source in &settings.funding_order {
        if !permitted(source, settings) {
            continue;
        }
        let mut drawn = 0.0;
        for id in portfolio.members(source) {
            let need = liability - allocation.paid;
            if need <= 0.0 {
                break;
            }
            let w = portfolio.withdraw(id, need);
            allocation.paid += w.proceeds;
            allocation.realized += w.income;
            drawn += w.proceeds;
        }
        if drawn > 0.0 {
            allocation.draws.push(FundingDraw {
                source,
                amount: drawn,
            });
        }
        if liability - allocation.paid <= 0.0 {
            break;
        }
    }
    allocation
}

/// Finds the liquidation plan that pays the year's tax when selling assets
/// itself realizes taxable income. Iterates allocate -> recompute until the
/// liability moves by less than the tolerance or the iteration cap is hit.
pub fn fund_taxes(
    portfolio: &Portfolio,
    base_income: &IncomeBreakdown,
    calculator: &TaxCalculator<'_>,
    settings: &TaxFundingSettings,
    solver: SolverConfig,
) -> FundingOutcome {
    let base_tax = calculator.compute(base_income);
    let max_iterations = solver.max_iterations.max(1);

    let mut liability = base_tax.total_tax;
    let mut iterations = Vec::with_capacity(max_iterations as usize);
    let mut converged = false;
    let mut requested;
    let mut trial;
    let mut allocation;
    let mut tax;
    loop {
        requested = liability;
        trial = portfolio.clone();
        allocation = allocate(&mut trial, requested, settings);
        let mut income = *base_income;
        income += allocation.realized;
        tax = calculator.compute(&income);

        let it = FundingIteration {
            iteration: iterations.len() as u32 + 1,
            liability,
            recomputed_tax: tax.total_tax,
            paid: allocation.paid,
        };
        trace!(
            iteration = it.iteration,
            liability = it.liability,
            recomputed = it.recomputed_tax,
            paid = it.paid,
            "funding iteration"
        );
        iterations.push(it);

        let delta = (tax.total_tax - liability).abs();
        liability = tax.total_tax;
        if delta < solver.tolerance {
            converged = true;
            break;
        }
        if iterations.len() as u32 >= max_iterations {
            break;
        }
    }

    let tax_due = tax.total_tax;
    let exhausted = allocation.paid + 1e-9 < requested;
    if !exhausted {
        let mut income = *base_income;
        income += allocation.realized;
        return FundingOutcome {
            portfolio: trial,
            draws: allocation.draws,
            income,
            tax,
            tax_due,
            paid: allocation.paid,
            shortfall: 0.0,
            infeasible: false,
            converged,
            iterations,
        };
    }

    // Permitted sources are exhausted.
    match settings.insufficient_funds_behavior {
        InsufficientFundsBehavior::FailWithShortfall => FundingOutcome {
            portfolio: portfolio.clone(),
            draws: Vec::new(),
            income: *base_income,
            tax: base_tax,
            tax_due: base_tax.total_tax,
            paid: 0.0,
            shortfall: (base_tax.total_tax - available(portfolio, settings)).max(0.0),
            infeasible: true,
            converged,
            iterations,
        },
        InsufficientFundsBehavior::LiquidateAllAvailable => {
            let mut income = *base_income;
            income += allocation.realized;
            FundingOutcome {
                portfolio: trial,
                draws: allocation.draws,
                income,
                tax,
                tax_due,
                paid: allocation.paid,
                shortfall: (tax_due - allocation.paid).max(0.0),
                infeasible: false,
                converged,
                iterations,
            }
        }
    }
}
