use serde::Serialize;
use tracing::debug;

use super::portfolio::Portfolio;
use super::tax::{IncomeBreakdown, primary_residence_exclusion, split_recapture};
use super::types::{
    AssetKind, FilingStatus, IncomeKind, IncomeSource, IncomeSourceId, PropertyType,
    ResidenceWindow, TaxTreatment,
};

pub fn is_active(source: &IncomeSource, age: u32) -> bool {
    source.start_age <= age && age <= source.end_age
}

/// Scheduled amount for `age`, grown from `start_age`.
pub fn scheduled_amount(source: &IncomeSource, age: u32) -> f64 {
    if !is_active(source, age) {
        return 0.0;
    }
    let years = (age - source.start_age) as i32;
    source.amount * (1.0 + source.appreciation_rate).powi(years)
}

fn classify(treatment: TaxTreatment, amount: f64) -> IncomeBreakdown {
    let mut income = IncomeBreakdown::default();
    match treatment {
        TaxTreatment::Ordinary => income.ordinary = amount,
        TaxTreatment::SocialSecurity => income.social_security = amount,
        TaxTreatment::TaxExempt | TaxTreatment::Disability => income.tax_exempt = amount,
    }
    income
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HouseSale {
    pub sale_price: f64,
    pub adjusted_basis: f64,
    pub depreciation_recapture: f64,
    pub excluded_gain: f64,
    pub taxable_gain: f64,
    pub mortgage_payoff: f64,
    pub net_proceeds: f64,
    /// Debt left on the sold property when cash could not cover an underwater sale.
    pub remaining_mortgage: f64,
}

pub fn passes_residence_test(window: Option<&ResidenceWindow>, sale_year: i32) -> bool {
    window.is_some_and(|w| sale_year - w.owned_since_year >= 2 && w.years_lived_in_last_five >= 2)
}

/// Liquidates the linked property in full. The mortgage is repaid from the
/// sale; whatever remains lands in cash. An underwater shortfall is drawn from
/// cash and any part cash cannot cover stays on the property as debt.
pub fn sell_house(
    portfolio: &mut Portfolio,
    source: &IncomeSource,
    filing_status: FilingStatus,
) -> Option<(HouseSale, IncomeBreakdown)> {
    let year = portfolio.year();
    let property = portfolio.property_mut(source.linked_asset?)?;
    if property.value <= 0.0 {
        return None;
    }

    let sale_price = property.value;
    let adjusted_basis = property.purchase_price - property.accumulated_depreciation;
    let split = split_recapture(sale_price - adjusted_basis, property.accumulated_depreciation);
    let mut capital_gain = split.capital_gain.max(0.0);
    let mut excluded_gain = 0.0;
    if property.property_type == PropertyType::PrimaryResidence
        && passes_residence_test(property.primary_residence_window.as_ref(), year)
    {
        excluded_gain = capital_gain.min(primary_residence_exclusion(filing_status));
        capital_gain -= excluded_gain;
    }
    let mortgage = property.mortgage_balance.max(0.0);
    let net_proceeds = sale_price - mortgage;

    property.value = 0.0;
    property.purchase_price = 0.0;
    property.land_value = 0.0;
    property.annual_rent = 0.0;
    property.annual_property_tax = 0.0;
    property.annual_insurance = 0.0;
    property.accumulated_depreciation = 0.0;

    let remaining_mortgage = if net_proceeds >= 0.0 {
        portfolio.deposit_cash(net_proceeds);
        0.0
    } else {
        let paid = portfolio.withdraw_cash(-net_proceeds);
        (-net_proceeds - paid).max(0.0)
    };
    if let Some(property) = source.linked_asset.and_then(|id| portfolio.property_mut(id)) {
        property.mortgage_balance = remaining_mortgage;
    }

    let income = IncomeBreakdown {
        depreciation_recapture: split.recapture,
        long_term_gains: capital_gain,
        ..IncomeBreakdown::default()
    };
    let sale = HouseSale {
        sale_price,
        adjusted_basis,
        depreciation_recapture: split.recapture,
        excluded_gain,
        taxable_gain: capital_gain,
        mortgage_payoff: mortgage - remaining_mortgage,
        net_proceeds,
        remaining_mortgage,
    };
    Some((sale, income))
}

/// Income accrued for one year before taxes are settled.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccruedIncome {
    pub breakdown: IncomeBreakdown,
    /// Cash-basis amount per income source.
    pub by_source: Vec<(IncomeSourceId, f64)>,
    pub cash_received: f64,
    pub house_sales: Vec<HouseSale>,
}

/// Runs every income source for `age`: recurring income is paid to cash,
/// drawdowns sell from their linked asset, house sales liquidate the property.
pub fn accrue_income(
    portfolio: &mut Portfolio,
    sources: &[IncomeSource],
    age: u32,
    filing_status: FilingStatus,
) -> AccruedIncome {
    let mut accrued = AccruedIncome::default();
    for source in sources {
        let received = match source.kind {
            IncomeKind::Income => {
                let amount = scheduled_amount(source, age);
                if amount > 0.0 {
                    accrued.breakdown += classify(source.tax_treatment, amount);
                    portfolio.deposit_cash(amount);
                }
                amount
            }
            IncomeKind::Drawdown => {
                let amount = scheduled_amount(source, age);
                match source.linked_asset {
                    Some(id) if amount > 0.0 => {
                        let from_cash = portfolio
                            .get(id)
                            .is_some_and(|a| matches!(a.kind, AssetKind::Cash(_)));
                        let w = portfolio.withdraw(id, amount);
                        accrued.breakdown += w.income;
                        if from_cash {
                            accrued.breakdown.tax_exempt += w.proceeds;
                        }
                        portfolio.deposit_cash(w.proceeds);
                        w.proceeds
                    }
                    _ => 0.0,
                }
            }
            IncomeKind::HouseSale if age == source.start_age => {
                match sell_house(portfolio, source, filing_status) {
                    Some((sale, income)) => {
                        debug!(
                            source = source.id,
                            sale_price = sale.sale_price,
                            taxable_gain = sale.taxable_gain,
                            excluded = sale.excluded_gain,
                            "house sold"
                        );
                        accrued.breakdown += income;
                        accrued.house_sales.push(sale);
                        sale.net_proceeds
                    }
                    None => 0.0,
                }
            }
            IncomeKind::HouseSale => 0.0,
        };
        accrued.cash_received += received;
        accrued.by_source.push((source.id, received));
    }
    accrued
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::assets::advance_property;
    use crate::core::types::{
        AccountType, Asset, AssetId, CashAccount, DepreciationMethod, EquityAccount, Property,
    };

    const EPS: f64 = 1e-6;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn source(kind: IncomeKind, amount: f64, linked: Option<AssetId>) -> IncomeSource {
        IncomeSource {
            id: 1,
            name: "src".to_string(),
            kind,
            amount,
            start_age: 60,
            end_age: 70,
            appreciation_rate: 0.0,
            tax_treatment: TaxTreatment::Ordinary,
            linked_asset: linked,
        }
    }

    fn house(property_type: PropertyType) -> Asset {
        Asset {
            id: 7,
            name: "house".to_string(),
            kind: AssetKind::RealEstate(Property {
                property_type,
                value: 900_000.0,
                appreciation_rate: 0.0,
                mortgage_balance: 200_000.0,
                interest_rate: 0.05,
                mortgage_term_years: 30,
                mortgage_current_year: 10,
                interest_only: false,
                purchase_price: 400_000.0,
                land_value: 100_000.0,
                depreciation_method: DepreciationMethod::ResidentialStraightLine,
                depreciation_start_year: Some(2015),
                accumulated_depreciation: 0.0,
                primary_residence_window: Some(ResidenceWindow {
                    owned_since_year: 2010,
                    years_lived_in_last_five: 5,
                }),
                annual_rent: 0.0,
                annual_property_tax: 0.0,
                annual_insurance: 0.0,
                annual_maintenance_pct: 0.0,
            }),
        }
    }

    fn cash(balance: f64) -> Asset {
        Asset {
            id: 1,
            name: "cash".to_string(),
            kind: AssetKind::Cash(CashAccount { balance }),
        }
    }

    #[test]
    fn recurring_income_grows_from_start_age() {
        let mut s = source(IncomeKind::Income, 10_000.0, None);
        s.appreciation_rate = 0.02;
        assert_approx(scheduled_amount(&s, 59), 0.0);
        assert_approx(scheduled_amount(&s, 60), 10_000.0);
        assert_approx(scheduled_amount(&s, 62), 10_000.0 * 1.02 * 1.02);
        assert_approx(scheduled_amount(&s, 71), 0.0);
    }

    #[test]
    fn treatments_route_to_categories_and_cash() {
        let mut p = Portfolio::new(vec![cash(0.0)], 2035);
        let mut ss = source(IncomeKind::Income, 30_000.0, None);
        ss.tax_treatment = TaxTreatment::SocialSecurity;
        let mut disability = source(IncomeKind::Income, 5_000.0, None);
        disability.id = 2;
        disability.tax_treatment = TaxTreatment::Disability;
        let accrued = accrue_income(
            &mut p,
            &[ss, disability],
            65,
            FilingStatus::Single,
        );
        assert_approx(accrued.breakdown.social_security, 30_000.0);
        assert_approx(accrued.breakdown.tax_exempt, 5_000.0);
        assert_approx(p.cash_balance(), 35_000.0);
        assert_eq!(accrued.by_source, vec![(1, 30_000.0), (2, 5_000.0)]);
    }

    #[test]
    fn traditional_drawdown_is_ordinary_income_moved_to_cash() {
        let ira = Asset {
            id: 3,
            name: "ira".to_string(),
            kind: AssetKind::GeneralEquity(EquityAccount {
                account_type: AccountType::Traditional,
                balance: 100_000.0,
                return_rate: None,
                fee_rate: 0.0,
                cost_basis: 0.0,
                annual_contribution: 0.0,
            }),
        };
        let mut p = Portfolio::new(vec![cash(0.0), ira], 2035);
        let accrued = accrue_income(
            &mut p,
            &[source(IncomeKind::Drawdown, 40_000.0, Some(3))],
            61,
            FilingStatus::Single,
        );
        assert_approx(accrued.breakdown.ordinary, 40_000.0);
        assert_approx(p.cash_balance(), 40_000.0);
        assert_approx(p.total_value(), 100_000.0);
    }

    #[test]
    fn primary_residence_sale_applies_exclusion() {
        let mut p = Portfolio::new(vec![cash(0.0), house(PropertyType::PrimaryResidence)], 2035);
        let accrued = accrue_income(
            &mut p,
            &[source(IncomeKind::HouseSale, 0.0, Some(7))],
            60,
            FilingStatus::MarriedFilingJointly,
        );
        let sale = accrued.house_sales[0];
        assert_approx(sale.excluded_gain, 500_000.0);
        assert_approx(accrued.breakdown.long_term_gains, 0.0);
        assert_approx(sale.net_proceeds, 700_000.0);
        assert_approx(p.cash_balance(), 700_000.0);
        assert_approx(p.total_value(), 700_000.0);
    }

    #[test]
    fn exclusion_requires_window_test() {
        let mut asset = house(PropertyType::PrimaryResidence);
        if let AssetKind::RealEstate(prop) = &mut asset.kind {
            prop.primary_residence_window = Some(ResidenceWindow {
                owned_since_year: 2034,
                years_lived_in_last_five: 1,
            });
        }
        let mut p = Portfolio::new(vec![cash(0.0), asset], 2035);
        let accrued = accrue_income(
            &mut p,
            &[source(IncomeKind::HouseSale, 0.0, Some(7))],
            60,
            FilingStatus::Single,
        );
        assert_approx(accrued.breakdown.long_term_gains, 500_000.0);
    }

    #[test]
    fn rental_sale_recaptures_depreciation_first() {
        let mut asset = house(PropertyType::Rental);
        if let AssetKind::RealEstate(prop) = &mut asset.kind {
            prop.accumulated_depreciation = 120_000.0;
        }
        let mut p = Portfolio::new(vec![cash(0.0), asset], 2035);
        let accrued = accrue_income(
            &mut p,
            &[source(IncomeKind::HouseSale, 0.0, Some(7))],
            60,
            FilingStatus::Single,
        );
        // basis 280k, gain 620k: 120k recapture + 500k capital gain
        assert_approx(accrued.breakdown.depreciation_recapture, 120_000.0);
        assert_approx(accrued.breakdown.long_term_gains, 500_000.0);
        assert!(accrued.house_sales[0].excluded_gain == 0.0);
    }

    #[test]
    fn house_sale_only_fires_in_its_year() {
        let mut p = Portfolio::new(vec![cash(0.0), house(PropertyType::Rental)], 2036);
        let accrued = accrue_income(
            &mut p,
            &[source(IncomeKind::HouseSale, 0.0, Some(7))],
            61,
            FilingStatus::Single,
        );
        assert!(accrued.house_sales.is_empty());
        assert_approx(p.total_value(), 900_000.0);
    }

    fn net_worth(p: &Portfolio) -> f64 {
        p.total_value() - p.assets().iter().map(Portfolio::debt_of).sum::<f64>()
    }

    #[test]
    fn underwater_sale_keeps_unpaid_mortgage_as_debt() {
        let mut asset = house(PropertyType::Rental);
        if let AssetKind::RealEstate(prop) = &mut asset.kind {
            prop.value = 100_000.0;
            prop.mortgage_balance = 300_000.0;
        }
        let mut p = Portfolio::new(vec![cash(50_000.0), asset], 2035);
        let before = net_worth(&p);
        let accrued = accrue_income(
            &mut p,
            &[source(IncomeKind::HouseSale, 0.0, Some(7))],
            60,
            FilingStatus::Single,
        );
        let sale = accrued.house_sales[0];
        assert_approx(sale.net_proceeds, -200_000.0);
        assert_approx(sale.mortgage_payoff, 150_000.0);
        assert_approx(sale.remaining_mortgage, 150_000.0);
        assert_approx(p.cash_balance(), 0.0);
        let debt = p.get(7).map(Portfolio::debt_of).unwrap_or_default();
        assert_approx(debt, 150_000.0);
        assert_approx(net_worth(&p), before);
    }

    #[test]
    fn sold_rental_stops_depreciating() {
        let mut asset = house(PropertyType::Rental);
        if let AssetKind::RealEstate(prop) = &mut asset.kind {
            prop.accumulated_depreciation = 50_000.0;
        }
        let mut p = Portfolio::new(vec![cash(0.0), asset], 2035);
        accrue_income(
            &mut p,
            &[source(IncomeKind::HouseSale, 0.0, Some(7))],
            60,
            FilingStatus::Single,
        );
        let property = p.property_mut(7).expect("property kept in the portfolio");
        let year = advance_property(property, 2036, 1.0);
        assert_approx(year.depreciation, 0.0);
        assert_approx(year.taxable_rental_income, 0.0);
        assert_approx(property.accumulated_depreciation, 0.0);
        assert_approx(property.mortgage_balance, 0.0);
    }
}
