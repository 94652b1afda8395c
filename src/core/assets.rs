use super::types::{EquityAccount, Property, PropertyType, StockHolding};

/// One year of fund growth net of fees. Cost basis is unchanged by growth.
pub fn grow_equity(account: &mut EquityAccount, default_return: f64) {
    let rate = account.return_rate.unwrap_or(default_return);
    account.balance = (account.balance * (1.0 + rate - account.fee_rate)).max(0.0);
}

/// Appreciates the share price and returns the qualified dividends paid on
/// the start-of-year position.
pub fn grow_stock(stock: &mut StockHolding) -> f64 {
    let dividends = (stock.shares * stock.price * stock.dividend_yield).max(0.0);
    stock.price = (stock.price * (1.0 + stock.appreciation_rate)).max(0.0);
    dividends
}

/// Level annual payment that retires `balance` over `years_remaining` years.
pub fn level_payment(balance: f64, rate: f64, years_remaining: u32) -> f64 {
    if balance <= 0.0 {
        return 0.0;
    }
    if years_remaining == 0 {
        return balance * (1.0 + rate);
    }
    let n = years_remaining as f64;
    if rate.abs() <= 1e-12 {
        return balance / n;
    }
    balance * rate / (1.0 - (1.0 + rate).powf(-n))
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PropertyYear {
    pub mortgage_payment: f64,
    pub interest_paid: f64,
    pub principal_paid: f64,
    pub depreciation: f64,
    pub rent: f64,
    pub carrying_costs: f64,
    pub taxable_rental_income: f64,
    /// Rent less carrying costs and the mortgage payment.
    pub net_cash_flow: f64,
}

fn amortize(property: &mut Property) -> (f64, f64) {
    let balance = property.mortgage_balance.max(0.0);
    if balance <= 0.0 {
        return (0.0, 0.0);
    }
    let interest = balance * property.interest_rate;
    let principal = if property.interest_only || property.mortgage_term_years == 0 {
        0.0
    } else {
        let remaining = (property.mortgage_term_years + 1).saturating_sub(property.mortgage_current_year);
        let payment = level_payment(balance, property.interest_rate, remaining);
        (payment - interest).clamp(0.0, balance)
    };
    property.mortgage_balance = (balance - principal).max(0.0);
    property.mortgage_current_year += 1;
    (interest, principal)
}

fn depreciate(property: &mut Property, year: i32) -> f64 {
    if property.property_type != PropertyType::Rental {
        return 0.0;
    }
    let Some(life) = property.depreciation_method.recovery_years() else {
        return 0.0;
    };
    if property.depreciation_start_year.is_some_and(|start| year < start) {
        return 0.0;
    }
    let depreciable = (property.purchase_price - property.land_value).max(0.0);
    let remaining = (depreciable - property.accumulated_depreciation).max(0.0);
    let amount = (depreciable / life).min(remaining);
    property.accumulated_depreciation += amount;
    amount
}

/// Advances a property one year: carrying costs on the opening value, then
/// appreciation, amortization and depreciation. `price_index` inflates rent
/// and the fixed costs from the scenario's base year.
pub fn advance_property(property: &mut Property, year: i32, price_index: f64) -> PropertyYear {
    let rent = match property.property_type {
        PropertyType::Rental => property.annual_rent * price_index,
        PropertyType::PrimaryResidence => 0.0,
    };
    let carrying_costs = (property.annual_property_tax + property.annual_insurance) * price_index
        + property.annual_maintenance_pct * property.value;

    property.value = (property.value * (1.0 + property.appreciation_rate)).max(0.0);
    let (interest_paid, principal_paid) = amortize(property);
    let depreciation = depreciate(property, year);

    let taxable_rental_income = match property.property_type {
        PropertyType::Rental => (rent - carrying_costs - interest_paid - depreciation).max(0.0),
        PropertyType::PrimaryResidence => 0.0,
    };
    let mortgage_payment = interest_paid + principal_paid;

    PropertyYear {
        mortgage_payment,
        interest_paid,
        principal_paid,
        depreciation,
        rent,
        carrying_costs,
        taxable_rental_income,
        net_cash_flow: rent - carrying_costs - mortgage_payment,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{AccountType, DepreciationMethod};
    use proptest::prelude::{prop_assert, proptest};

    const EPS: f64 = 1e-6;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn assert_approx_tol(actual: f64, expected: f64, tol: f64) {
        assert!(
            (actual - expected).abs() <= tol,
            "expected {expected}, got {actual}, tolerance {tol}"
        );
    }

    fn rental() -> Property {
        Property {
            property_type: PropertyType::Rental,
            value: 500_000.0,
            appreciation_rate: 0.03,
            mortgage_balance: 300_000.0,
            interest_rate: 0.06,
            mortgage_term_years: 30,
            mortgage_current_year: 1,
            interest_only: false,
            purchase_price: 400_000.0,
            land_value: 125_000.0,
            depreciation_method: DepreciationMethod::ResidentialStraightLine,
            depreciation_start_year: Some(2020),
            accumulated_depreciation: 0.0,
            primary_residence_window: None,
            annual_rent: 36_000.0,
            annual_property_tax: 5_000.0,
            annual_insurance: 1_500.0,
            annual_maintenance_pct: 0.01,
        }
    }

    #[test]
    fn equity_grows_net_of_fees_and_defaults_to_bond_rate() {
        let mut account = EquityAccount {
            account_type: AccountType::Taxable,
            balance: 100_000.0,
            return_rate: Some(0.07),
            fee_rate: 0.01,
            cost_basis: 80_000.0,
            annual_contribution: 0.0,
        };
        grow_equity(&mut account, 0.04);
        assert_approx(account.balance, 106_000.0);
        assert_approx(account.cost_basis, 80_000.0);

        account.return_rate = None;
        account.fee_rate = 0.0;
        grow_equity(&mut account, 0.04);
        assert_approx(account.balance, 106_000.0 * 1.04);
    }

    #[test]
    fn stock_pays_dividends_on_opening_value() {
        let mut stock = StockHolding {
            ticker: "ACME".to_string(),
            shares: 100.0,
            price: 50.0,
            appreciation_rate: 0.10,
            dividend_yield: 0.02,
            cost_basis: 3_000.0,
        };
        assert_approx(grow_stock(&mut stock), 100.0);
        assert_approx(stock.price, 55.0);
    }

    #[test]
    fn level_payment_retires_balance_on_schedule() {
        let mut property = rental();
        property.mortgage_term_years = 5;
        property.mortgage_balance = 100_000.0;
        for year in 0..5 {
            advance_property(&mut property, 2025 + year, 1.0);
        }
        assert_approx_tol(property.mortgage_balance, 0.0, 1e-4);
    }

    #[test]
    fn zero_rate_mortgage_is_straight_line() {
        let mut property = rental();
        property.interest_rate = 0.0;
        property.mortgage_balance = 100_000.0;
        property.mortgage_term_years = 10;
        let year = advance_property(&mut property, 2025, 1.0);
        assert_approx(year.principal_paid, 10_000.0);
        assert_approx(year.interest_paid, 0.0);
    }

    #[test]
    fn interest_only_mortgage_keeps_balance() {
        let mut property = rental();
        property.interest_only = true;
        let year = advance_property(&mut property, 2025, 1.0);
        assert_approx(year.interest_paid, 18_000.0);
        assert_approx(year.principal_paid, 0.0);
        assert_approx(property.mortgage_balance, 300_000.0);
    }

    #[test]
    fn rental_depreciates_straight_line_and_stops_at_base() {
        let mut property = rental();
        let year = advance_property(&mut property, 2025, 1.0);
        assert_approx(year.depreciation, 275_000.0 / 27.5);
        assert_approx(property.value, 515_000.0);

        property.accumulated_depreciation = 274_000.0;
        let last = advance_property(&mut property, 2026, 1.0);
        assert_approx(last.depreciation, 1_000.0);
        assert_approx(property.accumulated_depreciation, 275_000.0);
    }

    #[test]
    fn depreciation_waits_for_start_year() {
        let mut property = rental();
        property.depreciation_start_year = Some(2030);
        assert_approx(advance_property(&mut property, 2025, 1.0).depreciation, 0.0);
    }

    #[test]
    fn rental_income_is_floored_at_zero() {
        let mut property = rental();
        property.annual_rent = 1_000.0;
        let year = advance_property(&mut property, 2025, 1.0);
        assert_approx(year.taxable_rental_income, 0.0);
        assert!(year.net_cash_flow < 0.0);
    }

    #[test]
    fn primary_residence_costs_are_household_expense() {
        let mut property = rental();
        property.property_type = PropertyType::PrimaryResidence;
        property.mortgage_balance = 0.0;
        let year = advance_property(&mut property, 2025, 1.1);
        assert_approx(year.rent, 0.0);
        assert_approx(year.depreciation, 0.0);
        assert_approx(year.carrying_costs, 6_500.0 * 1.1 + 5_000.0);
        assert_approx(year.net_cash_flow, -year.carrying_costs);
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(24))]

        #[test]
        fn mortgage_balance_never_increases(
            balance in 0.0f64..2_000_000.0,
            rate in 0.0f64..0.15,
            term in 1u32..40,
            current in 1u32..45,
            interest_only in proptest::bool::ANY,
        ) {
            let mut property = rental();
            property.mortgage_balance = balance;
            property.interest_rate = rate;
            property.mortgage_term_years = term;
            property.mortgage_current_year = current;
            property.interest_only = interest_only;
            for offset in 0..5 {
                let before = property.mortgage_balance;
                advance_property(&mut property, 2025 + offset, 1.0);
                prop_assert!(property.mortgage_balance <= before + EPS);
                prop_assert!(property.mortgage_balance >= 0.0);
            }
        }
    }
}
