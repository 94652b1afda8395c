use std::collections::BTreeMap;

use super::rsu::{self, LotSale};
use super::tax::IncomeBreakdown;
use super::types::{
    AccountType, Asset, AssetId, AssetKind, CashAccount, FundingSource, Property,
};

/// Proceeds of a withdrawal plus the taxable events it realized.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Withdrawal {
    pub proceeds: f64,
    pub income: IncomeBreakdown,
}

/// Working copy of the household's assets for one run.
#[derive(Debug, Clone)]
pub struct Portfolio {
    assets: Vec<Asset>,
    rsu_prices: BTreeMap<AssetId, f64>,
    year: i32,
}

impl Portfolio {
    /// Appends an implicit cash account when none is configured so that
    /// deposits always have somewhere to land.
    pub fn new(mut assets: Vec<Asset>, year: i32) -> Self {
        if !assets.iter().any(|a| matches!(a.kind, AssetKind::Cash(_))) {
            let id = assets.iter().map(|a| a.id).max().map_or(0, |m| m + 1);
            assets.push(Asset {
                id,
                name: "Cash".to_string(),
                kind: AssetKind::Cash(CashAccount { balance: 0.0 }),
            });
        }
        Self {
            assets,
            rsu_prices: BTreeMap::new(),
            year,
        }
    }

    pub fn assets(&self) -> &[Asset] {
        &self.assets
    }

    pub fn assets_mut(&mut self) -> &mut [Asset] {
        &mut self.assets
    }

    pub fn get(&self, id: AssetId) -> Option<&Asset> {
        self.assets.iter().find(|a| a.id == id)
    }

    pub fn get_mut(&mut self, id: AssetId) -> Option<&mut Asset> {
        self.assets.iter_mut().find(|a| a.id == id)
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn set_year(&mut self, year: i32, rsu_prices: BTreeMap<AssetId, f64>) {
        self.year = year;
        self.rsu_prices = rsu_prices;
    }

    pub fn rsu_price(&self, id: AssetId) -> f64 {
        self.rsu_prices.get(&id).copied().unwrap_or(0.0)
    }

    /// Market value, including unvested RSU shares at this year's price.
    pub fn value_of(&self, asset: &Asset) -> f64 {
        match &asset.kind {
            AssetKind::Cash(c) => c.balance,
            AssetKind::GeneralEquity(e) => e.balance,
            AssetKind::RealEstate(p) => p.value,
            AssetKind::SpecificStock(s) => s.shares * s.price,
            AssetKind::RsuGrant(g) => {
                (rsu::unvested_shares(g) + rsu::vested_shares(g)) * self.rsu_price(asset.id)
            }
        }
    }

    pub fn debt_of(asset: &Asset) -> f64 {
        match &asset.kind {
            AssetKind::RealEstate(p) => p.mortgage_balance,
            _ => 0.0,
        }
    }

    pub fn total_value(&self) -> f64 {
        self.assets.iter().map(|a| self.value_of(a)).sum()
    }

    pub fn cash_balance(&self) -> f64 {
        self.assets
            .iter()
            .map(|a| match &a.kind {
                AssetKind::Cash(c) => c.balance,
                _ => 0.0,
            })
            .sum()
    }

    /// Amount that can be raised by selling the asset this year.
    pub fn liquid_value(&self, asset: &Asset) -> f64 {
        match &asset.kind {
            AssetKind::Cash(c) => c.balance.max(0.0),
            AssetKind::GeneralEquity(e) => e.balance.max(0.0),
            AssetKind::SpecificStock(s) => (s.shares * s.price).max(0.0),
            AssetKind::RsuGrant(g) => rsu::vested_shares(g) * self.rsu_price(asset.id),
            AssetKind::RealEstate(_) => 0.0,
        }
    }

    /// Asset ids drawn on by a funding source, in configuration order.
    pub fn members(&self, source: FundingSource) -> Vec<AssetId> {
        self.assets
            .iter()
            .filter(|a| match (&a.kind, source) {
                (AssetKind::Cash(_), FundingSource::Cash) => true,
                (AssetKind::GeneralEquity(e), FundingSource::TaxableBrokerage) => matches!(
                    e.account_type,
                    AccountType::Taxable | AccountType::TaxExemptOther
                ),
                (AssetKind::GeneralEquity(e), FundingSource::TraditionalRetirement) => {
                    e.account_type == AccountType::Traditional
                }
                (AssetKind::GeneralEquity(e), FundingSource::Roth) => {
                    e.account_type == AccountType::Roth
                }
                (
                    AssetKind::SpecificStock(_) | AssetKind::RsuGrant(_),
                    FundingSource::TaxableBrokerage,
                ) => true,
                _ => false,
            })
            .map(|a| a.id)
            .collect()
    }

    pub fn source_capacity(&self, source: FundingSource) -> f64 {
        self.members(source)
            .into_iter()
            .filter_map(|id| self.get(id))
            .map(|a| self.liquid_value(a))
            .sum()
    }

    /// Sells up to `amount` from one asset. Gains use a proportional basis;
    /// RSU lots go oldest first.
    pub fn withdraw(&mut self, id: AssetId, amount: f64) -> Withdrawal {
        let year = self.year;
        let price = self.rsu_price(id);
        let Some(asset) = self.get_mut(id) else {
            return Withdrawal::default();
        };
        if amount <= 0.0 {
            return Withdrawal::default();
        }
        let mut income = IncomeBreakdown::default();
        let proceeds = match &mut asset.kind {
            AssetKind::Cash(c) => {
                let take = amount.min(c.balance.max(0.0));
                c.balance -= take;
                take
            }
            AssetKind::GeneralEquity(e) => {
                let before = e.balance.max(0.0);
                let take = amount.min(before);
                if take <= 0.0 {
                    return Withdrawal::default();
                }
                match e.account_type {
                    AccountType::Taxable => {
                        let basis_portion = (e.cost_basis * take / before).min(e.cost_basis);
                        e.cost_basis = (e.cost_basis - basis_portion).max(0.0);
                        income.long_term_gains += (take - basis_portion).max(0.0);
                    }
                    AccountType::Traditional => income.ordinary += take,
                    AccountType::Roth | AccountType::TaxExemptOther => income.tax_exempt += take,
                }
                e.balance = before - take;
                take
            }
            AssetKind::SpecificStock(s) => {
                let before = (s.shares * s.price).max(0.0);
                let take = amount.min(before);
                if take <= 0.0 {
                    return Withdrawal::default();
                }
                let fraction = take / before;
                let basis_portion = s.cost_basis * fraction;
                s.cost_basis -= basis_portion;
                s.shares *= 1.0 - fraction;
                income.long_term_gains += (take - basis_portion).max(0.0);
                take
            }
            AssetKind::RsuGrant(g) => {
                let LotSale {
                    proceeds,
                    short_term_gain,
                    long_term_gain,
                } = rsu::sell_lots(g, amount, price, year);
                income.short_term_gains += short_term_gain.max(0.0);
                income.long_term_gains += long_term_gain.max(0.0);
                proceeds
            }
            AssetKind::RealEstate(_) => 0.0,
        };
        Withdrawal { proceeds, income }
    }

    pub fn deposit_cash(&mut self, amount: f64) {
        if amount <= 0.0 {
            return;
        }
        if let Some(AssetKind::Cash(c)) = self
            .assets
            .iter_mut()
            .map(|a| &mut a.kind)
            .find(|k| matches!(k, AssetKind::Cash(_)))
        {
            c.balance += amount;
        }
    }

    /// Takes up to `amount` from cash accounts in order and returns what was paid.
    pub fn withdraw_cash(&mut self, amount: f64) -> f64 {
        let mut paid = 0.0;
        for asset in &mut self.assets {
            if paid >= amount {
                break;
            }
            if let AssetKind::Cash(c) = &mut asset.kind {
                let take = (amount - paid).min(c.balance.max(0.0));
                c.balance -= take;
                paid += take;
            }
        }
        paid
    }

    pub fn property_mut(&mut self, id: AssetId) -> Option<&mut Property> {
        match self.get_mut(id).map(|a| &mut a.kind) {
            Some(AssetKind::RealEstate(p)) => Some(p),
            _ => None,
        }
    }
}
