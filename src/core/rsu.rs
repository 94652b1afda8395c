use chrono::Datelike;
use serde::Serialize;

use super::types::{RsuGrant, Security, VestedLot};

/// Projected share price for `year`, starting from the security's quoted price
/// (or the grant-date FMV when no quote is known).
pub fn projected_price(
    grant: &RsuGrant,
    security: Option<&Security>,
    base_year: i32,
    year: i32,
) -> f64 {
    let (start_price, growth) = match security {
        Some(s) => (
            s.current_price.unwrap_or(grant.fmv_at_grant),
            s.appreciation_rate,
        ),
        None => (grant.fmv_at_grant, 0.0),
    };
    start_price * (1.0 + growth).powi(year - base_year)
}

pub fn is_vested(grant: &RsuGrant, tranche_index: usize) -> bool {
    grant
        .vested_lots
        .iter()
        .any(|lot| lot.tranche_index == tranche_index)
}

pub fn unvested_shares(grant: &RsuGrant) -> f64 {
    grant
        .tranches
        .iter()
        .enumerate()
        .filter(|(i, _)| !is_vested(grant, *i))
        .map(|(_, t)| grant.shares_granted * t.percentage_of_grant)
        .sum()
}

pub fn vested_shares(grant: &RsuGrant) -> f64 {
    grant.vested_lots.iter().map(|lot| lot.shares_held).sum()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VestOutcome {
    pub unvested_shares_start: f64,
    pub unvested_value_start: f64,
    pub shares_vested: f64,
    pub fmv_at_vest: f64,
    pub vested_value: f64,
    pub unvested_shares_end: f64,
    pub unvested_value_end: f64,
    pub lots_created: usize,
}

/// Vests every tranche dated on or before `year` that has no lot yet.
/// Start and end unvested values are both taken at `price`, so
/// `unvested_value_start - unvested_value_end == vested_value`.
pub fn vest_year(grant: &mut RsuGrant, year: i32, price: f64) -> VestOutcome {
    let unvested_shares_start = unvested_shares(grant);
    let mut shares_vested = 0.0;
    let mut lots_created = 0;

    for index in 0..grant.tranches.len() {
        let tranche = &grant.tranches[index];
        if tranche.vesting_date.year() > year || is_vested(grant, index) {
            continue;
        }
        let shares = grant.shares_granted * tranche.percentage_of_grant;
        let vesting_date = tranche.vesting_date;
        grant.vested_lots.push(VestedLot {
            tranche_index: index,
            vesting_date,
            shares_held: shares,
            basis_per_share: price,
        });
        shares_vested += shares;
        lots_created += 1;
    }

    let unvested_shares_end = unvested_shares(grant);
    VestOutcome {
        unvested_shares_start,
        unvested_value_start: unvested_shares_start * price,
        shares_vested,
        fmv_at_vest: price,
        vested_value: shares_vested * price,
        unvested_shares_end,
        unvested_value_end: unvested_shares_end * price,
        lots_created,
    }
}

/// Shares left after the displayed withholding estimate. Not applied to holdings.
pub fn estimated_net_shares(grant: &RsuGrant, shares: f64) -> f64 {
    let rate = grant
        .estimated_share_withholding_rate
        .unwrap_or(0.0)
        .clamp(0.0, 1.0);
    shares * (1.0 - rate)
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LotSale {
    pub proceeds: f64,
    pub short_term_gain: f64,
    pub long_term_gain: f64,
}

/// Lot indices oldest first.
fn fifo_order(grant: &RsuGrant) -> Vec<usize> {
    let mut order: Vec<usize> = (0..grant.vested_lots.len()).collect();
    order.sort_by_key(|&i| {
        let lot = &grant.vested_lots[i];
        (lot.vesting_date, lot.tranche_index)
    });
    order
}

/// Sells up to `amount` of vested shares at `price`, oldest lots first.
/// Lots are kept at zero shares so their tranche stays vested.
pub fn sell_lots(grant: &mut RsuGrant, amount: f64, price: f64, year: i32) -> LotSale {
    let mut sale = LotSale::default();
    if amount <= 0.0 || price <= 0.0 {
        return sale;
    }
    let mut remaining = amount;
    for index in fifo_order(grant) {
        if remaining <= 0.0 {
            break;
        }
        let lot = &mut grant.vested_lots[index];
        let lot_value = lot.shares_held * price;
        if lot_value <= 0.0 {
            continue;
        }
        let take = remaining.min(lot_value);
        let shares = take / price;
        let gain = take - shares * lot.basis_per_share;
        lot.shares_held = (lot.shares_held - shares).max(0.0);
        if lot.vesting_date.year() == year {
            sale.short_term_gain += gain;
        } else {
            sale.long_term_gain += gain;
        }
        sale.proceeds += take;
        remaining -= take;
    }
    sale
}
