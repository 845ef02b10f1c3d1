//! Composition change between two consecutive portfolios.
//!
//! Every code held in either portfolio lands in exactly one class: additions
//! (new only), deletions (previous only) or adjustments (both, including an
//! unchanged share count).

use crate::domain::error::LowvolError;
use crate::domain::portfolio::Portfolio;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Signed share and dollar change for one code.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TurnoverLine {
    pub shares: i64,
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Turnover {
    pub additions: BTreeMap<String, TurnoverLine>,
    pub deletions: BTreeMap<String, TurnoverLine>,
    pub adjustments: BTreeMap<String, TurnoverLine>,
}

impl Turnover {
    /// Dollars newly invested.
    pub fn added_amount(&self) -> f64 {
        self.additions.values().map(|l| l.amount).sum()
    }

    /// Dollars liquidated, as a positive amount.
    pub fn dropped_amount(&self) -> f64 {
        -self.deletions.values().map(|l| l.amount).sum::<f64>()
    }

    /// Net dollar change on retained positions.
    pub fn adjusted_amount(&self) -> f64 {
        self.adjustments.values().map(|l| l.amount).sum()
    }

    pub fn codes(&self) -> BTreeSet<&str> {
        self.additions
            .keys()
            .chain(self.deletions.keys())
            .chain(self.adjustments.keys())
            .map(String::as_str)
            .collect()
    }
}

/// Classify the move from `previous` to `current`, pricing both sides with
/// `price` (the rebalancing date close).
pub fn compute_turnover<F>(
    current: &Portfolio,
    previous: &Portfolio,
    mut price: F,
) -> Result<Turnover, LowvolError>
where
    F: FnMut(&str) -> Result<f64, LowvolError>,
{
    let mut turnover = Turnover::default();

    for (code, &shares) in &current.positions {
        let px = price(code)?;
        match previous.positions.get(code) {
            None => {
                debug!("new investment in {code}: {:.0}", shares as f64 * px);
                turnover.additions.insert(
                    code.clone(),
                    TurnoverLine {
                        shares,
                        amount: shares as f64 * px,
                    },
                );
            }
            Some(&prev_shares) => {
                let delta = shares - prev_shares;
                debug!("adjustment for {code}: {:.0}", delta as f64 * px);
                turnover.adjustments.insert(
                    code.clone(),
                    TurnoverLine {
                        shares: delta,
                        amount: delta as f64 * px,
                    },
                );
            }
        }
    }

    for (code, &prev_shares) in &previous.positions {
        if current.has_position(code) {
            continue;
        }
        let px = price(code)?;
        debug!("liquidation of {code}: {:.0}", prev_shares as f64 * px);
        turnover.deletions.insert(
            code.clone(),
            TurnoverLine {
                shares: -prev_shares,
                amount: -(prev_shares as f64) * px,
            },
        );
    }

    Ok(turnover)
}
