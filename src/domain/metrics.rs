//! Whole-run summary statistics.

use crate::domain::backtest::PeriodResult;

#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub periods: usize,
    pub initial_cash: f64,
    pub final_valuation: f64,
    /// Final valuation over initial cash, minus one.
    pub total_return: f64,
    /// Period benchmark returns compounded.
    pub benchmark_return: f64,
    pub excess_return: f64,
    pub periods_outperformed: usize,
    pub best_period_return: f64,
    pub worst_period_return: f64,
    /// Largest peak-to-trough decline of period-end valuations.
    pub max_drawdown: f64,
    pub dividends: f64,
    pub added_amount: f64,
    pub dropped_amount: f64,
}

impl Summary {
    pub fn compute(results: &[PeriodResult], initial_cash: f64) -> Self {
        let final_valuation = results.last().map(|r| r.valuation).unwrap_or(initial_cash);

        let total_return = if initial_cash > 0.0 {
            final_valuation / initial_cash - 1.0
        } else {
            0.0
        };

        let benchmark_return = results
            .iter()
            .fold(1.0, |acc, r| acc * (1.0 + r.benchmark_return))
            - 1.0;

        let periods_outperformed = results
            .iter()
            .filter(|r| r.portfolio_return > r.benchmark_return)
            .count();

        let best_period_return = results
            .iter()
            .map(|r| r.portfolio_return)
            .fold(None, |best: Option<f64>, r| Some(best.map_or(r, |b| b.max(r))))
            .unwrap_or(0.0);
        let worst_period_return = results
            .iter()
            .map(|r| r.portfolio_return)
            .fold(None, |worst: Option<f64>, r| Some(worst.map_or(r, |w| w.min(r))))
            .unwrap_or(0.0);

        let (added_amount, dropped_amount) = results
            .iter()
            .filter_map(|r| r.turnover.as_ref())
            .fold((0.0, 0.0), |(added, dropped), t| {
                (added + t.added_amount(), dropped + t.dropped_amount())
            });

        Summary {
            periods: results.len(),
            initial_cash,
            final_valuation,
            total_return,
            benchmark_return,
            excess_return: total_return - benchmark_return,
            periods_outperformed,
            best_period_return,
            worst_period_return,
            max_drawdown: compute_drawdown(initial_cash, results),
            dividends: results.iter().map(|r| r.dividends).sum(),
            added_amount,
            dropped_amount,
        }
    }
}

fn compute_drawdown(initial_cash: f64, results: &[PeriodResult]) -> f64 {
    let mut peak = initial_cash;
    let mut max_dd = 0.0_f64;
    for r in results {
        if r.valuation > peak {
            peak = r.valuation;
        } else if peak > 0.0 {
            max_dd = max_dd.max((peak - r.valuation) / peak);
        }
    }
    max_dd
}
