//! Statistical building blocks shared by the risk, simulation, optimization and
//! backtesting components.

use crate::error::{QuantError, Result};
use crate::types::{PriceBar, TRADING_DAYS_PER_YEAR};
use chrono::NaiveDate;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Close prices of several symbols restricted to the dates all of them share.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignedCloses {
    pub dates: Vec<NaiveDate>,
    pub symbols: Vec<String>,
    /// `closes[asset][t]`
    pub closes: Vec<Vec<f64>>,
}

impl AlignedCloses {
    /// Inner join of every series on date.
    pub fn inner_join(series: &[(String, Vec<PriceBar>)]) -> Self {
        let symbols: Vec<String> = series.iter().map(|(s, _)| s.clone()).collect();
        if series.is_empty() {
            return Self {
                dates: Vec::new(),
                symbols,
                closes: Vec::new(),
            };
        }

        let mut common: Vec<NaiveDate> = series[0].1.iter().map(|b| b.date).collect();
        for (_, bars) in &series[1..] {
            let dates: HashSet<NaiveDate> = bars.iter().map(|b| b.date).collect();
            common.retain(|d| dates.contains(d));
        }
        common.sort();
        common.dedup();

        let closes = series
            .iter()
            .map(|(_, bars)| {
                let by_date: BTreeMap<NaiveDate, f64> =
                    bars.iter().map(|b| (b.date, b.close)).collect();
                common.iter().filter_map(|d| by_date.get(d).copied()).collect()
            })
            .collect();

        Self {
            dates: common,
            symbols,
            closes,
        }
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    /// Latest aligned close per symbol.
    pub fn latest(&self) -> Vec<f64> {
        self.closes
            .iter()
            .map(|c| c.last().copied().unwrap_or(f64::NAN))
            .collect()
    }

    /// Simple percentage changes `P_t / P_{t-1} - 1`.
    pub fn simple_returns(&self) -> ReturnMatrix {
        self.returns_with(|prev, cur| cur / prev - 1.0)
    }

    /// Log changes `ln(P_t / P_{t-1})`.
    pub fn log_returns(&self) -> ReturnMatrix {
        self.returns_with(|prev, cur| (cur / prev).ln())
    }

    fn returns_with(&self, f: impl Fn(f64, f64) -> f64) -> ReturnMatrix {
        let columns = self
            .closes
            .iter()
            .map(|c| c.windows(2).map(|w| f(w[0], w[1])).collect())
            .collect();
        ReturnMatrix {
            dates: self.dates.iter().skip(1).copied().collect(),
            symbols: self.symbols.clone(),
            columns,
        }
    }
}

/// Per-symbol return series on shared dates.
///
/// Element `t` corresponds to the `t + 1`-th aligned bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnMatrix {
    pub dates: Vec<NaiveDate>,
    pub symbols: Vec<String>,
    /// `columns[asset][t]`
    pub columns: Vec<Vec<f64>>,
}

impl ReturnMatrix {
    /// Build from raw columns, checking that every column has one value per date.
    pub fn new(dates: Vec<NaiveDate>, symbols: Vec<String>, columns: Vec<Vec<f64>>) -> Result<Self> {
        if symbols.len() != columns.len() {
            return Err(QuantError::InvalidInput(format!(
                "{} symbols but {} return columns",
                symbols.len(),
                columns.len()
            )));
        }
        if let Some((s, c)) = symbols
            .iter()
            .zip(columns.iter())
            .find(|(_, c)| c.len() != dates.len())
        {
            return Err(QuantError::InvalidInput(format!(
                "return column for {} has {} values, expected {}",
                s,
                c.len(),
                dates.len()
            )));
        }
        Ok(Self {
            dates,
            symbols,
            columns,
        })
    }

    /// Number of aligned observations.
    pub fn observations(&self) -> usize {
        self.dates.len()
    }

    pub fn n_assets(&self) -> usize {
        self.symbols.len()
    }

    pub fn means(&self) -> Vec<f64> {
        self.columns.iter().map(|c| mean(c)).collect()
    }

    pub fn std_devs(&self) -> Vec<f64> {
        self.columns.iter().map(|c| sample_std(c)).collect()
    }

    /// Sample covariance (ddof = 1).
    pub fn covariance(&self) -> DMatrix<f64> {
        let n = self.n_assets();
        let t = self.observations();
        let means = self.means();
        let denom = t as f64 - 1.0;

        let mut cov = DMatrix::<f64>::zeros(n, n);
        for i in 0..n {
            for j in i..n {
                let c = self.columns[i]
                    .iter()
                    .zip(self.columns[j].iter())
                    .map(|(a, b)| (a - means[i]) * (b - means[j]))
                    .sum::<f64>()
                    / denom;
                cov[(i, j)] = c;
                cov[(j, i)] = c;
            }
        }
        cov
    }

    /// Sample covariance scaled to a yearly horizon.
    pub fn annualized_covariance(&self) -> DMatrix<f64> {
        self.covariance() * TRADING_DAYS_PER_YEAR
    }

    /// Weighted sum across assets for every observation.
    pub fn portfolio_returns(&self, weights: &[f64]) -> Vec<f64> {
        (0..self.observations())
            .map(|t| {
                self.columns
                    .iter()
                    .zip(weights.iter())
                    .map(|(col, w)| col[t] * w)
                    .sum()
            })
            .collect()
    }
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (ddof = 1); zero for fewer than two values.
pub fn sample_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    var.sqrt()
}

/// Empirical percentile (`q` in `[0, 100]`) with linear interpolation between
/// order statistics.
pub fn percentile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() || !(0.0..=100.0).contains(&q) {
        return None;
    }
    let mut sorted: Vec<f64> = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let rank = q / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// Rolling simple moving average; `None` until `window` values are available.
pub fn sma_series(values: &[f64], window: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if window == 0 || values.len() < window {
        return out;
    }
    let mut sum: f64 = values[..window].iter().sum();
    out[window - 1] = Some(sum / window as f64);
    for i in window..values.len() {
        sum += values[i] - values[i - window];
        out[i] = Some(sum / window as f64);
    }
    out
}

/// Compounded return `Π(1 + r) - 1`.
pub fn compound(returns: &[f64]) -> f64 {
    returns.iter().fold(1.0, |acc, r| acc * (1.0 + r)) - 1.0
}

/// Largest peak-to-trough decline of the cumulative return index.
///
/// The index is `C_t = Π(1 + r_i)` and the running peak starts at `C_0`, so the
/// result is always `<= 0` and exactly `0` for a non-decreasing index.
pub fn max_drawdown_of(returns: &[f64]) -> f64 {
    let mut cumulative = 1.0;
    let mut peak = f64::NEG_INFINITY;
    let mut worst: f64 = 0.0;
    for r in returns {
        cumulative *= 1.0 + r;
        peak = peak.max(cumulative);
        worst = worst.min(cumulative / peak - 1.0);
    }
    worst
}

/// `mean / std * sqrt(252)`, or 0 when the deviation is zero or undefined.
pub fn annualized_sharpe(daily_returns: &[f64]) -> f64 {
    let std = sample_std(daily_returns);
    if std == 0.0 || !std.is_finite() {
        return 0.0;
    }
    mean(daily_returns) / std * TRADING_DAYS_PER_YEAR.sqrt()
}
