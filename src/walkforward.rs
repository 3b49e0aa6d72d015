//! Walk-forward analysis of the moving-average crossover.
//!
//! History is cut into rolling (train, test) windows. Each window picks the
//! crossover parameters with the best in-sample summed return from a fixed grid
//! and then applies them, unchanged, to the test slice that follows.
//!
//! Windows advance by the test length, so every test slice starts where the
//! previous one ended and no two test slices share a bar.

use crate::backtest::{summed_strategy_return, StrategyBacktester};
use crate::error::{QuantError, Result};
use crate::types::StrategyParams;
use chrono::NaiveDate;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Trading days per calendar month used to size windows.
pub const TRADING_DAYS_PER_MONTH: usize = 21;

/// Candidate fast windows.
pub const FAST_WINDOWS: [usize; 3] = [10, 20, 50];

/// Candidate slow windows.
pub const SLOW_WINDOWS: [usize; 3] = [50, 100, 200];

/// Every ordered `(fast, slow)` pair of the search grid, fast-major.
pub fn candidate_params() -> Vec<StrategyParams> {
    FAST_WINDOWS
        .iter()
        .flat_map(|&f| SLOW_WINDOWS.iter().map(move |&s| StrategyParams::new(f, s)))
        .filter(StrategyParams::is_ordered)
        .collect()
}

/// Index bounds of one window; ranges are half-open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowBounds {
    pub index: usize,
    pub train_start: usize,
    pub train_end: usize,
    pub test_start: usize,
    pub test_end: usize,
}

/// Tile `n` bars into (train, test) windows.
///
/// Windows start at `0, test_len, 2 * test_len, ...` while
/// `start + train_len + test_len < n`.
pub fn plan_windows(n: usize, train_len: usize, test_len: usize) -> Vec<WindowBounds> {
    if train_len == 0 || test_len == 0 {
        return Vec::new();
    }
    let mut windows = Vec::new();
    let mut start = 0;
    while start + train_len + test_len < n {
        windows.push(WindowBounds {
            index: windows.len(),
            train_start: start,
            train_end: start + train_len,
            test_start: start + train_len,
            test_end: start + train_len + test_len,
        });
        start += test_len;
    }
    windows
}

/// Calendar span of one window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BacktestWindow {
    pub index: usize,
    pub train_start: NaiveDate,
    pub train_end: NaiveDate,
    pub test_start: NaiveDate,
    pub test_end: NaiveDate,
    pub train_bars: usize,
    pub test_bars: usize,
}

/// Selected parameters and returns for one window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowResult {
    pub window: BacktestWindow,
    pub params: StrategyParams,
    /// Summed in-sample return of the selected parameters.
    pub train_return: f64,
    /// Summed out-of-sample return.
    pub test_return: f64,
}

/// Complete walk-forward analysis results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalkForwardReport {
    pub symbol: String,
    pub train_months: usize,
    pub test_months: usize,
    pub windows: Vec<WindowResult>,
    /// Sum of every window's test return.
    pub total_test_return: f64,
}

impl WalkForwardReport {
    pub fn summary(&self) -> String {
        let mut lines = vec!["Walk Forward Analysis Results:".to_string()];
        for r in &self.windows {
            lines.push(format!(
                "[{} to {}] Params: {}, Return: {:.2}%",
                r.window.test_start,
                r.window.test_end,
                r.params,
                r.test_return * 100.0
            ));
        }
        lines.push(format!(
            "Total Walk Forward Return: {:.2}%",
            self.total_test_return * 100.0
        ));
        lines.join("\n")
    }
}

/// Best candidate by strictly greater summed return; ties keep the earlier pair.
pub fn select_params(closes: &[f64], candidates: &[StrategyParams]) -> Option<(StrategyParams, f64)> {
    let mut best: Option<(StrategyParams, f64)> = None;
    let mut best_perf = f64::NEG_INFINITY;
    for &params in candidates {
        let perf = summed_strategy_return(closes, params);
        if perf > best_perf {
            best_perf = perf;
            best = Some((params, perf));
        }
    }
    best
}

/// Run the grid search and out-of-sample evaluation for every planned window.
pub fn evaluate_windows(
    dates: &[NaiveDate],
    closes: &[f64],
    train_len: usize,
    test_len: usize,
) -> Result<Vec<WindowResult>> {
    let candidates = candidate_params();
    plan_windows(closes.len(), train_len, test_len)
        .par_iter()
        .map(|b| {
            let train = &closes[b.train_start..b.train_end];
            let test = &closes[b.test_start..b.test_end];
            let (params, train_return) = select_params(train, &candidates).ok_or_else(|| {
                QuantError::InsufficientData(format!(
                    "no finite training return in window {}",
                    b.index
                ))
            })?;
            let test_return = summed_strategy_return(test, params);
            debug!(
                "Window {}: params {}, train {:.4}, test {:.4}",
                b.index, params, train_return, test_return
            );
            Ok(WindowResult {
                window: BacktestWindow {
                    index: b.index,
                    train_start: dates[b.train_start],
                    train_end: dates[b.train_end - 1],
                    test_start: dates[b.test_start],
                    test_end: dates[b.test_end - 1],
                    train_bars: train.len(),
                    test_bars: test.len(),
                },
                params,
                train_return,
                test_return,
            })
        })
        .collect()
}

impl<'a> StrategyBacktester<'a> {
    /// Re-optimize on each train slice and record the following test slice.
    pub fn walk_forward_analysis(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
        train_months: usize,
        test_months: usize,
    ) -> Result<WalkForwardReport> {
        if train_months == 0 || test_months == 0 {
            return Err(QuantError::InvalidInput(format!(
                "train and test months must be positive, got {} and {}",
                train_months, test_months
            )));
        }
        let train_len = train_months * TRADING_DAYS_PER_MONTH;
        let test_len = test_months * TRADING_DAYS_PER_MONTH;

        let bars = self.fetch_range(symbol, start, end)?;
        if bars.len() <= train_len + test_len {
            return Err(QuantError::InsufficientData(format!(
                "{} bars cannot fit a {}-bar train and {}-bar test window",
                bars.len(),
                train_len,
                test_len
            )));
        }
        info!(
            "Running walk-forward analysis for {} over {} bars (train {}, test {})",
            symbol,
            bars.len(),
            train_len,
            test_len
        );

        let dates: Vec<NaiveDate> = bars.iter().map(|b| b.date).collect();
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let windows = evaluate_windows(&dates, &closes, train_len, test_len)?;
        let total_test_return = windows.iter().map(|w| w.test_return).sum();

        info!(
            "Walk-forward completed for {}: {} windows, total return {:.2}%",
            symbol,
            windows.len(),
            total_test_return * 100.0
        );
        Ok(WalkForwardReport {
            symbol: symbol.to_string(),
            train_months,
            test_months,
            windows,
            total_test_return,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::InMemoryProvider;
    use crate::types::PriceBar;

    #[test]
    fn test_candidate_grid_skips_unordered_pairs() {
        let grid = candidate_params();
        assert_eq!(grid.len(), 7);
        assert!(grid.iter().all(|p| p.fast_window < p.slow_window));
        assert_eq!(grid[0], StrategyParams::new(10, 50));
        assert!(!grid.contains(&StrategyParams::new(50, 50)));
    }

    #[test]
    fn test_plan_windows_tiling() {
        let windows = plan_windows(100, 30, 10);
        // starts 0,10,..,50 satisfy start + 40 < 100
        assert_eq!(windows.len(), 6);
        for pair in windows.windows(2) {
            assert_eq!(pair[0].test_end, pair[1].test_start);
            assert_eq!(pair[1].train_start, pair[0].train_start + 10);
        }
        for w in &windows {
            assert_eq!(w.train_end, w.test_start);
            assert_eq!(w.test_end - w.test_start, 10);
        }
        assert!(windows.last().unwrap().test_end < 100);
    }

    #[test]
    fn test_plan_windows_exact_fit_is_excluded() {
        assert!(plan_windows(40, 30, 10).is_empty());
        assert_eq!(plan_windows(41, 30, 10).len(), 1);
        assert!(plan_windows(1000, 0, 10).is_empty());
    }

    #[test]
    fn test_select_params_first_wins_ties() {
        // Flat prices: every candidate returns exactly zero
        let closes = vec![50.0; 300];
        let (params, perf) = select_params(&closes, &candidate_params()).unwrap();
        assert_eq!(params, StrategyParams::new(10, 50));
        assert_eq!(perf, 0.0);
    }

    #[test]
    fn test_walk_forward_end_to_end() {
        let start = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        let bars: Vec<PriceBar> = (0..400)
            .map(|i| {
                let p = 100.0 + i as f64 * 0.05 + (i as f64 / 15.0).sin() * 4.0;
                PriceBar::flat(start + chrono::Duration::days(i), p)
            })
            .collect();
        let provider = InMemoryProvider::new().with_series("WF", bars);
        let bt = StrategyBacktester::new(&provider);
        let end = NaiveDate::from_ymd_opt(2022, 12, 31).unwrap();

        let report = bt.walk_forward_analysis("WF", start, end, 12, 3).unwrap();
        // 400 bars, train 252, test 63: starts 0 and 63
        assert_eq!(report.windows.len(), 2);
        let sum: f64 = report.windows.iter().map(|w| w.test_return).sum();
        assert!((report.total_test_return - sum).abs() < 1e-12);
        assert!(report.windows[0].window.test_end < report.windows[1].window.test_start);
        assert!(report.summary().contains("Total Walk Forward Return"));
    }

    #[test]
    fn test_walk_forward_short_history() {
        let start = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        let bars: Vec<PriceBar> = (0..100)
            .map(|i| PriceBar::flat(start + chrono::Duration::days(i), 10.0 + i as f64))
            .collect();
        let provider = InMemoryProvider::new().with_series("S", bars);
        let bt = StrategyBacktester::new(&provider);
        let end = NaiveDate::from_ymd_opt(2021, 1, 1).unwrap();
        assert!(matches!(
            bt.walk_forward_analysis("S", start, end, 12, 3),
            Err(QuantError::InsufficientData(_))
        ));
        assert!(matches!(
            bt.walk_forward_analysis("S", start, end, 0, 3),
            Err(QuantError::InvalidInput(_))
        ));
    }
}
