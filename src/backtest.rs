//! Moving-average crossover backtests.
//!
//! The signal is long (1) while the fast SMA is above the slow SMA and flat (0)
//! otherwise, including while either average is still warming up. A signal is
//! only acted on the following day: the strategy return on day `t` is the market
//! return on day `t` times the signal of day `t - 1`.

use crate::analytics::{annualized_sharpe, compound, max_drawdown_of, sma_series};
use crate::data::{filter_by_date, Interval, Period, PriceSeriesProvider};
use crate::error::{QuantError, Result};
use crate::types::{PriceBar, StrategyParams};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// One day of the crossover computation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalRow {
    pub date: NaiveDate,
    pub close: f64,
    pub fast_ma: Option<f64>,
    pub slow_ma: Option<f64>,
    pub signal: u8,
    /// `signal[t] - signal[t-1]`; `+1` marks an entry, `-1` an exit.
    pub position_change: Option<i8>,
    pub market_return: Option<f64>,
    pub strategy_return: Option<f64>,
}

/// Per-day frame produced by [`compute_signals`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignalFrame {
    pub rows: Vec<SignalRow>,
}

impl SignalFrame {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn market_returns(&self) -> Vec<f64> {
        self.rows.iter().filter_map(|r| r.market_return).collect()
    }

    pub fn strategy_returns(&self) -> Vec<f64> {
        self.rows.iter().filter_map(|r| r.strategy_return).collect()
    }

    /// Number of entries and exits.
    pub fn position_changes(&self) -> usize {
        self.rows
            .iter()
            .filter(|r| matches!(r.position_change, Some(c) if c != 0))
            .count()
    }
}

fn check_params(params: StrategyParams) -> Result<()> {
    if params.fast_window == 0 || params.slow_window == 0 {
        return Err(QuantError::InvalidInput(format!(
            "moving-average windows must be positive, got {}",
            params
        )));
    }
    Ok(())
}

/// 1 where the fast SMA is strictly above the slow SMA, else 0.
pub fn crossover_signals(closes: &[f64], params: StrategyParams) -> Vec<u8> {
    let fast = sma_series(closes, params.fast_window);
    let slow = sma_series(closes, params.slow_window);
    fast.iter()
        .zip(slow.iter())
        .map(|pair| match pair {
            (Some(f), Some(s)) if f > s => 1,
            _ => 0,
        })
        .collect()
}

/// Daily strategy returns for `t = 1..n`, each using the previous day's signal.
pub fn strategy_returns(closes: &[f64], signals: &[u8]) -> Vec<f64> {
    closes
        .windows(2)
        .zip(signals.iter())
        .map(|(w, &prev_signal)| (w[1] / w[0] - 1.0) * prev_signal as f64)
        .collect()
}

/// Sum (not compound) of the strategy's daily returns over `closes`.
///
/// Averages are computed on `closes` alone, so no history outside the slice
/// leaks in.
pub fn summed_strategy_return(closes: &[f64], params: StrategyParams) -> f64 {
    let signals = crossover_signals(closes, params);
    strategy_returns(closes, &signals).iter().sum()
}

/// Full per-day frame for a crossover run over `closes`.
pub fn compute_signals(
    dates: &[NaiveDate],
    closes: &[f64],
    params: StrategyParams,
) -> Result<SignalFrame> {
    check_params(params)?;
    if dates.len() != closes.len() {
        return Err(QuantError::InvalidInput(format!(
            "{} dates for {} closes",
            dates.len(),
            closes.len()
        )));
    }

    let fast = sma_series(closes, params.fast_window);
    let slow = sma_series(closes, params.slow_window);
    let signals = crossover_signals(closes, params);

    let rows = (0..closes.len())
        .map(|t| {
            let market_return = (t > 0).then(|| closes[t] / closes[t - 1] - 1.0);
            SignalRow {
                date: dates[t],
                close: closes[t],
                fast_ma: fast[t],
                slow_ma: slow[t],
                signal: signals[t],
                position_change: (t > 0).then(|| signals[t] as i8 - signals[t - 1] as i8),
                market_return,
                strategy_return: market_return.map(|r| r * signals[t - 1] as f64),
            }
        })
        .collect();

    Ok(SignalFrame { rows })
}

/// Outcome of a single fixed-parameter run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestReport {
    pub symbol: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub params: StrategyParams,
    pub total_return: f64,
    pub buy_and_hold_return: f64,
    pub sharpe_ratio: f64,
    pub max_drawdown: f64,
    pub position_changes: usize,
    pub bars: usize,
}

impl BacktestReport {
    /// Build the report from a computed frame.
    pub fn from_frame(
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
        params: StrategyParams,
        frame: &SignalFrame,
    ) -> Self {
        let strategy = frame.strategy_returns();
        Self {
            symbol: symbol.to_string(),
            start,
            end,
            params,
            total_return: compound(&strategy),
            buy_and_hold_return: compound(&frame.market_returns()),
            sharpe_ratio: annualized_sharpe(&strategy),
            max_drawdown: max_drawdown_of(&strategy),
            position_changes: frame.position_changes(),
            bars: frame.len(),
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "Backtest Results for {} ({} to {}):\n\
             Strategy: MA Crossover ({}/{})\n\
             ------------------------------------------------\n\
             Total Return: {:.2}%\n\
             Buy & Hold Return: {:.2}%\n\
             Sharpe Ratio: {:.2}\n\
             Max Drawdown: {:.2}%\n\
             Position Changes: {} over {} bars",
            self.symbol,
            self.start,
            self.end,
            self.params.fast_window,
            self.params.slow_window,
            self.total_return * 100.0,
            self.buy_and_hold_return * 100.0,
            self.sharpe_ratio,
            self.max_drawdown * 100.0,
            self.position_changes,
            self.bars
        )
    }
}

/// Crossover backtests over a price provider.
pub struct StrategyBacktester<'a> {
    provider: &'a dyn PriceSeriesProvider,
}

impl<'a> StrategyBacktester<'a> {
    pub fn new(provider: &'a dyn PriceSeriesProvider) -> Self {
        Self { provider }
    }

    /// Full daily history for `symbol` restricted to `[start, end]`.
    pub(crate) fn fetch_range(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PriceBar>> {
        if start > end {
            return Err(QuantError::InvalidInput(format!(
                "start date {} is after end date {}",
                start, end
            )));
        }
        let history = self
            .provider
            .fetch_price_series(symbol, Period::Max, Interval::Daily)?;
        if history.is_empty() {
            warn!("Backtest failed: No data for {}", symbol);
            return Err(QuantError::unavailable(symbol, "no data found"));
        }
        let bars = filter_by_date(&history, start, end);
        if bars.len() < 2 {
            warn!("Backtest failed: No data in date range for {}", symbol);
            return Err(QuantError::InsufficientData(format!(
                "{} bars for {} between {} and {}",
                bars.len(),
                symbol,
                start,
                end
            )));
        }
        Ok(bars)
    }

    /// Run the crossover with fixed windows over `[start, end]`.
    pub fn run_backtest(
        &self,
        symbol: &str,
        fast_window: usize,
        slow_window: usize,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<BacktestReport> {
        let params = StrategyParams::new(fast_window, slow_window);
        check_params(params)?;
        info!(
            "Starting backtest for {} (Fast: {}, Slow: {}) from {} to {}",
            symbol, fast_window, slow_window, start, end
        );

        let bars = self.fetch_range(symbol, start, end)?;
        let dates: Vec<NaiveDate> = bars.iter().map(|b| b.date).collect();
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let frame = compute_signals(&dates, &closes, params)?;
        let report = BacktestReport::from_frame(symbol, start, end, params, &frame);

        info!(
            "Backtest completed for {}. Return: {:.2}%",
            symbol,
            report.total_return * 100.0
        );
        Ok(report)
    }
}
