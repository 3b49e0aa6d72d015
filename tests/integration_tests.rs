//! Integration tests for the analytics engine over CSV price files.

use chrono::NaiveDate;
use montewalk::account::{AccountFile, AccountSnapshot, PositionSource};
use montewalk::backtest::StrategyBacktester;
use montewalk::config::AppConfig;
use montewalk::data::{
    CsvPriceProvider, Interval, Period, PriceSeriesProvider, PriceSource, RetryingProvider,
};
use montewalk::error::{QuantError, Result};
use montewalk::execution::{ExecutionService, OrderTicket, PaperExecutor};
use montewalk::monte_carlo::{MonteCarloConfig, MonteCarloEngine};
use montewalk::optimizer::PortfolioOptimizer;
use montewalk::risk::RiskModel;
use montewalk::trade_gate::TradeRiskGate;
use montewalk::types::{PriceBar, Side};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tempfile::TempDir;

/// Deterministic pseudo-random noise in [-0.5, 0.5).
fn noise(state: &mut u64) -> f64 {
    *state = state
        .wrapping_mul(6364136223846793005)
        .wrapping_add(1442695040888963407);
    ((*state >> 11) as f64 / (1u64 << 53) as f64) - 0.5
}

/// Create synthetic data with a drift and some noise.
fn create_synthetic_data(days: usize, initial_price: f64, drift: f64, seed: u64) -> Vec<PriceBar> {
    let start = NaiveDate::from_ymd_opt(2021, 1, 1).unwrap();
    let mut state = seed;
    let mut price = initial_price;
    (0..days)
        .map(|i| {
            price *= 1.0 + drift + noise(&mut state) * 0.03;
            let open = price * (1.0 + noise(&mut state) * 0.005);
            let high = price.max(open) * 1.01;
            let low = price.min(open) * 0.99;
            PriceBar::new(
                start + chrono::Duration::days(i as i64),
                open,
                high,
                low,
                price,
                1_000_000,
            )
        })
        .collect()
}

fn write_csv(dir: &Path, symbol: &str, bars: &[PriceBar]) {
    let mut content = String::from("Date,Open,High,Low,Close,Volume\n");
    for b in bars {
        content.push_str(&format!(
            "{},{},{},{},{},{}\n",
            b.date, b.open, b.high, b.low, b.close, b.volume
        ));
    }
    fs::write(dir.join(format!("{}.csv", symbol)), content).unwrap();
}

/// Data directory with three uncorrelated-ish symbols and an account file.
fn setup_workspace(days: usize) -> TempDir {
    let dir = TempDir::new().unwrap();
    write_csv(dir.path(), "AAA", &create_synthetic_data(days, 100.0, 0.0008, 1));
    write_csv(dir.path(), "BBB", &create_synthetic_data(days, 50.0, 0.0004, 2));
    write_csv(dir.path(), "CCC", &create_synthetic_data(days, 20.0, -0.0002, 3));
    fs::write(
        dir.path().join("account.json"),
        r#"{"cash": 10000.0, "positions": {"AAA": 10, "BBB": 40, "CCC": 0}}"#,
    )
    .unwrap();
    dir
}

#[test]
fn test_config_wires_csv_provider_and_account() {
    let dir = setup_workspace(120);
    let config_path = dir.path().join("montewalk.toml");
    fs::write(
        &config_path,
        format!(
            "[data]\ndir = {:?}\n\n[retry]\ndelay_ms = 0\n\n[account]\npath = {:?}\n",
            dir.path().display().to_string(),
            dir.path().join("account.json").display().to_string()
        ),
    )
    .unwrap();

    let config = AppConfig::from_file(&config_path).unwrap();
    let provider = config.price_provider();
    let bars = provider
        .fetch_price_series("aaa", Period::Max, Interval::Daily)
        .unwrap();
    assert_eq!(bars.len(), 120);

    let account = config.account_source().fetch_positions().unwrap();
    assert_eq!(account.cash, 10000.0);
    assert_eq!(account.held().count(), 2);
}

#[test]
fn test_portfolio_risk_from_files() {
    let dir = setup_workspace(300);
    let provider = CsvPriceProvider::new(dir.path());
    let account = AccountFile::new(dir.path().join("account.json"));

    let report = RiskModel::new(&provider, &account)
        .with_lookback(Period::Max)
        .report(0.95)
        .unwrap();

    // CCC has zero quantity and is not part of the basket
    assert_eq!(report.weights.len(), 2);
    assert!((report.weights.values().sum::<f64>() - 1.0).abs() < 1e-9);
    assert_eq!(report.observations, 299);
    assert!(report.annualized_volatility > 0.0);
    assert!(report.value_at_risk < 0.0);
    assert!(report.max_drawdown <= 0.0);

    let var_99 = RiskModel::new(&provider, &account)
        .with_lookback(Period::Max)
        .value_at_risk(0.99)
        .unwrap();
    assert!(var_99 <= report.value_at_risk);
}

#[test]
fn test_risk_fails_when_a_held_symbol_has_no_data() {
    let dir = setup_workspace(60);
    let provider = CsvPriceProvider::new(dir.path());
    let account = AccountSnapshot::new(1000.0)
        .with_position("AAA", 1.0)
        .with_position("ZZZ", 1.0);

    let err = RiskModel::new(&provider, &account)
        .with_lookback(Period::Max)
        .annualized_volatility()
        .unwrap_err();
    assert!(matches!(err, QuantError::DataUnavailable { .. }));
}

#[test]
fn test_monte_carlo_from_files_is_reproducible() {
    let dir = setup_workspace(200);
    let provider = CsvPriceProvider::new(dir.path());
    let account = AccountFile::new(dir.path().join("account.json"));

    let engine = MonteCarloEngine::new(
        MonteCarloConfig::default()
            .with_simulations(200)
            .with_days(50)
            .with_seed(42),
    );
    let a = engine
        .simulate_portfolio(&provider, &account, Period::Max)
        .unwrap();
    let b = engine
        .simulate_portfolio(&provider, &account, Period::Max)
        .unwrap();

    assert_eq!(a.final_values, b.final_values);
    assert_eq!(a.final_values.len(), 200);
    assert!(a.percentile_5 <= a.expected_return);
    assert!(a.expected_return <= a.percentile_95);
    assert!(a.final_values.iter().all(|v| *v > 0.0));
}

#[test]
fn test_allocation_from_files() {
    let dir = setup_workspace(300);
    let provider = CsvPriceProvider::new(dir.path());
    let optimizer = PortfolioOptimizer::new(&provider);
    let symbols = vec!["AAA".to_string(), "BBB".to_string(), "CCC".to_string()];

    let mv = optimizer
        .mean_variance_optimize(&symbols, Period::Max)
        .unwrap();
    let total: f64 = mv.all_weights.iter().map(|(_, w)| w).sum();
    assert!((total - 1.0).abs() < 1e-6);
    assert!(mv.all_weights.iter().all(|(_, w)| (0.0..=1.0).contains(&w)));
    assert!(mv.weights.len() <= 3);

    let rp = optimizer.risk_parity(&symbols).unwrap();
    assert_eq!(rp.all_weights.len(), 3);
    assert!((rp.all_weights.total() - 1.0).abs() < 1e-9);
    assert!(rp.summary().contains("Risk Parity"));
}

#[test]
fn test_backtest_and_walk_forward_from_files() {
    let dir = setup_workspace(500);
    let provider = CsvPriceProvider::new(dir.path());
    let bt = StrategyBacktester::new(&provider);
    let start = NaiveDate::from_ymd_opt(2021, 1, 1).unwrap();
    let end = NaiveDate::from_ymd_opt(2022, 12, 31).unwrap();

    let report = bt.run_backtest("AAA", 10, 50, start, end).unwrap();
    assert_eq!(report.bars, 500);
    assert!(report.max_drawdown <= 0.0);
    assert!(report.total_return > -1.0);

    let wf = bt.walk_forward_analysis("AAA", start, end, 12, 3).unwrap();
    // 500 bars, train 252, test 63: starts 0, 63, 126
    assert_eq!(wf.windows.len(), 3);
    for pair in wf.windows.windows(2) {
        assert!(pair[0].window.test_end < pair[1].window.test_start);
    }
    for w in &wf.windows {
        assert!(w.params.fast_window < w.params.slow_window);
        assert_eq!(w.window.train_bars, 252);
        assert_eq!(w.window.test_bars, 63);
    }
    let sum: f64 = wf.windows.iter().map(|w| w.test_return).sum();
    assert!((wf.total_test_return - sum).abs() < 1e-12);
}

#[test]
fn test_gated_execution_against_account_file() {
    let dir = setup_workspace(30);
    let provider = CsvPriceProvider::new(dir.path());
    let account = AccountFile::new(dir.path().join("account.json"));
    let executor = PaperExecutor::new();
    let service = ExecutionService::new(&provider, TradeRiskGate::new(&account), &executor);

    let price = provider.fetch_latest_price("AAA").unwrap();
    let affordable = (5000.0 / price).floor();
    assert!(service
        .place_order(&OrderTicket::market("AAA", Side::Buy, affordable))
        .is_ok());

    let err = service
        .place_order(&OrderTicket::market("AAA", Side::Buy, affordable * 2.0 + 1.0))
        .unwrap_err();
    assert!(err.to_string().starts_with("Risk Rejection: Trade value"));
    assert_eq!(executor.submitted().len(), 1);

    // Updated cash is picked up on the next call
    fs::write(
        dir.path().join("account.json"),
        r#"{"cash": 1000000.0, "positions": {}}"#,
    )
    .unwrap();
    assert!(service
        .place_order(&OrderTicket::market("AAA", Side::Buy, affordable * 2.0 + 1.0))
        .is_ok());
}

/// Provider that fails a fixed number of times before delegating.
struct Flaky {
    inner: CsvPriceProvider,
    failures_left: AtomicU32,
}

impl PriceSeriesProvider for Flaky {
    fn fetch_price_series(
        &self,
        symbol: &str,
        period: Period,
        interval: Interval,
    ) -> Result<Vec<PriceBar>> {
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(QuantError::unavailable(symbol, "connection reset"));
        }
        self.inner.fetch_price_series(symbol, period, interval)
    }
}

#[test]
fn test_retry_recovers_within_attempt_budget() {
    let dir = setup_workspace(40);
    let flaky = Flaky {
        inner: CsvPriceProvider::new(dir.path()),
        failures_left: AtomicU32::new(2),
    };
    let provider = RetryingProvider::new(flaky, 3, Duration::ZERO);
    let bars = provider
        .fetch_price_series("BBB", Period::Max, Interval::Daily)
        .unwrap();
    assert_eq!(bars.len(), 40);
}

#[test]
fn test_retry_gives_up_after_attempt_budget() {
    let dir = setup_workspace(40);
    let flaky = Flaky {
        inner: CsvPriceProvider::new(dir.path()),
        failures_left: AtomicU32::new(3),
    };
    let provider = RetryingProvider::new(flaky, 3, Duration::ZERO);
    let err = provider
        .fetch_price_series("BBB", Period::Max, Interval::Daily)
        .unwrap_err();
    assert!(err.to_string().contains("failed after 3 attempts"));
}
