//! MonteWalk - quantitative risk and portfolio analytics.
//!
//! # Overview
//!
//! MonteWalk turns a live portfolio and historical prices into risk and
//! allocation figures:
//!
//! - **Risk**: annualized covariance volatility, historical Value-at-Risk and
//!   maximum drawdown of the current holdings
//! - **Monte Carlo**: correlated log-normal portfolio paths via a Cholesky factor
//! - **Allocation**: maximum-Sharpe mean-variance weights and inverse-volatility
//!   risk parity
//! - **Backtesting**: moving-average crossover runs and walk-forward
//!   re-optimization
//! - **Trade gate**: synchronous pre-trade checks against live cash
//!
//! Prices, positions and order submission are reached through the
//! [`PriceSeriesProvider`], [`PriceSource`], [`PositionSource`] and
//! [`OrderExecutor`] traits, so every service can run against test doubles.
//!
//! # Quick Start
//!
//! ```no_run
//! use montewalk::{
//!     account::AccountFile,
//!     data::{CsvPriceProvider, Period},
//!     risk::RiskModel,
//! };
//!
//! let prices = CsvPriceProvider::new("data");
//! let account = AccountFile::new("account.json");
//!
//! let report = RiskModel::new(&prices, &account)
//!     .with_lookback(Period::OneYear)
//!     .report(0.95)
//!     .unwrap();
//! println!("{}", report.summary());
//! ```
//!
//! # Backtesting
//!
//! ```no_run
//! use chrono::NaiveDate;
//! use montewalk::{backtest::StrategyBacktester, data::CsvPriceProvider};
//!
//! let prices = CsvPriceProvider::new("data");
//! let bt = StrategyBacktester::new(&prices);
//! let start = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
//! let end = NaiveDate::from_ymd_opt(2023, 12, 31).unwrap();
//!
//! let report = bt.run_backtest("SPY", 50, 200, start, end).unwrap();
//! println!("Return: {:.2}%", report.total_return * 100.0);
//!
//! let wf = bt.walk_forward_analysis("SPY", start, end, 12, 3).unwrap();
//! println!("{}", wf.summary());
//! ```
//!
//! # Modules
//!
//! - [`types`]: Core data types (PriceBar, Side, StrategyParams, PortfolioWeights)
//! - [`data`]: Price providers, CSV loading, retry policy
//! - [`account`]: Cash and position snapshots
//! - [`analytics`]: Alignment, returns, covariance and shared statistics
//! - [`portfolio`]: Value weights for the live portfolio
//! - [`risk`]: Volatility, VaR and drawdown
//! - [`monte_carlo`]: Correlated path simulation
//! - [`optimizer`]: Mean-variance and risk-parity allocation
//! - [`backtest`]: Moving-average crossover backtests
//! - [`walkforward`]: Walk-forward analysis
//! - [`trade_gate`]: Pre-trade risk checks
//! - [`execution`]: Gated order submission
//! - [`audit`]: Agent action audit log
//! - [`config`]: TOML configuration file support

pub mod account;
pub mod analytics;
pub mod audit;
pub mod backtest;
pub mod config;
pub mod data;
pub mod error;
pub mod execution;
pub mod monte_carlo;
pub mod optimizer;
pub mod portfolio;
pub mod risk;
pub mod trade_gate;
pub mod types;
pub mod walkforward;

// Re-exports for convenience
pub use account::{AccountFile, AccountSnapshot, PositionSource};
pub use backtest::{BacktestReport, SignalFrame, StrategyBacktester};
pub use config::AppConfig;
pub use data::{
    CsvPriceProvider, InMemoryProvider, Interval, Period, PriceSeriesProvider, PriceSource,
    RetryingProvider,
};
pub use error::{QuantError, Result};
pub use execution::{ExecutionService, OrderExecutor, OrderTicket};
pub use monte_carlo::{MonteCarloConfig, MonteCarloEngine, SimulationSummary};
pub use optimizer::{OptimizationResult, PortfolioOptimizer};
pub use portfolio::PortfolioSnapshot;
pub use risk::{RiskModel, RiskReport};
pub use trade_gate::{TradeRejection, TradeRiskGate};
pub use types::{PortfolioWeights, PriceBar, Side, StrategyParams};
pub use walkforward::{BacktestWindow, WalkForwardReport};
