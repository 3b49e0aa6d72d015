//! Configuration file support.
//!
//! Every section and field is optional; missing values fall back to the
//! defaults below.

use crate::account::AccountFile;
use crate::data::{CsvPriceProvider, Period, RetryingProvider};
use crate::error::{QuantError, Result};
use crate::monte_carlo::MonteCarloConfig;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Complete application configuration loaded from a file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub data: DataSettings,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub account: AccountSettings,
    #[serde(default)]
    pub risk: RiskSettings,
    #[serde(default)]
    pub monte_carlo: MonteCarloSettings,
    #[serde(default)]
    pub backtest: BacktestSettings,
}

/// Price data settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSettings {
    /// Directory holding one `<SYMBOL>.csv` per symbol.
    #[serde(default = "default_data_dir")]
    pub dir: PathBuf,
    /// Date format in CSV (auto-detected when absent).
    #[serde(default)]
    pub date_format: Option<String>,
}

fn default_data_dir() -> PathBuf { PathBuf::from("data") }

impl Default for DataSettings {
    fn default() -> Self {
        Self {
            dir: default_data_dir(),
            date_format: None,
        }
    }
}

/// Retry policy for price fetches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    /// Fixed delay between attempts.
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
}

fn default_attempts() -> u32 { 3 }
fn default_delay_ms() -> u64 { 2000 }

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            delay_ms: default_delay_ms(),
        }
    }
}

/// Account snapshot location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSettings {
    #[serde(default = "default_account_path")]
    pub path: PathBuf,
}

fn default_account_path() -> PathBuf { PathBuf::from("account.json") }

impl Default for AccountSettings {
    fn default() -> Self {
        Self {
            path: default_account_path(),
        }
    }
}

/// Risk model and trade gate settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskSettings {
    #[serde(default = "default_confidence")]
    pub var_confidence: f64,
    #[serde(default)]
    pub lookback: Period,
    /// Largest single buy as a fraction of available cash.
    #[serde(default = "default_max_cash_fraction")]
    pub max_cash_fraction: f64,
}

fn default_confidence() -> f64 { 0.95 }
fn default_max_cash_fraction() -> f64 { 0.5 }

impl Default for RiskSettings {
    fn default() -> Self {
        Self {
            var_confidence: default_confidence(),
            lookback: Period::default(),
            max_cash_fraction: default_max_cash_fraction(),
        }
    }
}

/// Monte Carlo settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonteCarloSettings {
    #[serde(default = "default_simulations")]
    pub simulations: usize,
    #[serde(default = "default_days")]
    pub days: usize,
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_simulations() -> usize { 1000 }
fn default_days() -> usize { 252 }

impl Default for MonteCarloSettings {
    fn default() -> Self {
        Self {
            simulations: default_simulations(),
            days: default_days(),
            seed: None,
        }
    }
}

/// Backtest and walk-forward defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestSettings {
    #[serde(default = "default_start")]
    pub start: NaiveDate,
    #[serde(default = "default_end")]
    pub end: NaiveDate,
    #[serde(default = "default_train_months")]
    pub train_months: usize,
    #[serde(default = "default_test_months")]
    pub test_months: usize,
}

fn default_start() -> NaiveDate {
    NaiveDate::from_ymd_opt(2020, 1, 1).unwrap_or(NaiveDate::MIN)
}
fn default_end() -> NaiveDate {
    NaiveDate::from_ymd_opt(2023, 12, 31).unwrap_or(NaiveDate::MIN)
}
fn default_train_months() -> usize { 12 }
fn default_test_months() -> usize { 3 }

impl Default for BacktestSettings {
    fn default() -> Self {
        Self {
            start: default_start(),
            end: default_end(),
            train_months: default_train_months(),
            test_months: default_test_months(),
        }
    }
}

impl AppConfig {
    /// Load and validate configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        let content = fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| QuantError::ConfigError(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let c = self.risk.var_confidence;
        if !(c > 0.0 && c < 1.0) {
            return Err(QuantError::ConfigError(format!(
                "risk.var_confidence must be in (0, 1), got {}",
                c
            )));
        }
        let f = self.risk.max_cash_fraction;
        if !(f > 0.0 && f <= 1.0) {
            return Err(QuantError::ConfigError(format!(
                "risk.max_cash_fraction must be in (0, 1], got {}",
                f
            )));
        }
        if self.retry.attempts == 0 {
            return Err(QuantError::ConfigError(
                "retry.attempts must be at least 1".to_string(),
            ));
        }
        if self.monte_carlo.simulations == 0 || self.monte_carlo.days == 0 {
            return Err(QuantError::ConfigError(
                "monte_carlo.simulations and monte_carlo.days must be positive".to_string(),
            ));
        }
        if self.backtest.train_months == 0 || self.backtest.test_months == 0 {
            return Err(QuantError::ConfigError(
                "backtest.train_months and backtest.test_months must be positive".to_string(),
            ));
        }
        if self.backtest.start > self.backtest.end {
            return Err(QuantError::ConfigError(format!(
                "backtest.start {} is after backtest.end {}",
                self.backtest.start, self.backtest.end
            )));
        }
        Ok(())
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry.delay_ms)
    }

    /// CSV provider wrapped in the configured retry policy.
    pub fn price_provider(&self) -> RetryingProvider<CsvPriceProvider> {
        let mut csv = CsvPriceProvider::new(&self.data.dir);
        if let Some(format) = &self.data.date_format {
            csv = csv.with_date_format(format.clone());
        }
        RetryingProvider::new(csv, self.retry.attempts, self.retry_delay())
    }

    pub fn account_source(&self) -> AccountFile {
        AccountFile::new(&self.account.path)
    }

    pub fn monte_carlo_config(&self) -> MonteCarloConfig {
        let config = MonteCarloConfig::default()
            .with_simulations(self.monte_carlo.simulations)
            .with_days(self.monte_carlo.days);
        match self.monte_carlo.seed {
            Some(seed) => config.with_seed(seed),
            None => config,
        }
    }

    /// Generate an example configuration file content.
    pub fn example_toml() -> String {
        r#"# montewalk configuration

[data]
dir = "data"              # one <SYMBOL>.csv per symbol
# date_format = "%Y-%m-%d"

[retry]
attempts = 3
delay_ms = 2000

[account]
path = "account.json"     # {"cash": 10000.0, "positions": {"AAPL": 10}}

[risk]
var_confidence = 0.95
lookback = "1y"           # 1mo, 3mo, 6mo, 1y, 2y, 5y, 10y, ytd, max
max_cash_fraction = 0.5   # largest single buy vs. available cash

[monte_carlo]
simulations = 1000
days = 252
# seed = 42

[backtest]
start = "2020-01-01"
end = "2023-12-31"
train_months = 12
test_months = 3
"#
        .to_string()
    }
}
