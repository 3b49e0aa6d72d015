//! Command-line interface for the analytics engine.

use montewalk::audit::log_action;
use montewalk::backtest::StrategyBacktester;
use montewalk::config::AppConfig;
use montewalk::data::{Period, PriceSource};
use montewalk::error::Result;
use montewalk::monte_carlo::MonteCarloEngine;
use montewalk::optimizer::PortfolioOptimizer;
use montewalk::risk::RiskModel;
use montewalk::trade_gate::TradeRiskGate;
use montewalk::types::Side;

use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::fs;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// MonteWalk - portfolio risk, simulation, allocation and strategy analytics.
#[derive(Parser)]
#[command(name = "montewalk")]
#[command(version)]
#[command(about = "Quantitative risk and portfolio analytics")]
#[command(long_about = None)]
pub struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text", global = true)]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Volatility, VaR and drawdown of the current portfolio
    Risk {
        /// VaR confidence level
        #[arg(long)]
        confidence: Option<f64>,

        /// History window (1mo, 3mo, 6mo, 1y, 2y, 5y, 10y, ytd, max)
        #[arg(short, long)]
        lookback: Option<Period>,
    },

    /// Historical daily Value-at-Risk of the current portfolio
    Var {
        #[arg(long)]
        confidence: Option<f64>,

        #[arg(short, long)]
        lookback: Option<Period>,
    },

    /// Maximum drawdown of the current portfolio
    Drawdown {
        #[arg(short, long)]
        lookback: Option<Period>,
    },

    /// Simulate correlated future portfolio paths
    MonteCarlo {
        /// Number of paths
        #[arg(short = 'n', long)]
        simulations: Option<usize>,

        /// Trading days to project
        #[arg(short, long)]
        days: Option<usize>,

        /// Random seed
        #[arg(long)]
        seed: Option<u64>,

        #[arg(short, long)]
        lookback: Option<Period>,
    },

    /// Maximum-Sharpe allocation across symbols
    Optimize {
        #[arg(required = true, num_args = 1..)]
        symbols: Vec<String>,

        #[arg(short, long, default_value = "1y")]
        lookback: Period,
    },

    /// Inverse-volatility weights across symbols
    RiskParity {
        #[arg(required = true, num_args = 1..)]
        symbols: Vec<String>,
    },

    /// Backtest a moving-average crossover
    Backtest {
        symbol: String,

        /// Fast moving-average window
        #[arg(long, default_value = "50")]
        fast: usize,

        /// Slow moving-average window
        #[arg(long, default_value = "200")]
        slow: usize,

        /// Start date (YYYY-MM-DD)
        #[arg(long)]
        start: Option<NaiveDate>,

        /// End date (YYYY-MM-DD)
        #[arg(long)]
        end: Option<NaiveDate>,
    },

    /// Walk-forward analysis of the crossover parameter grid
    WalkForward {
        symbol: String,

        #[arg(long)]
        start: Option<NaiveDate>,

        #[arg(long)]
        end: Option<NaiveDate>,

        #[arg(long)]
        train_months: Option<usize>,

        #[arg(long)]
        test_months: Option<usize>,
    },

    /// Check a proposed trade against the risk gate
    ValidateTrade {
        symbol: String,

        /// buy or sell
        side: Side,

        quantity: f64,

        /// Price to check against (latest close when omitted)
        #[arg(short, long)]
        price: Option<f64>,
    },

    /// Create an example configuration file
    Init {
        /// Destination file
        #[arg(short = 'f', long = "file", default_value = "montewalk.toml")]
        path: PathBuf,
    },

    /// Record an agent action in the audit log
    Log {
        /// Category, e.g. REASONING or TRADE_DECISION
        action_type: String,

        details: String,
    },
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

impl Cli {
    /// Initialize logging based on verbosity level.
    pub fn init_logging(&self) {
        let level = match self.verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            2 => Level::DEBUG,
            _ => Level::TRACE,
        };

        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .with_target(false)
            .with_writer(std::io::stderr)
            .finish();

        if tracing::subscriber::set_global_default(subscriber).is_err() {
            eprintln!("Logging already initialized");
        }
    }

    fn load_config(&self) -> Result<AppConfig> {
        match &self.config {
            Some(path) => AppConfig::from_file(path),
            None => Ok(AppConfig::default()),
        }
    }
}

fn emit<T: Serialize>(output: OutputFormat, value: &T, text: impl FnOnce(&T) -> String) -> Result<()> {
    match output {
        OutputFormat::Text => println!("{}", text(value)),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
    }
    Ok(())
}

fn upper(symbols: &[String]) -> Vec<String> {
    symbols.iter().map(|s| s.trim().to_uppercase()).collect()
}

/// Run the CLI application.
pub fn run() -> Result<()> {
    let cli = Cli::parse();
    cli.init_logging();

    if let Commands::Init { path } = &cli.command {
        return init_config(path);
    }
    if let Commands::Log {
        action_type,
        details,
    } = &cli.command
    {
        println!("{}", log_action(action_type, details));
        return Ok(());
    }

    let config = cli.load_config()?;
    let provider = config.price_provider();
    let account = config.account_source();

    match &cli.command {
        Commands::Risk {
            confidence,
            lookback,
        } => {
            let model = RiskModel::new(&provider, &account)
                .with_lookback(lookback.unwrap_or(config.risk.lookback));
            let report = model.report(confidence.unwrap_or(config.risk.var_confidence))?;
            emit(cli.output, &report, |r| r.summary())
        }

        Commands::Var {
            confidence,
            lookback,
        } => {
            let confidence = confidence.unwrap_or(config.risk.var_confidence);
            let var = RiskModel::new(&provider, &account)
                .with_lookback(lookback.unwrap_or(config.risk.lookback))
                .value_at_risk(confidence)?;
            emit(cli.output, &var, |v| {
                format!("Daily VaR ({:.0}%): {:.2}%", confidence * 100.0, v * 100.0)
            })
        }

        Commands::Drawdown { lookback } => {
            let dd = RiskModel::new(&provider, &account)
                .with_lookback(lookback.unwrap_or(config.risk.lookback))
                .max_drawdown()?;
            emit(cli.output, &dd, |d| format!("Maximum Drawdown: {:.2}%", d * 100.0))
        }

        Commands::MonteCarlo {
            simulations,
            days,
            seed,
            lookback,
        } => {
            let mut mc = config.monte_carlo_config();
            if let Some(n) = simulations {
                mc = mc.with_simulations(*n);
            }
            if let Some(d) = days {
                mc = mc.with_days(*d);
            }
            if let Some(s) = seed {
                mc = mc.with_seed(*s);
            }
            let engine = MonteCarloEngine::new(mc);
            let summary = engine.simulate_portfolio(
                &provider,
                &account,
                lookback.unwrap_or(config.risk.lookback),
            )?;
            emit(cli.output, &summary, |s| s.summary())
        }

        Commands::Optimize { symbols, lookback } => {
            let result =
                PortfolioOptimizer::new(&provider).mean_variance_optimize(&upper(symbols), *lookback)?;
            emit(cli.output, &result, |r| r.summary())
        }

        Commands::RiskParity { symbols } => {
            let result = PortfolioOptimizer::new(&provider).risk_parity(&upper(symbols))?;
            emit(cli.output, &result, |r| r.summary())
        }

        Commands::Backtest {
            symbol,
            fast,
            slow,
            start,
            end,
        } => {
            let report = StrategyBacktester::new(&provider).run_backtest(
                &symbol.to_uppercase(),
                *fast,
                *slow,
                start.unwrap_or(config.backtest.start),
                end.unwrap_or(config.backtest.end),
            )?;
            emit(cli.output, &report, |r| r.summary())
        }

        Commands::WalkForward {
            symbol,
            start,
            end,
            train_months,
            test_months,
        } => {
            let report = StrategyBacktester::new(&provider).walk_forward_analysis(
                &symbol.to_uppercase(),
                start.unwrap_or(config.backtest.start),
                end.unwrap_or(config.backtest.end),
                train_months.unwrap_or(config.backtest.train_months),
                test_months.unwrap_or(config.backtest.test_months),
            )?;
            emit(cli.output, &report, |r| r.summary())
        }

        Commands::ValidateTrade {
            symbol,
            side,
            quantity,
            price,
        } => {
            let symbol = symbol.to_uppercase();
            let price = match price {
                Some(p) => *p,
                None => provider.fetch_latest_price(&symbol)?,
            };
            let gate =
                TradeRiskGate::new(&account).with_max_cash_fraction(config.risk.max_cash_fraction);
            let rejection = gate.validate_trade(&symbol, *side, *quantity, price);
            let verdict = serde_json::json!({
                "symbol": symbol,
                "side": side,
                "quantity": quantity,
                "price": price,
                "allowed": rejection.is_none(),
                "rejection": rejection.as_ref().map(|r| r.to_string()),
            });
            emit(cli.output, &verdict, |_| match &rejection {
                Some(r) => format!("Risk Rejection: {}", r),
                None => format!("Trade permitted: {} {} {} @ {:.2}", side, quantity, symbol, price),
            })
        }

        Commands::Init { .. } | Commands::Log { .. } => Ok(()),
    }
}

fn init_config(output: &PathBuf) -> Result<()> {
    fs::write(output, AppConfig::example_toml())?;
    info!("Wrote example configuration to {}", output.display());
    println!("Created example configuration file: {}", output.display());
    println!("\nEdit this file, then run e.g.:");
    println!("  montewalk -c {} risk", output.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse() {
        let cli = Cli::try_parse_from([
            "montewalk",
            "backtest",
            "SPY",
            "--fast",
            "20",
            "--slow",
            "100",
            "--start",
            "2021-01-01",
        ]);
        assert!(cli.is_ok());
    }

    #[test]
    fn test_optimize_requires_symbols() {
        assert!(Cli::try_parse_from(["montewalk", "optimize"]).is_err());
        let cli = Cli::try_parse_from(["montewalk", "optimize", "AAPL", "MSFT", "-l", "2y"]);
        assert!(cli.is_ok());
    }

    #[test]
    fn test_validate_trade_parses_side() {
        let cli = Cli::try_parse_from(["montewalk", "validate-trade", "AAPL", "buy", "10"]);
        assert!(cli.is_ok());
        assert!(Cli::try_parse_from(["montewalk", "validate-trade", "AAPL", "hold", "10"]).is_err());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["montewalk", "risk", "-o", "json", "-vv"]).unwrap();
        assert!(matches!(cli.output, OutputFormat::Json));
        assert_eq!(cli.verbose, 2);
    }
}
