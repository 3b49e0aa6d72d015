//! Monte Carlo projection of the portfolio with correlated Geometric Brownian
//! Motion.
//!
//! Daily log returns are estimated from history, correlated through the lower
//! Cholesky factor of their covariance, projected onto the portfolio weights, and
//! accumulated into index paths starting at 1.0.
//!
//! # Example
//!
//! ```ignore
//! use montewalk::monte_carlo::{MonteCarloConfig, MonteCarloEngine};
//!
//! let engine = MonteCarloEngine::new(MonteCarloConfig::default().with_seed(7));
//! let summary = engine.simulate(&snapshot.weights, &snapshot.closes)?;
//! println!("{}", summary.summary());
//! ```

use crate::account::PositionSource;
use crate::analytics::{mean, percentile, AlignedCloses};
use crate::data::{Period, PriceSeriesProvider};
use crate::error::{QuantError, Result};
use crate::portfolio::PortfolioSnapshot;
use crate::types::PortfolioWeights;
use nalgebra::{DMatrix, DVector};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// A squared pivot at or below this fraction of its diagonal entry is singular.
const PIVOT_TOLERANCE: f64 = 1e-10;

/// Configuration for Monte Carlo simulation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonteCarloConfig {
    /// Number of independent paths.
    pub simulations: usize,
    /// Trading days projected forward.
    pub days: usize,
    /// Random seed for reproducibility (None draws one from the OS).
    pub seed: Option<u64>,
    /// Keep every simulated path in the summary.
    pub keep_paths: bool,
}

impl Default for MonteCarloConfig {
    fn default() -> Self {
        Self {
            simulations: 1000,
            days: 252,
            seed: None,
            keep_paths: false,
        }
    }
}

impl MonteCarloConfig {
    pub fn with_simulations(mut self, n: usize) -> Self {
        self.simulations = n;
        self
    }

    pub fn with_days(mut self, days: usize) -> Self {
        self.days = days;
        self
    }

    /// Set random seed for reproducibility.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_paths(mut self) -> Self {
        self.keep_paths = true;
        self
    }
}

/// Distribution of final portfolio index values across all paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationSummary {
    pub simulations: usize,
    pub days: usize,
    /// Mean final value minus 1.
    pub expected_return: f64,
    /// 5th percentile of final values minus 1.
    pub percentile_5: f64,
    /// 95th percentile of final values minus 1.
    pub percentile_95: f64,
    pub final_values: Vec<f64>,
    /// `paths[sim][day]`, only populated when requested.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub paths: Vec<Vec<f64>>,
}

impl SimulationSummary {
    pub fn summary(&self) -> String {
        format!(
            "Monte Carlo Results ({} sims, {} days) [Log Normal]:\n\
             Expected Return: {:.2}%\n\
             5th Percentile (VaR 95%): {:.2}%\n\
             95th Percentile (Upside): {:.2}%",
            self.simulations,
            self.days,
            self.expected_return * 100.0,
            self.percentile_5 * 100.0,
            self.percentile_95 * 100.0
        )
    }
}

/// Lower Cholesky factor `L` with `L·Lᵀ = Σ`.
///
/// Fails when `Σ` has non-finite entries or is not positive definite.
pub fn cholesky_lower(cov: &DMatrix<f64>) -> Result<DMatrix<f64>> {
    if cov.iter().any(|v| !v.is_finite()) {
        return Err(QuantError::NonPositiveDefiniteCovariance(
            "covariance contains non-finite entries".to_string(),
        ));
    }
    let chol = cov.clone().cholesky().ok_or_else(|| {
        QuantError::NonPositiveDefiniteCovariance(
            "Cholesky factorization failed; insufficient data history".to_string(),
        )
    })?;
    let l = chol.l();
    let degenerate = (0..l.nrows()).find(|&i| {
        let pivot = l[(i, i)];
        !pivot.is_finite() || !(pivot * pivot > cov[(i, i)] * PIVOT_TOLERANCE) || pivot <= 0.0
    });
    if let Some(i) = degenerate {
        return Err(QuantError::NonPositiveDefiniteCovariance(format!(
            "pivot {} of the Cholesky factor is {:e}",
            i,
            l[(i, i)]
        )));
    }
    Ok(l)
}

/// Correlated GBM simulator.
pub struct MonteCarloEngine {
    config: MonteCarloConfig,
}

impl MonteCarloEngine {
    pub fn new(config: MonteCarloConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MonteCarloConfig {
        &self.config
    }

    /// Load the live portfolio and simulate it.
    pub fn simulate_portfolio(
        &self,
        provider: &dyn PriceSeriesProvider,
        positions: &dyn PositionSource,
        lookback: Period,
    ) -> Result<SimulationSummary> {
        let snap = PortfolioSnapshot::load(provider, positions, lookback)?;
        self.simulate(&snap.weights, &snap.closes)
    }

    /// Simulate forward paths for `weights` over the history in `closes`.
    pub fn simulate(
        &self,
        weights: &PortfolioWeights,
        closes: &AlignedCloses,
    ) -> Result<SimulationSummary> {
        let MonteCarloConfig {
            simulations, days, ..
        } = self.config;
        if simulations == 0 || days == 0 {
            return Err(QuantError::InvalidInput(format!(
                "simulations and days must be positive, got {} and {}",
                simulations, days
            )));
        }
        if weights.is_empty() || closes.symbols.is_empty() {
            return Err(QuantError::EmptyPortfolio);
        }

        let w = DVector::from_vec(weights.vector_for(&closes.symbols)?);
        let log_returns = closes.log_returns();
        let n_assets = log_returns.n_assets();
        let observations = log_returns.observations();

        // A sample covariance of T observations has rank at most T - 1.
        if observations <= n_assets {
            return Err(QuantError::NonPositiveDefiniteCovariance(format!(
                "{} log-return observations cannot identify a covariance for {} assets",
                observations, n_assets
            )));
        }

        let mu = DVector::from_vec(log_returns.means());
        let l = cholesky_lower(&log_returns.covariance())?;
        let lt = l.transpose();
        // (z·Lᵀ + μ)·w == z·(Lᵀw) + μ·w
        let drift = w.dot(&mu);
        let loading = &lt * &w;

        debug!(
            "Simulating {} paths x {} days over {} assets ({} observations)",
            simulations, days, n_assets, observations
        );

        let mut rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut final_values = Vec::with_capacity(simulations);
        let mut paths = Vec::new();
        let mut z = DVector::<f64>::zeros(n_assets);

        for _ in 0..simulations {
            let mut cumulative = 0.0;
            let mut path = if self.config.keep_paths {
                Vec::with_capacity(days)
            } else {
                Vec::new()
            };
            for _ in 0..days {
                for zi in z.iter_mut() {
                    *zi = rng.sample(StandardNormal);
                }
                cumulative += drift + z.dot(&loading);
                if self.config.keep_paths {
                    path.push(cumulative.exp());
                }
            }
            final_values.push(cumulative.exp());
            if self.config.keep_paths {
                paths.push(path);
            }
        }

        let summary = SimulationSummary {
            simulations,
            days,
            expected_return: mean(&final_values) - 1.0,
            percentile_5: percentile(&final_values, 5.0).unwrap_or(f64::NAN) - 1.0,
            percentile_95: percentile(&final_values, 95.0).unwrap_or(f64::NAN) - 1.0,
            final_values,
            paths,
        };
        info!(
            "Monte Carlo finished: expected {:.4}, p5 {:.4}, p95 {:.4}",
            summary.expected_return, summary.percentile_5, summary.percentile_95
        );
        Ok(summary)
    }
}
