//! Portfolio allocation: maximum-Sharpe mean-variance and inverse-volatility
//! risk parity.

use crate::analytics::{AlignedCloses, ReturnMatrix};
use crate::data::{Period, PriceSeriesProvider};
use crate::error::{QuantError, Result};
use crate::portfolio::fetch_all;
use crate::types::{PortfolioWeights, TRADING_DAYS_PER_YEAR};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, error, info, warn};

/// Allocations at or below this are optimizer noise and are not displayed.
pub const DISPLAY_THRESHOLD: f64 = 0.01;

/// Volatility below this is penalized in the Sharpe objective.
pub const MIN_VOLATILITY: f64 = 1e-6;

/// Objective value assigned to near-zero-volatility allocations.
const VOLATILITY_PENALTY: f64 = 1e10;

const MAX_ITERATIONS: usize = 1000;

/// Allocation method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptimizationMethod {
    MaximumSharpe,
    InverseVolatility,
}

/// Outcome of an allocation call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub method: OptimizationMethod,
    /// Allocations shown to the user.
    pub weights: PortfolioWeights,
    /// Every allocation, summing to 1.
    pub all_weights: PortfolioWeights,
    /// Annualized expected return.
    pub expected_return: f64,
    /// Annualized volatility.
    pub expected_volatility: f64,
    pub sharpe_ratio: f64,
}

impl OptimizationResult {
    pub fn summary(&self) -> String {
        let allocation = self
            .weights
            .iter()
            .map(|(s, w)| format!("  {}: {:.4}", s, w))
            .collect::<Vec<_>>()
            .join("\n");
        let title = match self.method {
            OptimizationMethod::MaximumSharpe => "Optimal Allocation (Max Sharpe)",
            OptimizationMethod::InverseVolatility => "Risk Parity Weights (Inverse Volatility)",
        };
        format!(
            "{}:\n{}\n\n\
             Expected Annual Return: {:.2}%\n\
             Expected Volatility: {:.2}%\n\
             Sharpe Ratio: {:.2}",
            title,
            allocation,
            self.expected_return * 100.0,
            self.expected_volatility * 100.0,
            self.sharpe_ratio
        )
    }
}

/// Mean-variance model over annualized estimates.
#[derive(Debug, Clone)]
pub struct MeanVarianceOptimizer {
    symbols: Vec<String>,
    expected_returns: DVector<f64>,
    covariance: DMatrix<f64>,
}

impl MeanVarianceOptimizer {
    /// Create a new optimizer with expected returns and covariance matrix.
    pub fn new(
        symbols: Vec<String>,
        expected_returns: Vec<f64>,
        covariance: DMatrix<f64>,
    ) -> Result<Self> {
        let n = symbols.len();
        if n == 0 {
            return Err(QuantError::InvalidInput(
                "need at least one symbol".to_string(),
            ));
        }
        if expected_returns.len() != n {
            return Err(QuantError::InvalidInput(
                "expected returns length must match number of symbols".to_string(),
            ));
        }
        if covariance.nrows() != n || covariance.ncols() != n {
            return Err(QuantError::InvalidInput(
                "covariance matrix must be square and match number of symbols".to_string(),
            ));
        }
        Ok(Self {
            symbols,
            expected_returns: DVector::from_vec(expected_returns),
            covariance,
        })
    }

    /// Annualize daily mean returns and covariance (both x252).
    pub fn from_returns(returns: &ReturnMatrix) -> Result<Self> {
        let expected = returns
            .means()
            .into_iter()
            .map(|m| m * TRADING_DAYS_PER_YEAR)
            .collect();
        Self::new(
            returns.symbols.clone(),
            expected,
            returns.annualized_covariance(),
        )
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn portfolio_return(&self, weights: &[f64]) -> f64 {
        self.expected_returns.dot(&DVector::from_column_slice(weights))
    }

    pub fn portfolio_volatility(&self, weights: &[f64]) -> f64 {
        let w = DVector::from_column_slice(weights);
        w.dot(&(&self.covariance * &w)).max(0.0).sqrt()
    }

    /// `-(wᵀμ) / sqrt(wᵀΣw)`, penalized when volatility is below [`MIN_VOLATILITY`].
    pub fn negative_sharpe(&self, weights: &[f64]) -> f64 {
        let vol = self.portfolio_volatility(weights);
        if vol < MIN_VOLATILITY {
            return VOLATILITY_PENALTY;
        }
        -self.portfolio_return(weights) / vol
    }

    /// Realized Sharpe at `weights`, zero when volatility is negligible.
    pub fn sharpe_ratio(&self, weights: &[f64]) -> f64 {
        let vol = self.portfolio_volatility(weights);
        if vol < MIN_VOLATILITY {
            0.0
        } else {
            self.portfolio_return(weights) / vol
        }
    }

    /// Long-only, fully-invested weights maximizing the Sharpe ratio.
    ///
    /// When some asset has a positive expected return the problem is solved
    /// exactly through the convex reformulation
    /// `min yᵀΣy  s.t.  μᵀy = 1, y >= 0`, with `w = y / Σy`. Otherwise a
    /// projected-gradient search starts from equal weights.
    pub fn maximum_sharpe_ratio(&self) -> Result<Vec<f64>> {
        let n = self.symbols.len();
        if n == 1 {
            return Ok(vec![1.0]);
        }
        let raw = if self.expected_returns.iter().any(|&r| r > 0.0) {
            self.solve_conic()?
        } else {
            warn!("No asset has a positive expected return, searching from equal weights");
            self.search_projected_gradient()?
        };
        normalize_long_only(&raw)
    }

    fn solve_conic(&self) -> Result<Vec<f64>> {
        use clarabel::algebra::*;
        use clarabel::solver::*;

        let n = self.symbols.len();

        // P: upper triangle of Σ in CSC format
        let mut p_data = Vec::new();
        let mut p_indices = Vec::new();
        let mut p_indptr = vec![0];
        for j in 0..n {
            for i in 0..=j {
                let val = self.covariance[(i, j)];
                if val != 0.0 {
                    p_data.push(val);
                    p_indices.push(i);
                }
            }
            p_indptr.push(p_data.len());
        }
        let p = CscMatrix::new(n, n, p_indptr, p_indices, p_data);
        let q = vec![0.0; n];

        // Constraints: μ'y = 1 (zero cone), -y <= 0 (nonnegative cone)
        let mut a_data = Vec::new();
        let mut a_indices = Vec::new();
        let mut a_indptr = vec![0];
        for j in 0..n {
            a_data.push(self.expected_returns[j]);
            a_indices.push(0);

            a_data.push(-1.0);
            a_indices.push(1 + j);

            a_indptr.push(a_data.len());
        }
        let a = CscMatrix::new(1 + n, n, a_indptr, a_indices, a_data);

        let mut b = vec![1.0];
        b.extend(vec![0.0; n]);

        let cones = [ZeroConeT(1), NonnegativeConeT(n)];

        let settings = DefaultSettingsBuilder::default()
            .max_iter(200)
            .verbose(false)
            .build()
            .map_err(|e| {
                QuantError::OptimizationDidNotConverge(format!("failed to build settings: {}", e))
            })?;

        let mut solver = DefaultSolver::new(&p, &q, &a, &b, &cones, settings).map_err(|e| {
            QuantError::OptimizationDidNotConverge(format!("failed to create solver: {:?}", e))
        })?;

        solver.solve();

        let status = solver.solution.status;
        debug!("Max Sharpe solver status: {:?}", status);
        if !matches!(status, SolverStatus::Solved | SolverStatus::AlmostSolved) {
            return Err(QuantError::OptimizationDidNotConverge(format!(
                "solver status {:?}",
                status
            )));
        }

        Ok(solver.solution.x.clone())
    }

    fn negative_sharpe_gradient(&self, weights: &[f64]) -> DVector<f64> {
        let w = DVector::from_column_slice(weights);
        let sigma_w = &self.covariance * &w;
        let vol = w.dot(&sigma_w).max(0.0).sqrt();
        if vol < MIN_VOLATILITY {
            return DVector::zeros(weights.len());
        }
        let ret = self.expected_returns.dot(&w);
        -(&self.expected_returns / vol - sigma_w * (ret / vol.powi(3)))
    }

    fn search_projected_gradient(&self) -> Result<Vec<f64>> {
        let n = self.symbols.len();
        let mut w = vec![1.0 / n as f64; n];
        let mut f = self.negative_sharpe(&w);

        for iteration in 0..MAX_ITERATIONS {
            let g = self.negative_sharpe_gradient(&w);
            let mut step = 1.0;
            let mut accepted = None;
            for _ in 0..60 {
                let trial: Vec<f64> = w.iter().zip(g.iter()).map(|(wi, gi)| wi - step * gi).collect();
                let candidate = project_to_simplex(&trial);
                let fc = self.negative_sharpe(&candidate);
                if fc < f {
                    accepted = Some((candidate, fc));
                    break;
                }
                step *= 0.5;
            }

            let Some((candidate, fc)) = accepted else {
                debug!("Projected gradient stationary after {} iterations", iteration);
                return Ok(w);
            };
            let moved = w
                .iter()
                .zip(candidate.iter())
                .map(|(a, b)| (a - b).abs())
                .fold(0.0, f64::max);
            let improvement = f - fc;
            w = candidate;
            f = fc;
            if moved < 1e-10 || improvement < 1e-14 {
                debug!("Projected gradient converged after {} iterations", iteration + 1);
                return Ok(w);
            }
        }

        Err(QuantError::OptimizationDidNotConverge(format!(
            "iteration limit reached ({} iterations)",
            MAX_ITERATIONS
        )))
    }
}

/// Euclidean projection onto `{w : w >= 0, Σw = 1}`.
pub fn project_to_simplex(v: &[f64]) -> Vec<f64> {
    let mut u = v.to_vec();
    u.sort_by(|a, b| b.total_cmp(a));
    let mut cumulative = 0.0;
    let mut theta = 0.0;
    for (i, ui) in u.iter().enumerate() {
        cumulative += ui;
        let t = (cumulative - 1.0) / (i + 1) as f64;
        if ui - t > 0.0 {
            theta = t;
        }
    }
    v.iter().map(|x| (x - theta).max(0.0)).collect()
}

/// Clip at zero and rescale to sum to one.
fn normalize_long_only(raw: &[f64]) -> Result<Vec<f64>> {
    let clipped: Vec<f64> = raw.iter().map(|w| w.max(0.0)).collect();
    let total: f64 = clipped.iter().sum();
    if !(total > 0.0) || !total.is_finite() {
        return Err(QuantError::OptimizationDidNotConverge(format!(
            "solver returned degenerate weights (sum {})",
            total
        )));
    }
    Ok(clipped.into_iter().map(|w| w / total).collect())
}

/// `w_i ∝ 1 / σ_i`, normalized to sum to one.
pub fn inverse_volatility_weights(returns: &ReturnMatrix) -> Result<Vec<f64>> {
    if returns.observations() < 2 {
        return Err(QuantError::InsufficientData(format!(
            "need at least 2 aligned return observations, have {}",
            returns.observations()
        )));
    }
    let stds = returns.std_devs();
    if let Some((symbol, sd)) = returns
        .symbols
        .iter()
        .zip(stds.iter())
        .find(|(_, sd)| !(**sd > 0.0) || !sd.is_finite())
    {
        return Err(QuantError::InsufficientData(format!(
            "{} has zero or undefined volatility ({})",
            symbol, sd
        )));
    }
    let inverse: Vec<f64> = stds.iter().map(|sd| 1.0 / sd).collect();
    let total: f64 = inverse.iter().sum();
    Ok(inverse.into_iter().map(|iv| iv / total).collect())
}

fn check_symbols(symbols: &[String]) -> Result<()> {
    if symbols.is_empty() {
        return Err(QuantError::InvalidInput(
            "need at least one symbol".to_string(),
        ));
    }
    let mut seen = HashSet::new();
    if let Some(dup) = symbols.iter().find(|s| !seen.insert(s.as_str())) {
        return Err(QuantError::InvalidInput(format!(
            "symbol {} listed more than once",
            dup
        )));
    }
    Ok(())
}

/// Allocation service fetching its own history.
pub struct PortfolioOptimizer<'a> {
    provider: &'a dyn PriceSeriesProvider,
}

impl<'a> PortfolioOptimizer<'a> {
    pub fn new(provider: &'a dyn PriceSeriesProvider) -> Self {
        Self { provider }
    }

    fn aligned_returns(&self, symbols: &[String], lookback: Period) -> Result<ReturnMatrix> {
        check_symbols(symbols)?;
        let series = fetch_all(self.provider, symbols, lookback)?;
        Ok(AlignedCloses::inner_join(&series).simple_returns())
    }

    /// Maximum-Sharpe allocation over `lookback` of daily history.
    pub fn mean_variance_optimize(
        &self,
        symbols: &[String],
        lookback: Period,
    ) -> Result<OptimizationResult> {
        info!("Starting Mean-Variance Optimization for: {:?}", symbols);
        let returns = self.aligned_returns(symbols, lookback)?;
        if returns.observations() < 2 {
            warn!("Optimization failed: insufficient data overlap");
            return Err(QuantError::InsufficientOverlap(format!(
                "{} common return observations across {:?}",
                returns.observations(),
                symbols
            )));
        }

        let model = MeanVarianceOptimizer::from_returns(&returns)?;
        let optimal = model.maximum_sharpe_ratio().map_err(|e| {
            error!("Optimization failed: {}", e);
            e
        })?;
        let result = build_result(OptimizationMethod::MaximumSharpe, &model, &optimal);
        info!(
            "Optimization completed. Max Sharpe: {:.2}",
            result.sharpe_ratio
        );
        Ok(result)
    }

    /// Inverse-volatility weights over one year of daily history.
    pub fn risk_parity(&self, symbols: &[String]) -> Result<OptimizationResult> {
        info!("Computing risk parity weights for: {:?}", symbols);
        let returns = self.aligned_returns(symbols, Period::OneYear)?;
        let weights = inverse_volatility_weights(&returns)?;
        let model = MeanVarianceOptimizer::from_returns(&returns)?;
        let mut result = build_result(OptimizationMethod::InverseVolatility, &model, &weights);
        result.weights = result.all_weights.clone();
        Ok(result)
    }
}

fn build_result(
    method: OptimizationMethod,
    model: &MeanVarianceOptimizer,
    weights: &[f64],
) -> OptimizationResult {
    let all_weights = PortfolioWeights::from_parts(model.symbols(), weights);
    OptimizationResult {
        method,
        weights: all_weights.above(DISPLAY_THRESHOLD),
        all_weights,
        expected_return: model.portfolio_return(weights),
        expected_volatility: model.portfolio_volatility(weights),
        sharpe_ratio: model.sharpe_ratio(weights),
    }
}
