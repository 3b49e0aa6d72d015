//! Portfolio risk model: annualized volatility, historical VaR and maximum drawdown.
//!
//! The free functions work on an explicit weight vector and return matrix. The
//! [`RiskModel`] service derives both from the live account and a price provider.

use crate::account::PositionSource;
use crate::analytics::{max_drawdown_of, percentile, ReturnMatrix};
use crate::data::{Period, PriceSeriesProvider};
use crate::error::{QuantError, Result};
use crate::portfolio::PortfolioSnapshot;
use crate::types::PortfolioWeights;
use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

/// Minimum aligned return observations for any risk figure.
pub const MIN_OBSERVATIONS: usize = 2;

/// Weight vector in return-matrix order, after the shared preconditions.
fn checked_weights(weights: &PortfolioWeights, returns: &ReturnMatrix) -> Result<Vec<f64>> {
    if weights.is_empty() || returns.n_assets() == 0 {
        return Err(QuantError::EmptyPortfolio);
    }
    if returns.observations() < MIN_OBSERVATIONS {
        return Err(QuantError::InsufficientData(format!(
            "need at least {} aligned return observations across all symbols, have {}",
            MIN_OBSERVATIONS,
            returns.observations()
        )));
    }
    weights.vector_for(&returns.symbols)
}

fn portfolio_returns(weights: &PortfolioWeights, returns: &ReturnMatrix) -> Result<Vec<f64>> {
    let w = checked_weights(weights, returns)?;
    Ok(returns.portfolio_returns(&w))
}

/// `sqrt(wᵀ Σ w)` over the annualized sample covariance.
pub fn annualized_volatility(weights: &PortfolioWeights, returns: &ReturnMatrix) -> Result<f64> {
    let w = DVector::from_vec(checked_weights(weights, returns)?);
    let cov = returns.annualized_covariance();
    let variance = w.dot(&(&cov * &w));
    Ok(variance.max(0.0).sqrt())
}

/// Historical VaR: the `(1 - confidence)` empirical quantile of daily portfolio
/// returns. Negative values are losses.
pub fn value_at_risk(
    weights: &PortfolioWeights,
    returns: &ReturnMatrix,
    confidence: f64,
) -> Result<f64> {
    if !(confidence > 0.0 && confidence < 1.0) {
        return Err(QuantError::InvalidInput(format!(
            "confidence must be in (0, 1), got {}",
            confidence
        )));
    }
    let daily = portfolio_returns(weights, returns)?;
    percentile(&daily, (1.0 - confidence) * 100.0).ok_or_else(|| {
        QuantError::InsufficientData("no portfolio returns to take a percentile of".to_string())
    })
}

/// Largest peak-to-trough decline of the portfolio's cumulative return, `<= 0`.
pub fn max_drawdown(weights: &PortfolioWeights, returns: &ReturnMatrix) -> Result<f64> {
    let daily = portfolio_returns(weights, returns)?;
    Ok(max_drawdown_of(&daily))
}

/// All portfolio risk figures from one snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskReport {
    pub weights: BTreeMap<String, f64>,
    pub observations: usize,
    pub annualized_volatility: f64,
    pub confidence: f64,
    pub value_at_risk: f64,
    pub max_drawdown: f64,
}

impl RiskReport {
    pub fn summary(&self) -> String {
        format!(
            "Portfolio Risk ({} observations)\n\
             Annualized Portfolio Volatility: {:.2}%\n\
             Daily VaR ({:.0}%): {:.2}%\n\
             Maximum Drawdown: {:.2}%",
            self.observations,
            self.annualized_volatility * 100.0,
            self.confidence * 100.0,
            self.value_at_risk * 100.0,
            self.max_drawdown * 100.0
        )
    }
}

/// Risk figures for the live portfolio.
pub struct RiskModel<'a> {
    provider: &'a dyn PriceSeriesProvider,
    positions: &'a dyn PositionSource,
    lookback: Period,
}

impl<'a> RiskModel<'a> {
    pub fn new(provider: &'a dyn PriceSeriesProvider, positions: &'a dyn PositionSource) -> Self {
        Self {
            provider,
            positions,
            lookback: Period::OneYear,
        }
    }

    pub fn with_lookback(mut self, lookback: Period) -> Self {
        self.lookback = lookback;
        self
    }

    fn snapshot(&self) -> Result<(PortfolioWeights, ReturnMatrix)> {
        let snap = PortfolioSnapshot::load(self.provider, self.positions, self.lookback)?;
        let returns = snap.closes.simple_returns();
        Ok((snap.weights, returns))
    }

    pub fn annualized_volatility(&self) -> Result<f64> {
        let (w, r) = self.snapshot()?;
        let vol = annualized_volatility(&w, &r)?;
        info!("Annualized portfolio volatility: {:.4}", vol);
        Ok(vol)
    }

    pub fn value_at_risk(&self, confidence: f64) -> Result<f64> {
        let (w, r) = self.snapshot()?;
        let var = value_at_risk(&w, &r, confidence)?;
        info!("Daily VaR at {:.0}%: {:.4}", confidence * 100.0, var);
        Ok(var)
    }

    pub fn max_drawdown(&self) -> Result<f64> {
        let (w, r) = self.snapshot()?;
        let dd = max_drawdown(&w, &r)?;
        info!("Maximum drawdown: {:.4}", dd);
        Ok(dd)
    }

    /// Every figure from a single fetch.
    pub fn report(&self, confidence: f64) -> Result<RiskReport> {
        let (w, r) = self.snapshot()?;
        let report = RiskReport {
            weights: w.to_map(),
            observations: r.observations(),
            annualized_volatility: annualized_volatility(&w, &r)?,
            confidence,
            value_at_risk: value_at_risk(&w, &r, confidence)?,
            max_drawdown: max_drawdown(&w, &r)?,
        };
        info!(
            "Risk report: vol {:.4}, VaR {:.4}, max DD {:.4}",
            report.annualized_volatility, report.value_at_risk, report.max_drawdown
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::AccountSnapshot;
    use crate::data::InMemoryProvider;
    use crate::types::PriceBar;
    use chrono::NaiveDate;

    fn matrix(columns: Vec<Vec<f64>>) -> ReturnMatrix {
        let start = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let n = columns.first().map(|c| c.len()).unwrap_or(0);
        let dates = (0..n)
            .map(|i| start + chrono::Duration::days(i as i64))
            .collect();
        let symbols = (0..columns.len()).map(|i| format!("S{}", i)).collect();
        ReturnMatrix::new(dates, symbols, columns).unwrap()
    }

    fn weights(w: &[f64]) -> PortfolioWeights {
        let symbols: Vec<String> = (0..w.len()).map(|i| format!("S{}", i)).collect();
        PortfolioWeights::from_parts(&symbols, w)
    }

    #[test]
    fn test_single_asset_volatility() {
        let r = matrix(vec![vec![0.01, -0.01, 0.02, -0.02]]);
        let vol = annualized_volatility(&weights(&[1.0]), &r).unwrap();
        let daily_std = crate::analytics::sample_std(&r.columns[0]);
        assert!((vol - daily_std * 252f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_diversification_lowers_volatility() {
        let a = vec![0.01, -0.01, 0.02, -0.02, 0.015];
        let b: Vec<f64> = a.iter().map(|x| -x).collect();
        let r = matrix(vec![a, b]);
        let hedged = annualized_volatility(&weights(&[0.5, 0.5]), &r).unwrap();
        let single = annualized_volatility(&weights(&[1.0, 0.0]), &r).unwrap();
        assert!(hedged < 1e-9);
        assert!(single > 0.1);
    }

    #[test]
    fn test_empty_and_short_inputs() {
        let r = matrix(vec![vec![0.01]]);
        assert!(matches!(
            annualized_volatility(&weights(&[1.0]), &r),
            Err(QuantError::InsufficientData(_))
        ));
        assert!(matches!(
            annualized_volatility(&PortfolioWeights::new(), &r),
            Err(QuantError::EmptyPortfolio)
        ));
    }

    #[test]
    fn test_var_is_empirical_quantile() {
        let returns: Vec<f64> = (0..100).map(|i| (i as f64 - 50.0) / 1000.0).collect();
        let r = matrix(vec![returns]);
        let var = value_at_risk(&weights(&[1.0]), &r, 0.95).unwrap();
        // 5th percentile of -0.050..0.049: rank 4.95 -> -0.04505
        assert!((var + 0.04505).abs() < 1e-12);
    }

    #[test]
    fn test_var_rejects_bad_confidence() {
        let r = matrix(vec![vec![0.01, 0.02, 0.03]]);
        for c in [0.0, 1.0, -0.5, 1.5, f64::NAN] {
            assert!(value_at_risk(&weights(&[1.0]), &r, c).is_err());
        }
    }

    #[test]
    fn test_drawdown_zero_for_flat_returns() {
        let r = matrix(vec![vec![0.0; 10]]);
        assert_eq!(max_drawdown(&weights(&[1.0]), &r).unwrap(), 0.0);
    }

    #[test]
    fn test_drawdown_known_path() {
        let r = matrix(vec![vec![0.10, -0.20, 0.05, -0.10, 0.30]]);
        let dd = max_drawdown(&weights(&[1.0]), &r).unwrap();
        // peak 1.1, trough 1.1 * 0.8 * 1.05 * 0.9 = 0.8316
        assert!((dd - (0.8316 / 1.1 - 1.0)).abs() < 1e-12);
    }

    #[test]
    fn test_risk_model_end_to_end() {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let series = |f: fn(usize) -> f64| -> Vec<PriceBar> {
            (0..60)
                .map(|i| PriceBar::flat(start + chrono::Duration::days(i as i64), f(i)))
                .collect()
        };
        let provider = InMemoryProvider::new()
            .with_series("AAA", series(|i| 100.0 + (i as f64 * 0.7).sin() * 3.0))
            .with_series("BBB", series(|i| 50.0 + (i as f64 * 1.3).cos() * 2.0 + i as f64 * 0.1));
        let account = AccountSnapshot::new(10_000.0)
            .with_position("AAA", 10.0)
            .with_position("BBB", 20.0);

        let model = RiskModel::new(&provider, &account).with_lookback(Period::Max);
        let report = model.report(0.95).unwrap();
        assert_eq!(report.observations, 59);
        assert!(report.annualized_volatility > 0.0);
        assert!(report.value_at_risk < 0.0);
        assert!(report.max_drawdown <= 0.0);
        assert!((report.weights.values().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!(report.summary().contains("Maximum Drawdown"));
    }
}
