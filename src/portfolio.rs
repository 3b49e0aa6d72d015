//! Live portfolio snapshot: value weights plus aligned price history.

use crate::account::PositionSource;
use crate::analytics::AlignedCloses;
use crate::data::{Interval, Period, PriceSeriesProvider};
use crate::error::{QuantError, Result};
use crate::types::{PortfolioWeights, PriceBar};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Fetch one daily series per symbol in parallel.
///
/// Any failure fails the whole call; a partial basket is never returned.
pub fn fetch_all(
    provider: &dyn PriceSeriesProvider,
    symbols: &[String],
    period: Period,
) -> Result<Vec<(String, Vec<PriceBar>)>> {
    symbols
        .par_iter()
        .map(|symbol| {
            provider
                .fetch_price_series(symbol, period, Interval::Daily)
                .map(|bars| (symbol.clone(), bars))
        })
        .collect()
}

/// Value weights `q_i * p_i / Σ q_j * p_j` from quantities and latest closes.
pub fn derive_weights(holdings: &[(String, f64, f64)]) -> Result<PortfolioWeights> {
    if holdings.is_empty() {
        return Err(QuantError::EmptyPortfolio);
    }
    let values: Vec<f64> = holdings.iter().map(|(_, qty, price)| qty * price).collect();
    let total: f64 = values.iter().sum();
    if !total.is_finite() || total == 0.0 {
        return Err(QuantError::InvalidInput(format!(
            "portfolio market value must be non-zero and finite, got {}",
            total
        )));
    }

    let mut weights = PortfolioWeights::new();
    for ((symbol, _, _), value) in holdings.iter().zip(values) {
        weights.set(symbol.clone(), value / total);
    }
    Ok(weights)
}

/// Current weights and the aligned history they apply to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub weights: PortfolioWeights,
    pub closes: AlignedCloses,
}

impl PortfolioSnapshot {
    /// Read the account and fetch history for every held symbol.
    pub fn load(
        provider: &dyn PriceSeriesProvider,
        positions: &dyn PositionSource,
        lookback: Period,
    ) -> Result<Self> {
        let account = positions.fetch_positions()?;
        let held: Vec<(String, f64)> = account
            .held()
            .map(|(s, q)| (s.to_string(), q))
            .collect();
        if held.is_empty() {
            return Err(QuantError::EmptyPortfolio);
        }

        let symbols: Vec<String> = held.iter().map(|(s, _)| s.clone()).collect();
        let series = fetch_all(provider, &symbols, lookback)?;

        let holdings: Vec<(String, f64, f64)> = held
            .iter()
            .zip(series.iter())
            .map(|((symbol, qty), (_, bars))| {
                let latest = bars
                    .last()
                    .map(|b| b.close)
                    .ok_or_else(|| QuantError::unavailable(symbol, "no bars returned"))?;
                Ok((symbol.clone(), *qty, latest))
            })
            .collect::<Result<_>>()?;
        let weights = derive_weights(&holdings)?;
        let closes = AlignedCloses::inner_join(&series);

        debug!("Portfolio weights: {:?}", weights.to_map());
        info!(
            "Loaded portfolio of {} symbols with {} aligned bars",
            symbols.len(),
            closes.len()
        );

        Ok(Self { weights, closes })
    }
}
