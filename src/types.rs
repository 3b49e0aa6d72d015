//! Core data types shared by the analytics components.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::QuantError;

/// Trading days per year used for annualization.
pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Daily OHLCV bar for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

impl PriceBar {
    pub fn new(date: NaiveDate, open: f64, high: f64, low: f64, close: f64, volume: u64) -> Self {
        Self {
            date,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// Bar with all four prices set to `close`.
    pub fn flat(date: NaiveDate, close: f64) -> Self {
        Self::new(date, close, close, close, close, 0)
    }

    /// Validate that bar data is consistent.
    pub fn validate(&self) -> bool {
        self.open > 0.0
            && self.close > 0.0
            && self.low > 0.0
            && self.high >= self.low
            && self.high >= self.open
            && self.high >= self.close
            && self.low <= self.open
            && self.low <= self.close
            && self.close.is_finite()
    }
}

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

impl FromStr for Side {
    type Err = QuantError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "buy" => Ok(Side::Buy),
            "sell" => Ok(Side::Sell),
            other => Err(QuantError::InvalidInput(format!(
                "side must be 'buy' or 'sell', got '{}'",
                other
            ))),
        }
    }
}

/// Moving-average crossover parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StrategyParams {
    pub fast_window: usize,
    pub slow_window: usize,
}

impl StrategyParams {
    pub fn new(fast_window: usize, slow_window: usize) -> Self {
        Self {
            fast_window,
            slow_window,
        }
    }

    /// Pairs with `fast >= slow` are skipped during parameter search.
    pub fn is_ordered(&self) -> bool {
        self.fast_window < self.slow_window
    }
}

impl fmt::Display for StrategyParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.fast_window, self.slow_window)
    }
}

/// Symbol-to-weight mapping that keeps a stable symbol order.
///
/// The order is the one used to index covariance matrices and weight vectors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PortfolioWeights {
    entries: Vec<(String, f64)>,
}

impl PortfolioWeights {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from parallel symbol and weight slices.
    pub fn from_parts(symbols: &[String], weights: &[f64]) -> Self {
        Self {
            entries: symbols
                .iter()
                .cloned()
                .zip(weights.iter().copied())
                .collect(),
        }
    }

    /// Insert or replace the weight for `symbol`.
    pub fn set(&mut self, symbol: impl Into<String>, weight: f64) {
        let symbol = symbol.into();
        match self.entries.iter_mut().find(|(s, _)| *s == symbol) {
            Some(entry) => entry.1 = weight,
            None => self.entries.push((symbol, weight)),
        }
    }

    pub fn get(&self, symbol: &str) -> Option<f64> {
        self.entries
            .iter()
            .find(|(s, _)| s == symbol)
            .map(|(_, w)| *w)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn symbols(&self) -> Vec<String> {
        self.entries.iter().map(|(s, _)| s.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.entries.iter().map(|(s, w)| (s.as_str(), *w))
    }

    pub fn total(&self) -> f64 {
        self.entries.iter().map(|(_, w)| w).sum()
    }

    /// Weights ordered to match `symbols`. Every symbol must have a weight.
    pub fn vector_for(&self, symbols: &[String]) -> Result<Vec<f64>, QuantError> {
        symbols
            .iter()
            .map(|s| {
                self.get(s).ok_or_else(|| {
                    QuantError::InvalidInput(format!("no weight for symbol {}", s))
                })
            })
            .collect()
    }

    /// Keep only entries strictly above `threshold`.
    pub fn above(&self, threshold: f64) -> Self {
        Self {
            entries: self
                .entries
                .iter()
                .filter(|(_, w)| *w > threshold)
                .cloned()
                .collect(),
        }
    }

    pub fn to_map(&self) -> BTreeMap<String, f64> {
        self.entries.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bar_validation() {
        let d = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        assert!(PriceBar::new(d, 10.0, 11.0, 9.5, 10.5, 100).validate());
        assert!(!PriceBar::new(d, 10.0, 9.0, 9.5, 10.5, 100).validate());
        assert!(!PriceBar::new(d, 0.0, 0.0, 0.0, 0.0, 0).validate());
        assert!(PriceBar::flat(d, 42.0).validate());
    }

    #[test]
    fn test_side_parsing() {
        assert_eq!("BUY".parse::<Side>().unwrap(), Side::Buy);
        assert_eq!("sell".parse::<Side>().unwrap(), Side::Sell);
        assert!("hold".parse::<Side>().is_err());
    }

    #[test]
    fn test_weights_preserve_insertion_order() {
        let mut w = PortfolioWeights::new();
        w.set("MSFT", 0.3);
        w.set("AAPL", 0.7);
        w.set("MSFT", 0.25);
        assert_eq!(w.symbols(), vec!["MSFT".to_string(), "AAPL".to_string()]);
        assert_eq!(w.get("MSFT"), Some(0.25));
        assert!((w.total() - 0.95).abs() < 1e-12);
    }

    #[test]
    fn test_vector_for_requires_every_symbol() {
        let w = PortfolioWeights::from_parts(&["A".to_string(), "B".to_string()], &[0.4, 0.6]);
        let v = w.vector_for(&["B".to_string(), "A".to_string()]).unwrap();
        assert_eq!(v, vec![0.6, 0.4]);
        assert!(w.vector_for(&["C".to_string()]).is_err());
    }

    #[test]
    fn test_above_threshold_filter() {
        let w = PortfolioWeights::from_parts(
            &["A".to_string(), "B".to_string(), "C".to_string()],
            &[0.985, 0.01, 0.005],
        );
        let shown = w.above(0.01);
        assert_eq!(shown.symbols(), vec!["A".to_string()]);
    }

    #[test]
    fn test_params_ordering() {
        assert!(StrategyParams::new(10, 50).is_ordered());
        assert!(!StrategyParams::new(50, 50).is_ordered());
    }
}
