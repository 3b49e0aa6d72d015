//! Pre-trade risk gate.
//!
//! Limits are evaluated against a fresh account snapshot on every call; the
//! gate keeps no state of its own. Only buys are capped against cash.

use crate::account::PositionSource;
use crate::error::QuantError;
use crate::types::Side;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

/// Default cap on a single buy, as a fraction of available cash.
pub const DEFAULT_MAX_CASH_FRACTION: f64 = 0.5;

/// Why a proposed trade was refused.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TradeRejection {
    #[error("Quantity must be positive.")]
    NonPositiveQuantity { quantity: f64 },

    #[error("Price must be positive and finite, got {price}.")]
    InvalidPrice { price: f64 },

    #[error("Trade value {trade_value:.2} exceeds {pct:.0}% of available cash {cash:.2}.", pct = .max_fraction * 100.0)]
    ExceedsCashLimit {
        trade_value: f64,
        cash: f64,
        max_fraction: f64,
    },

    #[error("Account unavailable: {reason}")]
    AccountUnavailable { reason: String },
}

impl TradeRejection {
    pub fn into_error(self) -> QuantError {
        QuantError::InvalidTrade(self.to_string())
    }
}

impl From<TradeRejection> for QuantError {
    fn from(rejection: TradeRejection) -> Self {
        rejection.into_error()
    }
}

/// Synchronous gate consulted before every order submission.
pub struct TradeRiskGate<'a> {
    positions: &'a dyn PositionSource,
    max_cash_fraction: f64,
}

impl<'a> TradeRiskGate<'a> {
    pub fn new(positions: &'a dyn PositionSource) -> Self {
        Self {
            positions,
            max_cash_fraction: DEFAULT_MAX_CASH_FRACTION,
        }
    }

    pub fn with_max_cash_fraction(mut self, fraction: f64) -> Self {
        self.max_cash_fraction = fraction;
        self
    }

    pub fn max_cash_fraction(&self) -> f64 {
        self.max_cash_fraction
    }

    /// `None` permits the trade.
    pub fn validate_trade(
        &self,
        symbol: &str,
        side: Side,
        quantity: f64,
        current_price: f64,
    ) -> Option<TradeRejection> {
        let rejection = self.check(side, quantity, current_price);
        match &rejection {
            Some(r) => warn!("Risk Rejection: {} ({} {} {})", r, side, quantity, symbol),
            None => info!(
                "Trade validated: {} {} {} (${:.2})",
                side,
                quantity,
                symbol,
                quantity * current_price
            ),
        }
        rejection
    }

    /// Same decision as [`validate_trade`](Self::validate_trade), as a `Result`.
    pub fn ensure_allowed(
        &self,
        symbol: &str,
        side: Side,
        quantity: f64,
        current_price: f64,
    ) -> crate::error::Result<()> {
        match self.validate_trade(symbol, side, quantity, current_price) {
            Some(rejection) => Err(rejection.into_error()),
            None => Ok(()),
        }
    }

    fn check(&self, side: Side, quantity: f64, current_price: f64) -> Option<TradeRejection> {
        if !(quantity > 0.0) || !quantity.is_finite() {
            return Some(TradeRejection::NonPositiveQuantity { quantity });
        }
        if !(current_price > 0.0) || !current_price.is_finite() {
            return Some(TradeRejection::InvalidPrice {
                price: current_price,
            });
        }

        if side == Side::Buy {
            let account = match self.positions.fetch_positions() {
                Ok(account) => account,
                Err(e) => {
                    return Some(TradeRejection::AccountUnavailable {
                        reason: e.to_string(),
                    })
                }
            };
            let trade_value = quantity * current_price;
            if trade_value > account.cash * self.max_cash_fraction {
                return Some(TradeRejection::ExceedsCashLimit {
                    trade_value,
                    cash: account.cash,
                    max_fraction: self.max_cash_fraction,
                });
            }
        }
        None
    }
}
