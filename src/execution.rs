//! Order submission behind the pre-trade gate.

use crate::data::PriceSource;
use crate::error::{QuantError, Result};
use crate::trade_gate::TradeRiskGate;
use crate::types::Side;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::{info, warn};

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OrderType {
    Market,
    Limit { limit_price: f64 },
}

/// Order as requested by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderTicket {
    pub symbol: String,
    pub side: Side,
    pub quantity: f64,
    pub order_type: OrderType,
}

impl OrderTicket {
    pub fn market(symbol: impl Into<String>, side: Side, quantity: f64) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            quantity,
            order_type: OrderType::Market,
        }
    }

    pub fn limit(symbol: impl Into<String>, side: Side, quantity: f64, limit_price: f64) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            quantity,
            order_type: OrderType::Limit { limit_price },
        }
    }
}

/// Broker acknowledgement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderReceipt {
    pub order_id: String,
    pub status: String,
    pub submitted_at: DateTime<Utc>,
}

/// Broker boundary that accepts validated orders.
pub trait OrderExecutor: Send + Sync {
    fn submit(&self, ticket: &OrderTicket) -> Result<OrderReceipt>;
}

/// Executor that accepts every order and keeps it in memory.
#[derive(Debug, Default)]
pub struct PaperExecutor {
    orders: Mutex<Vec<OrderTicket>>,
}

impl PaperExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Orders accepted so far.
    pub fn submitted(&self) -> Vec<OrderTicket> {
        match self.orders.lock() {
            Ok(orders) => orders.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl OrderExecutor for PaperExecutor {
    fn submit(&self, ticket: &OrderTicket) -> Result<OrderReceipt> {
        let mut orders = match self.orders.lock() {
            Ok(orders) => orders,
            Err(poisoned) => poisoned.into_inner(),
        };
        orders.push(ticket.clone());
        Ok(OrderReceipt {
            order_id: format!("paper-{}", orders.len()),
            status: "accepted".to_string(),
            submitted_at: Utc::now(),
        })
    }
}

/// A submitted order with the price it was checked against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub ticket: OrderTicket,
    pub reference_price: f64,
    pub receipt: OrderReceipt,
}

impl ExecutionReport {
    pub fn summary(&self) -> String {
        let t = &self.ticket;
        let head = match t.order_type {
            OrderType::Market => format!("Market Order Submitted: {} {} {}", t.side, t.quantity, t.symbol),
            OrderType::Limit { limit_price } => format!(
                "Limit Order Submitted: {} {} {} @ ${:.2}",
                t.side, t.quantity, t.symbol, limit_price
            ),
        };
        format!(
            "{}\nOrder ID: {}\nStatus: {}\nSubmitted at: {}",
            head,
            self.receipt.order_id,
            self.receipt.status,
            self.receipt.submitted_at.to_rfc3339()
        )
    }
}

/// Prices, gates and submits orders.
pub struct ExecutionService<'a> {
    prices: &'a dyn PriceSource,
    gate: TradeRiskGate<'a>,
    executor: &'a dyn OrderExecutor,
}

impl<'a> ExecutionService<'a> {
    pub fn new(
        prices: &'a dyn PriceSource,
        gate: TradeRiskGate<'a>,
        executor: &'a dyn OrderExecutor,
    ) -> Self {
        Self {
            prices,
            gate,
            executor,
        }
    }

    /// Fetch the current price, run the gate, then submit.
    pub fn place_order(&self, ticket: &OrderTicket) -> Result<ExecutionReport> {
        if let OrderType::Limit { limit_price } = ticket.order_type {
            if !(limit_price > 0.0) || !limit_price.is_finite() {
                return Err(QuantError::InvalidInput(
                    "limit price required for limit orders".to_string(),
                ));
            }
        }

        let current_price = self.prices.fetch_latest_price(&ticket.symbol)?;
        if let Some(rejection) =
            self.gate
                .validate_trade(&ticket.symbol, ticket.side, ticket.quantity, current_price)
        {
            warn!("Trade rejected by risk gate: {}", rejection);
            return Err(rejection.into_error());
        }

        match ticket.order_type {
            OrderType::Market => info!(
                "Submitting MARKET order: {} {} {}",
                ticket.side, ticket.quantity, ticket.symbol
            ),
            OrderType::Limit { limit_price } => {
                if ticket.side == Side::Buy && limit_price > current_price {
                    warn!("Buy limit {} is above market {}", limit_price, current_price);
                }
                if ticket.side == Side::Sell && limit_price < current_price {
                    warn!("Sell limit {} is below market {}", limit_price, current_price);
                }
                info!(
                    "Submitting LIMIT order: {} {} {} @ ${}",
                    ticket.side, ticket.quantity, ticket.symbol, limit_price
                );
            }
        }

        let receipt = self.executor.submit(ticket)?;
        info!("Order submitted successfully: ID={}", receipt.order_id);
        Ok(ExecutionReport {
            ticket: ticket.clone(),
            reference_price: current_price,
            receipt,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::AccountSnapshot;
    use crate::data::InMemoryProvider;
    use crate::types::PriceBar;
    use chrono::NaiveDate;

    fn prices() -> InMemoryProvider {
        let d = NaiveDate::from_ymd_opt(2024, 6, 3).unwrap();
        InMemoryProvider::new().with_series("AAPL", vec![PriceBar::flat(d, 200.0)])
    }

    #[test]
    fn test_market_order_within_limit_is_submitted() {
        let prices = prices();
        let account = AccountSnapshot::new(1000.0);
        let executor = PaperExecutor::new();
        let service = ExecutionService::new(&prices, TradeRiskGate::new(&account), &executor);

        let report = service
            .place_order(&OrderTicket::market("AAPL", Side::Buy, 2.0))
            .unwrap();
        assert_eq!(report.reference_price, 200.0);
        assert_eq!(report.receipt.order_id, "paper-1");
        assert_eq!(executor.submitted().len(), 1);
        assert!(report.summary().starts_with("Market Order Submitted: BUY 2 AAPL"));
    }

    #[test]
    fn test_rejected_order_never_reaches_executor() {
        let prices = prices();
        let account = AccountSnapshot::new(1000.0);
        let executor = PaperExecutor::new();
        let service = ExecutionService::new(&prices, TradeRiskGate::new(&account), &executor);

        let err = service
            .place_order(&OrderTicket::market("AAPL", Side::Buy, 3.0))
            .unwrap_err();
        assert!(matches!(err, QuantError::InvalidTrade(_)));
        assert!(executor.submitted().is_empty());
    }

    #[test]
    fn test_limit_order_requires_price() {
        let prices = prices();
        let account = AccountSnapshot::new(1000.0);
        let executor = PaperExecutor::new();
        let service = ExecutionService::new(&prices, TradeRiskGate::new(&account), &executor);

        assert!(matches!(
            service.place_order(&OrderTicket::limit("AAPL", Side::Sell, 1.0, 0.0)),
            Err(QuantError::InvalidInput(_))
        ));
        let report = service
            .place_order(&OrderTicket::limit("AAPL", Side::Sell, 1.0, 190.0))
            .unwrap();
        assert!(report.summary().contains("@ $190.00"));
    }

    #[test]
    fn test_unknown_symbol_fails_before_gate() {
        let prices = prices();
        let account = AccountSnapshot::new(1000.0);
        let executor = PaperExecutor::new();
        let service = ExecutionService::new(&prices, TradeRiskGate::new(&account), &executor);
        assert!(matches!(
            service.place_order(&OrderTicket::market("MSFT", Side::Buy, 1.0)),
            Err(QuantError::DataUnavailable { .. })
        ));
    }
}
