use crate::market::Side;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Broker-assigned position/order identifier.
pub type Ticket = u64;

/// Intent to open a market position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: Side,
    pub volume: Decimal,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    /// Maximum accepted slippage in points
    pub deviation: u32,
    /// Strategy tag echoed back on the resulting position
    pub magic: u64,
    pub comment: Option<String>,
}

impl OrderRequest {
    #[must_use]
    pub fn market(symbol: impl Into<String>, side: Side, volume: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            volume,
            stop_loss: None,
            take_profit: None,
            deviation: 20,
            magic: 0,
            comment: None,
        }
    }

    #[must_use]
    pub fn with_stops(mut self, stop_loss: Option<Decimal>, take_profit: Option<Decimal>) -> Self {
        self.stop_loss = stop_loss;
        self.take_profit = take_profit;
        self
    }
}

/// Broker acknowledgement of a filled market order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderReceipt {
    pub ticket: Ticket,
    pub price: Decimal,
    pub volume: Decimal,
}

/// Broker acknowledgement of a closed position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseReceipt {
    pub ticket: Ticket,
    pub price: Decimal,
    pub profit: Decimal,
}
