use crate::market::Side;
use crate::order::Ticket;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Open trade as reported by the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub ticket: Ticket,
    pub symbol: String,
    pub side: Side,
    pub volume: Decimal,
    pub open_price: Decimal,
    pub current_price: Decimal,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    /// Floating profit in account currency
    pub profit: Decimal,
    pub magic: u64,
    pub comment: Option<String>,
    pub opened_at: DateTime<Utc>,
}

impl Position {
    /// Floating profit for `volume × contract_size` units at `current_price`.
    #[must_use]
    pub fn floating_profit(
        side: Side,
        open_price: Decimal,
        current_price: Decimal,
        volume: Decimal,
        contract_size: Decimal,
    ) -> Decimal {
        let diff = match side {
            Side::Buy => current_price - open_price,
            Side::Sell => open_price - current_price,
        };
        diff * volume * contract_size
    }
}
