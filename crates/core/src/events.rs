use crate::account::AccountId;
use crate::market::Side;
use crate::order::Ticket;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Trade lifecycle notification emitted after a successful broker mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TradeEvent {
    PositionOpened {
        account_id: AccountId,
        ticket: Ticket,
        symbol: String,
        side: Side,
        volume: Decimal,
        price: Decimal,
        stop_loss: Option<Decimal>,
        take_profit: Option<Decimal>,
        magic: u64,
        comment: Option<String>,
        timestamp: DateTime<Utc>,
    },
    PositionClosed {
        account_id: AccountId,
        ticket: Ticket,
        symbol: String,
        side: Side,
        volume: Decimal,
        open_price: Decimal,
        close_price: Decimal,
        profit: Decimal,
        timestamp: DateTime<Utc>,
    },
    PositionModified {
        account_id: AccountId,
        ticket: Ticket,
        symbol: String,
        stop_loss: Option<Decimal>,
        take_profit: Option<Decimal>,
        previous_stop_loss: Option<Decimal>,
        previous_take_profit: Option<Decimal>,
        timestamp: DateTime<Utc>,
    },
}

impl TradeEvent {
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::PositionOpened { .. } => "position_opened",
            Self::PositionClosed { .. } => "position_closed",
            Self::PositionModified { .. } => "position_modified",
        }
    }

    #[must_use]
    pub const fn account_id(&self) -> AccountId {
        match self {
            Self::PositionOpened { account_id, .. }
            | Self::PositionClosed { account_id, .. }
            | Self::PositionModified { account_id, .. } => *account_id,
        }
    }

    #[must_use]
    pub const fn ticket(&self) -> Ticket {
        match self {
            Self::PositionOpened { ticket, .. }
            | Self::PositionClosed { ticket, .. }
            | Self::PositionModified { ticket, .. } => *ticket,
        }
    }

    #[must_use]
    pub fn symbol(&self) -> &str {
        match self {
            Self::PositionOpened { symbol, .. }
            | Self::PositionClosed { symbol, .. }
            | Self::PositionModified { symbol, .. } => symbol,
        }
    }

    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::PositionOpened { timestamp, .. }
            | Self::PositionClosed { timestamp, .. }
            | Self::PositionModified { timestamp, .. } => *timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn serializes_with_event_tag() {
        let event = TradeEvent::PositionClosed {
            account_id: 1,
            ticket: 42,
            symbol: "EURUSD".to_string(),
            side: Side::Buy,
            volume: dec!(0.1),
            open_price: dec!(1.1000),
            close_price: dec!(1.1010),
            profit: dec!(10),
            timestamp: Utc::now(),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "position_closed");
        assert_eq!(json["ticket"], 42);
        assert_eq!(event.event_type(), "position_closed");
        assert_eq!(event.symbol(), "EURUSD");
    }
}
