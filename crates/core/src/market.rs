use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// Broker-reported symbol metadata and the current quote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub name: String,
    /// Number of decimal places in a quote
    pub digits: u32,
    /// Smallest quote increment
    pub point: Decimal,
    pub bid: Decimal,
    pub ask: Decimal,
    pub volume_min: Decimal,
    pub volume_max: Decimal,
    pub volume_step: Decimal,
    /// Units per 1.0 lot
    pub contract_size: Decimal,
    /// Symbol is visible and can be traded on this account at all
    pub tradable: bool,
    /// Trading session is currently open
    pub trade_allowed: bool,
}

impl SymbolInfo {
    /// Pip size used for risk/reward math.
    ///
    /// Fractional-pip quotes (3 or 5 digits) carry one extra digit, so a pip is
    /// ten points there and one point everywhere else.
    #[must_use]
    pub fn pip_size(&self) -> Decimal {
        if self.digits == 3 || self.digits == 5 {
            self.point * Decimal::TEN
        } else {
            self.point
        }
    }

    /// Price an order on `side` fills at: ask for buys, bid for sells.
    #[must_use]
    pub const fn entry_price(&self, side: Side) -> Decimal {
        match side {
            Side::Buy => self.ask,
            Side::Sell => self.bid,
        }
    }

    /// Price a position on `side` closes at.
    #[must_use]
    pub const fn exit_price(&self, side: Side) -> Decimal {
        self.entry_price(side.opposite())
    }
}

/// Broker-reported account figures for one login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub login: String,
    pub balance: Decimal,
    pub equity: Decimal,
    pub margin: Decimal,
    pub free_margin: Decimal,
    pub leverage: u32,
    pub currency: String,
    /// Broker allows trading on this login (e.g. not read-only investor access)
    pub trade_allowed: bool,
}
