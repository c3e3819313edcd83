//! Error taxonomy shared by the connection, execution, and run-control layers.
//!
//! Validation and execution failures are expected outcomes and travel back to
//! the caller as values. Connection failures distinguish authentication
//! (terminal for that call) from transient ones (caller decides on retry).

use crate::account::AccountId;
use crate::market::Side;
use crate::order::Ticket;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ConnectionError {
    #[error("authentication failed: {0}")]
    Authentication(String),
    #[error("connection failed: {0}")]
    Transient(String),
}

impl ConnectionError {
    #[must_use]
    pub const fn is_authentication(&self) -> bool {
        matches!(self, Self::Authentication(_))
    }
}

/// Failure reported by a broker connector call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    #[error("broker rejected request ({code}): {message}")]
    Rejected { code: i32, message: String },
    #[error("connector is not connected")]
    Disconnected,
    #[error("broker unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceRelation {
    Below,
    Above,
}

impl fmt::Display for PriceRelation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Below => write!(f, "below"),
            Self::Above => write!(f, "above"),
        }
    }
}

/// Order rule violation. Never clamped, always reported.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ValidationError {
    #[error("account {0} not found")]
    AccountNotFound(AccountId),
    #[error("account {0} is inactive")]
    AccountInactive(AccountId),
    #[error("symbol {0} not found")]
    SymbolNotFound(String),
    #[error("symbol {0} is not tradable")]
    SymbolNotTradable(String),
    #[error("trading is currently not allowed for {0}")]
    TradingNotAllowed(String),
    #[error("volume {volume} outside allowed range [{min}, {max}]")]
    VolumeOutOfRange {
        volume: Decimal,
        min: Decimal,
        max: Decimal,
    },
    #[error("stop loss {stop_loss} for {side} must be strictly {relation} {reference}")]
    InvalidStopLoss {
        side: Side,
        stop_loss: Decimal,
        relation: PriceRelation,
        reference: Decimal,
    },
    #[error("take profit {take_profit} for {side} must be strictly {relation} {reference}")]
    InvalidTakeProfit {
        side: Side,
        take_profit: Decimal,
        relation: PriceRelation,
        reference: Decimal,
    },
    #[error("no free margin available (free margin {0})")]
    NoFreeMargin(Decimal),
    #[error("open position limit reached ({open}/{max})")]
    PositionLimitReached { open: usize, max: usize },
    #[error("nothing to modify: provide a new stop loss or take profit")]
    NothingToModify,
    #[error("preview amounts overflow for volume {volume} at {price}")]
    PreviewOverflow { volume: Decimal, price: Decimal },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    #[error("rejected by broker ({code}): {message}")]
    Rejected { code: i32, message: String },
    /// The broker call timed out; it may or may not have taken effect
    #[error("{operation} outcome unknown after {timeout_ms}ms (magic {magic}); not retried, check broker positions before resubmitting")]
    AmbiguousOutcome {
        operation: String,
        timeout_ms: u64,
        magic: u64,
    },
    #[error("position {0} not found")]
    PositionNotFound(Ticket),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TradingError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("account {0} not found")]
    AccountNotFound(AccountId),
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error("execution failed: {0}")]
    Execution(#[from] ExecutionError),
    #[error("fatal: {0}")]
    Fatal(String),
}

/// Coarse error class carried on result contracts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    /// Unknown account or ticket
    NotFound,
    Validation,
    Authentication,
    Connection,
    Execution,
    Fatal,
}

impl TradingError {
    #[must_use]
    pub fn not_connected(account_id: AccountId) -> Self {
        Self::Configuration(format!("account {account_id} is not connected"))
    }

    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::AccountNotFound(_) | Self::Execution(ExecutionError::PositionNotFound(_)) => {
                ErrorKind::NotFound
            }
            Self::Validation(_) => ErrorKind::Validation,
            Self::Connection(ConnectionError::Authentication(_)) => ErrorKind::Authentication,
            Self::Connection(ConnectionError::Transient(_)) => ErrorKind::Connection,
            Self::Execution(_) => ErrorKind::Execution,
            Self::Fatal(_) => ErrorKind::Fatal,
        }
    }
}

impl From<BrokerError> for TradingError {
    fn from(err: BrokerError) -> Self {
        match err {
            BrokerError::Rejected { code, message } => {
                Self::Execution(ExecutionError::Rejected { code, message })
            }
            BrokerError::Disconnected => {
                Self::Connection(ConnectionError::Transient("connector disconnected".to_string()))
            }
            BrokerError::Unavailable(msg) => Self::Connection(ConnectionError::Transient(msg)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn not_connected_mentions_account() {
        let err = TradingError::not_connected(7);
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(err.to_string().contains("not connected"));
        assert!(err.to_string().contains('7'));
    }

    #[test]
    fn broker_errors_map_into_taxonomy() {
        let rejected: TradingError = BrokerError::Rejected {
            code: 10019,
            message: "no money".to_string(),
        }
        .into();
        assert_eq!(rejected.kind(), ErrorKind::Execution);

        let dropped: TradingError = BrokerError::Disconnected.into();
        assert_eq!(dropped.kind(), ErrorKind::Connection);
    }

    #[test]
    fn unknown_account_and_ticket_are_not_found() {
        assert_eq!(TradingError::AccountNotFound(3).kind(), ErrorKind::NotFound);
        let missing: TradingError = ExecutionError::PositionNotFound(1001).into();
        assert_eq!(missing.kind(), ErrorKind::NotFound);
        let rejected: TradingError = ExecutionError::Rejected {
            code: 10006,
            message: "requote".to_string(),
        }
        .into();
        assert_eq!(rejected.kind(), ErrorKind::Execution);
    }

    #[test]
    fn authentication_is_distinguished() {
        let err: TradingError = ConnectionError::Authentication("bad password".to_string()).into();
        assert_eq!(err.kind(), ErrorKind::Authentication);
        assert!(ConnectionError::Authentication(String::new()).is_authentication());
        assert!(!ConnectionError::Transient(String::new()).is_authentication());
    }

    #[test]
    fn stop_loss_message_is_readable() {
        let err = ValidationError::InvalidStopLoss {
            side: Side::Buy,
            stop_loss: dec!(1.1005),
            relation: PriceRelation::Below,
            reference: dec!(1.1000),
        };
        assert_eq!(
            err.to_string(),
            "stop loss 1.1005 for BUY must be strictly below 1.1000"
        );
    }
}
