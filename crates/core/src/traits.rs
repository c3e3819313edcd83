use crate::account::{Account, AccountId};
use crate::error::{BrokerError, ConnectionError, TradingError};
use crate::events::TradeEvent;
use crate::market::{AccountInfo, SymbolInfo};
use crate::order::{CloseReceipt, OrderReceipt, OrderRequest, Ticket};
use crate::position::Position;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;

/// Live, authenticated handle to one broker terminal for one account.
///
/// One implementation per supported broker platform. Every method is a
/// network round trip and may suspend.
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    fn platform(&self) -> &str;

    async fn authenticate(&self) -> Result<AccountInfo, ConnectionError>;

    /// `Ok(None)` when the broker does not know the symbol.
    async fn symbol_info(&self, symbol: &str) -> Result<Option<SymbolInfo>, BrokerError>;

    async fn account_info(&self) -> Result<AccountInfo, BrokerError>;

    async fn positions(&self, symbol: Option<&str>) -> Result<Vec<Position>, BrokerError>;

    async fn submit_order(&self, order: &OrderRequest) -> Result<OrderReceipt, BrokerError>;

    async fn close_position(
        &self,
        position: &Position,
        deviation: u32,
    ) -> Result<CloseReceipt, BrokerError>;

    async fn modify_position(
        &self,
        ticket: Ticket,
        stop_loss: Option<Decimal>,
        take_profit: Option<Decimal>,
    ) -> Result<(), BrokerError>;

    async fn shutdown(&self) -> Result<(), BrokerError>;
}

/// Builds unauthenticated connectors for accounts.
pub trait ConnectorFactory: Send + Sync {
    /// # Errors
    /// Returns a configuration error when no connector exists for the account's
    /// broker platform.
    fn create(&self, account: &Account) -> Result<Arc<dyn BrokerConnector>, TradingError>;
}

/// Read access to externally owned account records, plus connection markers.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn get(&self, id: AccountId) -> Result<Option<Account>>;

    /// All accounts ordered by id.
    async fn list(&self) -> Result<Vec<Account>>;

    async fn record_connected(&self, id: AccountId, at: DateTime<Utc>) -> Result<()>;

    async fn record_disconnected(&self, id: AccountId, at: DateTime<Utc>) -> Result<()>;
}

/// Best-effort consumer of trade lifecycle events.
#[async_trait]
pub trait TradeEventSink: Send + Sync {
    async fn publish(&self, event: &TradeEvent) -> Result<()>;
}
