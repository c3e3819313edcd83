use crate::market::PaperMarket;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tradedesk_core::{
    Account, AccountInfo, BrokerConnector, BrokerError, CloseReceipt, ConnectionError,
    ConnectorFactory, OrderReceipt, OrderRequest, Position, SymbolInfo, Ticket, TradingError,
};

pub const PLATFORM: &str = "paper";

/// Connector handle for one login on the simulated market.
///
/// Makes **zero** external calls. After `shutdown` every call fails with
/// `BrokerError::Disconnected`.
pub struct PaperConnector {
    market: Arc<PaperMarket>,
    login: String,
    connected: AtomicBool,
}

impl PaperConnector {
    #[must_use]
    pub fn new(market: Arc<PaperMarket>, login: impl Into<String>) -> Self {
        Self {
            market,
            login: login.into(),
            connected: AtomicBool::new(false),
        }
    }

    fn ensure_connected(&self) -> Result<(), BrokerError> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BrokerError::Disconnected)
        }
    }
}

#[async_trait]
impl BrokerConnector for PaperConnector {
    fn platform(&self) -> &str {
        PLATFORM
    }

    async fn authenticate(&self) -> Result<AccountInfo, ConnectionError> {
        let faults = self.market.faults().await;
        if !faults.auth_latency.is_zero() {
            tokio::time::sleep(faults.auth_latency).await;
        }
        if faults.unreachable {
            return Err(ConnectionError::Transient(
                "paper terminal unreachable".to_string(),
            ));
        }
        if faults.rejected_logins.contains(&self.login) {
            return Err(ConnectionError::Authentication(format!(
                "invalid credentials for login {}",
                self.login
            )));
        }

        self.connected.store(true, Ordering::SeqCst);
        tracing::debug!("Paper session opened for login {}", self.login);
        Ok(self.market.open_session(&self.login).await)
    }

    async fn symbol_info(&self, symbol: &str) -> Result<Option<SymbolInfo>, BrokerError> {
        self.ensure_connected()?;
        Ok(self.market.symbol(symbol).await)
    }

    async fn account_info(&self) -> Result<AccountInfo, BrokerError> {
        self.ensure_connected()?;
        Ok(self.market.account_info(&self.login).await)
    }

    async fn positions(&self, symbol: Option<&str>) -> Result<Vec<Position>, BrokerError> {
        self.ensure_connected()?;
        Ok(self.market.positions(&self.login, symbol).await)
    }

    async fn submit_order(&self, order: &OrderRequest) -> Result<OrderReceipt, BrokerError> {
        self.ensure_connected()?;
        let faults = self.market.faults().await;
        if !faults.submit_latency.is_zero() {
            tokio::time::sleep(faults.submit_latency).await;
        }
        if let Some((code, message)) = faults.reject_submits {
            return Err(BrokerError::Rejected { code, message });
        }
        self.market.fill(&self.login, order).await
    }

    async fn close_position(
        &self,
        position: &Position,
        _deviation: u32,
    ) -> Result<CloseReceipt, BrokerError> {
        self.ensure_connected()?;
        let faults = self.market.faults().await;
        if !faults.submit_latency.is_zero() {
            tokio::time::sleep(faults.submit_latency).await;
        }
        if faults.close_failures.contains(&position.ticket) {
            return Err(BrokerError::Rejected {
                code: 10006,
                message: format!("close of {} rejected", position.ticket),
            });
        }
        self.market.close(&self.login, position.ticket).await
    }

    async fn modify_position(
        &self,
        ticket: Ticket,
        stop_loss: Option<Decimal>,
        take_profit: Option<Decimal>,
    ) -> Result<(), BrokerError> {
        self.ensure_connected()?;
        self.market
            .modify(&self.login, ticket, stop_loss, take_profit)
            .await
    }

    async fn shutdown(&self) -> Result<(), BrokerError> {
        self.connected.store(false, Ordering::SeqCst);
        tracing::debug!("Paper session closed for login {}", self.login);
        Ok(())
    }
}

/// Builds paper connectors for accounts whose broker is `paper`.
#[derive(Clone)]
pub struct PaperConnectorFactory {
    market: Arc<PaperMarket>,
}

impl PaperConnectorFactory {
    #[must_use]
    pub const fn new(market: Arc<PaperMarket>) -> Self {
        Self { market }
    }

    #[must_use]
    pub fn market(&self) -> Arc<PaperMarket> {
        self.market.clone()
    }
}

impl ConnectorFactory for PaperConnectorFactory {
    fn create(&self, account: &Account) -> Result<Arc<dyn BrokerConnector>, TradingError> {
        if !account.broker.eq_ignore_ascii_case(PLATFORM) {
            return Err(TradingError::Configuration(format!(
                "no connector available for broker '{}' (account {})",
                account.broker, account.id
            )));
        }
        Ok(Arc::new(PaperConnector::new(
            self.market.clone(),
            account.login.clone(),
        )))
    }
}
