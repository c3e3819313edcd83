//! The single path through which broker-side positions are mutated.
//!
//! Every call resolves the account's connector afresh, runs validation, makes
//! exactly one mutating broker call, and reports a uniform [`ExecutionResult`].
//! Trade events are published after success; a failed publish is logged and
//! never changes the result.

use crate::connection_registry::ConnectionRegistry;
use crate::validation::{OrderContext, OrderValidationEngine, PositionPreview, PreviewRequest};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tradedesk_core::{
    AccountId, AccountStore, BrokerConnector, BrokerError, ErrorKind, ExecutionError,
    OrderRequest, Position, Side, Ticket, TradeEvent, TradeEventSink, TradingConfig,
    TradingError, ValidationError,
};

/// Caller-facing request to open a market position. Unset knobs fall back to
/// the `trading` configuration defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenPositionRequest {
    pub symbol: String,
    pub side: Side,
    pub volume: Decimal,
    #[serde(default)]
    pub stop_loss: Option<Decimal>,
    #[serde(default)]
    pub take_profit: Option<Decimal>,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub magic: Option<u64>,
    #[serde(default)]
    pub deviation: Option<u32>,
}

impl OpenPositionRequest {
    #[must_use]
    pub fn market(symbol: impl Into<String>, side: Side, volume: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            volume,
            stop_loss: None,
            take_profit: None,
            comment: None,
            magic: None,
            deviation: None,
        }
    }

    #[must_use]
    pub fn with_stops(mut self, stop_loss: Option<Decimal>, take_profit: Option<Decimal>) -> Self {
        self.stop_loss = stop_loss;
        self.take_profit = take_profit;
        self
    }
}

/// Furthest lifecycle stage an order reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStage {
    Requested,
    Validated,
    Submitted,
    Filled,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub ticket: Option<Ticket>,
    pub price: Option<Decimal>,
    /// Realized profit, for closes only
    pub profit: Option<Decimal>,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub stage: OrderStage,
}

impl ExecutionResult {
    fn filled(ticket: Ticket, price: Option<Decimal>, profit: Option<Decimal>) -> Self {
        Self {
            success: true,
            ticket: Some(ticket),
            price,
            profit,
            error: None,
            error_kind: None,
            stage: OrderStage::Filled,
        }
    }

    fn failed(ticket: Option<Ticket>, stage: OrderStage, err: &TradingError) -> Self {
        Self {
            success: false,
            ticket,
            price: None,
            profit: None,
            error: Some(err.to_string()),
            error_kind: Some(err.kind()),
            stage,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkCloseReport {
    pub total: usize,
    pub success_count: usize,
    pub fail_count: usize,
    pub results: Vec<ExecutionResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountPositions {
    pub account_id: AccountId,
    pub positions: Vec<Position>,
}

/// A failure plus the furthest stage reached before it.
type Staged = (OrderStage, TradingError);

pub struct ExecutionCoordinator {
    registry: Arc<ConnectionRegistry>,
    accounts: Arc<dyn AccountStore>,
    validator: OrderValidationEngine,
    events: Arc<dyn TradeEventSink>,
    config: TradingConfig,
}

impl ExecutionCoordinator {
    #[must_use]
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        accounts: Arc<dyn AccountStore>,
        events: Arc<dyn TradeEventSink>,
        config: TradingConfig,
    ) -> Self {
        Self {
            registry,
            accounts,
            validator: OrderValidationEngine::new(config.max_open_positions),
            events,
            config,
        }
    }

    #[must_use]
    pub const fn validator(&self) -> &OrderValidationEngine {
        &self.validator
    }

    pub async fn open_position(
        &self,
        account_id: AccountId,
        request: OpenPositionRequest,
    ) -> ExecutionResult {
        match self.try_open(account_id, request).await {
            Ok(result) => result,
            Err((stage, err)) => {
                tracing::warn!("Open on account {} failed at {:?}: {}", account_id, stage, err);
                ExecutionResult::failed(None, stage, &err)
            }
        }
    }

    async fn try_open(
        &self,
        account_id: AccountId,
        request: OpenPositionRequest,
    ) -> Result<ExecutionResult, Staged> {
        let requested = |e: TradingError| (OrderStage::Requested, e);
        let connector = self.connector(account_id).await.map_err(requested)?;

        let account = self
            .accounts
            .get(account_id)
            .await
            .map_err(|e| requested(TradingError::Configuration(e.to_string())))?;
        let symbol = connector
            .symbol_info(&request.symbol)
            .await
            .map_err(|e| requested(e.into()))?;
        let account_info = connector
            .account_info()
            .await
            .map_err(|e| requested(e.into()))?;
        let open_positions = connector
            .positions(None)
            .await
            .map_err(|e| requested(e.into()))?
            .len();

        let order = OrderRequest {
            symbol: request.symbol,
            side: request.side,
            volume: request.volume,
            stop_loss: request.stop_loss,
            take_profit: request.take_profit,
            deviation: request.deviation.unwrap_or(self.config.default_deviation),
            magic: request.magic.unwrap_or(self.config.default_magic),
            comment: request.comment,
        };

        let ctx = OrderContext {
            account_id,
            account: account.as_ref(),
            symbol: symbol.as_ref(),
            account_info: &account_info,
            open_positions,
        };
        self.validator
            .validate_order(&order, &ctx)
            .map_err(|e| requested(e.into()))?;
        tracing::debug!(
            "Account {} {} {} {} validated",
            account_id,
            order.side,
            order.volume,
            order.symbol
        );

        let receipt = self
            .bounded("order submission", order.magic, connector.submit_order(&order))
            .await?;

        tracing::info!(
            "Account {} opened {} {} {} at {} (ticket {})",
            account_id,
            order.side,
            receipt.volume,
            order.symbol,
            receipt.price,
            receipt.ticket
        );
        self.emit(TradeEvent::PositionOpened {
            account_id,
            ticket: receipt.ticket,
            symbol: order.symbol,
            side: order.side,
            volume: receipt.volume,
            price: receipt.price,
            stop_loss: order.stop_loss,
            take_profit: order.take_profit,
            magic: order.magic,
            comment: order.comment,
            timestamp: Utc::now(),
        })
        .await;

        Ok(ExecutionResult::filled(receipt.ticket, Some(receipt.price), None))
    }

    pub async fn close_position(&self, account_id: AccountId, ticket: Ticket) -> ExecutionResult {
        let position = match self.find_position(account_id, ticket).await {
            Ok(position) => position,
            Err(err) => return ExecutionResult::failed(Some(ticket), OrderStage::Requested, &err),
        };
        self.close_known(account_id, &position).await
    }

    async fn close_known(&self, account_id: AccountId, position: &Position) -> ExecutionResult {
        match self.try_close(account_id, position).await {
            Ok(result) => result,
            Err((stage, err)) => {
                tracing::warn!(
                    "Close of ticket {} on account {} failed at {:?}: {}",
                    position.ticket,
                    account_id,
                    stage,
                    err
                );
                ExecutionResult::failed(Some(position.ticket), stage, &err)
            }
        }
    }

    async fn try_close(
        &self,
        account_id: AccountId,
        position: &Position,
    ) -> Result<ExecutionResult, Staged> {
        let connector = self
            .connector(account_id)
            .await
            .map_err(|e| (OrderStage::Requested, e))?;

        let receipt = self
            .bounded(
                "position close",
                position.magic,
                connector.close_position(position, self.config.default_deviation),
            )
            .await?;

        tracing::info!(
            "Account {} closed ticket {} {} at {} (profit {})",
            account_id,
            position.ticket,
            position.symbol,
            receipt.price,
            receipt.profit
        );
        self.emit(TradeEvent::PositionClosed {
            account_id,
            ticket: position.ticket,
            symbol: position.symbol.clone(),
            side: position.side,
            volume: position.volume,
            open_price: position.open_price,
            close_price: receipt.price,
            profit: receipt.profit,
            timestamp: Utc::now(),
        })
        .await;

        Ok(ExecutionResult::filled(
            position.ticket,
            Some(receipt.price),
            Some(receipt.profit),
        ))
    }

    pub async fn modify_position(
        &self,
        account_id: AccountId,
        ticket: Ticket,
        stop_loss: Option<Decimal>,
        take_profit: Option<Decimal>,
    ) -> ExecutionResult {
        match self.try_modify(account_id, ticket, stop_loss, take_profit).await {
            Ok(result) => result,
            Err((stage, err)) => {
                tracing::warn!(
                    "Modify of ticket {} on account {} failed at {:?}: {}",
                    ticket,
                    account_id,
                    stage,
                    err
                );
                ExecutionResult::failed(Some(ticket), stage, &err)
            }
        }
    }

    async fn try_modify(
        &self,
        account_id: AccountId,
        ticket: Ticket,
        stop_loss: Option<Decimal>,
        take_profit: Option<Decimal>,
    ) -> Result<ExecutionResult, Staged> {
        let requested = |e: TradingError| (OrderStage::Requested, e);
        let position = self.find_position(account_id, ticket).await.map_err(requested)?;
        let connector = self.connector(account_id).await.map_err(requested)?;

        let symbol = connector
            .symbol_info(&position.symbol)
            .await
            .map_err(|e| requested(e.into()))?
            .ok_or_else(|| {
                requested(ValidationError::SymbolNotFound(position.symbol.clone()).into())
            })?;
        self.validator
            .validate_modification(&symbol, position.side, stop_loss, take_profit)
            .map_err(|e| requested(e.into()))?;

        self.bounded(
            "position modify",
            position.magic,
            connector.modify_position(ticket, stop_loss, take_profit),
        )
        .await?;

        let new_stop_loss = stop_loss.or(position.stop_loss);
        let new_take_profit = take_profit.or(position.take_profit);
        tracing::info!(
            "Account {} modified ticket {} (sl {:?}, tp {:?})",
            account_id,
            ticket,
            new_stop_loss,
            new_take_profit
        );
        self.emit(TradeEvent::PositionModified {
            account_id,
            ticket,
            symbol: position.symbol.clone(),
            stop_loss: new_stop_loss,
            take_profit: new_take_profit,
            previous_stop_loss: position.stop_loss,
            previous_take_profit: position.take_profit,
            timestamp: Utc::now(),
        })
        .await;

        Ok(ExecutionResult::filled(ticket, None, None))
    }

    /// Closes every open position (optionally one symbol), continuing past failures.
    ///
    /// # Errors
    /// Fails only when the account is not connected or positions cannot be listed;
    /// individual close failures are reported in the batch.
    pub async fn bulk_close(
        &self,
        account_id: AccountId,
        symbol: Option<&str>,
    ) -> Result<BulkCloseReport, TradingError> {
        let positions = self.connector(account_id).await?.positions(symbol).await?;
        let total = positions.len();
        tracing::info!("Bulk closing {} positions on account {}", total, account_id);

        let mut results = Vec::with_capacity(total);
        for position in &positions {
            results.push(self.close_known(account_id, position).await);
        }

        let success_count = results.iter().filter(|r| r.success).count();
        Ok(BulkCloseReport {
            total,
            success_count,
            fail_count: total - success_count,
            results,
        })
    }

    /// # Errors
    /// Not connected, broker query failure, unknown symbol, or volume outside the
    /// symbol's bounds.
    pub async fn preview_position(
        &self,
        account_id: AccountId,
        request: &PreviewRequest,
    ) -> Result<PositionPreview, TradingError> {
        let connector = self.connector(account_id).await?;
        let symbol = connector
            .symbol_info(&request.symbol)
            .await?
            .ok_or_else(|| ValidationError::SymbolNotFound(request.symbol.clone()))?;
        let account_info = connector.account_info().await?;
        Ok(self.validator.preview(&symbol, &account_info, request)?)
    }

    /// Open positions for one account, or for every active session.
    ///
    /// # Errors
    /// Only in the single-account form, when that account is not connected or
    /// the broker query fails. The all-accounts form skips such accounts.
    pub async fn get_open_positions(
        &self,
        account_id: Option<AccountId>,
        symbol: Option<&str>,
    ) -> Result<Vec<AccountPositions>, TradingError> {
        if let Some(account_id) = account_id {
            let positions = self.connector(account_id).await?.positions(symbol).await?;
            return Ok(vec![AccountPositions {
                account_id,
                positions,
            }]);
        }

        let mut all = Vec::new();
        for session in self.registry.list_active_sessions().await {
            let Some(connector) = self.registry.get_active_connector(session.account_id).await
            else {
                tracing::warn!("Account {} dropped its connector, skipping", session.account_id);
                continue;
            };
            match connector.positions(symbol).await {
                Ok(positions) => all.push(AccountPositions {
                    account_id: session.account_id,
                    positions,
                }),
                Err(e) => tracing::warn!(
                    "Skipping positions for account {}: {}",
                    session.account_id,
                    e
                ),
            }
        }
        Ok(all)
    }

    async fn connector(
        &self,
        account_id: AccountId,
    ) -> Result<Arc<dyn BrokerConnector>, TradingError> {
        self.registry
            .get_active_connector(account_id)
            .await
            .ok_or_else(|| TradingError::not_connected(account_id))
    }

    async fn find_position(
        &self,
        account_id: AccountId,
        ticket: Ticket,
    ) -> Result<Position, TradingError> {
        self.connector(account_id)
            .await?
            .positions(None)
            .await?
            .into_iter()
            .find(|p| p.ticket == ticket)
            .ok_or_else(|| ExecutionError::PositionNotFound(ticket).into())
    }

    /// Runs one mutating broker call under the submit timeout. A timeout is an
    /// ambiguous outcome and is never retried here.
    async fn bounded<T>(
        &self,
        operation: &str,
        magic: u64,
        call: impl Future<Output = Result<T, BrokerError>>,
    ) -> Result<T, Staged> {
        let timeout = self.config.submit_timeout();
        match tokio::time::timeout(timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => {
                let stage = match err {
                    BrokerError::Rejected { .. } => OrderStage::Rejected,
                    BrokerError::Disconnected | BrokerError::Unavailable(_) => {
                        OrderStage::Validated
                    }
                };
                Err((stage, err.into()))
            }
            Err(_) => {
                let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
                tracing::error!(
                    "{} timed out after {}ms (magic {}); outcome unknown",
                    operation,
                    timeout_ms,
                    magic
                );
                Err((
                    OrderStage::Submitted,
                    ExecutionError::AmbiguousOutcome {
                        operation: operation.to_string(),
                        timeout_ms,
                        magic,
                    }
                    .into(),
                ))
            }
        }
    }

    async fn emit(&self, event: TradeEvent) {
        if let Err(e) = self.events.publish(&event).await {
            tracing::warn!(
                "Failed to publish {} for ticket {}: {}",
                event.event_type(),
                event.ticket(),
                e
            );
        }
    }
}
