//! Per-account connector ownership.
//!
//! The registry is the only owner of live connector handles. Mutations for one
//! account (connect, disconnect, reconnect) run inside that account's lock;
//! different accounts proceed concurrently. Snapshot reads never wait on an
//! account lock, only on the short state-map write that ends each mutation.

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tradedesk_core::{
    Account, AccountId, AccountStore, BrokerConnector, ConnectionConfig, ConnectionError,
    ConnectorFactory, ErrorKind, TradingError,
};

struct ConnectionState {
    connected: bool,
    connector: Option<Arc<dyn BrokerConnector>>,
    last_connected_at: Option<DateTime<Utc>>,
    last_disconnected_at: Option<DateTime<Utc>>,
    last_error: Option<(ErrorKind, String)>,
    retry_count: u32,
}

impl ConnectionState {
    const fn new() -> Self {
        Self {
            connected: false,
            connector: None,
            last_connected_at: None,
            last_disconnected_at: None,
            last_error: None,
            retry_count: 0,
        }
    }

    fn snapshot(&self, account_id: AccountId) -> ConnectionSnapshot {
        ConnectionSnapshot {
            account_id,
            connected: self.connected,
            platform: self.connector.as_ref().map(|c| c.platform().to_string()),
            last_connected_at: self.last_connected_at,
            last_disconnected_at: self.last_disconnected_at,
            last_error: self.last_error.as_ref().map(|(_, msg)| msg.clone()),
            last_error_kind: self.last_error.as_ref().map(|(kind, _)| *kind),
            retry_count: self.retry_count,
        }
    }
}

/// Handle-free view of one account's connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSnapshot {
    pub account_id: AccountId,
    pub connected: bool,
    pub platform: Option<String>,
    pub last_connected_at: Option<DateTime<Utc>>,
    pub last_disconnected_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_error_kind: Option<ErrorKind>,
    /// Consecutive failed connection attempts since the last success
    pub retry_count: u32,
}

impl ConnectionSnapshot {
    const fn untracked(account_id: AccountId) -> Self {
        Self {
            account_id,
            connected: false,
            platform: None,
            last_connected_at: None,
            last_disconnected_at: None,
            last_error: None,
            last_error_kind: None,
            retry_count: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountOutcome {
    pub account_id: AccountId,
    pub success: bool,
    pub connected: bool,
    pub error: Option<String>,
}

/// Per-account results of a fan-out operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkConnectionReport {
    pub results: Vec<AccountOutcome>,
    pub succeeded: usize,
    pub failed: usize,
}

impl BulkConnectionReport {
    fn collect(outcomes: Vec<(AccountId, Result<ConnectionSnapshot, TradingError>)>) -> Self {
        let results: Vec<AccountOutcome> = outcomes
            .into_iter()
            .map(|(account_id, result)| match result {
                Ok(snapshot) => AccountOutcome {
                    account_id,
                    success: true,
                    connected: snapshot.connected,
                    error: None,
                },
                Err(e) => AccountOutcome {
                    account_id,
                    success: false,
                    connected: false,
                    error: Some(e.to_string()),
                },
            })
            .collect();
        let succeeded = results.iter().filter(|r| r.success).count();
        let failed = results.len() - succeeded;
        Self {
            results,
            succeeded,
            failed,
        }
    }
}

pub struct ConnectionRegistry {
    factory: Arc<dyn ConnectorFactory>,
    accounts: Arc<dyn AccountStore>,
    config: ConnectionConfig,
    states: RwLock<HashMap<AccountId, ConnectionState>>,
    locks: std::sync::Mutex<HashMap<AccountId, Arc<Mutex<()>>>>,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new(
        factory: Arc<dyn ConnectorFactory>,
        accounts: Arc<dyn AccountStore>,
        config: ConnectionConfig,
    ) -> Self {
        Self {
            factory,
            accounts,
            config,
            states: RwLock::new(HashMap::new()),
            locks: std::sync::Mutex::new(HashMap::new()),
        }
    }

    fn account_lock(&self, account_id: AccountId) -> Arc<Mutex<()>> {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        locks.entry(account_id).or_default().clone()
    }

    /// Drops the account's lock entry when the account never got a state and
    /// no other caller holds the lock.
    async fn release_lock(&self, account_id: AccountId, lock: Arc<Mutex<()>>) {
        drop(lock);
        if self.states.read().await.contains_key(&account_id) {
            return;
        }
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if locks.get(&account_id).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(&account_id);
        }
    }

    /// Connects an account. Idempotent when already connected and not forcing.
    ///
    /// # Errors
    /// Configuration errors for unknown/inactive accounts or unsupported brokers;
    /// connection errors (authentication or transient) when the broker refuses.
    pub async fn connect(
        &self,
        account_id: AccountId,
        force_reconnect: bool,
    ) -> Result<ConnectionSnapshot, TradingError> {
        let lock = self.account_lock(account_id);
        let result = {
            let _guard = lock.lock().await;
            self.connect_locked(account_id, force_reconnect).await
        };
        self.release_lock(account_id, lock).await;
        result
    }

    /// Tears down an account's connector. Idempotent when already disconnected.
    ///
    /// # Errors
    /// Never fails today; the `Result` keeps the control surface uniform.
    pub async fn disconnect(
        &self,
        account_id: AccountId,
    ) -> Result<ConnectionSnapshot, TradingError> {
        let lock = self.account_lock(account_id);
        let snapshot = {
            let _guard = lock.lock().await;
            self.disconnect_locked(account_id).await
        };
        self.release_lock(account_id, lock).await;
        Ok(snapshot)
    }

    /// Disconnect, wait the configured delay, then connect with force.
    ///
    /// # Errors
    /// Same as [`Self::connect`].
    pub async fn reconnect(
        &self,
        account_id: AccountId,
    ) -> Result<ConnectionSnapshot, TradingError> {
        let lock = self.account_lock(account_id);
        let result = {
            let _guard = lock.lock().await;
            tracing::info!("Reconnecting account {}", account_id);
            self.disconnect_locked(account_id).await;
            tokio::time::sleep(self.config.reconnect_delay()).await;
            self.connect_locked(account_id, true).await
        };
        self.release_lock(account_id, lock).await;
        result
    }

    /// Reconnects every tracked account concurrently.
    pub async fn reconnect_all(&self) -> BulkConnectionReport {
        let ids = self.tracked_accounts().await;
        let outcomes = join_all(ids.into_iter().map(|id| async move {
            (id, self.reconnect(id).await)
        }))
        .await;

        let report = BulkConnectionReport::collect(outcomes);
        tracing::info!(
            "Reconnect all: {} succeeded, {} failed",
            report.succeeded,
            report.failed
        );
        report
    }

    /// Disconnects every tracked account concurrently.
    pub async fn disconnect_all(&self) -> BulkConnectionReport {
        let ids = self.tracked_accounts().await;
        let outcomes = join_all(ids.into_iter().map(|id| async move {
            (id, self.disconnect(id).await)
        }))
        .await;

        BulkConnectionReport::collect(outcomes)
    }

    /// Live connector for the account, or `None` when it is not connected.
    ///
    /// Resolve per operation; reconnects replace the handle.
    pub async fn get_active_connector(
        &self,
        account_id: AccountId,
    ) -> Option<Arc<dyn BrokerConnector>> {
        self.states
            .read()
            .await
            .get(&account_id)
            .filter(|s| s.connected)
            .and_then(|s| s.connector.clone())
    }

    pub async fn get_connection_state(&self, account_id: AccountId) -> Option<ConnectionSnapshot> {
        self.states
            .read()
            .await
            .get(&account_id)
            .map(|s| s.snapshot(account_id))
    }

    /// Snapshots of every connected account, ordered by account id.
    pub async fn list_active_sessions(&self) -> Vec<ConnectionSnapshot> {
        let mut sessions: Vec<_> = self
            .states
            .read()
            .await
            .iter()
            .filter(|(_, s)| s.connected)
            .map(|(id, s)| s.snapshot(*id))
            .collect();
        sessions.sort_by_key(|s| s.account_id);
        sessions
    }

    async fn tracked_accounts(&self) -> Vec<AccountId> {
        let mut ids: Vec<_> = self.states.read().await.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    async fn load_account(&self, account_id: AccountId) -> Result<Account, TradingError> {
        let account = self
            .accounts
            .get(account_id)
            .await
            .map_err(|e| {
                TradingError::Configuration(format!("failed to load account {account_id}: {e}"))
            })?
            .ok_or(TradingError::AccountNotFound(account_id))?;

        if !account.is_active {
            return Err(TradingError::Configuration(format!(
                "account {account_id} is inactive"
            )));
        }
        Ok(account)
    }

    async fn connect_locked(
        &self,
        account_id: AccountId,
        force_reconnect: bool,
    ) -> Result<ConnectionSnapshot, TradingError> {
        if !force_reconnect {
            if let Some(snapshot) = self.get_connection_state(account_id).await {
                if snapshot.connected {
                    tracing::debug!("Account {} already connected", account_id);
                    return Ok(snapshot);
                }
            }
        }

        let account = self.load_account(account_id).await?;
        self.disconnect_locked(account_id).await;

        let connector = self.factory.create(&account)?;
        let attempt =
            tokio::time::timeout(self.config.connect_timeout(), connector.authenticate()).await;

        let failure = match attempt {
            Ok(Ok(info)) => {
                let now = Utc::now();
                let snapshot = {
                    let mut states = self.states.write().await;
                    let state = states.entry(account_id).or_insert_with(ConnectionState::new);
                    state.connected = true;
                    state.connector = Some(connector);
                    state.last_connected_at = Some(now);
                    state.last_error = None;
                    state.retry_count = 0;
                    state.snapshot(account_id)
                };

                if let Err(e) = self.accounts.record_connected(account_id, now).await {
                    tracing::warn!(
                        "Failed to stamp connect time for account {}: {}",
                        account_id,
                        e
                    );
                }
                tracing::info!(
                    "Account {} connected to {} (login {}, balance {} {})",
                    account_id,
                    account.server,
                    info.login,
                    info.balance,
                    info.currency
                );
                return Ok(snapshot);
            }
            Ok(Err(e)) => e,
            Err(_) => ConnectionError::Transient(format!(
                "authentication timed out after {}s",
                self.config.connect_timeout_secs
            )),
        };

        if let Err(e) = connector.shutdown().await {
            tracing::debug!("Discarding failed connector for account {}: {}", account_id, e);
        }
        drop(connector);

        let kind = if failure.is_authentication() {
            ErrorKind::Authentication
        } else {
            ErrorKind::Connection
        };
        {
            let mut states = self.states.write().await;
            let state = states.entry(account_id).or_insert_with(ConnectionState::new);
            state.connected = false;
            state.connector = None;
            state.last_error = Some((kind, failure.to_string()));
            state.retry_count += 1;
        }
        tracing::warn!("Account {} failed to connect: {}", account_id, failure);
        Err(failure.into())
    }

    async fn disconnect_locked(&self, account_id: AccountId) -> ConnectionSnapshot {
        let connector = {
            let mut states = self.states.write().await;
            match states.get_mut(&account_id) {
                Some(state) => {
                    state.connected = false;
                    state.connector.take()
                }
                None => None,
            }
        };

        let Some(connector) = connector else {
            return self
                .get_connection_state(account_id)
                .await
                .unwrap_or_else(|| ConnectionSnapshot::untracked(account_id));
        };

        if let Err(e) = connector.shutdown().await {
            tracing::warn!("Connector shutdown for account {} failed: {}", account_id, e);
        }

        let now = Utc::now();
        let snapshot = {
            let mut states = self.states.write().await;
            let state = states.entry(account_id).or_insert_with(ConnectionState::new);
            state.last_disconnected_at = Some(now);
            state.snapshot(account_id)
        };

        if let Err(e) = self.accounts.record_disconnected(account_id, now).await {
            tracing::warn!("Failed to stamp disconnect time for account {}: {}", account_id, e);
        }
        tracing::info!("Account {} disconnected", account_id);
        snapshot
    }
}
