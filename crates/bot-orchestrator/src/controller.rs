//! Start/stop/pause/resume control for the process-wide bot run.
//!
//! Every control operation holds one async guard for its whole duration, so
//! two concurrent `start` calls can never both proceed. The loop runs in its
//! own tokio task and is only reachable through [`RunShared`].

use crate::run_loop::{LoopSettings, RunLoop, RunShared};
use crate::run_state::{RunFlags, RunState, RunStateStore, RunStatus, TransitionError};
use crate::strategy::{CycleContext, StrategyCycle};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tradedesk_core::{Account, AccountId, AccountStore, BotRunConfig, TradingError};
use tradedesk_execution::ConnectionRegistry;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RunControlError {
    #[error("bot is already {0}")]
    AlreadyActive(RunStatus),
    #[error("bot is not running (status: {0})")]
    NotRunning(RunStatus),
    #[error("bot is not paused (status: {0})")]
    NotPaused(RunStatus),
    #[error("bot is in error state; reset it before starting")]
    ResetRequired,
    #[error("bot is not in error state (status: {0})")]
    NotInError(RunStatus),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error(transparent)]
    Trading(#[from] TradingError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StartRequest {
    /// Opaque reference to the strategy configuration the run was started with
    pub config_ref: Option<String>,
    pub account_id: Option<AccountId>,
    pub flags: RunFlags,
}

pub struct RunController {
    registry: Arc<ConnectionRegistry>,
    accounts: Arc<dyn AccountStore>,
    strategy: Arc<dyn StrategyCycle>,
    config: BotRunConfig,
    shared: Arc<RunShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl RunController {
    #[must_use]
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        accounts: Arc<dyn AccountStore>,
        store: Arc<dyn RunStateStore>,
        strategy: Arc<dyn StrategyCycle>,
        config: BotRunConfig,
    ) -> Self {
        Self::with_state(registry, accounts, store, strategy, config, RunState::default())
    }

    fn with_state(
        registry: Arc<ConnectionRegistry>,
        accounts: Arc<dyn AccountStore>,
        store: Arc<dyn RunStateStore>,
        strategy: Arc<dyn StrategyCycle>,
        config: BotRunConfig,
        state: RunState,
    ) -> Self {
        Self {
            registry,
            accounts,
            strategy,
            config,
            shared: Arc::new(RunShared::new(state, store)),
            worker: Mutex::new(None),
        }
    }

    /// Builds a controller from the persisted run row.
    ///
    /// A row left in a live status by a process that died is normalized to
    /// `Stopped`; an `Error` row stays in `Error` until reset.
    ///
    /// # Errors
    /// Returns error if the row cannot be loaded or the normalized row cannot be saved.
    pub async fn restore(
        registry: Arc<ConnectionRegistry>,
        accounts: Arc<dyn AccountStore>,
        store: Arc<dyn RunStateStore>,
        strategy: Arc<dyn StrategyCycle>,
        config: BotRunConfig,
    ) -> anyhow::Result<Self> {
        let mut state = store
            .load()
            .await
            .context("Failed to load persisted run state")?
            .unwrap_or_default();

        let restored = state.status.is_live();
        if restored {
            tracing::warn!(
                "Run state was {} when the previous process exited, marking stopped",
                state.status
            );
            state.last_error = Some(format!(
                "process exited while bot was {}",
                state.status
            ));
            state.status = RunStatus::Stopped;
            state.stopped_at = Some(chrono::Utc::now());
            state.last_transition_at = state.stopped_at;
        }

        let controller = Self::with_state(registry, accounts, store, strategy, config, state);
        if restored {
            controller.shared.persist().await.context("Failed to save normalized run state")?;
        }
        Ok(controller)
    }

    #[must_use]
    pub fn status(&self) -> RunState {
        self.shared.snapshot()
    }

    /// Resolves the target account, ensures it is connected, and spawns the loop.
    ///
    /// # Errors
    /// Fails when a run is already live, when the state is `Error` (reset first),
    /// when no account resolves, when the connection fails (state becomes
    /// `Error`), or when the loop does not begin within the start timeout.
    pub async fn start(&self, request: StartRequest) -> Result<RunState, RunControlError> {
        let mut worker = self.worker.lock().await;

        match self.shared.status() {
            RunStatus::Stopped => {}
            RunStatus::Error => return Err(RunControlError::ResetRequired),
            status => return Err(RunControlError::AlreadyActive(status)),
        }
        if let Some(stale) = worker.take() {
            stale.abort();
        }

        let StartRequest {
            config_ref,
            account_id,
            flags,
        } = request;
        self.shared.transition(RunStatus::Starting, |s| {
            s.account_id = account_id;
            s.config_ref = config_ref.clone();
            s.flags = flags.clone();
        })?;
        self.shared.persist_best_effort().await;
        tracing::info!("Bot starting (config {:?})", config_ref);

        let account_id = match self.resolve_account(account_id).await {
            Ok(id) => id,
            Err(err) => return Err(self.abort_start(RunStatus::Stopped, err).await),
        };
        self.shared.update_state(|s| s.account_id = Some(account_id));

        if let Err(err) = self.registry.connect(account_id, false).await {
            let next = if matches!(err, TradingError::Connection(_)) {
                RunStatus::Error
            } else {
                RunStatus::Stopped
            };
            return Err(self.abort_start(next, err).await);
        }

        let generation = self.shared.begin_generation();
        let (began_tx, began_rx) = oneshot::channel();
        let run_loop = RunLoop {
            shared: self.shared.clone(),
            strategy: self.strategy.clone(),
            settings: LoopSettings {
                cycle_interval: self.config.cycle_interval(),
                pause_poll: self.config.pause_poll(),
                max_bookkeeping_failures: self.config.max_bookkeeping_failures.max(1),
            },
            generation,
            context: CycleContext {
                account_id,
                cycle: 0,
                config_ref,
                flags,
            },
        };
        let handle = tokio::spawn(run_loop.run(began_tx));

        match tokio::time::timeout(self.config.start_timeout(), began_rx).await {
            Ok(Ok(())) => {
                *worker = Some(handle);
                tracing::info!("Bot running on account {}", account_id);
                Ok(self.shared.snapshot())
            }
            _ => {
                handle.abort();
                self.shared.retire_generation();
                let err = TradingError::Fatal(format!(
                    "run loop did not begin within {}s",
                    self.config.start_timeout_secs
                ));
                Err(self.abort_start(RunStatus::Error, err).await)
            }
        }
    }

    async fn resolve_account(
        &self,
        explicit: Option<AccountId>,
    ) -> Result<AccountId, TradingError> {
        let accounts = self
            .accounts
            .list()
            .await
            .map_err(|e| TradingError::Configuration(format!("failed to list accounts: {e:#}")))?;

        Account::resolve_target(&accounts, explicit)
            .map(|a| a.id)
            .ok_or_else(|| match explicit {
                Some(id) => TradingError::Configuration(format!(
                    "account {id} not found or inactive"
                )),
                None => TradingError::Configuration("no active account configured".to_string()),
            })
    }

    async fn abort_start(&self, next: RunStatus, err: TradingError) -> RunControlError {
        tracing::error!("Bot start aborted: {}", err);
        let message = err.to_string();
        if let Err(e) = self.shared.transition(next, |s| s.last_error = Some(message)) {
            tracing::warn!("Could not record aborted start: {}", e);
        }
        self.shared.persist_best_effort().await;
        RunControlError::Trading(err)
    }

    /// Signals the loop to stop, waits up to the stop timeout, then marks the run
    /// stopped regardless. From `Error` this is the manual reset.
    ///
    /// # Errors
    /// Fails with "not running" when already stopped.
    pub async fn stop(&self) -> Result<RunState, RunControlError> {
        let mut worker = self.worker.lock().await;

        match self.shared.status() {
            RunStatus::Stopped => return Err(RunControlError::NotRunning(RunStatus::Stopped)),
            RunStatus::Error => return self.reset_locked(&mut worker).await,
            _ => {}
        }

        self.shared.transition(RunStatus::Stopping, |_| {})?;
        self.shared.request_stop();
        self.shared.persist_best_effort().await;
        tracing::info!("Bot stopping");

        if let Some(mut handle) = worker.take() {
            let timeout = self.config.stop_timeout();
            if tokio::time::timeout(timeout, &mut handle).await.is_err() {
                tracing::warn!(
                    "Run loop did not exit within {}s, abandoning it",
                    self.config.stop_timeout_secs
                );
                handle.abort();
            }
        }
        self.shared.retire_generation();

        // the loop may have failed into Error while we waited; both lead to Stopped
        self.shared.transition(RunStatus::Stopped, |_| {})?;
        self.shared.persist_best_effort().await;
        tracing::info!("Bot stopped");
        Ok(self.shared.snapshot())
    }

    /// # Errors
    /// Fails unless the bot is running.
    pub async fn pause(&self) -> Result<RunState, RunControlError> {
        let _worker = self.worker.lock().await;

        let status = self.shared.status();
        if status != RunStatus::Running {
            return Err(RunControlError::NotRunning(status));
        }
        self.shared.transition(RunStatus::Pausing, |_| {})?;
        self.shared.set_paused(true);
        let state = self.shared.transition(RunStatus::Paused, |_| {})?;
        self.shared.persist_best_effort().await;
        tracing::info!("Bot paused");
        Ok(state)
    }

    /// # Errors
    /// Fails unless the bot is paused.
    pub async fn resume(&self) -> Result<RunState, RunControlError> {
        let _worker = self.worker.lock().await;

        let status = self.shared.status();
        if status != RunStatus::Paused {
            return Err(RunControlError::NotPaused(status));
        }
        let state = self.shared.transition(RunStatus::Running, |_| {})?;
        self.shared.set_paused(false);
        self.shared.persist_best_effort().await;
        tracing::info!("Bot resumed");
        Ok(state)
    }

    /// Clears an `Error` state back to `Stopped`. A no-op when already stopped.
    ///
    /// # Errors
    /// Fails while a run is live.
    pub async fn reset(&self) -> Result<RunState, RunControlError> {
        let mut worker = self.worker.lock().await;
        match self.shared.status() {
            RunStatus::Error => self.reset_locked(&mut worker).await,
            RunStatus::Stopped => Ok(self.shared.snapshot()),
            status => Err(RunControlError::NotInError(status)),
        }
    }

    async fn reset_locked(
        &self,
        worker: &mut Option<JoinHandle<()>>,
    ) -> Result<RunState, RunControlError> {
        if let Some(handle) = worker.take() {
            handle.abort();
        }
        self.shared.retire_generation();
        let state = self.shared.transition(RunStatus::Stopped, |_| {})?;
        self.shared.persist_best_effort().await;
        tracing::info!("Bot reset from error state");
        Ok(state)
    }

    /// Stops a live run before the process exits. Stopped and errored runs are left as they are.
    pub async fn shutdown(&self) {
        if self.shared.status().is_live() {
            if let Err(e) = self.stop().await {
                tracing::warn!("Bot stop during shutdown failed: {}", e);
            }
        }
    }
}
