//! Run lifecycle state machine and its persisted snapshot.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use tokio::sync::RwLock;
use tradedesk_core::AccountId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Stopped,
    Starting,
    Running,
    Pausing,
    Paused,
    Stopping,
    Error,
}

impl RunStatus {
    /// Legal edges of the run state machine.
    ///
    /// ```text
    /// Stopped -> Starting -> Running <-> (Pausing -> Paused -> Running)
    /// Running | Pausing | Paused -> Stopping -> Stopped
    /// Starting -> Stopped
    /// any -> Error -> Stopped
    /// ```
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        use RunStatus::{Error, Paused, Pausing, Running, Starting, Stopped, Stopping};
        matches!(
            (self, next),
            (Stopped, Starting)
                | (Starting, Running | Stopped | Error)
                | (Running, Pausing | Stopping | Error)
                | (Pausing, Paused | Stopping | Error)
                | (Paused, Running | Stopping | Error)
                | (Stopping, Stopped | Error)
                | (Stopped, Error)
                | (Error, Stopped)
        )
    }

    /// A status that implies a loop exists or is being created.
    #[must_use]
    pub const fn is_live(self) -> bool {
        !matches!(self, Self::Stopped | Self::Error)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Pausing => "pausing",
            Self::Paused => "paused",
            Self::Stopping => "stopping",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("illegal run state transition {from} -> {to}")]
pub struct TransitionError {
    pub from: RunStatus,
    pub to: RunStatus,
}

/// Named boolean switches handed through to strategy cycles.
pub type RunFlags = BTreeMap<String, bool>;

/// Process-wide run snapshot. One persisted row, updated in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RunState {
    pub status: RunStatus,
    pub account_id: Option<AccountId>,
    pub config_ref: Option<String>,
    pub flags: RunFlags,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub last_transition_at: Option<DateTime<Utc>>,
    /// Stamped after each cycle completed while running
    pub heartbeat_at: Option<DateTime<Utc>>,
    pub cycles_total: u64,
    pub cycles_succeeded: u64,
    pub cycles_failed: u64,
    pub last_error: Option<String>,
}

impl RunState {
    /// Moves to `next` and stamps the transition.
    ///
    /// # Errors
    /// Returns [`TransitionError`] for an edge the state machine does not allow;
    /// the state is left untouched.
    pub fn transition(&mut self, next: RunStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError {
                from: self.status,
                to: next,
            });
        }

        let now = Utc::now();
        match next {
            RunStatus::Starting => {
                self.started_at = Some(now);
                self.stopped_at = None;
                self.heartbeat_at = None;
                self.cycles_total = 0;
                self.cycles_succeeded = 0;
                self.cycles_failed = 0;
                self.last_error = None;
            }
            RunStatus::Stopped => self.stopped_at = Some(now),
            _ => {}
        }
        self.status = next;
        self.last_transition_at = Some(now);
        Ok(())
    }

    /// Records one finished cycle. The heartbeat only moves while running.
    pub fn record_cycle(&mut self, succeeded: bool) {
        self.cycles_total += 1;
        if succeeded {
            self.cycles_succeeded += 1;
        } else {
            self.cycles_failed += 1;
        }
        if self.status == RunStatus::Running {
            self.heartbeat_at = Some(Utc::now());
        }
    }
}

/// Persistence seam for the single run-state row.
#[async_trait]
pub trait RunStateStore: Send + Sync {
    async fn load(&self) -> Result<Option<RunState>>;
    async fn save(&self, state: &RunState) -> Result<()>;
}

#[derive(Default)]
pub struct InMemoryRunStateStore {
    state: RwLock<Option<RunState>>,
}

impl InMemoryRunStateStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_state(state: RunState) -> Self {
        Self {
            state: RwLock::new(Some(state)),
        }
    }
}

#[async_trait]
impl RunStateStore for InMemoryRunStateStore {
    async fn load(&self) -> Result<Option<RunState>> {
        Ok(self.state.read().await.clone())
    }

    async fn save(&self, state: &RunState) -> Result<()> {
        *self.state.write().await = Some(state.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stopped_cannot_jump_to_running() {
        let mut state = RunState::default();
        let err = state.transition(RunStatus::Running).unwrap_err();
        assert_eq!(err.from, RunStatus::Stopped);
        assert_eq!(err.to, RunStatus::Running);
        assert_eq!(state.status, RunStatus::Stopped);
    }

    #[test]
    fn full_lifecycle_is_legal() {
        let mut state = RunState::default();
        for next in [
            RunStatus::Starting,
            RunStatus::Running,
            RunStatus::Pausing,
            RunStatus::Paused,
            RunStatus::Running,
            RunStatus::Stopping,
            RunStatus::Stopped,
        ] {
            state.transition(next).unwrap();
        }
        assert!(state.stopped_at.is_some());
    }

    #[test]
    fn error_only_leads_to_stopped() {
        for next in [
            RunStatus::Starting,
            RunStatus::Running,
            RunStatus::Paused,
            RunStatus::Stopping,
        ] {
            assert!(!RunStatus::Error.can_transition_to(next), "error -> {next}");
        }
        assert!(RunStatus::Error.can_transition_to(RunStatus::Stopped));

        for from in [
            RunStatus::Starting,
            RunStatus::Running,
            RunStatus::Paused,
            RunStatus::Stopping,
        ] {
            assert!(from.can_transition_to(RunStatus::Error));
        }
    }

    #[test]
    fn paused_cannot_skip_to_paused_or_pausing() {
        assert!(!RunStatus::Paused.can_transition_to(RunStatus::Pausing));
        assert!(!RunStatus::Running.can_transition_to(RunStatus::Paused));
        assert!(!RunStatus::Stopped.can_transition_to(RunStatus::Stopping));
    }

    #[test]
    fn starting_resets_counters_and_error() {
        let mut state = RunState {
            cycles_total: 9,
            cycles_failed: 2,
            last_error: Some("boom".to_string()),
            ..RunState::default()
        };
        state.transition(RunStatus::Starting).unwrap();
        assert_eq!(state.cycles_total, 0);
        assert_eq!(state.cycles_failed, 0);
        assert!(state.last_error.is_none());
    }

    #[test]
    fn heartbeat_moves_only_while_running() {
        let mut state = RunState::default();
        state.transition(RunStatus::Starting).unwrap();
        state.record_cycle(true);
        assert!(state.heartbeat_at.is_none());

        state.transition(RunStatus::Running).unwrap();
        state.record_cycle(false);
        assert!(state.heartbeat_at.is_some());
        assert_eq!((state.cycles_total, state.cycles_succeeded, state.cycles_failed), (2, 1, 1));
    }

    #[test]
    fn status_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&RunStatus::Paused).unwrap(), "\"paused\"");
    }
}
