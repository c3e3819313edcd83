//! The background worker and the state it shares with the controller.
//!
//! The controller and the loop only talk through [`RunShared`]: atomic flags
//! and a `Notify` going in, the run-state snapshot coming out. Every loop
//! mutation is tagged with its run generation so a loop that outlived a forced
//! stop cannot touch the state of a newer run.

use crate::run_state::{RunState, RunStateStore, RunStatus, TransitionError};
use crate::strategy::{CycleContext, StrategyCycle};
use anyhow::Result;
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{oneshot, Notify};
use tokio::time::Instant;

pub(crate) struct RunShared {
    state: Mutex<RunState>,
    store: Arc<dyn RunStateStore>,
    persist_lock: tokio::sync::Mutex<()>,
    stop: AtomicBool,
    paused: AtomicBool,
    wake: Notify,
    generation: AtomicU64,
}

impl RunShared {
    pub(crate) fn new(initial: RunState, store: Arc<dyn RunStateStore>) -> Self {
        Self {
            state: Mutex::new(initial),
            store,
            persist_lock: tokio::sync::Mutex::new(()),
            stop: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            wake: Notify::new(),
            generation: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn snapshot(&self) -> RunState {
        self.lock().clone()
    }

    pub(crate) fn status(&self) -> RunStatus {
        self.lock().status
    }

    pub(crate) fn transition(
        &self,
        next: RunStatus,
        update: impl FnOnce(&mut RunState),
    ) -> Result<RunState, TransitionError> {
        let mut state = self.lock();
        state.transition(next)?;
        update(&mut state);
        Ok(state.clone())
    }

    pub(crate) fn update_state(&self, update: impl FnOnce(&mut RunState)) {
        update(&mut self.lock());
    }

    /// Like [`Self::transition`], but a no-op for a superseded loop.
    fn transition_for(
        &self,
        generation: u64,
        next: RunStatus,
        update: impl FnOnce(&mut RunState),
    ) -> Option<RunState> {
        let mut state = self.lock();
        if !self.is_current(generation) {
            return None;
        }
        state.transition(next).ok()?;
        update(&mut state);
        Some(state.clone())
    }

    fn record_cycle(&self, generation: u64, succeeded: bool, error: Option<String>) {
        let mut state = self.lock();
        if self.is_current(generation) {
            state.record_cycle(succeeded);
            if error.is_some() {
                state.last_error = error;
            }
        }
    }

    /// Writes the current snapshot. Saves are serialized so the newest state always lands last.
    pub(crate) async fn persist(&self) -> Result<()> {
        let _guard = self.persist_lock.lock().await;
        let snapshot = self.snapshot();
        self.store.save(&snapshot).await
    }

    pub(crate) async fn persist_best_effort(&self) {
        if let Err(e) = self.persist().await {
            tracing::warn!("Failed to persist run state: {:#}", e);
        }
    }

    /// Starts a new generation with clean flags and returns its id.
    pub(crate) fn begin_generation(&self) -> u64 {
        self.stop.store(false, Ordering::SeqCst);
        self.paused.store(false, Ordering::SeqCst);
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Detaches whatever loop is running from the shared state.
    pub(crate) fn retire_generation(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    pub(crate) fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        self.paused.store(false, Ordering::SeqCst);
        self.wake.notify_one();
    }

    pub(crate) fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
        self.wake.notify_one();
    }

    fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Sleeps for `period` or until a flag changes.
    async fn idle(&self, period: Duration) {
        self.idle_until(Instant::now() + period).await;
    }

    /// Sleeps until `deadline` or until a flag changes. Callers re-check the
    /// flags and their own deadline afterwards.
    async fn idle_until(&self, deadline: Instant) {
        tokio::select! {
            () = tokio::time::sleep_until(deadline) => {}
            () = self.wake.notified() => {}
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct LoopSettings {
    pub cycle_interval: Duration,
    pub pause_poll: Duration,
    pub max_bookkeeping_failures: u32,
}

pub(crate) struct RunLoop {
    pub shared: Arc<RunShared>,
    pub strategy: Arc<dyn StrategyCycle>,
    pub settings: LoopSettings,
    pub generation: u64,
    pub context: CycleContext,
}

impl RunLoop {
    /// Runs until stopped or until bookkeeping fails for good.
    ///
    /// The loop itself performs `Starting -> Running` and then signals `began`.
    pub(crate) async fn run(mut self, began: oneshot::Sender<()>) {
        let generation = self.generation;
        if self.shared.transition_for(generation, RunStatus::Running, |_| {}).is_none() {
            tracing::warn!("Run loop superseded before it began");
            return;
        }
        self.shared.persist_best_effort().await;
        let _ = began.send(());
        tracing::info!(
            "Run loop began for account {} with strategy {}",
            self.context.account_id,
            self.strategy.name()
        );

        let mut bookkeeping_failures = 0u32;
        let mut next_due: Option<Instant> = None;
        loop {
            if self.shared.stop_requested() || !self.shared.is_current(generation) {
                break;
            }
            if self.shared.is_paused() {
                self.shared.idle(self.settings.pause_poll).await;
                continue;
            }
            // a wake that is neither stop nor pause keeps the current deadline
            if let Some(due) = next_due.filter(|due| Instant::now() < *due) {
                self.shared.idle_until(due).await;
                continue;
            }

            self.context.cycle += 1;
            let outcome = AssertUnwindSafe(self.strategy.run_cycle(&self.context))
                .catch_unwind()
                .await;
            let error = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(format!("cycle {} failed: {e:#}", self.context.cycle)),
                Err(_) => Some(format!("cycle {} panicked", self.context.cycle)),
            };
            if let Some(message) = &error {
                tracing::warn!("{}", message);
            }
            self.shared.record_cycle(generation, error.is_none(), error);

            match self.shared.persist().await {
                Ok(()) => bookkeeping_failures = 0,
                Err(e) => {
                    bookkeeping_failures += 1;
                    tracing::warn!(
                        "Run state bookkeeping failed ({}/{}): {:#}",
                        bookkeeping_failures,
                        self.settings.max_bookkeeping_failures,
                        e
                    );
                    if bookkeeping_failures >= self.settings.max_bookkeeping_failures {
                        let message = format!(
                            "fatal: run state bookkeeping failed {bookkeeping_failures} times in a row: {e:#}"
                        );
                        tracing::error!("{}", message);
                        self.shared
                            .transition_for(generation, RunStatus::Error, |s| {
                                s.last_error = Some(message);
                            });
                        self.shared.persist_best_effort().await;
                        break;
                    }
                }
            }

            next_due = Some(Instant::now() + self.settings.cycle_interval);
        }

        tracing::info!("Run loop exited after {} cycles", self.context.cycle);
    }
}
