use crate::run_state::RunFlags;
use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Arc;
use tradedesk_core::AccountId;
use tradedesk_execution::ExecutionCoordinator;

/// Inputs for one strategy cycle.
#[derive(Debug, Clone)]
pub struct CycleContext {
    pub account_id: AccountId,
    /// 1-based cycle number within the current run
    pub cycle: u64,
    pub config_ref: Option<String>,
    pub flags: RunFlags,
}

impl CycleContext {
    #[must_use]
    pub fn flag(&self, name: &str) -> bool {
        self.flags.get(name).copied().unwrap_or(false)
    }
}

/// One unit of recurring bot work. An `Err` is counted and logged; the loop keeps going.
#[async_trait]
pub trait StrategyCycle: Send + Sync {
    fn name(&self) -> &str;

    async fn run_cycle(&self, ctx: &CycleContext) -> Result<()>;
}

/// Watches the target account's exposure through the coordinator.
pub struct PositionMonitorCycle {
    coordinator: Arc<ExecutionCoordinator>,
}

impl PositionMonitorCycle {
    #[must_use]
    pub const fn new(coordinator: Arc<ExecutionCoordinator>) -> Self {
        Self { coordinator }
    }
}

#[async_trait]
impl StrategyCycle for PositionMonitorCycle {
    fn name(&self) -> &str {
        "position-monitor"
    }

    async fn run_cycle(&self, ctx: &CycleContext) -> Result<()> {
        let books = self
            .coordinator
            .get_open_positions(Some(ctx.account_id), None)
            .await?;

        let positions = books.iter().flat_map(|b| &b.positions);
        let (count, volume, floating) = positions.fold(
            (0usize, Decimal::ZERO, Decimal::ZERO),
            |(n, v, p), pos| (n + 1, v + pos.volume, p + pos.profit),
        );

        tracing::info!(
            account_id = ctx.account_id,
            cycle = ctx.cycle,
            "{} open positions, {} lots, floating {}",
            count,
            volume,
            floating
        );
        Ok(())
    }
}
