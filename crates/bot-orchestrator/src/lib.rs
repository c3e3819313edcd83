pub mod controller;
pub mod database;
mod run_loop;
pub mod run_state;
pub mod strategy;

pub use controller::{RunControlError, RunController, StartRequest};
pub use database::RunDatabase;
pub use run_state::{
    InMemoryRunStateStore, RunFlags, RunState, RunStateStore, RunStatus, TransitionError,
};
pub use strategy::{CycleContext, PositionMonitorCycle, StrategyCycle};
