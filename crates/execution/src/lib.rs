pub mod connection_registry;
pub mod coordinator;
pub mod events;
pub mod validation;

pub use connection_registry::{
    AccountOutcome, BulkConnectionReport, ConnectionRegistry, ConnectionSnapshot,
};
pub use coordinator::{
    AccountPositions, BulkCloseReport, ExecutionCoordinator, ExecutionResult, OpenPositionRequest,
    OrderStage,
};
pub use events::{BroadcastEventSink, CompositeEventSink, NullEventSink};
pub use validation::{OrderContext, OrderValidationEngine, PositionPreview, PreviewRequest};
