pub mod connector;
pub mod market;

pub use connector::{PaperConnector, PaperConnectorFactory, PLATFORM};
pub use market::{PaperFaults, PaperMarket};
