pub mod account;
pub mod config;
pub mod config_loader;
pub mod error;
pub mod events;
pub mod market;
pub mod memory;
pub mod order;
pub mod position;
pub mod traits;

pub use account::{Account, AccountId};
pub use config::{
    AppConfig, BotRunConfig, ConnectionConfig, DatabaseConfig, PaperAccountSeed, PaperConfig,
    PaperSymbolConfig, ServerConfig, TradingConfig,
};
pub use config_loader::ConfigLoader;
pub use error::{
    BrokerError, ConnectionError, ErrorKind, ExecutionError, PriceRelation, TradingError,
    ValidationError,
};
pub use events::TradeEvent;
pub use market::{AccountInfo, Side, SymbolInfo};
pub use memory::InMemoryAccountStore;
pub use order::{CloseReceipt, OrderReceipt, OrderRequest, Ticket};
pub use position::Position;
pub use traits::{AccountStore, BrokerConnector, ConnectorFactory, TradeEventSink};
