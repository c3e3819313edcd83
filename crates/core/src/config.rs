use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub connection: ConnectionConfig,
    pub trading: TradingConfig,
    pub bot: BotRunConfig,
    pub paper: PaperConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl ServerConfig {
    #[must_use]
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://tradedesk.db?mode=rwc".to_string(),
            max_connections: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Pause between teardown and re-authentication on reconnect
    pub reconnect_delay_ms: u64,
    /// Upper bound for one authentication round trip
    pub connect_timeout_secs: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: 2_000,
            connect_timeout_secs: 30,
        }
    }
}

impl ConnectionConfig {
    #[must_use]
    pub const fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TradingConfig {
    pub max_open_positions: usize,
    pub default_deviation: u32,
    pub default_magic: u64,
    /// Upper bound for one order submission / close / modify call
    pub submit_timeout_secs: u64,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            max_open_positions: 20,
            default_deviation: 20,
            default_magic: 234_000,
            submit_timeout_secs: 30,
        }
    }
}

impl TradingConfig {
    #[must_use]
    pub const fn submit_timeout(&self) -> Duration {
        Duration::from_secs(self.submit_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BotRunConfig {
    pub cycle_interval_secs: u64,
    pub pause_poll_ms: u64,
    pub stop_timeout_secs: u64,
    pub start_timeout_secs: u64,
    /// Consecutive run-state persistence failures tolerated before the loop gives up
    pub max_bookkeeping_failures: u32,
}

impl Default for BotRunConfig {
    fn default() -> Self {
        Self {
            cycle_interval_secs: 60,
            pause_poll_ms: 1_000,
            stop_timeout_secs: 10,
            start_timeout_secs: 10,
            max_bookkeeping_failures: 3,
        }
    }
}

impl BotRunConfig {
    #[must_use]
    pub const fn cycle_interval(&self) -> Duration {
        Duration::from_secs(self.cycle_interval_secs)
    }

    #[must_use]
    pub const fn pause_poll(&self) -> Duration {
        Duration::from_millis(self.pause_poll_ms)
    }

    #[must_use]
    pub const fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    #[must_use]
    pub const fn start_timeout(&self) -> Duration {
        Duration::from_secs(self.start_timeout_secs)
    }
}

/// Simulated broker used for demo accounts and local runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PaperConfig {
    pub balance: Decimal,
    pub leverage: u32,
    pub submit_latency_ms: u64,
    pub symbols: Vec<PaperSymbolConfig>,
    /// Accounts inserted into an empty account table at startup
    pub accounts: Vec<PaperAccountSeed>,
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            balance: Decimal::from(10_000),
            leverage: 100,
            submit_latency_ms: 0,
            symbols: vec![
                PaperSymbolConfig::new(
                    "EURUSD",
                    5,
                    Decimal::new(109_990, 5),
                    Decimal::new(110_000, 5),
                    Decimal::from(100_000),
                ),
                PaperSymbolConfig::new(
                    "USDJPY",
                    3,
                    Decimal::new(149_500, 3),
                    Decimal::new(149_512, 3),
                    Decimal::from(100_000),
                ),
                PaperSymbolConfig::new(
                    "XAUUSD",
                    2,
                    Decimal::new(235_010, 2),
                    Decimal::new(235_040, 2),
                    Decimal::from(100),
                ),
            ],
            accounts: vec![PaperAccountSeed {
                id: 1,
                name: "paper-main".to_string(),
                login: "100001".to_string(),
                is_default: true,
            }],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperSymbolConfig {
    pub name: String,
    pub digits: u32,
    pub bid: Decimal,
    pub ask: Decimal,
    pub contract_size: Decimal,
    #[serde(default = "default_volume_min")]
    pub volume_min: Decimal,
    #[serde(default = "default_volume_max")]
    pub volume_max: Decimal,
    #[serde(default = "default_volume_min")]
    pub volume_step: Decimal,
}

impl PaperSymbolConfig {
    #[must_use]
    pub fn new(
        name: &str,
        digits: u32,
        bid: Decimal,
        ask: Decimal,
        contract_size: Decimal,
    ) -> Self {
        Self {
            name: name.to_string(),
            digits,
            bid,
            ask,
            contract_size,
            volume_min: default_volume_min(),
            volume_max: default_volume_max(),
            volume_step: default_volume_min(),
        }
    }
}

fn default_volume_min() -> Decimal {
    Decimal::new(1, 2)
}

fn default_volume_max() -> Decimal {
    Decimal::from(100)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperAccountSeed {
    pub id: i64,
    pub name: String,
    pub login: String,
    #[serde(default)]
    pub is_default: bool,
}
