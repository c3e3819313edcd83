use crate::config::AppConfig;
use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use std::path::Path;

pub const ENV_PREFIX: &str = "TRADEDESK_";

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads configuration from `config/Config.toml` overlaid with `TRADEDESK_*` env vars.
    ///
    /// # Errors
    ///
    /// Returns an error if the file or environment cannot be parsed.
    pub fn load() -> Result<AppConfig> {
        Self::load_from("config/Config.toml")
    }

    /// Loads configuration from a specific TOML file.
    ///
    /// A missing file is not an error; defaults and the environment still apply.
    /// Nested keys use a double underscore, e.g. `TRADEDESK_BOT__CYCLE_INTERVAL_SECS`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file or environment cannot be parsed.
    pub fn load_from(path: impl AsRef<Path>) -> Result<AppConfig> {
        let path = path.as_ref();
        let config: AppConfig = Self::figment(path)
            .extract()
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?;

        tracing::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        figment::Jail::expect_with(|_jail| {
            let config = ConfigLoader::load_from("does/not/exist.toml").expect("defaults");
            assert_eq!(config.trading.max_open_positions, 20);
            assert_eq!(config.connection.reconnect_delay_ms, 2_000);
            assert_eq!(config.bot.max_bookkeeping_failures, 3);
            Ok(())
        });
    }

    #[test]
    fn toml_and_env_overlay() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "Config.toml",
                r#"
                [trading]
                max_open_positions = 5

                [bot]
                cycle_interval_secs = 15
                "#,
            )?;
            jail.set_env("TRADEDESK_BOT__CYCLE_INTERVAL_SECS", "30");
            jail.set_env("TRADEDESK_SERVER__PORT", "9090");

            let config = ConfigLoader::load_from("Config.toml").expect("config");
            assert_eq!(config.trading.max_open_positions, 5);
            assert_eq!(config.bot.cycle_interval_secs, 30);
            assert_eq!(config.server.port, 9090);
            assert_eq!(config.trading.default_deviation, 20);
            Ok(())
        });
    }
}
