use anyhow::Result;
use clap::Args;
use tradedesk_core::{AccountStore, ConfigLoader};

#[derive(Args, Debug)]
pub struct AccountsArgs {
    /// Config file path
    #[arg(short, long, default_value = "config/Config.toml")]
    pub config: String,
}

pub async fn run_accounts(args: AccountsArgs) -> Result<()> {
    let config = ConfigLoader::load_from(&args.config)?;
    let database = super::open_database(&config.database).await?;
    let accounts = database.list().await?;

    if accounts.is_empty() {
        println!("No accounts configured");
        return Ok(());
    }

    println!(
        "{:>4}  {:<16} {:<8} {:<10} {:<6} {:<7} {:<25} {:<25}",
        "ID", "NAME", "BROKER", "LOGIN", "ACTIVE", "DEFAULT", "LAST CONNECTED", "LAST DISCONNECTED"
    );
    let marker = |at: Option<chrono::DateTime<chrono::Utc>>| {
        at.map_or_else(|| "-".to_string(), |t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
    };
    for account in accounts {
        println!(
            "{:>4}  {:<16} {:<8} {:<10} {:<6} {:<7} {:<25} {:<25}",
            account.id,
            account.name,
            account.broker,
            account.login,
            if account.is_active { "yes" } else { "no" },
            if account.is_default { "yes" } else { "no" },
            marker(account.last_connected_at),
            marker(account.last_disconnected_at),
        );
    }

    Ok(())
}
