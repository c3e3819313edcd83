use anyhow::Result;
use clap::Args;
use tradedesk_core::ConfigLoader;

#[derive(Args, Debug)]
pub struct AuditArgs {
    /// Config file path
    #[arg(short, long, default_value = "config/Config.toml")]
    pub config: String,

    /// Number of entries to print, newest first
    #[arg(short, long, default_value = "20")]
    pub limit: u32,
}

pub async fn run_audit(args: AuditArgs) -> Result<()> {
    let config = ConfigLoader::load_from(&args.config)?;
    let database = super::open_database(&config.database).await?;

    for event in database.recent_audit(args.limit).await? {
        println!("{}", serde_json::to_string(&event)?);
    }
    Ok(())
}
