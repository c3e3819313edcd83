use clap::{Parser, Subcommand};

mod commands;

use commands::{AccountsArgs, AuditArgs, ServeArgs};

#[derive(Parser)]
#[command(name = "tradedesk")]
#[command(about = "Multi-account trading desk backend", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the desk: connection registry, bot controller, and web API
    Serve(ServeArgs),
    /// List configured accounts and their connection markers
    Accounts(AccountsArgs),
    /// Print the most recent trade audit entries as JSON lines
    Audit(AuditArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };
    match &cli.command {
        Commands::Serve(ServeArgs {
            log_file: Some(path),
            ..
        }) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(filter())
                .with_writer(std::sync::Mutex::new(file))
                .init();
        }
        _ => {
            tracing_subscriber::fmt().with_env_filter(filter()).init();
        }
    }

    match cli.command {
        Commands::Serve(args) => commands::run_serve(args).await?,
        Commands::Accounts(args) => commands::run_accounts(args).await?,
        Commands::Audit(args) => commands::run_audit(args).await?,
    }

    Ok(())
}
