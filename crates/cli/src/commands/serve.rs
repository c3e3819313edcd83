use anyhow::Result;
use clap::Args;
use std::sync::Arc;
use tradedesk_bot_orchestrator::{PositionMonitorCycle, RunController};
use tradedesk_core::{ConfigLoader, TradeEventSink};
use tradedesk_execution::{
    BroadcastEventSink, CompositeEventSink, ConnectionRegistry, ExecutionCoordinator,
};
use tradedesk_paper::{PaperConnectorFactory, PaperMarket};
use tradedesk_web_api::{ApiServer, AppState};

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Config file path
    #[arg(short, long, default_value = "config/Config.toml")]
    pub config: String,

    /// Listen address, overriding `server.host`/`server.port`
    #[arg(short, long, env = "TRADEDESK_ADDR")]
    pub addr: Option<String>,

    /// Optional log file path (logs to file instead of stderr)
    #[arg(long)]
    pub log_file: Option<String>,
}

/// Wires the desk together and serves until SIGINT or SIGTERM.
pub async fn run_serve(args: ServeArgs) -> Result<()> {
    tracing::info!("Starting trading desk with config: {}", args.config);
    let config = ConfigLoader::load_from(&args.config)?;

    let database = Arc::new(super::open_database(&config.database).await?);
    database
        .seed_paper_accounts(&config.paper.accounts, config.paper.balance)
        .await?;

    let market = Arc::new(PaperMarket::from_config(&config.paper));
    let registry = Arc::new(ConnectionRegistry::new(
        Arc::new(PaperConnectorFactory::new(market)),
        database.clone(),
        config.connection.clone(),
    ));

    let broadcast = BroadcastEventSink::default();
    let events: Arc<dyn TradeEventSink> = Arc::new(
        CompositeEventSink::default()
            .with(Arc::new(broadcast.clone()))
            .with(database.clone()),
    );
    let coordinator = Arc::new(ExecutionCoordinator::new(
        registry.clone(),
        database.clone(),
        events,
        config.trading.clone(),
    ));

    let controller = Arc::new(
        RunController::restore(
            registry.clone(),
            database.clone(),
            database.clone(),
            Arc::new(PositionMonitorCycle::new(coordinator.clone())),
            config.bot.clone(),
        )
        .await?,
    );
    tracing::info!("Bot restored in state {}", controller.status().status);

    let server = ApiServer::new(AppState {
        registry: registry.clone(),
        coordinator,
        controller: controller.clone(),
        events: broadcast,
    });
    let addr = args.addr.unwrap_or_else(|| config.server.addr());
    server.serve_with_shutdown(&addr, shutdown_signal()).await?;

    tracing::info!("Stopping bot...");
    controller.shutdown().await;

    tracing::info!("Disconnecting all accounts...");
    let report = registry.disconnect_all().await;
    if report.failed > 0 {
        tracing::warn!("{} account(s) failed to disconnect cleanly", report.failed);
    }

    tracing::info!("Trading desk stopped");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => {
                        tracing::info!("Received SIGTERM, initiating graceful shutdown");
                    }
                    _ = tokio::signal::ctrl_c() => {
                        tracing::info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
                    }
                }
                return;
            }
            Err(e) => tracing::warn!("Failed to install SIGTERM handler: {}", e),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl+C: {}", e);
    }
    tracing::info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
}
