use crate::{handlers, websocket};
use axum::{
    routing::{get, post, put},
    Router,
};
use std::future::Future;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tradedesk_bot_orchestrator::RunController;
use tradedesk_execution::{BroadcastEventSink, ConnectionRegistry, ExecutionCoordinator};

/// Everything a handler can reach.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ConnectionRegistry>,
    pub coordinator: Arc<ExecutionCoordinator>,
    pub controller: Arc<RunController>,
    /// Source for the `/ws` trade event stream
    pub events: BroadcastEventSink,
}

pub struct ApiServer {
    state: AppState,
}

impl ApiServer {
    #[must_use]
    pub const fn new(state: AppState) -> Self {
        Self { state }
    }

    pub fn router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        Router::new()
            .route("/api/sessions", get(handlers::list_sessions))
            .route("/api/sessions/reconnect-all", post(handlers::reconnect_all))
            .route("/api/sessions/disconnect-all", post(handlers::disconnect_all))
            .route("/api/accounts/:account_id/connect", post(handlers::connect_account))
            .route("/api/accounts/:account_id/disconnect", post(handlers::disconnect_account))
            .route("/api/accounts/:account_id/reconnect", post(handlers::reconnect_account))
            .route("/api/accounts/:account_id/connection", get(handlers::connection_state))
            .route(
                "/api/accounts/:account_id/positions",
                get(handlers::account_positions).post(handlers::open_position),
            )
            .route(
                "/api/accounts/:account_id/positions/:ticket",
                put(handlers::modify_position).delete(handlers::close_position),
            )
            .route("/api/accounts/:account_id/close-all", post(handlers::close_all))
            .route("/api/accounts/:account_id/preview", post(handlers::preview_position))
            .route("/api/positions", get(handlers::all_positions))
            .route("/api/bot/status", get(handlers::bot_status))
            .route("/api/bot/start", post(handlers::start_bot))
            .route("/api/bot/stop", post(handlers::stop_bot))
            .route("/api/bot/pause", post(handlers::pause_bot))
            .route("/api/bot/resume", post(handlers::resume_bot))
            .route("/api/bot/reset", post(handlers::reset_bot))
            .route("/ws", get(websocket::websocket_handler))
            .layer(cors)
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Starts the web server listening on the specified address.
    ///
    /// # Errors
    /// Returns an error if the server fails to bind to the address or serve requests.
    pub async fn serve(self, addr: &str) -> anyhow::Result<()> {
        self.serve_with_shutdown(addr, std::future::pending()).await
    }

    /// Like [`Self::serve`], returning once `shutdown` resolves and in-flight requests finish.
    ///
    /// # Errors
    /// Returns an error if the server fails to bind to the address or serve requests.
    pub async fn serve_with_shutdown(
        self,
        addr: &str,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("Web API listening on {}", addr);

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await?;

        Ok(())
    }
}
