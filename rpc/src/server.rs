//! Axum-based RPC server.

use crate::error::RpcError;
use crate::handlers;
use axum::routing::{get, post, put};
use axum::Router;
use polity_coordinator::SessionCoordinator;
use std::future::Future;
use std::net::SocketAddr;
use tower_http::cors::CorsLayer;

/// Shared handler state.
#[derive(Clone)]
pub struct RpcState {
    pub coordinator: SessionCoordinator,
}

/// Every route of the API. `/metrics` is mounted only when enabled.
pub fn router(state: RpcState, enable_metrics: bool) -> Router {
    let mut app = Router::new()
        .route("/health", get(handlers::health))
        .route("/sessions", post(handlers::start_introduction))
        .route("/sessions/:id", get(handlers::get_session))
        .route("/sessions/:id/voting", post(handlers::start_voting))
        .route(
            "/sessions/:id/votes",
            post(handlers::cast_vote).put(handlers::change_vote),
        )
        .route("/sessions/:id/indications", post(handlers::cast_indication))
        .route("/sessions/:id/close", post(handlers::close_voting))
        .route("/sessions/:id/tally", get(handlers::live_tally))
        .route("/events/:id/voters", get(handlers::eligible_voters))
        .route("/events/:id/sessions", get(handlers::event_sessions))
        .route("/events/:id/roster", put(handlers::sync_roster))
        .route("/elections/:id/candidates", post(handlers::become_candidate))
        .route(
            "/elections/:id/candidates/:candidate/accept",
            post(handlers::accept_candidacy),
        )
        .route(
            "/elections/:id/candidates/:candidate/withdraw",
            post(handlers::withdraw_candidacy),
        )
        .route("/elections/:id/ballot", get(handlers::ballot))
        .route(
            "/amendments/:id/change-requests",
            get(handlers::change_requests).post(handlers::register_change_request),
        )
        .route(
            "/amendments/:id/change-requests/order",
            put(handlers::reorder_change_requests),
        )
        .route(
            "/amendments/:id/change-requests/:cr/activate",
            post(handlers::activate_change_request),
        );
    if enable_metrics {
        app = app.route("/metrics", get(handlers::metrics));
    }
    app.layer(CorsLayer::permissive()).with_state(state)
}

pub struct RpcServer {
    pub port: u16,
    pub enable_metrics: bool,
    state: RpcState,
}

impl RpcServer {
    pub fn new(port: u16, enable_metrics: bool, coordinator: SessionCoordinator) -> Self {
        Self {
            port,
            enable_metrics,
            state: RpcState { coordinator },
        }
    }

    /// Bind and serve until `shutdown` resolves. In-flight requests finish
    /// before this returns.
    pub async fn serve<F>(self, shutdown: F) -> Result<(), RpcError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| RpcError::Server(format!("failed to bind {addr}: {e}")))?;
        tracing::info!(%addr, metrics = self.enable_metrics, "RPC server listening");

        let app = router(self.state, self.enable_metrics);
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| RpcError::Server(e.to_string()))?;
        tracing::info!("RPC server stopped");
        Ok(())
    }
}
