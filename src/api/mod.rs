//! REST API over the tables and summary of a finished run.
//!
//! Provides three GET endpoints:
//! - `/summary`: run summary counters
//! - `/tables`: name, columns and row count of every table
//! - `/tables/{name}`: rows of one table, with optional `from`/`to` range

mod handlers;
mod types;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::routing::get;

use crate::sim::results::Results;
use crate::sim::summary::RunSummary;

/// Read-only state shared by all handlers, built once after the run.
pub struct AppState {
    pub summary: RunSummary,
    /// Materialized default tables and custom views.
    pub results: Results,
}

/// Builds the axum router with all API routes.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/summary", get(handlers::get_summary))
        .route("/tables", get(handlers::list_tables))
        .route("/tables/{name}", get(handlers::get_table))
        .with_state(state)
}

/// Binds to the given address and serves the API.
///
/// # Panics
///
/// Panics if the TCP listener cannot bind to `addr`.
pub async fn serve(state: Arc<AppState>, addr: SocketAddr) {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .unwrap_or_else(|e| panic!("failed to bind to {addr}: {e}"));
    tracing::info!(%addr, "API server listening");
    axum::serve(listener, app)
        .await
        .unwrap_or_else(|e| panic!("server error: {e}"));
}
