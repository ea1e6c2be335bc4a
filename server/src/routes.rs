use axum::{http::StatusCode, routing::get};
use color_eyre::eyre::WrapErr;
use tracing::info;

use crate::state::AppState;

pub mod znc;

pub use znc::ProxyState;

/// Build the proxy router with all routes
pub fn routes(app_state: AppState) -> axum::Router {
    axum::Router::new()
        .route("/health", get(health))
        .nest("/api/znc", znc::routes())
        // Add trace layer for debugging
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(ProxyState::new(app_state))
}

async fn health() -> StatusCode {
    StatusCode::NO_CONTENT
}

/// Listen on `listen` and serve the proxy until the process exits
pub async fn serve(app_state: AppState, listen: &str) -> color_eyre::Result<()> {
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .wrap_err_with(|| format!("Failed to listen on {}", listen))?;

    info!("znc proxy listening on {}", listener.local_addr()?);
    axum::serve(listener, routes(app_state))
        .await
        .wrap_err("Proxy server failed")?;

    Ok(())
}
