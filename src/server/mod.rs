//! Local development server speaking the vector service REST API.
//!
//! Useful for running the workflow without a real deployment and for
//! end-to-end tests.

pub mod routes;
pub mod store;

pub use store::CollectionStore;

use std::sync::{Arc, RwLock};
use tokio::net::TcpListener;
use tracing::info;

/// Shared application state for the HTTP server.
#[derive(Default)]
pub struct AppState {
    pub store: RwLock<CollectionStore>,
}

/// Bind `addr` and serve until the process is stopped.
pub async fn start(addr: &str) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    serve(listener).await
}

/// Serve on an already bound listener.
pub async fn serve(listener: TcpListener) -> anyhow::Result<()> {
    let state = Arc::new(AppState::default());
    let app = routes::create_router(state);
    info!(addr = %listener.local_addr()?, "server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
