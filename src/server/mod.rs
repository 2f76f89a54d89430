//! HTTP surface for the extraction pipeline.
//!
//! - `GET /` welcome message
//! - `GET /health` liveness probe
//! - `POST /extract` raw image body in, structured text out

mod handlers;
mod routes;

pub use handlers::{status_for, ApiError, ExtractParams};
pub use routes::create_router;

use std::net::SocketAddr;
use std::sync::Arc;

use crate::config::Settings;
use crate::ocr::OcrEngine;
use crate::pipeline::{ExtractOptions, Pipeline};

/// Shared state for the web server.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    /// Options applied when a request leaves them unset.
    pub defaults: ExtractOptions,
}

impl AppState {
    pub fn new(settings: &Settings, engine: Arc<dyn OcrEngine>) -> Self {
        Self {
            pipeline: Arc::new(Pipeline::new(engine, settings.pipeline.clone())),
            defaults: settings.defaults.clone(),
        }
    }
}

/// Start the web server.
pub async fn serve(state: AppState, addr: SocketAddr) -> anyhow::Result<()> {
    let app = create_router(state);

    tracing::info!("Starting server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
