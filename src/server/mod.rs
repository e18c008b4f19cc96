use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info};

use crate::config::Config;
use crate::data::registry::DataRegistry;

pub mod api;
pub mod error;
pub mod routes;

pub use error::AppError;
pub use routes::{router, AppState};

#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error(transparent)]
    Ingest(#[from] crate::data::ingest::IngestError),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Server error: {0}")]
    Io(#[from] std::io::Error),
}

/// Load every dataset, then serve until ctrl-c or SIGTERM.
///
/// Requests are only accepted once all three collections are ingested.
pub async fn run_server(config: Config) -> Result<(), ServeError> {
    let registry = DataRegistry::load(&config.sources, &config.fetch).await?;
    serve(config, registry).await
}

pub async fn serve(config: Config, registry: Arc<DataRegistry>) -> Result<(), ServeError> {
    let state = AppState {
        registry,
        max_top: config.max_top,
    };
    let app = router(state, &config.odata_prefix);

    let listener = TcpListener::bind(&config.bind)
        .await
        .map_err(|source| ServeError::Bind {
            addr: config.bind.clone(),
            source,
        })?;
    info!(
        "covid-odata listening on http://{} (OData root /{})",
        config.bind, config.odata_prefix
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
