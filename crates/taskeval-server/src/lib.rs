//! HTTP surface of the unlock service.
//!
//! Identity comes from the `x-user-id` header set by the fronting proxy.
//! Gateway webhooks are authenticated by their body signature instead.
//!
//! # Configuration
//!
//! Every key is read from the environment, and secrets may also be mounted
//! under `/run/secrets/<NAME>`. See [`config::Config::from_lookup`].
//!
//! Run against the scripted collaborators:
//! ```sh
//! RUST_LOG=info COLLABORATOR_MODE=offline cargo run -p taskeval-server
//! ```

use tokio::{net::TcpListener, signal};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;

use config::Config;
use error::ServerError;
use routes::build_router;
use state::State;

pub async fn start_server() -> Result<(), ServerError> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    info!("Loading configuration...");
    let config = Config::load()?;
    info!(?config, "Configuration loaded");

    info!("Initializing state...");
    let state = State::from_config(&config)?;
    let app = build_router(state);

    let address = format!("0.0.0.0:{}", config.port);
    info!("Binding to {address}");
    let listener = TcpListener::bind(&address).await?;
    info!("Server running on {address}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down"),
            Err(err) => {
                warn!("Failed to install Ctrl+C handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(err) => {
                warn!("Failed to install signal handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
