pub mod config;
pub mod errors;
pub mod handlers;
pub mod router;
pub mod state;
pub mod types;

use crate::{
    config::{get_config, AppConfig},
    router::create_router,
    state::{build_app_state, AppState},
};
use std::future::Future;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};
use tracing_subscriber::FmtSubscriber;

/// Serves the API on `listener` until `shutdown` resolves.
///
/// On shutdown the active run, if any, is asked to stop so its job log is
/// closed before the process exits.
pub async fn serve<F>(listener: TcpListener, app_state: AppState, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let orchestrator = app_state.orchestrator.clone();
    let app = create_router(app_state);

    info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.await;
            info!("Shutdown requested.");
            if orchestrator.cancel().await {
                warn!("Cancelled the active run before shutting down.");
            }
        })
        .await?;

    Ok(())
}

/// Configures and runs the web server until Ctrl+C.
pub async fn run(listener: TcpListener, config: AppConfig) -> anyhow::Result<()> {
    debug!(?config, "Server configuration loaded");

    let app_state = build_app_state(config).await?;
    serve(listener, app_state, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Cannot listen for the shutdown signal: {e}");
            std::future::pending::<()>().await;
        }
    })
    .await
}

/// The library's main entry point.
///
/// Sets up logging, configuration, and the TCP listener, then calls `run`.
/// `CONFIG_FILE` may point at a configuration file other than `config.yml`.
pub async fn start() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config_path = std::env::var("CONFIG_FILE").ok();
    let config = get_config(config_path.as_deref())?;
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr).await?;
    info!("Server listening on {}", addr);

    run(listener, config).await
}
