pub mod error;
pub mod handlers;
pub mod settings;
pub mod state;

use anyhow::Result;
use axum::Router;
use state::AppState;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Run the HTTP broker process.
pub async fn run_server(settings: settings::Settings) -> Result<()> {
    let state = AppState::new(&settings)?;

    // Reload trust policy on SIGHUP without dropping in-flight requests
    #[cfg(unix)]
    tokio::spawn(reload_loop(state.clone()));

    let api_routes = Router::new()
        .route(
            "/credentials",
            axum::routing::post(handlers::issue_credentials),
        )
        .route("/roles", axum::routing::get(handlers::list_roles))
        .route("/health", axum::routing::get(health_check))
        .route("/version", axum::routing::get(version_info));

    let app = Router::new()
        .nest("/api/v1", api_routes)
        .with_state(state)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()));

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    info!("HTTP server listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP server shutdown complete");
    Ok(())
}

/// Re-read configuration and swap the role snapshot on each SIGHUP.
///
/// A failed reload keeps the previous snapshot: a broken config file must
/// never take a running broker down to zero roles.
#[cfg(unix)]
async fn reload_loop(state: AppState) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(stream) => stream,
        Err(err) => {
            tracing::error!(error = %err, "failed to install SIGHUP handler, reload disabled");
            return;
        }
    };

    while hangup.recv().await.is_some() {
        info!("Received SIGHUP, reloading trust policy");
        let role_set = settings::Settings::new()
            .map_err(anyhow::Error::from)
            .and_then(|settings| settings.compile_roles());
        match role_set {
            Ok(role_set) => {
                info!("Reloaded {} role(s)", role_set.len());
                state.roles.replace(role_set).await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "reload failed, keeping previous trust policy");
            }
        }
    }
}

async fn health_check() -> &'static str {
    "OK"
}

async fn version_info() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Wait for a shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), shutting down gracefully");
        },
        _ = terminate => {
            info!("Received SIGTERM, shutting down gracefully");
        },
    }
}
