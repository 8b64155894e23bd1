pub mod api;
pub mod app_state;
pub mod command;
pub mod config;
pub mod control;
pub mod error;
pub mod log_sink;
pub mod media;
pub mod session;

use axum::Router;
use axum::extract::Extension;
use axum::routing::{get, post};
use tokio::net::TcpListener;
use tower_http::cors::Any;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

//
// Re-export
//
pub use api::{
    list_videos, log_request_errors, logs, start_stream, status, stop_stream, upload_video,
};
pub use app_state::AppState;
pub use command::{CommandBuilder, EncodeCommand, StreamRequest, build};
pub use config::Config;
pub use control::{ControlInterface, SessionHandle};
pub use error::{StreamError, ValidationError};
pub use log_sink::LogSink;
pub use session::{ExitReason, SessionState, StopAck, StopScope, StreamSession};

pub fn router(state: AppState) -> Router {
    // CORS layer
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/stream/start", post(start_stream))
        .route("/stream/stop", post(stop_stream))
        .route("/stream/logs", get(logs))
        .route("/stream/status", get(status))
        .route("/upload", post(upload_video))
        .route("/videos", get(list_videos))
        .layer(axum::middleware::from_fn(api::log_request_errors))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(Extension(state))
}

/// Serve the API until ctrl-c, then stop any running session.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let state = AppState::new(&config).await?;
    let control = state.control.clone();
    let app = router(state);

    let addr = format!("0.0.0.0:{}", config.listen_on_port);
    let listener = TcpListener::bind(&addr).await?;
    info!("API listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(error) = tokio::signal::ctrl_c().await {
                warn!(?error, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            info!("Shutting down");
        })
        .await?;

    if control.stop() == StopAck::Signalled {
        let state = control.wait_terminated().await;
        info!(state = state.name(), "Streaming session stopped on shutdown");
    }

    Ok(())
}
