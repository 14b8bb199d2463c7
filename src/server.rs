use std::{net::SocketAddr, path::Path, sync::Arc};

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, get_service},
    Extension, Json, Router,
};
use serde::Deserialize;
use tokio::sync::oneshot;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    services::{ServeDir, ServeFile},
    trace::TraceLayer,
};
use tracing::{debug, info, warn};

use crate::{
    config::Config,
    error::Error,
    gateway::Gateway,
    gps::LocationFix,
    relay::{Command, CommandReceipt},
    supervisor::Role,
    transport::Transport,
};

/// The default port to run the server on.
pub const DEFAULT_PORT: u16 = 10000;

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Error::NotReady(Role::Relay) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Serial port not connected or not ready. Please wait.".to_string(),
            ),
            Error::NotReady(Role::Gps) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "GPS not connected or not ready. Please wait.".to_string(),
            ),
            Error::WriteFailed(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Serial write failed".to_string(),
            ),
            Error::InvalidCommand(_) => (StatusCode::BAD_REQUEST, "Invalid command".to_string()),
            Error::BadConfig(_) | Error::Io(_) | Error::Json(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
        };

        debug!(%self, %status, "Request failed");

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct CommandRequest {
    command: String,
}

async fn relay_command(
    Extension(gateway): Extension<Gateway>,
    request: Result<Json<CommandRequest>, JsonRejection>,
) -> Result<Json<CommandReceipt>, Error> {
    // Not being connected trumps a bad request.
    if gateway.relay().session().is_none() {
        return Err(Error::NotReady(Role::Relay));
    }

    let command: Command = match request {
        Ok(Json(request)) => request.command.parse()?,
        Err(rejection) => return Err(Error::InvalidCommand(rejection.to_string())),
    };

    gateway.send_relay_command(command).await.map(Json)
}

async fn location(Extension(gateway): Extension<Gateway>) -> Result<Json<LocationFix>, Error> {
    gateway.last_location().map(Json)
}

async fn demo_location(Extension(gateway): Extension<Gateway>) -> Json<LocationFix> {
    Json(gateway.demo_location())
}

async fn show_version() -> impl IntoResponse {
    format!("Relay GPS Gateway v{}\n", env!("CARGO_PKG_VERSION"))
}

async fn static_file_error(e: std::io::Error) -> impl IntoResponse {
    warn!(%e, "Serving static file failed");

    (StatusCode::INTERNAL_SERVER_ERROR, format!("Could not serve file: {e}"))
}

/// The routes of the gateway.
///
/// `GET /` serves `index.html` from the static directory,
/// other paths not routed here are served from the same directory.
pub fn app(gateway: Gateway, static_dir: &Path) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route(
            "/",
            get_service(ServeFile::new(static_dir.join("index.html")))
                .handle_error(static_file_error)
                .post(relay_command),
        )
        .route("/location", get(location))
        .route("/demolocation", get(demo_location))
        .route("/version", get(show_version))
        .fallback(get_service(ServeDir::new(static_dir)).handle_error(static_file_error))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors)
                // Each handler needs to be able to reach the devices
                .layer(Extension(gateway)),
        )
}

async fn run(
    config: Config,
    transport: Arc<dyn Transport>,
    port: Option<u16>,
    allocated_port: Option<oneshot::Sender<u16>>,
) -> Result<(), Error> {
    config.validate()?;

    let gateway = Gateway::start(&config, transport);
    let app = app(gateway, &config.server.static_dir);

    let addr = SocketAddr::from(([0, 0, 0, 0], port.unwrap_or(0)));
    let server = axum::Server::try_bind(&addr)
        .map_err(|e| Error::Io(format!("Could not bind to {addr}: {e}")))?
        .serve(app.into_make_service());
    let addr = server.local_addr();

    if let Some(port_reply) = allocated_port {
        if port_reply.send(addr.port()).is_err() {
            warn!("Nobody wanted to know which port was allocated");
        }
    }

    info!("listening on {}", addr);

    server.await.map_err(|e| Error::Io(e.to_string()))
}

/// Start the gateway and its server on an arbitrary available port.
/// The port allocated will be sent on the provided channel.
pub async fn run_any_port(
    config: Config,
    transport: Arc<dyn Transport>,
    allocated_port: oneshot::Sender<u16>,
) -> Result<(), Error> {
    run(config, transport, None, Some(allocated_port)).await
}

/// Start the gateway and its server on the given port.
pub async fn run_on_port(
    config: Config,
    transport: Arc<dyn Transport>,
    port: u16,
) -> Result<(), Error> {
    run(config, transport, Some(port), None).await
}
