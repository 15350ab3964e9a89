//! WebSocket transport server using Axum.
//!
//! Handles the HTTP upgrade on the message path, pumps frames between each
//! socket and the relay, and exposes the host-facing control surface.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    extract::{
        OriginalUri, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::{IntoResponse, Json},
    routing::get,
};
use devrelay_protocol::ConnectionId;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::connection::ConnectionHandle;
use crate::editor::{self, EditorLauncher};

/// Implemented by the relay core. The transport calls it for every connection
/// lifecycle event and every inbound frame.
pub trait RelayHandler: Send + Sync + 'static {
    /// Register a freshly upgraded connection and return its identity.
    /// `request_url` is the upgrade request's path and query string.
    fn connect(&self, handle: ConnectionHandle, request_url: &str) -> ConnectionId;

    /// Route one inbound frame from `from`.
    fn frame(&self, from: ConnectionId, payload: &str, is_binary: bool);

    /// Forget a connection. Called once per close or error; must tolerate repeats.
    fn disconnect(&self, id: ConnectionId);

    /// Send `method` to every connection as the relay itself.
    fn broadcast(&self, method: &str, params: Option<Value>);

    fn connection_count(&self) -> usize;
}

/// Transport server configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Port to listen on (0 for OS-assigned)
    pub port: u16,
    /// Hostname to bind to
    pub hostname: String,
    /// Path that upgrades to the relay WebSocket
    pub message_path: String,
    /// Path of the editor-launch endpoint
    pub editor_path: String,
    /// Project roots handed to the editor launcher
    pub watch_folders: Vec<PathBuf>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            port: 8081,
            hostname: "127.0.0.1".into(),
            message_path: "/message".into(),
            editor_path: "/open-stack-frame".into(),
            watch_folders: Vec::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid listen address: {0}")]
    Address(#[from] std::net::AddrParseError),
    #[error("failed to bind listener: {0}")]
    Bind(#[from] std::io::Error),
    #[error("invalid route path `{0}`: must start with '/' and contain no captures")]
    InvalidPath(String),
    #[error("route path `{0}` is used by more than one endpoint")]
    RouteConflict(String),
}

const STATUS_PATH: &str = "/status";

/// Check the configured paths before handing them to the router, which
/// panics on malformed or duplicate routes.
fn validate_routes(config: &TransportConfig) -> Result<(), TransportError> {
    let paths = [
        config.message_path.as_str(),
        config.editor_path.as_str(),
        STATUS_PATH,
    ];
    for (i, path) in paths.iter().enumerate() {
        let literal = path.starts_with('/')
            && !path.contains(['{', '}'])
            && !path.split('/').any(|seg| seg.starts_with([':', '*']));
        if !literal {
            return Err(TransportError::InvalidPath(path.to_string()));
        }
        if paths[..i].contains(path) {
            return Err(TransportError::RouteConflict(path.to_string()));
        }
    }
    Ok(())
}

/// Host-facing control surface returned by [`attach`].
pub struct RelayControl<H> {
    handler: Arc<H>,
}

impl<H> Clone for RelayControl<H> {
    fn clone(&self) -> Self {
        Self {
            handler: self.handler.clone(),
        }
    }
}

impl<H: RelayHandler> RelayControl<H> {
    /// Always true once the relay has been attached.
    pub fn is_relay_active(&self) -> bool {
        true
    }

    /// Push `method` to every connected peer as the server, not as any client.
    pub fn server_broadcast(&self, method: &str, params: Option<Value>) {
        self.handler.broadcast(method, params);
    }

    pub fn connection_count(&self) -> usize {
        self.handler.connection_count()
    }
}

/// Install the relay's upgrade route at `path` on `router`.
pub fn attach<H: RelayHandler>(
    router: Router,
    path: &str,
    handler: Arc<H>,
) -> (Router, RelayControl<H>) {
    let relay_routes = Router::new()
        .route(path, get(ws_upgrade_handler::<H>))
        .with_state(handler.clone());
    (router.merge(relay_routes), RelayControl { handler })
}

/// The transport server: owns the listener task and the relay's control surface.
pub struct TransportServer<H> {
    control: RelayControl<H>,
    /// Shutdown signal
    shutdown_tx: Option<mpsc::Sender<()>>,
    /// Server task handle
    handle: Option<tokio::task::JoinHandle<()>>,
    /// Actual bound port
    port: u16,
}

impl<H: RelayHandler> TransportServer<H> {
    /// Bind the listener and start serving the relay, status, and editor routes.
    pub async fn start(
        config: TransportConfig,
        handler: Arc<H>,
        launcher: Arc<dyn EditorLauncher>,
    ) -> Result<Self, TransportError> {
        validate_routes(&config)?;
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);

        let status = RelayControl {
            handler: handler.clone(),
        };
        let app = Router::new()
            .route(STATUS_PATH, get(status_handler::<H>))
            .with_state(status)
            .merge(editor::router(
                &config.editor_path,
                launcher,
                config.watch_folders.clone(),
            ));
        let (app, control) = attach(app, &config.message_path, handler);

        let addr: SocketAddr = format!("{}:{}", config.hostname, config.port).parse()?;
        let listener = tokio::net::TcpListener::bind(addr).await?;
        let actual_port = listener.local_addr()?.port();

        info!(
            "devrelay listening on ws://{}:{}{}",
            config.hostname, actual_port, config.message_path
        );

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.recv().await;
                })
                .await
            {
                error!("Transport server exited with error: {e}");
            }
        });

        Ok(Self {
            control,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
            port: actual_port,
        })
    }

    pub fn control(&self) -> RelayControl<H> {
        self.control.clone()
    }

    /// Get the actual bound port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Gracefully stop the server.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
        info!("devrelay transport stopped");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// HTTP Handlers
// ─────────────────────────────────────────────────────────────────────────────

async fn ws_upgrade_handler<H: RelayHandler>(
    ws: WebSocketUpgrade,
    OriginalUri(uri): OriginalUri,
    State(handler): State<Arc<H>>,
) -> impl IntoResponse {
    let request_url = uri.to_string();
    ws.on_upgrade(move |socket| handle_ws_connection(socket, handler, request_url))
}

async fn status_handler<H: RelayHandler>(
    State(control): State<RelayControl<H>>,
) -> impl IntoResponse {
    Json(json!({
        "status": "running",
        "relayActive": control.is_relay_active(),
        "clients": control.connection_count(),
    }))
}

// ─────────────────────────────────────────────────────────────────────────────
// WebSocket Connection Handler
// ─────────────────────────────────────────────────────────────────────────────

async fn handle_ws_connection<H: RelayHandler>(
    socket: WebSocket,
    handler: Arc<H>,
    request_url: String,
) {
    let (handle, mut outbound_rx) = ConnectionHandle::new();
    let client_id = handler.connect(handle.clone(), &request_url);
    info!(client = %client_id, url = %request_url, "Client connected");

    let (mut ws_tx, mut ws_rx) = socket.split();

    loop {
        tokio::select! {
            // Incoming WebSocket message
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if !handle.is_open() {
                            debug!(client = %client_id, "Dropping frame for closed connection");
                            continue;
                        }
                        handler.frame(client_id, text.as_str(), false);
                    }
                    Some(Ok(Message::Binary(data))) => {
                        if !handle.is_open() {
                            continue;
                        }
                        handler.frame(client_id, &String::from_utf8_lossy(&data), true);
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = ws_tx.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(client = %client_id, "Client closed the connection");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(client = %client_id, "WebSocket error: {e}");
                        break;
                    }
                    _ => {}
                }
            }

            // Frames routed to this client by the relay
            outbound = outbound_rx.recv() => {
                let Some(text) = outbound else { break };
                if let Err(e) = ws_tx.send(Message::Text(text.into())).await {
                    error!(client = %client_id, "Failed to send frame: {e}");
                    break;
                }
            }
        }
    }

    handler.disconnect(client_id);
    info!(
        client = %client_id,
        "Client disconnected after {:.1}s (total: {})",
        handle.connected_for().as_secs_f64(),
        handler.connection_count()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(message_path: &str, editor_path: &str) -> TransportConfig {
        TransportConfig {
            port: 0,
            message_path: message_path.into(),
            editor_path: editor_path.into(),
            ..TransportConfig::default()
        }
    }

    #[test]
    fn default_routes_are_valid() {
        assert!(validate_routes(&TransportConfig::default()).is_ok());
        assert!(validate_routes(&config("/", "/editor/open")).is_ok());
    }

    #[test]
    fn path_without_leading_slash_is_rejected() {
        let err = validate_routes(&config("message", "/open-stack-frame")).unwrap_err();
        assert!(matches!(err, TransportError::InvalidPath(ref p) if p == "message"));

        let err = validate_routes(&config("/message", "")).unwrap_err();
        assert!(matches!(err, TransportError::InvalidPath(ref p) if p.is_empty()));
    }

    #[test]
    fn capture_segments_are_rejected() {
        assert!(matches!(
            validate_routes(&config("/{id}", "/open-stack-frame")),
            Err(TransportError::InvalidPath(_))
        ));
        assert!(matches!(
            validate_routes(&config("/message", "/files/*rest")),
            Err(TransportError::InvalidPath(_))
        ));
    }

    #[test]
    fn duplicate_paths_conflict() {
        let err = validate_routes(&config("/message", "/message")).unwrap_err();
        assert!(matches!(err, TransportError::RouteConflict(ref p) if p == "/message"));

        let err = validate_routes(&config("/status", "/open-stack-frame")).unwrap_err();
        assert!(matches!(err, TransportError::RouteConflict(ref p) if p == "/status"));
    }

    struct Idle;

    impl RelayHandler for Idle {
        fn connect(&self, _handle: ConnectionHandle, _request_url: &str) -> ConnectionId {
            ConnectionId::new(0)
        }
        fn frame(&self, _from: ConnectionId, _payload: &str, _is_binary: bool) {}
        fn disconnect(&self, _id: ConnectionId) {}
        fn broadcast(&self, _method: &str, _params: Option<Value>) {}
        fn connection_count(&self) -> usize {
            0
        }
    }

    struct NoEditor;

    impl EditorLauncher for NoEditor {
        fn open(
            &self,
            _file: &std::path::Path,
            _line: u32,
            _watch_folders: &[PathBuf],
        ) -> Result<(), editor::EditorError> {
            Err(editor::EditorError::NoEditor)
        }
    }

    #[tokio::test]
    async fn start_reports_bad_path_instead_of_panicking() {
        let result = TransportServer::start(
            config("message", "/open-stack-frame"),
            Arc::new(Idle),
            Arc::new(NoEditor),
        )
        .await;
        assert!(matches!(result, Err(TransportError::InvalidPath(_))));

        let result = TransportServer::start(
            config("/message", "/message"),
            Arc::new(Idle),
            Arc::new(NoEditor),
        )
        .await;
        assert!(matches!(result, Err(TransportError::RouteConflict(_))));
    }
}
