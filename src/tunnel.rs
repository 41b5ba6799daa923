//! HTTP tunnel management for agent dev servers.
//!
//! One outbound WebSocket per hub carries HTTP requests from the control
//! plane to dev servers running in agent worktrees, so no inbound port is
//! ever opened. Agents are addressed by session key; each key maps to a
//! local port.
//!
//! # Protocol
//!
//! The socket speaks ActionCable. After `subscribe` to
//! `{"channel":"TunnelChannel","hub_id":..}` the server answers with
//! `confirm_subscription` (connected) or `reject_subscription`.
//!
//! ```text
//! inbound   {type: "http_request", request_id, session_key, method, path, query, headers, body}
//! outbound  {type: "http_response", request_id, status, headers, body, content_type}
//! outbound  {command: "register", session_key, port}
//! ```
//!
//! Outbound payloads travel as the `data` string of an ActionCable
//! `message` command. Inbound requests arrive either wrapped in an
//! envelope's `message` field or bare.
//!
//! # Concurrency
//!
//! Each inbound request is forwarded on its own task and answered through
//! an outbound queue, so a slow dev server never delays responses for
//! other agents. Responses are correlated by `request_id`, not by order.

use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use reqwest::header::{HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::TcpListener;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Mutex as StdMutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tokio_tungstenite::{
    connect_async, tungstenite::client::IntoClientRequest, tungstenite::Message,
};

use anyhow::{anyhow, Context, Result};

use crate::config::Config;
use crate::constants;

const CHANNEL_NAME: &str = "TunnelChannel";

/// Request headers never passed to the local server.
const SKIPPED_REQUEST_HEADERS: &[&str] = &["host", "connection", "content-length"];

/// Response headers never passed back through the tunnel.
///
/// reqwest decompresses bodies itself and the WebSocket does its own
/// framing, so these would lie about the relayed body.
const SKIPPED_RESPONSE_HEADERS: &[&str] = &["content-encoding", "transfer-encoding"];

/// Tunnel connection status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TunnelStatus {
    /// Not connected to tunnel server.
    Disconnected = 0,
    /// Establishing tunnel connection.
    Connecting = 1,
    /// Subscription confirmed, relaying requests.
    Connected = 2,
}

impl From<u8> for TunnelStatus {
    fn from(value: u8) -> Self {
        match value {
            1 => TunnelStatus::Connecting,
            2 => TunnelStatus::Connected,
            _ => TunnelStatus::Disconnected,
        }
    }
}

/// Connection parameters for a [`TunnelManager`].
#[derive(Clone)]
pub struct TunnelConfig {
    /// Hub the subscription is scoped to.
    pub hub_identifier: String,
    /// Bearer token for the control plane.
    pub auth_token: String,
    /// Control plane base URL (`http(s)://...`).
    pub server_url: String,
    /// Ceiling for one forwarded request.
    pub request_timeout: Duration,
}

impl std::fmt::Debug for TunnelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelConfig")
            .field("hub_identifier", &self.hub_identifier)
            .field("server_url", &self.server_url)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

impl TunnelConfig {
    /// Config with the default request timeout.
    #[must_use]
    pub fn new(
        hub_identifier: impl Into<String>,
        auth_token: impl Into<String>,
        server_url: impl Into<String>,
    ) -> Self {
        Self {
            hub_identifier: hub_identifier.into(),
            auth_token: auth_token.into(),
            server_url: server_url.into(),
            request_timeout: constants::TUNNEL_REQUEST_TIMEOUT,
        }
    }

    /// Config for `hub_identifier` using the hub's configuration.
    #[must_use]
    pub fn from_config(config: &Config, hub_identifier: &str) -> Self {
        Self {
            request_timeout: config.tunnel_request_timeout(),
            ..Self::new(hub_identifier, config.token.clone(), config.server_url.clone())
        }
    }

    /// WebSocket endpoint. The key is repeated in the query because some
    /// proxies strip `Authorization` on upgrade.
    #[must_use]
    pub fn websocket_url(&self) -> String {
        format!(
            "{}/cable?api_key={}",
            self.server_url
                .trim_end_matches('/')
                .replace("https://", "wss://")
                .replace("http://", "ws://"),
            self.auth_token
        )
    }

    fn identifier(&self) -> String {
        serde_json::json!({
            "channel": CHANNEL_NAME,
            "hub_id": self.hub_identifier
        })
        .to_string()
    }
}

/// Allocate an available port for an agent's dev server.
///
/// Tries 4001..5000, avoiding common dev ports. Ports in `taken` belong to
/// other agents whose servers may not be listening yet, so a successful
/// bind alone does not make them free.
#[must_use]
pub fn allocate_tunnel_port(taken: &[u16]) -> Option<u16> {
    (constants::TUNNEL_PORT_START..constants::TUNNEL_PORT_END)
        .filter(|port| !taken.contains(port))
        .find(|port| TcpListener::bind(("127.0.0.1", *port)).is_ok())
}

/// Pending agent registration to announce to the server.
#[derive(Debug, Clone)]
pub struct PendingRegistration {
    /// Agent session key to register.
    pub session_key: String,
    /// Local dev server port.
    pub port: u16,
}

/// Inbound `http_request` frame.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpRequestFrame {
    /// Correlation id echoed in the response.
    pub request_id: String,
    /// Target agent.
    #[serde(alias = "agent_session_key")]
    pub session_key: String,
    /// HTTP method.
    #[serde(default = "default_method")]
    pub method: String,
    /// Request path, starting with `/`.
    #[serde(default = "default_path")]
    pub path: String,
    /// Query string without the leading `?`.
    #[serde(default, alias = "query_string")]
    pub query: Option<String>,
    /// Request headers.
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Request body.
    #[serde(default)]
    pub body: Option<String>,
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_path() -> String {
    "/".to_string()
}

/// Result of one forwarded request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TunnelResponse {
    /// HTTP status.
    pub status: u16,
    /// Response headers (lowercase names).
    pub headers: HashMap<String, String>,
    /// Response body.
    pub body: String,
    /// `Content-Type` of the body.
    pub content_type: String,
}

impl TunnelResponse {
    /// A plain-text error response.
    #[must_use]
    pub fn error(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: body.into(),
            content_type: "text/plain".to_string(),
        }
    }
}

/// What the message loop should do after one inbound frame.
enum FrameOutcome {
    Continue,
    Confirmed,
    Stop(String),
}

/// Manages the tunnel connection for all agents on this hub.
pub struct TunnelManager {
    config: TunnelConfig,
    // Map of session_key -> local port
    agent_ports: StdMutex<HashMap<String, u16>>,
    // Connection status (atomic for lock-free reads from the hub tick)
    status: AtomicU8,
    // Registrations to announce once connected
    pending_tx: mpsc::UnboundedSender<PendingRegistration>,
    pending_rx: Mutex<mpsc::UnboundedReceiver<PendingRegistration>>,
    client: reqwest::Client,
}

impl std::fmt::Debug for TunnelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelManager")
            .field("hub_identifier", &self.config.hub_identifier)
            .field("server_url", &self.config.server_url)
            .field("status", &self.get_status())
            .finish_non_exhaustive()
    }
}

impl TunnelManager {
    /// Creates a new tunnel manager. Nothing connects until [`connect()`](Self::connect).
    #[must_use]
    pub fn new(config: TunnelConfig) -> Self {
        let (pending_tx, pending_rx) = mpsc::unbounded_channel();
        Self {
            client: local_client(config.request_timeout),
            config,
            agent_ports: StdMutex::new(HashMap::new()),
            status: AtomicU8::new(TunnelStatus::Disconnected as u8),
            pending_tx,
            pending_rx: Mutex::new(pending_rx),
        }
    }

    /// The manager's connection parameters.
    #[must_use]
    pub fn config(&self) -> &TunnelConfig {
        &self.config
    }

    /// Get the current tunnel connection status
    #[must_use]
    pub fn get_status(&self) -> TunnelStatus {
        TunnelStatus::from(self.status.load(Ordering::Relaxed))
    }

    fn set_status(&self, status: TunnelStatus) {
        self.status.store(status as u8, Ordering::Relaxed);
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Register an agent's dev server port and queue its announcement.
    ///
    /// Safe before or after `connect()`: registrations made while
    /// disconnected are announced when the subscription is confirmed.
    pub fn register_agent(&self, session_key: impl Into<String>, port: u16) {
        let session_key = session_key.into();
        self.agent_ports
            .lock()
            .expect("agent_ports lock poisoned")
            .insert(session_key.clone(), port);

        if let Err(e) = self.pending_tx.send(PendingRegistration {
            session_key: session_key.clone(),
            port,
        }) {
            warn!("[Tunnel] Failed to queue agent registration: {e}");
        } else {
            debug!("[Tunnel] Queued registration for agent {session_key} on port {port}");
        }
    }

    /// Forget an agent. Returns its port if it was registered.
    pub fn unregister_agent(&self, session_key: &str) -> Option<u16> {
        let removed = self
            .agent_ports
            .lock()
            .expect("agent_ports lock poisoned")
            .remove(session_key);
        if let Some(port) = removed {
            debug!("[Tunnel] Unregistered agent {session_key} (port {port})");
        }
        removed
    }

    /// Get the port for an agent
    #[must_use]
    pub fn get_agent_port(&self, session_key: &str) -> Option<u16> {
        self.agent_ports
            .lock()
            .expect("agent_ports lock poisoned")
            .get(session_key)
            .copied()
    }

    /// Every registration, sorted by session key.
    #[must_use]
    pub fn registered_agents(&self) -> Vec<(String, u16)> {
        let mut agents: Vec<(String, u16)> = self
            .agent_ports
            .lock()
            .expect("agent_ports lock poisoned")
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        agents.sort();
        agents
    }

    // =========================================================================
    // Connection
    // =========================================================================

    /// Connect, subscribe, and relay requests until the connection ends.
    ///
    /// Returns `Ok(())` when a confirmed session later ends (server close,
    /// `disconnect` frame, socket error). Returns `Err` when the tunnel
    /// never reached `Connected`: handshake failure, rejected subscription,
    /// or a socket that dropped first. The status is `Disconnected` on
    /// return either way. Reconnecting is the caller's decision.
    ///
    /// # Errors
    ///
    /// See above.
    pub async fn connect(&self) -> Result<()> {
        self.set_status(TunnelStatus::Connecting);
        let result = self.run_session().await;
        self.set_status(TunnelStatus::Disconnected);
        result
    }

    async fn run_session(&self) -> Result<()> {
        let ws_url = self.config.websocket_url();
        info!("[Tunnel] Connecting to {}", self.config.server_url);

        let mut request = ws_url
            .into_client_request()
            .context("Failed to build WebSocket request")?;

        // Origin is required by ActionCable. No fallback: an invalid
        // server_url should fail explicitly.
        request.headers_mut().insert(
            "Origin",
            self.config
                .server_url
                .parse()
                .with_context(|| format!("Invalid server URL '{}'", self.config.server_url))?,
        );
        request.headers_mut().insert(
            "Authorization",
            format!("Bearer {}", self.config.auth_token)
                .parse()
                .context("Auth token is not a valid header value")?,
        );

        let (ws_stream, _) = tokio::time::timeout(
            constants::TUNNEL_CONNECT_TIMEOUT,
            connect_async(request),
        )
        .await
        .context("WebSocket handshake timed out")?
        .context("WebSocket connection failed")?;
        info!("[Tunnel] WebSocket connected");

        let (mut write, mut read) = ws_stream.split();

        let identifier = self.config.identifier();
        let subscribe_msg = serde_json::json!({
            "command": "subscribe",
            "identifier": identifier,
        });
        write
            .send(Message::Text(subscribe_msg.to_string()))
            .await
            .context("Failed to send subscribe")?;
        info!(
            "[Tunnel] Subscribe sent, entering message loop for hub {}",
            self.config.hub_identifier
        );

        // Responses from request tasks funnel through here.
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let mut pending_rx = self.pending_rx.lock().await;
        let mut confirmed = false;
        let mut failure: Option<String> = None;

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            match self.handle_message(&text, &identifier, &out_tx) {
                                FrameOutcome::Continue => {}
                                FrameOutcome::Confirmed => {
                                    confirmed = true;
                                    self.set_status(TunnelStatus::Connected);
                                    info!("[Tunnel] Subscription confirmed - tunnel connected");

                                    // Everything queued so far is covered by the full replay.
                                    while pending_rx.try_recv().is_ok() {}
                                    for (session_key, port) in self.registered_agents() {
                                        info!("[Tunnel] Registering agent {session_key} on port {port}");
                                        let frame = register_frame(&identifier, &session_key, port);
                                        if let Err(e) = write.send(Message::Text(frame)).await {
                                            warn!("[Tunnel] Failed to register agent tunnel: {e}");
                                        }
                                    }
                                }
                                FrameOutcome::Stop(reason) => {
                                    failure = Some(reason);
                                    break;
                                }
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            if let Err(e) = write.send(Message::Pong(data)).await {
                                warn!("[Tunnel] Failed to send pong: {e}");
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            info!("[Tunnel] Connection closed by server: {frame:?}");
                            failure = Some("connection closed by server".to_string());
                            break;
                        }
                        Some(Err(e)) => {
                            error!("[Tunnel] WebSocket error: {e}");
                            failure = Some(format!("WebSocket error: {e}"));
                            break;
                        }
                        None => {
                            info!("[Tunnel] WebSocket stream ended");
                            failure = Some("WebSocket stream ended".to_string());
                            break;
                        }
                        Some(Ok(other)) => {
                            debug!("[Tunnel] Ignoring message: {other:?}");
                        }
                    }
                }
                Some(frame) = out_rx.recv() => {
                    if let Err(e) = write.send(Message::Text(frame)).await {
                        error!("[Tunnel] Failed to send response: {e}");
                        failure = Some(format!("send failed: {e}"));
                        break;
                    }
                }
                Some(registration) = pending_rx.recv() => {
                    // Only announce while connected and still registered;
                    // otherwise the replay on confirm covers it.
                    let current = self.get_agent_port(&registration.session_key);
                    if confirmed && current == Some(registration.port) {
                        info!("[Tunnel] Notifying server of agent {} on port {}",
                            registration.session_key, registration.port);
                        let frame = register_frame(&identifier, &registration.session_key, registration.port);
                        if let Err(e) = write.send(Message::Text(frame)).await {
                            warn!("[Tunnel] Failed to register agent tunnel: {e}");
                        }
                    } else {
                        debug!("[Tunnel] Skipping registration for {} (will register on connect)",
                            registration.session_key);
                    }
                }
            }
        }

        if confirmed {
            info!("[Tunnel] Session ended: {}", failure.as_deref().unwrap_or("closed"));
            Ok(())
        } else {
            Err(anyhow!(
                "Tunnel never connected: {}",
                failure.as_deref().unwrap_or("unknown")
            ))
        }
    }

    /// Interpret one inbound text frame. Never fails: bad frames are logged
    /// and dropped.
    fn handle_message(
        &self,
        text: &str,
        identifier: &str,
        out_tx: &mpsc::UnboundedSender<String>,
    ) -> FrameOutcome {
        let msg: serde_json::Value = match serde_json::from_str(text) {
            Ok(msg) => msg,
            Err(e) => {
                warn!("[Tunnel] Dropping malformed frame: {e}");
                return FrameOutcome::Continue;
            }
        };

        // ActionCable control frames and bare requests carry a top-level type
        if let Some(msg_type) = msg.get("type").and_then(|t| t.as_str()) {
            match msg_type {
                "welcome" => info!("[Tunnel] ActionCable welcome received"),
                "ping" => {}
                "confirm_subscription" => return FrameOutcome::Confirmed,
                "reject_subscription" => {
                    warn!("[Tunnel] Subscription rejected for hub {}", self.config.hub_identifier);
                    return FrameOutcome::Stop("subscription rejected".to_string());
                }
                "disconnect" => {
                    let reason = msg
                        .get("reason")
                        .and_then(|r| r.as_str())
                        .unwrap_or("unspecified");
                    warn!("[Tunnel] Disconnected by server: {reason}");
                    return FrameOutcome::Stop(format!("disconnected by server: {reason}"));
                }
                "http_request" => self.dispatch_request(&msg, identifier, out_tx),
                other => debug!("[Tunnel] Ignoring frame type {other}"),
            }
            return FrameOutcome::Continue;
        }

        if let Some(message) = msg.get("message") {
            if message.get("type").and_then(|t| t.as_str()) == Some("http_request") {
                self.dispatch_request(message, identifier, out_tx);
            } else {
                debug!("[Tunnel] Ignoring channel message");
            }
        }

        FrameOutcome::Continue
    }

    /// Start forwarding one request on its own task.
    fn dispatch_request(
        &self,
        value: &serde_json::Value,
        identifier: &str,
        out_tx: &mpsc::UnboundedSender<String>,
    ) {
        let frame: HttpRequestFrame = match serde_json::from_value(value.clone()) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("[Tunnel] Dropping malformed http_request: {e}");
                return;
            }
        };

        debug!(
            "[Tunnel] HTTP request {} for agent {}: {} {}",
            frame.request_id, frame.session_key, frame.method, frame.path
        );

        let Some(port) = self.get_agent_port(&frame.session_key) else {
            warn!("[Tunnel] Agent {} not registered", frame.session_key);
            let response = TunnelResponse::error(
                502,
                format!("No tunnel registered for agent {}", frame.session_key),
            );
            let _ = out_tx.send(response_frame(identifier, &frame.request_id, &response));
            return;
        };

        let client = self.client.clone();
        let out_tx = out_tx.clone();
        let identifier = identifier.to_string();
        tokio::spawn(async move {
            let response = forward_with_client(
                &client,
                port,
                &frame.method,
                &frame.path,
                frame.query.as_deref().unwrap_or_default(),
                &frame.headers,
                frame.body.as_deref().unwrap_or_default(),
            )
            .await;
            // Receiver gone means the session ended; the caller times out.
            let _ = out_tx.send(response_frame(&identifier, &frame.request_id, &response));
        });
    }

    // =========================================================================
    // Forwarding
    // =========================================================================

    /// Issue a real HTTP request to `127.0.0.1:port`.
    ///
    /// Redirects are returned verbatim, never followed. Connection failures
    /// and timeouts both become a `502` whose body says which one happened;
    /// this never returns an error.
    /// Each call is independent (no cookie jar).
    #[allow(
        clippy::implicit_hasher,
        reason = "internal API doesn't need hasher generalization"
    )]
    pub async fn forward_request(
        &self,
        port: u16,
        method: &str,
        path: &str,
        query: &str,
        headers: &HashMap<String, String>,
        body: &str,
    ) -> TunnelResponse {
        forward_with_client(&self.client, port, method, path, query, headers, body).await
    }
}

/// HTTP client for local forwarding.
fn local_client(timeout: Duration) -> reqwest::Client {
    // Don't follow redirects - return them to the browser so it can navigate.
    // This is important for OAuth flows that redirect to external sites.
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .timeout(timeout)
        .build()
        .unwrap_or_else(|e| {
            warn!("[Tunnel] Falling back to default HTTP client: {e}");
            reqwest::Client::new()
        })
}

async fn forward_with_client(
    client: &reqwest::Client,
    port: u16,
    method: &str,
    path: &str,
    query: &str,
    headers: &HashMap<String, String>,
    body: &str,
) -> TunnelResponse {
    let Ok(method) = reqwest::Method::from_bytes(method.to_ascii_uppercase().as_bytes()) else {
        warn!("[Tunnel] Invalid HTTP method {method:?}");
        return TunnelResponse::error(400, format!("Invalid HTTP method: {method}"));
    };

    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };
    let url = if query.is_empty() {
        format!("http://127.0.0.1:{port}{path}")
    } else {
        format!("http://127.0.0.1:{port}{path}?{query}")
    };

    let mut req = client.request(method.clone(), &url);

    for (key, value) in headers {
        if SKIPPED_REQUEST_HEADERS.contains(&key.to_ascii_lowercase().as_str()) {
            continue;
        }
        match (
            HeaderName::from_bytes(key.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => req = req.header(name, value),
            _ => debug!("[Tunnel] Dropping invalid header {key:?}"),
        }
    }

    if !body.is_empty() && method != reqwest::Method::GET && method != reqwest::Method::HEAD {
        req = req.body(body.to_string());
    }

    match req.send().await {
        Ok(resp) => {
            let status = resp.status().as_u16();
            let content_type = resp
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("text/html")
                .to_string();
            let resp_headers: HashMap<String, String> = resp
                .headers()
                .iter()
                .filter(|(k, _)| !SKIPPED_RESPONSE_HEADERS.contains(&k.as_str()))
                .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
                .collect();
            let body = match resp.text().await {
                Ok(body) => body,
                Err(e) => {
                    warn!("[Tunnel] Failed to read response body from port {port}: {e}");
                    String::new()
                }
            };

            TunnelResponse {
                status,
                headers: resp_headers,
                body,
                content_type,
            }
        }
        Err(e) if e.is_timeout() => {
            warn!("[Tunnel] Request to port {port} timed out");
            TunnelResponse::error(
                502,
                format!("Local server on port {port} timed out"),
            )
        }
        Err(e) => {
            error!("[Tunnel] Failed to forward request to port {port}: {e}");
            TunnelResponse::error(
                502,
                format!("Failed to connect to local server on port {port}: {e}"),
            )
        }
    }
}

/// Wrap a payload as an ActionCable `message` command.
fn envelope(identifier: &str, data: &serde_json::Value) -> String {
    serde_json::json!({
        "command": "message",
        "identifier": identifier,
        "data": data.to_string(),
    })
    .to_string()
}

fn response_frame(identifier: &str, request_id: &str, response: &TunnelResponse) -> String {
    envelope(
        identifier,
        &serde_json::json!({
            "action": "http_response",
            "type": "http_response",
            "request_id": request_id,
            "status": response.status,
            "headers": response.headers,
            "body": response.body,
            "content_type": response.content_type,
        }),
    )
}

fn register_frame(identifier: &str, session_key: &str, port: u16) -> String {
    envelope(
        identifier,
        &serde_json::json!({
            "action": "register_agent_tunnel",
            "command": "register",
            "session_key": session_key,
            "port": port,
        }),
    )
}
