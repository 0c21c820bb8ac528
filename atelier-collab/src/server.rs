//! WebSocket server: one task per connection, one JSON text frame per
//! message.
//!
//! Connection lifecycle:
//! ```text
//! TCP accept ─► WS handshake (credential from `Authorization: Bearer …`
//!               or `?token=…`)
//!   ├─ verify fails ──► error{authenticationFailure} ─► close
//!   └─ ok ──► connected{sessionId}
//!              │
//!              ▼
//!        select! loop ── client frame ──► CollabHub ──► replies / error ack
//!              │      ── room event ───► forward unless excluded
//!              │      ── join deadline ► error{timeout} ─► close
//!              │      ── heartbeat ────► ping
//!              ▼
//!        disconnect ─► leave (always) ─► session dropped
//! ```

use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, RwLock};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use atelier_core::DEFAULT_HISTORY_DEPTH;

use crate::broadcast::RoomEvent;
use crate::error::SyncError;
use crate::hub::{CollabHub, HistoryAction, HubConfig};
use crate::identity::IdentityVerifier;
use crate::protocol::{ClientMessage, ErrorKind, ServerMessage};
use crate::store::ThemeStore;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Broadcast channel capacity per room
    pub broadcast_capacity: usize,
    /// Maximum members per room
    pub max_members_per_room: usize,
    pub max_rooms: usize,
    pub max_sessions: usize,
    /// Undo levels kept per theme
    pub history_depth: usize,
    /// Seconds an authenticated connection may stay outside a room
    pub join_timeout_secs: u64,
    /// Minimum gap between two relayed cursor moves of one session
    pub cursor_interval_ms: u64,
    /// Heartbeat interval in seconds
    pub heartbeat_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            broadcast_capacity: 256,
            max_members_per_room: 100,
            max_rooms: 1024,
            max_sessions: 4096,
            history_depth: DEFAULT_HISTORY_DEPTH,
            join_timeout_secs: 30,
            cursor_interval_ms: 33,
            heartbeat_interval_secs: 30,
        }
    }
}

impl ServerConfig {
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            broadcast_capacity: self.broadcast_capacity,
            max_members_per_room: self.max_members_per_room,
            max_rooms: self.max_rooms,
            max_sessions: self.max_sessions,
            history_depth: self.history_depth,
            cursor_interval: Duration::from_millis(self.cursor_interval_ms),
        }
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    /// Handshakes refused for a bad or missing credential
    pub rejected_connections: u64,
    pub total_messages: u64,
    pub total_bytes: u64,
    pub active_rooms: usize,
}

/// The sync server.
pub struct SyncServer {
    config: ServerConfig,
    hub: Arc<CollabHub>,
    stats: Arc<RwLock<ServerStats>>,
}

/// Per-connection room membership.
struct Membership {
    theme_id: Option<String>,
    events: Option<broadcast::Receiver<Arc<RoomEvent>>>,
}

impl SyncServer {
    pub fn new(config: ServerConfig, verifier: Arc<dyn IdentityVerifier>, store: Arc<dyn ThemeStore>) -> Self {
        let hub = Arc::new(CollabHub::new(config.hub_config(), verifier, store));
        Self {
            config,
            hub,
            stats: Arc::new(RwLock::new(ServerStats::default())),
        }
    }

    /// The synchronizer, for in-process callers of the push API.
    pub fn hub(&self) -> &Arc<CollabHub> {
        &self.hub
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    /// Bind the configured address and serve forever.
    pub async fn run(&self) -> Result<(), BoxError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Sync server listening on {}", self.config.bind_addr);
        self.serve(listener).await
    }

    /// Accept connections from an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), BoxError> {
        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let hub = self.hub.clone();
            let stats = self.stats.clone();
            let config = self.config.clone();
            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, hub, stats, config).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Handle a single WebSocket connection.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        hub: Arc<CollabHub>,
        stats: Arc<RwLock<ServerStats>>,
        config: ServerConfig,
    ) -> Result<(), BoxError> {
        let mut credential: Option<String> = None;
        let ws_stream = tokio_tungstenite::accept_hdr_async(stream, |req: &Request, resp: Response| {
            credential = credential_from_request(req);
            Ok::<Response, ErrorResponse>(resp)
        })
        .await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        let session = match hub.authenticate(credential.as_deref().unwrap_or_default()).await {
            Ok(session) => session,
            Err(e) => {
                log::warn!("Rejected connection from {addr}: {e}");
                let reply = ServerMessage::error(e.kind(), e.to_string(), None);
                if let Ok(text) = reply.encode() {
                    let _ = ws_sender.send(Message::text(text)).await;
                }
                let _ = ws_sender.send(Message::Close(None)).await;
                let mut s = stats.write().await;
                s.active_connections -= 1;
                s.rejected_connections += 1;
                return Ok(());
            }
        };
        let session_id = session.session_id;
        let connected = ServerMessage::Connected {
            session_id,
            subject_id: session.subject_id.clone(),
        };
        log::info!("WebSocket session {session_id} ({}) established from {addr}", session.subject_id);

        let result = match ws_sender.send(Message::text(connected.encode()?)).await {
            Ok(()) => {
                Self::session_loop(&mut ws_sender, &mut ws_receiver, session_id, &hub, &stats, &config).await
            }
            Err(e) => Err(e.into()),
        };

        // Cleanup runs whether or not the client left explicitly.
        hub.disconnect(session_id).await;
        {
            let mut s = stats.write().await;
            s.active_connections -= 1;
        }
        log::info!("Connection closed from {addr}");
        result
    }

    async fn session_loop<S, R>(
        ws_sender: &mut S,
        ws_receiver: &mut R,
        session_id: Uuid,
        hub: &CollabHub,
        stats: &RwLock<ServerStats>,
        config: &ServerConfig,
    ) -> Result<(), BoxError>
    where
        S: futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
        R: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        let mut membership = Membership {
            theme_id: None,
            events: None,
        };
        let join_timeout = Duration::from_secs(config.join_timeout_secs);
        let join_deadline = tokio::time::sleep(join_timeout);
        tokio::pin!(join_deadline);
        let period = Duration::from_secs(config.heartbeat_interval_secs.max(1));
        let mut heartbeat = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

        loop {
            tokio::select! {
                // Incoming WebSocket message
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            {
                                let mut s = stats.write().await;
                                s.total_messages += 1;
                                s.total_bytes += text.len() as u64;
                            }
                            let was_in_room = membership.theme_id.is_some();
                            let replies = match ClientMessage::decode(text.as_str()) {
                                Ok(request) => Self::dispatch(hub, session_id, request, &mut membership).await,
                                Err(e) => {
                                    log::warn!("Failed to decode message from {session_id}: {e}");
                                    vec![ServerMessage::error(ErrorKind::InvalidOperation, e.to_string(), None)]
                                }
                            };
                            for reply in replies {
                                ws_sender.send(Message::text(reply.encode()?)).await?;
                            }
                            if was_in_room && membership.theme_id.is_none() {
                                join_deadline.as_mut().reset(tokio::time::Instant::now() + join_timeout);
                            }
                        }

                        Some(Ok(Message::Binary(_))) => {
                            let reply = ServerMessage::error(
                                ErrorKind::InvalidOperation,
                                "binary frames are not supported",
                                None,
                            );
                            ws_sender.send(Message::text(reply.encode()?)).await?;
                        }

                        Some(Ok(Message::Ping(data))) => {
                            ws_sender.send(Message::Pong(data)).await?;
                        }

                        Some(Ok(Message::Close(_))) | None => break,

                        Some(Err(e)) => {
                            log::error!("WebSocket error on session {session_id}: {e}");
                            break;
                        }

                        _ => {}
                    }
                }

                // Outgoing room event
                event = async {
                    match membership.events.as_mut() {
                        Some(rx) => rx.recv().await,
                        // Not in a room yet, wait forever
                        None => std::future::pending().await,
                    }
                } => {
                    match event {
                        Ok(event) => {
                            if event.visible_to(session_id) {
                                ws_sender.send(Message::text(event.encoded.to_string())).await?;
                            }
                        }
                        Err(RecvError::Lagged(n)) => {
                            log::warn!("Session {session_id} lagged by {n} events");
                            if let Some(theme_id) = &membership.theme_id {
                                hub.note_lagged(theme_id, n).await;
                            }
                        }
                        Err(RecvError::Closed) => membership.events = None,
                    }
                }

                // Idle join window
                _ = &mut join_deadline, if membership.theme_id.is_none() => {
                    log::info!("Session {session_id} did not join a theme within {join_timeout:?}");
                    let reply = ServerMessage::error(ErrorKind::Timeout, "no theme joined in time", None);
                    ws_sender.send(Message::text(reply.encode()?)).await?;
                    ws_sender.send(Message::Close(None)).await?;
                    break;
                }

                _ = heartbeat.tick() => {
                    ws_sender.send(Message::Ping(Vec::new().into())).await?;
                }
            }
        }
        Ok(())
    }

    /// Run one client request. Returns the replies meant for the requester
    /// only; everything else travels through the room broadcast.
    async fn dispatch(hub: &CollabHub, session_id: Uuid, request: ClientMessage, membership: &mut Membership) -> Vec<ServerMessage> {
        let name = request.type_name();
        let outcome: Result<Vec<ServerMessage>, SyncError> = match request {
            ClientMessage::JoinTheme { theme_id, page_slug } => {
                match hub.join(session_id, &theme_id, page_slug).await {
                    Ok(outcome) => {
                        if let Some(receiver) = outcome.receiver {
                            membership.events = Some(receiver);
                        }
                        membership.theme_id = Some(theme_id);
                        Ok(vec![outcome.snapshot.sync_state(), outcome.snapshot.active_users()])
                    }
                    Err(e) => {
                        // A failed switch may already have left the old room.
                        if hub.session(session_id).await.and_then(|s| s.theme_id).is_none() {
                            membership.theme_id = None;
                            membership.events = None;
                        }
                        Err(e)
                    }
                }
            }
            ClientMessage::LeaveTheme {} => hub.leave(session_id).await.map(|_| {
                membership.theme_id = None;
                membership.events = None;
                Vec::new()
            }),
            ClientMessage::PreviewUpdate { path, value, temporary } => hub
                .apply_preview(session_id, &path, value, temporary)
                .await
                .map(|_| Vec::new()),
            ClientMessage::BlockUpdate(op) => hub
                .apply_block_operation(session_id, op)
                .await
                .map(|_| Vec::new()),
            ClientMessage::SelectBlock { block_id } => hub
                .select_block(session_id, block_id)
                .await
                .map(|_| Vec::new()),
            ClientMessage::CursorMove { x, y, block_id } => hub
                .cursor_move(session_id, x, y, block_id)
                .await
                .map(|_| Vec::new()),
            ClientMessage::RequestSync {} => hub
                .request_sync(session_id)
                .await
                .map(|snapshot| vec![snapshot.sync_state(), snapshot.active_users()]),
            ClientMessage::ClearPreviewChanges {} => hub.clear_preview(session_id).await.map(|_| Vec::new()),
            ClientMessage::SaveChanges { notify } => hub
                .save_changes(session_id, notify)
                .await
                // Without `notify` only the requester is told.
                .map(|saved| if notify { Vec::new() } else { vec![saved] }),
            ClientMessage::Undo {} => Self::step_history(hub, session_id, HistoryAction::Undo).await,
            ClientMessage::Redo {} => Self::step_history(hub, session_id, HistoryAction::Redo).await,
            ClientMessage::UpdateSettings { patch, merge } => hub
                .update_settings(session_id, patch, merge)
                .await
                .map(|_| Vec::new()),
        };

        outcome.unwrap_or_else(|e| {
            log::warn!("Rejected {name} from {session_id}: {e}");
            vec![ServerMessage::error(e.kind(), e.to_string(), Some(name))]
        })
    }

    async fn step_history(hub: &CollabHub, session_id: Uuid, action: HistoryAction) -> Result<Vec<ServerMessage>, SyncError> {
        let result = match action {
            HistoryAction::Undo => hub.undo(session_id).await,
            HistoryAction::Redo => hub.redo(session_id).await,
        };
        match result {
            Ok(_) => Ok(Vec::new()),
            Err(SyncError::EmptyHistory) => Ok(vec![ServerMessage::HistoryEmpty {
                action: action.as_str().to_string(),
            }]),
            Err(e) => Err(e),
        }
    }

    /// Get server statistics.
    pub async fn stats(&self) -> ServerStats {
        let mut stats = self.stats.read().await.clone();
        stats.active_rooms = self.hub.room_count().await;
        stats
    }
}

/// Bearer token from the `Authorization` header, else the `token` query
/// parameter.
fn credential_from_request(req: &Request) -> Option<String> {
    let header = req
        .headers()
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty());
    header.or_else(|| {
        req.uri().query()?.split('&').find_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            (key == "token" && !value.is_empty()).then(|| value.to_string())
        })
    })
}
