//! WebSocket editor client.
//!
//! Connects with a bearer token, sends [`ClientMessage`]s and surfaces every
//! [`ServerMessage`] it receives on an mpsc channel. Used by integration
//! tests and tooling; a browser editor speaks the same JSON protocol.

use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;

use crate::protocol::{ClientMessage, ProtocolError, ServerMessage};

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Events emitted by the editor client.
#[derive(Debug, Clone, PartialEq)]
pub enum EditorEvent {
    /// A message from the server
    Message(ServerMessage),
    /// The server closed the connection or it failed
    Disconnected,
}

/// The editor client.
pub struct EditorClient {
    server_url: String,
    token: String,
    state: Arc<RwLock<ConnectionState>>,
    /// Channel to the WebSocket writer task
    outgoing_tx: Option<mpsc::Sender<Message>>,
    event_rx: Option<mpsc::Receiver<EditorEvent>>,
    event_tx: mpsc::Sender<EditorEvent>,
}

impl EditorClient {
    pub fn new(server_url: impl Into<String>, token: impl Into<String>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            server_url: server_url.into(),
            token: token.into(),
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            outgoing_tx: None,
            event_rx: Some(event_rx),
            event_tx,
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<EditorEvent>> {
        self.event_rx.take()
    }

    /// Open the connection, presenting the token as a bearer credential.
    ///
    /// Spawns reader and writer tasks.
    pub async fn connect(&mut self) -> Result<(), ProtocolError> {
        *self.state.write().await = ConnectionState::Connecting;

        let mut request = self
            .server_url
            .as_str()
            .into_client_request()
            .map_err(|e| ProtocolError::ConnectionFailed(e.to_string()))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.token))
            .map_err(|e| ProtocolError::ConnectionFailed(e.to_string()))?;
        request.headers_mut().insert("Authorization", bearer);

        let ws_stream = match tokio_tungstenite::connect_async(request).await {
            Ok((ws_stream, _)) => ws_stream,
            Err(e) => {
                *self.state.write().await = ConnectionState::Disconnected;
                return Err(ProtocolError::ConnectionFailed(e.to_string()));
            }
        };
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        // Writer task: forward outgoing channel to WebSocket
        let (out_tx, mut out_rx) = mpsc::channel::<Message>(256);
        self.outgoing_tx = Some(out_tx.clone());
        tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                let closing = matches!(msg, Message::Close(_));
                if ws_writer.send(msg).await.is_err() || closing {
                    break;
                }
            }
        });

        *self.state.write().await = ConnectionState::Connected;

        // Reader task: decode server frames into events
        let event_tx = self.event_tx.clone();
        let state = self.state.clone();
        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Text(text)) => match ServerMessage::decode(text.as_str()) {
                        Ok(message) => {
                            if event_tx.send(EditorEvent::Message(message)).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => log::warn!("Undecodable server message: {e}"),
                    },
                    Ok(Message::Ping(data)) => {
                        let _ = out_tx.send(Message::Pong(data)).await;
                    }
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }

            *state.write().await = ConnectionState::Disconnected;
            let _ = event_tx.send(EditorEvent::Disconnected).await;
        });

        Ok(())
    }

    /// Send one request to the server.
    pub async fn send(&self, message: &ClientMessage) -> Result<(), ProtocolError> {
        if *self.state.read().await != ConnectionState::Connected {
            return Err(ProtocolError::ConnectionClosed);
        }
        let text = message.encode()?;
        match &self.outgoing_tx {
            Some(tx) => tx
                .send(Message::text(text))
                .await
                .map_err(|_| ProtocolError::ConnectionClosed),
            None => Err(ProtocolError::ConnectionClosed),
        }
    }

    /// Send `joinTheme`.
    pub async fn join_theme(&self, theme_id: &str, page_slug: Option<&str>) -> Result<(), ProtocolError> {
        self.send(&ClientMessage::JoinTheme {
            theme_id: theme_id.to_string(),
            page_slug: page_slug.map(str::to_string),
        })
        .await
    }

    /// Close the connection.
    pub async fn disconnect(&mut self) {
        if let Some(tx) = self.outgoing_tx.take() {
            let _ = tx.send(Message::Close(None)).await;
        }
        *self.state.write().await = ConnectionState::Disconnected;
    }

    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_client_initial_state() {
        let client = EditorClient::new("ws://localhost:9090", "tok");
        assert_eq!(client.connection_state().await, ConnectionState::Disconnected);
        assert_eq!(client.server_url(), "ws://localhost:9090");
    }

    #[tokio::test]
    async fn test_send_while_disconnected() {
        let client = EditorClient::new("ws://localhost:9090", "tok");
        let err = client.send(&ClientMessage::RequestSync {}).await.unwrap_err();
        assert!(matches!(err, ProtocolError::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Bind then drop a listener to get a port nobody serves.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut client = EditorClient::new(format!("ws://127.0.0.1:{port}"), "tok");
        assert!(matches!(client.connect().await, Err(ProtocolError::ConnectionFailed(_))));
        assert_eq!(client.connection_state().await, ConnectionState::Disconnected);
    }

    #[test]
    fn test_take_event_rx() {
        let mut client = EditorClient::new("ws://localhost:9090", "tok");
        assert!(client.take_event_rx().is_some());
        assert!(client.take_event_rx().is_none());
    }
}
