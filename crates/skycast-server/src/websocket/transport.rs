//! The client-facing half of a session, abstracted so the session state
//! machine can run over a real WebSocket or a scripted test double.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message, WebSocket};

use crate::errors::TransportError;

/// Coarse classification of an inbound frame.
///
/// The protocol is push-only, so the content of client messages is never
/// inspected; they only count as liveness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientFrame {
    /// Any data frame (text or binary). Ignored.
    Payload,
    /// Ping or pong.
    Heartbeat,
    /// The client sent a close frame.
    Close,
}

/// Bidirectional message channel to one client.
///
/// `recv` must be cancel-safe: the session selects on it alongside other
/// event sources.
#[async_trait]
pub trait ClientTransport: Send {
    /// Next inbound frame; `None` once the stream has ended.
    async fn recv(&mut self) -> Option<Result<ClientFrame, TransportError>>;

    /// Push a text payload.
    async fn send_text(&mut self, payload: Arc<String>) -> Result<(), TransportError>;

    /// Send a liveness ping.
    async fn send_ping(&mut self) -> Result<(), TransportError>;

    /// Send a close frame with `code` and no body.
    async fn close(&mut self, code: u16) -> Result<(), TransportError>;
}

/// [`ClientTransport`] over an axum WebSocket.
pub struct AxumTransport {
    socket: WebSocket,
}

impl AxumTransport {
    /// Wrap an upgraded socket.
    pub fn new(socket: WebSocket) -> Self {
        Self { socket }
    }
}

fn transport_err(e: &axum::Error) -> TransportError {
    TransportError(e.to_string())
}

#[async_trait]
impl ClientTransport for AxumTransport {
    async fn recv(&mut self) -> Option<Result<ClientFrame, TransportError>> {
        let frame = match self.socket.recv().await? {
            Ok(Message::Close(_)) => Ok(ClientFrame::Close),
            Ok(Message::Ping(_) | Message::Pong(_)) => Ok(ClientFrame::Heartbeat),
            Ok(Message::Text(_) | Message::Binary(_)) => Ok(ClientFrame::Payload),
            Err(e) => Err(transport_err(&e)),
        };
        Some(frame)
    }

    async fn send_text(&mut self, payload: Arc<String>) -> Result<(), TransportError> {
        self.socket
            .send(Message::Text(payload.as_str().into()))
            .await
            .map_err(|e| transport_err(&e))
    }

    async fn send_ping(&mut self) -> Result<(), TransportError> {
        self.socket
            .send(Message::Ping(Vec::new().into()))
            .await
            .map_err(|e| transport_err(&e))
    }

    async fn close(&mut self, code: u16) -> Result<(), TransportError> {
        self.socket
            .send(Message::Close(Some(CloseFrame {
                code,
                reason: "".into(),
            })))
            .await
            .map_err(|e| transport_err(&e))
    }
}
