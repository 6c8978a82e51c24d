//! WebSocket adapter registering each upgraded socket with the gateway

use super::broadcast::{BroadcastGateway, ClientConnection, ConnectionId, ConnectionLost};
use crate::observability::metrics;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::{debug, info};
use uuid::Uuid;
use warp::ws::{Message, WebSocket};

/// Gateway connection backed by the socket's writer queue
pub struct WsConnection {
    id: ConnectionId,
    outbound: UnboundedSender<Message>,
}

impl WsConnection {
    pub fn new(outbound: UnboundedSender<Message>) -> Self {
        Self {
            id: Uuid::new_v4(),
            outbound,
        }
    }
}

#[async_trait]
impl ClientConnection for WsConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    async fn send(&self, text: &str) -> Result<(), ConnectionLost> {
        self.outbound
            .send(Message::text(text))
            .map_err(|_| ConnectionLost::new(self.id, "socket writer closed"))
    }
}

/// Reply sent back for each inbound text frame
pub fn echo_reply(text: &str) -> String {
    format!("Message received: {text}")
}

/// Serve one socket until the client goes away
pub async fn handle_socket(socket: WebSocket, gateway: Arc<BroadcastGateway>) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if sink.send(message).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let connection = Arc::new(WsConnection::new(tx.clone()));
    let id = gateway.register(connection).await;
    metrics().ws_connection_opened();
    info!(connection_id = %id, "WebSocket client connected");

    while let Some(frame) = stream.next().await {
        let message = match frame {
            Ok(message) => message,
            Err(e) => {
                debug!(connection_id = %id, error = %e, "WebSocket read failed");
                break;
            }
        };

        if message.is_close() {
            break;
        }
        if let Ok(text) = message.to_str() {
            if tx.send(Message::text(echo_reply(text))).is_err() {
                break;
            }
        }
    }

    gateway.unregister(id).await;
    drop(tx);
    let _ = writer.await;
    metrics().ws_connection_closed();
    info!(connection_id = %id, "WebSocket client disconnected");
}
