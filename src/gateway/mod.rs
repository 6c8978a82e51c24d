//! Broadcast gateway and its WebSocket adapter

pub mod broadcast;
pub mod websocket;

pub use broadcast::{BroadcastGateway, ClientConnection, ConnectionId, ConnectionLost, GatewayForwarder};
pub use websocket::{handle_socket, WsConnection};
