//! HTTP and WebSocket surface

pub mod server;

pub use server::{routes, serve, AppContext};
