//! Server module - TCP listener and per-connection handling

mod connection;
mod listener;

pub use connection::{ClientConnection, ConnectionContext};
pub use listener::Server;
