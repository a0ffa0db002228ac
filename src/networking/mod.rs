//! Real-time surface: JSON over WebSocket.
//!
//! Clients authenticate with a bearer token, then send match commands and
//! party polls. Match events are pushed as they happen.

pub mod connection;
pub mod protocol;
pub mod server;

pub use connection::{Connection, ConnectionError, ConnectionServices};
pub use protocol::{ClientMessage, ServerEvent, PROTOCOL_VERSION};
pub use server::ArenaServer;
