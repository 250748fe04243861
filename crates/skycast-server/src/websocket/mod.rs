//! WebSocket plumbing: per-connection handle and transport adapter.

pub mod connection;
pub mod transport;
