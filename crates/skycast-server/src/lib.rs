//! # skycast-server
//!
//! Live weather fan-out over WebSockets, grouped by location.
//!
//! - [`registry`]: location key → live member set
//! - [`gateway`]: publish/subscribe seam, in-task and queued
//! - [`session`]: per-connection state machine and runner
//! - [`feed`]: periodic reading producer
//! - [`snapshot`]: last-known reading per location for bootstrap
//! - [`server`]: axum HTTP/WebSocket surface, health and metrics

#![deny(unsafe_code)]

pub mod config;
pub mod errors;
pub mod feed;
pub mod gateway;
pub mod health;
pub mod metrics;
pub mod registry;
pub mod server;
pub mod session;
pub mod shutdown;
pub mod snapshot;
pub mod websocket;

pub use config::ServerConfig;
pub use server::{AppState, ServerParts, SkycastServer};
