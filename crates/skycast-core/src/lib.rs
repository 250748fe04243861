//! # skycast-core
//!
//! Foundation types shared by every skycast crate.
//!
//! - [`LocationKey`] / [`Location`]: the fan-out routing key and the place it names
//! - [`Reading`]: an immutable weather observation
//! - [`ServerMessage`]: the JSON envelope pushed to clients
//! - [`ConnectionId`]: branded, time-ordered connection identifier
//! - [`logging`]: `tracing` subscriber setup

#![deny(unsafe_code)]

pub mod envelope;
pub mod ids;
pub mod location;
pub mod logging;
pub mod reading;

pub use envelope::ServerMessage;
pub use ids::ConnectionId;
pub use location::{Location, LocationError, LocationKey};
pub use reading::{Reading, WeatherCondition};
