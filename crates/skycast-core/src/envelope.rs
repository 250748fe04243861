//! Server → client message envelope.
//!
//! Every frame pushed to a client is `{"type": "...", "data": {...}}`. Clients
//! never send structured messages; anything they send is ignored.

use serde::{Deserialize, Serialize};

use crate::reading::Reading;

/// Message pushed from the server to a subscribed client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    /// A new (or bootstrap) reading for the subscribed location.
    WeatherUpdate(Reading),
}

impl ServerMessage {
    /// Serialize to the JSON text frame sent on the wire.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
