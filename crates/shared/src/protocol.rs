//! Structured messages exchanged with UI sessions over the WebSocket.

use serde::{Deserialize, Serialize};

/// Server → session messages, fanned out to every open session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SessionEvent {
    /// One raw line received from the controller, forwarded verbatim.
    Arduino { message: String },
    /// Physical-link state change, also sent once on session connect.
    Status { connected: bool },
}

/// Session → server messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SessionRequest {
    /// A raw command line to write to the controller.
    Command { command: String },
}
