//! Messages carried on the `/api/v1/ws` endpoint.
//!
//! The wire format is untagged JSON: a status message is the only shape
//! with a `connected` key, everything else must be a heart-rate sample.
//! [`WsMessage::decode`] checks for that key first and then deserializes
//! the matching body, so a malformed sample is reported as such instead
//! of falling through to "no variant matched".

use serde::{Deserialize, Serialize};

/// Endpoint path, relative to the server base URL.
pub const WS_PATH: &str = "/api/v1/ws";

const STATUS_KEY: &str = "connected";

/// A message pushed from the server to dashboard clients.
#[derive(Debug, Clone, PartialEq)]
pub enum WsMessage {
    /// The device connection came up or went down.
    Status { connected: bool },
    /// One heart-rate reading.
    Sample {
        /// Unix timestamp in seconds.
        t: f64,
        /// Rate in beats per minute.
        r: u16,
        /// Sensor contact, `None` when the strap does not report it.
        s: Option<bool>,
    },
}

#[derive(Serialize, Deserialize)]
struct StatusBody {
    connected: bool,
}

#[derive(Serialize, Deserialize)]
struct SampleBody {
    t: f64,
    r: u16,
    #[serde(default)]
    s: Option<bool>,
}

impl WsMessage {
    /// Decode a text frame.
    pub fn decode(text: &str) -> Result<WsMessage, serde_json::Error> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        let is_status = value
            .as_object()
            .is_some_and(|fields| fields.contains_key(STATUS_KEY));

        if is_status {
            let StatusBody { connected } = serde_json::from_value(value)?;
            Ok(WsMessage::Status { connected })
        } else {
            let SampleBody { t, r, s } = serde_json::from_value(value)?;
            Ok(WsMessage::Sample { t, r, s })
        }
    }

    /// Encode as a text frame. An unknown contact state is written as `null`.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        match *self {
            WsMessage::Status { connected } => serde_json::to_string(&StatusBody { connected }),
            WsMessage::Sample { t, r, s } => serde_json::to_string(&SampleBody { t, r, s }),
        }
    }
}
