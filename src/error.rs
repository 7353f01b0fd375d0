use crate::heart_rate::HeartRateError;

/// Errors surfaced by the monitor, on both the device and the dashboard side.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Bluetooth error: {0}")]
    Ble(#[from] btleplug::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Invalid base URL: {0}")]
    InvalidUrl(String),

    #[error(transparent)]
    HeartRate(#[from] HeartRateError),

    /// The peripheral connected but does not expose the measurement characteristic.
    #[error("Device does not support heart rate measurement")]
    MissingCharacteristic,

    #[error("No Bluetooth adapter available")]
    NoAdapter,

    #[error("Device {0} not found")]
    DeviceNotFound(String),

    #[error("Timed out connecting to {0}")]
    ConnectTimeout(String),
}

pub type Result<T> = std::result::Result<T, Error>;
