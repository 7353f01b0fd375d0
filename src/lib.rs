pub mod ble;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod heart_rate;
pub mod hub;
pub mod message;
pub mod render;
pub mod server;
pub mod transport;
pub mod window;

pub use error::{Error, Result};
