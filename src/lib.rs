//! DishaIO - MQTT orientation telemetry listener
//!
//! DishaIO subscribes to a broker topic carrying comma-separated angle
//! triples (`"1.5,-0.25,3.0"`) and keeps the latest decoded value in a
//! thread-safe orientation slot for a foreground consumer to poll once per
//! frame.
//!
//! ## Architecture
//!
//! - [`transport`]: byte-stream seam (`Transport`), dialing (`Dialer`),
//!   TCP and mock implementations
//! - [`protocol`]: MQTT 3.1.1 wire encoding, subscriber subset
//! - [`client`]: connection manager (connect, subscribe, receive,
//!   reconnect poll)
//! - [`decoder`]: CSV angle triple to orientation vector
//! - [`listener`]: readiness gate plus the background consume loop
//! - [`orientation`]: the shared slot consumers poll

pub mod client;
pub mod config;
pub mod decoder;
pub mod error;
pub mod listener;
pub mod orientation;
pub mod protocol;
pub mod transport;

// Re-export commonly used types
pub use config::AppConfig;
pub use error::{DecodeError, Error, Result};
pub use listener::OrientationListener;
pub use orientation::{create_orientation_handle, OrientationHandle, OrientationVector};
