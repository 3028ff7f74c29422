//! Transport layer for broker I/O abstraction
//!
//! `Transport` is the byte-stream seam the protocol layer reads and writes
//! through; `Dialer` mints fresh transports so the connection manager can
//! reconnect after a drop. Production code dials TCP; tests script
//! `MockTransport` instances and their own dialers.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod mock;
mod tcp;

pub use mock::MockTransport;
pub use tcp::{TcpDialer, TcpTransport};

/// Transport trait for broker communication
///
/// `read` returns `Ok(0)` when no data arrived within the transport's poll
/// window; a closed connection is surfaced as `Error::ConnectionClosed`,
/// never as a zero-length read.
pub trait Transport: Send {
    /// Read data into buffer, returns number of bytes read
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize>;

    /// Write data from buffer, returns number of bytes written
    fn write(&mut self, data: &[u8]) -> Result<usize>;

    /// Flush any pending writes (blocking until complete)
    fn flush(&mut self) -> Result<()>;

    /// Write the whole buffer
    fn write_all(&mut self, mut data: &[u8]) -> Result<()> {
        while !data.is_empty() {
            let n = self.write(data)?;
            if n == 0 {
                return Err(Error::ConnectionClosed);
            }
            data = &data[n..];
        }
        Ok(())
    }
}

/// Factory for transports, used on connect and on every reconnect attempt.
pub trait Dialer: Send {
    /// Establish a fresh transport to the broker.
    fn dial(&self) -> Result<Box<dyn Transport>>;
}

/// Connection scheme for the broker address.
///
/// The configuration surface accepts all four schemes, but only `tcp`
/// currently dials; the secure and websocket variants are rejected with
/// `Error::NotSupported` at connect time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionScheme {
    /// Plain TCP
    Tcp,
    /// TLS over TCP (not implemented)
    Ssl,
    /// WebSocket (not implemented)
    Ws,
    /// Secure WebSocket (not implemented)
    Wsl,
}

impl ConnectionScheme {
    /// Scheme name as it appears in broker URLs
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionScheme::Tcp => "tcp",
            ConnectionScheme::Ssl => "ssl",
            ConnectionScheme::Ws => "ws",
            ConnectionScheme::Wsl => "wsl",
        }
    }
}

impl fmt::Display for ConnectionScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectionScheme {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "tcp" => Ok(ConnectionScheme::Tcp),
            "ssl" => Ok(ConnectionScheme::Ssl),
            "ws" => Ok(ConnectionScheme::Ws),
            "wsl" => Ok(ConnectionScheme::Wsl),
            other => Err(Error::InvalidParameter(format!(
                "Unknown connection type {:?} (expected tcp, ssl, ws or wsl)",
                other
            ))),
        }
    }
}

/// Create a dialer for the given scheme and address.
pub fn create_dialer(scheme: ConnectionScheme, host: &str, port: u16) -> Result<Box<dyn Dialer>> {
    match scheme {
        ConnectionScheme::Tcp => Ok(Box::new(TcpDialer::new(host, port))),
        other => Err(Error::NotSupported(format!(
            "{} connections are not implemented (use tcp)",
            other
        ))),
    }
}
