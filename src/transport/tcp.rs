//! TCP transport implementation

use super::{Dialer, Transport};
use crate::error::{Error, Result};
use std::io::{ErrorKind, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

/// Deadline for establishing the TCP connection
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Read timeout; keeps `read` returning `Ok(0)` regularly so callers can
/// check deadlines and shutdown flags between polls
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Dialer producing TCP transports to a fixed broker address.
pub struct TcpDialer {
    host: String,
    port: u16,
}

impl TcpDialer {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
        }
    }
}

impl Dialer for TcpDialer {
    fn dial(&self) -> Result<Box<dyn Transport>> {
        let transport = TcpTransport::connect(&self.host, self.port)?;
        Ok(Box::new(transport))
    }
}

/// TCP transport wrapping a connected stream.
pub struct TcpTransport {
    stream: TcpStream,
}

impl TcpTransport {
    /// Connect to the broker with a bounded connect timeout.
    pub fn connect(host: &str, port: u16) -> Result<Self> {
        let mut last_error = None;
        for addr in (host, port).to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(READ_TIMEOUT))?;
                    stream.set_nodelay(true)?;
                    log::info!("Connected to broker at {}", addr);
                    return Ok(Self { stream });
                }
                Err(e) => {
                    log::debug!("Connect to {} failed: {}", addr, e);
                    last_error = Some(e);
                }
            }
        }
        match last_error {
            Some(e) => Err(Error::Io(e)),
            None => Err(Error::Other(format!(
                "Address {}:{} did not resolve",
                host, port
            ))),
        }
    }
}

impl Transport for TcpTransport {
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize> {
        match self.stream.read(buffer) {
            // Clean EOF means the peer closed the connection
            Ok(0) => Err(Error::ConnectionClosed),
            Ok(n) => Ok(n),
            Err(e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(Error::Io(e)),
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        // Writes are blocking; only reads carry a poll timeout
        let n = self.stream.write(data)?;
        Ok(n)
    }

    fn flush(&mut self) -> Result<()> {
        self.stream.flush()?;
        Ok(())
    }
}
