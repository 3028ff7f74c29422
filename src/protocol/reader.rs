//! Incremental packet reader over a transport
//!
//! Accumulates stream bytes until a complete packet is framed, then parses
//! it. `poll` returns `Ok(None)` when the connection is alive but no
//! complete packet has arrived yet; the caller decides how long to keep
//! polling.

use super::packet::{parse_packet, Packet};
use super::{decode_remaining_length, MAX_INBOUND_PACKET};
use crate::error::{Error, Result};
use crate::transport::Transport;

/// Read chunk size per poll
const READ_CHUNK: usize = 1024;

/// Stream-to-packet framer.
pub struct PacketReader {
    buffer: Vec<u8>,
}

impl PacketReader {
    pub fn new() -> Self {
        PacketReader {
            buffer: Vec::with_capacity(READ_CHUNK),
        }
    }

    /// Pull bytes from the transport and return the next complete packet.
    ///
    /// Buffered data is drained before the transport is read again, so
    /// packets coalesced into one TCP segment are all delivered in order.
    pub fn poll(&mut self, transport: &mut dyn Transport) -> Result<Option<Packet>> {
        if let Some(packet) = self.try_parse()? {
            return Ok(Some(packet));
        }

        let mut chunk = [0u8; READ_CHUNK];
        let n = transport.read(&mut chunk)?;
        if n == 0 {
            return Ok(None);
        }
        self.buffer.extend_from_slice(&chunk[..n]);

        self.try_parse()
    }

    /// Discard any partially received frame, e.g. before a reconnect.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    fn try_parse(&mut self) -> Result<Option<Packet>> {
        if self.buffer.len() < 2 {
            return Ok(None);
        }
        let first_byte = self.buffer[0];
        let (remaining, varint_len) = match decode_remaining_length(&self.buffer[1..])? {
            Some(header) => header,
            None => return Ok(None),
        };
        if remaining > MAX_INBOUND_PACKET {
            return Err(Error::Protocol(format!(
                "Packet too large: {} bytes",
                remaining
            )));
        }

        let total = 1 + varint_len + remaining;
        if self.buffer.len() < total {
            return Ok(None);
        }

        let packet = parse_packet(first_byte, &self.buffer[1 + varint_len..total])?;
        self.buffer.drain(..total);
        Ok(Some(packet))
    }
}

impl Default for PacketReader {
    fn default() -> Self {
        Self::new()
    }
}
