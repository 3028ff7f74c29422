//! Packet builders and parsers
//!
//! `TxPacket` is a reusable buffer for every outgoing packet: configure it
//! with a `set_*` method, then hand `as_bytes()` to the transport. `Packet`
//! is the parsed form of inbound packets; `parse_packet` expects the body
//! with the fixed header and remaining-length varint already stripped.

use super::{
    QosLevel, CONNECT_FLAG_CLEAN_SESSION, MAX_REMAINING_LENGTH, PROTOCOL_LEVEL, TYPE_CONNACK,
    TYPE_CONNECT, TYPE_DISCONNECT, TYPE_PINGREQ, TYPE_PINGRESP, TYPE_PUBACK, TYPE_PUBCOMP,
    TYPE_PUBLISH, TYPE_PUBREC, TYPE_PUBREL, TYPE_SUBACK, TYPE_SUBSCRIBE,
};
use crate::error::{Error, Result};

// ============================================================================
// Remaining-Length Varint
// ============================================================================

/// Encode a remaining-length value into its 1-4 byte varint form.
pub fn encode_remaining_length(mut value: usize, out: &mut Vec<u8>) {
    debug_assert!(value <= MAX_REMAINING_LENGTH);
    loop {
        let mut byte = (value % 128) as u8;
        value /= 128;
        if value > 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if value == 0 {
            break;
        }
    }
}

/// Decode a remaining-length varint from the start of `data`.
///
/// Returns `Ok(Some((value, consumed)))` for a complete varint, `Ok(None)`
/// when more bytes are needed, and an error for a sequence running past
/// four bytes.
pub fn decode_remaining_length(data: &[u8]) -> Result<Option<(usize, usize)>> {
    let mut value = 0usize;
    let mut multiplier = 1usize;
    for (i, &byte) in data.iter().enumerate() {
        value += ((byte & 0x7F) as usize) * multiplier;
        if byte & 0x80 == 0 {
            return Ok(Some((value, i + 1)));
        }
        if i == 3 {
            return Err(Error::Protocol(
                "Malformed remaining length (continuation past 4 bytes)".to_string(),
            ));
        }
        multiplier *= 128;
    }
    Ok(None)
}

/// Append a length-prefixed UTF-8 string (u16 big-endian length).
fn write_string(out: &mut Vec<u8>, s: &str) {
    // Length is validated against u16::MAX before the handshake starts
    out.extend_from_slice(&(s.len() as u16).to_be_bytes());
    out.extend_from_slice(s.as_bytes());
}

// ============================================================================
// Outgoing Packets
// ============================================================================

/// Reusable TX packet buffer for all outgoing packets
///
/// Create once, reconfigure per send; no allocation after warm-up.
pub struct TxPacket {
    buf: Vec<u8>,
    body: Vec<u8>,
}

impl TxPacket {
    pub fn new() -> Self {
        TxPacket {
            buf: Vec::with_capacity(64),
            body: Vec::with_capacity(64),
        }
    }

    /// Get packet bytes for sending
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Set CONNECT with the MQTT 3.1.1 variable header
    pub fn set_connect(&mut self, client_id: &str, clean_session: bool, keep_alive_secs: u16) {
        self.body.clear();
        write_string(&mut self.body, "MQTT");
        self.body.push(PROTOCOL_LEVEL);
        self.body.push(if clean_session {
            CONNECT_FLAG_CLEAN_SESSION
        } else {
            0
        });
        self.body.extend_from_slice(&keep_alive_secs.to_be_bytes());
        write_string(&mut self.body, client_id);
        self.finalize(TYPE_CONNECT << 4);
    }

    /// Set SUBSCRIBE for a single topic filter
    ///
    /// The flags nibble is the fixed 0b0010 SUBSCRIBE requires.
    pub fn set_subscribe(&mut self, packet_id: u16, topic: &str, qos: QosLevel) {
        self.body.clear();
        self.body.extend_from_slice(&packet_id.to_be_bytes());
        write_string(&mut self.body, topic);
        self.body.push(qos as u8);
        self.finalize((TYPE_SUBSCRIBE << 4) | 0x02);
    }

    /// Set PUBACK acknowledging a QoS 1 publish
    pub fn set_puback(&mut self, packet_id: u16) {
        self.set_ack(TYPE_PUBACK << 4, packet_id);
    }

    /// Set PUBREC, the first QoS 2 acknowledgement leg
    pub fn set_pubrec(&mut self, packet_id: u16) {
        self.set_ack(TYPE_PUBREC << 4, packet_id);
    }

    /// Set PUBCOMP, the final QoS 2 acknowledgement leg
    pub fn set_pubcomp(&mut self, packet_id: u16) {
        self.set_ack(TYPE_PUBCOMP << 4, packet_id);
    }

    /// Set PINGREQ keep-alive probe
    pub fn set_pingreq(&mut self) {
        self.body.clear();
        self.finalize(TYPE_PINGREQ << 4);
    }

    /// Set DISCONNECT for a graceful close
    pub fn set_disconnect(&mut self) {
        self.body.clear();
        self.finalize(TYPE_DISCONNECT << 4);
    }

    fn set_ack(&mut self, first_byte: u8, packet_id: u16) {
        self.body.clear();
        self.body.extend_from_slice(&packet_id.to_be_bytes());
        self.finalize(first_byte);
    }

    /// Assemble fixed header, remaining length and body into the send buffer
    #[inline]
    fn finalize(&mut self, first_byte: u8) {
        self.buf.clear();
        self.buf.push(first_byte);
        encode_remaining_length(self.body.len(), &mut self.buf);
        self.buf.extend_from_slice(&self.body);
    }
}

impl Default for TxPacket {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Inbound Packets
// ============================================================================

/// Parsed inbound packet
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    /// CONNACK connect acknowledgement
    Connack {
        session_present: bool,
        return_code: u8,
    },
    /// SUBACK subscription acknowledgement carrying the granted QoS
    Suback { packet_id: u16, return_code: u8 },
    /// PUBLISH application message
    Publish {
        dup: bool,
        qos: u8,
        topic: String,
        /// Present when qos > 0
        packet_id: Option<u16>,
        payload: Vec<u8>,
    },
    /// PUBREL release in the QoS 2 handshake
    Pubrel { packet_id: u16 },
    /// PINGRESP keep-alive answer
    Pingresp,
}

/// Parse one complete packet from its fixed-header byte and body.
pub(crate) fn parse_packet(first_byte: u8, body: &[u8]) -> Result<Packet> {
    match first_byte >> 4 {
        TYPE_CONNACK => parse_connack(body),
        TYPE_SUBACK => parse_suback(body),
        TYPE_PUBLISH => parse_publish(first_byte, body),
        TYPE_PUBREL => parse_pubrel(first_byte, body),
        TYPE_PINGRESP => Ok(Packet::Pingresp),
        other => Err(Error::Protocol(format!(
            "Unexpected packet type {}",
            other
        ))),
    }
}

fn parse_connack(body: &[u8]) -> Result<Packet> {
    if body.len() != 2 {
        return Err(Error::Protocol(format!(
            "CONNACK length {} (expected 2)",
            body.len()
        )));
    }
    Ok(Packet::Connack {
        session_present: body[0] & 0x01 != 0,
        return_code: body[1],
    })
}

fn parse_suback(body: &[u8]) -> Result<Packet> {
    // One return code per topic filter; we only ever subscribe to one
    if body.len() < 3 {
        return Err(Error::Protocol(format!(
            "SUBACK length {} (expected 3)",
            body.len()
        )));
    }
    Ok(Packet::Suback {
        packet_id: u16::from_be_bytes([body[0], body[1]]),
        return_code: body[2],
    })
}

fn parse_publish(first_byte: u8, body: &[u8]) -> Result<Packet> {
    let dup = first_byte & 0x08 != 0;
    let qos = (first_byte >> 1) & 0x03;
    if qos == 3 {
        return Err(Error::Protocol("Invalid QoS 3 in PUBLISH".to_string()));
    }

    if body.len() < 2 {
        return Err(Error::Protocol("Truncated PUBLISH".to_string()));
    }
    let topic_len = u16::from_be_bytes([body[0], body[1]]) as usize;
    let mut offset = 2 + topic_len;
    if body.len() < offset {
        return Err(Error::Protocol("Truncated PUBLISH topic".to_string()));
    }
    let topic = String::from_utf8(body[2..offset].to_vec())
        .map_err(|_| Error::Protocol("PUBLISH topic is not valid UTF-8".to_string()))?;

    let packet_id = if qos > 0 {
        if body.len() < offset + 2 {
            return Err(Error::Protocol("Truncated PUBLISH packet id".to_string()));
        }
        let id = u16::from_be_bytes([body[offset], body[offset + 1]]);
        offset += 2;
        Some(id)
    } else {
        None
    };

    Ok(Packet::Publish {
        dup,
        qos,
        topic,
        packet_id,
        payload: body[offset..].to_vec(),
    })
}

fn parse_pubrel(first_byte: u8, body: &[u8]) -> Result<Packet> {
    // PUBREL carries the fixed 0b0010 flags nibble
    if first_byte & 0x0F != 0x02 {
        return Err(Error::Protocol(format!(
            "Invalid PUBREL flags {:#04x}",
            first_byte & 0x0F
        )));
    }
    if body.len() != 2 {
        return Err(Error::Protocol(format!(
            "PUBREL length {} (expected 2)",
            body.len()
        )));
    }
    Ok(Packet::Pubrel {
        packet_id: u16::from_be_bytes([body[0], body[1]]),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_remaining_length_boundaries() {
        let cases: [(usize, &[u8]); 8] = [
            (0, &[0x00]),
            (127, &[0x7F]),
            (128, &[0x80, 0x01]),
            (16_383, &[0xFF, 0x7F]),
            (16_384, &[0x80, 0x80, 0x01]),
            (2_097_151, &[0xFF, 0xFF, 0x7F]),
            (2_097_152, &[0x80, 0x80, 0x80, 0x01]),
            (268_435_455, &[0xFF, 0xFF, 0xFF, 0x7F]),
        ];
        for (value, expected) in cases {
            let mut out = Vec::new();
            encode_remaining_length(value, &mut out);
            assert_eq!(out, expected, "value {}", value);
        }
    }

    #[test]
    fn test_decode_remaining_length_roundtrip() {
        for value in [0usize, 1, 127, 128, 16_383, 16_384, 2_097_152, 268_435_455] {
            let mut encoded = Vec::new();
            encode_remaining_length(value, &mut encoded);
            let decoded = decode_remaining_length(&encoded).unwrap().unwrap();
            assert_eq!(decoded, (value, encoded.len()));
        }
    }

    #[test]
    fn test_decode_remaining_length_incomplete() {
        assert_eq!(decode_remaining_length(&[]).unwrap(), None);
        assert_eq!(decode_remaining_length(&[0x80]).unwrap(), None);
        assert_eq!(decode_remaining_length(&[0x80, 0x80, 0x80]).unwrap(), None);
    }

    #[test]
    fn test_decode_remaining_length_overlong() {
        assert!(decode_remaining_length(&[0x80, 0x80, 0x80, 0x80, 0x01]).is_err());
    }

    #[test]
    fn test_connect_packet_bytes() {
        let mut tx = TxPacket::new();
        tx.set_connect("ab", true, 20);
        assert_eq!(
            tx.as_bytes(),
            [
                0x10, 0x0E, // CONNECT, remaining length 14
                0x00, 0x04, b'M', b'Q', b'T', b'T', // protocol name
                0x04, // protocol level
                0x02, // clean session flag
                0x00, 0x14, // keep-alive 20s
                0x00, 0x02, b'a', b'b', // client id
            ]
        );
    }

    #[test]
    fn test_connect_persistent_session_clears_flag() {
        let mut tx = TxPacket::new();
        tx.set_connect("ab", false, 20);
        assert_eq!(tx.as_bytes()[9], 0x00);
    }

    #[test]
    fn test_subscribe_packet_bytes() {
        let mut tx = TxPacket::new();
        tx.set_subscribe(1, "coords", QosLevel::AtMostOnce);
        assert_eq!(
            tx.as_bytes(),
            [
                0x82, 0x0B, // SUBSCRIBE with required flags, remaining length 11
                0x00, 0x01, // packet id
                0x00, 0x06, b'c', b'o', b'o', b'r', b'd', b's', // topic filter
                0x00, // requested QoS
            ]
        );
    }

    #[test]
    fn test_ack_packet_bytes() {
        let mut tx = TxPacket::new();
        tx.set_puback(0x1234);
        assert_eq!(tx.as_bytes(), [0x40, 0x02, 0x12, 0x34]);
        tx.set_pubrec(0x1234);
        assert_eq!(tx.as_bytes(), [0x50, 0x02, 0x12, 0x34]);
        tx.set_pubcomp(0x1234);
        assert_eq!(tx.as_bytes(), [0x70, 0x02, 0x12, 0x34]);
    }

    #[test]
    fn test_pingreq_and_disconnect_bytes() {
        let mut tx = TxPacket::new();
        tx.set_pingreq();
        assert_eq!(tx.as_bytes(), [0xC0, 0x00]);
        tx.set_disconnect();
        assert_eq!(tx.as_bytes(), [0xE0, 0x00]);
    }

    #[test]
    fn test_tx_buffer_resets_between_packets() {
        let mut tx = TxPacket::new();
        tx.set_connect("sensor_listener", false, 20);
        tx.set_pingreq();
        assert_eq!(tx.as_bytes(), [0xC0, 0x00]);
    }

    #[test]
    fn test_parse_connack() {
        let packet = parse_packet(0x20, &[0x01, 0x00]).unwrap();
        assert_eq!(
            packet,
            Packet::Connack {
                session_present: true,
                return_code: 0
            }
        );

        let packet = parse_packet(0x20, &[0x00, 0x05]).unwrap();
        assert_eq!(
            packet,
            Packet::Connack {
                session_present: false,
                return_code: 5
            }
        );
    }

    #[test]
    fn test_parse_connack_bad_length() {
        assert!(parse_packet(0x20, &[0x00]).is_err());
        assert!(parse_packet(0x20, &[0x00, 0x00, 0x00]).is_err());
    }

    #[test]
    fn test_parse_suback() {
        let packet = parse_packet(0x90, &[0x00, 0x01, 0x00]).unwrap();
        assert_eq!(
            packet,
            Packet::Suback {
                packet_id: 1,
                return_code: 0
            }
        );
    }

    #[test]
    fn test_parse_publish_qos0() {
        let body = [
            0x00, 0x06, b'c', b'o', b'o', b'r', b'd', b's', b'1', b',', b'2', b',', b'3',
        ];
        let packet = parse_packet(0x30, &body).unwrap();
        assert_eq!(
            packet,
            Packet::Publish {
                dup: false,
                qos: 0,
                topic: "coords".to_string(),
                packet_id: None,
                payload: b"1,2,3".to_vec(),
            }
        );
    }

    #[test]
    fn test_parse_publish_qos1_carries_packet_id() {
        let body = [0x00, 0x01, b't', 0x00, 0x2A, b'x'];
        let packet = parse_packet(0x32, &body).unwrap();
        assert_eq!(
            packet,
            Packet::Publish {
                dup: false,
                qos: 1,
                topic: "t".to_string(),
                packet_id: Some(42),
                payload: b"x".to_vec(),
            }
        );
    }

    #[test]
    fn test_parse_publish_dup_flag() {
        let body = [0x00, 0x01, b't', 0x00, 0x01];
        match parse_packet(0x3A, &body).unwrap() {
            Packet::Publish { dup, qos, .. } => {
                assert!(dup);
                assert_eq!(qos, 1);
            }
            other => panic!("expected Publish, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_publish_rejects_qos3() {
        let body = [0x00, 0x01, b't'];
        assert!(parse_packet(0x36, &body).is_err());
    }

    #[test]
    fn test_parse_publish_truncated() {
        assert!(parse_packet(0x30, &[0x00]).is_err());
        assert!(parse_packet(0x30, &[0x00, 0x06, b'c', b'o']).is_err());
        // QoS 1 with the packet id cut off
        assert!(parse_packet(0x32, &[0x00, 0x01, b't', 0x00]).is_err());
    }

    #[test]
    fn test_parse_pubrel_enforces_flags() {
        assert_eq!(
            parse_packet(0x62, &[0x00, 0x07]).unwrap(),
            Packet::Pubrel { packet_id: 7 }
        );
        assert!(parse_packet(0x60, &[0x00, 0x07]).is_err());
    }

    #[test]
    fn test_parse_unexpected_type() {
        // A broker must never send CONNECT or SUBSCRIBE to a client
        assert!(parse_packet(0x10, &[]).is_err());
        assert!(parse_packet(0x82, &[]).is_err());
    }
}
