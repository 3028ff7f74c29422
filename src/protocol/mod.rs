//! MQTT 3.1.1 wire protocol, subscriber subset
//!
//! Packet format: [TYPE/FLAGS byte] [remaining length varint] [body]
//!
//! Implements exactly the packets a subscribing client needs: CONNECT and
//! CONNACK, SUBSCRIBE and SUBACK, inbound PUBLISH at QoS 0 through 2 with
//! the matching acknowledgements (PUBACK, PUBREC/PUBREL/PUBCOMP), the
//! PINGREQ/PINGRESP keep-alive pair and DISCONNECT. Outbound application
//! publishing is out of scope.

mod packet;
mod reader;

pub use packet::{decode_remaining_length, encode_remaining_length, Packet, TxPacket};
pub use reader::PacketReader;

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Wire Constants
// ============================================================================

/// Packet type codes (high nibble of the fixed header byte)
pub const TYPE_CONNECT: u8 = 1;
pub const TYPE_CONNACK: u8 = 2;
pub const TYPE_PUBLISH: u8 = 3;
pub const TYPE_PUBACK: u8 = 4;
pub const TYPE_PUBREC: u8 = 5;
pub const TYPE_PUBREL: u8 = 6;
pub const TYPE_PUBCOMP: u8 = 7;
pub const TYPE_SUBSCRIBE: u8 = 8;
pub const TYPE_SUBACK: u8 = 9;
pub const TYPE_PINGREQ: u8 = 12;
pub const TYPE_PINGRESP: u8 = 13;
pub const TYPE_DISCONNECT: u8 = 14;

/// Protocol level byte for MQTT 3.1.1
pub const PROTOCOL_LEVEL: u8 = 4;

/// CONNECT flag requesting a clean session
pub const CONNECT_FLAG_CLEAN_SESSION: u8 = 0x02;

/// SUBACK return code for a rejected subscription
pub const SUBACK_FAILURE: u8 = 0x80;

/// Largest value the 4-byte remaining-length varint can carry
pub const MAX_REMAINING_LENGTH: usize = 268_435_455;

/// Upper bound on accepted inbound packets (1 MB)
///
/// Orientation payloads are tens of bytes; anything near this limit means
/// a corrupt stream or a misbehaving broker.
pub const MAX_INBOUND_PACKET: usize = 1024 * 1024;

// ============================================================================
// QoS
// ============================================================================

/// Quality-of-service level for subscription delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum QosLevel {
    /// At most once (fire and forget)
    AtMostOnce = 0,
    /// At least once (PUBACK acknowledged)
    AtLeastOnce = 1,
    /// Exactly once (PUBREC/PUBREL/PUBCOMP handshake)
    ExactlyOnce = 2,
}

impl TryFrom<u8> for QosLevel {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Error> {
        match value {
            0 => Ok(QosLevel::AtMostOnce),
            1 => Ok(QosLevel::AtLeastOnce),
            2 => Ok(QosLevel::ExactlyOnce),
            other => Err(Error::InvalidParameter(format!(
                "QoS must be 0, 1 or 2, got {}",
                other
            ))),
        }
    }
}

impl From<QosLevel> for u8 {
    fn from(qos: QosLevel) -> u8 {
        qos as u8
    }
}

impl fmt::Display for QosLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", *self as u8)
    }
}
