//! Angle decoder: comma-separated decimal text into an orientation vector.
//!
//! Wire payloads look like `"1.5,-0.25,3.0"`: three decimal numbers
//! separated by ASCII commas, no framing or escaping. The decoder takes the
//! first three tokens positionally; extra tokens are ignored.

use crate::error::DecodeError;
use crate::orientation::OrientationVector;

/// Decode a raw payload into an orientation vector.
///
/// The payload is interpreted as text, split on `,`, and each token parsed
/// as `f32` after trimming surrounding whitespace. Fails cleanly on empty
/// payloads, unparseable tokens, and short inputs; the component count is
/// validated before any component is indexed.
///
/// Pure function of its input; callers decide how failures are reported.
pub fn decode(payload: &[u8]) -> std::result::Result<OrientationVector, DecodeError> {
    if payload.is_empty() {
        return Err(DecodeError::EmptyPayload);
    }

    // Invalid UTF-8 sequences become replacement characters, which then fail
    // the float parse like any other malformed token.
    let text = String::from_utf8_lossy(payload);

    let mut components = [0.0f32; 3];
    let mut found = 0usize;

    for token in text.split(',') {
        if found == 3 {
            break;
        }
        let token = token.trim();
        let value = token
            .parse::<f32>()
            .map_err(|source| DecodeError::MalformedNumber {
                token: token.to_string(),
                source,
            })?;
        components[found] = value;
        found += 1;
    }

    if found < 3 {
        return Err(DecodeError::InsufficientComponents { found });
    }

    Ok(OrientationVector::new(
        components[0],
        components[1],
        components[2],
    ))
}
