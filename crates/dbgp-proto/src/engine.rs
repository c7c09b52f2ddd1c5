//! Engine-side framing: `<ascii-decimal-length>\0<xml>\0`.

use crate::xml::Document;
use crate::{ProtoError, Result};

/// Hard cap on a single framed XML payload.
pub const MAX_PACKET_BYTES: usize = 16 * 1024 * 1024;

/// A longer run of leading bytes without a NUL is garbage, not a length.
const MAX_LENGTH_DIGITS: usize = 10;

/// Incremental decoder for length-prefixed engine packets.
///
/// Feed raw socket bytes with [`feed`](Self::feed), then drain complete
/// packets with [`next_packet`](Self::next_packet) until it returns
/// `Ok(None)`. Partially delivered frames are buffered across calls with no
/// loss or duplication. Any `Err` means the stream is desynchronized and the
/// connection should be dropped.
#[derive(Debug, Default)]
pub struct PacketDecoder {
    buffer: Vec<u8>,
}

impl PacketDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    pub fn next_packet(&mut self) -> Result<Option<Document>> {
        let Some(header_end) = self.buffer.iter().position(|&byte| byte == 0) else {
            if self.buffer.len() > MAX_LENGTH_DIGITS {
                return Err(ProtoError::Frame(
                    "length prefix is not NUL-terminated".to_string(),
                ));
            }
            return Ok(None);
        };
        let length = parse_length(&self.buffer[..header_end])?;
        if length > MAX_PACKET_BYTES {
            return Err(ProtoError::Oversized {
                what: "engine packet",
                limit: MAX_PACKET_BYTES,
                actual: length,
            });
        }

        let payload_start = header_end + 1;
        // Index of the mandatory NUL after exactly `length` payload bytes.
        let frame_end = payload_start + length;
        if self.buffer.len() <= frame_end {
            return Ok(None);
        }
        if self.buffer[frame_end] != 0 {
            return Err(ProtoError::Frame(format!(
                "payload is not NUL-terminated after the declared {length} bytes"
            )));
        }

        let payload = &self.buffer[payload_start..frame_end];
        let text = std::str::from_utf8(payload)
            .map_err(|_| ProtoError::Utf8("engine packet payload"))?;
        let document = Document::parse(text)?;
        self.buffer.drain(..=frame_end);
        Ok(Some(document))
    }
}

fn parse_length(header: &[u8]) -> Result<usize> {
    if header.is_empty() {
        return Err(ProtoError::Frame("empty length prefix".to_string()));
    }
    if header.len() > MAX_LENGTH_DIGITS {
        return Err(ProtoError::Frame(format!(
            "length prefix is {} digits long",
            header.len()
        )));
    }
    let mut length = 0usize;
    for &byte in header {
        if !byte.is_ascii_digit() {
            return Err(ProtoError::Frame(format!(
                "length prefix contains non-decimal byte {byte:#04x}"
            )));
        }
        length = length
            .checked_mul(10)
            .and_then(|length| length.checked_add(usize::from(byte - b'0')))
            .ok_or_else(|| ProtoError::Frame("length prefix overflows".to_string()))?;
    }
    Ok(length)
}

/// Serializes a packet with the engine framing. Also used for the
/// registration acknowledgement, which goes out on the same wire format.
pub fn encode(document: &Document) -> Vec<u8> {
    let xml = document.to_xml();
    let mut frame = Vec::with_capacity(xml.len() + 16);
    frame.extend_from_slice(xml.len().to_string().as_bytes());
    frame.push(0);
    frame.extend_from_slice(xml.as_bytes());
    frame.push(0);
    frame
}
