//! Wire framing for the alternating-bit protocol.
//!
//! Every datagram on the wire is one of two shapes:
//!
//! ```text
//! acknowledgment:   "ACK0"  or  "ACK1"          (exactly 4 bytes, no payload)
//! data:             '0' | payload bytes          e.g.  0|login Ana
//!                   '1' | payload bytes
//! ```
//!
//! A data packet is a 1-character sequence tag, the `'|'` separator, and the
//! rest of the datagram as opaque payload (no length prefix). Receivers must
//! test an inbound buffer against the ACK tokens *before* attempting to parse
//! it as a data packet.
//!
//! No I/O happens here — this is pure data transformation.

use std::fmt;

/// Acknowledgment token for sequence bit 0.
pub const ACK0: &[u8] = b"ACK0";
/// Acknowledgment token for sequence bit 1.
pub const ACK1: &[u8] = b"ACK1";

const SEPARATOR: u8 = b'|';

/// The one-bit sequence space of the stop-and-wait protocol.
///
/// A channel keeps two of these, one per direction; they never share meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqBit {
    Zero,
    One,
}

impl SeqBit {
    /// The other bit value.
    pub fn flip(self) -> SeqBit {
        match self {
            SeqBit::Zero => SeqBit::One,
            SeqBit::One => SeqBit::Zero,
        }
    }

    /// Array index for per-bit state (`0` or `1`).
    pub fn index(self) -> usize {
        match self {
            SeqBit::Zero => 0,
            SeqBit::One => 1,
        }
    }

    fn tag(self) -> u8 {
        match self {
            SeqBit::Zero => b'0',
            SeqBit::One => b'1',
        }
    }
}

impl fmt::Display for SeqBit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.index())
    }
}

/// A datagram that is neither an ACK token nor a well-formed data packet.
///
/// Malformed input is application-level garbage, not protocol control: the
/// caller logs and drops it without acknowledging, so the peer retries as if
/// the packet had been lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MalformedPacket;

impl fmt::Display for MalformedPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("malformed packet: missing sequence tag or separator")
    }
}

impl std::error::Error for MalformedPacket {}

/// Frame `payload` as a data packet carrying sequence bit `bit`.
pub fn encode(bit: SeqBit, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(payload.len() + 2);
    buf.push(bit.tag());
    buf.push(SEPARATOR);
    buf.extend_from_slice(payload);
    buf
}

/// Parse a data packet into its sequence bit and payload.
///
/// Fails when the separator is absent or the tag is not `'0'`/`'1'`.
pub fn decode(buf: &[u8]) -> Result<(SeqBit, &[u8]), MalformedPacket> {
    let sep = buf
        .iter()
        .position(|&b| b == SEPARATOR)
        .ok_or(MalformedPacket)?;
    let bit = match &buf[..sep] {
        [b'0'] => SeqBit::Zero,
        [b'1'] => SeqBit::One,
        _ => return Err(MalformedPacket),
    };
    Ok((bit, &buf[sep + 1..]))
}

/// The fixed ACK token acknowledging `bit`.
pub fn ack_token(bit: SeqBit) -> &'static [u8] {
    match bit {
        SeqBit::Zero => ACK0,
        SeqBit::One => ACK1,
    }
}

/// Recognize an ACK token, if `buf` is exactly one.
pub fn parse_ack(buf: &[u8]) -> Option<SeqBit> {
    if buf == ACK0 {
        Some(SeqBit::Zero)
    } else if buf == ACK1 {
        Some(SeqBit::One)
    } else {
        None
    }
}
