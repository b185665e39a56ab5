//! The SFLW wire frame: a 20-byte big-endian header followed by a
//! CRC-32-protected payload.
//!
//! ```text
//! offset  size  field
//! 0       4     magic       = 0x53 0x46 0x4C 0x57   ("SFLW")
//! 4       1     version     = 0x01
//! 5       1     type
//! 6       2     flags
//! 8       4     seq
//! 12      4     payload_len
//! 16      4     payload_crc
//! 20      ..    payload
//! ```

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Write};

pub const MAGIC: u32 = 0x5346_4C57;
pub const VERSION: u8 = 1;
pub const HEADER_SIZE: usize = 20;

/// Hard ceiling on the payload `encode` will accept, independent of any
/// particular receive buffer's capacity.
pub const MAX_ENCODE_PAYLOAD: usize = 1 << 20;

/// `ServerConfig`'s default receive buffer capacity (spec default).
pub const RX_CAPACITY: usize = 8192;

/// Largest payload a frame can carry end to end under the default buffer
/// capacity: `RX_CAPACITY - HEADER_SIZE`. Any particular connection's actual
/// ceiling tracks its own `ServerConfig::buffer_capacity` instead — see
/// `try_decode`'s `max_payload` argument — since the receive buffer has to
/// hold header + payload and that capacity is a deployer-settable knob, not
/// a constant.
pub const MAX_FRAME_PAYLOAD: usize = RX_CAPACITY - HEADER_SIZE;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct FrameHeader {
    pub version: u8,
    pub msg_type: u8,
    pub flags: u16,
    pub seq: u32,
    pub payload_len: u32,
    pub payload_crc: u32,
}

/// Outcome of a streaming decode attempt against a receive buffer.
#[derive(Debug, Eq, PartialEq)]
pub enum DecodeOutcome {
    /// Not enough bytes buffered yet for a full frame. Stay in the Reading
    /// state; no bytes are consumed.
    NeedMore,
    /// The bytes buffered so far can never form a valid frame (bad magic,
    /// wrong version, oversize `payload_len`, CRC mismatch, or a payload
    /// that doesn't fit the caller's scratch buffer). The connection must
    /// be torn down; nothing is consumed since the stream is compromised.
    Corrupt,
    /// A full, valid frame was found and its payload copied out. `consumed`
    /// bytes must be dropped from the front of the receive buffer.
    Decoded { header: FrameHeader, payload_len: usize, consumed: usize },
}

/// Encodes `header`'s fields plus `payload` into `out`, computing the CRC
/// over `payload` itself. Returns the number of bytes written.
///
/// Rejects (returns `None`) if `payload` exceeds `MAX_ENCODE_PAYLOAD` or if
/// `out` isn't large enough to hold the header plus the payload.
#[inline]
pub fn encode(
    msg_type: u8,
    flags: u16,
    seq: u32,
    payload: &[u8],
    out: &mut [u8],
) -> Option<usize> {
    if payload.len() > MAX_ENCODE_PAYLOAD {
        return None;
    }

    let total = HEADER_SIZE + payload.len();
    if out.len() < total {
        return None;
    }

    let crc = crate::net::crc::crc32(payload);

    let mut cursor = Cursor::new(&mut out[..total]);
    // These writes cannot fail: `total` bytes were just confirmed available.
    cursor.write_u32::<BigEndian>(MAGIC).expect("header fits in out");
    cursor.write_u8(VERSION).expect("header fits in out");
    cursor.write_u8(msg_type).expect("header fits in out");
    cursor.write_u16::<BigEndian>(flags).expect("header fits in out");
    cursor.write_u32::<BigEndian>(seq).expect("header fits in out");
    cursor.write_u32::<BigEndian>(payload.len() as u32).expect("header fits in out");
    cursor.write_u32::<BigEndian>(crc).expect("header fits in out");
    cursor.write_all(payload).expect("payload fits in out");

    Some(total)
}

/// Attempts to decode one frame from the front of `rxbuf`, copying its
/// payload into `payload_out`. `payload_out` should be at least
/// `max_payload` bytes to ever succeed on a maximal frame.
///
/// `max_payload` is the caller's actual configured ceiling — normally the
/// owning connection's `buffer_capacity - HEADER_SIZE` — not a fixed
/// constant, since a declared `payload_len` that could never fit the
/// receive buffer it was read from must be rejected immediately rather than
/// left to stall as `NeedMore` forever.
///
/// A successful decode (or a `Corrupt` verdict) never reads past
/// `20 + payload_len` bytes of `rxbuf`; a `NeedMore` verdict never consumes
/// anything, so callers can safely retry once more bytes arrive.
#[inline]
pub fn try_decode(rxbuf: &[u8], payload_out: &mut [u8], max_payload: usize) -> DecodeOutcome {
    if rxbuf.len() < HEADER_SIZE {
        return DecodeOutcome::NeedMore;
    }

    let mut cursor = Cursor::new(&rxbuf[..HEADER_SIZE]);
    let magic = cursor.read_u32::<BigEndian>().expect("header slice is HEADER_SIZE bytes");
    if magic != MAGIC {
        return DecodeOutcome::Corrupt;
    }

    let version = cursor.read_u8().expect("header slice is HEADER_SIZE bytes");
    if version != VERSION {
        return DecodeOutcome::Corrupt;
    }

    let msg_type = cursor.read_u8().expect("header slice is HEADER_SIZE bytes");
    let flags = cursor.read_u16::<BigEndian>().expect("header slice is HEADER_SIZE bytes");
    let seq = cursor.read_u32::<BigEndian>().expect("header slice is HEADER_SIZE bytes");
    let payload_len = cursor.read_u32::<BigEndian>().expect("header slice is HEADER_SIZE bytes");
    let payload_crc = cursor.read_u32::<BigEndian>().expect("header slice is HEADER_SIZE bytes");

    let payload_len_usize = payload_len as usize;

    if payload_len_usize > max_payload {
        return DecodeOutcome::Corrupt;
    }

    if rxbuf.len() < HEADER_SIZE + payload_len_usize {
        return DecodeOutcome::NeedMore;
    }

    if payload_out.len() < payload_len_usize {
        return DecodeOutcome::Corrupt;
    }

    let payload_slice = &rxbuf[HEADER_SIZE..HEADER_SIZE + payload_len_usize];

    if crate::net::crc::crc32(payload_slice) != payload_crc {
        return DecodeOutcome::Corrupt;
    }

    payload_out[..payload_len_usize].copy_from_slice(payload_slice);

    DecodeOutcome::Decoded {
        header: FrameHeader { version, msg_type, flags, seq, payload_len, payload_crc },
        payload_len: payload_len_usize,
        consumed: HEADER_SIZE + payload_len_usize,
    }
}
