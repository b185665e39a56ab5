//! Wire protocol plumbing: framing, CRC, bounded buffers, and the error
//! taxonomy shared by the framing and event loop layers.

pub mod buffer;
pub mod crc;
pub mod error;
pub mod frame;
