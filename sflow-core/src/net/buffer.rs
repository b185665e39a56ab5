//! Bounded per-connection byte buffers.
//!
//! `RxBuffer` accumulates unread bytes from the socket in a ring (so a
//! partial-frame "shift remaining bytes to the front" never needs an actual
//! `memmove`). `TxBuffer` holds at most one outgoing frame at a time, which
//! is simple enough to model as a plain array plus an offset — there is no
//! wraparound to manage since the dispatcher never queues a second reply
//! before the first has fully drained.

use slice_deque::SliceDeque;
use std::io;

/// A bounded FIFO byte queue backed by a ring buffer. Data is appended at
/// the tail and consumed from the head; `capacity` is enforced explicitly
/// rather than relying on the allocator's actual (page-rounded) capacity.
pub struct RxBuffer {
    data: SliceDeque<u8>,
    capacity: usize,
}

impl RxBuffer {
    #[inline]
    pub fn new(capacity: usize) -> RxBuffer {
        let mut data = SliceDeque::new();
        data.reserve(capacity);
        RxBuffer { data, capacity }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Remaining room before `append` would reject further bytes.
    #[inline]
    pub fn free_capacity(&self) -> usize {
        self.capacity - self.data.len()
    }

    /// Slice over the currently buffered bytes, front to back.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        self.data.as_slice()
    }

    /// Appends `bytes` to the tail. Rejects (leaving the buffer unchanged)
    /// if that would exceed `capacity`.
    #[inline]
    pub fn append(&mut self, bytes: &[u8]) -> Result<(), BufferFull> {
        if bytes.len() > self.free_capacity() {
            return Err(BufferFull);
        }
        self.data.extend(bytes.iter().copied());
        Ok(())
    }

    /// Drops exactly `count` bytes from the head, shifting the remainder
    /// to the front (a no-op memmove for a ring buffer — just moves the
    /// head cursor).
    #[inline]
    pub fn consume(&mut self, count: usize) {
        debug_assert!(count <= self.data.len());
        unsafe { self.data.move_head(count as isize) }
    }

    #[inline]
    pub fn clear(&mut self) {
        let len = self.data.len();
        self.consume(len);
    }

    /// Reads as much as `reader` will give up in a single attempt, bounded
    /// by remaining capacity. Returns the number of bytes read (`0` means
    /// either no capacity left or the peer closed the stream — callers
    /// distinguish those via `free_capacity()`), or an I/O error such as
    /// `WouldBlock`.
    ///
    /// Unlike a "read until full" loop, this makes exactly one syscall
    /// attempt per call so the event loop can observe a `0`-byte read
    /// (peer closed) or a `WouldBlock` (done for this tick) directly.
    #[inline]
    pub fn ingress<R: io::Read>(&mut self, mut reader: R) -> io::Result<usize> {
        let free = self.free_capacity();
        if free == 0 {
            return Ok(0);
        }

        // Bound the read to our logical capacity even though the
        // underlying allocation may have more (page-rounded) room.
        let mut scratch = [0u8; 4096];
        let want = free.min(scratch.len());
        let read = reader.read(&mut scratch[..want])?;
        if read > 0 {
            self.data.extend(scratch[..read].iter().copied());
        }
        Ok(read)
    }
}

#[derive(Debug, Eq, PartialEq)]
pub struct BufferFull;

/// Holds at most one outgoing frame plus the offset already written to the
/// socket. Invariant: `0 <= off <= len <= capacity`.
pub struct TxBuffer {
    data: Vec<u8>,
    len: usize,
    off: usize,
    capacity: usize,
}

impl TxBuffer {
    #[inline]
    pub fn new(capacity: usize) -> TxBuffer {
        TxBuffer { data: vec![0u8; capacity], len: 0, off: 0, capacity }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.off == self.len
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Queues `frame` as the sole outgoing message. Callers must ensure the
    /// buffer `is_empty()` first — the dispatcher is never invoked while a
    /// reply is still pending.
    #[inline]
    pub fn queue(&mut self, frame: &[u8]) -> Result<(), BufferFull> {
        debug_assert!(self.is_empty(), "queue called while a reply is still pending");
        if frame.len() > self.capacity {
            return Err(BufferFull);
        }
        self.data[..frame.len()].copy_from_slice(frame);
        self.len = frame.len();
        self.off = 0;
        Ok(())
    }

    /// Writes as much of the remaining `[off..len)` slice as `writer` will
    /// accept in one attempt. Returns the number of bytes written.
    #[inline]
    pub fn egress<W: io::Write>(&mut self, mut writer: W) -> io::Result<usize> {
        if self.is_empty() {
            return Ok(0);
        }

        let written = writer.write(&self.data[self.off..self.len])?;
        if written == 0 {
            return Err(io::ErrorKind::WriteZero.into());
        }
        self.off += written;

        if self.off == self.len {
            self.off = 0;
            self.len = 0;
        }

        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cmp::min;
    use std::io::{Read, Write};

    struct MockChannel {
        data: Vec<u8>,
        cursor: usize,
        chunk: usize,
        max_size: usize,
    }

    impl MockChannel {
        fn new(data: Vec<u8>, chunk: usize, max_size: usize) -> MockChannel {
            MockChannel { data, cursor: 0, chunk, max_size }
        }
    }

    impl Read for MockChannel {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.cursor == self.data.len() {
                return Err(io::ErrorKind::WouldBlock.into());
            }
            let offset = min(min(self.chunk, buf.len()), self.data.len() - self.cursor);
            buf[..offset].copy_from_slice(&self.data[self.cursor..self.cursor + offset]);
            self.cursor += offset;
            Ok(offset)
        }
    }

    impl Write for MockChannel {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.data.len() == self.max_size {
                return Err(io::ErrorKind::WouldBlock.into());
            }
            let count = min(self.chunk, buf.len());
            self.data.extend(&buf[..count]);
            Ok(count)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn append_rejects_over_capacity() {
        let mut buf = RxBuffer::new(8);
        assert!(buf.append(&[0u8; 8]).is_ok());
        assert_eq!(buf.append(&[0u8; 1]), Err(BufferFull));
    }

    #[test]
    fn consume_shifts_remaining_bytes() {
        let mut buf = RxBuffer::new(16);
        buf.append(&[1, 2, 3, 4]).unwrap();
        buf.consume(2);
        assert_eq!(buf.as_slice(), &[3, 4]);
        assert_eq!(buf.len(), 2);
        assert_eq!(buf.free_capacity(), 14);
    }

    #[test]
    fn ingress_stops_on_would_block() {
        let mock_data = vec![7u8; 100];
        let mut channel = MockChannel::new(mock_data.clone(), 40, mock_data.len());
        let mut buf = RxBuffer::new(8192);

        let mut total = 0;
        loop {
            match buf.ingress(&mut channel) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => panic!("unexpected error: {:?}", e),
            }
        }

        assert_eq!(total, mock_data.len());
        assert_eq!(buf.as_slice(), &mock_data[..]);
    }

    #[test]
    fn tx_buffer_roundtrip() {
        let mut tx = TxBuffer::new(64);
        tx.queue(&[1, 2, 3, 4, 5]).unwrap();
        assert!(!tx.is_empty());

        let mut sink = MockChannel::new(Vec::new(), 2, usize::MAX);
        let mut total = 0;
        while !tx.is_empty() {
            total += tx.egress(&mut sink).unwrap();
        }

        assert_eq!(total, 5);
        assert_eq!(sink.data, vec![1, 2, 3, 4, 5]);
        assert!(tx.is_empty());
    }

    #[test]
    fn tx_buffer_rejects_frame_larger_than_capacity() {
        let mut tx = TxBuffer::new(4);
        assert_eq!(tx.queue(&[0u8; 5]), Err(BufferFull));
    }

    #[test]
    fn tx_buffer_egress_zero_write_is_an_error() {
        let mut tx = TxBuffer::new(8);
        tx.queue(&[1]).unwrap();

        let mut zero: &mut [u8] = &mut [];
        let result = tx.egress(&mut zero);
        assert!(result.is_err());
        assert_eq!(result.err().unwrap().kind(), io::ErrorKind::WriteZero);
    }
}
