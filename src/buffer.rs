use std::cmp;
use std::io::{self, Read, Write};

/// Default ring capacity. The inspection window handed to the protocol
/// dissectors (one Ethernet MSS) must fit inside it.
pub const DEFAULT_CAPACITY: usize = 4096;

/// A fixed-capacity byte ring.
///
/// Bytes received from one socket wait here until the opposite socket can
/// take them. `peek` does not consume, so a dissector that comes up short
/// can retry the same prefix once more bytes arrive.
pub struct Buffer {
    data: Box<[u8]>,
    head: usize,
    len: usize,
    total_in: u64,
    total_out: u64,
}

impl Buffer {
    pub fn new() -> Buffer {
        Buffer::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Buffer {
        assert!(capacity > 0);
        Buffer {
            data: vec![0; capacity].into_boxed_slice(),
            head: 0,
            len: 0,
            total_in: 0,
            total_out: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Pending bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Free bytes.
    pub fn room(&self) -> usize {
        self.data.len() - self.len
    }

    /// Total bytes ever read into the ring.
    pub fn total_in(&self) -> u64 {
        self.total_in
    }

    /// Total bytes ever written out of the ring.
    pub fn total_out(&self) -> u64 {
        self.total_out
    }

    /// Copies up to `dst.len()` pending bytes into `dst` without advancing
    /// the read cursor. Repeated calls return the same prefix until
    /// `read_from` or `write_to` moves a cursor.
    pub fn peek(&self, dst: &mut [u8]) -> usize {
        let n = cmp::min(dst.len(), self.len);
        let first = cmp::min(n, self.capacity() - self.head);
        dst[..first].copy_from_slice(&self.data[self.head..self.head + first]);
        if first < n {
            dst[first..n].copy_from_slice(&self.data[..n - first]);
        }
        n
    }

    /// Issues one read into the contiguous free region. `Ok(0)` means the
    /// peer reached EOF; callers must not invoke this on a full ring.
    pub fn read_from<R: Read>(&mut self, r: &mut R) -> io::Result<usize> {
        debug_assert!(self.room() > 0);
        let cap = self.capacity();
        let tail = (self.head + self.len) % cap;
        let writable = cmp::min(self.room(), cap - tail);
        let n = r.read(&mut self.data[tail..tail + writable])?;
        self.len += n;
        self.total_in += n as u64;
        Ok(n)
    }

    /// Issues one write of the contiguous pending prefix.
    pub fn write_to<W: Write>(&mut self, w: &mut W) -> io::Result<usize> {
        debug_assert!(self.len > 0);
        let readable = cmp::min(self.len, self.capacity() - self.head);
        let n = w.write(&self.data[self.head..self.head + readable])?;
        self.head = (self.head + n) % self.capacity();
        self.len -= n;
        if self.len == 0 {
            self.head = 0;
        }
        self.total_out += n as u64;
        Ok(n)
    }
}
