//! Per-connection read buffer.
//!
//! A contiguous byte region split into three parts: a consumed prefix
//! (already delivered downstream), the pending middle (received but not
//! yet parsed), and a writable tail. The connection owner reads directly
//! into the tail, commits what it received, and the frame dispatcher
//! consumes whole frames off the front.
//!
//! The backing storage is either the process heap or a do-not-dump region
//! (see [`crate::nodump`]) for large frames that must stay out of core
//! dumps.

use crate::nodump::{self, NodumpRegion};

enum Backing {
    Heap(Vec<u8>),
    Nodump(NodumpRegion),
}

impl Backing {
    fn capacity(&self) -> usize {
        match self {
            Backing::Heap(v) => v.len(),
            Backing::Nodump(r) => r.capacity(),
        }
    }

    fn as_slice(&self) -> &[u8] {
        match self {
            Backing::Heap(v) => v,
            Backing::Nodump(r) => r.as_slice(),
        }
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        match self {
            Backing::Heap(v) => v,
            Backing::Nodump(r) => r.as_mut_slice(),
        }
    }
}

/// Growable read buffer with an O(1) consume cursor.
pub struct ReadBuffer {
    backing: Backing,
    /// Length of the consumed prefix.
    head: usize,
    /// Length of the pending region.
    len: usize,
    /// Preferred capacity: initial size, raised while an oversized frame
    /// is in flight, lowered again by the shrink pass.
    target_size: usize,
    /// Length of the last region handed out by `acquire_write_region`.
    last_acquire: usize,
}

impl ReadBuffer {
    /// Create a buffer with `min_buffer_size` capacity.
    ///
    /// # Panics
    ///
    /// Panics if `min_buffer_size` is zero.
    pub fn new(min_buffer_size: usize) -> Self {
        assert!(min_buffer_size > 0, "buffer size must be > 0");
        Self {
            backing: Backing::Heap(vec![0u8; min_buffer_size]),
            head: 0,
            len: 0,
            target_size: min_buffer_size,
            last_acquire: 0,
        }
    }

    /// Return a writable region at the tail for the next read.
    ///
    /// Performs exactly one adjustment first, in priority order: reset the
    /// cursors when the pending region is empty; otherwise reclaim the
    /// consumed prefix by shifting pending bytes to the front; otherwise
    /// ensure `target_size` bytes of tailroom, reserving more capacity if
    /// needed. The returned slice is never empty and at most `target_size`
    /// bytes.
    pub fn acquire_write_region(&mut self) -> &mut [u8] {
        if self.len == 0 && self.capacity() > 0 {
            self.head = 0;
        } else if self.head > 0 {
            let (head, len) = (self.head, self.len);
            self.backing.as_mut_slice().copy_within(head..head + len, 0);
            self.head = 0;
        } else {
            self.reserve_tail(self.target_size.max(1));
        }

        let start = self.head + self.len;
        let end = (start + self.target_size).min(self.capacity());
        self.last_acquire = end - start;
        &mut self.backing.as_mut_slice()[start..end]
    }

    /// Extend the pending region by `n` bytes written into the last
    /// acquired region.
    pub fn commit_write(&mut self, n: usize) {
        debug_assert!(
            n <= self.last_acquire,
            "commit_write({n}) exceeds acquired region {}",
            self.last_acquire
        );
        self.len += n;
        debug_assert!(self.head + self.len <= self.capacity());
    }

    /// Consume `n` bytes from the front of the pending region.
    /// O(1): only the read cursor advances.
    pub fn consume_front(&mut self, n: usize) {
        debug_assert!(n <= self.len, "consume_front({n}) exceeds pending {}", self.len);
        let n = n.min(self.len);
        self.head += n;
        self.len -= n;
    }

    /// The pending (received, unparsed) bytes.
    pub fn pending(&self) -> &[u8] {
        &self.backing.as_slice()[self.head..self.head + self.len]
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Discard all pending data.
    pub fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }

    pub fn capacity(&self) -> usize {
        self.backing.capacity()
    }

    /// Free space after the pending region.
    pub fn tailroom(&self) -> usize {
        self.capacity() - self.head - self.len
    }

    pub fn target_size(&self) -> usize {
        self.target_size
    }

    /// True when the backing is a do-not-dump region.
    pub fn is_nodump(&self) -> bool {
        matches!(self.backing, Backing::Nodump(_))
    }

    pub(crate) fn raise_target(&mut self, n: usize) {
        self.target_size = self.target_size.max(n);
    }

    pub(crate) fn lower_target(&mut self, n: usize) {
        self.target_size = self.target_size.min(n);
    }

    /// Ensure at least `min_tailroom` bytes of free space after the
    /// pending region, compacting into a fresh heap allocation if needed.
    pub(crate) fn reserve_tail(&mut self, min_tailroom: usize) {
        if self.tailroom() >= min_tailroom {
            return;
        }
        let new_capacity = (self.len + min_tailroom).max(self.capacity());
        let mut fresh = vec![0u8; new_capacity];
        fresh[..self.len].copy_from_slice(self.pending());
        self.backing = Backing::Heap(fresh);
        self.head = 0;
    }

    /// Replace the backing with a fresh heap allocation of `size` bytes.
    /// The pending region must be empty.
    pub(crate) fn shrink_to(&mut self, size: usize) {
        debug_assert!(self.len == 0, "shrink with pending data");
        self.backing = Backing::Heap(vec![0u8; size.max(1)]);
        self.head = 0;
        self.len = 0;
    }

    /// Move the pending bytes into a do-not-dump region of at least
    /// `total` bytes. On allocation failure the heap backing is kept and
    /// `false` is returned; parsing continues on the normal path.
    pub(crate) fn promote_to_nodump(&mut self, total: usize) -> bool {
        if self.is_nodump() {
            return true;
        }
        match nodump::allocate(total.max(self.len)) {
            Ok(mut region) => {
                region.as_mut_slice()[..self.len].copy_from_slice(self.pending());
                self.backing = Backing::Nodump(region);
                self.head = 0;
                true
            }
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(buf: &mut ReadBuffer, data: &[u8]) {
        let mut offset = 0;
        while offset < data.len() {
            let region = buf.acquire_write_region();
            let n = region.len().min(data.len() - offset);
            region[..n].copy_from_slice(&data[offset..offset + n]);
            buf.commit_write(n);
            offset += n;
        }
    }

    #[test]
    fn write_and_consume() {
        let mut buf = ReadBuffer::new(64);
        write(&mut buf, b"hello world");
        assert_eq!(buf.pending(), b"hello world");
        buf.consume_front(6);
        assert_eq!(buf.pending(), b"world");
        buf.consume_front(5);
        assert!(buf.is_empty());
    }

    #[test]
    fn acquire_region_is_never_empty() {
        let mut buf = ReadBuffer::new(8);
        for _ in 0..100 {
            let region = buf.acquire_write_region();
            assert!(!region.is_empty());
            let n = region.len();
            buf.commit_write(n);
        }
    }

    #[test]
    fn acquire_resets_cursors_when_empty() {
        let mut buf = ReadBuffer::new(16);
        write(&mut buf, b"0123456789");
        buf.consume_front(10);
        let region_len = buf.acquire_write_region().len();
        // Cursors were reset, so the whole capacity is writable again.
        assert_eq!(region_len, 16);
    }

    #[test]
    fn acquire_reclaims_consumed_prefix() {
        let mut buf = ReadBuffer::new(16);
        write(&mut buf, b"0123456789abcdef");
        buf.consume_front(12);
        assert_eq!(buf.tailroom(), 0);
        // The shift moves "cdef" to the front without growing.
        let region_len = buf.acquire_write_region().len();
        assert_eq!(buf.capacity(), 16);
        assert_eq!(region_len, 12);
        assert_eq!(buf.pending(), b"cdef");
    }

    #[test]
    fn acquire_grows_when_full_and_unconsumed() {
        let mut buf = ReadBuffer::new(8);
        write(&mut buf, b"01234567");
        assert_eq!(buf.tailroom(), 0);
        let region_len = buf.acquire_write_region().len();
        assert!(region_len >= 1);
        assert!(buf.capacity() > 8);
        assert_eq!(buf.pending(), b"01234567");
    }

    #[test]
    fn pending_equals_writes_minus_consumes() {
        // Ledger property: pending bytes are exactly the committed writes
        // minus the consumed prefix, in order.
        let mut buf = ReadBuffer::new(4);
        let mut ledger: Vec<u8> = Vec::new();
        let mut consumed = 0usize;

        for round in 0u8..50 {
            let chunk: Vec<u8> = (0..7).map(|i| round.wrapping_mul(7).wrapping_add(i)).collect();
            write(&mut buf, &chunk);
            ledger.extend_from_slice(&chunk);

            if round % 3 == 0 {
                let take = buf.pending().len() / 2;
                buf.consume_front(take);
                consumed += take;
            }
            assert_eq!(buf.pending(), &ledger[consumed..]);
        }
    }

    #[test]
    fn reserve_tail_preserves_pending() {
        let mut buf = ReadBuffer::new(8);
        write(&mut buf, b"abcd");
        buf.reserve_tail(100);
        assert!(buf.tailroom() >= 100);
        assert_eq!(buf.pending(), b"abcd");
    }

    #[test]
    fn shrink_to_replaces_backing() {
        let mut buf = ReadBuffer::new(8);
        buf.reserve_tail(1000);
        assert!(buf.capacity() >= 1000);
        buf.shrink_to(8);
        assert_eq!(buf.capacity(), 8);
        assert!(buf.is_empty());
    }

    #[test]
    fn promote_to_nodump_preserves_pending() {
        let mut buf = ReadBuffer::new(32);
        write(&mut buf, b"sensitive");
        assert!(buf.promote_to_nodump(4096));
        assert!(buf.is_nodump());
        assert_eq!(buf.pending(), b"sensitive");
        assert!(buf.capacity() >= 4096);

        // Promotion is idempotent.
        assert!(buf.promote_to_nodump(4096));
    }

    #[test]
    fn target_raises_and_lowers() {
        let mut buf = ReadBuffer::new(64);
        buf.raise_target(4096);
        assert_eq!(buf.target_size(), 4096);
        buf.raise_target(100);
        assert_eq!(buf.target_size(), 4096);
        buf.lower_target(256);
        assert_eq!(buf.target_size(), 256);
    }
}
