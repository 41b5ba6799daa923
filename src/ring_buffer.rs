//! Fixed-capacity ring buffer for PTY output and terminal scrollback.
//!
//! When the buffer is full, pushing a new element silently evicts the
//! oldest one from the front. Memory usage is bounded at `capacity`
//! elements regardless of how much output the agent produces.
//!
//! # Usage
//!
//! Each [`PtySession`](crate::agent::PtySession) owns two of these:
//!
//! - `RingBuffer<Vec<u8>>` of raw output chunks, drained by remote viewers
//!   that stream the live tail.
//! - `RingBuffer<StyledLine>` inside the [`Vt100Engine`](crate::terminal::Vt100Engine),
//!   holding lines that scrolled off the top of the screen.
//!
//! This is a live-tail view, not a durable log: overflow is lossy and
//! never reported.

// Rust guideline compliant 2026-02

use std::collections::VecDeque;

/// Fixed-capacity FIFO ring buffer.
///
/// Pushing past `capacity` drops the oldest element. `len() <= capacity()`
/// holds after every operation.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    buf: VecDeque<T>,
    capacity: usize,
}

impl<T> RingBuffer<T> {
    /// Create a new ring buffer holding at most `capacity` elements.
    ///
    /// # Panics
    ///
    /// Panics if `capacity == 0`.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "RingBuffer capacity must be > 0");
        Self {
            // Pre-allocate a modest chunk; VecDeque grows lazily.
            buf: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    /// Append `item`, evicting the oldest element if the buffer is full.
    pub fn push(&mut self, item: T) {
        if self.buf.len() == self.capacity {
            self.buf.pop_front();
        }
        self.buf.push_back(item);
    }

    /// Remove and return every buffered element, oldest first.
    pub fn drain(&mut self) -> Vec<T> {
        self.buf.drain(..).collect()
    }

    /// Iterate over buffered elements (oldest first) without consuming them.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator {
        self.buf.iter()
    }

    /// Element at `index` counted from the oldest entry.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&T> {
        self.buf.get(index)
    }

    /// Current number of buffered elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// True if nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Discard all buffered elements without changing capacity.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Configured maximum number of elements.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T: Clone> RingBuffer<T> {
    /// Return a copy of all buffered elements (oldest first).
    #[must_use]
    pub fn to_vec(&self) -> Vec<T> {
        self.buf.iter().cloned().collect()
    }
}

impl RingBuffer<Vec<u8>> {
    /// Drain all chunks and concatenate them into one contiguous byte vector.
    pub fn drain_bytes(&mut self) -> Vec<u8> {
        let total = self.buf.iter().map(Vec::len).sum();
        let mut out = Vec::with_capacity(total);
        for chunk in self.buf.drain(..) {
            out.extend_from_slice(&chunk);
        }
        out
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // ── Construction ──────────────────────────────────────────────────────

    #[test]
    fn test_new_buffer_is_empty() {
        let rb: RingBuffer<u32> = RingBuffer::new(1024);
        assert!(rb.is_empty());
        assert_eq!(rb.len(), 0);
        assert_eq!(rb.capacity(), 1024);
        assert!(rb.to_vec().is_empty());
    }

    #[test]
    #[should_panic(expected = "capacity must be > 0")]
    fn test_zero_capacity_panics() {
        let _ = RingBuffer::<u8>::new(0);
    }

    // ── Overflow / eviction ───────────────────────────────────────────────

    #[test]
    fn test_push_150_into_capacity_100() {
        let mut rb = RingBuffer::new(100);
        for i in 1..=150 {
            rb.push(i);
        }
        assert_eq!(rb.len(), 100);

        let drained = rb.drain();
        // First element is the 51st pushed item.
        assert_eq!(drained[0], 51);
        assert_eq!(drained[99], 150);
        assert!(rb.is_empty());
    }

    #[test]
    fn test_drain_returns_last_capacity_items_in_order() {
        for cap in [1usize, 2, 7, 64] {
            let mut rb = RingBuffer::new(cap);
            let n = cap * 3 + 1;
            for i in 0..n {
                rb.push(i);
            }
            let expected: Vec<usize> = (n - cap..n).collect();
            assert_eq!(rb.drain(), expected, "capacity {cap}");
        }
    }

    #[test]
    fn test_len_never_exceeds_capacity() {
        let mut rb = RingBuffer::new(5);
        for i in 0..50 {
            rb.push(i);
            assert!(rb.len() <= rb.capacity());
        }
    }

    #[test]
    fn test_under_capacity_keeps_everything() {
        let mut rb = RingBuffer::new(10);
        rb.push("a");
        rb.push("b");
        assert_eq!(rb.drain(), vec!["a", "b"]);
    }

    // ── Drain / clear ─────────────────────────────────────────────────────

    #[test]
    fn test_drain_resets_to_empty() {
        let mut rb = RingBuffer::new(4);
        rb.push(1);
        rb.push(2);
        let _ = rb.drain();
        assert!(rb.is_empty());
        assert!(rb.drain().is_empty());

        rb.push(3);
        assert_eq!(rb.drain(), vec![3]);
    }

    #[test]
    fn test_clear_empties_buffer() {
        let mut rb = RingBuffer::new(64);
        rb.push(String::from("some data here"));
        rb.clear();
        assert!(rb.is_empty());
        assert_eq!(rb.capacity(), 64);
    }

    #[test]
    fn test_to_vec_does_not_consume_buffer() {
        let mut rb = RingBuffer::new(8);
        rb.push(1);
        rb.push(2);
        assert_eq!(rb.to_vec(), rb.to_vec());
        assert_eq!(rb.len(), 2);
        assert_eq!(rb.get(1), Some(&2));
        assert_eq!(rb.iter().rev().next(), Some(&2));
    }

    // ── Byte chunks ───────────────────────────────────────────────────────

    #[test]
    fn test_drain_bytes_concatenates_chunks() {
        let mut rb: RingBuffer<Vec<u8>> = RingBuffer::new(3);
        rb.push(b"dropped".to_vec());
        rb.push(b"$ ls\r\n".to_vec());
        rb.push(b"total 8".to_vec());
        rb.push(b"\r\n".to_vec());

        assert_eq!(rb.drain_bytes(), b"$ ls\r\ntotal 8\r\n");
        assert!(rb.is_empty());
    }
}
