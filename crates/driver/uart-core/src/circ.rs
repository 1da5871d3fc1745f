//! Fixed-capacity transmit ring.
//!
//! One slot is always left free so that `head == tail` unambiguously means
//! empty: a ring of capacity `N` holds at most `N - 1` bytes. The producer
//! (the write path) advances `tail`, the consumer (the transmit interrupt)
//! advances `head`. Both sides run under the port lock, so the ring itself
//! needs no atomics.

/// Size of the per-port transmit ring.
pub const UART_XMIT_SIZE: usize = 1024;

/// Free-space threshold at which blocked writers are woken.
pub const WAKEUP_CHARS: usize = 256;

/// Byte ring with a one-slot-sacrifice full/empty invariant.
///
/// `N` must be a power of two.
pub struct CircBuf<const N: usize> {
    buf: [u8; N],
    head: usize,
    tail: usize,
}

impl<const N: usize> CircBuf<N> {
    const CAPACITY_IS_POW2: () = assert!(N.is_power_of_two() && N >= 4);

    /// Creates an empty ring.
    pub const fn new() -> Self {
        let () = Self::CAPACITY_IS_POW2;
        Self {
            buf: [0; N],
            head: 0,
            tail: 0,
        }
    }

    /// Total slot count, one more than the usable capacity.
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Free-space level whose upward crossing raises a write wakeup.
    ///
    /// A quarter of the ring: 256 bytes for the standard 1024-byte ring.
    pub const fn low_water(&self) -> usize {
        N / 4
    }

    /// Number of bytes waiting to be transmitted.
    #[inline]
    pub fn pending(&self) -> usize {
        self.tail.wrapping_sub(self.head) & (N - 1)
    }

    /// Number of bytes that can still be pushed.
    #[inline]
    pub fn free(&self) -> usize {
        self.head.wrapping_sub(self.tail).wrapping_sub(1) & (N - 1)
    }

    /// Returns `true` if nothing is pending.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    /// Returns `true` if no byte can be pushed.
    #[inline]
    pub fn is_full(&self) -> bool {
        self.free() == 0
    }

    /// Appends a byte. Returns `false`, leaving the ring untouched, if full.
    pub fn push(&mut self, byte: u8) -> bool {
        if self.is_full() {
            return false;
        }
        self.buf[self.tail] = byte;
        self.tail = (self.tail + 1) & (N - 1);
        true
    }

    /// Removes the oldest byte.
    pub fn pop(&mut self) -> Option<u8> {
        if self.is_empty() {
            return None;
        }
        let byte = self.buf[self.head];
        self.head = (self.head + 1) & (N - 1);
        Some(byte)
    }

    /// Removes the oldest byte and reports whether the pop lifted free
    /// space from below the low-water mark to the mark.
    ///
    /// Free space grows by exactly one per pop, so this is `true` once per
    /// upward crossing.
    pub fn pop_wakeup(&mut self) -> Option<(u8, bool)> {
        let byte = self.pop()?;
        Some((byte, self.free() == self.low_water()))
    }

    /// Copies as much of `data` as fits, in at most two chunks.
    ///
    /// Returns the number of bytes accepted.
    pub fn write_from(&mut self, data: &[u8]) -> usize {
        let mut written = 0;
        while written < data.len() {
            let free = self.free();
            if free == 0 {
                break;
            }
            // Contiguous run up to the physical end of the buffer.
            let run = free.min(N - self.tail).min(data.len() - written);
            self.buf[self.tail..self.tail + run].copy_from_slice(&data[written..written + run]);
            self.tail = (self.tail + run) & (N - 1);
            written += run;
        }
        written
    }

    /// Discards all pending bytes and resets both indices.
    pub fn clear(&mut self) {
        self.head = 0;
        self.tail = 0;
    }
}

impl<const N: usize> Default for CircBuf<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> core::fmt::Debug for CircBuf<N> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CircBuf")
            .field("head", &self.head)
            .field("tail", &self.tail)
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}
