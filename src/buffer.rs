// Fixed-capacity append-only buffer leased from a `MemoryManager`.
//
// One buffer serves a request through three phases: the request build
// (header records, then body), the quiescent in-flight window, and finally
// the response phase, where the same region is reused as the scratch area
// holding decoded header text. The reuse is safe because the request is
// single-owner and the response parse runs strictly after the request bytes
// have left the wire.

use crate::memory::MemoryManager;
use std::fmt;
use std::ops::Range;
use std::sync::Arc;
use thiserror::Error;

/// A write exceeded the buffer's remaining capacity. The buffer never grows;
/// callers must size `message_buffer_size` for their largest request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("write of {requested} bytes exceeds remaining buffer capacity ({remaining} left)")]
pub struct BufferFull {
    pub requested: usize,
    pub remaining: usize,
}

/// Fixed-size binary buffer with a single forward cursor.
pub struct FixedBuffer {
    region: Option<Box<[u8]>>,
    written: usize,
    capacity: usize,
    memory: Arc<dyn MemoryManager>,
}

impl FixedBuffer {
    /// Leases a region of `capacity` bytes from `memory`.
    pub fn new(memory: Arc<dyn MemoryManager>, capacity: usize) -> Self {
        let region = Some(memory.rent(capacity));
        FixedBuffer {
            region,
            written: 0,
            capacity,
            memory,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current cursor position; always within `0..=capacity`.
    pub fn written(&self) -> usize {
        self.written
    }

    /// Bytes of capacity not yet written.
    pub fn remaining(&self) -> usize {
        self.capacity - self.written
    }

    /// The bytes accumulated so far.
    pub fn accumulated(&self) -> &[u8] {
        match &self.region {
            Some(region) => &region[..self.written],
            None => &[],
        }
    }

    /// The whole leased region, for use as a transport read target. Released
    /// buffers expose an empty slice.
    pub fn region_mut(&mut self) -> &mut [u8] {
        match &mut self.region {
            Some(region) => region,
            None => &mut [],
        }
    }

    /// Appends `bytes` at the cursor, whole or not at all.
    pub fn put(&mut self, bytes: &[u8]) -> Result<(), BufferFull> {
        if bytes.len() > self.remaining() {
            return Err(BufferFull {
                requested: bytes.len(),
                remaining: self.remaining(),
            });
        }
        if let Some(region) = &mut self.region {
            region[self.written..self.written + bytes.len()].copy_from_slice(bytes);
            self.written += bytes.len();
            Ok(())
        } else {
            Err(BufferFull {
                requested: bytes.len(),
                remaining: 0,
            })
        }
    }

    /// Moves the cursor forward over bytes written directly into
    /// [`region_mut`](Self::region_mut).
    pub fn advance(&mut self, n: usize) -> Result<(), BufferFull> {
        if n > self.remaining() {
            return Err(BufferFull {
                requested: n,
                remaining: self.remaining(),
            });
        }
        self.written += n;
        Ok(())
    }

    /// Appends `bytes` and returns the range they occupy, for the response
    /// header scratch window.
    pub fn scratch_put(&mut self, bytes: &[u8]) -> Result<Range<usize>, BufferFull> {
        let start = self.written;
        self.put(bytes)?;
        Ok(start..self.written)
    }

    /// Rewinds the cursor to zero. The region contents are left in place.
    pub fn reset(&mut self) {
        self.written = 0;
    }

    /// Whether the region is currently leased.
    pub fn is_leased(&self) -> bool {
        self.region.is_some()
    }

    /// Re-leases a region after a [`release`](Self::release). No-op while
    /// already leased.
    pub fn prepare(&mut self) {
        if self.region.is_none() {
            self.region = Some(self.memory.rent(self.capacity));
        }
        self.written = 0;
    }

    /// Returns the region to the memory manager. Idempotent; writes after
    /// release fail with `BufferFull` until [`prepare`](Self::prepare).
    pub fn release(&mut self) {
        if let Some(region) = self.region.take() {
            self.memory.give_back(region);
        }
        self.written = 0;
    }
}

impl fmt::Debug for FixedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixedBuffer")
            .field("written", &self.written)
            .field("capacity", &self.capacity)
            .field("leased", &self.region.is_some())
            .finish()
    }
}

impl Drop for FixedBuffer {
    fn drop(&mut self) {
        self.release();
    }
}
