//! Bounded byte buffer between console writers and the network session
//!
//! Multi-writer, single-reader FIFO of raw bytes with a fixed capacity.
//! Writers never wait: when the new write does not fit, the oldest queued
//! bytes are evicted to make room. Fresh diagnostic output is worth more
//! than complete output.

use bytes::{Bytes, BytesMut};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::error::{BridgeError, Result};

/// Fixed-capacity byte ring with drop-oldest overflow
pub struct BoundedByteBuffer {
    ring: Mutex<VecDeque<u8>>,
    capacity: usize,
    /// Wakes the reader; `notify_one` keeps a permit so no wakeup is lost
    data_ready: Notify,
    closed: AtomicBool,
    dropped: AtomicU64,
}

impl BoundedByteBuffer {
    /// Create buffer with the full capacity reserved up front
    ///
    /// The ring never reallocates afterwards, so writes don't touch the heap.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(BridgeError::InvalidCapacity(capacity));
        }

        let mut ring = VecDeque::new();
        ring.try_reserve_exact(capacity)
            .map_err(|_| BridgeError::BufferAllocation { capacity })?;

        Ok(Self {
            ring: Mutex::new(ring),
            capacity,
            data_ready: Notify::new(),
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        })
    }

    /// Enqueue bytes, evicting the oldest queued bytes if needed
    ///
    /// A write larger than the whole buffer keeps only its newest
    /// `capacity` bytes. Returns the number of bytes accepted.
    pub fn write(&self, data: &[u8]) -> usize {
        if data.is_empty() || self.is_closed() {
            return 0;
        }

        let data = if data.len() > self.capacity {
            let truncated = data.len() - self.capacity;
            self.dropped.fetch_add(truncated as u64, Ordering::Relaxed);
            &data[truncated..]
        } else {
            data
        };

        {
            let mut ring = self.lock();
            let free = self.capacity - ring.len();
            if data.len() > free {
                let evict = data.len() - free;
                ring.drain(..evict);
                self.dropped.fetch_add(evict as u64, Ordering::Relaxed);
            }
            ring.extend(data.iter().copied());
        }

        self.data_ready.notify_one();
        data.len()
    }

    /// Remove up to `max` of the oldest bytes without waiting
    pub fn try_take(&self, max: usize) -> Bytes {
        let mut ring = self.lock();
        let n = max.min(ring.len());
        if n == 0 {
            return Bytes::new();
        }

        let mut chunk = BytesMut::with_capacity(n);
        let (front, back) = ring.as_slices();
        if front.len() >= n {
            chunk.extend_from_slice(&front[..n]);
        } else {
            chunk.extend_from_slice(front);
            chunk.extend_from_slice(&back[..n - front.len()]);
        }
        ring.drain(..n);
        chunk.freeze()
    }

    /// Remove up to `max` of the oldest bytes, waiting up to `wait` for data
    ///
    /// Returns an empty chunk on timeout or once the buffer is closed.
    pub async fn take_upto(&self, max: usize, wait: Duration) -> Bytes {
        let deadline = Instant::now() + wait;

        loop {
            if self.is_closed() {
                return Bytes::new();
            }

            let chunk = self.try_take(max);
            if !chunk.is_empty() || max == 0 {
                return chunk;
            }

            // Stale permits from already-drained writes just loop once more
            if tokio::time::timeout_at(deadline, self.data_ready.notified())
                .await
                .is_err()
            {
                return Bytes::new();
            }
        }
    }

    /// Bytes currently queued
    pub fn pending(&self) -> usize {
        self.lock().len()
    }

    /// Check if nothing is queued
    pub fn is_empty(&self) -> bool {
        self.pending() == 0
    }

    /// Fixed capacity in bytes
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total bytes lost to eviction or truncation since creation
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Tear the buffer down: later writes are ignored, waiting readers return
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.data_ready.notify_waiters();
        self.data_ready.notify_one();
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    // A writer that panicked mid-write leaves the ring structurally valid
    fn lock(&self) -> MutexGuard<'_, VecDeque<u8>> {
        self.ring.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
