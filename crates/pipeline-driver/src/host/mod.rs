//! Host audio endpoint abstraction.
//!
//! An endpoint owns a small set of fixed-capacity [`HwBuffer`]s inside a [`BufferPool`]. The
//! animator borrows one buffer at a time, fills it and hands it back with
//! [`HostEndpoint::enqueue`]. The platform's playback thread returns each consumed buffer to
//! the pool, which is the only handshake between the two threads.

pub mod cpal_output;
pub mod sim;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use crate::error::Result;
use crate::format::AudioFormat;

/// Buffer ring sizing shared by every endpoint implementation.
#[derive(Clone, Debug)]
pub struct EndpointConfig {
    /// Number of hardware buffers in the ring.
    pub buffer_count: usize,
    /// Capacity of each buffer in bytes (rounded down to whole frames on configure).
    pub buffer_bytes: usize,
}

impl Default for EndpointConfig {
    /// Three buffers, the queue depth recommended for AudioQueue-style hosts.
    fn default() -> Self {
        Self {
            buffer_count: 3,
            buffer_bytes: 4096,
        }
    }
}

/// Platform audio capability consumed by the animator.
///
/// All methods are called from the animator thread only. Implementations deliver refill
/// notifications by calling [`BufferPool::release`] from their own playback thread.
pub trait HostEndpoint {
    /// Create or recreate the platform stream for `format`.
    ///
    /// Rejection by the platform is reported as `DriverError::Configuration`; no fallback
    /// format is attempted.
    fn configure(&mut self, format: AudioFormat) -> Result<()>;

    fn buffer_count(&self) -> usize;

    /// Usable bytes per buffer for the configured format.
    fn buffer_capacity(&self) -> usize;

    fn start(&mut self) -> Result<()>;

    /// Halt playback and reclaim queued buffers. Safe while a refill is in flight.
    fn stop(&mut self);

    fn is_active(&self) -> bool;

    /// Block until a buffer is free. `None` means the pool was interrupted.
    fn request_buffer(&mut self) -> Option<HwBuffer> {
        self.handles().pool.acquire()
    }

    /// Queue a filled buffer for playback. Buffers play in FIFO order.
    fn enqueue(&mut self, buf: HwBuffer);

    /// Linear gain in `[0.0, 1.0]`, effective from the next rendered sample.
    fn set_volume(&mut self, level: f32) {
        self.handles().volume.set(level);
    }

    /// Drop queued audio while keeping the stream configured.
    fn flush(&mut self);

    /// Stop and release the platform stream. Every buffer is back in the pool afterwards.
    fn teardown(&mut self);

    fn handles(&self) -> EndpointHandles;
}

/// Cross-thread handles onto an endpoint's shared state.
#[derive(Clone)]
pub struct EndpointHandles {
    pub pool: Arc<BufferPool>,
    pub volume: Volume,
    pub counters: PlaybackCounters,
}

/// Render-side counters, written by the platform thread.
#[derive(Clone, Debug, Default)]
pub struct PlaybackCounters {
    underruns: Arc<AtomicU64>,
    played_bytes: Arc<AtomicU64>,
}

impl PlaybackCounters {
    /// The hardware asked for audio while nothing was queued.
    pub fn record_underrun(&self) {
        self.underruns.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_played(&self, bytes: u64) {
        self.played_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn underruns(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }

    pub fn played_bytes(&self) -> u64 {
        self.played_bytes.load(Ordering::Relaxed)
    }
}

/// A fixed-capacity byte region owned by a [`BufferPool`].
#[derive(Debug)]
pub struct HwBuffer {
    data: Box<[u8]>,
    len: usize,
    slot: usize,
    generation: u64,
}

impl HwBuffer {
    fn new(slot: usize, capacity: usize, generation: u64) -> Self {
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
            len: 0,
            slot,
            generation,
        }
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.data.len()
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.len
    }

    /// The written prefix, i.e. what the hardware will play.
    pub fn filled(&self) -> &[u8] {
        &self.data[..self.len]
    }

    pub fn filled_mut(&mut self) -> &mut [u8] {
        &mut self.data[..self.len]
    }

    /// Unwritten tail of the buffer.
    pub fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.data[self.len..]
    }

    /// Mark `n` more bytes of the spare region as written.
    pub fn commit(&mut self, n: usize) {
        self.len = (self.len + n).min(self.data.len());
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }
}

/// The buffer-free handshake.
///
/// The animator blocks in [`acquire`](Self::acquire); the platform thread wakes it with
/// [`release`](Self::release). [`interrupt`](Self::interrupt) wakes a blocked acquirer without a
/// buffer so an external stop can terminate the animator.
pub struct BufferPool {
    inner: Mutex<PoolInner>,
    cv: Condvar,
}

struct PoolInner {
    free: VecDeque<HwBuffer>,
    total: usize,
    capacity: usize,
    generation: u64,
    interrupted: bool,
}

impl BufferPool {
    pub fn new(count: usize, capacity: usize) -> Self {
        let pool = Self {
            inner: Mutex::new(PoolInner {
                free: VecDeque::new(),
                total: 0,
                capacity: 0,
                generation: 0,
                interrupted: false,
            }),
            cv: Condvar::new(),
        };
        pool.reallocate(count, capacity);
        pool
    }

    fn lock(&self) -> MutexGuard<'_, PoolInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace every buffer with `count` fresh buffers of `capacity` bytes.
    ///
    /// Buffers of the previous generation still in flight are discarded when released.
    pub fn reallocate(&self, count: usize, capacity: usize) {
        let mut g = self.lock();
        g.generation += 1;
        let generation = g.generation;
        g.free = (0..count)
            .map(|slot| HwBuffer::new(slot, capacity, generation))
            .collect();
        g.total = count;
        g.capacity = capacity;
        drop(g);
        self.cv.notify_all();
    }

    /// Take the oldest free buffer, blocking until one is released.
    ///
    /// Returns `None` once the pool has been interrupted.
    pub fn acquire(&self) -> Option<HwBuffer> {
        let mut g = self.lock();
        loop {
            if g.interrupted {
                return None;
            }
            if let Some(buf) = g.free.pop_front() {
                return Some(buf);
            }
            g = self.cv.wait(g).unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Return a buffer to the free list and wake a waiting acquirer.
    pub fn release(&self, mut buf: HwBuffer) {
        let mut g = self.lock();
        if buf.generation != g.generation {
            tracing::debug!(slot = buf.slot, "dropping buffer from previous stream");
            return;
        }
        buf.clear();
        g.free.push_back(buf);
        drop(g);
        self.cv.notify_one();
    }

    /// Wake any blocked acquirer and refuse further acquisitions.
    pub fn interrupt(&self) {
        let mut g = self.lock();
        g.interrupted = true;
        drop(g);
        self.cv.notify_all();
    }

    pub fn free_count(&self) -> usize {
        self.lock().free.len()
    }

    pub fn total(&self) -> usize {
        self.lock().total
    }

    pub fn capacity(&self) -> usize {
        self.lock().capacity
    }
}

/// Linear output gain shared between the driver and the render thread.
///
/// Stored as `f32` bits so it can be read on the real-time path without a lock.
#[derive(Clone, Debug)]
pub struct Volume(Arc<AtomicU32>);

impl Volume {
    pub fn new(level: f32) -> Self {
        Self(Arc::new(AtomicU32::new(clamp_level(level).to_bits())))
    }

    pub fn set(&self, level: f32) {
        self.0.store(clamp_level(level).to_bits(), Ordering::Relaxed);
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }
}

impl Default for Volume {
    fn default() -> Self {
        Self::new(1.0)
    }
}

/// Clamp to `[0, 1]`; NaN maps to silence.
pub fn clamp_level(level: f32) -> f32 {
    if level.is_nan() {
        0.0
    } else {
        level.clamp(0.0, 1.0)
    }
}
