//! Software host endpoint.
//!
//! Stands in for platform audio in tests and for `--null-output` runs. Consumption is driven
//! by a [`SimClock`]:
//! - `Manual`: nothing plays until a test calls [`SimHardware::consume`]
//! - `Instant`: buffers are consumed as soon as they are queued on an active stream
//! - `Realtime`: a playback thread consumes each buffer after its wall-clock duration
//!
//! Rendered bytes are captured after volume scaling so tests can inspect the output.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use super::{
    BufferPool, EndpointConfig, EndpointHandles, HostEndpoint, HwBuffer, PlaybackCounters, Volume,
};
use crate::error::{DriverError, Result};
use crate::format::AudioFormat;
use crate::volume::scale_be_samples;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SimClock {
    Manual,
    Instant,
    Realtime,
}

#[derive(Default)]
struct SimState {
    queue: VecDeque<HwBuffer>,
    format: Option<AudioFormat>,
    active: bool,
    shutdown: bool,
    capture: bool,
    rendered: Vec<u8>,
    enqueued_lengths: Vec<usize>,
    rendered_buffers: usize,
    starts: usize,
    configures: usize,
}

struct SimShared {
    state: Mutex<SimState>,
    cv: Condvar,
    pool: Arc<BufferPool>,
    volume: Volume,
    counters: PlaybackCounters,
}

impl SimShared {
    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Play one buffer: capture it (volume applied) and hand it back to the pool.
    fn render(&self, st: &mut SimState, mut buf: HwBuffer) {
        if st.capture {
            let bits = st.format.map(|f| f.bit_depth).unwrap_or(16);
            scale_be_samples(buf.filled_mut(), bits, self.volume.get());
            st.rendered.extend_from_slice(buf.filled());
        }
        st.rendered_buffers += 1;
        self.counters.add_played(buf.len() as u64);
        self.pool.release(buf);
    }

    fn reclaim(&self, st: &mut SimState) {
        while let Some(buf) = st.queue.pop_front() {
            self.pool.release(buf);
        }
    }
}

pub struct SimEndpoint {
    config: EndpointConfig,
    clock: SimClock,
    shared: Arc<SimShared>,
    capacity: usize,
    rejected_rates: Vec<u32>,
    worker: Option<JoinHandle<()>>,
}

impl SimEndpoint {
    pub fn new(config: EndpointConfig, clock: SimClock) -> Self {
        let count = config.buffer_count;
        let capacity = config.buffer_bytes;
        let shared = Arc::new(SimShared {
            state: Mutex::new(SimState {
                capture: true,
                ..SimState::default()
            }),
            cv: Condvar::new(),
            pool: Arc::new(BufferPool::new(count, capacity)),
            volume: Volume::default(),
            counters: PlaybackCounters::default(),
        });
        Self {
            config,
            clock,
            shared,
            capacity,
            rejected_rates: Vec::new(),
            worker: None,
        }
    }

    /// Refuse to configure streams at these sample rates.
    pub fn with_rejected_rates(mut self, rates: &[u32]) -> Self {
        self.rejected_rates = rates.to_vec();
        self
    }

    /// Keep rendered bytes for inspection (on by default).
    pub fn with_capture(self, capture: bool) -> Self {
        self.shared.lock().capture = capture;
        self
    }

    pub fn hardware(&self) -> SimHardware {
        SimHardware {
            shared: self.shared.clone(),
        }
    }

    fn ensure_worker(&mut self) {
        if self.clock != SimClock::Realtime || self.worker.is_some() {
            return;
        }
        self.shared.lock().shutdown = false;
        let shared = self.shared.clone();
        let spawned = thread::Builder::new()
            .name("SimPlayback".into())
            .spawn(move || playback_loop(&shared));
        match spawned {
            Ok(handle) => self.worker = Some(handle),
            Err(e) => tracing::error!("sim playback thread spawn failed: {e}"),
        }
    }

    fn join_worker(&mut self) {
        if let Some(handle) = self.worker.take() {
            self.shared.lock().shutdown = true;
            self.shared.cv.notify_all();
            let _ = handle.join();
        }
    }
}

/// Real-time consumption loop run on the simulated platform thread.
fn playback_loop(shared: &SimShared) {
    loop {
        let (buf, duration) = {
            let mut st = shared.lock();
            loop {
                if st.shutdown {
                    return;
                }
                if st.active && !st.queue.is_empty() {
                    break;
                }
                st = shared.cv.wait(st).unwrap_or_else(PoisonError::into_inner);
            }
            let Some(buf) = st.queue.pop_front() else {
                continue;
            };
            let duration = st
                .format
                .map(|f| f.duration_of(buf.len()))
                .unwrap_or_default();
            (buf, duration)
        };
        thread::sleep(duration);
        let mut st = shared.lock();
        if st.active {
            shared.render(&mut st, buf);
            if st.queue.is_empty() {
                shared.counters.record_underrun();
            }
        } else {
            shared.pool.release(buf);
        }
    }
}

impl HostEndpoint for SimEndpoint {
    fn configure(&mut self, format: AudioFormat) -> Result<()> {
        if self.rejected_rates.contains(&format.sample_rate) {
            return Err(DriverError::Configuration(format!(
                "simulated host rejects {format}"
            )));
        }
        let frame = format.bytes_per_frame().max(1);
        self.capacity = (self.config.buffer_bytes / frame).max(1) * frame;
        {
            let mut st = self.shared.lock();
            st.active = false;
            self.shared.reclaim(&mut st);
            st.format = Some(format);
            st.configures += 1;
        }
        self.shared
            .pool
            .reallocate(self.config.buffer_count, self.capacity);
        tracing::debug!(
            rate_hz = format.sample_rate,
            bits = format.bit_depth,
            channels = format.channels,
            buffers = self.config.buffer_count,
            bytes = self.capacity,
            "sim endpoint configured"
        );
        Ok(())
    }

    fn buffer_count(&self) -> usize {
        self.config.buffer_count
    }

    fn buffer_capacity(&self) -> usize {
        self.capacity
    }

    fn start(&mut self) -> Result<()> {
        self.ensure_worker();
        let mut st = self.shared.lock();
        if st.format.is_none() {
            return Err(DriverError::Configuration("start before configure".into()));
        }
        st.active = true;
        st.starts += 1;
        if self.clock == SimClock::Instant {
            while let Some(buf) = st.queue.pop_front() {
                self.shared.render(&mut st, buf);
            }
        }
        drop(st);
        self.shared.cv.notify_all();
        Ok(())
    }

    fn stop(&mut self) {
        let mut st = self.shared.lock();
        st.active = false;
        self.shared.reclaim(&mut st);
    }

    fn is_active(&self) -> bool {
        self.shared.lock().active
    }

    fn enqueue(&mut self, buf: HwBuffer) {
        let mut st = self.shared.lock();
        if st.capture {
            st.enqueued_lengths.push(buf.len());
        }
        if self.clock == SimClock::Instant && st.active {
            self.shared.render(&mut st, buf);
            return;
        }
        st.queue.push_back(buf);
        drop(st);
        self.shared.cv.notify_all();
    }

    fn flush(&mut self) {
        let mut st = self.shared.lock();
        self.shared.reclaim(&mut st);
    }

    fn teardown(&mut self) {
        self.stop();
        self.join_worker();
        self.shared.lock().format = None;
    }

    fn handles(&self) -> EndpointHandles {
        EndpointHandles {
            pool: self.shared.pool.clone(),
            volume: self.shared.volume.clone(),
            counters: self.shared.counters.clone(),
        }
    }
}

impl Drop for SimEndpoint {
    fn drop(&mut self) {
        self.join_worker();
    }
}

/// Test-side view of a [`SimEndpoint`]'s "hardware".
#[derive(Clone)]
pub struct SimHardware {
    shared: Arc<SimShared>,
}

impl SimHardware {
    /// Play up to `buffers` queued buffers (only while the stream is active).
    ///
    /// Returns the number consumed. Running dry before `buffers` counts one underrun.
    pub fn consume(&self, buffers: usize) -> usize {
        let mut st = self.shared.lock();
        let mut done = 0;
        while done < buffers && st.active {
            let Some(buf) = st.queue.pop_front() else {
                self.shared.counters.record_underrun();
                break;
            };
            self.shared.render(&mut st, buf);
            done += 1;
        }
        done
    }

    pub fn rendered(&self) -> Vec<u8> {
        self.shared.lock().rendered.clone()
    }

    /// Fill length of every buffer enqueued so far, in order. Empty without capture.
    pub fn enqueued_lengths(&self) -> Vec<usize> {
        self.shared.lock().enqueued_lengths.clone()
    }

    pub fn rendered_buffers(&self) -> usize {
        self.shared.lock().rendered_buffers
    }

    pub fn queued(&self) -> usize {
        self.shared.lock().queue.len()
    }

    pub fn is_active(&self) -> bool {
        self.shared.lock().active
    }

    pub fn starts(&self) -> usize {
        self.shared.lock().starts
    }

    pub fn configures(&self) -> usize {
        self.shared.lock().configures
    }

    pub fn format(&self) -> Option<AudioFormat> {
        self.shared.lock().format
    }

    pub fn pool(&self) -> Arc<BufferPool> {
        self.shared.pool.clone()
    }
}
