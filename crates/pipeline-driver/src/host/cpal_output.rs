//! CPAL-backed host endpoint.
//!
//! The CPAL output callback plays enqueued [`HwBuffer`]s in FIFO order:
//! - decodes big-endian PCM sample by sample straight out of the buffer
//! - applies the shared linear volume
//! - converts to the device sample format
//! - returns each exhausted buffer to the pool, waking the animator
//!
//! When nothing is queued the callback outputs silence and counts an underrun. The callback
//! never touches pipeline state.
//!
//! `cpal::Stream` is not `Send` on every platform, so a `CpalEndpoint` must be built on the
//! thread that drives it (the driver constructs endpoints on its animator thread).

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use cpal::traits::{DeviceTrait, StreamTrait};

use super::{
    BufferPool, EndpointConfig, EndpointHandles, HostEndpoint, HwBuffer, PlaybackCounters, Volume,
};
use crate::device;
use crate::error::{DriverError, Result};
use crate::format::AudioFormat;
use crate::volume::decode_be_sample_f32;

struct RenderState {
    queue: VecDeque<HwBuffer>,
    current: Option<HwBuffer>,
    pos: usize,
    bytes_per_sample: usize,
}

struct CpalShared {
    render: Mutex<RenderState>,
    pool: Arc<BufferPool>,
    volume: Volume,
    counters: PlaybackCounters,
}

impl CpalShared {
    fn lock(&self) -> MutexGuard<'_, RenderState> {
        self.render.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hand every buffer held by the render side back to the pool.
    fn reclaim(&self) {
        let mut st = self.lock();
        if let Some(buf) = st.current.take() {
            self.pool.release(buf);
        }
        while let Some(buf) = st.queue.pop_front() {
            self.pool.release(buf);
        }
        st.pos = 0;
    }
}

pub struct CpalEndpoint {
    device: cpal::Device,
    config: EndpointConfig,
    shared: Arc<CpalShared>,
    stream: Option<cpal::Stream>,
    format: Option<AudioFormat>,
    capacity: usize,
    active: bool,
}

impl CpalEndpoint {
    pub fn new(device: cpal::Device, config: EndpointConfig) -> Self {
        let shared = Arc::new(CpalShared {
            render: Mutex::new(RenderState {
                queue: VecDeque::new(),
                current: None,
                pos: 0,
                bytes_per_sample: 2,
            }),
            pool: Arc::new(BufferPool::new(config.buffer_count, config.buffer_bytes)),
            volume: Volume::default(),
            counters: PlaybackCounters::default(),
        });
        let capacity = config.buffer_bytes;
        Self {
            device,
            config,
            shared,
            stream: None,
            format: None,
            capacity,
            active: false,
        }
    }

    /// Open the default output device, or the first whose name contains `needle`.
    pub fn open(needle: Option<&str>, config: EndpointConfig) -> Result<Self> {
        let host = cpal::default_host();
        let device = device::pick_device(&host, needle)?;
        tracing::info!(device = %device::device_name(&device), "output device");
        Ok(Self::new(device, config))
    }

    fn drop_stream(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.pause();
        }
        self.active = false;
        self.shared.reclaim();
    }
}

impl HostEndpoint for CpalEndpoint {
    fn configure(&mut self, format: AudioFormat) -> Result<()> {
        self.drop_stream();

        let supported = device::pick_stream_config(&self.device, format)?;
        let stream_config = supported.config();
        let stream = build_output_stream(
            &self.device,
            &stream_config,
            supported.sample_format(),
            &self.shared,
        )?;
        // Some backends start rendering as soon as the stream exists.
        let _ = stream.pause();

        let frame = format.bytes_per_frame().max(1);
        self.capacity = (self.config.buffer_bytes / frame).max(1) * frame;
        self.shared.lock().bytes_per_sample = format.bytes_per_sample();
        self.shared
            .pool
            .reallocate(self.config.buffer_count, self.capacity);
        self.stream = Some(stream);
        self.format = Some(format);

        tracing::info!(
            rate_hz = format.sample_rate,
            bits = format.bit_depth,
            channels = format.channels,
            sample_format = ?supported.sample_format(),
            buffers = self.config.buffer_count,
            bytes = self.capacity,
            "output stream configured"
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
        let stream = self
            .stream
            .as_ref()
            .ok_or_else(|| DriverError::Configuration("start before configure".into()))?;
        stream
            .play()
            .map_err(|e| DriverError::Configuration(format!("start stream: {e}")))?;
        self.active = true;
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(stream) = self.stream.as_ref() {
            if let Err(e) = stream.pause() {
                tracing::warn!("pause stream: {e}");
            }
        }
        self.active = false;
        self.shared.reclaim();
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn enqueue(&mut self, buf: HwBuffer) {
        self.shared.lock().queue.push_back(buf);
    }

    fn flush(&mut self) {
        self.shared.reclaim();
    }

    fn teardown(&mut self) {
        self.drop_stream();
        self.format = None;
    }

    fn handles(&self) -> EndpointHandles {
        EndpointHandles {
            pool: self.shared.pool.clone(),
            volume: self.shared.volume.clone(),
            counters: self.shared.counters.clone(),
        }
    }
}

fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    shared: &Arc<CpalShared>,
) -> Result<cpal::Stream> {
    match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(device, config, shared),
        cpal::SampleFormat::I16 => build_stream::<i16>(device, config, shared),
        cpal::SampleFormat::I32 => build_stream::<i32>(device, config, shared),
        cpal::SampleFormat::U16 => build_stream::<u16>(device, config, shared),
        other => Err(DriverError::Configuration(format!(
            "unsupported device sample format: {other:?}"
        ))),
    }
}

/// Type-specialized stream builder for CPAL sample formats.
fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    shared: &Arc<CpalShared>,
) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32>,
{
    let shared_cb = shared.clone();
    let err_fn = |err| tracing::warn!("stream error: {err}");

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _| {
                let gain = shared_cb.volume.get();
                let mut st = shared_cb.lock();
                let mut played = 0u64;
                let mut idx = 0;
                while idx < data.len() {
                    let Some(v) = next_sample(&mut st, &shared_cb.pool) else {
                        // Nothing queued; fill the rest with silence.
                        shared_cb.counters.record_underrun();
                        data[idx..].fill(<T as cpal::Sample>::from_sample::<f32>(0.0));
                        break;
                    };
                    data[idx] = <T as cpal::Sample>::from_sample::<f32>(v * gain);
                    played += st.bytes_per_sample as u64;
                    idx += 1;
                }
                shared_cb.counters.add_played(played);
            },
            err_fn,
            None,
        )
        .map_err(|e| DriverError::Configuration(format!("build output stream: {e}")))
}

/// Pull the next sample, releasing exhausted buffers to the pool as it goes.
fn next_sample(st: &mut RenderState, pool: &BufferPool) -> Option<f32> {
    let width = st.bytes_per_sample.max(1);
    loop {
        if let Some(buf) = st.current.as_ref() {
            if st.pos + width <= buf.len() {
                let v = decode_be_sample_f32(&buf.filled()[st.pos..st.pos + width]);
                st.pos += width;
                return Some(v);
            }
        }
        if let Some(done) = st.current.take() {
            pool.release(done);
        }
        st.pos = 0;
        st.current = Some(st.queue.pop_front()?);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with(pool: &BufferPool, payloads: &[&[u8]]) -> RenderState {
        let mut queue = VecDeque::new();
        for p in payloads {
            let mut buf = pool.acquire().unwrap();
            buf.spare_mut()[..p.len()].copy_from_slice(p);
            buf.commit(p.len());
            queue.push_back(buf);
        }
        RenderState {
            queue,
            current: None,
            pos: 0,
            bytes_per_sample: 2,
        }
    }

    #[test]
    fn next_sample_walks_buffers_in_order_and_releases_them() {
        let pool = BufferPool::new(2, 4);
        let mut st = state_with(&pool, &[&[0x40, 0x00, 0xC0, 0x00], &[0x20, 0x00]]);
        assert_eq!(pool.free_count(), 0);

        assert_eq!(next_sample(&mut st, &pool), Some(0.5));
        assert_eq!(next_sample(&mut st, &pool), Some(-0.5));
        assert_eq!(next_sample(&mut st, &pool), Some(0.25));
        assert_eq!(pool.free_count(), 1);
        assert_eq!(next_sample(&mut st, &pool), None);
        assert_eq!(pool.free_count(), 2);
    }

    #[test]
    fn next_sample_on_empty_queue_is_underrun() {
        let pool = BufferPool::new(1, 4);
        let mut st = state_with(&pool, &[]);
        assert_eq!(next_sample(&mut st, &pool), None);
    }
}
