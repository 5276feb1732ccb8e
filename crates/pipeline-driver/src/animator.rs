//! Animator: pulls pipeline messages and feeds the host endpoint.
//!
//! One message is pulled, dispatched and released at a time. Audio messages are copied into
//! hardware buffers obtained from the endpoint; a full buffer is enqueued immediately and a
//! partially filled one is carried over to the next audio message. Once the configured number
//! of buffers has been primed the endpoint clock is started.
//!
//! The only backpressure is [`HostEndpoint::request_buffer`] blocking while every buffer is
//! owned by the hardware.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use crate::config::DriverConfig;
use crate::error::{DriverError, Result};
use crate::format::AudioFormat;
use crate::host::{HostEndpoint, HwBuffer};
use crate::jiffies::JIFFIES_PER_SECOND;
use crate::msg::{DecodedStreamInfo, Msg, MsgKind, Pipeline};
use crate::pcm::PcmTransfer;
use crate::status::{DriverEvent, DriverShared, DriverState, StatusSnapshot};

/// Whether the animator loop keeps pulling.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

#[derive(Clone, Copy)]
enum Audio<'a> {
    Pcm(&'a [u8]),
    Silence(usize),
}

pub struct Animator<P, E> {
    pipeline: P,
    endpoint: E,
    config: DriverConfig,
    shared: Arc<DriverShared>,
    pcm: PcmTransfer,
    format: Option<AudioFormat>,
    awaiting_stream: bool,
    pending: Option<HwBuffer>,
    priming: usize,
    track_second: Option<u64>,
    torn_down: bool,
}

impl<P: Pipeline, E: HostEndpoint> Animator<P, E> {
    pub fn new(config: DriverConfig, pipeline: P, endpoint: E) -> Self {
        Self::with_shared(config, pipeline, endpoint, DriverShared::new())
    }

    pub(crate) fn with_shared(
        config: DriverConfig,
        pipeline: P,
        endpoint: E,
        shared: Arc<DriverShared>,
    ) -> Self {
        Self {
            pipeline,
            endpoint,
            config,
            shared,
            pcm: PcmTransfer::new(),
            format: None,
            awaiting_stream: false,
            pending: None,
            priming: 0,
            track_second: None,
            torn_down: false,
        }
    }

    pub fn endpoint(&self) -> &E {
        &self.endpoint
    }

    pub fn set_volume(&mut self, level: f32) {
        self.endpoint.set_volume(level);
    }

    pub fn is_playing(&self) -> bool {
        self.shared.playing.load(Ordering::Acquire)
    }

    pub fn status(&self) -> StatusSnapshot {
        self.shared.snapshot(&self.endpoint.handles())
    }

    /// Pull and process messages until `Quit` or an external stop request.
    pub fn run(&mut self) -> Result<()> {
        loop {
            if self.shared.quit.load(Ordering::Acquire) {
                tracing::info!("animator stop requested");
                self.shutdown();
                return Ok(());
            }
            let msg = self.pipeline.pull();
            if self.process(msg)? == Flow::Quit {
                return Ok(());
            }
        }
    }

    /// Dispatch one message. The message is released when this returns.
    pub fn process(&mut self, msg: Msg) -> Result<Flow> {
        let kind = msg.kind();
        self.shared.update(|st| st.messages += 1);
        match msg {
            Msg::Mode { mode } => {
                tracing::debug!(mode = %mode, "mode");
                self.shared.update(|st| st.mode = Some(mode));
            }
            Msg::Session { id } => tracing::debug!(session = id, "session"),
            Msg::Track { id, uri } => {
                tracing::info!(track = id, uri = %uri, "track");
                self.shared.update(|st| st.track = Some(uri.clone()));
                self.shared.notify(DriverEvent::Track { uri });
            }
            Msg::Delay { jiffies } => {
                tracing::debug!(jiffies, "delay");
                self.shared.update(|st| st.delay_jiffies = Some(jiffies));
            }
            Msg::EncodedStream { .. } | Msg::AudioEncoded { .. } => {
                return Err(DriverError::violation(
                    kind,
                    "the driver only accepts decoded audio",
                ));
            }
            Msg::MetaText { text } => self.shared.notify(DriverEvent::MetaText(text)),
            Msg::Halt { id } => self.halt(id)?,
            Msg::Flush { id } => self.flush(id),
            Msg::Wait => tracing::debug!("wait"),
            Msg::DecodedStream(info) => self.begin_stream(&info)?,
            Msg::AudioPcm(chunk) | Msg::Playable(chunk) => {
                let flow = self.write_audio(kind, Audio::Pcm(&chunk.data))?;
                if flow == Flow::Continue {
                    self.report_time(chunk.track_offset);
                }
                return Ok(flow);
            }
            Msg::Silence { jiffies } => {
                let format = self.require_stream(kind)?;
                let bytes = format.bytes_for_jiffies(jiffies);
                return self.write_audio(kind, Audio::Silence(bytes));
            }
            Msg::Quit => {
                tracing::info!("quit");
                self.shutdown();
                return Ok(Flow::Quit);
            }
        }
        Ok(Flow::Continue)
    }

    fn require_stream(&self, kind: MsgKind) -> Result<AudioFormat> {
        match self.format {
            Some(_) if self.awaiting_stream => Err(DriverError::violation(
                kind,
                "awaiting a decoded stream after flush",
            )),
            Some(format) => Ok(format),
            None => Err(DriverError::violation(kind, "no decoded stream configured")),
        }
    }

    fn begin_stream(&mut self, info: &DecodedStreamInfo) -> Result<()> {
        let format = info.format()?;
        self.discard_pending();
        if self.endpoint.is_active() {
            self.endpoint.stop();
        }
        self.endpoint.configure(format)?;

        let available = self.endpoint.buffer_count();
        if available == 0 {
            return Err(DriverError::Configuration(
                "endpoint has no hardware buffers".into(),
            ));
        }
        self.priming = self.config.prime_buffers.clamp(1, available);
        self.format = Some(format);
        self.awaiting_stream = false;
        self.track_second = None;

        tracing::info!(
            stream = info.stream_id,
            rate_hz = format.sample_rate,
            bits = format.bit_depth,
            channels = format.channels,
            codec = %info.codec,
            prime = self.priming,
            "decoded stream"
        );
        self.shared.update(|st| {
            st.format = Some(format);
            st.streams += 1;
        });
        self.shared.notify(DriverEvent::StreamStarted(format));
        self.shared.set_state(DriverState::Buffering);
        Ok(())
    }

    fn write_audio(&mut self, kind: MsgKind, audio: Audio<'_>) -> Result<Flow> {
        self.require_stream(kind)?;
        if !self.is_playing() {
            let resumed = if self.priming > 0 {
                DriverState::Buffering
            } else {
                DriverState::Playing
            };
            self.shared.set_state(resumed);
        }

        let mut remaining = match audio {
            Audio::Pcm(data) => data.len(),
            Audio::Silence(bytes) => bytes,
        };
        while remaining > 0 {
            let mut buf = match self.pending.take() {
                Some(buf) => buf,
                None => match self.endpoint.request_buffer() {
                    Some(buf) => buf,
                    None => {
                        tracing::info!("buffer wait interrupted");
                        self.shutdown();
                        return Ok(Flow::Quit);
                    }
                },
            };
            let n = match audio {
                Audio::Pcm(data) => {
                    let offset = data.len() - remaining;
                    self.pcm.transfer(&data[offset..], &mut buf)
                }
                Audio::Silence(_) => self.pcm.fill_silence(remaining, &mut buf),
            };
            remaining -= n;
            if buf.is_full() {
                self.submit(buf)?;
            } else {
                self.pending = Some(buf);
            }
        }
        Ok(Flow::Continue)
    }

    fn report_time(&mut self, track_offset: u64) {
        let seconds = track_offset / JIFFIES_PER_SECOND as u64;
        if self.track_second != Some(seconds) {
            self.track_second = Some(seconds);
            self.shared.notify(DriverEvent::Time { seconds });
        }
    }

    /// Enqueue a filled buffer and start the clock once priming completes.
    fn submit(&mut self, buf: HwBuffer) -> Result<()> {
        let len = buf.len() as u64;
        self.endpoint.enqueue(buf);
        self.shared.update(|st| {
            st.buffers_enqueued += 1;
            st.bytes_written += len;
        });
        if self.priming > 0 {
            self.priming -= 1;
            if self.priming == 0 {
                self.start_playback()?;
            }
        }
        Ok(())
    }

    fn start_playback(&mut self) -> Result<()> {
        if !self.endpoint.is_active() {
            self.endpoint.start()?;
            tracing::info!(
                buffers = self.endpoint.buffer_count(),
                bytes = self.endpoint.buffer_capacity(),
                "playback started"
            );
        }
        self.shared.set_state(DriverState::Playing);
        Ok(())
    }

    fn halt(&mut self, id: u32) -> Result<()> {
        tracing::debug!(halt = id, "halt");
        if let Some(buf) = self.pending.take() {
            if buf.is_empty() {
                self.endpoint.handles().pool.release(buf);
            } else {
                self.submit(buf)?;
            }
        }
        // Short streams may end before priming completes; start so the tail is heard.
        if self.format.is_some() && !self.awaiting_stream && self.priming > 0 {
            self.priming = 0;
            self.start_playback()?;
        }
        self.shared.update(|st| st.halts += 1);
        self.shared.set_state(DriverState::Halted);
        Ok(())
    }

    fn flush(&mut self, id: u32) {
        tracing::debug!(flush = id, "flush");
        self.discard_pending();
        self.endpoint.flush();
        self.awaiting_stream = true;
        self.priming = 0;
        self.shared.update(|st| st.flushes += 1);
        self.shared.notify(DriverEvent::Flushed);
        self.shared.set_state(DriverState::Stopped);
    }

    fn discard_pending(&mut self) {
        if let Some(buf) = self.pending.take() {
            self.endpoint.handles().pool.release(buf);
        }
    }

    /// Stop and tear down the endpoint, returning every buffer. Idempotent.
    pub fn shutdown(&mut self) {
        self.shared.quit.store(true, Ordering::Release);
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        self.discard_pending();
        self.endpoint.stop();
        self.endpoint.teardown();
        self.format = None;
        tracing::debug!(bytes = self.pcm.bytes_written(), "endpoint torn down");
        self.shared.set_state(DriverState::Stopped);
        self.shared.notify(DriverEvent::Quit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FatalAction;
    use crate::host::EndpointConfig;
    use crate::host::sim::{SimClock, SimEndpoint, SimHardware};
    use crate::jiffies;
    use crate::msg::{PcmChunk, ScriptedPipeline};

    fn stream(sample_rate: u32, bit_depth: u16, channels: u16) -> Msg {
        Msg::DecodedStream(DecodedStreamInfo {
            stream_id: 1,
            sample_rate,
            bit_depth,
            channels,
            codec: "PCM".into(),
            sample_start: 0,
            lossless: true,
        })
    }

    fn playable(data: Vec<u8>) -> Msg {
        Msg::Playable(PcmChunk::new(data))
    }

    fn ramp(len: usize, seed: u8) -> Vec<u8> {
        (0..len).map(|i| (i as u8).wrapping_mul(7).wrapping_add(seed)).collect()
    }

    fn animator(
        clock: SimClock,
        endpoint: EndpointConfig,
        config: DriverConfig,
    ) -> (Animator<ScriptedPipeline, SimEndpoint>, SimHardware) {
        let ep = SimEndpoint::new(endpoint, clock);
        let hw = ep.hardware();
        let config = DriverConfig {
            fatal: FatalAction::Panic,
            ..config
        };
        (Animator::new(config, ScriptedPipeline::new([]), ep), hw)
    }

    fn cd_animator(clock: SimClock) -> (Animator<ScriptedPipeline, SimEndpoint>, SimHardware) {
        animator(clock, EndpointConfig::default(), DriverConfig::default())
    }

    #[test]
    fn ten_2k_playables_fill_exactly_five_buffers() {
        let (mut a, hw) = cd_animator(SimClock::Instant);
        a.process(stream(44_100, 16, 2)).unwrap();
        let mut expected = Vec::new();
        for i in 0..10 {
            let chunk = ramp(2048, i);
            expected.extend_from_slice(&chunk);
            assert_eq!(a.process(playable(chunk)).unwrap(), Flow::Continue);
        }
        assert_eq!(hw.enqueued_lengths(), vec![4096; 5]);
        assert_eq!(hw.starts(), 1);
        assert_eq!(hw.rendered(), expected);
        let status = a.status();
        assert_eq!(status.buffers_enqueued, 5);
        assert_eq!(status.bytes_written, 20_480);
    }

    #[test]
    fn bytes_are_conserved_across_buffer_boundaries() {
        let (mut a, hw) = cd_animator(SimClock::Instant);
        a.process(stream(44_100, 16, 2)).unwrap();
        let mut expected = Vec::new();
        for (i, len) in [100usize, 4096, 5000, 3, 8199, 1].into_iter().enumerate() {
            let chunk = ramp(len, i as u8);
            expected.extend_from_slice(&chunk);
            a.process(Msg::AudioPcm(PcmChunk::new(chunk))).unwrap();
        }
        a.process(Msg::Silence {
            jiffies: jiffies::from_ms(10),
        })
        .unwrap();
        expected.extend(std::iter::repeat_n(0u8, 1764));
        a.process(Msg::Halt { id: 1 }).unwrap();

        let total: usize = hw.enqueued_lengths().iter().sum();
        assert_eq!(total, expected.len());
        assert_eq!(hw.rendered(), expected);
        let lengths = hw.enqueued_lengths();
        let (last, full) = lengths.split_last().unwrap();
        assert!(full.iter().all(|&l| l == 4096));
        assert_eq!(*last, expected.len() % 4096);
    }

    #[test]
    fn audio_before_stream_is_contract_violation() {
        let (mut a, hw) = cd_animator(SimClock::Instant);
        for msg in [
            playable(vec![0; 4]),
            Msg::AudioPcm(PcmChunk::new(vec![0; 4])),
            Msg::Silence { jiffies: 1280 },
        ] {
            let kind = msg.kind();
            match a.process(msg) {
                Err(DriverError::ContractViolation { kind: k, .. }) => assert_eq!(k, kind),
                other => panic!("expected contract violation, got {other:?}"),
            }
        }
        assert!(hw.enqueued_lengths().is_empty());
    }

    #[test]
    fn encoded_audio_is_contract_violation() {
        let (mut a, _hw) = cd_animator(SimClock::Instant);
        a.process(stream(44_100, 16, 2)).unwrap();
        let err = a
            .process(Msg::AudioEncoded { bytes: vec![1, 2] })
            .unwrap_err();
        assert!(err.is_fatal());
        let err = a
            .process(Msg::EncodedStream {
                uri: "http://x/a.flac".into(),
                total_bytes: 10,
            })
            .unwrap_err();
        assert!(matches!(err, DriverError::ContractViolation { .. }));
    }

    #[test]
    fn informational_messages_have_no_audio_effect() {
        let (mut a, hw) = cd_animator(SimClock::Instant);
        for msg in [
            Msg::Mode {
                mode: "Playlist".into(),
            },
            Msg::Session { id: 1 },
            Msg::Track {
                id: 3,
                uri: "file:///a.flac".into(),
            },
            Msg::MetaText { text: "hi".into() },
            Msg::Wait,
            Msg::Delay { jiffies: 42 },
        ] {
            assert_eq!(a.process(msg).unwrap(), Flow::Continue);
        }
        assert_eq!(hw.configures(), 0);
        let status = a.status();
        assert_eq!(status.mode.as_deref(), Some("Playlist"));
        assert_eq!(status.track.as_deref(), Some("file:///a.flac"));
        assert_eq!(status.delay_jiffies, Some(42));
        assert_eq!(status.messages, 6);
    }

    #[test]
    fn priming_fills_n_buffers_before_start() {
        let (mut a, hw) = cd_animator(SimClock::Manual);
        a.process(stream(44_100, 16, 2)).unwrap();
        a.process(playable(vec![1; 8192])).unwrap();
        assert!(!hw.is_active());
        assert_eq!(a.status().state, DriverState::Buffering);
        a.process(playable(vec![1; 4096])).unwrap();
        assert!(hw.is_active());
        assert_eq!(hw.starts(), 1);
        assert_eq!(hw.queued(), 3);
        assert_eq!(a.status().state, DriverState::Playing);
    }

    #[test]
    fn priming_is_limited_to_available_buffers() {
        let endpoint = EndpointConfig {
            buffer_count: 2,
            buffer_bytes: 4096,
        };
        let config = DriverConfig {
            prime_buffers: 5,
            ..DriverConfig::default()
        };
        let (mut a, hw) = animator(SimClock::Manual, endpoint, config);
        a.process(stream(44_100, 16, 2)).unwrap();
        // Would deadlock in request_buffer if priming waited for a third buffer.
        a.process(playable(vec![1; 8192])).unwrap();
        assert!(hw.is_active());
        assert_eq!(hw.queued(), 2);
    }

    #[test]
    fn halt_enqueues_partial_buffer_and_starts_short_streams() {
        let (mut a, hw) = cd_animator(SimClock::Manual);
        a.process(stream(44_100, 16, 2)).unwrap();
        a.process(playable(vec![9; 1000])).unwrap();
        assert!(hw.enqueued_lengths().is_empty());
        a.process(Msg::Halt { id: 7 }).unwrap();
        assert_eq!(hw.enqueued_lengths(), vec![1000]);
        assert!(hw.is_active());
        assert!(!a.is_playing());
        assert_eq!(a.status().state, DriverState::Halted);
        assert_eq!(hw.consume(1), 1);
        assert_eq!(hw.rendered(), vec![9; 1000]);

        // Audio after a halt resumes the same stream.
        a.process(playable(vec![1; 4096])).unwrap();
        assert!(a.is_playing());
        assert_eq!(hw.configures(), 1);
    }

    #[test]
    fn flush_discards_pending_and_requires_new_stream() {
        let (mut a, hw) = cd_animator(SimClock::Manual);
        a.process(stream(44_100, 16, 2)).unwrap();
        a.process(playable(vec![1; 4096 + 10])).unwrap();
        assert_eq!(hw.queued(), 1);
        a.process(Msg::Flush { id: 2 }).unwrap();
        assert_eq!(hw.queued(), 0);
        assert_eq!(hw.pool().free_count(), 3);
        assert!(a.process(playable(vec![0; 4])).is_err());

        a.process(stream(44_100, 16, 2)).unwrap();
        a.process(playable(vec![0; 4])).unwrap();
        assert_eq!(a.status().flushes, 1);
    }

    #[test]
    fn new_stream_is_reconfigured_after_stopping_active_endpoint() {
        let (mut a, hw) = cd_animator(SimClock::Instant);
        a.process(stream(44_100, 16, 2)).unwrap();
        a.process(playable(vec![0; 3 * 4096])).unwrap();
        assert!(hw.is_active());
        a.process(stream(48_000, 24, 2)).unwrap();
        assert!(!hw.is_active());
        assert_eq!(hw.configures(), 2);
        assert_eq!(hw.format(), AudioFormat::new(48_000, 24, 2).ok());
        assert_eq!(a.endpoint().buffer_capacity(), 4092);
        assert_eq!(a.status().streams, 2);
    }

    #[test]
    fn rejected_format_is_configuration_error() {
        let ep = SimEndpoint::new(EndpointConfig::default(), SimClock::Manual)
            .with_rejected_rates(&[96_000]);
        let mut a = Animator::new(DriverConfig::default(), ScriptedPipeline::new([]), ep);
        let err = a.process(stream(96_000, 24, 2)).unwrap_err();
        assert!(matches!(err, DriverError::Configuration(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn endpoint_without_buffers_is_configuration_error() {
        let endpoint = EndpointConfig {
            buffer_count: 0,
            buffer_bytes: 4096,
        };
        let (mut a, hw) = animator(SimClock::Instant, endpoint, DriverConfig::default());
        let err = a.process(stream(44_100, 16, 2)).unwrap_err();
        assert!(matches!(err, DriverError::Configuration(_)));
        // Audio now fails fast instead of waiting for a buffer that cannot exist.
        assert!(matches!(
            a.process(playable(vec![0; 16])),
            Err(DriverError::ContractViolation { .. })
        ));
        assert_eq!(hw.starts(), 0);
    }

    #[test]
    fn track_time_is_reported_once_per_second() {
        let shared = DriverShared::new();
        let (tx, rx) = crossbeam_channel::unbounded();
        *shared.observer.lock().unwrap() = Some(tx);
        let ep = SimEndpoint::new(EndpointConfig::default(), SimClock::Instant);
        let mut a = Animator::with_shared(
            DriverConfig::default(),
            ScriptedPipeline::new([]),
            ep,
            shared,
        );
        a.process(stream(44_100, 16, 2)).unwrap();
        let second = jiffies::JIFFIES_PER_SECOND as u64;
        for offset in [0, second / 2, second, second + 1, 3 * second] {
            let chunk = PcmChunk {
                data: vec![0; 64],
                track_offset: offset,
            };
            a.process(Msg::Playable(chunk)).unwrap();
        }
        // A new stream restarts the count.
        a.process(stream(44_100, 16, 2)).unwrap();
        a.process(playable(vec![0; 64])).unwrap();

        let times: Vec<u64> = rx
            .try_iter()
            .filter_map(|e| match e {
                DriverEvent::Time { seconds } => Some(seconds),
                _ => None,
            })
            .collect();
        assert_eq!(times, vec![0, 1, 3, 0]);
    }

    #[test]
    fn volume_zero_silences_and_unity_passes_through() {
        let (mut a, hw) = cd_animator(SimClock::Instant);
        a.process(stream(44_100, 16, 2)).unwrap();
        a.set_volume(0.0);
        a.process(playable(vec![0x55; 3 * 4096])).unwrap();
        assert!(hw.rendered().iter().all(|&b| b == 0));

        a.set_volume(4.0);
        assert_eq!(a.status().volume, 1.0);
        a.process(playable(vec![0x55; 4096])).unwrap();
        assert_eq!(&hw.rendered()[3 * 4096..], &[0x55; 4096][..]);
    }

    #[test]
    fn quit_tears_down_without_leaking_buffers() {
        let (mut a, hw) = cd_animator(SimClock::Manual);
        a.process(stream(44_100, 16, 2)).unwrap();
        a.process(playable(vec![0; 2 * 4096 + 100])).unwrap();
        assert_eq!(a.process(Msg::Quit).unwrap(), Flow::Quit);
        assert!(!hw.is_active());
        assert_eq!(hw.format(), None);
        assert_eq!(hw.pool().free_count(), hw.pool().total());
        assert_eq!(a.status().state, DriverState::Stopped);
    }

    #[test]
    fn run_stops_at_quit() {
        let ep = SimEndpoint::new(EndpointConfig::default(), SimClock::Instant);
        let hw = ep.hardware();
        let script = ScriptedPipeline::new([
            stream(48_000, 16, 2),
            playable(vec![3; 4096 * 4]),
            Msg::Quit,
            playable(vec![4; 4096]),
        ]);
        let mut a = Animator::new(DriverConfig::default(), script, ep);
        a.run().unwrap();
        assert_eq!(hw.rendered(), vec![3; 4096 * 4]);
        assert_eq!(a.pipeline.remaining(), 1);
    }
}
