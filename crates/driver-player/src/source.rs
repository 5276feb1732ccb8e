//! File-backed pipeline for the demo player.
//!
//! A producer thread decodes each file in turn and emits the decoded-audio message
//! sequence the driver expects:
//! `Mode`, `Session` (once), then per file `Track`, `Delay`, `DecodedStream`,
//! `AudioPcm`... and `Halt`. `Quit` follows the last file or a stop request.
//!
//! Messages travel over a bounded channel, so the producer runs at most
//! `starvation_ms` of audio ahead of the driver.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, Sender};
use pipeline_driver::jiffies::JIFFIES_PER_SECOND;
use pipeline_driver::{
    AudioFormat, DecodedStreamInfo, DriverDelay, Msg, PcmChunk, Pipeline, PipelineAnimator,
};

use crate::decode::TrackDecoder;
use crate::resample::StreamResampler;

/// Nominal rate used to turn the starvation budget into a message count.
const NOMINAL_RATE: u32 = 48_000;
/// Slots reserved for control messages between PCM chunks.
const CONTROL_SLOTS: usize = 4;

#[derive(Clone, Debug)]
pub struct PipelineOptions {
    pub bit_depth: u16,
    pub output_rate: Option<u32>,
    pub chunk_frames: usize,
    pub starvation_ms: u32,
    pub delay: DriverDelay,
}

pub struct FilePipeline {
    rx: Receiver<Msg>,
    stop: Arc<AtomicBool>,
}

impl FilePipeline {
    /// Start the producer thread. Setting `stop` ends the current file early and emits `Quit`.
    pub fn spawn(paths: Vec<PathBuf>, opts: PipelineOptions, stop: Arc<AtomicBool>) -> Result<Self> {
        let cap = queue_capacity(opts.starvation_ms, opts.chunk_frames);
        let (tx, rx) = crossbeam_channel::bounded(cap);
        tracing::debug!(capacity = cap, "pipeline queue");
        let thread_stop = stop.clone();
        thread::Builder::new()
            .name("FilePipeline".into())
            .spawn(move || produce(paths, &opts, &tx, &thread_stop))
            .context("spawn pipeline thread")?;
        Ok(Self { rx, stop })
    }
}

impl Pipeline for FilePipeline {
    fn pull(&mut self) -> Msg {
        self.rx.recv().unwrap_or(Msg::Quit)
    }
}

impl Drop for FilePipeline {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
    }
}

/// Channel capacity covering `starvation_ms` of PCM messages plus control traffic.
pub fn queue_capacity(starvation_ms: u32, chunk_frames: usize) -> usize {
    let frames = starvation_ms as usize * NOMINAL_RATE as usize / 1000;
    frames.div_ceil(chunk_frames.max(1)).max(1) + CONTROL_SLOTS
}

/// Receiver gone or stop requested.
struct Stopped;

fn produce(paths: Vec<PathBuf>, opts: &PipelineOptions, tx: &Sender<Msg>, stop: &AtomicBool) {
    let mut emit = |msg: Msg| -> std::result::Result<(), Stopped> {
        if stop.load(Ordering::Acquire) {
            return Err(Stopped);
        }
        tx.send(msg).map_err(|_| Stopped)
    };

    let mut run = || -> std::result::Result<(), Stopped> {
        emit(Msg::Mode {
            mode: "Playlist".into(),
        })?;
        emit(Msg::Session { id: 1 })?;
        for (idx, path) in paths.iter().enumerate() {
            let id = idx as u32 + 1;
            match play_file(id, path, opts, &mut emit) {
                Ok(result) => result?,
                Err(e) => tracing::warn!(path = ?path, "skipping track: {e:#}"),
            }
        }
        Ok(())
    };

    if run().is_err() {
        tracing::info!("pipeline stopped early");
    }
    let _ = tx.send(Msg::Quit);
}

/// Emit one file. The outer error is a decode failure; the inner one a stop.
fn play_file(
    id: u32,
    path: &Path,
    opts: &PipelineOptions,
    emit: &mut impl FnMut(Msg) -> std::result::Result<(), Stopped>,
) -> Result<std::result::Result<(), Stopped>> {
    let mut decoder = TrackDecoder::open(path)?;
    let info = decoder.info().clone();
    let out_rate = opts.output_rate.unwrap_or(info.rate);
    let channels = u16::try_from(info.channels).context("channel count")?;
    let format = AudioFormat::new(out_rate, opts.bit_depth, channels)?;
    let mut resampler = if out_rate != info.rate {
        Some(StreamResampler::new(
            info.rate,
            out_rate,
            info.channels,
            opts.chunk_frames,
        )?)
    } else {
        None
    };
    tracing::info!(
        path = ?path,
        codec = %info.codec,
        rate_hz = info.rate,
        channels = info.channels,
        bits = ?info.bit_depth,
        duration_ms = ?info.duration_ms,
        "source"
    );

    let mut stream = ChunkWriter::new(format, opts.chunk_frames);
    let outcome = (|| -> std::result::Result<Result<()>, Stopped> {
        emit(Msg::Track {
            id,
            uri: file_uri(path),
        })?;
        emit(Msg::Delay {
            jiffies: opts.delay.pipeline_driver_delay_jiffies(info.rate, out_rate),
        })?;
        emit(Msg::DecodedStream(DecodedStreamInfo {
            stream_id: id,
            sample_rate: out_rate,
            bit_depth: opts.bit_depth,
            channels,
            codec: info.codec.clone(),
            sample_start: 0,
            lossless: info.lossless && resampler.is_none(),
        }))?;

        loop {
            let samples = match decoder.next_samples() {
                Ok(Some(s)) => s,
                Ok(None) => break,
                Err(e) => return Ok(Err(e)),
            };
            let samples = match resampler.as_mut().map(|r| r.process(&samples)) {
                Some(Ok(out)) => out,
                Some(Err(e)) => return Ok(Err(e)),
                None => samples,
            };
            for chunk in stream.push(&samples) {
                emit(Msg::AudioPcm(chunk))?;
            }
        }
        if let Some(r) = resampler.as_mut() {
            match r.flush() {
                Ok(tail) => {
                    for chunk in stream.push(&tail) {
                        emit(Msg::AudioPcm(chunk))?;
                    }
                }
                Err(e) => tracing::warn!("resampler flush: {e:#}"),
            }
        }
        if let Some(chunk) = stream.finish() {
            emit(Msg::AudioPcm(chunk))?;
        }
        emit(Msg::Halt { id })?;
        Ok(Ok(()))
    })();

    match outcome {
        Ok(Ok(())) => Ok(Ok(())),
        Ok(Err(e)) => {
            // The stream already started: close it so the driver drains what it has.
            let _ = emit(Msg::Halt { id });
            Err(e)
        }
        Err(Stopped) => Ok(Err(Stopped)),
    }
}

fn file_uri(path: &Path) -> String {
    let abs = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    format!("file://{}", abs.display())
}

/// Packs interleaved `f32` into fixed-size big-endian PCM chunks.
struct ChunkWriter {
    format: AudioFormat,
    chunk_bytes: usize,
    buf: Vec<u8>,
    frames_emitted: u64,
}

impl ChunkWriter {
    fn new(format: AudioFormat, chunk_frames: usize) -> Self {
        let chunk_bytes = chunk_frames.max(1) * format.bytes_per_frame();
        Self {
            format,
            chunk_bytes,
            buf: Vec::with_capacity(chunk_bytes),
            frames_emitted: 0,
        }
    }

    fn push(&mut self, samples: &[f32]) -> Vec<PcmChunk> {
        self.buf
            .extend_from_slice(&encode_be(samples, self.format.bit_depth));
        let mut out = Vec::new();
        while self.buf.len() >= self.chunk_bytes {
            let rest = self.buf.split_off(self.chunk_bytes);
            let data = std::mem::replace(&mut self.buf, rest);
            out.push(self.chunk(data));
        }
        out
    }

    fn finish(&mut self) -> Option<PcmChunk> {
        let whole = self.buf.len() / self.format.bytes_per_frame() * self.format.bytes_per_frame();
        self.buf.truncate(whole);
        if self.buf.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.buf);
        Some(self.chunk(data))
    }

    fn chunk(&mut self, data: Vec<u8>) -> PcmChunk {
        let offset = self.frames_emitted * JIFFIES_PER_SECOND as u64 / self.format.sample_rate as u64;
        self.frames_emitted += (data.len() / self.format.bytes_per_frame()) as u64;
        PcmChunk {
            data,
            track_offset: offset,
        }
    }
}

/// Convert `f32` samples in `[-1.0, 1.0]` to big-endian signed PCM.
pub fn encode_be(samples: &[f32], bit_depth: u16) -> Vec<u8> {
    let bytes = (bit_depth / 8) as usize;
    let mut out = Vec::with_capacity(samples.len() * bytes);
    for &s in samples {
        let s = f64::from(if s.is_nan() { 0.0 } else { s.clamp(-1.0, 1.0) });
        match bit_depth {
            8 => out.push((s * i8::MAX as f64) as i8 as u8),
            16 => out.extend_from_slice(&((s * i16::MAX as f64) as i16).to_be_bytes()),
            24 => out.extend_from_slice(&((s * 8_388_607.0) as i32).to_be_bytes()[1..]),
            _ => out.extend_from_slice(&((s * i32::MAX as f64) as i32).to_be_bytes()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_big_endian_at_each_depth() {
        assert_eq!(
            encode_be(&[1.0, -1.0, 0.0], 16),
            vec![0x7f, 0xff, 0x80, 0x01, 0x00, 0x00]
        );
        assert_eq!(encode_be(&[1.0], 24), vec![0x7f, 0xff, 0xff]);
        assert_eq!(encode_be(&[-1.0], 24), vec![0x80, 0x00, 0x01]);
        assert_eq!(encode_be(&[1.0], 32), vec![0x7f, 0xff, 0xff, 0xff]);
        assert_eq!(encode_be(&[2.0, f32::NAN], 8), vec![0x7f, 0x00]);
    }

    #[test]
    fn chunk_writer_emits_fixed_chunks_with_offsets() {
        let format = AudioFormat::new(48_000, 16, 2).unwrap();
        let mut w = ChunkWriter::new(format, 480);
        // 1000 stereo frames: two full 480-frame chunks, 40 frames left over.
        let chunks = w.push(&vec![0.25; 2000]);
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| c.len() == 480 * 4));
        assert_eq!(chunks[0].track_offset, 0);
        assert_eq!(chunks[1].track_offset, 480 * (JIFFIES_PER_SECOND as u64 / 48_000));

        let tail = w.finish().unwrap();
        assert_eq!(tail.len(), 40 * 4);
        assert_eq!(tail.track_offset, 960 * (JIFFIES_PER_SECOND as u64 / 48_000));
        assert!(w.finish().is_none());
    }

    #[test]
    fn queue_covers_starvation_budget() {
        // 100 ms at 48 kHz is 4800 frames, five 1024-frame messages.
        assert_eq!(queue_capacity(100, 1024), 5 + CONTROL_SLOTS);
        assert_eq!(queue_capacity(0, 1024), 1 + CONTROL_SLOTS);
    }

    #[test]
    fn missing_files_are_skipped_and_quit_follows() {
        let opts = PipelineOptions {
            bit_depth: 16,
            output_rate: None,
            chunk_frames: 1024,
            starvation_ms: 100,
            delay: DriverDelay::new(3072),
        };
        let stop = Arc::new(AtomicBool::new(false));
        let mut p = FilePipeline::spawn(
            vec![PathBuf::from("/nonexistent/one.flac")],
            opts,
            stop,
        )
        .unwrap();
        assert!(matches!(p.pull(), Msg::Mode { .. }));
        assert!(matches!(p.pull(), Msg::Session { id: 1 }));
        assert!(matches!(p.pull(), Msg::Quit));
        assert!(matches!(p.pull(), Msg::Quit));
    }
}
