//! Streaming resample stage.
//!
//! Uses Rubato to convert decoded interleaved `f32` audio from the source rate to the
//! requested output rate, one fixed-size input chunk at a time. Runs inline on the
//! pipeline thread.

use anyhow::{Result, anyhow};
use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{
    Async, FixedAsync, Indexing, Resampler, SincInterpolationParameters, SincInterpolationType,
    WindowFunction, calculate_cutoff,
};

pub struct StreamResampler {
    resampler: Async<f32>,
    channels: usize,
    chunk_frames: usize,
    pending: Vec<f32>,
    out: Vec<f32>,
    indexing: Indexing,
}

impl StreamResampler {
    pub fn new(src_rate: u32, dst_rate: u32, channels: usize, chunk_frames: usize) -> Result<Self> {
        if src_rate == 0 || dst_rate == 0 || channels == 0 {
            return Err(anyhow!(
                "invalid resampler setup: {src_rate} Hz -> {dst_rate} Hz, {channels} ch"
            ));
        }
        let f_ratio = dst_rate as f64 / src_rate as f64;

        let sinc_len = 128;
        let window = WindowFunction::BlackmanHarris2;
        let params = SincInterpolationParameters {
            sinc_len,
            f_cutoff: calculate_cutoff(sinc_len, window),
            interpolation: SincInterpolationType::Cubic,
            oversampling_factor: 256,
            window,
        };

        let chunk_frames = chunk_frames.max(1);
        let resampler = Async::<f32>::new_sinc(
            f_ratio,
            1.1,
            &params,
            chunk_frames,
            channels,
            FixedAsync::Input,
        )
        .map_err(|e| anyhow!("resampler init error: {e}"))?;
        let out = vec![0.0f32; channels * resampler.output_frames_max()];

        tracing::info!(
            source_rate_hz = src_rate,
            output_rate_hz = dst_rate,
            channels,
            chunk_frames,
            "resampler"
        );

        Ok(Self {
            resampler,
            channels,
            chunk_frames,
            pending: Vec::with_capacity(channels * chunk_frames * 2),
            out,
            indexing: Indexing {
                input_offset: 0,
                output_offset: 0,
                active_channels_mask: None,
                partial_len: None,
            },
        })
    }

    /// Feed interleaved input; returns whatever whole chunks produced.
    pub fn process(&mut self, input: &[f32]) -> Result<Vec<f32>> {
        self.pending.extend_from_slice(input);
        let chunk_samples = self.chunk_frames * self.channels;
        let mut produced = Vec::new();
        let mut start = 0;
        while self.pending.len() - start >= chunk_samples {
            let chunk = self.pending[start..start + chunk_samples].to_vec();
            self.run(&chunk, None, &mut produced)?;
            start += chunk_samples;
        }
        self.pending.drain(..start);
        Ok(produced)
    }

    /// Resample the buffered tail (less than one chunk) at end of stream.
    pub fn flush(&mut self) -> Result<Vec<f32>> {
        let tail = std::mem::take(&mut self.pending);
        let tail_frames = tail.len() / self.channels;
        let mut produced = Vec::new();
        if tail_frames > 0 {
            self.run(&tail[..tail_frames * self.channels], Some(tail_frames), &mut produced)?;
        }
        Ok(produced)
    }

    fn run(&mut self, input: &[f32], partial: Option<usize>, produced: &mut Vec<f32>) -> Result<()> {
        let frames = input.len() / self.channels;
        let input_adapter = InterleavedSlice::new(input, self.channels, frames)
            .map_err(|e| anyhow!("interleaved slice (input) error: {e}"))?;
        let out_capacity_frames = self.out.len() / self.channels;
        let mut output_adapter =
            InterleavedSlice::new_mut(&mut self.out, self.channels, out_capacity_frames)
                .map_err(|e| anyhow!("interleaved slice (output) error: {e}"))?;

        self.indexing.input_offset = 0;
        self.indexing.output_offset = 0;
        self.indexing.partial_len = partial;

        let (_nbr_in, nbr_out) = self
            .resampler
            .process_into_buffer(&input_adapter, &mut output_adapter, Some(&self.indexing))
            .map_err(|e| anyhow!("resampler process error: {e}"))?;
        produced.extend_from_slice(&self.out[..nbr_out * self.channels]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(rate: u32, frames: usize, channels: usize) -> Vec<f32> {
        (0..frames)
            .flat_map(|i| {
                let v = (i as f32 * 440.0 * std::f32::consts::TAU / rate as f32).sin() * 0.5;
                std::iter::repeat_n(v, channels)
            })
            .collect()
    }

    #[test]
    fn one_second_upsampled_is_about_one_second_out() {
        let mut rs = StreamResampler::new(44_100, 48_000, 2, 1024).unwrap();
        let input = sine(44_100, 44_100, 2);
        let mut out = Vec::new();
        for block in input.chunks(4410) {
            out.extend(rs.process(block).unwrap());
        }
        out.extend(rs.flush().unwrap());
        assert_eq!(out.len() % 2, 0);
        let frames = out.len() / 2;
        assert!((46_000..=48_500).contains(&frames), "frames = {frames}");
        assert!(out.iter().all(|s| s.abs() <= 1.0));
    }

    #[test]
    fn input_shorter_than_a_chunk_is_held_until_flush() {
        let mut rs = StreamResampler::new(48_000, 44_100, 1, 1024).unwrap();
        assert!(rs.process(&sine(48_000, 100, 1)).unwrap().is_empty());
        assert_eq!(rs.pending.len(), 100);
        rs.flush().unwrap();
        assert!(rs.pending.is_empty());
    }

    #[test]
    fn zero_rate_is_rejected() {
        assert!(StreamResampler::new(0, 48_000, 2, 1024).is_err());
    }
}
