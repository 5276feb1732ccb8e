//! Stream format negotiated by a `DecodedStream` message.
//!
//! Pipeline PCM is interleaved signed integer, big-endian, `bit_depth / 8` bytes per sample.

use serde::Serialize;

use crate::error::{DriverError, Result};
use crate::jiffies;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub bit_depth: u16,
    pub channels: u16,
}

impl AudioFormat {
    /// Build a format, rejecting descriptors the driver cannot address in jiffies or bytes.
    pub fn new(sample_rate: u32, bit_depth: u16, channels: u16) -> Result<Self> {
        let format = Self {
            sample_rate,
            bit_depth,
            channels,
        };
        format.validate()?;
        Ok(format)
    }

    pub fn validate(&self) -> Result<()> {
        if jiffies::per_sample(self.sample_rate).is_none() {
            return Err(DriverError::UnsupportedFormat(format!(
                "sample rate {} Hz has no integral jiffies per sample",
                self.sample_rate
            )));
        }
        if !matches!(self.bit_depth, 8 | 16 | 24 | 32) {
            return Err(DriverError::UnsupportedFormat(format!(
                "bit depth {}",
                self.bit_depth
            )));
        }
        if self.channels == 0 {
            return Err(DriverError::UnsupportedFormat("zero channels".into()));
        }
        Ok(())
    }

    pub fn bytes_per_sample(&self) -> usize {
        self.bit_depth as usize / 8
    }

    pub fn bytes_per_frame(&self) -> usize {
        self.bytes_per_sample() * self.channels as usize
    }

    /// Whole frames covered by `jiffies` (remainder dropped).
    pub fn frames_for_jiffies(&self, jiffies: u32) -> usize {
        match jiffies::per_sample(self.sample_rate) {
            Some(per) => (jiffies / per) as usize,
            None => 0,
        }
    }

    pub fn bytes_for_jiffies(&self, jiffies: u32) -> usize {
        self.frames_for_jiffies(jiffies) * self.bytes_per_frame()
    }

    /// Wall-clock duration of `bytes` of PCM in this format.
    pub fn duration_of(&self, bytes: usize) -> std::time::Duration {
        let frames = bytes / self.bytes_per_frame().max(1);
        std::time::Duration::from_secs_f64(frames as f64 / self.sample_rate.max(1) as f64)
    }
}

impl std::fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} Hz / {}-bit / {} ch",
            self.sample_rate, self.bit_depth, self.channels
        )
    }
}
