//! Driver-side delay reporting for upstream clock compensation.

use crate::jiffies::JIFFIES_PER_SECOND;

/// Delay contract consumed by upstream synchronisation logic.
pub trait PipelineAnimator {
    /// Extra pipeline delay, in jiffies, the driver adds when playing a stream recorded at
    /// `from_rate` on an output running at `to_rate`.
    fn pipeline_driver_delay_jiffies(&self, from_rate: u32, to_rate: u32) -> u32;
}

/// Delay model depending only on the rates and a fixed buffering depth.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DriverDelay {
    buffering_frames: u32,
}

impl DriverDelay {
    pub fn new(buffering_frames: u32) -> Self {
        Self { buffering_frames }
    }

    pub fn buffering_frames(&self) -> u32 {
        self.buffering_frames
    }
}

impl PipelineAnimator for DriverDelay {
    fn pipeline_driver_delay_jiffies(&self, from_rate: u32, to_rate: u32) -> u32 {
        if from_rate == to_rate || from_rate == 0 || to_rate == 0 {
            return 0;
        }
        let jiffies = self.buffering_frames as u64 * JIFFIES_PER_SECOND as u64 / to_rate as u64;
        u32::try_from(jiffies).unwrap_or(u32::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jiffies;

    #[test]
    fn equal_rates_add_no_delay() {
        let d = DriverDelay::new(3072);
        assert_eq!(d.pipeline_driver_delay_jiffies(44_100, 44_100), 0);
        assert_eq!(d.pipeline_driver_delay_jiffies(192_000, 192_000), 0);
    }

    #[test]
    fn differing_rates_report_buffering_at_output_rate() {
        let d = DriverDelay::new(48_000);
        // One second of output frames.
        assert_eq!(
            d.pipeline_driver_delay_jiffies(44_100, 48_000),
            jiffies::JIFFIES_PER_SECOND
        );
        assert_eq!(
            d.pipeline_driver_delay_jiffies(44_100, 48_000),
            d.pipeline_driver_delay_jiffies(44_100, 48_000)
        );
    }

    #[test]
    fn delay_is_monotonic_in_depth() {
        let mut last = 0;
        for frames in [0, 1, 512, 1024, 4096, 65_536] {
            let v = DriverDelay::new(frames).pipeline_driver_delay_jiffies(96_000, 44_100);
            assert!(v >= last);
            last = v;
        }
    }

    #[test]
    fn zero_rate_is_no_delay_and_huge_depth_saturates() {
        let d = DriverDelay::new(u32::MAX);
        assert_eq!(d.pipeline_driver_delay_jiffies(0, 48_000), 0);
        assert_eq!(d.pipeline_driver_delay_jiffies(44_100, 48_000), u32::MAX);
    }
}
