//! Pipeline time units.
//!
//! A jiffy is the pipeline's fixed clock tick. One second is chosen so that every common
//! sample rate (8 kHz … 192 kHz, both the 44.1 kHz and 48 kHz families) maps to an integral
//! number of jiffies per sample.

pub const JIFFIES_PER_SECOND: u32 = 56_448_000;
pub const JIFFIES_PER_MS: u32 = JIFFIES_PER_SECOND / 1000;

/// Jiffies covered by one sample frame at `sample_rate`.
///
/// Returns `None` for rates that do not divide [`JIFFIES_PER_SECOND`] evenly.
pub fn per_sample(sample_rate: u32) -> Option<u32> {
    if sample_rate == 0 || JIFFIES_PER_SECOND % sample_rate != 0 {
        return None;
    }
    Some(JIFFIES_PER_SECOND / sample_rate)
}

/// Convert milliseconds to jiffies (saturating).
pub fn from_ms(ms: u32) -> u32 {
    ms.saturating_mul(JIFFIES_PER_MS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_sample_covers_common_rates() {
        assert_eq!(per_sample(44_100), Some(1280));
        assert_eq!(per_sample(48_000), Some(1176));
        assert_eq!(per_sample(96_000), Some(588));
        assert_eq!(per_sample(192_000), Some(294));
        assert_eq!(per_sample(8_000), Some(7056));
        assert_eq!(per_sample(11_025), Some(5120));
    }

    #[test]
    fn per_sample_rejects_odd_rates() {
        assert_eq!(per_sample(0), None);
        assert_eq!(per_sample(44_101), None);
    }

    #[test]
    fn ms_conversions() {
        assert_eq!(from_ms(100), 5_644_800);
        assert_eq!(from_ms(u32::MAX), u32::MAX);
    }
}
