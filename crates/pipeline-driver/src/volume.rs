//! Big-endian PCM sample helpers used at render time.
//!
//! Volume is a plain linear multiplier. `1.0` leaves samples untouched and `0.0` zeroes
//! them; nothing beyond range clamping guards against clipping.

/// Decode one signed big-endian sample of `bytes.len()` bytes into `[-1.0, 1.0)`.
pub fn decode_be_sample_f32(bytes: &[u8]) -> f32 {
    match bytes.len() {
        1 => bytes[0] as i8 as f32 / 128.0,
        2 => i16::from_be_bytes([bytes[0], bytes[1]]) as f32 / 32_768.0,
        3 => {
            let v = i32::from_be_bytes([bytes[0], bytes[1], bytes[2], 0]) >> 8;
            v as f32 / 8_388_608.0
        }
        4 => i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f32 / 2_147_483_648.0,
        _ => 0.0,
    }
}

/// Scale every sample in `pcm` by `level`, in place.
///
/// `pcm` holds interleaved signed big-endian samples of `bit_depth` bits; a trailing partial
/// sample is left as is.
pub fn scale_be_samples(pcm: &mut [u8], bit_depth: u16, level: f32) {
    let level = crate::host::clamp_level(level);
    if level >= 1.0 {
        return;
    }
    if level <= 0.0 {
        let whole = pcm.len() - pcm.len() % (bit_depth as usize / 8).max(1);
        pcm[..whole].fill(0);
        return;
    }
    match bit_depth {
        8 => {
            for b in pcm.iter_mut() {
                *b = ((*b as i8) as f32 * level) as i8 as u8;
            }
        }
        16 => {
            for s in pcm.chunks_exact_mut(2) {
                let v = i16::from_be_bytes([s[0], s[1]]);
                s.copy_from_slice(&((v as f32 * level) as i16).to_be_bytes());
            }
        }
        24 => {
            for s in pcm.chunks_exact_mut(3) {
                let v = i32::from_be_bytes([s[0], s[1], s[2], 0]) >> 8;
                let scaled = ((v as f32 * level) as i32).to_be_bytes();
                s.copy_from_slice(&scaled[1..]);
            }
        }
        32 => {
            for s in pcm.chunks_exact_mut(4) {
                let v = i32::from_be_bytes([s[0], s[1], s[2], s[3]]);
                let scaled = (v as f64 * level as f64) as i32;
                s.copy_from_slice(&scaled.to_be_bytes());
            }
        }
        other => tracing::warn!(bits = other, "volume: unsupported bit depth"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn be16(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_be_bytes()).collect()
    }

    #[test]
    fn zero_volume_silences() {
        let mut pcm = be16(&[1000, -1000, i16::MAX, i16::MIN]);
        scale_be_samples(&mut pcm, 16, 0.0);
        assert!(pcm.iter().all(|&b| b == 0));
    }

    #[test]
    fn unity_volume_is_pass_through() {
        let original = be16(&[1, -2, 300, -32_768]);
        let mut pcm = original.clone();
        scale_be_samples(&mut pcm, 16, 1.0);
        assert_eq!(pcm, original);
        scale_be_samples(&mut pcm, 16, 7.5);
        assert_eq!(pcm, original);
    }

    #[test]
    fn half_volume_halves_16_bit() {
        let mut pcm = be16(&[1000, -1000]);
        scale_be_samples(&mut pcm, 16, 0.5);
        assert_eq!(pcm, be16(&[500, -500]));
    }

    #[test]
    fn half_volume_halves_24_bit() {
        // 0x100000 and -0x100000
        let mut pcm = vec![0x10, 0x00, 0x00, 0xF0, 0x00, 0x00];
        scale_be_samples(&mut pcm, 24, 0.5);
        assert_eq!(pcm, vec![0x08, 0x00, 0x00, 0xF8, 0x00, 0x00]);
    }

    #[test]
    fn negative_level_clamps_to_silence() {
        let mut pcm = vec![0x7F, 0x80];
        scale_be_samples(&mut pcm, 8, -1.0);
        assert_eq!(pcm, vec![0, 0]);
    }

    #[test]
    fn decode_samples() {
        assert_eq!(decode_be_sample_f32(&[0x40, 0x00]), 0.5);
        assert_eq!(decode_be_sample_f32(&[0x80, 0x00]), -1.0);
        assert_eq!(decode_be_sample_f32(&[0xC0, 0x00, 0x00]), -0.5);
        assert_eq!(decode_be_sample_f32(&[0x40, 0, 0, 0]), 0.5);
        assert_eq!(decode_be_sample_f32(&[0xC0]), -0.5);
        assert_eq!(decode_be_sample_f32(&[]), 0.0);
    }
}
