//! Symphonia decode stage.
//!
//! Probes one file and yields decoded packets as interleaved `f32` samples.

use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CodecParameters, Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// Stream properties captured while probing.
#[derive(Clone, Debug)]
pub struct SourceInfo {
    pub rate: u32,
    pub channels: usize,
    pub codec: String,
    /// Source bit depth (best-effort).
    pub bit_depth: Option<u16>,
    pub lossless: bool,
    pub duration_ms: Option<u64>,
}

pub struct TrackDecoder {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    info: SourceInfo,
}

impl TrackDecoder {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("open {:?}", path))?;
        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }
        let mss = MediaSourceStream::new(Box::new(file), Default::default());
        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .with_context(|| format!("probe {:?}", path))?;

        let format = probed.format;
        let track = format
            .default_track()
            .ok_or_else(|| anyhow!("No default audio track"))?;
        let track_id = track.id;
        let params: CodecParameters = track.codec_params.clone();
        let channels = params
            .channels
            .ok_or_else(|| anyhow!("Unknown channels"))?
            .count();
        let rate = params
            .sample_rate
            .ok_or_else(|| anyhow!("Unknown sample rate"))?;
        let decoder = symphonia::default::get_codecs()
            .make(&params, &DecoderOptions::default())
            .context("create decoder")?;

        let (codec, lossless) = codec_label(&params);
        let info = SourceInfo {
            rate,
            channels,
            codec: codec.to_string(),
            bit_depth: params
                .bits_per_sample
                .or(params.bits_per_coded_sample)
                .and_then(|v| u16::try_from(v).ok()),
            lossless,
            duration_ms: duration_ms(&params),
        };

        Ok(Self {
            format,
            decoder,
            track_id,
            info,
        })
    }

    pub fn info(&self) -> &SourceInfo {
        &self.info
    }

    /// Next decoded packet as interleaved `f32`, or `None` at end of stream.
    ///
    /// Corrupt packets are skipped.
    pub fn next_samples(&mut self) -> Result<Option<Vec<f32>>> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(None);
                }
                Err(SymphoniaError::ResetRequired) => return Ok(None),
                Err(e) => return Err(e).context("read packet"),
            };
            if packet.track_id() != self.track_id {
                continue;
            }
            let decoded = match self.decoder.decode(&packet) {
                Ok(d) => d,
                Err(SymphoniaError::DecodeError(e)) => {
                    tracing::debug!("skipping corrupt packet: {e}");
                    continue;
                }
                Err(e) => return Err(e).context("decode packet"),
            };
            let mut buf = SampleBuffer::<f32>::new(decoded.frames() as u64, *decoded.spec());
            buf.copy_interleaved_ref(decoded);
            return Ok(Some(buf.samples().to_vec()));
        }
    }
}

fn duration_ms(params: &CodecParameters) -> Option<u64> {
    let frames = params.n_frames?;
    let rate = params.sample_rate? as u64;
    if rate == 0 {
        return None;
    }
    Some(frames.saturating_mul(1000) / rate)
}

/// Codec label and whether the codec is lossless.
fn codec_label(params: &CodecParameters) -> (&'static str, bool) {
    use symphonia::core::codecs::*;
    match params.codec {
        CODEC_TYPE_FLAC => ("FLAC", true),
        CODEC_TYPE_ALAC => ("ALAC", true),
        CODEC_TYPE_MP3 => ("MP3", false),
        CODEC_TYPE_AAC => ("AAC", false),
        CODEC_TYPE_VORBIS => ("VORBIS", false),
        CODEC_TYPE_PCM_S16LE | CODEC_TYPE_PCM_S16BE => ("PCM_S16", true),
        CODEC_TYPE_PCM_S24LE | CODEC_TYPE_PCM_S24BE => ("PCM_S24", true),
        CODEC_TYPE_PCM_S32LE | CODEC_TYPE_PCM_S32BE => ("PCM_S32", true),
        CODEC_TYPE_PCM_F32LE | CODEC_TYPE_PCM_F32BE => ("PCM_F32", true),
        _ => ("UNKNOWN", false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use symphonia::core::codecs::{CODEC_TYPE_FLAC, CODEC_TYPE_MP3, CODEC_TYPE_NULL};

    fn params(rate: Option<u32>, frames: Option<u64>) -> CodecParameters {
        let mut p = CodecParameters::new();
        p.for_codec(CODEC_TYPE_FLAC);
        if let Some(rate) = rate {
            p.with_sample_rate(rate);
        }
        if let Some(frames) = frames {
            p.with_n_frames(frames);
        }
        p
    }

    #[test]
    fn duration_from_frames_and_rate() {
        assert_eq!(duration_ms(&params(Some(44_100), Some(88_200))), Some(2000));
        assert_eq!(duration_ms(&params(Some(48_000), Some(1))), Some(0));
    }

    #[test]
    fn duration_unknown_without_frames_or_rate() {
        assert_eq!(duration_ms(&params(Some(44_100), None)), None);
        assert_eq!(duration_ms(&params(None, Some(88_200))), None);
        assert_eq!(duration_ms(&params(Some(0), Some(88_200))), None);
    }

    #[test]
    fn codec_labels_carry_lossless_flag() {
        assert_eq!(codec_label(&params(None, None)), ("FLAC", true));
        let mut mp3 = CodecParameters::new();
        mp3.for_codec(CODEC_TYPE_MP3);
        assert_eq!(codec_label(&mp3), ("MP3", false));
        let mut other = CodecParameters::new();
        other.for_codec(CODEC_TYPE_NULL);
        assert_eq!(codec_label(&other), ("UNKNOWN", false));
    }

    #[test]
    fn missing_file_fails_to_open() {
        assert!(TrackDecoder::open(Path::new("/nonexistent/track.flac")).is_err());
    }
}
