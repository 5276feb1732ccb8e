//! Pipeline messages consumed by the animator.
//!
//! Every message is moved into the driver by [`Pipeline::pull`] and released (dropped) once its
//! handler returns. Exactly one kind is active per message.

use serde::Serialize;

use crate::format::AudioFormat;

/// Upstream pull interface. The driver is the only caller.
///
/// `pull` may block awaiting upstream data; it is never interrupted by the driver.
pub trait Pipeline {
    fn pull(&mut self) -> Msg;
}

/// Stream descriptor carried by [`Msg::DecodedStream`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedStreamInfo {
    pub stream_id: u32,
    pub sample_rate: u32,
    pub bit_depth: u16,
    pub channels: u16,
    pub codec: String,
    /// First sample of the stream relative to the start of its track.
    pub sample_start: u64,
    pub lossless: bool,
}

impl DecodedStreamInfo {
    pub fn format(&self) -> crate::error::Result<AudioFormat> {
        AudioFormat::new(self.sample_rate, self.bit_depth, self.channels)
    }
}

/// A run of interleaved big-endian PCM in the current stream format.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PcmChunk {
    pub data: Vec<u8>,
    /// Position of the first frame within its track, in jiffies.
    pub track_offset: u64,
}

impl PcmChunk {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            track_offset: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[derive(Debug)]
pub enum Msg {
    Mode { mode: String },
    Session { id: u32 },
    Track { id: u32, uri: String },
    Delay { jiffies: u32 },
    EncodedStream { uri: String, total_bytes: u64 },
    AudioEncoded { bytes: Vec<u8> },
    MetaText { text: String },
    Halt { id: u32 },
    Flush { id: u32 },
    Wait,
    DecodedStream(DecodedStreamInfo),
    AudioPcm(PcmChunk),
    Silence { jiffies: u32 },
    Playable(PcmChunk),
    Quit,
}

/// Payload-free tag for [`Msg`], used in logs and error reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum MsgKind {
    Mode,
    Session,
    Track,
    Delay,
    EncodedStream,
    AudioEncoded,
    MetaText,
    Halt,
    Flush,
    Wait,
    DecodedStream,
    AudioPcm,
    Silence,
    Playable,
    Quit,
}

impl Msg {
    pub fn kind(&self) -> MsgKind {
        match self {
            Msg::Mode { .. } => MsgKind::Mode,
            Msg::Session { .. } => MsgKind::Session,
            Msg::Track { .. } => MsgKind::Track,
            Msg::Delay { .. } => MsgKind::Delay,
            Msg::EncodedStream { .. } => MsgKind::EncodedStream,
            Msg::AudioEncoded { .. } => MsgKind::AudioEncoded,
            Msg::MetaText { .. } => MsgKind::MetaText,
            Msg::Halt { .. } => MsgKind::Halt,
            Msg::Flush { .. } => MsgKind::Flush,
            Msg::Wait => MsgKind::Wait,
            Msg::DecodedStream(_) => MsgKind::DecodedStream,
            Msg::AudioPcm(_) => MsgKind::AudioPcm,
            Msg::Silence { .. } => MsgKind::Silence,
            Msg::Playable(_) => MsgKind::Playable,
            Msg::Quit => MsgKind::Quit,
        }
    }
}

/// A pipeline that replays a fixed message script, then reports `Quit` forever.
///
/// Useful for harnesses that need deterministic message ordering.
pub struct ScriptedPipeline {
    script: std::collections::VecDeque<Msg>,
}

impl ScriptedPipeline {
    pub fn new(script: impl IntoIterator<Item = Msg>) -> Self {
        Self {
            script: script.into_iter().collect(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.script.len()
    }
}

impl Pipeline for ScriptedPipeline {
    fn pull(&mut self) -> Msg {
        self.script.pop_front().unwrap_or(Msg::Quit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matches_variant() {
        assert_eq!(Msg::Wait.kind(), MsgKind::Wait);
        assert_eq!(Msg::Silence { jiffies: 1 }.kind(), MsgKind::Silence);
        assert_eq!(
            Msg::AudioEncoded { bytes: vec![1] }.kind(),
            MsgKind::AudioEncoded
        );
        assert_eq!(
            Msg::Playable(PcmChunk::new(vec![0; 4])).kind(),
            MsgKind::Playable
        );
    }

    #[test]
    fn scripted_pipeline_ends_with_quit() {
        let mut p = ScriptedPipeline::new([Msg::Wait]);
        assert_eq!(p.pull().kind(), MsgKind::Wait);
        assert_eq!(p.pull().kind(), MsgKind::Quit);
        assert_eq!(p.pull().kind(), MsgKind::Quit);
        assert_eq!(p.remaining(), 0);
    }

    #[test]
    fn stream_info_validates_format() {
        let info = DecodedStreamInfo {
            stream_id: 1,
            sample_rate: 44_100,
            bit_depth: 16,
            channels: 2,
            codec: "FLAC".into(),
            sample_start: 0,
            lossless: true,
        };
        assert_eq!(info.format().unwrap().bytes_per_frame(), 4);
        let bad = DecodedStreamInfo {
            bit_depth: 12,
            ..info
        };
        assert!(bad.format().is_err());
    }
}
