//! MKV (Matroska) stream generation: EBML/Segment/Tracks header, Cluster and
//! SimpleBlock element construction, codec-private-data builders, SPS
//! parsing, and Annex-B/AVCC conversion.

pub mod annexb;
pub mod cluster;
pub mod codec_private;
pub mod header;
pub mod sps;

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum MkvError {
    #[error("VINT encoding failed: {0}")]
    Vint(#[from] crate::vint::VintError),
    #[error("delta timecode {0} does not fit in a signed 16-bit field")]
    DeltaTimecodeOverflow(i64),
    #[error("unsupported AAC sampling rate: {0} Hz")]
    UnsupportedAacSampleRate(u32),
    #[error("unsupported PCM sampling rate: {0} Hz (must be in [8000, 192000])")]
    UnsupportedPcmSampleRate(u32),
    #[error("SPS bitstream ended before resolution fields were read")]
    SpsTruncated,
    #[error("no Annex-B start code found in NAL buffer")]
    NoStartCode,
    #[error("Annex-B buffer too small: need {0} trailing bytes of slack, have {1}")]
    InsufficientSlack(usize, usize),
}

/// Logical track kind; determines TrackNumber and the MKV TrackType value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Video,
    Audio,
}

impl TrackKind {
    /// MKV TrackNumber: fixed by convention, not renumbered per session, so
    /// the Tracks element and every SimpleBlock prefix agree by construction.
    pub fn track_number(self) -> u64 {
        match self {
            TrackKind::Video => 1,
            TrackKind::Audio => 2,
        }
    }

    /// MKV TrackType enum value (Matroska spec: 1=video, 2=audio).
    pub fn track_type(self) -> u64 {
        match self {
            TrackKind::Video => 1,
            TrackKind::Audio => 2,
        }
    }
}

/// Video-specific track parameters.
#[derive(Debug, Clone)]
pub struct VideoTrackInfo {
    pub width: u16,
    pub height: u16,
}

/// Audio-specific track parameters.
#[derive(Debug, Clone)]
pub struct AudioTrackInfo {
    pub sample_rate: u32,
    pub channels: u16,
    pub bit_depth: u16,
}

/// Per-track metadata fixed for the lifetime of a session.
#[derive(Debug, Clone)]
pub struct MkvTrackInfo {
    pub kind: TrackKind,
    pub name: String,
    pub codec_id: String,
    pub codec_private: Vec<u8>,
    pub video: Option<VideoTrackInfo>,
    pub audio: Option<AudioTrackInfo>,
}

impl MkvTrackInfo {
    pub fn track_number(&self) -> u64 {
        self.kind.track_number()
    }
}
