//! MKV stream assembler: per-track FIFOs of pre-framed frames, cluster
//! boundary tracking, and the time-ordered multi-track merge the upload
//! session pops from.

use std::collections::VecDeque;

use bytes::Bytes;
use thiserror::Error;

use crate::mkv::{self, cluster, header, MkvTrackInfo, TrackKind};

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("unknown track {0:?}")]
    UnknownTrack(TrackKind),
    #[error("frame's track does not match the track it was enqueued against")]
    TrackMismatch,
    #[error("non-video-keyframe arrived before the first cluster boundary")]
    FrameBeforeClusterStart,
    #[error(transparent)]
    Mkv(#[from] mkv::MkvError),
}

/// A frame as handed to [`StreamAssembler::add_data_frame`].
pub struct FrameInput {
    pub data: Bytes,
    pub ts_ms: u64,
    pub track: TrackKind,
    pub key_frame: bool,
    /// True iff this frame opens a new Cluster — by convention, iff
    /// `track == Video && key_frame`.
    pub cluster_boundary: bool,
}

impl FrameInput {
    pub fn cluster_boundary_for(track: TrackKind, key_frame: bool) -> bool {
        matches!(track, TrackKind::Video) && key_frame
    }

    pub fn new(data: Bytes, ts_ms: u64, track: TrackKind, key_frame: bool) -> Self {
        let cluster_boundary = Self::cluster_boundary_for(track, key_frame);
        FrameInput { data, ts_ms, track, key_frame, cluster_boundary }
    }
}

/// A frame queued on a track's FIFO: the MKV prefix bytes to send ahead of
/// the raw payload (Cluster+SimpleBlock for boundary frames, SimpleBlock
/// only otherwise), plus enough metadata for the multi-track merge and
/// flush-to-next-cluster.
pub struct DataFrameIn {
    pub prefix: Vec<u8>,
    pub data: Bytes,
    pub ts_ms: u64,
    pub track: TrackKind,
    pub is_cluster_start: bool,
}

/// Per-track FIFOs plus the shared initial header and cluster timebase.
/// The first frame ever sent on the wire must be a Cluster (i.e. a video
/// key-frame); callers invoke [`StreamAssembler::flush_to_next_cluster`] at
/// session (re)open to guarantee this.
pub struct StreamAssembler {
    ebml_segment_header: Vec<u8>,
    track_infos: Vec<MkvTrackInfo>,
    video_queue: VecDeque<DataFrameIn>,
    audio_queue: VecDeque<DataFrameIn>,
    has_audio: bool,
    cluster_timestamp_base_ms: Option<u64>,
}

impl StreamAssembler {
    pub fn stream_create(video: MkvTrackInfo, audio: Option<MkvTrackInfo>) -> Result<Self, StreamError> {
        let has_audio = audio.is_some();
        let mut track_infos = vec![video];
        if let Some(audio) = audio {
            track_infos.push(audio);
        }
        let ebml_segment_header = header::build_ebml_segment_header(&track_infos)?;

        Ok(StreamAssembler {
            ebml_segment_header,
            track_infos,
            video_queue: VecDeque::new(),
            audio_queue: VecDeque::new(),
            has_audio,
            cluster_timestamp_base_ms: None,
        })
    }

    fn queue_mut(&mut self, track: TrackKind) -> Result<&mut VecDeque<DataFrameIn>, StreamError> {
        match track {
            TrackKind::Video => Ok(&mut self.video_queue),
            TrackKind::Audio if self.has_audio => Ok(&mut self.audio_queue),
            TrackKind::Audio => Err(StreamError::UnknownTrack(track)),
        }
    }

    fn track_number(&self, track: TrackKind) -> u64 {
        track.track_number()
    }

    /// Computes the MKV prefix for `frame` and enqueues it on its track's
    /// FIFO. Cluster-boundary frames first advance the cluster timebase.
    pub fn stream_add_data_frame(&mut self, frame: FrameInput) -> Result<(), StreamError> {
        if frame.track == TrackKind::Audio && !self.has_audio {
            return Err(StreamError::UnknownTrack(frame.track));
        }

        if frame.cluster_boundary {
            self.cluster_timestamp_base_ms = Some(frame.ts_ms);
        }

        let base = self.cluster_timestamp_base_ms.ok_or(StreamError::FrameBeforeClusterStart)?;

        let mut prefix = Vec::new();
        if frame.cluster_boundary {
            prefix.extend_from_slice(&cluster::build_cluster_header(frame.ts_ms));
        }
        let delta_ms = frame.ts_ms as i64 - base as i64;
        let simple_block = cluster::build_simple_block(
            self.track_number(frame.track),
            delta_ms,
            frame.key_frame,
            &frame.data,
        )?;
        prefix.extend_from_slice(&simple_block);

        let entry = DataFrameIn {
            prefix,
            data: frame.data,
            ts_ms: frame.ts_ms,
            track: frame.track,
            is_cluster_start: frame.cluster_boundary,
        };
        self.queue_mut(frame.track)?.push_back(entry);
        Ok(())
    }

    /// Picks whichever track's head frame has the earlier timestamp,
    /// without removing it. Ties favor the video track.
    pub fn stream_peek(&self) -> Option<&DataFrameIn> {
        match (self.video_queue.front(), self.audio_queue.front()) {
            (Some(v), Some(a)) => Some(if v.ts_ms <= a.ts_ms { v } else { a }),
            (Some(v), None) => Some(v),
            (None, Some(a)) => Some(a),
            (None, None) => None,
        }
    }

    pub fn stream_pop(&mut self) -> Option<DataFrameIn> {
        let pick_video = match (self.video_queue.front(), self.audio_queue.front()) {
            (Some(v), Some(a)) => v.ts_ms <= a.ts_ms,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => return None,
        };
        if pick_video {
            self.video_queue.pop_front()
        } else {
            self.audio_queue.pop_front()
        }
    }

    pub fn stream_avail_on_track(&self, track: TrackKind) -> usize {
        match track {
            TrackKind::Video => self.video_queue.len(),
            TrackKind::Audio => self.audio_queue.len(),
        }
    }

    pub fn stream_is_empty(&self) -> bool {
        self.video_queue.is_empty() && self.audio_queue.is_empty()
    }

    pub fn stream_mem_stat_total(&self) -> usize {
        self.video_queue.iter().chain(self.audio_queue.iter()).map(|f| f.data.len()).sum()
    }

    pub fn stream_get_mkv_ebml_seg_hdr(&self) -> &[u8] {
        &self.ebml_segment_header
    }

    /// Discards head frames (across the merged order) until the head is a
    /// cluster-start frame, so a freshly (re)opened upload never begins
    /// mid-cluster. Returns the number of frames discarded.
    pub fn flush_to_next_cluster(&mut self) -> usize {
        let mut discarded = 0;
        loop {
            let head_is_cluster_start = match self.stream_peek() {
                Some(frame) => frame.is_cluster_start,
                None => break,
            };
            if head_is_cluster_start {
                break;
            }
            self.stream_pop();
            discarded += 1;
        }
        discarded
    }

    pub fn track_infos(&self) -> &[MkvTrackInfo] {
        &self.track_infos
    }
}
