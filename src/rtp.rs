//! RTP (RFC 3550) parsing and payload-type-aware H.264 depacketization
//! (RFC 6184 single-NAL and FU-A fragmentation).
//!
//! Header parsing follows the fixed 12-byte layout used throughout this
//! pack's RTP code; the depacketization state machine (start-code
//! synthesis, FU-A start/middle bit handling, marker-bit-closes-frame) is a
//! direct port of the embedded SDK's `pushRtpIntoH264Track`.

use bytes::{Bytes, BytesMut};
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RtpError {
    #[error("RTP packet too short: {0} bytes, need at least 12")]
    TooShort(usize),
    #[error("unsupported RTP version: {0}")]
    VersionMismatch(u8),
    #[error("malformed RTP header extension")]
    MalformedExtension,
    #[error("RTP track table is full ({0} tracks)")]
    TrackTableFull(usize),
    #[error("unsupported H.264 NAL type: {0}")]
    UnsupportedNalType(u8),
    #[error("FU-A payload too short to carry a fragment header")]
    FuaTooShort,
}

/// Default RTP payload-type number for H.264, matching the WebRTC bridge's
/// default negotiated mapping.
pub const RTP_PAYLOAD_TYPE_H264: u8 = 125;
pub const RTP_PAYLOAD_TYPE_MULAW: u8 = 0;
pub const RTP_PAYLOAD_TYPE_ALAW: u8 = 8;
pub const RTP_PAYLOAD_TYPE_OPUS: u8 = 111;
pub const RTP_PAYLOAD_TYPE_VP8: u8 = 96;

const MAX_TRACKS: usize = 2;

/// Returns the RTP clock rate (Hz) for a known payload type, defaulting to
/// 1000 Hz for anything unrecognized (matches the embedded SDK's fallback).
fn clock_rate(payload_type: u8) -> u64 {
    match payload_type {
        RTP_PAYLOAD_TYPE_H264 | RTP_PAYLOAD_TYPE_VP8 => 90_000,
        RTP_PAYLOAD_TYPE_MULAW | RTP_PAYLOAD_TYPE_ALAW => 8_000,
        RTP_PAYLOAD_TYPE_OPUS => 48_000,
        _ => 1_000,
    }
}

/// A parsed RTP packet, header fields plus a zero-copy view of the payload.
#[derive(Debug, Clone)]
pub struct RtpPacket {
    pub version: u8,
    pub marker: bool,
    pub payload_type: u8,
    pub sequence_number: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub payload: Bytes,
}

impl RtpPacket {
    /// Parses the fixed header, skipping CSRC identifiers and, if present,
    /// the extension header, per RFC 3550 §5.1 / §5.3.1.
    pub fn parse(data: Bytes) -> Result<Self, RtpError> {
        if data.len() < 12 {
            return Err(RtpError::TooShort(data.len()));
        }

        let version = (data[0] >> 6) & 0x03;
        if version != 2 {
            return Err(RtpError::VersionMismatch(version));
        }
        let extension = (data[0] & 0x10) != 0;
        let csrc_count = (data[0] & 0x0F) as usize;

        let marker = (data[1] & 0x80) != 0;
        let payload_type = data[1] & 0x7F;
        let sequence_number = u16::from_be_bytes([data[2], data[3]]);
        let timestamp = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        let ssrc = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);

        let mut offset = 12 + csrc_count * 4;
        if data.len() < offset {
            return Err(RtpError::MalformedExtension);
        }

        if extension {
            if data.len() < offset + 4 {
                return Err(RtpError::MalformedExtension);
            }
            let ext_len_words = u16::from_be_bytes([data[offset + 2], data[offset + 3]]) as usize;
            offset += 4 + ext_len_words * 4;
            if data.len() < offset {
                return Err(RtpError::MalformedExtension);
            }
        }

        Ok(RtpPacket {
            version,
            marker,
            payload_type,
            sequence_number,
            timestamp,
            ssrc,
            payload: data.slice(offset..),
        })
    }
}

/// A per-payload-type accumulator tracking one in-progress access unit.
struct RtpTrack {
    payload_type: u8,
    buf: BytesMut,
    first_timestamp: u32,
    complete: bool,
}

impl RtpTrack {
    fn new(payload_type: u8) -> Self {
        RtpTrack {
            payload_type,
            buf: BytesMut::with_capacity(1024),
            first_timestamp: 0,
            complete: false,
        }
    }

    fn reset(&mut self) {
        self.buf.clear();
        self.complete = false;
    }

    /// H.264 depacketization (RFC 6184): single-NAL passthrough and FU-A
    /// reassembly. Other NAL types are rejected — this core is scoped to
    /// the single-NAL/FU-A subset the embedded SDK supports.
    fn push_h264(&mut self, payload: &[u8]) -> Result<(), RtpError> {
        if payload.is_empty() {
            return Err(RtpError::FuaTooShort);
        }
        let nal_nri = (payload[0] & 0x60) >> 5;
        let nal_type = payload[0] & 0x1F;

        const NAL_TYPE_SINGLE_MIN: u8 = 1;
        const NAL_TYPE_SINGLE_MAX: u8 = 23;
        const NAL_TYPE_FU_A: u8 = 28;

        if (NAL_TYPE_SINGLE_MIN..=NAL_TYPE_SINGLE_MAX).contains(&nal_type) {
            self.buf.extend_from_slice(&[0x00, 0x00, 0x00, 0x01]);
            self.buf.extend_from_slice(payload);
            return Ok(());
        }

        if nal_type == NAL_TYPE_FU_A {
            if payload.len() < 2 {
                return Err(RtpError::FuaTooShort);
            }
            let start_bit = (payload[1] & 0x80) != 0;
            let fu_type = payload[1] & 0x1F;
            let reconstructed_header = (nal_nri << 5) | fu_type;

            if start_bit {
                self.buf.extend_from_slice(&[0x00, 0x00, 0x00, 0x01, reconstructed_header]);
            }
            self.buf.extend_from_slice(&payload[2..]);
            return Ok(());
        }

        Err(RtpError::UnsupportedNalType(nal_type))
    }
}

/// A completed, timestamped access unit handed back to the caller.
#[derive(Debug, Clone)]
pub struct ReassembledFrame {
    pub data: Bytes,
    pub payload_type: u8,
    pub timestamp_ms: u64,
}

/// Payload-type-keyed H.264 RTP reassembler. Single-producer: `push()` is
/// called from whatever thread polls the transport's rolling buffer; the
/// reassembler itself holds no thread and blocks on nothing.
pub struct RtpReassembler {
    tracks: Vec<RtpTrack>,
}

impl Default for RtpReassembler {
    fn default() -> Self {
        Self::new()
    }
}

impl RtpReassembler {
    pub fn new() -> Self {
        RtpReassembler { tracks: Vec::new() }
    }

    fn track_mut(&mut self, payload_type: u8) -> Result<&mut RtpTrack, RtpError> {
        if let Some(idx) = self.tracks.iter().position(|t| t.payload_type == payload_type) {
            return Ok(&mut self.tracks[idx]);
        }
        if self.tracks.len() >= MAX_TRACKS {
            return Err(RtpError::TrackTableFull(MAX_TRACKS));
        }
        self.tracks.push(RtpTrack::new(payload_type));
        Ok(self.tracks.last_mut().unwrap())
    }

    /// Feeds one RTP packet into its payload type's track. The marker bit
    /// closes the frame regardless of whether the final FU-A end bit (E) was
    /// set — only the RTP marker terminates reassembly, per spec.
    pub fn push(&mut self, packet: &RtpPacket) -> Result<(), RtpError> {
        let track = self.track_mut(packet.payload_type)?;
        if track.buf.is_empty() {
            track.first_timestamp = packet.timestamp;
        }
        track.push_h264(&packet.payload)?;
        if packet.marker {
            track.complete = true;
        }
        Ok(())
    }

    pub fn is_frame_available(&self) -> bool {
        self.tracks.iter().any(|t| t.complete)
    }

    /// Takes the first complete frame found, copying its bytes out and
    /// resetting that track for the next access unit.
    pub fn take_frame(&mut self) -> Option<ReassembledFrame> {
        let idx = self.tracks.iter().position(|t| t.complete)?;
        let track = &mut self.tracks[idx];
        let data = track.buf.split().freeze();
        let payload_type = track.payload_type;
        let timestamp_ms = (track.first_timestamp as u64 * 1000) / clock_rate(payload_type);
        track.reset();
        Some(ReassembledFrame { data, payload_type, timestamp_ms })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rtp_packet(payload_type: u8, marker: bool, timestamp: u32, payload: &[u8]) -> Bytes {
        let mut buf = vec![0x80, (marker as u8) << 7 | payload_type];
        buf.extend_from_slice(&1u16.to_be_bytes());
        buf.extend_from_slice(&timestamp.to_be_bytes());
        buf.extend_from_slice(&0x1234_5678u32.to_be_bytes());
        buf.extend_from_slice(payload);
        Bytes::from(buf)
    }

    #[test]
    fn single_nal_sps_with_marker_yields_annexb_frame() {
        let mut reassembler = RtpReassembler::new();
        let payload = [0x67, 0x64, 0x00, 0x1F];
        let packet = RtpPacket::parse(rtp_packet(RTP_PAYLOAD_TYPE_H264, true, 9000, &payload)).unwrap();
        reassembler.push(&packet).unwrap();

        assert!(reassembler.is_frame_available());
        let frame = reassembler.take_frame().unwrap();
        assert_eq!(&frame.data[..], &[0x00, 0x00, 0x00, 0x01, 0x67, 0x64, 0x00, 0x1F]);
        assert_eq!(frame.timestamp_ms, 100);
    }

    #[test]
    fn fu_a_reassembles_idr_across_two_packets() {
        let mut reassembler = RtpReassembler::new();

        // NAL type 5 (IDR), NRI=3: header byte 0x65. FU indicator keeps NRI, type=FU-A(28).
        let fu_indicator = (3u8 << 5) | 28;
        let start_header = 0x80 | 5; // S=1, type=5
        let end_header = 0x40 | 5; // E=1, type=5

        let mut first = vec![fu_indicator, start_header];
        first.extend_from_slice(&[0xAA; 1400]);
        let packet1 = RtpPacket::parse(rtp_packet(RTP_PAYLOAD_TYPE_H264, false, 9000, &first)).unwrap();
        reassembler.push(&packet1).unwrap();
        assert!(!reassembler.is_frame_available());

        let mut second = vec![fu_indicator, end_header];
        second.extend_from_slice(&[0xBB; 1024]);
        let packet2 = RtpPacket::parse(rtp_packet(RTP_PAYLOAD_TYPE_H264, true, 9000, &second)).unwrap();
        reassembler.push(&packet2).unwrap();

        assert!(reassembler.is_frame_available());
        let frame = reassembler.take_frame().unwrap();
        assert_eq!(&frame.data[0..5], &[0x00, 0x00, 0x00, 0x01, 0x65]);
        assert_eq!(frame.data.len(), 5 + 1400 + 1024);
    }

    #[test]
    fn short_packet_errors() {
        let err = RtpPacket::parse(Bytes::from(vec![0x80, 0x00])).unwrap_err();
        assert_eq!(err, RtpError::TooShort(2));
    }

    #[test]
    fn version_mismatch_errors() {
        let mut buf = vec![0x00, 0x00];
        buf.extend_from_slice(&[0u8; 10]);
        let err = RtpPacket::parse(Bytes::from(buf)).unwrap_err();
        assert_eq!(err, RtpError::VersionMismatch(0));
    }

    #[test]
    fn track_table_full_errors() {
        let mut reassembler = RtpReassembler::new();
        for pt in [RTP_PAYLOAD_TYPE_H264, RTP_PAYLOAD_TYPE_VP8] {
            let packet = RtpPacket::parse(rtp_packet(pt, false, 0, &[0x01])).unwrap();
            reassembler.push(&packet).unwrap();
        }
        let packet = RtpPacket::parse(rtp_packet(RTP_PAYLOAD_TYPE_OPUS, false, 0, &[0x01])).unwrap();
        assert_eq!(reassembler.push(&packet).unwrap_err(), RtpError::TrackTableFull(MAX_TRACKS));
    }
}
