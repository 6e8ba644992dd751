//! EBML header, Segment/Info/Tracks construction.

use crate::vint::{encode_vint, encode_vint_unknown_size};

use super::{MkvError, MkvTrackInfo};

// Matroska/EBML element IDs (fixed, not VINT-chosen — these are literal
// byte sequences defined by the spec, never re-encoded).
const ID_EBML: [u8; 4] = [0x1A, 0x45, 0xDF, 0xA3];
const ID_EBML_VERSION: [u8; 2] = [0x42, 0x86];
const ID_EBML_READ_VERSION: [u8; 2] = [0x42, 0xF7];
const ID_EBML_MAX_ID_LENGTH: [u8; 2] = [0x42, 0xF2];
const ID_EBML_MAX_SIZE_LENGTH: [u8; 2] = [0x42, 0xF3];
const ID_DOC_TYPE: [u8; 2] = [0x42, 0x82];
const ID_DOC_TYPE_VERSION: [u8; 2] = [0x42, 0x87];
const ID_DOC_TYPE_READ_VERSION: [u8; 2] = [0x42, 0x85];

const ID_SEGMENT: [u8; 4] = [0x18, 0x53, 0x80, 0x67];
const ID_INFO: [u8; 4] = [0x15, 0x49, 0xA9, 0x66];
const ID_TIMECODE_SCALE: [u8; 3] = [0x2A, 0xD7, 0xB1];
const ID_MUXING_APP: [u8; 2] = [0x4D, 0x80];
const ID_WRITING_APP: [u8; 2] = [0x57, 0x41];
const ID_TITLE: [u8; 2] = [0x7B, 0xA9];

const ID_TRACKS: [u8; 4] = [0x16, 0x54, 0xAE, 0x6B];
const ID_TRACK_ENTRY: [u8; 1] = [0xAE];
const ID_TRACK_NUMBER: [u8; 1] = [0xD7];
const ID_TRACK_UID: [u8; 2] = [0x73, 0xC5];
const ID_TRACK_TYPE: [u8; 1] = [0x83];
const ID_NAME: [u8; 2] = [0x53, 0x6E];
const ID_CODEC_ID: [u8; 1] = [0x86];
const ID_CODEC_PRIVATE: [u8; 2] = [0x63, 0xA2];
const ID_VIDEO: [u8; 1] = [0xE0];
const ID_PIXEL_WIDTH: [u8; 1] = [0xB0];
const ID_PIXEL_HEIGHT: [u8; 1] = [0xBA];
const ID_AUDIO: [u8; 1] = [0xE1];
const ID_SAMPLING_FREQUENCY: [u8; 1] = [0xB5];
const ID_CHANNELS: [u8; 1] = [0x9F];
const ID_BIT_DEPTH: [u8; 2] = [0x62, 0x64];

const TIMECODE_SCALE_NS: u64 = 1_000_000; // 1 ms per tick
const MUXING_APP: &str = "kvs-producer-core";
const WRITING_APP: &str = "kvs-producer-core";

/// Appends `id || vint(payload.len()) || payload` to `out`.
fn write_element(id: &[u8], payload: &[u8], out: &mut Vec<u8>) -> Result<(), MkvError> {
    out.extend_from_slice(id);
    encode_vint(payload.len() as u64, None, out)?;
    out.extend_from_slice(payload);
    Ok(())
}

fn write_uint_element(id: &[u8], value: u64, out: &mut Vec<u8>) -> Result<(), MkvError> {
    let bytes = value.to_be_bytes();
    let first_nonzero = bytes.iter().position(|&b| b != 0).unwrap_or(7);
    write_element(id, &bytes[first_nonzero..], out)
}

fn write_string_element(id: &[u8], value: &str, out: &mut Vec<u8>) -> Result<(), MkvError> {
    write_element(id, value.as_bytes(), out)
}

fn write_track_entry(track: &MkvTrackInfo, out: &mut Vec<u8>) -> Result<(), MkvError> {
    let mut entry = Vec::new();
    write_uint_element(&ID_TRACK_NUMBER, track.track_number(), &mut entry)?;
    write_uint_element(&ID_TRACK_UID, track.track_number(), &mut entry)?;
    write_uint_element(&ID_TRACK_TYPE, track.kind.track_type(), &mut entry)?;
    write_string_element(&ID_NAME, &track.name, &mut entry)?;
    write_string_element(&ID_CODEC_ID, &track.codec_id, &mut entry)?;
    write_element(&ID_CODEC_PRIVATE, &track.codec_private, &mut entry)?;

    if let Some(video) = &track.video {
        let mut video_payload = Vec::new();
        write_uint_element(&ID_PIXEL_WIDTH, video.width as u64, &mut video_payload)?;
        write_uint_element(&ID_PIXEL_HEIGHT, video.height as u64, &mut video_payload)?;
        write_element(&ID_VIDEO, &video_payload, &mut entry)?;
    }
    if let Some(audio) = &track.audio {
        let mut audio_payload = Vec::new();
        write_element(
            &ID_SAMPLING_FREQUENCY,
            &(audio.sample_rate as f64).to_be_bytes(),
            &mut audio_payload,
        )?;
        write_uint_element(&ID_CHANNELS, audio.channels as u64, &mut audio_payload)?;
        write_uint_element(&ID_BIT_DEPTH, audio.bit_depth as u64, &mut audio_payload)?;
        write_element(&ID_AUDIO, &audio_payload, &mut entry)?;
    }

    write_element(&ID_TRACK_ENTRY, &entry, out)
}

/// Builds the session's initial bytes: EBML header, followed by a Segment
/// opened with the unknown-size marker, containing Info and Tracks.
///
/// The Segment is left open (unknown size) per spec: Cluster/SimpleBlock
/// elements are appended later as independent top-level children, never
/// requiring the Segment length to be patched in after the fact.
pub fn build_ebml_segment_header(tracks: &[MkvTrackInfo]) -> Result<Vec<u8>, MkvError> {
    let mut out = Vec::new();

    let mut ebml_payload = Vec::new();
    write_uint_element(&ID_EBML_VERSION, 1, &mut ebml_payload)?;
    write_uint_element(&ID_EBML_READ_VERSION, 1, &mut ebml_payload)?;
    write_uint_element(&ID_EBML_MAX_ID_LENGTH, 4, &mut ebml_payload)?;
    write_uint_element(&ID_EBML_MAX_SIZE_LENGTH, 8, &mut ebml_payload)?;
    write_string_element(&ID_DOC_TYPE, "matroska", &mut ebml_payload)?;
    write_uint_element(&ID_DOC_TYPE_VERSION, 2, &mut ebml_payload)?;
    write_uint_element(&ID_DOC_TYPE_READ_VERSION, 2, &mut ebml_payload)?;
    write_element(&ID_EBML, &ebml_payload, &mut out)?;

    out.extend_from_slice(&ID_SEGMENT);
    encode_vint_unknown_size(&mut out);

    let mut info_payload = Vec::new();
    write_uint_element(&ID_TIMECODE_SCALE, TIMECODE_SCALE_NS, &mut info_payload)?;
    write_string_element(&ID_MUXING_APP, MUXING_APP, &mut info_payload)?;
    write_string_element(&ID_WRITING_APP, WRITING_APP, &mut info_payload)?;
    write_string_element(&ID_TITLE, "kvs-producer-core stream", &mut info_payload)?;
    write_element(&ID_INFO, &info_payload, &mut out)?;

    let mut tracks_payload = Vec::new();
    for track in tracks {
        write_track_entry(track, &mut tracks_payload)?;
    }
    write_element(&ID_TRACKS, &tracks_payload, &mut out)?;

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mkv::{TrackKind, VideoTrackInfo};

    fn video_track() -> MkvTrackInfo {
        MkvTrackInfo {
            kind: TrackKind::Video,
            name: "video".into(),
            codec_id: "V_MPEG4/ISO/AVC".into(),
            codec_private: vec![
                0x01, 0x64, 0x00, 0x1F, 0xFF, 0xE1, 0x00, 0x04, 0x67, 0x64, 0x00, 0x1F, 0x01,
                0x00, 0x04, 0x68, 0xEE, 0x38, 0x80,
            ],
            video: Some(VideoTrackInfo { width: 640, height: 480 }),
            audio: None,
        }
    }

    #[test]
    fn header_starts_with_ebml_id_and_contains_segment_unknown_size() {
        let bytes = build_ebml_segment_header(&[video_track()]).unwrap();
        assert_eq!(&bytes[0..4], &[0x1A, 0x45, 0xDF, 0xA3]);
        let segment_pos = bytes
            .windows(4)
            .position(|w| w == ID_SEGMENT)
            .expect("Segment ID present");
        let marker = &bytes[segment_pos + 4..segment_pos + 12];
        assert_eq!(marker, &[0x01, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn codec_private_survives_round_trip_in_output() {
        let track = video_track();
        let bytes = build_ebml_segment_header(&[track.clone()]).unwrap();
        assert!(bytes.windows(track.codec_private.len()).any(|w| w == track.codec_private.as_slice()));
    }
}
