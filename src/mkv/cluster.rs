//! Cluster and SimpleBlock element construction.

use crate::vint::{encode_vint, encode_vint_signed, encode_vint_unknown_size};

use super::MkvError;

const ID_CLUSTER: [u8; 4] = [0x1F, 0x43, 0xB6, 0x75];
const ID_TIMECODE: [u8; 1] = [0xE7];
const ID_SIMPLE_BLOCK: [u8; 1] = [0xA3];

const KEY_FRAME_FLAG: u8 = 0x80;

/// Opens a new Cluster with unknown size and a Timecode child carrying the
/// absolute timestamp (ms) of the frame that triggered the boundary.
pub fn build_cluster_header(timecode_ms: u64) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&ID_CLUSTER);
    encode_vint_unknown_size(&mut out);

    let mut timecode_bytes = Vec::new();
    let be = timecode_ms.to_be_bytes();
    let first_nonzero = be.iter().position(|&b| b != 0).unwrap_or(7);
    timecode_bytes.extend_from_slice(&be[first_nonzero..]);

    out.extend_from_slice(&ID_TIMECODE);
    encode_vint(timecode_bytes.len() as u64, None, &mut out).expect("timecode width fits");
    out.extend_from_slice(&timecode_bytes);
    out
}

/// Builds a SimpleBlock element: `(TrackNumber as VINT, delta-timecode:i16,
/// flags)` followed by the raw frame bytes. `delta_ms` is the frame's
/// absolute timestamp minus the current cluster's timecode base and must
/// fit in a signed 16-bit field.
pub fn build_simple_block(
    track_number: u64,
    delta_ms: i64,
    key_frame: bool,
    frame: &[u8],
) -> Result<Vec<u8>, MkvError> {
    if !(i16::MIN as i64..=i16::MAX as i64).contains(&delta_ms) {
        return Err(MkvError::DeltaTimecodeOverflow(delta_ms));
    }

    let mut payload = Vec::new();
    encode_vint(track_number, None, &mut payload)?;
    payload.extend_from_slice(&(delta_ms as i16).to_be_bytes());
    payload.push(if key_frame { KEY_FRAME_FLAG } else { 0x00 });
    payload.extend_from_slice(frame);

    let mut out = Vec::new();
    out.extend_from_slice(&ID_SIMPLE_BLOCK);
    encode_vint(payload.len() as u64, None, &mut out)?;
    out.extend_from_slice(&payload);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cluster_header_carries_unknown_size_and_timecode() {
        let bytes = build_cluster_header(66);
        assert_eq!(&bytes[0..4], &ID_CLUSTER);
        assert_eq!(&bytes[4..12], &[0x01, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);
        // Timecode ID + VINT(1) + single byte 66.
        assert_eq!(&bytes[12..], &[0xE7, 0x81, 66]);
    }

    #[test]
    fn simple_block_sets_key_frame_flag() {
        let block = build_simple_block(1, 0, true, &[0xAA, 0xBB]).unwrap();
        assert_eq!(&block[0..1], &ID_SIMPLE_BLOCK);
        // payload = track(1) + delta(2) + flags(1) + frame(2) = 6 bytes
        let flags_byte = block[block.len() - 3];
        assert_eq!(flags_byte & 0x80, 0x80);
    }

    #[test]
    fn delta_overflow_is_rejected() {
        let err = build_simple_block(1, 100_000, false, &[]).unwrap_err();
        assert!(matches!(err, MkvError::DeltaTimecodeOverflow(100_000)));
    }
}
