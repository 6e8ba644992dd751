//! Codec-private-data builders: H.264 AVCDecoderConfigurationRecord, AAC
//! AudioSpecificConfig, PCM WAVEFORMATEX.

use super::MkvError;

/// AAC Audio Object Type for the sampling-frequency table below.
const AOT_LC: u8 = 2;

/// MPEG-4 audio sampling-frequency index table (ISO/IEC 14496-3 Table 1.16).
const AAC_SAMPLE_RATE_TABLE: [u32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

fn aac_sample_rate_index(rate: u32) -> Result<u8, MkvError> {
    AAC_SAMPLE_RATE_TABLE
        .iter()
        .position(|&r| r == rate)
        .map(|idx| idx as u8)
        .ok_or(MkvError::UnsupportedAacSampleRate(rate))
}

/// Builds a 2-byte AAC AudioSpecificConfig: 5b AOT | 4b freq-index | 4b
/// channel-config | 3b zero padding.
pub fn build_aac_audio_specific_config(sample_rate: u32, channels: u8) -> Result<[u8; 2], MkvError> {
    let freq_index = aac_sample_rate_index(sample_rate)?;
    let aot = AOT_LC;

    let bits: u16 = ((aot as u16) << 11) | ((freq_index as u16) << 7) | ((channels as u16) << 3);
    Ok(bits.to_be_bytes())
}

/// PCM format codes as used by KVS for G.711.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PcmFormat {
    ALaw,
    MuLaw,
}

impl PcmFormat {
    fn format_code(self) -> u16 {
        match self {
            PcmFormat::ALaw => 0x0006,
            PcmFormat::MuLaw => 0x0007,
        }
    }
}

/// Builds an 18-byte little-endian WAVEFORMATEX structure for G.711 audio.
pub fn build_pcm_codec_private(format: PcmFormat, sample_rate: u32, channels: u16) -> Result<[u8; 18], MkvError> {
    if !(8000..=192_000).contains(&sample_rate) {
        return Err(MkvError::UnsupportedPcmSampleRate(sample_rate));
    }

    let avg_bytes_per_sec = sample_rate * channels as u32;
    let block_align: u16 = channels;
    let bits_per_sample: u16 = 8;
    let cb_size: u16 = 0;

    let mut out = [0u8; 18];
    out[0..2].copy_from_slice(&format.format_code().to_le_bytes());
    out[2..4].copy_from_slice(&channels.to_le_bytes());
    out[4..8].copy_from_slice(&sample_rate.to_le_bytes());
    out[8..12].copy_from_slice(&avg_bytes_per_sec.to_le_bytes());
    out[12..14].copy_from_slice(&block_align.to_le_bytes());
    out[14..16].copy_from_slice(&bits_per_sample.to_le_bytes());
    out[16..18].copy_from_slice(&cb_size.to_le_bytes());
    Ok(out)
}

/// Builds an H.264 AVCDecoderConfigurationRecord from a single SPS/PPS pair
/// already in raw NAL form (no start code, no length prefix).
///
/// Layout: `01 | profile | profile_compat | level | 0xFF | 0xE1 | spsLen:16
/// | sps | 01 | ppsLen:16 | pps`.
pub fn build_h264_codec_private_data(sps: &[u8], pps: &[u8]) -> Result<Vec<u8>, MkvError> {
    if sps.len() < 3 {
        return Err(MkvError::SpsTruncated);
    }
    let profile_idc = sps[0];
    let profile_compat = sps[1];
    let level_idc = sps[2];

    let mut out = Vec::with_capacity(11 + sps.len() + pps.len());
    out.push(0x01);
    out.push(profile_idc);
    out.push(profile_compat);
    out.push(level_idc);
    out.push(0xFF); // reserved(6) | lengthSizeMinusOne(2) = 0b111111_11 -> 4-byte AVCC lengths
    out.push(0xE1); // reserved(3) | numOfSPS(5) = 1
    out.extend_from_slice(&(sps.len() as u16).to_be_bytes());
    out.extend_from_slice(sps);
    out.push(0x01); // numOfPPS
    out.extend_from_slice(&(pps.len() as u16).to_be_bytes());
    out.extend_from_slice(pps);
    Ok(out)
}
