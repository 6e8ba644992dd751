//! H.264 Sequence Parameter Set parsing — extracts coded resolution.
//!
//! Bit-for-bit port of the original SDK's exponential-Golomb reader
//! (profile_idc gate, crop-unit table, width/height formulas); kept exact
//! because resolution extraction is a testable property end to end.

use super::MkvError;

struct BitReader<'a> {
    buf: &'a [u8],
    bit_pos: usize,
}

impl<'a> BitReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        BitReader { buf, bit_pos: 0 }
    }

    fn read_bit(&mut self) -> Result<u32, MkvError> {
        let index = self.bit_pos / 8;
        let offset = self.bit_pos % 8 + 1;
        let byte = *self.buf.get(index).ok_or(MkvError::SpsTruncated)?;
        self.bit_pos += 1;
        Ok(((byte >> (8 - offset)) & 0x01) as u32)
    }

    fn read_bits(&mut self, n: u32) -> Result<u32, MkvError> {
        let mut r = 0u32;
        for i in 0..n {
            r |= self.read_bit()? << (n - i - 1);
        }
        Ok(r)
    }

    fn read_ue(&mut self) -> Result<u32, MkvError> {
        let mut zeros = 0u32;
        while self.read_bit()? == 0 && zeros < 32 {
            zeros += 1;
        }
        let suffix = self.read_bits(zeros)?;
        Ok(suffix + (1 << zeros) - 1)
    }

    fn read_se(&mut self) -> Result<i32, MkvError> {
        let code = self.read_ue()? as i32;
        Ok(if code & 1 != 0 { (code + 1) / 2 } else { -(code / 2) })
    }
}

/// Profile IDs that carry the chroma_format_idc / scaling-list extension,
/// per ITU-T H.264 §7.4.2.1.1.
const EXTENDED_CHROMA_PROFILES: [u32; 13] = [
    100, 110, 122, 244, 44, 83, 86, 118, 128, 138, 139, 134, 135,
];

/// Extracts `(width, height)` in pixels from a raw (already Annex-B/AVCC
/// escaped-byte-stripped) SPS NAL payload, starting at the profile_idc byte
/// (i.e. the NAL header byte must already be stripped by the caller).
pub fn h264_video_resolution(sps: &[u8]) -> Result<(u16, u16), MkvError> {
    let mut bits = BitReader::new(sps);

    let profile_idc = bits.read_bits(8)?;
    let _constraint_flags = bits.read_bits(8)?;
    let _level_idc = bits.read_bits(8)?;
    let _seq_parameter_set_id = bits.read_ue()?;

    let mut chroma_format_idc = 1u32;
    if EXTENDED_CHROMA_PROFILES.contains(&profile_idc) {
        chroma_format_idc = bits.read_ue()?;
        if chroma_format_idc == 3 {
            let _residual_colour_transform_flag = bits.read_bit()?;
        }
        let _bit_depth_luma_minus8 = bits.read_ue()?;
        let _bit_depth_chroma_minus8 = bits.read_ue()?;
        let _qpprime_y_zero_transform_bypass_flag = bits.read_bit()?;

        let seq_scaling_matrix_present_flag = bits.read_bit()?;
        if seq_scaling_matrix_present_flag != 0 {
            for i in 0..8 {
                let seq_scaling_list_present_flag = bits.read_bit()?;
                if seq_scaling_list_present_flag != 0 {
                    let size_of_scaling_list = if i < 6 { 16 } else { 64 };
                    let mut last_scale = 8i32;
                    let mut next_scale = 8i32;
                    for _ in 0..size_of_scaling_list {
                        if next_scale != 0 {
                            let delta_scale = bits.read_se()?;
                            next_scale = (last_scale + delta_scale + 256) % 256;
                        }
                        last_scale = if next_scale == 0 { last_scale } else { next_scale };
                    }
                }
            }
        }
    }

    let _log2_max_frame_num_minus4 = bits.read_ue()?;
    let pic_order_cnt_type = bits.read_ue()?;
    if pic_order_cnt_type == 0 {
        let _log2_max_pic_order_cnt_lsb_minus4 = bits.read_ue()?;
    } else if pic_order_cnt_type == 1 {
        let _delta_pic_order_always_zero_flag = bits.read_bit()?;
        let _offset_for_non_ref_pic = bits.read_se()?;
        let _offset_for_top_to_bottom_field = bits.read_se()?;
        let num_ref_frames_in_pic_order_cnt_cycle = bits.read_ue()?;
        for _ in 0..num_ref_frames_in_pic_order_cnt_cycle {
            let _ = bits.read_se()?;
        }
    }

    let _max_num_ref_frames = bits.read_ue()?;
    let _gaps_in_frame_num_value_allowed_flag = bits.read_bit()?;
    let pic_width_in_mbs_minus1 = bits.read_ue()?;
    let pic_height_in_map_units_minus1 = bits.read_ue()?;
    let frame_mbs_only_flag = bits.read_bit()?;
    if frame_mbs_only_flag == 0 {
        let _mb_adaptive_frame_field_flag = bits.read_bit()?;
    }
    let _direct_8x8_inference_flag = bits.read_bit()?;

    let mut crop_unit_x = 0i32;
    let mut crop_unit_y = 0i32;
    let mut left = 0i32;
    let mut right = 0i32;
    let mut top = 0i32;
    let mut bottom = 0i32;

    let frame_cropping_flag = bits.read_bit()?;
    if frame_cropping_flag != 0 {
        left = bits.read_ue()? as i32;
        right = bits.read_ue()? as i32;
        top = bits.read_ue()? as i32;
        bottom = bits.read_ue()? as i32;

        match chroma_format_idc {
            0 => {
                crop_unit_x = 1;
                crop_unit_y = 2 - frame_mbs_only_flag as i32;
            }
            1 => {
                crop_unit_x = 2;
                crop_unit_y = 2 * (2 - frame_mbs_only_flag as i32);
            }
            2 => {
                crop_unit_x = 2;
                crop_unit_y = 2 - frame_mbs_only_flag as i32;
            }
            _ => {
                crop_unit_x = 1;
                crop_unit_y = 2 - frame_mbs_only_flag as i32;
            }
        }
    }

    let width = ((pic_width_in_mbs_minus1 as i32 + 1) * 16) - crop_unit_x * (left + right);
    let height = ((2 - frame_mbs_only_flag as i32) * (pic_height_in_map_units_minus1 as i32 + 1) * 16)
        - crop_unit_y * (top + bottom);

    Ok((width as u16, height as u16))
}
