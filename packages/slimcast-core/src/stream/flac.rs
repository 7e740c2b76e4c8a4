//! FLAC stream header synthesis.
//!
//! LMS can deliver a raw FLAC bitstream with no `fLaC` marker (mid-stream
//! join, or a server that strips metadata). Renderers refuse such streams,
//! so the first frame header is inspected and a minimal metadata prefix is
//! synthesized: magic, a STREAMINFO block with the frame's parameters, and
//! a static Vorbis comment block.

use crate::config::FlacHeaderMode;

/// Minimum bytes of stream needed before the first-frame probe runs.
pub const FLAC_RECV_MIN: usize = 128;

/// Sample rates by the 4-bit frame-header code. 0 entries are "get from
/// STREAMINFO" or reserved codes the probe cannot resolve.
const CODED_RATES: [u32; 16] = [
    0, 88_200, 176_400, 192_000, 8_000, 16_000, 22_050, 24_000, 32_000, 44_100, 48_000, 96_000,
    0, 0, 0, 0,
];

/// Channel counts by the 4-bit channel-assignment code (8..=10 are the
/// stereo decorrelation modes).
const CODED_CHANNELS: [u8; 16] = [1, 2, 3, 4, 5, 6, 7, 8, 2, 2, 2, 0, 0, 0, 0, 0];

/// Bits per sample by the 3-bit sample-size code.
const CODED_SAMPLE_SIZE: [u8; 8] = [0, 8, 12, 0, 16, 20, 24, 0];

/// Vorbis comment metadata block (last-block flag set): vendor string
/// "reference libFLAC 1.2.1 20070917", zero comments.
const VORBIS_BLOCK: [u8; 44] = [
    0x84, 0x00, 0x00, 0x28, 0x20, 0x00, 0x00, 0x00, 0x72, 0x65, 0x66, 0x65, 0x72, 0x65, 0x6E,
    0x63, 0x65, 0x20, 0x6C, 0x69, 0x62, 0x46, 0x4C, 0x41, 0x43, 0x20, 0x31, 0x2E, 0x32, 0x2E,
    0x31, 0x20, 0x32, 0x30, 0x30, 0x37, 0x30, 0x39, 0x31, 0x37, 0x00, 0x00, 0x00, 0x00,
];

/// Total-sample count claimed by [`FlacHeaderMode::Full`] headers.
const FULL_TOTAL_SAMPLES: u64 = 0xffff_ffff;

/// Parameters recovered from the first frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameParams {
    pub sample_rate: u32,
    pub channels: u8,
    pub sample_size: u8,
    /// Fixed block size in samples; 0 when the stream uses variable
    /// blocking or an undeterminable code.
    pub block_size: u16,
}

/// Decodes the 4-bit block-size code for fixed-blocking streams.
fn decode_block_size(code: u8) -> u16 {
    match code {
        0x01 => 192,
        0x02..=0x05 => 576 * (1 << (code - 2)),
        // 0x06/0x07 take the size from the frame tail; not knowable here
        0x06 | 0x07 => 0,
        0x08..=0x0f => 256 * (1 << (code - 8)),
        _ => 0,
    }
}

/// Probes the start of the bitstream for a FLAC frame header.
///
/// Returns `None` when the bytes do not begin with a frame sync code, or
/// when the frame encodes parameters only resolvable from a STREAMINFO we
/// do not have.
#[must_use]
pub fn parse_frame_header(data: &[u8]) -> Option<FrameParams> {
    if data.len() < 4 {
        return None;
    }
    // sync code 11111111 111110xx
    if data[0] != 0xff || (data[1] & 0xf8) != 0xf8 {
        return None;
    }

    let variable_block = data[1] & 0x01 != 0;
    let block_code = data[2] >> 4;
    let rate_code = data[2] & 0x0f;
    let channel_code = data[3] >> 4;
    let size_code = (data[3] >> 1) & 0x07;

    let sample_rate = CODED_RATES[rate_code as usize];
    let channels = CODED_CHANNELS[channel_code as usize];
    let sample_size = CODED_SAMPLE_SIZE[size_code as usize];
    if sample_rate == 0 || channels == 0 || sample_size == 0 {
        return None;
    }

    let block_size = if variable_block { 0 } else { decode_block_size(block_code) };

    Some(FrameParams { sample_rate, channels, sample_size, block_size })
}

/// Builds the synthesized prefix: magic + STREAMINFO + Vorbis comment.
///
/// Returns `None` for [`FlacHeaderMode::No`].
#[must_use]
pub fn build_flac_header(mode: FlacHeaderMode, params: &FrameParams) -> Option<Vec<u8>> {
    if mode == FlacHeaderMode::No {
        return None;
    }

    let total_samples: u64 = match mode {
        FlacHeaderMode::Full => FULL_TOTAL_SAMPLES,
        _ => 0,
    };
    let md5: u8 = match mode {
        FlacHeaderMode::Full => 0xaa,
        _ => 0x00,
    };

    let mut streaminfo = [0u8; 34];
    // min/max block size: the frame's fixed size, or 0 for variable blocking
    streaminfo[0..2].copy_from_slice(&params.block_size.to_be_bytes());
    streaminfo[2..4].copy_from_slice(&params.block_size.to_be_bytes());
    // min/max frame size stay 0 (unknown)

    // 20 bits rate | 3 bits channels-1 | 5 bits bits-1 | 36 bits total samples
    let combo: u64 = (u64::from(params.sample_rate) << 44)
        | (u64::from(params.channels - 1) << 41)
        | (u64::from(params.sample_size - 1) << 36)
        | total_samples;
    streaminfo[10..18].copy_from_slice(&combo.to_be_bytes());
    streaminfo[18..34].fill(md5);

    let mut header = Vec::with_capacity(4 + 4 + 34 + VORBIS_BLOCK.len());
    header.extend_from_slice(b"fLaC");
    // STREAMINFO block header: type 0, not last, 24-bit length
    header.extend_from_slice(&[0x00, 0x00, 0x00, 34]);
    header.extend_from_slice(&streaminfo);
    header.extend_from_slice(&VORBIS_BLOCK);
    Some(header)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 44.1 kHz (code 9), stereo (code 1), 16-bit (code 4), 4096-sample
    /// fixed blocks (code 12).
    fn fixed_frame() -> [u8; 4] {
        [0xff, 0xf8, 0xc9, 0x18]
    }

    #[test]
    fn probe_decodes_fixed_block_frame() {
        let params = parse_frame_header(&fixed_frame()).unwrap();
        assert_eq!(params.sample_rate, 44_100);
        assert_eq!(params.channels, 2);
        assert_eq!(params.sample_size, 16);
        assert_eq!(params.block_size, 4096);
    }

    #[test]
    fn probe_rejects_non_frame_bytes() {
        assert_eq!(parse_frame_header(b"fLaC"), None);
        assert_eq!(parse_frame_header(&[0xff, 0xf8]), None);
        // reserved rate code
        assert_eq!(parse_frame_header(&[0xff, 0xf8, 0xcf, 0x18]), None);
    }

    #[test]
    fn variable_block_strategy_yields_zero_block_size() {
        let mut frame = fixed_frame();
        frame[1] |= 0x01;
        let params = parse_frame_header(&frame).unwrap();
        assert_eq!(params.block_size, 0);
    }

    #[test]
    fn block_size_code_table() {
        assert_eq!(decode_block_size(0x01), 192);
        assert_eq!(decode_block_size(0x02), 576);
        assert_eq!(decode_block_size(0x05), 4608);
        assert_eq!(decode_block_size(0x06), 0);
        assert_eq!(decode_block_size(0x08), 256);
        assert_eq!(decode_block_size(0x0c), 4096);
        assert_eq!(decode_block_size(0x0f), 32_768);
    }

    #[test]
    fn header_carries_magic_streaminfo_and_vorbis() {
        let params = parse_frame_header(&fixed_frame()).unwrap();
        let header = build_flac_header(FlacHeaderMode::Normal, &params).unwrap();

        assert_eq!(&header[0..4], b"fLaC");
        // STREAMINFO block: type 0, length 34
        assert_eq!(&header[4..8], &[0x00, 0x00, 0x00, 34]);
        // min/max block size
        assert_eq!(&header[8..10], &4096u16.to_be_bytes());
        assert_eq!(&header[10..12], &4096u16.to_be_bytes());
        // rate/channels/bits combo: 44100<<12 | 1<<9 | 15<<4 as the top 32 bits
        let combo = u32::from_be_bytes([header[18], header[19], header[20], header[21]]);
        assert_eq!(combo >> 12, 44_100);
        assert_eq!((combo >> 9) & 0x07, 1);
        assert_eq!((combo >> 4) & 0x1f, 15);
        // vorbis block is last
        let vorbis_off = 4 + 4 + 34;
        assert_eq!(header[vorbis_off], 0x84);
        assert_eq!(header.len(), vorbis_off + 44);
    }

    #[test]
    fn full_mode_claims_total_samples() {
        let params = parse_frame_header(&fixed_frame()).unwrap();
        let header = build_flac_header(FlacHeaderMode::Full, &params).unwrap();
        // bottom 32 bits of the 36-bit sample count
        let count =
            u32::from_be_bytes([header[22], header[23], header[24], header[25]]);
        assert_eq!(count, 0xffff_ffff);
        // MD5 filler distinguishes the full header
        assert_eq!(header[26], 0xaa);
    }

    #[test]
    fn no_mode_synthesizes_nothing() {
        let params = parse_frame_header(&fixed_frame()).unwrap();
        assert!(build_flac_header(FlacHeaderMode::No, &params).is_none());
    }
}
