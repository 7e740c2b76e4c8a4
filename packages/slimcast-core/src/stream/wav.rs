//! RIFF/WAVE header synthesis for raw PCM streams.
//!
//! The source arrives headerless; renderers negotiating `audio/wav` expect
//! a RIFF header up front. Sizes carry a sentinel total length since the
//! real length is unknown while streaming.

/// Size of the synthesized header.
pub const WAV_HEADER_LEN: usize = 44;

/// Builds a 44-byte canonical RIFF/WAVE header.
///
/// `total_len` is the sentinel full-file length (the configured
/// `stream_length`); chunk sizes are derived from it so renderers treat
/// the stream as one long file instead of short-reading.
#[must_use]
pub fn build_wav_header(sample_rate: u32, channels: u16, bits_per_sample: u16, total_len: u32) -> Vec<u8> {
    let byte_rate = sample_rate * u32::from(channels) * u32::from(bits_per_sample) / 8;
    let block_align = channels * bits_per_sample / 8;
    let riff_size = total_len.saturating_sub(8);
    let data_size = total_len.saturating_sub(WAV_HEADER_LEN as u32);

    let mut header = Vec::with_capacity(WAV_HEADER_LEN);
    header.extend_from_slice(b"RIFF");
    header.extend_from_slice(&riff_size.to_le_bytes());
    header.extend_from_slice(b"WAVE");
    header.extend_from_slice(b"fmt ");
    header.extend_from_slice(&16u32.to_le_bytes()); // PCM fmt chunk size
    header.extend_from_slice(&1u16.to_le_bytes()); // PCM format tag
    header.extend_from_slice(&channels.to_le_bytes());
    header.extend_from_slice(&sample_rate.to_le_bytes());
    header.extend_from_slice(&byte_rate.to_le_bytes());
    header.extend_from_slice(&block_align.to_le_bytes());
    header.extend_from_slice(&bits_per_sample.to_le_bytes());
    header.extend_from_slice(b"data");
    header.extend_from_slice(&data_size.to_le_bytes());
    header
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout_is_canonical() {
        let h = build_wav_header(44_100, 2, 16, 1_000_000_000);
        assert_eq!(h.len(), WAV_HEADER_LEN);
        assert_eq!(&h[0..4], b"RIFF");
        assert_eq!(&h[8..12], b"WAVE");
        assert_eq!(&h[12..16], b"fmt ");
        assert_eq!(&h[36..40], b"data");

        // fmt fields
        assert_eq!(u16::from_le_bytes([h[20], h[21]]), 1); // PCM
        assert_eq!(u16::from_le_bytes([h[22], h[23]]), 2); // channels
        assert_eq!(u32::from_le_bytes([h[24], h[25], h[26], h[27]]), 44_100);
        assert_eq!(u32::from_le_bytes([h[28], h[29], h[30], h[31]]), 176_400); // byte rate
        assert_eq!(u16::from_le_bytes([h[32], h[33]]), 4); // block align
        assert_eq!(u16::from_le_bytes([h[34], h[35]]), 16);
    }

    #[test]
    fn sentinel_sizes_are_consistent() {
        let total = 1_000_000_000u32;
        let h = build_wav_header(48_000, 2, 24, total);
        let riff = u32::from_le_bytes([h[4], h[5], h[6], h[7]]);
        let data = u32::from_le_bytes([h[40], h[41], h[42], h[43]]);
        assert_eq!(riff, total - 8);
        assert_eq!(data, total - 44);
    }
}
