//! Raw PCM byte manipulation for LPCM sinks.
//!
//! LPCM over http-get is network (big-endian) byte order. Little-endian
//! sources get their 2/3/4-byte sample groups swapped in place, and
//! 24-bit streams negotiated as DLNA packed LPCM are repacked 12 bytes
//! (two stereo frames) at a time.

use crate::config::L24Format;
use crate::stream::Endianness;

/// Swaps every full `bytes_per_sample` group in place.
///
/// Returns the number of bytes processed; a trailing partial group is left
/// untouched for the caller to carry into the next chunk.
pub fn swap_endianness(data: &mut [u8], bytes_per_sample: usize) -> usize {
    let usable = (data.len() / bytes_per_sample) * bytes_per_sample;
    for group in data[..usable].chunks_exact_mut(bytes_per_sample) {
        group.reverse();
    }
    usable
}

/// Repacks 24-bit samples into the DLNA packed-LPCM layout, in place.
///
/// Input is groups of 12 bytes (4 samples: L0 R0 L1 R1, 3 bytes each).
/// Output per group: the top two bytes of each sample first
/// (L0T L0M R0T R0M L1T L1M R1T R1M), then the four low bytes
/// (L0B R0B L1B R1B). Little-endian sources are byte-reversed per sample
/// during the repack. Returns the number of bytes processed.
pub fn repack_l24_lpcm(data: &mut [u8], src: Endianness) -> usize {
    let usable = (data.len() / 12) * 12;
    let mut sample = [0u8; 12];

    for group in data[..usable].chunks_exact_mut(12) {
        // normalize the four samples to big-endian order first
        if src == Endianness::Little {
            for j in (0..12).step_by(3) {
                sample[j] = group[j + 2];
                sample[j + 1] = group[j + 1];
                sample[j + 2] = group[j];
            }
        } else {
            sample.copy_from_slice(group);
        }

        // top+mid bytes of L0 R0 L1 R1, then the low bytes
        group[0] = sample[0];
        group[1] = sample[1];
        group[2] = sample[3];
        group[3] = sample[4];
        group[4] = sample[6];
        group[5] = sample[7];
        group[6] = sample[9];
        group[7] = sample[10];
        group[8] = sample[2];
        group[9] = sample[5];
        group[10] = sample[8];
        group[11] = sample[11];
    }

    usable
}

/// Applies the LPCM output transform for one chunk, in place.
///
/// Returns the number of bytes now ready to serve; the remainder is a
/// partial sample group the caller must retain until more data arrives.
pub fn prepare_lpcm(
    data: &mut [u8],
    sample_size: u8,
    l24_format: L24Format,
    src: Endianness,
) -> usize {
    match (sample_size, l24_format) {
        (24, L24Format::PackedLpcm) => repack_l24_lpcm(data, src),
        (16 | 32, _) | (24, L24Format::Packed) => {
            if src == Endianness::Little {
                swap_endianness(data, usize::from(sample_size) / 8)
            } else {
                data.len()
            }
        }
        // 8-bit and truncated streams pass through
        _ => data.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swap_16_bit_groups() {
        let mut data = vec![0x01, 0x02, 0x03, 0x04, 0x05];
        let n = swap_endianness(&mut data, 2);
        assert_eq!(n, 4);
        assert_eq!(data, vec![0x02, 0x01, 0x04, 0x03, 0x05]);
    }

    #[test]
    fn swap_24_bit_groups() {
        let mut data = vec![0x01, 0x02, 0x03, 0x04, 0x05, 0x06];
        let n = swap_endianness(&mut data, 3);
        assert_eq!(n, 6);
        assert_eq!(data, vec![0x03, 0x02, 0x01, 0x06, 0x05, 0x04]);
    }

    #[test]
    fn l24_repack_from_big_endian_source() {
        // L0=010203 R0=040506 L1=070809 R1=0a0b0c
        let mut data: Vec<u8> = (1..=12).collect();
        let n = repack_l24_lpcm(&mut data, Endianness::Big);
        assert_eq!(n, 12);
        assert_eq!(
            data,
            vec![0x01, 0x02, 0x04, 0x05, 0x07, 0x08, 0x0a, 0x0b, 0x03, 0x06, 0x09, 0x0c]
        );
    }

    #[test]
    fn l24_repack_from_little_endian_source() {
        // same samples, bytes reversed within each: L0=030201 etc.
        let mut data = vec![0x03, 0x02, 0x01, 0x06, 0x05, 0x04, 0x09, 0x08, 0x07, 0x0c, 0x0b, 0x0a];
        let n = repack_l24_lpcm(&mut data, Endianness::Little);
        assert_eq!(n, 12);
        assert_eq!(
            data,
            vec![0x01, 0x02, 0x04, 0x05, 0x07, 0x08, 0x0a, 0x0b, 0x03, 0x06, 0x09, 0x0c]
        );
    }

    #[test]
    fn repack_leaves_partial_group() {
        let mut data: Vec<u8> = (1..=15).collect();
        let n = repack_l24_lpcm(&mut data, Endianness::Big);
        assert_eq!(n, 12);
        assert_eq!(&data[12..], &[13, 14, 15]);
    }

    #[test]
    fn prepare_big_endian_source_is_pass_through() {
        let mut data = vec![1, 2, 3, 4];
        let n = prepare_lpcm(&mut data, 16, L24Format::PackedLpcm, Endianness::Big);
        assert_eq!(n, 4);
        assert_eq!(data, vec![1, 2, 3, 4]);
    }

    #[test]
    fn prepare_dispatches_by_sample_size() {
        let mut data = vec![1, 2, 3, 4];
        let n = prepare_lpcm(&mut data, 16, L24Format::PackedLpcm, Endianness::Little);
        assert_eq!(n, 4);
        assert_eq!(data, vec![2, 1, 4, 3]);

        let mut data: Vec<u8> = (1..=12).collect();
        let n = prepare_lpcm(&mut data, 24, L24Format::Packed, Endianness::Little);
        assert_eq!(n, 12);
        assert_eq!(data[0..3], [3, 2, 1]);
    }
}
