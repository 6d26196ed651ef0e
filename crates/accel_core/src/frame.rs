//! Size bounds and frame header inspection.
//!
//! The device writes into caller memory without knowing its capacity. Before
//! dispatch the driver therefore checks destinations against the worst case
//! the device can produce: the codec's compressed-size bound for compression,
//! and the size declared in the frame for decompression.

use crate::AccelError;

const ZSTD_MAGIC: u32 = 0xFD2F_B528;
const ZSTD_SKIPPABLE_MASK: u32 = 0xFFFF_FFF0;
const ZSTD_SKIPPABLE_MAGIC: u32 = 0x184D_2A50;

/// Largest raw Snappy output for an input of `len` bytes.
pub fn snappy_max_compressed_len(len: usize) -> usize {
    32 + len + len / 6
}

/// Largest single-frame Zstd output for an input of `len` bytes.
pub fn zstd_compress_bound(len: usize) -> usize {
    const SMALL: usize = 128 << 10;
    let margin = if len < SMALL { (SMALL - len) >> 11 } else { 0 };
    len + (len >> 8) + margin
}

/// Uncompressed length declared in a raw Snappy block's varint preamble.
pub fn snappy_decompressed_len(src: &[u8]) -> Result<usize, AccelError> {
    let mut value: u64 = 0;
    for (i, &byte) in src.iter().take(5).enumerate() {
        value |= u64::from(byte & 0x7F) << (7 * i);
        if byte & 0x80 == 0 {
            return usize::try_from(value)
                .ok()
                .filter(|&len| len <= u32::MAX as usize)
                .ok_or(AccelError::MalformedFrame);
        }
    }
    Err(AccelError::MalformedFrame)
}

/// Content size declared in the header of the first Zstd frame of `src`.
///
/// # Returns
///
/// The declared size, [`AccelError::UnknownContentSize`] if the header omits
/// it, or [`AccelError::MalformedFrame`] if `src` does not start with a
/// complete Zstd frame header.
pub fn zstd_content_size(src: &[u8]) -> Result<u64, AccelError> {
    let magic = read_le(src, 0, 4)? as u32;
    if magic & ZSTD_SKIPPABLE_MASK == ZSTD_SKIPPABLE_MAGIC {
        return Err(AccelError::UnknownContentSize);
    }
    if magic != ZSTD_MAGIC {
        return Err(AccelError::MalformedFrame);
    }

    let descriptor = *src.get(4).ok_or(AccelError::MalformedFrame)?;
    if descriptor & 0x08 != 0 {
        // Reserved bit.
        return Err(AccelError::MalformedFrame);
    }
    let fcs_flag = descriptor >> 6;
    let single_segment = descriptor & 0x20 != 0;
    let dict_id_len = match descriptor & 0x03 {
        0 => 0,
        1 => 1,
        2 => 2,
        _ => 4,
    };

    let mut pos = 5;
    if !single_segment {
        pos += 1;
    }
    pos += dict_id_len;

    match (fcs_flag, single_segment) {
        (0, false) => Err(AccelError::UnknownContentSize),
        (0, true) => read_le(src, pos, 1),
        (1, _) => read_le(src, pos, 2).map(|v| v + 256),
        (2, _) => read_le(src, pos, 4),
        _ => read_le(src, pos, 8),
    }
}

fn read_le(src: &[u8], pos: usize, len: usize) -> Result<u64, AccelError> {
    let bytes = src.get(pos..pos + len).ok_or(AccelError::MalformedFrame)?;
    Ok(bytes
        .iter()
        .rev()
        .fold(0u64, |acc, &b| (acc << 8) | u64::from(b)))
}

/// Whether `[a, a + a_len)` and `[b, b + b_len)` share any byte.
pub fn ranges_overlap(a: u64, a_len: u64, b: u64, b_len: u64) -> bool {
    if a_len == 0 || b_len == 0 {
        return false;
    }
    a < b.saturating_add(b_len) && b < a.saturating_add(a_len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounds_cover_incompressible_input() {
        assert_eq!(snappy_max_compressed_len(0), 32);
        assert_eq!(snappy_max_compressed_len(600), 732);
        assert_eq!(zstd_compress_bound(0), 64);
        assert_eq!(zstd_compress_bound(1 << 20), (1 << 20) + (1 << 12));
    }

    #[test]
    fn test_snappy_varint_preamble() {
        assert_eq!(snappy_decompressed_len(&[0x00]), Ok(0));
        assert_eq!(snappy_decompressed_len(&[0x64, 0xFF]), Ok(100));
        assert_eq!(snappy_decompressed_len(&[0x80, 0x80, 0x40]), Ok(1 << 20));
        assert_eq!(snappy_decompressed_len(&[]), Err(AccelError::MalformedFrame));
        assert_eq!(
            snappy_decompressed_len(&[0xFF; 6]),
            Err(AccelError::MalformedFrame)
        );
    }

    #[test]
    fn test_zstd_single_segment_one_byte_size() {
        // Magic, FHD = single segment, FCS flag 0, then FCS = 0.
        let frame = [0x28, 0xB5, 0x2F, 0xFD, 0x20, 0x00, 0x01, 0x00, 0x00];
        assert_eq!(zstd_content_size(&frame), Ok(0));
    }

    #[test]
    fn test_zstd_two_byte_size_is_offset() {
        // FCS flag 1, window descriptor present.
        let frame = [0x28, 0xB5, 0x2F, 0xFD, 0x40, 0x50, 0x10, 0x00];
        assert_eq!(zstd_content_size(&frame), Ok(0x10 + 256));
    }

    #[test]
    fn test_zstd_four_byte_size_after_dict_id() {
        // FCS flag 2, single segment, 1-byte dictionary id.
        let frame = [0x28, 0xB5, 0x2F, 0xFD, 0xA1, 0x07, 0x00, 0x00, 0x10, 0x00];
        assert_eq!(zstd_content_size(&frame), Ok(0x0010_0000));
    }

    #[test]
    fn test_zstd_missing_size_and_bad_magic() {
        let no_size = [0x28, 0xB5, 0x2F, 0xFD, 0x00, 0x50];
        assert_eq!(
            zstd_content_size(&no_size),
            Err(AccelError::UnknownContentSize)
        );
        assert_eq!(
            zstd_content_size(&[0u8; 12]),
            Err(AccelError::MalformedFrame)
        );
        assert_eq!(
            zstd_content_size(&[0x28, 0xB5]),
            Err(AccelError::MalformedFrame)
        );
    }

    #[test]
    fn test_overlap_detection() {
        assert!(ranges_overlap(100, 10, 105, 10));
        assert!(!ranges_overlap(100, 10, 110, 10));
        assert!(!ranges_overlap(100, 0, 100, 10));
        assert!(ranges_overlap(200, 50, 100, 101));
    }
}
