//! Per-segment bitsets used for completion and pending-verification state.

/// One bit per segment (LSB of byte 0 = segment 0).
///
/// Only the first `ceil(segment_count/8)` bytes are significant when
/// serialized into a resume blob.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SegmentBitmap {
    bytes: Vec<u8>,
}

impl SegmentBitmap {
    /// Empty bitmap with room for `segment_count` bits.
    pub fn new(segment_count: usize) -> Self {
        SegmentBitmap {
            bytes: vec![0u8; segment_count.div_ceil(8)],
        }
    }

    /// Bitmap with every one of the `segment_count` bits set; padding bits stay clear.
    pub fn full(segment_count: usize) -> Self {
        let mut b = Self::new(segment_count);
        let full_bytes = segment_count / 8;
        b.bytes[..full_bytes].fill(0xFF);
        let remainder_bits = segment_count % 8;
        if remainder_bits > 0 {
            b.bytes[full_bytes] = (1u8 << remainder_bits) - 1;
        }
        b
    }

    /// Extra bytes are ignored; missing bytes are treated as 0.
    pub fn from_bytes(bytes: &[u8], segment_count: usize) -> Self {
        let len = segment_count.div_ceil(8);
        let mut b = vec![0u8; len];
        let copy = bytes.len().min(len);
        b[..copy].copy_from_slice(&bytes[..copy]);
        SegmentBitmap { bytes: b }
    }

    pub fn to_bytes(&self, segment_count: usize) -> Vec<u8> {
        let len = segment_count.div_ceil(8);
        self.bytes.get(..len).unwrap_or(&self.bytes).to_vec()
    }

    pub fn set(&mut self, index: usize) {
        let byte_idx = index / 8;
        if byte_idx >= self.bytes.len() {
            self.bytes.resize(byte_idx + 1, 0);
        }
        self.bytes[byte_idx] |= 1 << (index % 8);
    }

    pub fn is_set(&self, index: usize) -> bool {
        self.bytes
            .get(index / 8)
            .map(|&b| (b & (1 << (index % 8))) != 0)
            .unwrap_or(false)
    }

    /// Number of set bits among the first `segment_count`.
    pub fn count_set(&self, segment_count: usize) -> usize {
        (0..segment_count).filter(|&i| self.is_set(i)).count()
    }

    /// True if all segments in [0, segment_count) are set.
    pub fn all_set(&self, segment_count: usize) -> bool {
        self.count_set(segment_count) == segment_count
    }

    pub fn none_set(&self, segment_count: usize) -> bool {
        self.count_set(segment_count) == 0
    }
}
