use crate::block::{Block, BlockReader};
use crate::error::Result;

/// A resizable byte buffer owned by a single node.
///
/// Reads past the end return zero so that fixed-layout headers shorter than the current
/// field set still decode; writes past the end grow the region.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ByteRegion {
    bytes: Vec<u8>,
}

macro_rules! region_accessors {
    ($($get:ident, $put:ident, $ty:ty, $from:ident, $to:ident);* $(;)?) => {
        $(
            pub fn $get(&self, index: usize) -> $ty {
                const N: usize = std::mem::size_of::<$ty>();
                let mut raw = [0u8; N];
                if let Some(src) = self.bytes.get(index..index + N) {
                    raw.copy_from_slice(src);
                }
                <$ty>::$from(raw)
            }

            pub fn $put(&mut self, index: usize, value: $ty) {
                const N: usize = std::mem::size_of::<$ty>();
                self.ensure_len(index + N);
                self.bytes[index..index + N].copy_from_slice(&value.$to());
            }
        )*
    };
}

impl ByteRegion {
    pub fn new(len: usize) -> Self {
        ByteRegion { bytes: vec![0; len] }
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        ByteRegion { bytes }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    /// Preserves the first `min(old, new)` bytes and zero-fills growth; negative lengths clamp to 0.
    pub fn resize(&mut self, new_len: i64) {
        let new_len = new_len.max(0) as usize;
        self.bytes.resize(new_len, 0);
    }

    fn ensure_len(&mut self, len: usize) {
        if self.bytes.len() < len {
            self.bytes.resize(len, 0);
        }
    }

    pub fn get_u8(&self, index: usize) -> u8 {
        self.bytes.get(index).copied().unwrap_or(0)
    }

    pub fn put_u8(&mut self, index: usize, value: u8) {
        self.ensure_len(index + 1);
        self.bytes[index] = value;
    }

    region_accessors! {
        get_u16_le, put_u16_le, u16, from_le_bytes, to_le_bytes;
        get_u16_be, put_u16_be, u16, from_be_bytes, to_be_bytes;
        get_u32_le, put_u32_le, u32, from_le_bytes, to_le_bytes;
        get_u32_be, put_u32_be, u32, from_be_bytes, to_be_bytes;
        get_u64_le, put_u64_le, u64, from_le_bytes, to_le_bytes;
        get_u64_be, put_u64_be, u64, from_be_bytes, to_be_bytes;
    }

    pub fn put_bytes(&mut self, index: usize, src: &[u8]) {
        self.ensure_len(index + src.len());
        self.bytes[index..index + src.len()].copy_from_slice(src);
    }
}

impl Block for ByteRegion {
    /// Fills the region's current length from the reader.
    fn read(&mut self, reader: &mut BlockReader<'_>) -> Result<()> {
        let src = reader.read_bytes(self.bytes.len())?;
        self.bytes.copy_from_slice(src);
        Ok(())
    }

    fn write(&self, out: &mut Vec<u8>) -> usize {
        out.extend_from_slice(&self.bytes);
        self.bytes.len()
    }

    fn count_bytes(&self) -> usize {
        self.bytes.len()
    }

    fn is_null(&self) -> bool {
        self.bytes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use proptest::prelude::*;

    #[test]
    fn endian_accessors() {
        let mut r = ByteRegion::new(8);
        r.put_u32_le(0, 0x1234_5678);
        r.put_u32_be(4, 0x1234_5678);
        assert_eq!(r.as_slice(), &[0x78, 0x56, 0x34, 0x12, 0x12, 0x34, 0x56, 0x78]);
        assert_eq!(r.get_u16_le(0), 0x5678);
        assert_eq!(r.get_u16_be(4), 0x1234);
        assert_eq!(r.get_u32_be(4), 0x1234_5678);
        // reading past the end yields zero instead of failing
        assert_eq!(r.get_u64_le(4), 0);
        r.put_u64_be(8, 1);
        assert_eq!(r.len(), 16);
        assert_eq!(r.get_u64_be(8), 1);
    }

    #[test]
    fn negative_resize_clamps() {
        let mut r = ByteRegion::from_bytes(vec![1, 2, 3]);
        r.resize(-5);
        assert!(r.is_empty());
        assert!(r.is_null());
    }

    #[test]
    fn read_reports_truncation() {
        let data = [1u8, 2, 3];
        let mut reader = BlockReader::new(&data);
        let mut r = ByteRegion::new(4);
        let e = r.read(&mut reader).unwrap_err();
        match e.kind() {
            ErrorKind::TruncatedInput { offset, needed, available } => {
                assert_eq!((*offset, *needed, *available), (0, 4, 3));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    proptest! {
        #[test]
        fn resize_preserves_prefix(initial in proptest::collection::vec(any::<u8>(), 0..64), new_len in -16i64..96) {
            let mut r = ByteRegion::from_bytes(initial.clone());
            r.resize(new_len);
            let expected_len = new_len.max(0) as usize;
            prop_assert_eq!(r.len(), expected_len);
            let keep = expected_len.min(initial.len());
            prop_assert_eq!(&r.as_slice()[..keep], &initial[..keep]);
            prop_assert!(r.as_slice()[keep..].iter().all(|b| *b == 0));
        }
    }
}
