//! LEB128 variable-length integers as used by DEX data items.

pub(crate) fn encode_uleb128(out: &mut Vec<u8>, value: u32) -> usize {
    let mut remaining = value;
    let mut count = 0;
    loop {
        let mut byte = (remaining & 0x7F) as u8;
        remaining >>= 7;
        if remaining != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        count += 1;
        if remaining == 0 {
            return count;
        }
    }
}

pub(crate) fn uleb128_size(value: u32) -> usize {
    let bits = 32 - value.leading_zeros() as usize;
    bits.max(1).div_ceil(7)
}

/// Decodes one value, or `None` when the input ends inside the encoding.
pub(crate) fn decode_uleb128(encoded: &[u8]) -> Option<(u32, usize)> {
    let mut value: u32 = 0;
    let mut shift: u32 = 0;
    for (i, &byte) in encoded.iter().enumerate() {
        if shift < 32 {
            value |= ((byte & 0x7F) as u32).wrapping_shl(shift);
        }
        shift += 7;
        // 32-bit values never need more than five bytes
        if byte & 0x80 == 0 || i == 4 {
            return Some((value, i + 1));
        }
    }
    None
}

pub(crate) fn encode_sleb128(out: &mut Vec<u8>, value: i32) -> usize {
    let mut remaining = value;
    let mut count = 0;
    loop {
        let mut byte = (remaining & 0x7F) as u8;
        remaining >>= 7;
        let done = (remaining == 0 && byte & 0x40 == 0) || (remaining == -1 && byte & 0x40 != 0);
        if !done {
            byte |= 0x80;
        }
        out.push(byte);
        count += 1;
        if done {
            return count;
        }
    }
}

pub(crate) fn decode_sleb128(encoded: &[u8]) -> Option<(i32, usize)> {
    let mut value: i32 = 0;
    let mut shift: u32 = 0;
    for (i, &byte) in encoded.iter().enumerate() {
        if shift < 32 {
            value |= ((byte & 0x7F) as i32).wrapping_shl(shift);
        }
        shift += 7;
        if byte & 0x80 == 0 || i == 4 {
            if byte & 0x40 != 0 && shift < 32 {
                value |= (-1i32).wrapping_shl(shift);
            }
            return Some((value, i + 1));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_uleb128() {
        let cases = vec![
            (0, vec![0x00]),
            (1, vec![0x01]),
            (127, vec![0x7F]),
            (128, vec![0x80, 0x01]),
            (16256, vec![0x80, 0x7F]),
            (624485, vec![0xE5, 0x8E, 0x26]),
            (u32::MAX, vec![0xFF, 0xFF, 0xFF, 0xFF, 0x0F]),
        ];

        for (value, expected) in cases {
            let mut out = vec![];
            assert_eq!(encode_uleb128(&mut out, value), expected.len());
            assert_eq!(out, expected, "encoding {value}");
            assert_eq!(uleb128_size(value), expected.len(), "size of {value}");
        }
    }

    #[test]
    fn test_decode_uleb128() {
        let cases = vec![
            (vec![0x00], 0),
            (vec![0x7F], 127),
            (vec![0x80, 0x01], 128),
            (vec![0xE5, 0x8E, 0x26, 0xAA], 624485),
        ];

        for (encoded, expected) in cases {
            let (v, _) = decode_uleb128(&encoded).unwrap();
            assert_eq!(v, expected);
        }
        assert_eq!(decode_uleb128(&[0x80, 0x80]), None);
        assert_eq!(decode_uleb128(&[]), None);
    }

    #[test]
    fn test_sleb128() {
        let cases = vec![
            (0, vec![0x00]),
            (1, vec![0x01]),
            (-1, vec![0x7F]),
            (127, vec![0xFF, 0x00]),
            (-128, vec![0x80, 0x7F]),
            (-123456, vec![0xC0, 0xBB, 0x78]),
        ];

        for (value, expected) in cases {
            let mut out = vec![];
            assert_eq!(encode_sleb128(&mut out, value), expected.len());
            assert_eq!(out, expected, "encoding {value}");
            assert_eq!(decode_sleb128(&expected), Some((value, expected.len())));
        }
    }
}
