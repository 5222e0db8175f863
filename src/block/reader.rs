use crate::dex::leb;
use crate::error::{BlockError, Result};

/// A cursor over a byte slice restricted to the window `[start, end)`.
///
/// Positions are absolute within the underlying slice so that nested readers report
/// file offsets in their errors.
#[derive(Clone, Debug)]
pub struct BlockReader<'a> {
    data: &'a [u8],
    pos: usize,
    start: usize,
    end: usize,
}

impl<'a> BlockReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        BlockReader { data, pos: 0, start: 0, end: data.len() }
    }

    /// A reader over `[start, start + len)`, clamped to this reader's window.
    pub fn create(&self, start: usize, len: usize) -> BlockReader<'a> {
        let start = start.clamp(self.start, self.end);
        let end = start.saturating_add(len).min(self.end);
        BlockReader { data: self.data, pos: start, start, end }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn end(&self) -> usize {
        self.end
    }

    pub fn remaining(&self) -> usize {
        self.end.saturating_sub(self.pos)
    }

    pub fn is_available(&self) -> bool {
        self.pos < self.end
    }

    /// The whole underlying slice, used by formats that hash or checksum their input.
    pub fn source(&self) -> &'a [u8] {
        self.data
    }

    fn check(&self, needed: usize) -> Result<()> {
        if needed > self.remaining() {
            return Err(BlockError::truncated(self.pos, needed, self.remaining()));
        }
        Ok(())
    }

    /// Runs `f` on a sub-reader limited to the next `len` bytes, then moves this reader
    /// to the end of that window whether or not `f` succeeded.
    pub fn bounded<T, F>(&mut self, len: usize, f: F) -> Result<T>
    where
        F: FnOnce(&mut BlockReader<'a>) -> Result<T>,
    {
        let end = self.pos.saturating_add(len).min(self.end);
        let mut sub = BlockReader { data: self.data, pos: self.pos, start: self.pos, end };
        let result = f(&mut sub);
        self.pos = end;
        result
    }

    pub fn seek(&mut self, position: usize) -> Result<()> {
        if position < self.start || position > self.end {
            return Err(BlockError::truncated(position, 0, 0)
                .with_context(format!("seek outside [{}, {})", self.start, self.end)));
        }
        self.pos = position;
        Ok(())
    }

    pub fn skip(&mut self, count: usize) -> Result<()> {
        self.check(count)?;
        self.pos += count;
        Ok(())
    }

    /// Skips padding up to the next absolute multiple of `alignment`, stopping at the window end.
    pub fn align(&mut self, alignment: usize) {
        let pad = crate::block::padding(self.pos, alignment);
        self.pos = (self.pos + pad).min(self.end);
    }

    pub fn read_bytes(&mut self, count: usize) -> Result<&'a [u8]> {
        self.check(count)?;
        let slice = &self.data[self.pos..self.pos + count];
        self.pos += count;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let b = self.read_bytes(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_u32_be(&mut self) -> Result<u32> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let b = self.read_bytes(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(u64::from_le_bytes(raw))
    }

    pub fn peek_u16(&self) -> Result<u16> {
        self.check(2)?;
        Ok(u16::from_le_bytes([self.data[self.pos], self.data[self.pos + 1]]))
    }

    pub fn peek_u32(&self) -> Result<u32> {
        self.check(4)?;
        let p = self.pos;
        Ok(u32::from_le_bytes([self.data[p], self.data[p + 1], self.data[p + 2], self.data[p + 3]]))
    }

    pub fn read_uleb128(&mut self) -> Result<u32> {
        let window = &self.data[self.pos..self.end];
        let (value, size) = leb::decode_uleb128(window)
            .ok_or_else(|| BlockError::truncated(self.pos, 1, window.len()).with_context("uleb128"))?;
        self.pos += size;
        Ok(value)
    }

    pub fn read_sleb128(&mut self) -> Result<i32> {
        let window = &self.data[self.pos..self.end];
        let (value, size) = leb::decode_sleb128(window)
            .ok_or_else(|| BlockError::truncated(self.pos, 1, window.len()).with_context("sleb128"))?;
        self.pos += size;
        Ok(value)
    }

    /// Reads a uleb128p1 value; `-1` comes back as `0xFFFF_FFFF`.
    pub fn read_uleb128p1(&mut self) -> Result<u32> {
        Ok(self.read_uleb128()?.wrapping_sub(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_reader_cannot_escape_and_always_releases() {
        let data: Vec<u8> = (0u8..16).collect();
        let mut reader = BlockReader::new(&data);
        reader.skip(2).unwrap();
        let err = reader
            .bounded(4, |sub| {
                assert_eq!(sub.read_u16()?, 0x0302);
                sub.read_u32()
            })
            .unwrap_err();
        assert!(err.to_string().contains("truncated"), "{err}");
        // the parent moved past the window even though the child failed
        assert_eq!(reader.position(), 6);
        assert_eq!(reader.read_u8().unwrap(), 6);
    }

    #[test]
    fn create_clamps_to_parent() {
        let data = [0u8; 10];
        let reader = BlockReader::new(&data);
        let sub = reader.create(8, 100);
        assert_eq!((sub.start(), sub.end(), sub.remaining()), (8, 10, 2));
    }

    #[test]
    fn align_is_absolute_and_stops_at_end() {
        let data = [0u8; 6];
        let mut reader = BlockReader::new(&data);
        reader.skip(1).unwrap();
        reader.align(4);
        assert_eq!(reader.position(), 4);
        reader.skip(1).unwrap();
        reader.align(4);
        assert_eq!(reader.position(), 6);
    }

    #[test]
    fn leb_reads() {
        let data = [0xE5, 0x8E, 0x26, 0x00, 0x7F];
        let mut reader = BlockReader::new(&data);
        assert_eq!(reader.read_uleb128().unwrap(), 624_485);
        assert_eq!(reader.read_uleb128p1().unwrap(), 0xFFFF_FFFF);
        assert_eq!(reader.read_sleb128().unwrap(), -1);
        assert!(reader.read_uleb128().is_err());
    }
}
