use crate::block::{AlignItem, Block, BlockReader, ByteRegion};
use crate::chunk::ChunkType;
use crate::error::{BlockError, Result};
use log::debug;

/// Size of the `{type, header_size, chunk_size}` prefix shared by every chunk.
pub const CHUNK_HEADER_SIZE: usize = 8;

/// The common chunk prefix as read from input, plus the absolute position it was read at.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChunkHeader {
    pub chunk_type: u16,
    pub header_size: u16,
    pub chunk_size: u32,
    pub start: usize,
}

impl ChunkHeader {
    /// Reads and sanity-checks the prefix; the reader is left just after it.
    pub fn read(reader: &mut BlockReader<'_>) -> Result<ChunkHeader> {
        let start = reader.position();
        let available = reader.remaining();
        let chunk_type = reader.read_u16()?;
        let header_size = reader.read_u16()?;
        let chunk_size = reader.read_u32()?;
        if (header_size as usize) < CHUNK_HEADER_SIZE || chunk_size < header_size as u32 {
            fail!(
                ("invalid chunk sizing: header {header_size}, chunk {chunk_size}"),
                ("chunk 0x{chunk_type:04x} at offset {start}")
            );
        }
        if chunk_size as usize > available {
            return Err(BlockError::truncated(start, chunk_size as usize, available)
                .with_context(format!("chunk 0x{chunk_type:04x}")));
        }
        Ok(ChunkHeader { chunk_type, header_size, chunk_size, start })
    }

    pub fn end(&self) -> usize {
        self.start + self.chunk_size as usize
    }

    pub fn write(&self, out: &mut Vec<u8>) -> usize {
        out.extend_from_slice(&self.chunk_type.to_le_bytes());
        out.extend_from_slice(&self.header_size.to_le_bytes());
        out.extend_from_slice(&self.chunk_size.to_le_bytes());
        CHUNK_HEADER_SIZE
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ChunkState {
    #[default]
    Unloaded,
    ReadingHeader,
    ReadingBody,
    Loaded,
}

/// The per-type part of a chunk.
///
/// Header fields are the fixed values after the 8-byte prefix; the body is everything
/// after the header. Hooks run in the order `refresh_body`, `on_refreshed`.
pub trait ChunkBody: Default {
    fn type_tag(&self) -> u16;

    fn accepts(&self, tag: u16) -> bool {
        tag == self.type_tag()
    }

    fn header_fields_size(&self) -> usize {
        0
    }

    /// `fields` holds the header bytes after the prefix; reads past its end yield zero.
    fn read_header_fields(&mut self, _fields: &ByteRegion) -> Result<()> {
        Ok(())
    }

    fn write_header_fields(&self, _out: &mut Vec<u8>) -> usize {
        0
    }

    fn read_body(&mut self, reader: &mut BlockReader<'_>, header: &ChunkHeader) -> Result<()>;

    fn write_body(&self, out: &mut Vec<u8>) -> usize;

    fn count_body_bytes(&self) -> usize;

    fn refresh_body(&mut self) {}

    /// Called once the header length is final, to place header fields that point into the body.
    fn on_refreshed(&mut self, _header_size: usize) {}
}

/// A typed header, its body and the trailing alignment.
#[derive(Clone, Debug, Default)]
pub struct Chunk<B> {
    header: ChunkHeader,
    body: B,
    extra_header: ByteRegion,
    trailing: ByteRegion,
    align: AlignItem,
    state: ChunkState,
}

impl<B: ChunkBody> Chunk<B> {
    pub fn new(body: B) -> Self {
        let header = ChunkHeader { chunk_type: body.type_tag(), ..ChunkHeader::default() };
        Chunk { header, body, ..Chunk::default() }
    }

    pub fn header(&self) -> &ChunkHeader {
        &self.header
    }

    pub fn body(&self) -> &B {
        &self.body
    }

    pub fn body_mut(&mut self) -> &mut B {
        &mut self.body
    }

    pub fn state(&self) -> ChunkState {
        self.state
    }

    /// Header bytes beyond the fields this crate understands, kept for round trips.
    pub fn extra_header(&self) -> &ByteRegion {
        &self.extra_header
    }

    /// Unrecognized bytes between the end of the body and the end of the chunk.
    pub fn trailing(&self) -> &ByteRegion {
        &self.trailing
    }

    pub fn header_size(&self) -> usize {
        CHUNK_HEADER_SIZE + self.body.header_fields_size() + self.extra_header.len()
    }

    fn read_bounded(&mut self, sub: &mut BlockReader<'_>, header: &ChunkHeader) -> Result<()> {
        let mut fields = ByteRegion::new(header.header_size as usize - CHUNK_HEADER_SIZE);
        fields.read(sub)?;
        self.body.read_header_fields(&fields)?;
        let known = self.body.header_fields_size();
        self.extra_header = ByteRegion::from_bytes(fields.as_slice().get(known..).unwrap_or_default().to_vec());

        self.state = ChunkState::ReadingBody;
        self.body.read_body(sub, header)?;

        let left = sub.remaining();
        if left < self.align.alignment() {
            self.align.set_size(left);
            self.align.read(sub)?;
        } else {
            debug!("[chunk] keeping {left} trailing bytes of chunk 0x{:04x}", header.chunk_type);
            self.trailing = ByteRegion::from_bytes(sub.read_bytes(left)?.to_vec());
        }
        Ok(())
    }
}

impl<B: ChunkBody> Block for Chunk<B> {
    fn read(&mut self, reader: &mut BlockReader<'_>) -> Result<()> {
        self.state = ChunkState::ReadingHeader;
        let header = ChunkHeader::read(reader)?;
        if !ChunkType::is_known(header.chunk_type) || !self.body.accepts(header.chunk_type) {
            return Err(BlockError::invalid_chunk(header.chunk_type, header.start));
        }
        let body_len = header.chunk_size as usize - CHUNK_HEADER_SIZE;
        reader
            .bounded(body_len, |sub| self.read_bounded(sub, &header))
            .map_err(|e| e.with_context(format!("chunk 0x{:04x} at offset {}", header.chunk_type, header.start)))?;
        self.header = header;
        self.state = ChunkState::Loaded;
        Ok(())
    }

    fn write(&self, out: &mut Vec<u8>) -> usize {
        let mut c = self.header.write(out);
        c += self.body.write_header_fields(out);
        c += self.extra_header.write(out);
        c += self.body.write_body(out);
        c += self.trailing.write(out);
        c += self.align.write(out);
        c
    }

    fn count_bytes(&self) -> usize {
        self.header_size() + self.body.count_body_bytes() + self.trailing.len() + self.align.size()
    }

    fn refresh(&mut self) {
        self.body.refresh_body();
        let header_size = self.header_size();
        self.body.on_refreshed(header_size);
        let unaligned = header_size + self.body.count_body_bytes() + self.trailing.len();
        self.align.align(unaligned);
        self.header.chunk_type = self.body.type_tag();
        self.header.header_size = header_size as u16;
        self.header.chunk_size = (unaligned + self.align.size()) as u32;
        self.state = ChunkState::Loaded;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{BlockItem, BlockList};

    /// A body holding plain fixed-size records, tagged as a string pool for the test.
    #[derive(Default)]
    struct Records {
        items: BlockList<BlockItem>,
    }

    impl ChunkBody for Records {
        fn type_tag(&self) -> u16 {
            ChunkType::StringPool.tag()
        }

        fn read_body(&mut self, reader: &mut BlockReader<'_>, _header: &ChunkHeader) -> Result<()> {
            self.items.read(reader)
        }

        fn write_body(&self, out: &mut Vec<u8>) -> usize {
            self.items.write(out)
        }

        fn count_body_bytes(&self) -> usize {
            self.items.count_bytes()
        }

        fn refresh_body(&mut self) {
            self.items.refresh();
        }
    }

    #[test]
    fn three_records_are_offset_and_aligned() {
        let mut chunk = Chunk::new(Records::default());
        for len in [10, 20, 7] {
            chunk.body_mut().items.add(BlockItem::new(len));
        }
        chunk.refresh();

        let items = &chunk.body().items;
        let offsets: Vec<usize> = (0..items.len()).map(|i| items.count_bytes_up_to(i)).collect();
        assert_eq!(offsets, vec![0, 10, 30]);
        assert_eq!(chunk.count_bytes(), 48, "8 header + 37 body rounded up to 4");
        assert_eq!(chunk.header().chunk_size, 48);
        assert_eq!(chunk.header().header_size, 8);

        let bytes = chunk.bytes();
        assert_eq!(bytes.len(), 48);
        assert_eq!(&bytes[45..], &[0, 0, 0]);

        let before = bytes.clone();
        chunk.refresh();
        assert_eq!(chunk.bytes(), before, "refresh is idempotent");
    }

    #[test]
    fn unknown_top_level_type_is_rejected() {
        let bytes = [0x77, 0x07, 8, 0, 8, 0, 0, 0];
        let mut chunk = Chunk::new(Records::default());
        let err = chunk.read(&mut BlockReader::new(&bytes)).unwrap_err();
        assert!(matches!(err.kind(), crate::error::ErrorKind::InvalidChunk { type_tag: 0x0777, offset: 0 }));
    }

    #[test]
    fn declared_size_past_input_is_truncation() {
        let bytes = [0x01, 0x00, 8, 0, 64, 0, 0, 0, 1, 2];
        let mut chunk = Chunk::new(Records::default());
        let err = chunk.read(&mut BlockReader::new(&bytes)).unwrap_err();
        assert!(matches!(err.kind(), crate::error::ErrorKind::TruncatedInput { needed: 64, .. }), "{err}");
    }

    #[test]
    fn short_padding_reads_as_alignment() {
        // 8 header, 4 extra header bytes, 2 bytes of padding
        let bytes = [0x01, 0x00, 12, 0, 14, 0, 0, 0, 0xAA, 0xBB, 0xCC, 0xDD, 0, 0];
        let mut chunk = Chunk::new(Records::default());
        chunk.read(&mut BlockReader::new(&bytes)).unwrap();
        assert_eq!(chunk.state(), ChunkState::Loaded);
        assert_eq!(chunk.extra_header().as_slice(), &[0xAA, 0xBB, 0xCC, 0xDD]);
        chunk.refresh();
        assert_eq!(chunk.count_bytes(), 12);
        assert_eq!(chunk.header().header_size, 12);
    }
}
