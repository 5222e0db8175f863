use crate::block::{Block, BlockReader, ByteRegion};
use crate::chunk::{ChunkBody, ChunkHeader, ChunkType};
use crate::error::Result;

/// A compiled XML tree node: namespace, element or text.
///
/// The line number and comment index are modelled; the element-specific extension is
/// carried as raw bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct XmlNode {
    chunk_type: ChunkType,
    pub line_number: u32,
    pub comment: u32,
    pub extension: ByteRegion,
}

impl Default for XmlNode {
    fn default() -> Self {
        XmlNode::new(ChunkType::XmlStartElement)
    }
}

impl XmlNode {
    pub fn new(chunk_type: ChunkType) -> Self {
        XmlNode { chunk_type, line_number: 0, comment: u32::MAX, extension: ByteRegion::default() }
    }

    pub fn chunk_type(&self) -> ChunkType {
        self.chunk_type
    }
}

impl ChunkBody for XmlNode {
    fn type_tag(&self) -> u16 {
        self.chunk_type.tag()
    }

    fn header_fields_size(&self) -> usize {
        8
    }

    fn read_header_fields(&mut self, fields: &ByteRegion) -> Result<()> {
        self.line_number = fields.get_u32_le(0);
        self.comment = fields.get_u32_le(4);
        Ok(())
    }

    fn write_header_fields(&self, out: &mut Vec<u8>) -> usize {
        out.extend_from_slice(&self.line_number.to_le_bytes());
        out.extend_from_slice(&self.comment.to_le_bytes());
        8
    }

    fn read_body(&mut self, reader: &mut BlockReader<'_>, _header: &ChunkHeader) -> Result<()> {
        self.extension = ByteRegion::from_bytes(reader.read_bytes(reader.remaining())?.to_vec());
        Ok(())
    }

    fn write_body(&self, out: &mut Vec<u8>) -> usize {
        self.extension.write(out)
    }

    fn count_body_bytes(&self) -> usize {
        self.extension.len()
    }
}

/// A registered chunk type whose body this crate does not interpret.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OpaqueBody {
    tag: u16,
    pub body: ByteRegion,
}

impl OpaqueBody {
    pub fn new(tag: u16) -> Self {
        OpaqueBody { tag, body: ByteRegion::default() }
    }
}

impl ChunkBody for OpaqueBody {
    fn type_tag(&self) -> u16 {
        self.tag
    }

    fn read_body(&mut self, reader: &mut BlockReader<'_>, _header: &ChunkHeader) -> Result<()> {
        self.body = ByteRegion::from_bytes(reader.read_bytes(reader.remaining())?.to_vec());
        Ok(())
    }

    fn write_body(&self, out: &mut Vec<u8>) -> usize {
        self.body.write(out)
    }

    fn count_body_bytes(&self) -> usize {
        self.body.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::Chunk;

    #[test]
    fn end_element_keeps_extension() {
        let mut node = Chunk::new(XmlNode::new(ChunkType::XmlEndElement));
        node.body_mut().line_number = 12;
        node.body_mut().extension = ByteRegion::from_bytes(vec![0xFF, 0xFF, 0xFF, 0xFF, 3, 0, 0, 0]);
        node.refresh();
        assert_eq!(node.header_size(), 16);
        let bytes = node.bytes();
        assert_eq!(bytes.len(), 24);

        let mut back = Chunk::new(XmlNode::new(ChunkType::XmlEndElement));
        back.read(&mut BlockReader::new(&bytes)).unwrap();
        assert_eq!(back.body().line_number, 12);
        assert_eq!(back.body().extension.get_u32_le(4), 3);
    }

    #[test]
    fn opaque_header_extension_survives() {
        // overlayable chunk: 8 prefix + 4 header bytes we do not model, then a 4-byte body
        let bytes = [0x04, 0x02, 12, 0, 16, 0, 0, 0, 1, 2, 3, 4, 5, 6, 7, 8];
        let mut chunk = Chunk::new(OpaqueBody::new(ChunkType::Overlayable.tag()));
        chunk.read(&mut BlockReader::new(&bytes)).unwrap();
        assert_eq!(chunk.body().body.as_slice(), &[5, 6, 7, 8]);
        chunk.refresh();
        assert_eq!(chunk.bytes(), bytes);
    }
}
