use crate::block::{Block, BlockReader, ByteRegion};
use crate::chunk::{
    Chunk, ChunkHeader, ChunkType, ContainerBody, LibraryBody, OpaqueBody, ResourceMap, SpecBody, StringPool,
    TypeBody, XmlNode,
};
use crate::config::ReadOptions;
use crate::error::{BlockError, Result};
use log::debug;

/// A chunk of a type this crate does not model, kept byte for byte.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UnknownChunk {
    bytes: ByteRegion,
}

impl UnknownChunk {
    pub fn type_tag(&self) -> u16 {
        self.bytes.get_u16_le(0)
    }

    pub fn as_slice(&self) -> &[u8] {
        self.bytes.as_slice()
    }
}

impl Block for UnknownChunk {
    fn read(&mut self, reader: &mut BlockReader<'_>) -> Result<()> {
        let header = ChunkHeader::read(reader)?;
        reader.seek(header.start)?;
        self.bytes = ByteRegion::from_bytes(reader.read_bytes(header.chunk_size as usize)?.to_vec());
        Ok(())
    }

    fn write(&self, out: &mut Vec<u8>) -> usize {
        self.bytes.write(out)
    }

    fn count_bytes(&self) -> usize {
        self.bytes.len()
    }
}

/// Every chunk a container may hold.
#[derive(Clone, Debug)]
pub enum ChunkNode {
    Container(Chunk<ContainerBody>),
    StringPool(Chunk<StringPool>),
    ResourceMap(Chunk<ResourceMap>),
    Type(Chunk<TypeBody>),
    Spec(Chunk<SpecBody>),
    Library(Chunk<LibraryBody>),
    XmlNode(Chunk<XmlNode>),
    Opaque(Chunk<OpaqueBody>),
    Unknown(UnknownChunk),
}

macro_rules! each_node {
    ($node:expr, $c:ident => $body:expr) => {
        match $node {
            ChunkNode::Container($c) => $body,
            ChunkNode::StringPool($c) => $body,
            ChunkNode::ResourceMap($c) => $body,
            ChunkNode::Type($c) => $body,
            ChunkNode::Spec($c) => $body,
            ChunkNode::Library($c) => $body,
            ChunkNode::XmlNode($c) => $body,
            ChunkNode::Opaque($c) => $body,
            ChunkNode::Unknown($c) => $body,
        }
    };
}

impl ChunkNode {
    /// An empty node of the variant that models `chunk_type`.
    pub fn empty_for(chunk_type: ChunkType, options: &ReadOptions) -> ChunkNode {
        match chunk_type {
            ChunkType::Table | ChunkType::Xml | ChunkType::Package => {
                ChunkNode::Container(Chunk::new(ContainerBody::new(chunk_type, options.clone())))
            }
            ChunkType::StringPool => ChunkNode::StringPool(Chunk::new(StringPool::default())),
            ChunkType::XmlResourceMap => ChunkNode::ResourceMap(Chunk::new(ResourceMap::default())),
            ChunkType::Type => ChunkNode::Type(Chunk::new(TypeBody::default())),
            ChunkType::Spec => ChunkNode::Spec(Chunk::new(SpecBody::default())),
            ChunkType::Library => ChunkNode::Library(Chunk::new(LibraryBody::default())),
            t if t.is_xml_node() => ChunkNode::XmlNode(Chunk::new(XmlNode::new(t))),
            t => ChunkNode::Opaque(Chunk::new(OpaqueBody::new(t.tag()))),
        }
    }

    /// Reads one chunk inside a container. Unregistered types are kept verbatim unless
    /// `strict_chunk_types` is set.
    pub fn read_child(reader: &mut BlockReader<'_>, options: &ReadOptions) -> Result<ChunkNode> {
        let offset = reader.position();
        let tag = reader.peek_u16()?;
        let mut node = match ChunkType::from_tag(tag) {
            Some(t) if t != ChunkType::Null => ChunkNode::empty_for(t, options),
            _ if options.strict_chunk_types => return Err(BlockError::invalid_chunk(tag, offset)),
            _ => {
                debug!("[chunk] keeping unknown chunk 0x{tag:04x} at offset {offset}");
                ChunkNode::Unknown(UnknownChunk::default())
            }
        };
        node.read(reader)?;
        Ok(node)
    }

    /// Reads a document root; the root has to be a known chunk type.
    pub fn read_top_level(reader: &mut BlockReader<'_>, options: &ReadOptions) -> Result<ChunkNode> {
        let tag = reader.peek_u16()?;
        if !ChunkType::is_known(tag) {
            return Err(BlockError::invalid_chunk(tag, reader.position()));
        }
        ChunkNode::read_child(reader, options)
    }

    pub fn type_tag(&self) -> u16 {
        match self {
            ChunkNode::Unknown(c) => c.type_tag(),
            ChunkNode::Container(c) => c.header().chunk_type,
            ChunkNode::StringPool(c) => c.header().chunk_type,
            ChunkNode::ResourceMap(c) => c.header().chunk_type,
            ChunkNode::Type(c) => c.header().chunk_type,
            ChunkNode::Spec(c) => c.header().chunk_type,
            ChunkNode::Library(c) => c.header().chunk_type,
            ChunkNode::XmlNode(c) => c.header().chunk_type,
            ChunkNode::Opaque(c) => c.header().chunk_type,
        }
    }

    pub fn as_container(&self) -> Option<&Chunk<ContainerBody>> {
        match self {
            ChunkNode::Container(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_container_mut(&mut self) -> Option<&mut Chunk<ContainerBody>> {
        match self {
            ChunkNode::Container(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_string_pool(&self) -> Option<&Chunk<StringPool>> {
        match self {
            ChunkNode::StringPool(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_string_pool_mut(&mut self) -> Option<&mut Chunk<StringPool>> {
        match self {
            ChunkNode::StringPool(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_type(&self) -> Option<&Chunk<TypeBody>> {
        match self {
            ChunkNode::Type(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_type_mut(&mut self) -> Option<&mut Chunk<TypeBody>> {
        match self {
            ChunkNode::Type(c) => Some(c),
            _ => None,
        }
    }
}

impl Block for ChunkNode {
    fn read(&mut self, reader: &mut BlockReader<'_>) -> Result<()> {
        each_node!(self, c => c.read(reader))
    }

    fn write(&self, out: &mut Vec<u8>) -> usize {
        each_node!(self, c => c.write(out))
    }

    fn count_bytes(&self) -> usize {
        each_node!(self, c => c.count_bytes())
    }

    fn refresh(&mut self) {
        each_node!(self, c => c.refresh())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn xml_with_unknown_child() -> Vec<u8> {
        let mut bytes = vec![0x03, 0x00, 8, 0, 24, 0, 0, 0];
        bytes.extend_from_slice(&[0x77, 0x07, 8, 0, 16, 0, 0, 0]);
        bytes.extend_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        bytes
    }

    #[test]
    fn unknown_child_passes_through_verbatim() {
        let bytes = xml_with_unknown_child();
        let mut reader = BlockReader::new(&bytes);
        let mut node = ChunkNode::read_top_level(&mut reader, &ReadOptions::default()).unwrap();
        let children = node.as_container().unwrap().body().children();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].type_tag(), 0x0777);
        node.refresh();
        assert_eq!(node.bytes(), bytes);
    }

    #[test]
    fn strict_reading_rejects_unknown_child() {
        let bytes = xml_with_unknown_child();
        let options = ReadOptions { strict_chunk_types: true, ..Default::default() };
        let err = ChunkNode::read_top_level(&mut BlockReader::new(&bytes), &options).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::InvalidChunk { type_tag: 0x0777, offset: 8 }));
    }

    #[test]
    fn unknown_root_is_rejected() {
        let bytes = [0x77, 0x07, 8, 0, 8, 0, 0, 0];
        let err = ChunkNode::read_top_level(&mut BlockReader::new(&bytes), &ReadOptions::default()).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::InvalidChunk { type_tag: 0x0777, offset: 0 }));
        let null = [0, 0, 8, 0, 8, 0, 0, 0];
        assert!(ChunkNode::read_top_level(&mut BlockReader::new(&null), &ReadOptions::default()).is_err());
    }
}
