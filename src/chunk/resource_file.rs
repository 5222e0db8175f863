use crate::block::{Block, BlockReader};
use crate::chunk::{Chunk, ChunkNode, ChunkType, ContainerBody, StringPool};
use crate::config::ReadOptions;
use crate::error::Result;
use log::warn;
use std::io;

/// A compiled resource document: one table or one XML tree.
#[derive(Clone, Debug)]
pub struct ResourceFile {
    root: ChunkNode,
}

impl ResourceFile {
    pub fn new(root: ChunkNode) -> Self {
        ResourceFile { root }
    }

    /// An empty resource table holding only its global string pool.
    pub fn table() -> Self {
        let mut table = Chunk::new(ContainerBody::table());
        table.body_mut().add_child(ChunkNode::StringPool(Chunk::new(StringPool::new(true))));
        ResourceFile { root: ChunkNode::Container(table) }
    }

    pub fn read(bytes: &[u8]) -> Result<ResourceFile> {
        ResourceFile::read_with(bytes, &ReadOptions::default())
    }

    pub fn read_with(bytes: &[u8], options: &ReadOptions) -> Result<ResourceFile> {
        let mut reader = BlockReader::new(bytes);
        let root = ChunkNode::read_top_level(&mut reader, options)?;
        let tag = root.type_tag();
        if tag != ChunkType::Table.tag() && tag != ChunkType::Xml.tag() {
            warn!("[chunk] document root is chunk 0x{tag:04x}, not a table or xml tree");
        }
        if reader.remaining() > 0 {
            warn!("[chunk] ignoring {} bytes after the document root", reader.remaining());
        }
        Ok(ResourceFile { root })
    }

    pub fn root(&self) -> &ChunkNode {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut ChunkNode {
        &mut self.root
    }

    pub fn refresh(&mut self) {
        self.root.refresh();
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.root.bytes()
    }

    pub fn write_to<W: io::Write>(&self, writer: &mut W) -> Result<usize> {
        self.root.write_to(writer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{ContainerFields, EntryBlob, SpecBody, TypeBody, TypeFlags};

    fn sample_table() -> ResourceFile {
        let mut file = ResourceFile::table();
        let table = file.root_mut().as_container_mut().unwrap();
        table.body_mut().children_mut().get_mut(0).unwrap()
            .as_string_pool_mut()
            .unwrap()
            .body_mut()
            .get_or_create("res/layout/main.xml");

        let mut package = Chunk::new(ContainerBody::package(0x7f, "com.example.app"));
        let mut types = StringPool::new(true);
        types.get_or_create("layout");
        let mut keys = StringPool::new(true);
        keys.get_or_create("main");
        package.body_mut().add_child(ChunkNode::StringPool(Chunk::new(types)));
        package.body_mut().add_child(ChunkNode::StringPool(Chunk::new(keys)));
        let spec = SpecBody { id: 1, types_count: 1, flags: vec![0] };
        package.body_mut().add_child(ChunkNode::Spec(Chunk::new(spec)));
        let mut type_chunk = Chunk::new(TypeBody::new(1, TypeFlags::empty()));
        *type_chunk.body_mut().get_or_create(0) = EntryBlob::simple(0, 0x03, 0);
        package.body_mut().add_child(ChunkNode::Type(type_chunk));
        table.body_mut().add_child(ChunkNode::Container(package));

        file.refresh();
        file
    }

    #[test]
    fn table_round_trips_byte_for_byte() {
        let file = sample_table();
        let bytes = file.to_bytes();
        assert_eq!(bytes.len() % 4, 0);
        assert_eq!(u32::from_le_bytes(bytes[4..8].try_into().unwrap()) as usize, bytes.len());

        let mut back = ResourceFile::read(&bytes).unwrap();
        assert_eq!(back.to_bytes(), bytes, "unmodified read writes the same bytes");
        back.refresh();
        assert_eq!(back.to_bytes(), bytes, "refresh of a consistent tree changes nothing");

        let table = back.root().as_container().unwrap();
        assert_eq!(table.body().fields(), &ContainerFields::Table { package_count: 1 });
        let package = table.body().children()[1].as_container().unwrap();
        assert_eq!(package.body().package_name().as_deref(), Some("com.example.app"));
        let keys = package.body().children()[1].as_string_pool().unwrap();
        assert_eq!(keys.body().get(0).as_deref(), Some("main"));
    }

    #[test]
    fn growing_a_string_moves_following_chunks() {
        let mut file = sample_table();
        let before = file.to_bytes().len();
        let table = file.root_mut().as_container_mut().unwrap();
        let pool = table.body_mut().children_mut().get_mut(0).unwrap().as_string_pool_mut().unwrap();
        pool.body_mut().get_or_create("res/drawable/icon.png");
        file.refresh();

        let bytes = file.to_bytes();
        assert!(bytes.len() > before);
        assert_eq!(u32::from_le_bytes(bytes[4..8].try_into().unwrap()) as usize, bytes.len());
        let back = ResourceFile::read(&bytes).unwrap();
        let table = back.root().as_container().unwrap();
        let pool = table.body().children()[0].as_string_pool().unwrap();
        assert_eq!(pool.body().get(1).as_deref(), Some("res/drawable/icon.png"));
        assert!(table.body().children()[1].as_container().is_some());
    }

    #[test]
    fn write_to_reports_length() {
        let file = sample_table();
        let mut sink = Vec::new();
        let written = file.write_to(&mut sink).unwrap();
        assert_eq!(written, sink.len());
        assert_eq!(sink, file.to_bytes());
    }
}
