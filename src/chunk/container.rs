use crate::block::{Block, BlockList, BlockReader, ByteRegion};
use crate::chunk::{ChunkBody, ChunkHeader, ChunkNode, ChunkType, CHUNK_HEADER_SIZE};
use crate::config::ReadOptions;
use crate::error::Result;

/// Package names are 128 UTF-16 units.
const PACKAGE_NAME_SIZE: usize = 256;

/// Header fields of the three container chunk types.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ContainerFields {
    Table {
        package_count: u32,
    },
    Xml,
    Package {
        id: u32,
        name: ByteRegion,
        type_strings: u32,
        last_public_type: u32,
        key_strings: u32,
        last_public_key: u32,
        type_id_offset: u32,
    },
}

impl ContainerFields {
    fn for_type(chunk_type: ChunkType) -> ContainerFields {
        match chunk_type {
            ChunkType::Table => ContainerFields::Table { package_count: 0 },
            ChunkType::Package => ContainerFields::Package {
                id: 0,
                name: ByteRegion::new(PACKAGE_NAME_SIZE),
                type_strings: 0,
                last_public_type: 0,
                key_strings: 0,
                last_public_key: 0,
                type_id_offset: 0,
            },
            _ => ContainerFields::Xml,
        }
    }

    fn size(&self) -> usize {
        match self {
            ContainerFields::Table { .. } => 4,
            ContainerFields::Xml => 0,
            ContainerFields::Package { .. } => 4 + PACKAGE_NAME_SIZE + 5 * 4,
        }
    }
}

/// A chunk whose body is a sequence of child chunks: the table, a package, or an XML document.
#[derive(Clone, Debug)]
pub struct ContainerBody {
    chunk_type: ChunkType,
    fields: ContainerFields,
    children: BlockList<ChunkNode>,
    options: ReadOptions,
}

impl Default for ContainerBody {
    fn default() -> Self {
        ContainerBody::new(ChunkType::Xml, ReadOptions::default())
    }
}

impl ContainerBody {
    pub fn new(chunk_type: ChunkType, options: ReadOptions) -> Self {
        ContainerBody {
            chunk_type,
            fields: ContainerFields::for_type(chunk_type),
            children: BlockList::new(),
            options,
        }
    }

    pub fn table() -> Self {
        ContainerBody::new(ChunkType::Table, ReadOptions::default())
    }

    pub fn xml() -> Self {
        ContainerBody::new(ChunkType::Xml, ReadOptions::default())
    }

    pub fn package(id: u32, name: &str) -> Self {
        let mut body = ContainerBody::new(ChunkType::Package, ReadOptions::default());
        if let ContainerFields::Package { id: pkg_id, name: region, .. } = &mut body.fields {
            *pkg_id = id;
            for (i, unit) in name.encode_utf16().take(PACKAGE_NAME_SIZE / 2 - 1).enumerate() {
                region.put_u16_le(i * 2, unit);
            }
        }
        body
    }

    pub fn chunk_type(&self) -> ChunkType {
        self.chunk_type
    }

    pub fn fields(&self) -> &ContainerFields {
        &self.fields
    }

    pub fn fields_mut(&mut self) -> &mut ContainerFields {
        &mut self.fields
    }

    pub fn children(&self) -> &BlockList<ChunkNode> {
        &self.children
    }

    pub fn children_mut(&mut self) -> &mut BlockList<ChunkNode> {
        &mut self.children
    }

    pub fn add_child(&mut self, child: ChunkNode) -> usize {
        self.children.add(child)
    }

    /// Position of child `index` relative to the start of this chunk.
    pub fn child_offset(&self, header_size: usize, index: usize) -> usize {
        header_size + self.children.count_bytes_up_to(index)
    }

    pub fn package_name(&self) -> Option<String> {
        match &self.fields {
            ContainerFields::Package { name, .. } => {
                let units: Vec<u16> = (0..name.len() / 2)
                    .map(|i| name.get_u16_le(i * 2))
                    .take_while(|u| *u != 0)
                    .collect();
                Some(String::from_utf16_lossy(&units))
            }
            _ => None,
        }
    }

    fn string_pool_offsets(&self, header_size: usize) -> (u32, u32) {
        let mut pools = self
            .children
            .iter()
            .enumerate()
            .filter(|(_, child)| child.type_tag() == ChunkType::StringPool.tag())
            .map(|(i, _)| self.child_offset(header_size, i) as u32);
        let type_strings = pools.next().unwrap_or(0);
        let key_strings = pools.next().unwrap_or(0);
        (type_strings, key_strings)
    }
}

impl ChunkBody for ContainerBody {
    fn type_tag(&self) -> u16 {
        self.chunk_type.tag()
    }

    fn header_fields_size(&self) -> usize {
        self.fields.size()
    }

    fn read_header_fields(&mut self, fields: &ByteRegion) -> Result<()> {
        self.fields = match &self.fields {
            ContainerFields::Table { .. } => ContainerFields::Table { package_count: fields.get_u32_le(0) },
            ContainerFields::Xml => ContainerFields::Xml,
            ContainerFields::Package { .. } => {
                let mut name = ByteRegion::new(PACKAGE_NAME_SIZE);
                let src = fields.as_slice().get(4..4 + PACKAGE_NAME_SIZE).unwrap_or_default();
                name.put_bytes(0, src);
                let after = 4 + PACKAGE_NAME_SIZE;
                ContainerFields::Package {
                    id: fields.get_u32_le(0),
                    name,
                    type_strings: fields.get_u32_le(after),
                    last_public_type: fields.get_u32_le(after + 4),
                    key_strings: fields.get_u32_le(after + 8),
                    last_public_key: fields.get_u32_le(after + 12),
                    type_id_offset: fields.get_u32_le(after + 16),
                }
            }
        };
        Ok(())
    }

    fn write_header_fields(&self, out: &mut Vec<u8>) -> usize {
        match &self.fields {
            ContainerFields::Table { package_count } => out.extend_from_slice(&package_count.to_le_bytes()),
            ContainerFields::Xml => {}
            ContainerFields::Package {
                id,
                name,
                type_strings,
                last_public_type,
                key_strings,
                last_public_key,
                type_id_offset,
            } => {
                out.extend_from_slice(&id.to_le_bytes());
                name.write(out);
                for v in [type_strings, last_public_type, key_strings, last_public_key, type_id_offset] {
                    out.extend_from_slice(&v.to_le_bytes());
                }
            }
        }
        self.fields.size()
    }

    fn read_body(&mut self, reader: &mut BlockReader<'_>, _header: &ChunkHeader) -> Result<()> {
        let options = self.options.clone();
        while reader.remaining() >= CHUNK_HEADER_SIZE {
            let child = ChunkNode::read_child(reader, &options)?;
            self.children.add(child);
        }
        Ok(())
    }

    fn write_body(&self, out: &mut Vec<u8>) -> usize {
        self.children.write(out)
    }

    fn count_body_bytes(&self) -> usize {
        self.children.count_bytes()
    }

    fn refresh_body(&mut self) {
        self.children.refresh();
    }

    fn on_refreshed(&mut self, header_size: usize) {
        let packages = self
            .children
            .iter()
            .filter(|child| child.type_tag() == ChunkType::Package.tag())
            .count() as u32;
        let (pool_types, pool_keys) = self.string_pool_offsets(header_size);
        match &mut self.fields {
            ContainerFields::Table { package_count } => *package_count = packages,
            ContainerFields::Xml => {}
            ContainerFields::Package { type_strings, key_strings, .. } => {
                *type_strings = pool_types;
                *key_strings = pool_keys;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{Chunk, StringPool};

    #[test]
    fn package_locates_its_string_pools() {
        let mut package = Chunk::new(ContainerBody::package(0x7f, "com.example"));
        let mut types = StringPool::new(true);
        types.get_or_create("attr");
        package.body_mut().add_child(ChunkNode::StringPool(Chunk::new(types)));
        package.body_mut().add_child(ChunkNode::StringPool(Chunk::new(StringPool::new(true))));
        package.refresh();

        let header_size = package.header_size();
        assert_eq!(header_size, 288);
        let first = package.body().children()[0].count_bytes() as u32;
        match package.body().fields() {
            ContainerFields::Package { id, type_strings, key_strings, .. } => {
                assert_eq!(*id, 0x7f);
                assert_eq!(*type_strings, 288);
                assert_eq!(*key_strings, 288 + first);
            }
            other => panic!("unexpected fields {other:?}"),
        }
        assert_eq!(package.body().package_name().as_deref(), Some("com.example"));
    }

    #[test]
    fn table_counts_packages() {
        let mut table = Chunk::new(ContainerBody::table());
        table.body_mut().add_child(ChunkNode::StringPool(Chunk::new(StringPool::new(false))));
        table.body_mut().add_child(ChunkNode::Container(Chunk::new(ContainerBody::package(0x7f, "a"))));
        table.body_mut().add_child(ChunkNode::Container(Chunk::new(ContainerBody::package(0x80, "b"))));
        table.refresh();
        assert_eq!(table.body().fields(), &ContainerFields::Table { package_count: 2 });
        assert_eq!(table.header_size(), 12);
    }
}
