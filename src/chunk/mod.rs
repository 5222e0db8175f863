//! The resource chunk tree: ARSC tables and compiled XML.
//!
//! Every chunk starts with `{type u16, header_size u16, chunk_size u32}`. [`Chunk`] pairs
//! that header with a typed [`ChunkBody`]; [`ChunkNode`] is the closed set of bodies a
//! container can hold, plus a verbatim passthrough for chunk types this crate does not
//! know.

mod base;
mod container;
mod node;
mod resource_file;
mod string_pool;
mod table;
mod xml_node;

pub use base::{Chunk, ChunkBody, ChunkHeader, ChunkState, CHUNK_HEADER_SIZE};
pub use container::{ContainerBody, ContainerFields};
pub use node::{ChunkNode, UnknownChunk};
pub use resource_file::ResourceFile;
pub use string_pool::{StringEntry, StringPool, StringPoolFlags, StyleEntry, StyleSpan};
pub use table::{EntryBlob, LibraryBody, LibraryEntry, ResourceMap, SpecBody, TypeBody, TypeFlags};
pub use xml_node::{OpaqueBody, XmlNode};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ChunkType {
    Null = 0x0000,
    StringPool = 0x0001,
    Table = 0x0002,
    Xml = 0x0003,
    XmlStartNamespace = 0x0100,
    XmlEndNamespace = 0x0101,
    XmlStartElement = 0x0102,
    XmlEndElement = 0x0103,
    XmlCdata = 0x0104,
    XmlResourceMap = 0x0180,
    Package = 0x0200,
    Type = 0x0201,
    Spec = 0x0202,
    Library = 0x0203,
    Overlayable = 0x0204,
    OverlayablePolicy = 0x0205,
    StagedAlias = 0x0206,
}

impl ChunkType {
    pub fn from_tag(tag: u16) -> Option<ChunkType> {
        Some(match tag {
            0x0000 => ChunkType::Null,
            0x0001 => ChunkType::StringPool,
            0x0002 => ChunkType::Table,
            0x0003 => ChunkType::Xml,
            0x0100 => ChunkType::XmlStartNamespace,
            0x0101 => ChunkType::XmlEndNamespace,
            0x0102 => ChunkType::XmlStartElement,
            0x0103 => ChunkType::XmlEndElement,
            0x0104 => ChunkType::XmlCdata,
            0x0180 => ChunkType::XmlResourceMap,
            0x0200 => ChunkType::Package,
            0x0201 => ChunkType::Type,
            0x0202 => ChunkType::Spec,
            0x0203 => ChunkType::Library,
            0x0204 => ChunkType::Overlayable,
            0x0205 => ChunkType::OverlayablePolicy,
            0x0206 => ChunkType::StagedAlias,
            _ => return None,
        })
    }

    pub fn tag(self) -> u16 {
        self as u16
    }

    /// Known and not the null type.
    pub fn is_known(tag: u16) -> bool {
        matches!(ChunkType::from_tag(tag), Some(t) if t != ChunkType::Null)
    }

    pub fn is_xml_node(self) -> bool {
        (0x0100..=0x0104).contains(&self.tag())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_round_trip() {
        for tag in [0x0001u16, 0x0002, 0x0003, 0x0102, 0x0180, 0x0200, 0x0206] {
            assert_eq!(ChunkType::from_tag(tag).map(ChunkType::tag), Some(tag));
        }
        assert!(!ChunkType::is_known(0x0000));
        assert!(!ChunkType::is_known(0x0777));
        assert!(ChunkType::XmlCdata.is_xml_node());
        assert!(!ChunkType::Package.is_xml_node());
    }
}
