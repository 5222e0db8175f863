use crate::block::{Block, BlockReader, IntegerCell};
use crate::dex::item::SectionItem;
use crate::dex::section_type::{section_type, tag, SectionKind};
use crate::dex::{write_u2, write_u4};
use crate::error::Result;
use log::warn;
use rangemap::RangeMap;

/// `map_item`. Count and offset are shared with the section they describe.
#[derive(Clone, Debug, Default)]
pub struct MapItem {
    pub type_tag: u16,
    pub unused: u16,
    pub count: IntegerCell,
    pub offset: IntegerCell,
}

impl MapItem {
    pub fn new(type_tag: u16, count: IntegerCell, offset: IntegerCell) -> Self {
        MapItem { type_tag, unused: 0, count, offset }
    }
}

/// `map_list`: the table of contents every DEX file ends with.
#[derive(Clone, Debug, Default)]
pub struct MapList {
    pub items: Vec<MapItem>,
}

impl MapList {
    pub fn get(&self, type_tag: u16) -> Option<&MapItem> {
        self.items.iter().find(|i| i.type_tag == type_tag)
    }

    pub fn get_mut(&mut self, type_tag: u16) -> Option<&mut MapItem> {
        self.items.iter_mut().find(|i| i.type_tag == type_tag)
    }

    pub fn sort_by_offset(&mut self) {
        self.items.sort_by_key(|i| (i.offset.get(), i.type_tag));
    }

    /// Checks every entry against the file: a known type, a start inside `file_size`, and
    /// no overlap between sections whose extent follows from the map alone.
    pub fn validate(&self, file_size: u32) -> Result<()> {
        let mut extents: RangeMap<u32, u16> = RangeMap::new();
        for item in &self.items {
            let (count, offset) = (item.count.get(), item.offset.get());
            let Some(st) = section_type(item.type_tag) else {
                fail!(("unknown map item type {:#06x}", item.type_tag), ("map list"));
            };
            if count > 0 && offset >= file_size {
                fail!(("{} starts at {offset}, past the end of the file ({file_size})", st.name()), ("map list"));
            }
            let len = match st.kind() {
                SectionKind::Id { item_size } => count.saturating_mul(item_size as u32),
                _ if item.type_tag == tag::HEADER => crate::dex::HEADER_SIZE,
                _ if item.type_tag == tag::MAP_LIST => 4 + count.saturating_mul(12),
                // extent unknown until the records are read
                _ => continue,
            };
            if len == 0 {
                continue;
            }
            let range = offset..offset.saturating_add(len);
            if let Some((other, owner)) = extents.overlapping(&range).next() {
                warn!(
                    "[map] {} at {:?} overlaps {:?} of type {owner:#06x}",
                    st.name(),
                    range,
                    other
                );
            }
            extents.insert(range, item.type_tag);
        }
        Ok(())
    }
}

impl Block for MapList {
    fn read(&mut self, reader: &mut BlockReader<'_>) -> Result<()> {
        let size = reader.read_u32()? as usize;
        self.items = Vec::with_capacity(size.min(reader.remaining() / 12));
        for _ in 0..size {
            let type_tag = reader.read_u16()?;
            let unused = reader.read_u16()?;
            let count = IntegerCell::new(reader.read_u32()?);
            let offset = IntegerCell::new(reader.read_u32()?);
            self.items.push(MapItem { type_tag, unused, count, offset });
        }
        Ok(())
    }

    fn write(&self, out: &mut Vec<u8>) -> usize {
        let mut c = write_u4(out, self.items.len() as u32);
        for item in &self.items {
            c += write_u2(out, item.type_tag);
            c += write_u2(out, item.unused);
            c += write_u4(out, item.count.get());
            c += write_u4(out, item.offset.get());
        }
        c
    }

    fn count_bytes(&self) -> usize {
        4 + self.items.len() * 12
    }
}

impl SectionItem for MapList {
    const TYPE: u16 = tag::MAP_LIST;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(type_tag: u16, count: u32, offset: u32) -> MapItem {
        MapItem::new(type_tag, IntegerCell::new(count), IntegerCell::new(offset))
    }

    #[test]
    fn map_entries_are_twelve_bytes() {
        let map = MapList { items: vec![item(tag::HEADER, 1, 0), item(tag::STRING_ID, 2, 0x70)] };
        let bytes = map.bytes();
        assert_eq!(bytes.len(), 28);
        assert_eq!(&bytes[..4], &[2, 0, 0, 0]);
        assert_eq!(&bytes[16..18], &tag::STRING_ID.to_le_bytes());
        assert_eq!(&bytes[20..24], &[2, 0, 0, 0]);
        assert_eq!(&bytes[24..28], &0x70u32.to_le_bytes());

        let mut back = MapList::default();
        back.read(&mut BlockReader::new(&bytes)).unwrap();
        assert_eq!(back.get(tag::STRING_ID).map(|i| i.offset.get()), Some(0x70));
    }

    #[test]
    fn validate_rejects_unknown_and_out_of_file_entries() {
        let map = MapList { items: vec![item(tag::HEADER, 1, 0), item(0x4242, 1, 0x80)] };
        assert!(map.validate(0x100).is_err());

        let map = MapList { items: vec![item(tag::HEADER, 1, 0), item(tag::TYPE_ID, 2, 0x200)] };
        assert!(map.validate(0x100).is_err());

        // overlapping id tables are reported but tolerated
        let map = MapList {
            items: vec![item(tag::HEADER, 1, 0), item(tag::STRING_ID, 4, 0x70), item(tag::TYPE_ID, 1, 0x78)],
        };
        assert!(map.validate(0x100).is_ok());
    }
}
