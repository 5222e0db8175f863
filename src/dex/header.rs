use crate::block::{Block, BlockReader, IntegerCell};
use crate::dex::item::SectionItem;
use crate::dex::section_type::tag;
use crate::dex::{write_u4, write_x};
use crate::error::Result;

pub const DEX_MAGIC: [u8; 8] = *b"dex\n035\0";
pub const ENDIAN_CONSTANT: u32 = 0x1234_5678;
pub const REVERSE_ENDIAN_CONSTANT: u32 = 0x7856_3412;
pub const HEADER_SIZE: u32 = 0x70;

/// Count and offset of one id section as mirrored in the header.
#[derive(Clone, Debug, Default)]
pub struct IdTable {
    pub size: IntegerCell,
    pub offset: IntegerCell,
}

impl IdTable {
    fn read(reader: &mut BlockReader<'_>) -> Result<IdTable> {
        Ok(IdTable { size: IntegerCell::new(reader.read_u32()?), offset: IntegerCell::new(reader.read_u32()?) })
    }

    fn write(&self, out: &mut Vec<u8>) -> usize {
        write_u4(out, self.size.get()) + write_u4(out, self.offset.get())
    }
}

/// `header_item`.
///
/// The six id tables and `map_off` are shared cells: the id sections and the map list
/// hold clones of them, so layout updates the header without copying.
#[derive(Clone, Debug)]
pub struct Header {
    pub magic: [u8; 8],
    pub checksum: u32,
    pub signature: [u8; 20],
    pub file_size: u32,
    pub header_size: u32,
    pub endian_tag: u32,
    pub link_size: u32,
    pub link_off: u32,
    pub map_off: IntegerCell,
    /// String, type, proto, field, method and class id tables, in that order.
    id_tables: [IdTable; 6],
    pub data_size: u32,
    pub data_off: u32,
}

impl Default for Header {
    fn default() -> Self {
        Header {
            magic: DEX_MAGIC,
            checksum: 0,
            signature: [0; 20],
            file_size: HEADER_SIZE,
            header_size: HEADER_SIZE,
            endian_tag: ENDIAN_CONSTANT,
            link_size: 0,
            link_off: 0,
            map_off: IntegerCell::new(0),
            id_tables: Default::default(),
            data_size: 0,
            data_off: 0,
        }
    }
}

impl Header {
    /// The header's cells for an id section, if the header tracks that section.
    pub fn id_table(&self, section: u16) -> Option<&IdTable> {
        match section {
            tag::STRING_ID..=tag::CLASS_ID => self.id_tables.get(section as usize - 1),
            _ => None,
        }
    }

    /// Format version from the magic, e.g. 35 for `dex\n035\0`.
    pub fn version(&self) -> Option<u32> {
        std::str::from_utf8(&self.magic[4..7]).ok()?.parse().ok()
    }

    pub fn has_valid_magic(&self) -> bool {
        self.magic[..4] == DEX_MAGIC[..4] && self.magic[7] == 0
    }
}

impl Block for Header {
    fn read(&mut self, reader: &mut BlockReader<'_>) -> Result<()> {
        let start = reader.position();
        self.magic.copy_from_slice(reader.read_bytes(8)?);
        if !self.has_valid_magic() {
            fail!(("bad dex magic {:02x?}", self.magic), ("header at {start}"));
        }
        self.checksum = reader.read_u32()?;
        self.signature.copy_from_slice(reader.read_bytes(20)?);
        self.file_size = reader.read_u32()?;
        self.header_size = reader.read_u32()?;
        self.endian_tag = reader.read_u32()?;
        match self.endian_tag {
            ENDIAN_CONSTANT => {}
            REVERSE_ENDIAN_CONSTANT => fail!(("big-endian dex files are not supported"), ("header at {start}")),
            other => fail!(("bad endian tag {other:#010x}"), ("header at {start}")),
        }
        if self.header_size < HEADER_SIZE {
            fail!(("header size {} is below {HEADER_SIZE:#x}", self.header_size), ("header at {start}"));
        }
        self.link_size = reader.read_u32()?;
        self.link_off = reader.read_u32()?;
        self.map_off = IntegerCell::new(reader.read_u32()?);
        for table in &mut self.id_tables {
            *table = IdTable::read(reader)?;
        }
        self.data_size = reader.read_u32()?;
        self.data_off = reader.read_u32()?;
        // newer headers append fields; skip them
        let extra = self.header_size as usize - HEADER_SIZE as usize;
        reader.skip(extra)?;
        Ok(())
    }

    fn write(&self, out: &mut Vec<u8>) -> usize {
        let mut c = write_x(out, &self.magic);
        c += write_u4(out, self.checksum);
        c += write_x(out, &self.signature);
        c += write_u4(out, self.file_size);
        c += write_u4(out, HEADER_SIZE);
        c += write_u4(out, self.endian_tag);
        c += write_u4(out, self.link_size);
        c += write_u4(out, self.link_off);
        c += write_u4(out, self.map_off.get());
        for table in &self.id_tables {
            c += table.write(out);
        }
        c += write_u4(out, self.data_size);
        c += write_u4(out, self.data_off);
        c
    }

    fn count_bytes(&self) -> usize {
        HEADER_SIZE as usize
    }
}

impl SectionItem for Header {
    const TYPE: u16 = tag::HEADER;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn header_round_trips_and_exposes_id_cells() {
        let header = Header::default();
        header.map_off.set(0x1f0);
        header.id_table(tag::TYPE_ID).unwrap().size.set(3);
        let bytes = header.bytes();
        assert_eq!(bytes.len(), 0x70);
        assert_eq!(&bytes[0x34..0x38], &[0xf0, 0x01, 0, 0]);
        assert_eq!(&bytes[0x40..0x44], &[3, 0, 0, 0]);

        let mut back = Header::default();
        back.read(&mut BlockReader::new(&bytes)).unwrap();
        assert_eq!(back.map_off.get(), 0x1f0);
        assert_eq!(back.id_table(tag::TYPE_ID).unwrap().size.get(), 3);
        assert_eq!(back.version(), Some(35));
        assert!(back.id_table(tag::CALL_SITE_ID).is_none());
    }

    #[test]
    fn rejects_foreign_magic_and_byte_order() {
        let mut bytes = Header::default().bytes();
        bytes[0x28..0x2c].copy_from_slice(&REVERSE_ENDIAN_CONSTANT.to_le_bytes());
        let err = Header::default().read(&mut BlockReader::new(&bytes)).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Malformed(_)));

        bytes[0] = b'x';
        assert!(Header::default().read(&mut BlockReader::new(&bytes)).is_err());
        assert!(Header::default().read(&mut BlockReader::new(&bytes[..0x20])).is_err());
    }
}
