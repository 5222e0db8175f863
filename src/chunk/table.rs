use crate::block::{padding, ArrayLayout, Block, BlockReader, ByteRegion, CountedOffsetArray, IntegerCell, NO_ENTRY};
use crate::chunk::{ChunkBody, ChunkHeader, ChunkType};
use crate::error::Result;
use bitflags::bitflags;

/// Entry flag: the value follows as a key/value map.
const ENTRY_COMPLEX: u16 = 0x0001;
/// Entry flag: key and value are packed into 8 bytes.
const ENTRY_COMPACT: u16 = 0x0008;
const LIBRARY_NAME_SIZE: usize = 256;

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct TypeFlags: u8 {
        const SPARSE = 0x01;
        const OFFSET16 = 0x02;
    }
}

/// One resource entry, kept as raw bytes and measured from its own header.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EntryBlob {
    raw: ByteRegion,
}

impl EntryBlob {
    /// A plain entry holding a single `Res_value`.
    pub fn simple(key: u32, data_type: u8, data: u32) -> Self {
        let mut raw = ByteRegion::new(16);
        raw.put_u16_le(0, 8);
        raw.put_u32_le(4, key);
        raw.put_u16_le(8, 8);
        raw.put_u8(11, data_type);
        raw.put_u32_le(12, data);
        EntryBlob { raw }
    }

    pub fn flags(&self) -> u16 {
        self.raw.get_u16_le(2)
    }

    pub fn is_complex(&self) -> bool {
        self.flags() & ENTRY_COMPLEX != 0
    }

    pub fn key(&self) -> u32 {
        if self.flags() & ENTRY_COMPACT != 0 {
            self.raw.get_u16_le(0) as u32
        } else {
            self.raw.get_u32_le(4)
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        self.raw.as_slice()
    }
}

impl Block for EntryBlob {
    fn read(&mut self, reader: &mut BlockReader<'_>) -> Result<()> {
        let mut peek = reader.create(reader.position(), reader.remaining());
        let size = peek.read_u16()? as usize;
        let flags = peek.read_u16()?;
        let total = if flags & ENTRY_COMPACT != 0 {
            8
        } else if flags & ENTRY_COMPLEX != 0 {
            // key and parent precede the map count
            peek.skip(8)?;
            size + peek.read_u32()? as usize * 12
        } else {
            size + 8
        };
        self.raw = ByteRegion::from_bytes(reader.read_bytes(total)?.to_vec());
        Ok(())
    }

    fn write(&self, out: &mut Vec<u8>) -> usize {
        self.raw.write(out)
    }

    fn count_bytes(&self) -> usize {
        self.raw.len()
    }

    fn is_null(&self) -> bool {
        self.raw.is_empty()
    }
}

/// A type chunk: one configuration's entries for one resource type.
#[derive(Clone, Debug)]
pub struct TypeBody {
    id: u8,
    flags: TypeFlags,
    reserved: u16,
    entry_count: IntegerCell,
    entries_start: IntegerCell,
    config: ByteRegion,
    entries: CountedOffsetArray<EntryBlob>,
}

impl Default for TypeBody {
    fn default() -> Self {
        TypeBody::new(0, TypeFlags::empty())
    }
}

impl TypeBody {
    pub fn new(id: u8, flags: TypeFlags) -> Self {
        let entry_count = IntegerCell::new(0);
        let entries_start = IntegerCell::new(0);
        let mut config = ByteRegion::new(64);
        config.put_u32_le(0, 64);
        TypeBody {
            id,
            flags,
            reserved: 0,
            entries: CountedOffsetArray::new(entry_count.clone(), entries_start.clone(), ArrayLayout::Sparse),
            entry_count,
            entries_start,
            config,
        }
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn flags(&self) -> TypeFlags {
        self.flags
    }

    /// The raw `ResTable_config`, size field included.
    pub fn config(&self) -> &ByteRegion {
        &self.config
    }

    pub fn set_config(&mut self, config: ByteRegion) {
        self.config = config;
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    pub fn entry(&self, id: usize) -> Option<&EntryBlob> {
        self.entries.get(id)
    }

    pub fn get_or_create(&mut self, id: usize) -> &mut EntryBlob {
        self.entries.get_or_create(id)
    }

    pub fn set_entry(&mut self, id: usize, entry: Option<EntryBlob>) {
        self.entries.set(id, entry);
    }

    /// Drops trailing empty entries, keeping at least `start` slots.
    pub fn remove_all_null_from(&mut self, start: usize) {
        self.entries.remove_all_null_from(start);
    }

    fn present(&self) -> usize {
        self.entries.iter().filter(|e| e.is_some_and(|e| !e.is_null())).count()
    }

    fn offset_table_size(&self) -> usize {
        let raw = if self.flags.contains(TypeFlags::SPARSE) {
            self.present() * 4
        } else if self.flags.contains(TypeFlags::OFFSET16) {
            self.entries.len() * 2
        } else {
            self.entries.len() * 4
        };
        raw + padding(raw, 4)
    }
}

impl ChunkBody for TypeBody {
    fn type_tag(&self) -> u16 {
        ChunkType::Type.tag()
    }

    fn header_fields_size(&self) -> usize {
        12 + self.config.len()
    }

    fn read_header_fields(&mut self, fields: &ByteRegion) -> Result<()> {
        self.id = fields.get_u8(0);
        self.flags = TypeFlags::from_bits_retain(fields.get_u8(1));
        self.reserved = fields.get_u16_le(2);
        self.entry_count.set(fields.get_u32_le(4));
        self.entries_start.set(fields.get_u32_le(8));
        let available = fields.len().saturating_sub(12);
        let size = (fields.get_u32_le(12) as usize).min(available);
        self.config = ByteRegion::from_bytes(fields.as_slice().get(12..12 + size).unwrap_or_default().to_vec());
        Ok(())
    }

    fn write_header_fields(&self, out: &mut Vec<u8>) -> usize {
        out.push(self.id);
        out.push(self.flags.bits());
        out.extend_from_slice(&self.reserved.to_le_bytes());
        out.extend_from_slice(&self.entry_count.get().to_le_bytes());
        out.extend_from_slice(&self.entries_start.get().to_le_bytes());
        12 + self.config.write(out)
    }

    fn read_body(&mut self, reader: &mut BlockReader<'_>, header: &ChunkHeader) -> Result<()> {
        let count = self.entry_count.get() as usize;
        let offsets = if self.flags.contains(TypeFlags::SPARSE) {
            let mut offsets = Vec::new();
            for _ in 0..count {
                let index = reader.read_u16()? as usize;
                let offset = reader.read_u16()? as u32 * 4;
                if index >= offsets.len() {
                    offsets.resize(index + 1, NO_ENTRY);
                }
                offsets[index] = offset;
            }
            offsets
        } else if self.flags.contains(TypeFlags::OFFSET16) {
            (0..count)
                .map(|_| reader.read_u16().map(|o| if o == 0xFFFF { NO_ENTRY } else { o as u32 * 4 }))
                .collect::<Result<Vec<u32>>>()?
        } else {
            (0..count).map(|_| reader.read_u32()).collect::<Result<Vec<u32>>>()?
        };
        self.entries.set_offsets(offsets);
        let base = header.start + self.entries_start.get() as usize;
        self.entries.read_items(reader, base, EntryBlob::default)?;
        reader.seek(reader.end())
    }

    fn write_body(&self, out: &mut Vec<u8>) -> usize {
        let start = out.len();
        let offsets = self.entries.offsets();
        if self.flags.contains(TypeFlags::SPARSE) {
            for (index, offset) in offsets.iter().enumerate().filter(|(_, o)| **o != NO_ENTRY) {
                out.extend_from_slice(&(index as u16).to_le_bytes());
                out.extend_from_slice(&((offset / 4) as u16).to_le_bytes());
            }
        } else if self.flags.contains(TypeFlags::OFFSET16) {
            for offset in offsets {
                let packed = if *offset == NO_ENTRY { 0xFFFF } else { (offset / 4) as u16 };
                out.extend_from_slice(&packed.to_le_bytes());
            }
        } else {
            self.entries.write_offsets(out);
        }
        let pad = padding(out.len() - start, 4);
        out.resize(out.len() + pad, 0);
        self.entries.write_items(out);
        out.len() - start
    }

    fn count_body_bytes(&self) -> usize {
        self.offset_table_size() + self.entries.count_item_bytes()
    }

    fn on_refreshed(&mut self, header_size: usize) {
        if self.flags.contains(TypeFlags::OFFSET16) && self.entries.count_item_bytes() / 4 >= 0xFFFF {
            self.flags.remove(TypeFlags::OFFSET16);
        }
        let base = header_size + self.offset_table_size();
        self.entries.refresh(base as u32);
        self.entries_start.set(base as u32);
        if self.flags.contains(TypeFlags::SPARSE) {
            self.entry_count.set(self.present() as u32);
        }
    }
}

/// A type spec chunk: per-entry configuration change flags.
#[derive(Clone, Debug, Default)]
pub struct SpecBody {
    pub id: u8,
    pub types_count: u16,
    pub flags: Vec<u32>,
}

impl ChunkBody for SpecBody {
    fn type_tag(&self) -> u16 {
        ChunkType::Spec.tag()
    }

    fn header_fields_size(&self) -> usize {
        8
    }

    fn read_header_fields(&mut self, fields: &ByteRegion) -> Result<()> {
        self.id = fields.get_u8(0);
        self.types_count = fields.get_u16_le(2);
        self.flags = vec![0; fields.get_u32_le(4) as usize];
        Ok(())
    }

    fn write_header_fields(&self, out: &mut Vec<u8>) -> usize {
        out.extend_from_slice(&[self.id, 0]);
        out.extend_from_slice(&self.types_count.to_le_bytes());
        out.extend_from_slice(&(self.flags.len() as u32).to_le_bytes());
        8
    }

    fn read_body(&mut self, reader: &mut BlockReader<'_>, _header: &ChunkHeader) -> Result<()> {
        for flag in self.flags.iter_mut() {
            *flag = reader.read_u32()?;
        }
        Ok(())
    }

    fn write_body(&self, out: &mut Vec<u8>) -> usize {
        for flag in &self.flags {
            out.extend_from_slice(&flag.to_le_bytes());
        }
        self.flags.len() * 4
    }

    fn count_body_bytes(&self) -> usize {
        self.flags.len() * 4
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LibraryEntry {
    pub package_id: u32,
    name: ByteRegion,
}

impl LibraryEntry {
    pub fn new(package_id: u32, name: &str) -> Self {
        let mut region = ByteRegion::new(LIBRARY_NAME_SIZE);
        for (i, unit) in name.encode_utf16().take(LIBRARY_NAME_SIZE / 2 - 1).enumerate() {
            region.put_u16_le(i * 2, unit);
        }
        LibraryEntry { package_id, name: region }
    }

    pub fn name(&self) -> String {
        let units: Vec<u16> = (0..LIBRARY_NAME_SIZE / 2)
            .map(|i| self.name.get_u16_le(i * 2))
            .take_while(|u| *u != 0)
            .collect();
        String::from_utf16_lossy(&units)
    }
}

/// Shared library package id assignments.
#[derive(Clone, Debug, Default)]
pub struct LibraryBody {
    pub entries: Vec<LibraryEntry>,
    declared: u32,
}

impl ChunkBody for LibraryBody {
    fn type_tag(&self) -> u16 {
        ChunkType::Library.tag()
    }

    fn header_fields_size(&self) -> usize {
        4
    }

    fn read_header_fields(&mut self, fields: &ByteRegion) -> Result<()> {
        self.declared = fields.get_u32_le(0);
        Ok(())
    }

    fn write_header_fields(&self, out: &mut Vec<u8>) -> usize {
        out.extend_from_slice(&(self.entries.len() as u32).to_le_bytes());
        4
    }

    fn read_body(&mut self, reader: &mut BlockReader<'_>, _header: &ChunkHeader) -> Result<()> {
        self.entries.clear();
        for _ in 0..self.declared {
            let package_id = reader.read_u32()?;
            let name = ByteRegion::from_bytes(reader.read_bytes(LIBRARY_NAME_SIZE)?.to_vec());
            self.entries.push(LibraryEntry { package_id, name });
        }
        Ok(())
    }

    fn write_body(&self, out: &mut Vec<u8>) -> usize {
        for entry in &self.entries {
            out.extend_from_slice(&entry.package_id.to_le_bytes());
            entry.name.write(out);
        }
        self.count_body_bytes()
    }

    fn count_body_bytes(&self) -> usize {
        self.entries.len() * (4 + LIBRARY_NAME_SIZE)
    }
}

/// The attribute resource ids of a compiled XML document.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResourceMap {
    pub ids: Vec<u32>,
}

impl ChunkBody for ResourceMap {
    fn type_tag(&self) -> u16 {
        ChunkType::XmlResourceMap.tag()
    }

    fn read_body(&mut self, reader: &mut BlockReader<'_>, _header: &ChunkHeader) -> Result<()> {
        self.ids = (0..reader.remaining() / 4).map(|_| reader.read_u32()).collect::<Result<Vec<u32>>>()?;
        Ok(())
    }

    fn write_body(&self, out: &mut Vec<u8>) -> usize {
        for id in &self.ids {
            out.extend_from_slice(&id.to_le_bytes());
        }
        self.ids.len() * 4
    }

    fn count_body_bytes(&self) -> usize {
        self.ids.len() * 4
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::Chunk;

    fn read_type(bytes: &[u8]) -> Chunk<TypeBody> {
        let mut chunk = Chunk::new(TypeBody::default());
        chunk.read(&mut BlockReader::new(bytes)).unwrap();
        chunk
    }

    #[test]
    fn dense_type_chunk_layout() {
        let mut chunk = Chunk::new(TypeBody::new(1, TypeFlags::empty()));
        *chunk.body_mut().get_or_create(0) = EntryBlob::simple(3, 0x10, 42);
        *chunk.body_mut().get_or_create(2) = EntryBlob::simple(4, 0x10, 43);
        chunk.refresh();

        // 8 prefix + 12 fields + 64 config, 3 offsets, 2 entries of 16
        assert_eq!(chunk.header_size(), 84);
        assert_eq!(chunk.count_bytes(), 84 + 12 + 32);
        let bytes = chunk.bytes();
        assert_eq!(u32::from_le_bytes(bytes[16..20].try_into().unwrap()), 96, "entries start");
        assert_eq!(u32::from_le_bytes(bytes[88..92].try_into().unwrap()), NO_ENTRY);

        let mut back = read_type(&bytes);
        assert_eq!(back.body().entry(2).map(EntryBlob::key), Some(4));
        assert!(back.body().entry(1).is_none());
        back.refresh();
        assert_eq!(back.bytes(), bytes);
    }

    #[test]
    fn sparse_type_chunk_counts_present_entries() {
        let mut chunk = Chunk::new(TypeBody::new(2, TypeFlags::SPARSE));
        *chunk.body_mut().get_or_create(5) = EntryBlob::simple(1, 0x03, 7);
        chunk.refresh();
        let bytes = chunk.bytes();
        assert_eq!(u32::from_le_bytes(bytes[12..16].try_into().unwrap()), 1, "entry count");
        let back = read_type(&bytes);
        assert_eq!(back.body().entry_count(), 6);
        assert_eq!(back.body().entry(5).map(EntryBlob::key), Some(1));
    }

    #[test]
    fn trailing_nulls_are_trimmed_from_start() {
        let mut body = TypeBody::default();
        *body.get_or_create(1) = EntryBlob::simple(0, 0x10, 0);
        body.set_entry(6, None);
        body.remove_all_null_from(0);
        assert_eq!(body.entry_count(), 2);
    }

    #[test]
    fn library_round_trip() {
        let mut chunk = Chunk::new(LibraryBody::default());
        chunk.body_mut().entries.push(LibraryEntry::new(0x02, "com.example.lib"));
        chunk.refresh();
        assert_eq!(chunk.count_bytes(), 12 + 260);
        let bytes = chunk.bytes();
        let mut back = Chunk::new(LibraryBody::default());
        back.read(&mut BlockReader::new(&bytes)).unwrap();
        assert_eq!(back.body().entries[0].name(), "com.example.lib");
    }
}
