use crate::block::{align_up, padding, ArrayLayout, Block, BlockReader, ByteRegion, CountedOffsetArray, IntegerCell};
use crate::chunk::{ChunkBody, ChunkHeader, ChunkType};
use crate::error::Result;
use bitflags::bitflags;
use std::collections::BTreeMap;

const SPAN_END: u32 = 0xFFFF_FFFF;
/// Written after the last style when the pool has any.
const STYLES_END: [u8; 8] = [0xFF; 8];

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct StringPoolFlags: u32 {
        const SORTED = 0x0000_0001;
        const UTF8 = 0x0000_0100;
    }
}

fn encode_len_utf8(out: &mut Vec<u8>, len: usize) {
    if len > 0x7F {
        out.push(((len >> 8) & 0x7F) as u8 | 0x80);
    }
    out.push((len & 0xFF) as u8);
}

fn encode_len_utf16(out: &mut Vec<u8>, len: usize) {
    if len > 0x7FFF {
        out.extend_from_slice(&(((len >> 16) & 0x7FFF) as u16 | 0x8000).to_le_bytes());
    }
    out.extend_from_slice(&((len & 0xFFFF) as u16).to_le_bytes());
}

fn read_len_utf8(reader: &mut BlockReader<'_>) -> Result<usize> {
    let first = reader.read_u8()? as usize;
    if first & 0x80 == 0 {
        return Ok(first);
    }
    Ok(((first & 0x7F) << 8) | reader.read_u8()? as usize)
}

fn read_len_utf16(reader: &mut BlockReader<'_>) -> Result<usize> {
    let first = reader.read_u16()? as usize;
    if first & 0x8000 == 0 {
        return Ok(first);
    }
    Ok(((first & 0x7FFF) << 16) | reader.read_u16()? as usize)
}

/// One encoded string, kept as its raw bytes: length prefixes, data and terminator.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StringEntry {
    utf8: bool,
    raw: ByteRegion,
}

impl StringEntry {
    pub fn new(utf8: bool) -> Self {
        StringEntry { utf8, raw: ByteRegion::default() }
    }

    pub fn encode(text: &str, utf8: bool) -> Self {
        let mut entry = StringEntry::new(utf8);
        entry.set_text(text);
        entry
    }

    pub fn is_utf8(&self) -> bool {
        self.utf8
    }

    pub fn set_text(&mut self, text: &str) {
        let mut out = Vec::new();
        let units = text.encode_utf16().count();
        if self.utf8 {
            encode_len_utf8(&mut out, units);
            encode_len_utf8(&mut out, text.len());
            out.extend_from_slice(text.as_bytes());
            out.push(0);
        } else {
            encode_len_utf16(&mut out, units);
            for unit in text.encode_utf16() {
                out.extend_from_slice(&unit.to_le_bytes());
            }
            out.extend_from_slice(&[0, 0]);
        }
        self.raw = ByteRegion::from_bytes(out);
    }

    pub fn text(&self) -> Result<String> {
        let mut reader = BlockReader::new(self.raw.as_slice());
        if self.utf8 {
            read_len_utf8(&mut reader)?;
            let len = read_len_utf8(&mut reader)?;
            let data = reader.read_bytes(len)?;
            match std::str::from_utf8(data) {
                Ok(text) => Ok(text.to_string()),
                Err(e) => Err(err!("invalid utf-8 in string pool entry: {e}")),
            }
        } else {
            let len = read_len_utf16(&mut reader)?;
            let units = (0..len).map(|_| reader.read_u16()).collect::<Result<Vec<u16>>>()?;
            String::from_utf16(&units).map_err(|e| err!("invalid utf-16 in string pool entry: {e}"))
        }
    }
}

impl Block for StringEntry {
    fn read(&mut self, reader: &mut BlockReader<'_>) -> Result<()> {
        let start = reader.position();
        if self.utf8 {
            read_len_utf8(reader)?;
            let len = read_len_utf8(reader)?;
            reader.skip(len + 1)?;
        } else {
            let len = read_len_utf16(reader)?;
            reader.skip(len * 2 + 2)?;
        }
        let total = reader.position() - start;
        reader.seek(start)?;
        self.raw = ByteRegion::from_bytes(reader.read_bytes(total)?.to_vec());
        Ok(())
    }

    fn write(&self, out: &mut Vec<u8>) -> usize {
        self.raw.write(out)
    }

    fn count_bytes(&self) -> usize {
        self.raw.len()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StyleSpan {
    pub name: u32,
    pub first: u32,
    pub last: u32,
}

/// The spans styling the string with the same index.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StyleEntry {
    pub spans: Vec<StyleSpan>,
}

impl Block for StyleEntry {
    fn read(&mut self, reader: &mut BlockReader<'_>) -> Result<()> {
        self.spans.clear();
        loop {
            let name = reader.read_u32()?;
            if name == SPAN_END {
                return Ok(());
            }
            let first = reader.read_u32()?;
            let last = reader.read_u32()?;
            self.spans.push(StyleSpan { name, first, last });
        }
    }

    fn write(&self, out: &mut Vec<u8>) -> usize {
        for span in &self.spans {
            out.extend_from_slice(&span.name.to_le_bytes());
            out.extend_from_slice(&span.first.to_le_bytes());
            out.extend_from_slice(&span.last.to_le_bytes());
        }
        out.extend_from_slice(&SPAN_END.to_le_bytes());
        self.count_bytes()
    }

    fn count_bytes(&self) -> usize {
        self.spans.len() * 12 + 4
    }
}

/// A string pool chunk.
///
/// Besides the strings themselves the pool keeps a side table of which records point at
/// each string, so that callers can tell unused strings from live ones.
#[derive(Clone, Debug)]
pub struct StringPool {
    flags: StringPoolFlags,
    string_count: IntegerCell,
    style_count: IntegerCell,
    strings_start: IntegerCell,
    styles_start: IntegerCell,
    strings: CountedOffsetArray<StringEntry>,
    styles: CountedOffsetArray<StyleEntry>,
    references: BTreeMap<u32, Vec<u32>>,
}

impl Default for StringPool {
    fn default() -> Self {
        StringPool::new(false)
    }
}

impl StringPool {
    pub fn new(utf8: bool) -> Self {
        let string_count = IntegerCell::new(0);
        let style_count = IntegerCell::new(0);
        let strings_start = IntegerCell::new(0);
        let styles_start = IntegerCell::new(0);
        let flags = if utf8 { StringPoolFlags::UTF8 } else { StringPoolFlags::empty() };
        StringPool {
            flags,
            strings: CountedOffsetArray::new(string_count.clone(), strings_start.clone(), ArrayLayout::Dense),
            styles: CountedOffsetArray::new(style_count.clone(), styles_start.clone(), ArrayLayout::Dense),
            string_count,
            style_count,
            strings_start,
            styles_start,
            references: BTreeMap::new(),
        }
    }

    pub fn flags(&self) -> StringPoolFlags {
        self.flags
    }

    pub fn is_utf8(&self) -> bool {
        self.flags.contains(StringPoolFlags::UTF8)
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    pub fn get(&self, index: u32) -> Option<String> {
        self.strings.get(index as usize).and_then(|entry| entry.text().ok())
    }

    pub fn index_of(&self, text: &str) -> Option<u32> {
        (0..self.strings.len() as u32).find(|i| self.get(*i).as_deref() == Some(text))
    }

    /// Index of `text`, appending a new entry when the pool does not have it yet.
    pub fn get_or_create(&mut self, text: &str) -> u32 {
        if let Some(index) = self.index_of(text) {
            return index;
        }
        let utf8 = self.is_utf8();
        *self.strings.create_next() = StringEntry::encode(text, utf8);
        self.flags.remove(StringPoolFlags::SORTED);
        self.strings.len() as u32 - 1
    }

    pub fn style(&self, index: u32) -> Option<&StyleEntry> {
        self.styles.get(index as usize)
    }

    pub fn set_style(&mut self, index: u32, style: StyleEntry) {
        self.styles.set(index as usize, Some(style));
    }

    pub fn link(&mut self, index: u32, referrer: u32) {
        let referrers = self.references.entry(index).or_default();
        if !referrers.contains(&referrer) {
            referrers.push(referrer);
        }
    }

    pub fn unlink(&mut self, index: u32, referrer: u32) {
        if let Some(referrers) = self.references.get_mut(&index) {
            referrers.retain(|r| *r != referrer);
            if referrers.is_empty() {
                self.references.remove(&index);
            }
        }
    }

    pub fn referrers(&self, index: u32) -> &[u32] {
        self.references.get(&index).map(Vec::as_slice).unwrap_or_default()
    }

    fn string_data_size(&self) -> usize {
        align_up(self.strings.count_item_bytes(), 4)
    }

    fn style_data_size(&self) -> usize {
        if self.styles.is_empty() {
            0
        } else {
            self.styles.count_item_bytes() + STYLES_END.len()
        }
    }
}

impl ChunkBody for StringPool {
    fn type_tag(&self) -> u16 {
        ChunkType::StringPool.tag()
    }

    fn header_fields_size(&self) -> usize {
        20
    }

    fn read_header_fields(&mut self, fields: &ByteRegion) -> Result<()> {
        self.string_count.set(fields.get_u32_le(0));
        self.style_count.set(fields.get_u32_le(4));
        self.flags = StringPoolFlags::from_bits_retain(fields.get_u32_le(8));
        self.strings_start.set(fields.get_u32_le(12));
        self.styles_start.set(fields.get_u32_le(16));
        Ok(())
    }

    fn write_header_fields(&self, out: &mut Vec<u8>) -> usize {
        let fields = [
            self.string_count.get(),
            self.style_count.get(),
            self.flags.bits(),
            self.strings_start.get(),
            self.styles_start.get(),
        ];
        for value in fields {
            out.extend_from_slice(&value.to_le_bytes());
        }
        20
    }

    fn read_body(&mut self, reader: &mut BlockReader<'_>, header: &ChunkHeader) -> Result<()> {
        self.strings.read_offsets(reader, self.string_count.get() as usize)?;
        self.styles.read_offsets(reader, self.style_count.get() as usize)?;
        let utf8 = self.is_utf8();
        let strings_base = header.start + self.strings_start.get() as usize;
        self.strings.read_items(reader, strings_base, || StringEntry::new(utf8))?;
        let styles_base = header.start + self.styles_start.get() as usize;
        self.styles.read_items(reader, styles_base, StyleEntry::default)?;
        reader.seek(reader.end())
    }

    fn write_body(&self, out: &mut Vec<u8>) -> usize {
        let mut c = self.strings.write_offsets(out);
        c += self.styles.write_offsets(out);
        let strings = self.strings.write_items(out);
        let pad = padding(strings, 4);
        out.resize(out.len() + pad, 0);
        c += strings + pad;
        c += self.styles.write_items(out);
        if !self.styles.is_empty() {
            out.extend_from_slice(&STYLES_END);
            c += STYLES_END.len();
        }
        c
    }

    fn count_body_bytes(&self) -> usize {
        self.strings.count_offset_bytes()
            + self.styles.count_offset_bytes()
            + self.string_data_size()
            + self.style_data_size()
    }

    fn on_refreshed(&mut self, header_size: usize) {
        let strings_base = header_size + self.strings.count_offset_bytes() + self.styles.count_offset_bytes();
        self.strings.refresh(strings_base as u32);
        let styles_base = strings_base + self.string_data_size();
        self.styles.refresh(styles_base as u32);
    }
}
