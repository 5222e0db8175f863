use crate::block::{Block, BlockReader};
use crate::dex::encoded_value::{read_encoded_array, write_encoded_array, EncodedAnnotation, EncodedValue};
use crate::dex::item::{ItemRef, SectionItem};
use crate::dex::key::Key;
use crate::dex::section_list::SectionList;
use crate::dex::section_type::tag;
use crate::dex::{leb, measure, write_u1, write_u2, write_u4, write_uleb128, write_x};
use crate::error::Result;
use cesu8::{from_java_cesu8, to_java_cesu8};

/// `string_data_item`: MUTF-8 bytes with their UTF-16 length.
///
/// The bytes are kept as read, so strings that do not decode still write back unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StringData {
    utf16_size: u32,
    mutf8: Vec<u8>,
}

impl StringData {
    pub fn new(text: &str) -> Self {
        let mut data = StringData::default();
        data.set_text(text);
        data
    }

    /// The decoded text, or `None` for invalid MUTF-8.
    pub fn decoded(&self) -> Option<String> {
        from_java_cesu8(&self.mutf8).ok().map(|s| s.into_owned())
    }

    pub fn text(&self) -> String {
        self.decoded().unwrap_or_else(|| String::from_utf8_lossy(&self.mutf8).into_owned())
    }

    pub fn set_text(&mut self, text: &str) {
        self.utf16_size = text.encode_utf16().count() as u32;
        self.mutf8 = to_java_cesu8(text).into_owned();
    }

    pub fn utf16_size(&self) -> u32 {
        self.utf16_size
    }

    pub fn mutf8(&self) -> &[u8] {
        &self.mutf8
    }
}

impl Block for StringData {
    fn read(&mut self, reader: &mut BlockReader<'_>) -> Result<()> {
        self.utf16_size = reader.read_uleb128()?;
        self.mutf8.clear();
        loop {
            let b = reader.read_u8()?;
            if b == 0 {
                break;
            }
            self.mutf8.push(b);
        }
        Ok(())
    }

    fn write(&self, out: &mut Vec<u8>) -> usize {
        write_uleb128(out, self.utf16_size) + write_x(out, &self.mutf8) + write_u1(out, 0)
    }

    fn count_bytes(&self) -> usize {
        leb::uleb128_size(self.utf16_size) + self.mutf8.len() + 1
    }
}

impl SectionItem for StringData {
    const TYPE: u16 = tag::STRING_DATA;

    fn key(&self, _list: &SectionList) -> Option<Key> {
        self.decoded().map(Key::String)
    }
}

/// `type_list`: the parameter or interface types of a prototype or class.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeList {
    pub types: Vec<ItemRef>,
}

impl TypeList {
    pub fn from_raw(indices: &[u16]) -> Self {
        TypeList { types: indices.iter().map(|&i| ItemRef::from_raw(i as u32)).collect() }
    }
}

impl Block for TypeList {
    fn read(&mut self, reader: &mut BlockReader<'_>) -> Result<()> {
        let size = reader.read_u32()? as usize;
        self.types = Vec::with_capacity(size.min(reader.remaining() / 2));
        for _ in 0..size {
            self.types.push(ItemRef::from_raw(reader.read_u16()? as u32));
        }
        Ok(())
    }

    fn write(&self, out: &mut Vec<u8>) -> usize {
        let mut c = write_u4(out, self.types.len() as u32);
        for t in &self.types {
            c += write_u2(out, t.raw() as u16);
        }
        c
    }

    fn count_bytes(&self) -> usize {
        4 + self.types.len() * 2
    }
}

impl SectionItem for TypeList {
    const TYPE: u16 = tag::TYPE_LIST;

    fn visit_refs(&self, visit: &mut dyn FnMut(u16, &ItemRef)) {
        for t in &self.types {
            visit(tag::TYPE_ID, t);
        }
    }

    fn visit_refs_mut(&mut self, visit: &mut dyn FnMut(u16, &mut ItemRef)) {
        for t in &mut self.types {
            visit(tag::TYPE_ID, t);
        }
    }

    fn key(&self, list: &SectionList) -> Option<Key> {
        self.types.iter().map(|t| list.type_descriptor(t)).collect::<Option<Vec<_>>>().map(Key::TypeList)
    }
}

pub const VISIBILITY_BUILD: u8 = 0x00;
pub const VISIBILITY_RUNTIME: u8 = 0x01;
pub const VISIBILITY_SYSTEM: u8 = 0x02;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnnotationItem {
    pub visibility: u8,
    pub annotation: EncodedAnnotation,
}

impl Block for AnnotationItem {
    fn read(&mut self, reader: &mut BlockReader<'_>) -> Result<()> {
        self.visibility = reader.read_u8()?;
        self.annotation = EncodedAnnotation::read(reader)?;
        Ok(())
    }

    fn write(&self, out: &mut Vec<u8>) -> usize {
        write_u1(out, self.visibility) + self.annotation.write(out)
    }

    fn count_bytes(&self) -> usize {
        measure(|out| self.write(out))
    }
}

impl SectionItem for AnnotationItem {
    const TYPE: u16 = tag::ANNOTATION_ITEM;

    fn visit_refs(&self, visit: &mut dyn FnMut(u16, &ItemRef)) {
        self.annotation.visit_refs(visit);
    }

    fn visit_refs_mut(&mut self, visit: &mut dyn FnMut(u16, &mut ItemRef)) {
        self.annotation.visit_refs_mut(visit);
    }
}

fn read_offsets(reader: &mut BlockReader<'_>) -> Result<Vec<ItemRef>> {
    let size = reader.read_u32()? as usize;
    let mut offsets = Vec::with_capacity(size.min(reader.remaining() / 4));
    for _ in 0..size {
        offsets.push(ItemRef::from_raw(reader.read_u32()?));
    }
    Ok(offsets)
}

fn write_offsets(out: &mut Vec<u8>, offsets: &[ItemRef]) -> usize {
    let mut c = write_u4(out, offsets.len() as u32);
    for r in offsets {
        c += write_u4(out, r.raw());
    }
    c
}

/// `annotation_set_item`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnnotationSet {
    pub entries: Vec<ItemRef>,
}

impl Block for AnnotationSet {
    fn read(&mut self, reader: &mut BlockReader<'_>) -> Result<()> {
        self.entries = read_offsets(reader)?;
        Ok(())
    }

    fn write(&self, out: &mut Vec<u8>) -> usize {
        write_offsets(out, &self.entries)
    }

    fn count_bytes(&self) -> usize {
        4 + self.entries.len() * 4
    }
}

impl SectionItem for AnnotationSet {
    const TYPE: u16 = tag::ANNOTATION_SET;

    fn visit_refs(&self, visit: &mut dyn FnMut(u16, &ItemRef)) {
        for r in &self.entries {
            visit(tag::ANNOTATION_ITEM, r);
        }
    }

    fn visit_refs_mut(&mut self, visit: &mut dyn FnMut(u16, &mut ItemRef)) {
        for r in &mut self.entries {
            visit(tag::ANNOTATION_ITEM, r);
        }
    }
}

/// `annotation_set_ref_list`: one annotation set per method parameter, null for none.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnnotationGroup {
    pub sets: Vec<ItemRef>,
}

impl Block for AnnotationGroup {
    fn read(&mut self, reader: &mut BlockReader<'_>) -> Result<()> {
        self.sets = read_offsets(reader)?;
        Ok(())
    }

    fn write(&self, out: &mut Vec<u8>) -> usize {
        write_offsets(out, &self.sets)
    }

    fn count_bytes(&self) -> usize {
        4 + self.sets.len() * 4
    }
}

impl SectionItem for AnnotationGroup {
    const TYPE: u16 = tag::ANNOTATION_GROUP;

    fn visit_refs(&self, visit: &mut dyn FnMut(u16, &ItemRef)) {
        for r in &self.sets {
            visit(tag::ANNOTATION_SET, r);
        }
    }

    fn visit_refs_mut(&mut self, visit: &mut dyn FnMut(u16, &mut ItemRef)) {
        for r in &mut self.sets {
            visit(tag::ANNOTATION_SET, r);
        }
    }
}

/// A field, method or parameter entry of an [`AnnotationsDirectory`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemberAnnotation {
    pub member: ItemRef,
    pub annotations: ItemRef,
}

impl MemberAnnotation {
    fn read(reader: &mut BlockReader<'_>) -> Result<MemberAnnotation> {
        let member = ItemRef::from_raw(reader.read_u32()?);
        let annotations = ItemRef::from_raw(reader.read_u32()?);
        Ok(MemberAnnotation { member, annotations })
    }

    fn write(&self, out: &mut Vec<u8>) -> usize {
        write_u4(out, self.member.raw()) + write_u4(out, self.annotations.raw())
    }
}

/// `annotations_directory_item`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnnotationsDirectory {
    pub class_annotations: ItemRef,
    pub fields: Vec<MemberAnnotation>,
    pub methods: Vec<MemberAnnotation>,
    /// Annotation groups of method parameters.
    pub parameters: Vec<MemberAnnotation>,
}

impl AnnotationsDirectory {
    pub fn is_empty(&self) -> bool {
        self.class_annotations.is_null() && self.fields.is_empty() && self.methods.is_empty() && self.parameters.is_empty()
    }
}

impl Block for AnnotationsDirectory {
    fn read(&mut self, reader: &mut BlockReader<'_>) -> Result<()> {
        self.class_annotations = ItemRef::from_raw(reader.read_u32()?);
        let fields = reader.read_u32()? as usize;
        let methods = reader.read_u32()? as usize;
        let parameters = reader.read_u32()? as usize;
        let mut table = |count: usize| -> Result<Vec<MemberAnnotation>> {
            let mut entries = Vec::with_capacity(count.min(reader.remaining() / 8));
            for _ in 0..count {
                entries.push(MemberAnnotation::read(reader)?);
            }
            Ok(entries)
        };
        self.fields = table(fields)?;
        self.methods = table(methods)?;
        self.parameters = table(parameters)?;
        Ok(())
    }

    fn write(&self, out: &mut Vec<u8>) -> usize {
        let mut c = write_u4(out, self.class_annotations.raw());
        c += write_u4(out, self.fields.len() as u32);
        c += write_u4(out, self.methods.len() as u32);
        c += write_u4(out, self.parameters.len() as u32);
        for entry in self.fields.iter().chain(&self.methods).chain(&self.parameters) {
            c += entry.write(out);
        }
        c
    }

    fn count_bytes(&self) -> usize {
        16 + (self.fields.len() + self.methods.len() + self.parameters.len()) * 8
    }
}

impl SectionItem for AnnotationsDirectory {
    const TYPE: u16 = tag::ANNOTATIONS_DIRECTORY;

    fn visit_refs(&self, visit: &mut dyn FnMut(u16, &ItemRef)) {
        visit(tag::ANNOTATION_SET, &self.class_annotations);
        for entry in &self.fields {
            visit(tag::FIELD_ID, &entry.member);
            visit(tag::ANNOTATION_SET, &entry.annotations);
        }
        for entry in &self.methods {
            visit(tag::METHOD_ID, &entry.member);
            visit(tag::ANNOTATION_SET, &entry.annotations);
        }
        for entry in &self.parameters {
            visit(tag::METHOD_ID, &entry.member);
            visit(tag::ANNOTATION_GROUP, &entry.annotations);
        }
    }

    fn visit_refs_mut(&mut self, visit: &mut dyn FnMut(u16, &mut ItemRef)) {
        visit(tag::ANNOTATION_SET, &mut self.class_annotations);
        for entry in &mut self.fields {
            visit(tag::FIELD_ID, &mut entry.member);
            visit(tag::ANNOTATION_SET, &mut entry.annotations);
        }
        for entry in &mut self.methods {
            visit(tag::METHOD_ID, &mut entry.member);
            visit(tag::ANNOTATION_SET, &mut entry.annotations);
        }
        for entry in &mut self.parameters {
            visit(tag::METHOD_ID, &mut entry.member);
            visit(tag::ANNOTATION_GROUP, &mut entry.annotations);
        }
    }

    /// Member tables must be ordered by index.
    fn on_refs_updated(&mut self) {
        self.fields.sort_by_key(|e| e.member.raw());
        self.methods.sort_by_key(|e| e.member.raw());
        self.parameters.sort_by_key(|e| e.member.raw());
    }
}

/// `encoded_array_item`: static values of a class or the arguments of a call site.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EncodedArrayItem {
    pub values: Vec<EncodedValue>,
}

impl Block for EncodedArrayItem {
    fn read(&mut self, reader: &mut BlockReader<'_>) -> Result<()> {
        self.values = read_encoded_array(reader)?;
        Ok(())
    }

    fn write(&self, out: &mut Vec<u8>) -> usize {
        write_encoded_array(&self.values, out)
    }

    fn count_bytes(&self) -> usize {
        measure(|out| self.write(out))
    }
}

impl SectionItem for EncodedArrayItem {
    const TYPE: u16 = tag::ENCODED_ARRAY;

    fn visit_refs(&self, visit: &mut dyn FnMut(u16, &ItemRef)) {
        for value in &self.values {
            value.visit_refs(visit);
        }
    }

    fn visit_refs_mut(&mut self, visit: &mut dyn FnMut(u16, &mut ItemRef)) {
        for value in &mut self.values {
            value.visit_refs_mut(visit);
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncodedField {
    pub field: ItemRef,
    pub access_flags: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncodedMethod {
    pub method: ItemRef,
    pub access_flags: u32,
    /// Null for abstract and native methods.
    pub code: ItemRef,
}

/// `class_data_item`. Member indices are stored as differences from the previous entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassData {
    pub static_fields: Vec<EncodedField>,
    pub instance_fields: Vec<EncodedField>,
    pub direct_methods: Vec<EncodedMethod>,
    pub virtual_methods: Vec<EncodedMethod>,
}

impl ClassData {
    fn read_fields(reader: &mut BlockReader<'_>, count: usize) -> Result<Vec<EncodedField>> {
        let mut fields = Vec::with_capacity(count.min(reader.remaining()));
        let mut index = 0u32;
        for _ in 0..count {
            index = index.wrapping_add(reader.read_uleb128()?);
            fields.push(EncodedField { field: ItemRef::from_raw(index), access_flags: reader.read_uleb128()? });
        }
        Ok(fields)
    }

    fn read_methods(reader: &mut BlockReader<'_>, count: usize) -> Result<Vec<EncodedMethod>> {
        let mut methods = Vec::with_capacity(count.min(reader.remaining()));
        let mut index = 0u32;
        for _ in 0..count {
            index = index.wrapping_add(reader.read_uleb128()?);
            let access_flags = reader.read_uleb128()?;
            let code = ItemRef::from_raw(reader.read_uleb128()?);
            methods.push(EncodedMethod { method: ItemRef::from_raw(index), access_flags, code });
        }
        Ok(methods)
    }

    fn write_fields(out: &mut Vec<u8>, fields: &[EncodedField]) -> usize {
        let mut c = 0;
        let mut last = 0u32;
        for f in fields {
            c += write_uleb128(out, f.field.raw().wrapping_sub(last));
            last = f.field.raw();
            c += write_uleb128(out, f.access_flags);
        }
        c
    }

    fn write_methods(out: &mut Vec<u8>, methods: &[EncodedMethod]) -> usize {
        let mut c = 0;
        let mut last = 0u32;
        for m in methods {
            c += write_uleb128(out, m.method.raw().wrapping_sub(last));
            last = m.method.raw();
            c += write_uleb128(out, m.access_flags);
            c += write_uleb128(out, m.code.raw());
        }
        c
    }

    fn methods(&self) -> impl Iterator<Item = &EncodedMethod> {
        self.direct_methods.iter().chain(&self.virtual_methods)
    }
}

impl Block for ClassData {
    fn read(&mut self, reader: &mut BlockReader<'_>) -> Result<()> {
        let static_fields = reader.read_uleb128()? as usize;
        let instance_fields = reader.read_uleb128()? as usize;
        let direct_methods = reader.read_uleb128()? as usize;
        let virtual_methods = reader.read_uleb128()? as usize;
        self.static_fields = Self::read_fields(reader, static_fields)?;
        self.instance_fields = Self::read_fields(reader, instance_fields)?;
        self.direct_methods = Self::read_methods(reader, direct_methods)?;
        self.virtual_methods = Self::read_methods(reader, virtual_methods)?;
        Ok(())
    }

    fn write(&self, out: &mut Vec<u8>) -> usize {
        let mut c = 0;
        c += write_uleb128(out, self.static_fields.len() as u32);
        c += write_uleb128(out, self.instance_fields.len() as u32);
        c += write_uleb128(out, self.direct_methods.len() as u32);
        c += write_uleb128(out, self.virtual_methods.len() as u32);
        c += Self::write_fields(out, &self.static_fields);
        c += Self::write_fields(out, &self.instance_fields);
        c += Self::write_methods(out, &self.direct_methods);
        c += Self::write_methods(out, &self.virtual_methods);
        c
    }

    fn count_bytes(&self) -> usize {
        measure(|out| self.write(out))
    }
}

impl SectionItem for ClassData {
    const TYPE: u16 = tag::CLASS_DATA;

    fn visit_refs(&self, visit: &mut dyn FnMut(u16, &ItemRef)) {
        for f in self.static_fields.iter().chain(&self.instance_fields) {
            visit(tag::FIELD_ID, &f.field);
        }
        for m in self.methods() {
            visit(tag::METHOD_ID, &m.method);
            visit(tag::CODE, &m.code);
        }
    }

    fn visit_refs_mut(&mut self, visit: &mut dyn FnMut(u16, &mut ItemRef)) {
        for f in self.static_fields.iter_mut().chain(&mut self.instance_fields) {
            visit(tag::FIELD_ID, &mut f.field);
        }
        for m in self.direct_methods.iter_mut().chain(&mut self.virtual_methods) {
            visit(tag::METHOD_ID, &mut m.method);
            visit(tag::CODE, &mut m.code);
        }
    }

    /// Index differences are unsigned, so every member list is kept in index order.
    fn on_refs_updated(&mut self) {
        self.static_fields.sort_by_key(|f| f.field.raw());
        self.instance_fields.sort_by_key(|f| f.field.raw());
        self.direct_methods.sort_by_key(|m| m.method.raw());
        self.virtual_methods.sort_by_key(|m| m.method.raw());
    }
}

/// `hiddenapi_class_data_item`, kept as opaque bytes including its leading size.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HiddenApi {
    pub data: Vec<u8>,
}

impl Block for HiddenApi {
    fn read(&mut self, reader: &mut BlockReader<'_>) -> Result<()> {
        let start = reader.position();
        let size = reader.read_u32()? as usize;
        if size < 4 {
            fail!(("hidden api section declares {size} bytes"), ("offset {start}"));
        }
        reader.seek(start)?;
        self.data = reader.read_bytes(size)?.to_vec();
        Ok(())
    }

    fn write(&self, out: &mut Vec<u8>) -> usize {
        write_x(out, &self.data)
    }

    fn count_bytes(&self) -> usize {
        self.data.len()
    }
}

impl SectionItem for HiddenApi {
    const TYPE: u16 = tag::HIDDEN_API;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_data_keeps_undecodable_bytes() {
        let s = StringData::new("h\u{e9}\u{1F600}");
        assert_eq!(s.utf16_size(), 4);
        // the supplementary character becomes two 3-byte surrogates
        assert_eq!(s.mutf8().len(), 1 + 2 + 6);
        assert_eq!(s.bytes().len(), s.count_bytes());

        let raw = [0x02, 0xC0, 0xFF, 0x00];
        let mut bad = StringData::default();
        bad.read(&mut BlockReader::new(&raw)).unwrap();
        assert_eq!(bad.decoded(), None);
        assert_eq!(bad.bytes(), raw);
    }

    #[test]
    fn string_data_size_prefix_grows_with_length() {
        let long = StringData::new(&"x".repeat(200));
        assert_eq!(long.count_bytes(), 2 + 200 + 1);
        assert_eq!(long.bytes().len(), long.count_bytes());
    }

    #[test]
    fn class_data_indices_are_diff_encoded() {
        let data = ClassData {
            static_fields: vec![
                EncodedField { field: ItemRef::from_raw(3), access_flags: 8 },
                EncodedField { field: ItemRef::from_raw(5), access_flags: 8 },
            ],
            virtual_methods: vec![EncodedMethod {
                method: ItemRef::from_raw(2),
                access_flags: 1,
                code: ItemRef::from_raw(0x120),
            }],
            ..Default::default()
        };
        let bytes = data.bytes();
        assert_eq!(bytes, vec![2, 0, 0, 1, 3, 8, 2, 8, 2, 1, 0xA0, 0x02]);

        let mut back = ClassData::default();
        back.read(&mut BlockReader::new(&bytes)).unwrap();
        assert_eq!(back, data);
        let mut refs = vec![];
        back.visit_refs(&mut |t, r| refs.push((t, r.raw())));
        assert_eq!(refs.last(), Some(&(tag::CODE, 0x120)));
    }

    #[test]
    fn directory_tables_sort_after_refresh() {
        let mut dir = AnnotationsDirectory {
            methods: vec![
                MemberAnnotation { member: ItemRef::from_raw(9), annotations: ItemRef::from_raw(0x40) },
                MemberAnnotation { member: ItemRef::from_raw(1), annotations: ItemRef::from_raw(0x50) },
            ],
            ..Default::default()
        };
        assert_eq!(dir.count_bytes(), 32);
        dir.on_refs_updated();
        assert_eq!(dir.methods[0].member.raw(), 1);
        assert!(!dir.is_empty());
    }

    #[test]
    fn hidden_api_reads_its_declared_size() {
        let raw = [12, 0, 0, 0, 1, 2, 3, 4, 5, 6, 7, 8, 0xEE];
        let mut api = HiddenApi::default();
        let mut reader = BlockReader::new(&raw);
        api.read(&mut reader).unwrap();
        assert_eq!(api.data.len(), 12);
        assert_eq!(reader.position(), 12);
    }
}
