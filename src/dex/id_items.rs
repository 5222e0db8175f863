use crate::block::{Block, BlockReader};
use crate::dex::item::{ItemRef, SectionItem};
use crate::dex::key::{FieldKey, Key, MethodKey, ProtoKey};
use crate::dex::section_list::SectionList;
use crate::dex::section_type::tag;
use crate::dex::{write_u2, write_u4};
use crate::error::Result;
use bitflags::bitflags;

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct AccessFlags: u32 {
        const PUBLIC = 0x1;
        const PRIVATE = 0x2;
        const PROTECTED = 0x4;
        const STATIC = 0x8;
        const FINAL = 0x10;
        const SYNCHRONIZED = 0x20;
        const VOLATILE = 0x40;
        const BRIDGE = 0x40;
        const TRANSIENT = 0x80;
        const VARARGS = 0x80;
        const NATIVE = 0x100;
        const INTERFACE = 0x200;
        const ABSTRACT = 0x400;
        const STRICT = 0x800;
        const SYNTHETIC = 0x1000;
        const ANNOTATION = 0x2000;
        const ENUM = 0x4000;
        const CONSTRUCTOR = 0x10000;
        const DECLARED_SYNCHRONIZED = 0x20000;
    }
}

/// `string_id_item`: offset of the string data.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StringId {
    pub data: ItemRef,
}

impl Block for StringId {
    fn read(&mut self, reader: &mut BlockReader<'_>) -> Result<()> {
        self.data = ItemRef::from_raw(reader.read_u32()?);
        Ok(())
    }

    fn write(&self, out: &mut Vec<u8>) -> usize {
        write_u4(out, self.data.raw())
    }

    fn count_bytes(&self) -> usize {
        4
    }
}

impl SectionItem for StringId {
    const TYPE: u16 = tag::STRING_ID;

    fn visit_refs(&self, visit: &mut dyn FnMut(u16, &ItemRef)) {
        visit(tag::STRING_DATA, &self.data);
    }

    fn visit_refs_mut(&mut self, visit: &mut dyn FnMut(u16, &mut ItemRef)) {
        visit(tag::STRING_DATA, &mut self.data);
    }

    fn key(&self, list: &SectionList) -> Option<Key> {
        list.string_data_text(&self.data).map(Key::String)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeId {
    pub descriptor: ItemRef,
}

impl Block for TypeId {
    fn read(&mut self, reader: &mut BlockReader<'_>) -> Result<()> {
        self.descriptor = ItemRef::from_raw(reader.read_u32()?);
        Ok(())
    }

    fn write(&self, out: &mut Vec<u8>) -> usize {
        write_u4(out, self.descriptor.raw())
    }

    fn count_bytes(&self) -> usize {
        4
    }
}

impl SectionItem for TypeId {
    const TYPE: u16 = tag::TYPE_ID;

    fn visit_refs(&self, visit: &mut dyn FnMut(u16, &ItemRef)) {
        visit(tag::STRING_ID, &self.descriptor);
    }

    fn visit_refs_mut(&mut self, visit: &mut dyn FnMut(u16, &mut ItemRef)) {
        visit(tag::STRING_ID, &mut self.descriptor);
    }

    fn key(&self, list: &SectionList) -> Option<Key> {
        list.string_text(&self.descriptor).map(Key::Type)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProtoId {
    pub shorty: ItemRef,
    pub return_type: ItemRef,
    /// Offset of a type list; null for no parameters.
    pub parameters: ItemRef,
}

impl ProtoId {
    pub fn proto_key(&self, list: &SectionList) -> Option<ProtoKey> {
        let return_type = list.type_descriptor(&self.return_type)?;
        let params = list.type_list_descriptors(&self.parameters)?;
        Some(ProtoKey { return_type, params })
    }
}

impl Block for ProtoId {
    fn read(&mut self, reader: &mut BlockReader<'_>) -> Result<()> {
        self.shorty = ItemRef::from_raw(reader.read_u32()?);
        self.return_type = ItemRef::from_raw(reader.read_u32()?);
        self.parameters = ItemRef::from_raw(reader.read_u32()?);
        Ok(())
    }

    fn write(&self, out: &mut Vec<u8>) -> usize {
        write_u4(out, self.shorty.raw()) + write_u4(out, self.return_type.raw()) + write_u4(out, self.parameters.raw())
    }

    fn count_bytes(&self) -> usize {
        12
    }
}

impl SectionItem for ProtoId {
    const TYPE: u16 = tag::PROTO_ID;

    fn visit_refs(&self, visit: &mut dyn FnMut(u16, &ItemRef)) {
        visit(tag::STRING_ID, &self.shorty);
        visit(tag::TYPE_ID, &self.return_type);
        visit(tag::TYPE_LIST, &self.parameters);
    }

    fn visit_refs_mut(&mut self, visit: &mut dyn FnMut(u16, &mut ItemRef)) {
        visit(tag::STRING_ID, &mut self.shorty);
        visit(tag::TYPE_ID, &mut self.return_type);
        visit(tag::TYPE_LIST, &mut self.parameters);
    }

    fn key(&self, list: &SectionList) -> Option<Key> {
        self.proto_key(list).map(Key::Proto)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldId {
    pub class: ItemRef,
    pub field_type: ItemRef,
    pub name: ItemRef,
}

impl Block for FieldId {
    fn read(&mut self, reader: &mut BlockReader<'_>) -> Result<()> {
        self.class = ItemRef::from_raw(reader.read_u16()? as u32);
        self.field_type = ItemRef::from_raw(reader.read_u16()? as u32);
        self.name = ItemRef::from_raw(reader.read_u32()?);
        Ok(())
    }

    fn write(&self, out: &mut Vec<u8>) -> usize {
        write_u2(out, self.class.raw() as u16) + write_u2(out, self.field_type.raw() as u16) + write_u4(out, self.name.raw())
    }

    fn count_bytes(&self) -> usize {
        8
    }
}

impl SectionItem for FieldId {
    const TYPE: u16 = tag::FIELD_ID;

    fn visit_refs(&self, visit: &mut dyn FnMut(u16, &ItemRef)) {
        visit(tag::TYPE_ID, &self.class);
        visit(tag::TYPE_ID, &self.field_type);
        visit(tag::STRING_ID, &self.name);
    }

    fn visit_refs_mut(&mut self, visit: &mut dyn FnMut(u16, &mut ItemRef)) {
        visit(tag::TYPE_ID, &mut self.class);
        visit(tag::TYPE_ID, &mut self.field_type);
        visit(tag::STRING_ID, &mut self.name);
    }

    fn key(&self, list: &SectionList) -> Option<Key> {
        Some(Key::Field(FieldKey {
            class: list.type_descriptor(&self.class)?,
            name: list.string_text(&self.name)?,
            field_type: list.type_descriptor(&self.field_type)?,
        }))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MethodId {
    pub class: ItemRef,
    pub proto: ItemRef,
    pub name: ItemRef,
}

impl Block for MethodId {
    fn read(&mut self, reader: &mut BlockReader<'_>) -> Result<()> {
        self.class = ItemRef::from_raw(reader.read_u16()? as u32);
        self.proto = ItemRef::from_raw(reader.read_u16()? as u32);
        self.name = ItemRef::from_raw(reader.read_u32()?);
        Ok(())
    }

    fn write(&self, out: &mut Vec<u8>) -> usize {
        write_u2(out, self.class.raw() as u16) + write_u2(out, self.proto.raw() as u16) + write_u4(out, self.name.raw())
    }

    fn count_bytes(&self) -> usize {
        8
    }
}

impl SectionItem for MethodId {
    const TYPE: u16 = tag::METHOD_ID;

    fn visit_refs(&self, visit: &mut dyn FnMut(u16, &ItemRef)) {
        visit(tag::TYPE_ID, &self.class);
        visit(tag::PROTO_ID, &self.proto);
        visit(tag::STRING_ID, &self.name);
    }

    fn visit_refs_mut(&mut self, visit: &mut dyn FnMut(u16, &mut ItemRef)) {
        visit(tag::TYPE_ID, &mut self.class);
        visit(tag::PROTO_ID, &mut self.proto);
        visit(tag::STRING_ID, &mut self.name);
    }

    fn key(&self, list: &SectionList) -> Option<Key> {
        Some(Key::Method(MethodKey {
            class: list.type_descriptor(&self.class)?,
            name: list.string_text(&self.name)?,
            proto: list.proto_key(&self.proto)?,
        }))
    }
}

/// `class_def_item`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassId {
    pub class_type: ItemRef,
    pub access_flags: AccessFlags,
    pub superclass: ItemRef,
    pub interfaces: ItemRef,
    pub source_file: ItemRef,
    pub annotations: ItemRef,
    pub class_data: ItemRef,
    pub static_values: ItemRef,
}

impl Block for ClassId {
    fn read(&mut self, reader: &mut BlockReader<'_>) -> Result<()> {
        self.class_type = ItemRef::from_raw(reader.read_u32()?);
        self.access_flags = AccessFlags::from_bits_retain(reader.read_u32()?);
        self.superclass = ItemRef::from_raw(reader.read_u32()?);
        self.interfaces = ItemRef::from_raw(reader.read_u32()?);
        self.source_file = ItemRef::from_raw(reader.read_u32()?);
        self.annotations = ItemRef::from_raw(reader.read_u32()?);
        self.class_data = ItemRef::from_raw(reader.read_u32()?);
        self.static_values = ItemRef::from_raw(reader.read_u32()?);
        Ok(())
    }

    fn write(&self, out: &mut Vec<u8>) -> usize {
        let mut c = write_u4(out, self.class_type.raw());
        c += write_u4(out, self.access_flags.bits());
        for r in [&self.superclass, &self.interfaces, &self.source_file, &self.annotations, &self.class_data, &self.static_values] {
            c += write_u4(out, r.raw());
        }
        c
    }

    fn count_bytes(&self) -> usize {
        32
    }
}

impl SectionItem for ClassId {
    const TYPE: u16 = tag::CLASS_ID;

    fn visit_refs(&self, visit: &mut dyn FnMut(u16, &ItemRef)) {
        visit(tag::TYPE_ID, &self.class_type);
        visit(tag::TYPE_ID, &self.superclass);
        visit(tag::TYPE_LIST, &self.interfaces);
        visit(tag::STRING_ID, &self.source_file);
        visit(tag::ANNOTATIONS_DIRECTORY, &self.annotations);
        visit(tag::CLASS_DATA, &self.class_data);
        visit(tag::ENCODED_ARRAY, &self.static_values);
    }

    fn visit_refs_mut(&mut self, visit: &mut dyn FnMut(u16, &mut ItemRef)) {
        visit(tag::TYPE_ID, &mut self.class_type);
        visit(tag::TYPE_ID, &mut self.superclass);
        visit(tag::TYPE_LIST, &mut self.interfaces);
        visit(tag::STRING_ID, &mut self.source_file);
        visit(tag::ANNOTATIONS_DIRECTORY, &mut self.annotations);
        visit(tag::CLASS_DATA, &mut self.class_data);
        visit(tag::ENCODED_ARRAY, &mut self.static_values);
    }

    fn key(&self, list: &SectionList) -> Option<Key> {
        list.type_descriptor(&self.class_type).map(Key::Class)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallSiteId {
    pub call_site: ItemRef,
}

impl Block for CallSiteId {
    fn read(&mut self, reader: &mut BlockReader<'_>) -> Result<()> {
        self.call_site = ItemRef::from_raw(reader.read_u32()?);
        Ok(())
    }

    fn write(&self, out: &mut Vec<u8>) -> usize {
        write_u4(out, self.call_site.raw())
    }

    fn count_bytes(&self) -> usize {
        4
    }
}

impl SectionItem for CallSiteId {
    const TYPE: u16 = tag::CALL_SITE_ID;

    fn visit_refs(&self, visit: &mut dyn FnMut(u16, &ItemRef)) {
        visit(tag::ENCODED_ARRAY, &self.call_site);
    }

    fn visit_refs_mut(&mut self, visit: &mut dyn FnMut(u16, &mut ItemRef)) {
        visit(tag::ENCODED_ARRAY, &mut self.call_site);
    }
}

/// `method_handle_item`. Kinds 0 to 3 access a field, the others invoke a method.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MethodHandleItem {
    pub kind: u16,
    pub unused1: u16,
    pub member: ItemRef,
    pub unused2: u16,
}

impl MethodHandleItem {
    pub fn is_field_accessor(&self) -> bool {
        self.kind <= 3
    }

    fn member_section(&self) -> u16 {
        if self.is_field_accessor() {
            tag::FIELD_ID
        } else {
            tag::METHOD_ID
        }
    }
}

impl Block for MethodHandleItem {
    fn read(&mut self, reader: &mut BlockReader<'_>) -> Result<()> {
        self.kind = reader.read_u16()?;
        self.unused1 = reader.read_u16()?;
        self.member = ItemRef::from_raw(reader.read_u16()? as u32);
        self.unused2 = reader.read_u16()?;
        Ok(())
    }

    fn write(&self, out: &mut Vec<u8>) -> usize {
        write_u2(out, self.kind) + write_u2(out, self.unused1) + write_u2(out, self.member.raw() as u16) + write_u2(out, self.unused2)
    }

    fn count_bytes(&self) -> usize {
        8
    }
}

impl SectionItem for MethodHandleItem {
    const TYPE: u16 = tag::METHOD_HANDLE;

    fn visit_refs(&self, visit: &mut dyn FnMut(u16, &ItemRef)) {
        visit(self.member_section(), &self.member);
    }

    fn visit_refs_mut(&mut self, visit: &mut dyn FnMut(u16, &mut ItemRef)) {
        let section = self.member_section();
        visit(section, &mut self.member);
    }
}
