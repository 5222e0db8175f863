//! DEX files as a list of typed sections.
//!
//! Records never point at each other directly. Every cross reference is an [`ItemRef`]
//! holding the raw index or offset read from disk plus the [`ItemHandle`] it resolved to;
//! [`SectionList::refresh`] lays the sections out again and writes the raw values back.

mod array;
mod class_sort;
mod code;
mod data_items;
mod debug_info;
mod encoded_value;
mod header;
mod id_items;
mod insn;
mod item;
mod key;
mod layout;
pub(crate) mod leb;
mod map_list;
mod merge;
mod pool;
mod section;
mod section_list;
mod section_type;

pub use array::{DataSectionArray, Entry, SectionArray};
pub use class_sort::{sort_definition, ClassSortOutcome};
pub use code::{CatchHandler, Code, TryItem, TypeAddrPair};
pub use data_items::{
    AnnotationGroup, AnnotationItem, AnnotationSet, AnnotationsDirectory, ClassData, EncodedArrayItem, EncodedField,
    EncodedMethod, HiddenApi, MemberAnnotation, StringData, TypeList, VISIBILITY_BUILD, VISIBILITY_RUNTIME,
    VISIBILITY_SYSTEM,
};
pub use debug_info::{DebugInfo, DebugOp};
pub use encoded_value::{AnnotationElement, EncodedAnnotation, EncodedValue};
pub use header::{Header, IdTable, DEX_MAGIC, ENDIAN_CONSTANT, HEADER_SIZE, REVERSE_ENDIAN_CONSTANT};
pub use id_items::{AccessFlags, CallSiteId, ClassId, FieldId, MethodHandleItem, MethodId, ProtoId, StringId, TypeId};
pub use insn::{instruction_units, opcode_info, Format, InsnRef, ReferenceType};
pub use item::{ItemHandle, ItemRef, SectionItem};
pub use key::{FieldKey, Key, MethodKey, ProtoKey};
pub use layout::DexLayout;
pub use map_list::{MapItem, MapList};
pub use merge::{DefaultMergeOptions, DuplicateAction, MergeOptions};
pub use pool::DexSectionPool;
pub use section::{DexSection, Section};
pub use section_list::SectionList;
pub use section_type::{
    by_name, compare_in_order, order_rank, section_type, section_types, tag, SectionKind, SectionType, DEXLIB2_ORDER,
    NO_INDEX, R8_ORDER, READ_ORDER, REMOVE_ORDER, SORT_ORDER,
};

// Basic type writing
pub(crate) fn write_u1(buffer: &mut Vec<u8>, val: u8) -> usize
{
    buffer.push(val);
    1
}

pub(crate) fn write_u2(buffer: &mut Vec<u8>, val: u16) -> usize
{
    buffer.extend_from_slice(&val.to_le_bytes());
    2
}

pub(crate) fn write_u4(buffer: &mut Vec<u8>, val: u32) -> usize
{
    buffer.extend_from_slice(&val.to_le_bytes());
    4
}

pub(crate) fn write_uleb128(buffer: &mut Vec<u8>, val: u32) -> usize
{
    leb::encode_uleb128(buffer, val)
}

/// Writes `val + 1`, so `NO_INDEX` comes out as 0.
pub(crate) fn write_uleb128p1(buffer: &mut Vec<u8>, val: u32) -> usize
{
    leb::encode_uleb128(buffer, val.wrapping_add(1))
}

pub(crate) fn write_sleb128(buffer: &mut Vec<u8>, val: i32) -> usize
{
    leb::encode_sleb128(buffer, val)
}

pub(crate) fn write_x(buffer: &mut Vec<u8>, val: &[u8]) -> usize
{
    buffer.extend_from_slice(val);
    val.len()
}

/// Byte length of whatever `write` emits.
pub(crate) fn measure<F>(write: F) -> usize
where
    F: FnOnce(&mut Vec<u8>) -> usize,
{
    let mut scratch = Vec::new();
    write(&mut scratch)
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn uleb128p1_writes_no_index_as_zero()
    {
        let mut out = vec![];
        assert_eq!(write_uleb128p1(&mut out, NO_INDEX), 1);
        assert_eq!(write_uleb128p1(&mut out, 0), 1);
        assert_eq!(out, vec![0, 1]);
        assert_eq!(measure(|b| write_u4(b, 7) + write_u2(b, 1)), 6);
    }
}
