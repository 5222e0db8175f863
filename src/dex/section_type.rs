use crate::block::IntegerCell;
use crate::dex::code::Code;
use crate::dex::data_items::{
    AnnotationGroup, AnnotationItem, AnnotationSet, AnnotationsDirectory, ClassData, EncodedArrayItem, HiddenApi,
    StringData, TypeList,
};
use crate::dex::debug_info::DebugInfo;
use crate::dex::header::Header;
use crate::dex::id_items::{CallSiteId, ClassId, FieldId, MethodHandleItem, MethodId, ProtoId, StringId, TypeId};
use crate::dex::map_list::MapList;
use crate::dex::section::{DexSection, Section};
use crate::dex::SectionItem;
use once_cell::sync::Lazy;
use std::cmp::Ordering;
use std::fmt;

/// Null value of an index reference.
pub const NO_INDEX: u32 = 0xFFFF_FFFF;

/// Map list type codes.
pub mod tag {
    pub const HEADER: u16 = 0x0000;
    pub const STRING_ID: u16 = 0x0001;
    pub const TYPE_ID: u16 = 0x0002;
    pub const PROTO_ID: u16 = 0x0003;
    pub const FIELD_ID: u16 = 0x0004;
    pub const METHOD_ID: u16 = 0x0005;
    pub const CLASS_ID: u16 = 0x0006;
    pub const CALL_SITE_ID: u16 = 0x0007;
    pub const METHOD_HANDLE: u16 = 0x0008;
    pub const MAP_LIST: u16 = 0x1000;
    pub const TYPE_LIST: u16 = 0x1001;
    pub const ANNOTATION_GROUP: u16 = 0x1002;
    pub const ANNOTATION_SET: u16 = 0x1003;
    pub const CLASS_DATA: u16 = 0x2000;
    pub const CODE: u16 = 0x2001;
    pub const STRING_DATA: u16 = 0x2002;
    pub const DEBUG_INFO: u16 = 0x2003;
    pub const ANNOTATION_ITEM: u16 = 0x2004;
    pub const ENCODED_ARRAY: u16 = 0x2005;
    pub const ANNOTATIONS_DIRECTORY: u16 = 0x2006;
    pub const HIDDEN_API: u16 = 0xF000;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SectionKind {
    /// Fixed-size records addressed by index.
    Id { item_size: usize },
    /// Variable-size records addressed by file offset.
    Data { alignment: usize },
    Special { alignment: usize },
}

type SectionFactory = fn(&'static SectionType, IntegerCell, IntegerCell) -> Box<dyn DexSection>;

/// One member of the closed section catalog.
pub struct SectionType {
    tag: u16,
    name: &'static str,
    kind: SectionKind,
    create: SectionFactory,
}

impl fmt::Debug for SectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(0x{:04x})", self.name, self.tag)
    }
}

impl PartialEq for SectionType {
    fn eq(&self, other: &Self) -> bool {
        self.tag == other.tag
    }
}

impl SectionType {
    pub fn tag(&self) -> u16 {
        self.tag
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn kind(&self) -> SectionKind {
        self.kind
    }

    pub fn is_id(&self) -> bool {
        matches!(self.kind, SectionKind::Id { .. })
    }

    pub fn is_special(&self) -> bool {
        matches!(self.kind, SectionKind::Special { .. })
    }

    /// Boundary the section start is rounded up to.
    pub fn alignment(&self) -> usize {
        match self.kind {
            SectionKind::Id { .. } => 4,
            SectionKind::Data { alignment } | SectionKind::Special { alignment } => alignment,
        }
    }

    /// Boundary every record of the section starts on.
    pub fn item_alignment(&self) -> usize {
        match self.kind {
            SectionKind::Id { .. } => 1,
            SectionKind::Data { alignment } | SectionKind::Special { alignment } => alignment,
        }
    }

    /// References into this section carry offsets rather than indices.
    pub fn addressed_by_offset(&self) -> bool {
        !self.is_id()
    }

    pub fn null_raw(&self) -> u32 {
        if self.addressed_by_offset() {
            0
        } else {
            NO_INDEX
        }
    }

    /// An empty section of this type whose count and offset live in the given cells.
    pub fn create_section(&'static self, count: IntegerCell, offset: IntegerCell) -> Box<dyn DexSection> {
        (self.create)(self, count, offset)
    }
}

fn factory<T: SectionItem>(
    section_type: &'static SectionType,
    count: IntegerCell,
    offset: IntegerCell,
) -> Box<dyn DexSection> {
    Box::new(Section::<T>::with_cells(section_type, count, offset))
}

macro_rules! section_types {
    ($( $tag:ident, $item:ty, $kind:expr; )*) => {
        vec![
            $( SectionType { tag: tag::$tag, name: stringify!($tag), kind: $kind, create: factory::<$item> }, )*
        ]
    };
}

static CATALOG: Lazy<Vec<SectionType>> = Lazy::new(|| {
    use SectionKind::*;
    section_types! {
        HEADER, Header, Special { alignment: 4 };
        STRING_ID, StringId, Id { item_size: 4 };
        TYPE_ID, TypeId, Id { item_size: 4 };
        PROTO_ID, ProtoId, Id { item_size: 12 };
        FIELD_ID, FieldId, Id { item_size: 8 };
        METHOD_ID, MethodId, Id { item_size: 8 };
        CLASS_ID, ClassId, Id { item_size: 32 };
        CALL_SITE_ID, CallSiteId, Id { item_size: 4 };
        METHOD_HANDLE, MethodHandleItem, Id { item_size: 8 };
        MAP_LIST, MapList, Special { alignment: 4 };
        TYPE_LIST, TypeList, Data { alignment: 4 };
        ANNOTATION_GROUP, AnnotationGroup, Data { alignment: 4 };
        ANNOTATION_SET, AnnotationSet, Data { alignment: 4 };
        CLASS_DATA, ClassData, Data { alignment: 1 };
        CODE, Code, Data { alignment: 4 };
        STRING_DATA, StringData, Data { alignment: 1 };
        DEBUG_INFO, DebugInfo, Data { alignment: 1 };
        ANNOTATION_ITEM, AnnotationItem, Data { alignment: 1 };
        ENCODED_ARRAY, EncodedArrayItem, Data { alignment: 1 };
        ANNOTATIONS_DIRECTORY, AnnotationsDirectory, Data { alignment: 4 };
        HIDDEN_API, HiddenApi, Special { alignment: 4 };
    }
});

pub fn section_types() -> &'static [SectionType] {
    &CATALOG
}

pub fn section_type(tag: u16) -> Option<&'static SectionType> {
    CATALOG.iter().find(|t| t.tag == tag)
}

pub fn by_name(name: &str) -> Option<&'static SectionType> {
    CATALOG.iter().find(|t| t.name.eq_ignore_ascii_case(name))
}

use tag::*;

/// Sections are created and read in this order, whatever their file order.
pub static READ_ORDER: &[u16] = &[
    HEADER, MAP_LIST, STRING_ID, STRING_DATA, TYPE_ID, TYPE_LIST, PROTO_ID, FIELD_ID, METHOD_ID, METHOD_HANDLE,
    ANNOTATION_ITEM, ANNOTATION_SET, ANNOTATION_GROUP, ANNOTATIONS_DIRECTORY, ENCODED_ARRAY, CALL_SITE_ID,
    DEBUG_INFO, CODE, CLASS_DATA, CLASS_ID, HIDDEN_API,
];

/// Unused records are removed walking from the referrers down to what they point at.
pub static REMOVE_ORDER: &[u16] = &[
    CLASS_DATA, CODE, DEBUG_INFO, ANNOTATIONS_DIRECTORY, ANNOTATION_GROUP, ANNOTATION_SET, ANNOTATION_ITEM,
    ENCODED_ARRAY, METHOD_ID, FIELD_ID, PROTO_ID, TYPE_LIST, TYPE_ID, STRING_ID,
];

pub static SORT_ORDER: &[u16] = &[
    STRING_DATA, STRING_ID, TYPE_ID, TYPE_LIST, PROTO_ID, FIELD_ID, METHOD_ID, METHOD_HANDLE, ANNOTATION_ITEM,
    ANNOTATION_SET, ANNOTATION_GROUP, ANNOTATIONS_DIRECTORY, ENCODED_ARRAY, CALL_SITE_ID, DEBUG_INFO, CODE,
    CLASS_DATA, CLASS_ID, HIDDEN_API, MAP_LIST, HEADER,
];

pub static R8_ORDER: &[u16] = &[
    HEADER, STRING_ID, TYPE_ID, PROTO_ID, FIELD_ID, METHOD_ID, CLASS_ID, CALL_SITE_ID, METHOD_HANDLE, CODE,
    DEBUG_INFO, TYPE_LIST, STRING_DATA, ANNOTATION_ITEM, CLASS_DATA, ENCODED_ARRAY, ANNOTATION_SET,
    ANNOTATION_GROUP, ANNOTATIONS_DIRECTORY, MAP_LIST,
];

pub static DEXLIB2_ORDER: &[u16] = &[
    HEADER, STRING_ID, TYPE_ID, PROTO_ID, FIELD_ID, METHOD_ID, CALL_SITE_ID, METHOD_HANDLE, CLASS_ID, STRING_DATA,
    TYPE_LIST, ENCODED_ARRAY, ANNOTATION_ITEM, ANNOTATION_SET, ANNOTATION_GROUP, ANNOTATIONS_DIRECTORY,
    DEBUG_INFO, CODE, CLASS_DATA, MAP_LIST,
];

/// Rank of a section in `order`. Types the order does not mention rank at `len - 2`,
/// an absent section at `len - 1`.
pub fn order_rank(order: &[u16], tag: Option<u16>) -> usize {
    match tag {
        None => order.len().saturating_sub(1),
        Some(tag) => order.iter().position(|t| *t == tag).unwrap_or(order.len().saturating_sub(2)),
    }
}

pub fn compare_in_order(order: &[u16], a: Option<u16>, b: Option<u16>) -> Ordering {
    order_rank(order, a).cmp(&order_rank(order, b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_has_every_type_once() {
        assert_eq!(section_types().len(), 21);
        for t in section_types() {
            assert_eq!(section_type(t.tag()), Some(t));
            assert_eq!(by_name(t.name()), Some(t));
        }
        assert_eq!(section_type(PROTO_ID).map(SectionType::kind), Some(SectionKind::Id { item_size: 12 }));
        assert_eq!(by_name("code").map(SectionType::item_alignment), Some(4));
        assert!(section_type(0x7777).is_none());
    }

    #[test]
    fn orders_rank_missing_types_last() {
        assert_eq!(order_rank(R8_ORDER, Some(HEADER)), 0);
        assert_eq!(order_rank(R8_ORDER, Some(HIDDEN_API)), R8_ORDER.len() - 2);
        assert_eq!(order_rank(R8_ORDER, None), R8_ORDER.len() - 1);
        assert_eq!(compare_in_order(DEXLIB2_ORDER, Some(CODE), Some(CLASS_DATA)), Ordering::Less);
        assert_eq!(READ_ORDER.len(), 21);
    }

    #[test]
    fn null_raw_depends_on_addressing() {
        assert_eq!(section_type(STRING_ID).map(SectionType::null_raw), Some(NO_INDEX));
        assert_eq!(section_type(CODE).map(SectionType::null_raw), Some(0));
    }
}
