use crate::block::Block;
use crate::dex::key::Key;
use crate::dex::section_list::SectionList;
use std::fmt;

/// Stable identity of a record inside one [`SectionList`].
///
/// Handles survive sorting, relayout and removal of other records. They are meaningless
/// in any other list; merge translates them.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemHandle {
    section: u16,
    id: u32,
}

impl ItemHandle {
    pub fn new(section: u16, id: u32) -> Self {
        ItemHandle { section, id }
    }

    /// Type tag of the section owning the record.
    pub fn section(&self) -> u16 {
        self.section
    }

    pub fn id(&self) -> u32 {
        self.id
    }
}

impl fmt::Debug for ItemHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:04x}:{}", self.section, self.id)
    }
}

/// A reference field: the raw index or offset as stored on disk plus the record it
/// resolved to.
///
/// The raw value is only authoritative right after reading. Refresh rewrites it from
/// the target's current location, or nulls it when the target is gone.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ItemRef {
    raw: u32,
    target: Option<ItemHandle>,
}

impl ItemRef {
    pub fn from_raw(raw: u32) -> Self {
        ItemRef { raw, target: None }
    }

    pub fn to(handle: ItemHandle) -> Self {
        ItemRef { raw: 0, target: Some(handle) }
    }

    pub fn null_index() -> Self {
        ItemRef { raw: crate::dex::NO_INDEX, target: None }
    }

    pub fn null_offset() -> Self {
        ItemRef { raw: 0, target: None }
    }

    pub fn raw(&self) -> u32 {
        self.raw
    }

    pub fn target(&self) -> Option<ItemHandle> {
        self.target
    }

    pub fn is_null(&self) -> bool {
        self.target.is_none()
    }

    pub fn set_raw(&mut self, raw: u32) {
        self.raw = raw;
    }

    pub fn set_target(&mut self, target: Option<ItemHandle>) {
        self.target = target;
    }
}

impl From<ItemHandle> for ItemRef {
    fn from(handle: ItemHandle) -> Self {
        ItemRef::to(handle)
    }
}

/// A record stored in a DEX section.
///
/// Reference fields are reported in a fixed order by both visitors; linking relies on
/// `visit_refs` and `visit_refs_mut` walking the same fields in the same sequence.
pub trait SectionItem: Block + Clone + fmt::Debug + Default + 'static {
    /// Map list type code of the owning section.
    const TYPE: u16;

    fn visit_refs(&self, _visit: &mut dyn FnMut(u16, &ItemRef)) {}

    fn visit_refs_mut(&mut self, _visit: &mut dyn FnMut(u16, &mut ItemRef)) {}

    /// Identity used for pooling and deduplication. Records without one are never pooled.
    fn key(&self, _list: &SectionList) -> Option<Key> {
        None
    }

    /// Called after refresh rewrote the raw values of every reference.
    fn on_refs_updated(&mut self) {}
}

/// Collects the targets of every reference of `item`, paired with the target section.
pub(crate) fn targets_of<T: SectionItem>(item: &T) -> Vec<(u16, ItemRef)> {
    let mut refs = Vec::new();
    item.visit_refs(&mut |tag, r| refs.push((tag, *r)));
    refs
}
