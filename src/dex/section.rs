use crate::block::{align_up, Block, BlockReader, IntegerCell};
use crate::dex::array::{DataSectionArray, Entry};
use crate::dex::item::{ItemHandle, ItemRef, SectionItem};
use crate::dex::key::Key;
use crate::dex::pool::DexSectionPool;
use crate::dex::section_list::SectionList;
use crate::dex::section_type::SectionType;
use crate::error::Result;
use std::any::Any;
use std::collections::HashSet;
use std::fmt;

/// Type-erased view of a [`Section`], as stored in a [`SectionList`].
pub trait DexSection: fmt::Debug {
    fn section_type(&self) -> &'static SectionType;

    fn tag(&self) -> u16 {
        self.section_type().tag()
    }

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn count_cell(&self) -> &IntegerCell;

    fn offset_cell(&self) -> &IntegerCell;

    /// Reads `count_cell()` records starting at `offset_cell()`.
    fn read(&mut self, reader: &BlockReader<'_>) -> Result<()>;

    /// Assigns offsets from `start` and returns the end of the section.
    fn layout(&mut self, start: u32) -> u32;

    /// Appends the section to a file image, padding `out` up to each record's offset.
    fn write(&self, out: &mut Vec<u8>) -> usize;

    fn count_bytes(&self) -> usize;

    fn for_each_ref(&self, visit: &mut dyn FnMut(u16, &ItemRef));

    fn for_each_ref_mut(&mut self, visit: &mut dyn FnMut(u16, &mut ItemRef));

    fn refs_of(&self, handle: ItemHandle) -> Vec<(u16, ItemRef)>;

    fn for_each_ref_of_mut(&mut self, handle: ItemHandle, visit: &mut dyn FnMut(u16, &mut ItemRef));

    fn on_refs_updated(&mut self);

    fn handles(&self) -> Vec<ItemHandle>;

    fn handle_at(&self, index: usize) -> Option<ItemHandle>;

    fn handle_at_offset(&self, offset: u32) -> Option<ItemHandle>;

    /// Index and offset of the record with `handle`.
    fn location_of(&self, handle: ItemHandle) -> Option<(usize, u32)>;

    fn key_of(&self, handle: ItemHandle, list: &SectionList) -> Option<Key>;

    fn find_key(&self, key: &Key, list: &SectionList) -> Option<ItemHandle>;

    fn remove_handles(&mut self, handles: &HashSet<ItemHandle>) -> usize;

    fn item_bytes(&self, handle: ItemHandle) -> Option<Vec<u8>>;

    /// Clones the record `handle` of `source` (a section of the same type) into this
    /// section under a fresh handle. References still carry source handles.
    fn copy_from(&mut self, source: &dyn DexSection, handle: ItemHandle) -> Option<ItemHandle>;

    fn permute(&mut self, order: &[usize]) -> bool;

    fn invalidate_pool(&mut self);

    fn clear(&mut self);

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// The records of one section type, with the count and offset cells shared with the
/// header and the map list.
pub struct Section<T> {
    section_type: &'static SectionType,
    count: IntegerCell,
    offset: IntegerCell,
    array: DataSectionArray<T>,
    pool: DexSectionPool,
}

impl<T: SectionItem> fmt::Debug for Section<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Section")
            .field("type", &self.section_type)
            .field("count", &self.count)
            .field("offset", &self.offset)
            .field("len", &self.array.len())
            .finish()
    }
}

impl<T: SectionItem> Section<T> {
    pub fn with_cells(section_type: &'static SectionType, count: IntegerCell, offset: IntegerCell) -> Self {
        debug_assert_eq!(section_type.tag(), T::TYPE);
        Section { section_type, count, offset, array: DataSectionArray::new(T::TYPE), pool: DexSectionPool::new() }
    }

    pub fn array(&self) -> &DataSectionArray<T> {
        &self.array
    }

    pub fn array_mut(&mut self) -> &mut DataSectionArray<T> {
        self.pool.invalidate();
        &mut self.array
    }

    pub fn len(&self) -> usize {
        self.array.len()
    }

    pub fn is_empty(&self) -> bool {
        self.array.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.array.get(index).map(|e| &e.item)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.pool.invalidate();
        self.array.get_mut(index).map(|e| &mut e.item)
    }

    /// The record starting at or covering the absolute file `offset`.
    pub fn get_at(&self, offset: u32) -> Option<&T> {
        self.array.get_at(offset).map(|e| &e.item)
    }

    pub fn index_of(&self, handle: ItemHandle) -> Option<usize> {
        self.array.index_of(handle)
    }

    pub fn item(&self, handle: ItemHandle) -> Option<&T> {
        self.array.by_handle(handle).map(|e| &e.item)
    }

    pub fn item_mut(&mut self, handle: ItemHandle) -> Option<&mut T> {
        self.pool.invalidate();
        self.array.by_handle_mut(handle).map(|e| &mut e.item)
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        self.array.iter().map(|e| &e.item)
    }

    pub fn entries(&self) -> &[Entry<T>] {
        self.array.entries()
    }

    /// Appends `item` after the last record; its final offset is assigned by the next layout.
    pub fn add(&mut self, item: T) -> ItemHandle {
        let offset = self.array.create_next_position(self.offset.get());
        self.pool.invalidate();
        self.array.push(item, offset)
    }

    /// Like [`Section::add`], registering `key` in the pool instead of invalidating it.
    pub fn add_with_key(&mut self, item: T, key: Key) -> ItemHandle {
        let offset = self.array.create_next_position(self.offset.get());
        let index = self.array.len();
        let handle = self.array.push(item, offset);
        self.pool.push(Some(key), index);
        handle
    }

    pub fn remove(&mut self, handle: ItemHandle) -> Option<T> {
        self.pool.invalidate();
        self.array.remove(handle).map(|e| e.item)
    }

    pub fn sort_by<F>(&mut self, mut compare: F)
    where
        F: FnMut(&T, &T) -> std::cmp::Ordering,
    {
        self.pool.invalidate();
        self.array.sort_by(|a, b| compare(&a.item, &b.item));
    }

    /// Pooled lookup of the first record with `key`.
    pub fn find(&self, key: &Key, list: &SectionList) -> Option<ItemHandle> {
        let index = self.pool.get(key, || self.array.iter().map(|e| e.item.key(list)))?;
        self.array.get(index).map(|e| e.handle)
    }

    pub fn find_all(&self, key: &Key, list: &SectionList) -> Vec<ItemHandle> {
        self.pool
            .get_all(key, || self.array.iter().map(|e| e.item.key(list)))
            .iter()
            .filter_map(|&i| self.array.get(i).map(|e| e.handle))
            .collect()
    }

    fn section_start(&self, start: u32) -> u32 {
        align_up(start, self.section_type.alignment() as u32)
    }
}

impl<T: SectionItem> DexSection for Section<T> {
    fn section_type(&self) -> &'static SectionType {
        self.section_type
    }

    fn len(&self) -> usize {
        self.array.len()
    }

    fn count_cell(&self) -> &IntegerCell {
        &self.count
    }

    fn offset_cell(&self) -> &IntegerCell {
        &self.offset
    }

    fn read(&mut self, reader: &BlockReader<'_>) -> Result<()> {
        let count = self.count.get() as usize;
        let offset = self.offset.get() as usize;
        let name = self.section_type.name();
        let mut sub = reader.create(offset, reader.end().saturating_sub(offset));
        if count > 0 && sub.start() != offset {
            fail!(("section offset {offset} is outside the file"), ("{name} section"));
        }
        let alignment = self.section_type.item_alignment();
        self.pool.invalidate();
        self.array.clear();
        for index in 0..count {
            sub.align(alignment);
            let position = sub.position();
            let mut item = T::default();
            item.read(&mut sub)
                .map_err(|e| e.with_context(format!("{name} item {index} at offset {position}")))?;
            self.array.push(item, position as u32);
        }
        Ok(())
    }

    fn layout(&mut self, start: u32) -> u32 {
        self.pool.invalidate();
        if self.array.is_empty() {
            self.count.set(0);
            self.offset.set(0);
            return start;
        }
        let alignment = self.section_type.item_alignment() as u32;
        let mut position = self.section_start(start);
        self.offset.set(position);
        for entry in self.array.iter_mut() {
            position = align_up(position, alignment);
            entry.offset = position;
            position += entry.item.count_bytes() as u32;
        }
        self.count.set(self.array.len() as u32);
        position
    }

    fn write(&self, out: &mut Vec<u8>) -> usize {
        let before = out.len();
        for entry in self.array.iter() {
            if out.len() < entry.offset as usize {
                out.resize(entry.offset as usize, 0);
            }
            entry.item.write(out);
        }
        out.len() - before
    }

    fn count_bytes(&self) -> usize {
        match (self.array.first(), self.array.last()) {
            (Some(first), Some(last)) => (last.offset + last.item.count_bytes() as u32 - first.offset) as usize,
            _ => 0,
        }
    }

    fn for_each_ref(&self, visit: &mut dyn FnMut(u16, &ItemRef)) {
        for entry in self.array.iter() {
            entry.item.visit_refs(visit);
        }
    }

    fn for_each_ref_mut(&mut self, visit: &mut dyn FnMut(u16, &mut ItemRef)) {
        self.pool.invalidate();
        for entry in self.array.iter_mut() {
            entry.item.visit_refs_mut(visit);
        }
    }

    fn refs_of(&self, handle: ItemHandle) -> Vec<(u16, ItemRef)> {
        self.item(handle).map(crate::dex::item::targets_of).unwrap_or_default()
    }

    fn for_each_ref_of_mut(&mut self, handle: ItemHandle, visit: &mut dyn FnMut(u16, &mut ItemRef)) {
        if let Some(item) = self.item_mut(handle) {
            item.visit_refs_mut(visit);
        }
    }

    fn on_refs_updated(&mut self) {
        for entry in self.array.iter_mut() {
            entry.item.on_refs_updated();
        }
    }

    fn handles(&self) -> Vec<ItemHandle> {
        self.array.iter().map(|e| e.handle).collect()
    }

    fn handle_at(&self, index: usize) -> Option<ItemHandle> {
        self.array.get(index).map(|e| e.handle)
    }

    fn handle_at_offset(&self, offset: u32) -> Option<ItemHandle> {
        self.array.get_at(offset).filter(|e| e.offset == offset).map(|e| e.handle)
    }

    fn location_of(&self, handle: ItemHandle) -> Option<(usize, u32)> {
        let index = self.array.index_of(handle)?;
        self.array.get(index).map(|e| (index, e.offset))
    }

    fn key_of(&self, handle: ItemHandle, list: &SectionList) -> Option<Key> {
        self.item(handle).and_then(|item| item.key(list))
    }

    fn find_key(&self, key: &Key, list: &SectionList) -> Option<ItemHandle> {
        self.find(key, list)
    }

    fn remove_handles(&mut self, handles: &HashSet<ItemHandle>) -> usize {
        self.pool.invalidate();
        self.array.retain(|e| !handles.contains(&e.handle))
    }

    fn item_bytes(&self, handle: ItemHandle) -> Option<Vec<u8>> {
        self.item(handle).map(|item| item.bytes())
    }

    fn copy_from(&mut self, source: &dyn DexSection, handle: ItemHandle) -> Option<ItemHandle> {
        let source = source.as_any().downcast_ref::<Section<T>>()?;
        let item = source.item(handle)?.clone();
        Some(self.add(item))
    }

    fn permute(&mut self, order: &[usize]) -> bool {
        self.pool.invalidate();
        self.array.permute(order)
    }

    fn invalidate_pool(&mut self) {
        self.pool.invalidate();
    }

    fn clear(&mut self) {
        self.pool.invalidate();
        self.array.clear();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
