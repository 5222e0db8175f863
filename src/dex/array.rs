use crate::block::Block;
use crate::dex::item::ItemHandle;
use once_cell::unsync::OnceCell;
use std::cell::Cell;
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};

/// A record together with its identity and its absolute file offset.
#[derive(Clone, Debug)]
pub struct Entry<T> {
    pub handle: ItemHandle,
    pub offset: u32,
    pub item: T,
}

impl<T: Block> Entry<T> {
    /// Whether `offset` falls inside the bytes of this record.
    pub fn covers(&self, offset: u32) -> bool {
        offset >= self.offset && (offset - self.offset) < self.item.count_bytes().max(1) as u32
    }
}

/// Records of one section addressed by index.
#[derive(Clone, Debug)]
pub struct SectionArray<T> {
    tag: u16,
    next_id: u32,
    entries: Vec<Entry<T>>,
    positions: OnceCell<HashMap<u32, usize>>,
}

impl<T: Block> SectionArray<T> {
    pub fn new(tag: u16) -> Self {
        SectionArray { tag, next_id: 0, entries: Vec::new(), positions: OnceCell::new() }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Entry<T>> {
        self.entries.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Entry<T>> {
        self.entries.get_mut(index)
    }

    pub fn entries(&self) -> &[Entry<T>] {
        &self.entries
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Entry<T>> {
        self.entries.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Entry<T>> {
        self.entries.iter_mut()
    }

    pub fn first(&self) -> Option<&Entry<T>> {
        self.entries.first()
    }

    pub fn last(&self) -> Option<&Entry<T>> {
        self.entries.last()
    }

    /// Index of the record with `handle`.
    pub fn index_of(&self, handle: ItemHandle) -> Option<usize> {
        if handle.section() != self.tag {
            return None;
        }
        let positions = self.positions.get_or_init(|| {
            self.entries.iter().enumerate().map(|(i, e)| (e.handle.id(), i)).collect()
        });
        positions.get(&handle.id()).copied()
    }

    pub fn by_handle(&self, handle: ItemHandle) -> Option<&Entry<T>> {
        self.index_of(handle).and_then(|i| self.entries.get(i))
    }

    pub fn by_handle_mut(&mut self, handle: ItemHandle) -> Option<&mut Entry<T>> {
        let index = self.index_of(handle)?;
        self.entries.get_mut(index)
    }

    /// Appends `item` at `offset` under a fresh handle.
    pub fn push(&mut self, item: T, offset: u32) -> ItemHandle {
        let handle = ItemHandle::new(self.tag, self.next_id);
        self.next_id += 1;
        let index = self.entries.len();
        self.entries.push(Entry { handle, offset, item });
        if let Some(positions) = self.positions.get_mut() {
            positions.insert(handle.id(), index);
        }
        handle
    }

    /// Removes the record with `handle` and returns it with its offset zeroed.
    pub fn remove(&mut self, handle: ItemHandle) -> Option<Entry<T>> {
        let index = self.index_of(handle)?;
        let mut entry = self.entries.remove(index);
        entry.offset = 0;
        self.positions.take();
        Some(entry)
    }

    /// Keeps the records for which `keep` is true, returning how many were dropped.
    pub fn retain<F>(&mut self, mut keep: F) -> usize
    where
        F: FnMut(&Entry<T>) -> bool,
    {
        let before = self.entries.len();
        self.entries.retain(|e| keep(e));
        let removed = before - self.entries.len();
        if removed > 0 {
            self.positions.take();
        }
        removed
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.positions.take();
    }

    pub fn sort_by<F>(&mut self, compare: F)
    where
        F: FnMut(&Entry<T>, &Entry<T>) -> std::cmp::Ordering,
    {
        self.entries.sort_by(compare);
        self.positions.take();
    }

    /// Reorders the records so that new position `i` holds the record previously at `order[i]`.
    ///
    /// `order` must be a permutation of `0..len`; anything else leaves the array untouched.
    pub fn permute(&mut self, order: &[usize]) -> bool {
        let len = self.entries.len();
        let mut seen = vec![false; len];
        if order.len() != len || order.iter().any(|&i| i >= len || std::mem::replace(&mut seen[i], true)) {
            return false;
        }
        let mut slots: Vec<Option<Entry<T>>> = self.entries.drain(..).map(Some).collect();
        self.entries = order.iter().filter_map(|&i| slots[i].take()).collect();
        self.positions.take();
        true
    }
}

/// Records of one section addressed by absolute file offset.
///
/// Lookups by offset use a spider search seeded with an interpolated index between the
/// cached first and last record offsets.
#[derive(Clone, Debug)]
pub struct DataSectionArray<T> {
    array: SectionArray<T>,
    bounds: Cell<(u32, u32)>,
}

impl<T: Block> Deref for DataSectionArray<T> {
    type Target = SectionArray<T>;

    fn deref(&self) -> &SectionArray<T> {
        &self.array
    }
}

impl<T: Block> DerefMut for DataSectionArray<T> {
    fn deref_mut(&mut self) -> &mut SectionArray<T> {
        // any mutable access may move records
        self.bounds.set((0, 0));
        &mut self.array
    }
}

impl<T: Block> DataSectionArray<T> {
    pub fn new(tag: u16) -> Self {
        DataSectionArray { array: SectionArray::new(tag), bounds: Cell::new((0, 0)) }
    }

    /// Index of the record whose bytes cover `offset`.
    pub fn index_at(&self, offset: u32) -> Option<usize> {
        if offset == 0 || self.array.is_empty() {
            return None;
        }
        let (start, end) = self.bounds.get();
        if start == 0 || offset < start || offset > end {
            self.update_bounds();
        }
        if let Some(index) = self.spider_search(offset, self.estimate_begin(offset)) {
            return Some(index);
        }
        let index = self.array.iter().position(|e| e.covers(offset))?;
        self.update_bounds();
        Some(index)
    }

    pub fn get_at(&self, offset: u32) -> Option<&Entry<T>> {
        self.index_at(offset).and_then(|i| self.array.get(i))
    }

    /// Where a record appended now would start before the next layout.
    pub fn create_next_position(&self, section_offset: u32) -> u32 {
        match self.array.last() {
            Some(last) => last.offset + last.item.count_bytes() as u32,
            None => section_offset,
        }
    }

    fn update_bounds(&self) {
        let start = self.array.first().map_or(0, |e| e.offset);
        let end = self.array.last().map_or(start, |e| e.offset);
        self.bounds.set((start, end));
    }

    fn estimate_begin(&self, offset: u32) -> usize {
        let (start, end) = self.bounds.get();
        let len = self.array.len() as i64;
        let bytes = (end as i64 - start as i64).max(1);
        let index = (offset as i64 - start as i64) * len / bytes - 1;
        index.clamp(0, len - 1) as usize
    }

    fn spider_search(&self, offset: u32, begin: usize) -> Option<usize> {
        let len = self.array.len() as i64;
        let mut i = begin as i64;
        let mut look_back = false;
        let mut look_front = false;
        let mut look_changed = false;
        let mut step: i64 = 1;
        let mut acceleration: i64 = 1;
        loop {
            if i < 0 || i >= len {
                return None;
            }
            let entry = self.array.get(i as usize)?;
            if entry.covers(offset) {
                return Some(i as usize);
            }
            if offset < entry.offset {
                if look_front {
                    if look_changed {
                        return None;
                    }
                    look_changed = true;
                    look_front = false;
                    step = 1;
                } else if look_back && i == 0 {
                    return None;
                }
                if !look_changed {
                    step = step.min(i / 3 + 1);
                }
                look_back = true;
                i = (i - step).max(0);
            } else {
                if look_back {
                    if look_changed {
                        return None;
                    }
                    look_back = false;
                    look_changed = true;
                    step = 1;
                }
                if !look_changed {
                    step = step.min((len - i) / 3 + 1);
                }
                look_front = true;
                i += step;
            }
            if !look_changed {
                step += acceleration + 1;
                if step % 2 == 1 {
                    acceleration += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::ByteRegion;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;

    /// Records of the given sizes laid out from 0x70 with `gap` bytes between them.
    fn build(sizes: &[usize], gap: u32) -> DataSectionArray<ByteRegion> {
        let mut array = DataSectionArray::new(0x2002);
        let mut offset = 0x70;
        for &size in sizes {
            array.push(ByteRegion::new(size), offset);
            offset += size as u32 + gap;
        }
        array
    }

    #[test]
    fn every_covered_offset_resolves_in_any_order() {
        let sizes: Vec<usize> = (0..300).map(|i| 1 + (i * 7) % 13).collect();
        let array = build(&sizes, 0);
        let mut queries: Vec<(u32, usize)> = Vec::new();
        for (index, entry) in array.iter().enumerate() {
            for delta in 0..entry.item.len() as u32 {
                queries.push((entry.offset + delta, index));
            }
        }
        for &(offset, index) in &queries {
            assert_eq!(array.index_at(offset), Some(index), "ascending query {offset}");
        }
        let mut rng = StdRng::seed_from_u64(7);
        queries.shuffle(&mut rng);
        for &(offset, index) in &queries {
            assert_eq!(array.index_at(offset), Some(index), "random query {offset}");
        }
    }

    #[test]
    fn gaps_and_outside_offsets_miss() {
        let array = build(&[4, 4, 4], 4);
        assert_eq!(array.index_at(0), None);
        assert_eq!(array.index_at(0x70 + 5), None, "inside the gap after the first record");
        assert_eq!(array.index_at(0x10), None);
        assert_eq!(array.index_at(0x70 + 40), None);
        assert_eq!(array.index_at(0x70 + 8), Some(1));
        assert_eq!(array.get_at(0x70 + 16).map(|e| e.handle.id()), Some(2));
    }

    #[test]
    fn removed_records_lose_their_offset_and_handles_stay() {
        let mut array = build(&[2, 2, 2], 0);
        let second = array.get(1).unwrap().handle;
        let third = array.get(2).unwrap().handle;
        let removed = array.remove(second).unwrap();
        assert_eq!(removed.offset, 0);
        assert_eq!(array.index_of(third), Some(1));
        assert_eq!(array.index_at(0x72), None);
        assert_eq!(array.create_next_position(0x70), 0x76);
        let fresh = array.push(ByteRegion::new(1), 0x76);
        assert_eq!(fresh.id(), 3, "handle ids are never reused");
    }

    #[test]
    fn permute_rejects_non_permutations() {
        let mut array = build(&[1, 2, 3], 0);
        assert!(!array.permute(&[0, 0, 1]));
        assert!(array.permute(&[2, 0, 1]));
        assert_eq!(array.get(0).unwrap().item.len(), 3);
        assert_eq!(array.index_of(array.get(2).unwrap().handle), Some(2));
    }

    proptest! {
        #[test]
        fn spider_search_matches_linear_scan(sizes in prop::collection::vec(1usize..40, 1..120), probe in 0u32..6000) {
            let array = build(&sizes, 0);
            let expected = array.iter().position(|e| e.covers(probe)).filter(|_| probe != 0);
            prop_assert_eq!(array.index_at(probe), expected);
        }
    }
}
