use crate::block::{Block, BlockReader};
use crate::error::Result;
use std::cmp::Ordering;
use std::ops::Index;

/// An ordered list of exclusively owned child blocks.
///
/// Offsets of children are never stored; they are derived with
/// [`BlockList::count_bytes_up_to`], so inserting or removing a child costs nothing until
/// the next [`Block::refresh`].
#[derive(Clone, Debug, PartialEq)]
pub struct BlockList<T> {
    items: Vec<T>,
}

impl<T> Default for BlockList<T> {
    fn default() -> Self {
        BlockList { items: Vec::new() }
    }
}

impl<T: Block> BlockList<T> {
    pub fn new() -> Self {
        BlockList::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.items.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.items.get_mut(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, T> {
        self.items.iter_mut()
    }

    pub fn add(&mut self, item: T) -> usize {
        self.items.push(item);
        self.items.len() - 1
    }

    pub fn insert(&mut self, index: usize, item: T) {
        let index = index.min(self.items.len());
        self.items.insert(index, item);
    }

    pub fn remove(&mut self, index: usize) -> Option<T> {
        if index < self.items.len() {
            Some(self.items.remove(index))
        } else {
            None
        }
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn sort_by<F>(&mut self, compare: F)
    where
        F: FnMut(&T, &T) -> Ordering,
    {
        self.items.sort_by(compare);
    }

    pub fn retain<F>(&mut self, keep: F)
    where
        F: FnMut(&T) -> bool,
    {
        self.items.retain(keep);
    }

    /// Sum of the byte lengths of every child strictly before `index`.
    pub fn count_bytes_up_to(&self, index: usize) -> usize {
        self.items.iter().take(index).map(Block::count_bytes).sum()
    }

    /// Reads children with `create` until the reader's window is used up.
    pub fn read_all<F>(&mut self, reader: &mut BlockReader<'_>, mut create: F) -> Result<()>
    where
        F: FnMut(&mut BlockReader<'_>) -> Result<T>,
    {
        while reader.is_available() {
            let item = create(reader)?;
            self.items.push(item);
        }
        Ok(())
    }
}

impl<T: Block> Block for BlockList<T> {
    /// Each child reads itself with whatever length it was constructed with.
    fn read(&mut self, reader: &mut BlockReader<'_>) -> Result<()> {
        for (i, item) in self.items.iter_mut().enumerate() {
            item.read(reader).map_err(|e| e.with_context(format!("list child {i}")))?;
        }
        Ok(())
    }

    fn write(&self, out: &mut Vec<u8>) -> usize {
        self.items.iter().map(|item| item.write(out)).sum()
    }

    fn count_bytes(&self) -> usize {
        self.items.iter().map(Block::count_bytes).sum()
    }

    fn refresh(&mut self) {
        for item in &mut self.items {
            item.refresh();
        }
    }
}

impl<T> Index<usize> for BlockList<T> {
    type Output = T;

    fn index(&self, index: usize) -> &T {
        &self.items[index]
    }
}

impl<T> FromIterator<T> for BlockList<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        BlockList { items: iter.into_iter().collect() }
    }
}

impl<'a, T> IntoIterator for &'a BlockList<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockItem;

    fn sized(lens: &[usize]) -> BlockList<BlockItem> {
        lens.iter().map(|len| BlockItem::new(*len)).collect()
    }

    #[test]
    fn offsets_are_prefix_sums() {
        let list = sized(&[10, 20, 7]);
        assert_eq!(list.count_bytes(), 37);
        let offsets: Vec<usize> = (0..list.len()).map(|i| list.count_bytes_up_to(i)).collect();
        assert_eq!(offsets, vec![0, 10, 30]);
    }

    #[test]
    fn mutation_shifts_following_offsets() {
        let mut list = sized(&[4, 4, 4]);
        list.insert(1, BlockItem::new(6));
        assert_eq!(list.count_bytes_up_to(2), 10);
        list.remove(0);
        assert_eq!(list.count_bytes_up_to(2), 10);
        assert_eq!(list.count_bytes(), 14);
    }

    #[test]
    fn read_all_consumes_window() {
        let data = [1u8, 2, 3, 4, 5, 6];
        let mut reader = BlockReader::new(&data);
        let mut list: BlockList<BlockItem> = BlockList::new();
        list.read_all(&mut reader, |r| {
            let mut item = BlockItem::new(2);
            item.read(r)?;
            Ok(item)
        })
        .unwrap();
        assert_eq!(list.len(), 3);
        assert_eq!(list.bytes(), data.to_vec());
    }
}
