use crate::block::{Block, BlockReader, IntegerCell};
use crate::error::Result;

/// Offset-table value of a slot that holds no element.
pub const NO_ENTRY: u32 = 0xFFFF_FFFF;

/// How null slots are laid out.
///
/// Both layouts write one offset per slot. A dense array is expected to hold no nulls;
/// a sparse one stores `NO_ENTRY` for them and spends no item bytes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ArrayLayout {
    #[default]
    Dense,
    Sparse,
}

/// An element sequence with an offset table whose count and start are mirrored into
/// external cells, normally fields of the owning chunk header.
///
/// The offset table and the element bytes are written separately because formats place
/// them apart. Offsets are relative to the first element byte.
#[derive(Clone, Debug, Default)]
pub struct CountedOffsetArray<T> {
    items: Vec<Option<T>>,
    offsets: Vec<u32>,
    count: IntegerCell,
    start: IntegerCell,
    layout: ArrayLayout,
}

impl<T: Block + Default> CountedOffsetArray<T> {
    pub fn new(count: IntegerCell, start: IntegerCell, layout: ArrayLayout) -> Self {
        CountedOffsetArray { items: Vec::new(), offsets: Vec::new(), count, start, layout }
    }

    pub fn layout(&self) -> ArrayLayout {
        self.layout
    }

    pub fn count_cell(&self) -> &IntegerCell {
        &self.count
    }

    pub fn start_cell(&self) -> &IntegerCell {
        &self.start
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.items.get(index).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.items.get_mut(index).and_then(Option::as_mut)
    }

    pub fn is_null_at(&self, index: usize) -> bool {
        self.get(index).map_or(true, Block::is_null)
    }

    pub fn iter(&self) -> impl Iterator<Item = Option<&T>> + '_ {
        self.items.iter().map(Option::as_ref)
    }

    /// The offset table as last read or refreshed.
    pub fn offsets(&self) -> &[u32] {
        &self.offsets
    }

    pub fn create_next(&mut self) -> &mut T {
        self.items.push(Some(T::default()));
        let last = self.items.len() - 1;
        self.slot(last)
    }

    fn slot(&mut self, index: usize) -> &mut T {
        self.items[index].get_or_insert_with(T::default)
    }

    /// Returns the element at `id`, growing with null slots as needed. Never shrinks.
    pub fn get_or_create(&mut self, id: usize) -> &mut T {
        if id >= self.items.len() {
            self.items.resize_with(id + 1, || None);
        }
        self.slot(id)
    }

    pub fn set(&mut self, index: usize, item: Option<T>) {
        if index >= self.items.len() {
            self.items.resize_with(index + 1, || None);
        }
        self.items[index] = item;
    }

    pub fn remove(&mut self, index: usize) -> Option<T> {
        if index < self.items.len() {
            self.items.remove(index)
        } else {
            None
        }
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.offsets.clear();
    }

    /// Drops trailing null slots, never cutting below the last non-null element at or
    /// after `start`.
    pub fn remove_all_null_from(&mut self, start: usize) {
        let mut new_len = self.items.len();
        while new_len > start && self.is_null_at(new_len - 1) {
            new_len -= 1;
        }
        self.items.truncate(new_len);
    }

    pub fn count_offset_bytes(&self) -> usize {
        self.items.len() * 4
    }

    pub fn count_item_bytes(&self) -> usize {
        self.items.iter().flatten().map(Block::count_bytes).sum()
    }

    /// Reads `count` little-endian u32 offsets.
    pub fn read_offsets(&mut self, reader: &mut BlockReader<'_>, count: usize) -> Result<()> {
        let mut offsets = Vec::with_capacity(count);
        for _ in 0..count {
            offsets.push(reader.read_u32()?);
        }
        self.offsets = offsets;
        Ok(())
    }

    /// Installs an offset table decoded by the owner, for formats with packed tables.
    pub fn set_offsets(&mut self, offsets: Vec<u32>) {
        self.offsets = offsets;
    }

    /// Reads one element per offset, each from its own window starting at
    /// `items_start + offset`, into an element built by `make`. `NO_ENTRY` slots become nulls.
    pub fn read_items<F>(&mut self, reader: &BlockReader<'_>, items_start: usize, make: F) -> Result<()>
    where
        F: Fn() -> T,
    {
        let mut items = Vec::with_capacity(self.offsets.len());
        for (i, offset) in self.offsets.iter().enumerate() {
            if *offset == NO_ENTRY {
                items.push(None);
                continue;
            }
            let at = items_start + *offset as usize;
            let mut sub = reader.create(at, reader.end().saturating_sub(at));
            let mut item = make();
            item.read(&mut sub)
                .map_err(|e| e.with_context(format!("element {i} at offset {at}")))?;
            items.push(Some(item));
        }
        self.items = items;
        Ok(())
    }

    /// Recomputes the offset table and pushes count and start into their cells.
    /// `base` is the position of the first element byte within the owner.
    pub fn refresh(&mut self, base: u32) {
        let mut offsets = Vec::with_capacity(self.items.len());
        let mut running = 0u32;
        let sparse = self.layout == ArrayLayout::Sparse;
        for item in &mut self.items {
            match item {
                Some(item) if !(sparse && item.is_null()) => {
                    item.refresh();
                    offsets.push(running);
                    running += item.count_bytes() as u32;
                }
                _ => offsets.push(NO_ENTRY),
            }
        }
        self.offsets = offsets;
        self.count.set(self.items.len() as u32);
        self.start.set(if self.items.is_empty() { 0 } else { base });
    }

    pub fn write_offsets(&self, out: &mut Vec<u8>) -> usize {
        for offset in &self.offsets {
            out.extend_from_slice(&offset.to_le_bytes());
        }
        self.offsets.len() * 4
    }

    pub fn write_items(&self, out: &mut Vec<u8>) -> usize {
        let mut written = 0;
        for (item, offset) in self.items.iter().zip(&self.offsets) {
            if let (Some(item), false) = (item, *offset == NO_ENTRY) {
                written += item.write(out);
            }
        }
        written
    }
}
