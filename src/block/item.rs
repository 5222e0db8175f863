use crate::block::{padding, Block, BlockReader, ByteRegion};
use crate::error::Result;
use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

/// A shared integer field.
///
/// Header fields that mirror a count or an offset owned by some other node hold a clone
/// of that node's cell, so either side may write the value and both observe it.
#[derive(Clone, Default)]
pub struct IntegerCell(Rc<Cell<u32>>);

impl IntegerCell {
    pub fn new(value: u32) -> Self {
        IntegerCell(Rc::new(Cell::new(value)))
    }

    pub fn get(&self) -> u32 {
        self.0.get()
    }

    pub fn set(&self, value: u32) {
        self.0.set(value)
    }

    /// Whether both cells are the same storage.
    pub fn is_linked(&self, other: &IntegerCell) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for IntegerCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.get())
    }
}

/// A leaf node over a fixed-length byte region.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BlockItem {
    region: ByteRegion,
}

impl BlockItem {
    pub fn new(len: usize) -> Self {
        BlockItem { region: ByteRegion::new(len) }
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        BlockItem { region: ByteRegion::from_bytes(bytes) }
    }

    pub fn region(&self) -> &ByteRegion {
        &self.region
    }

    pub fn region_mut(&mut self) -> &mut ByteRegion {
        &mut self.region
    }
}

impl Block for BlockItem {
    fn read(&mut self, reader: &mut BlockReader<'_>) -> Result<()> {
        self.region.read(reader)
    }

    fn write(&self, out: &mut Vec<u8>) -> usize {
        self.region.write(out)
    }

    fn count_bytes(&self) -> usize {
        self.region.len()
    }

    fn is_null(&self) -> bool {
        self.region.is_null()
    }
}

/// Trailing zero padding that rounds the bytes before it up to `alignment`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AlignItem {
    alignment: usize,
    size: usize,
}

impl Default for AlignItem {
    fn default() -> Self {
        AlignItem { alignment: 4, size: 0 }
    }
}

impl AlignItem {
    pub fn new(alignment: usize) -> Self {
        AlignItem { alignment, size: 0 }
    }

    pub fn alignment(&self) -> usize {
        self.alignment
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn set_size(&mut self, size: usize) {
        self.size = size;
    }

    /// Recomputes the pad for `prior` bytes and returns it.
    pub fn align(&mut self, prior: usize) -> usize {
        self.size = padding(prior, self.alignment);
        self.size
    }
}

impl Block for AlignItem {
    /// Consumes `size()` bytes, or whatever is left in the window when fewer remain.
    fn read(&mut self, reader: &mut BlockReader<'_>) -> Result<()> {
        self.size = self.size.min(reader.remaining());
        reader.skip(self.size)
    }

    fn write(&self, out: &mut Vec<u8>) -> usize {
        out.resize(out.len() + self.size, 0);
        self.size
    }

    fn count_bytes(&self) -> usize {
        self.size
    }

    fn is_null(&self) -> bool {
        self.size == 0
    }
}
