//! Generic block engine shared by the resource chunk tree and the DEX section model.
//!
//! A [`Block`] knows how to read itself from a bounded [`BlockReader`], how many bytes
//! it occupies and how to write those bytes back. Containers such as [`BlockList`] and
//! [`CountedOffsetArray`] derive every size, count and offset field from their children
//! when [`Block::refresh`] runs; nothing is repaired eagerly on mutation.

mod counted;
mod item;
mod list;
mod reader;
mod region;

pub use counted::{ArrayLayout, CountedOffsetArray, NO_ENTRY};
pub use item::{AlignItem, BlockItem, IntegerCell};
pub use list::BlockList;
pub use reader::BlockReader;
pub use region::ByteRegion;

use crate::error::Result;
use num_traits::PrimInt;
use std::io;

/// The read/write/measure contract every node of a container tree implements.
pub trait Block
{
    fn read(&mut self, reader: &mut BlockReader<'_>) -> Result<()>;

    /// Appends exactly [`Block::count_bytes`] bytes to `out` and returns that count.
    fn write(&self, out: &mut Vec<u8>) -> usize;

    fn count_bytes(&self) -> usize;

    /// Structurally present but semantically absent.
    fn is_null(&self) -> bool
    {
        false
    }

    /// Recomputes derived fields from children. Children are refreshed first.
    fn refresh(&mut self) {}

    fn bytes(&self) -> Vec<u8>
    {
        let mut out = Vec::with_capacity(self.count_bytes());
        self.write(&mut out);
        out
    }

    fn write_to<W: io::Write>(&self, writer: &mut W) -> Result<usize>
    where
        Self: Sized,
    {
        let bytes = self.bytes();
        writer.write_all(&bytes)?;
        Ok(bytes.len())
    }
}

/// Rounds `value` up to the next multiple of `alignment`.
pub fn align_up<T: PrimInt>(value: T, alignment: T) -> T
{
    value + padding(value, alignment)
}

/// Number of zero bytes needed after `prior` bytes to reach a multiple of `alignment`.
pub fn padding<T: PrimInt>(prior: T, alignment: T) -> T
{
    if alignment <= T::one() {
        return T::zero();
    }
    (alignment - prior % alignment) % alignment
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padding_rounds_to_alignment() {
        assert_eq!(padding(0u32, 4), 0);
        assert_eq!(padding(37usize, 4), 3);
        assert_eq!(padding(40usize, 4), 0);
        assert_eq!(padding(5u32, 1), 0);
        assert_eq!(align_up(45usize, 4), 48);
        assert_eq!(align_up(7u32, 0), 7);
    }
}
