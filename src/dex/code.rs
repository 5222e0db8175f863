use crate::block::{Block, BlockReader};
use crate::dex::insn::{patch_refs, scan_refs, InsnRef};
use crate::dex::item::{ItemRef, SectionItem};
use crate::dex::section_type::tag;
use crate::dex::{measure, write_sleb128, write_u2, write_u4, write_uleb128};
use crate::error::Result;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeAddrPair {
    pub type_ref: ItemRef,
    pub addr: u32,
}

/// One `encoded_catch_handler`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatchHandler {
    pub pairs: Vec<TypeAddrPair>,
    pub catch_all_addr: Option<u32>,
}

impl CatchHandler {
    fn read(reader: &mut BlockReader<'_>) -> Result<CatchHandler> {
        let size = reader.read_sleb128()?;
        let mut pairs = Vec::with_capacity((size.unsigned_abs() as usize).min(reader.remaining()));
        for _ in 0..size.unsigned_abs() {
            let type_ref = ItemRef::from_raw(reader.read_uleb128()?);
            let addr = reader.read_uleb128()?;
            pairs.push(TypeAddrPair { type_ref, addr });
        }
        let catch_all_addr = if size <= 0 { Some(reader.read_uleb128()?) } else { None };
        Ok(CatchHandler { pairs, catch_all_addr })
    }

    fn write(&self, out: &mut Vec<u8>) -> usize {
        let count = self.pairs.len() as i32;
        let mut c = write_sleb128(out, if self.catch_all_addr.is_some() { -count } else { count });
        for pair in &self.pairs {
            c += write_uleb128(out, pair.type_ref.raw());
            c += write_uleb128(out, pair.addr);
        }
        if let Some(addr) = self.catch_all_addr {
            c += write_uleb128(out, addr);
        }
        c
    }
}

/// A `try_item`; `handler` indexes [`Code::handlers`] instead of holding a byte offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TryItem {
    pub start_addr: u32,
    pub insn_count: u16,
    pub handler: usize,
}

/// `code_item`: registers, instructions and exception tables of one method.
///
/// Pool indices inside the instruction stream are tracked as references and patched
/// into the instructions when the record is written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Code {
    pub registers_size: u16,
    pub ins_size: u16,
    pub outs_size: u16,
    pub debug_info: ItemRef,
    insns: Vec<u16>,
    insn_refs: Vec<InsnRef>,
    pub tries: Vec<TryItem>,
    pub handlers: Vec<CatchHandler>,
}

impl Code {
    pub fn new(registers_size: u16, ins_size: u16, outs_size: u16, insns: Vec<u16>) -> Self {
        let mut code = Code { registers_size, ins_size, outs_size, ..Default::default() };
        code.set_instructions(insns);
        code
    }

    /// Instructions with the reference operands as last refreshed.
    pub fn instructions(&self) -> Vec<u16> {
        let mut insns = self.insns.clone();
        patch_refs(&mut insns, &self.insn_refs);
        insns
    }

    pub fn set_instructions(&mut self, insns: Vec<u16>) {
        self.insn_refs = scan_refs(&insns);
        self.insns = insns;
    }

    pub fn instruction_refs(&self) -> &[InsnRef] {
        &self.insn_refs
    }

    pub fn instruction_refs_mut(&mut self) -> &mut [InsnRef] {
        &mut self.insn_refs
    }

    fn write_handlers(&self, out: &mut Vec<u8>) -> (usize, Vec<u16>) {
        let mut c = write_uleb128(out, self.handlers.len() as u32);
        let mut offsets = Vec::with_capacity(self.handlers.len());
        for handler in &self.handlers {
            offsets.push(c as u16);
            c += handler.write(out);
        }
        (c, offsets)
    }
}

impl Block for Code {
    fn read(&mut self, reader: &mut BlockReader<'_>) -> Result<()> {
        self.registers_size = reader.read_u16()?;
        self.ins_size = reader.read_u16()?;
        self.outs_size = reader.read_u16()?;
        let tries_size = reader.read_u16()? as usize;
        self.debug_info = ItemRef::from_raw(reader.read_u32()?);
        let insns_size = reader.read_u32()? as usize;
        let raw = reader.read_bytes(insns_size * 2)?;
        let insns = raw.chunks_exact(2).map(|c| u16::from_le_bytes([c[0], c[1]])).collect();
        self.set_instructions(insns);

        self.tries.clear();
        self.handlers.clear();
        if tries_size == 0 {
            return Ok(());
        }
        if insns_size % 2 == 1 {
            reader.skip(2)?;
        }
        let mut raw_tries = Vec::with_capacity(tries_size.min(reader.remaining()));
        for _ in 0..tries_size {
            let start_addr = reader.read_u32()?;
            let insn_count = reader.read_u16()?;
            let handler_off = reader.read_u16()?;
            raw_tries.push((start_addr, insn_count, handler_off));
        }
        let list_start = reader.position();
        let count = reader.read_uleb128()? as usize;
        let mut by_offset = HashMap::new();
        for index in 0..count {
            by_offset.insert((reader.position() - list_start) as u16, index);
            self.handlers.push(CatchHandler::read(reader)?);
        }
        for (start_addr, insn_count, handler_off) in raw_tries {
            let Some(&handler) = by_offset.get(&handler_off) else {
                fail!(("try block at {start_addr} names handler offset {handler_off}, which starts no handler"), ("code item"));
            };
            self.tries.push(TryItem { start_addr, insn_count, handler });
        }
        Ok(())
    }

    fn write(&self, out: &mut Vec<u8>) -> usize {
        let mut c = write_u2(out, self.registers_size);
        c += write_u2(out, self.ins_size);
        c += write_u2(out, self.outs_size);
        c += write_u2(out, self.tries.len() as u16);
        c += write_u4(out, self.debug_info.raw());
        c += write_u4(out, self.insns.len() as u32);
        for unit in self.instructions() {
            c += write_u2(out, unit);
        }
        if self.tries.is_empty() {
            return c;
        }
        if self.insns.len() % 2 == 1 {
            c += write_u2(out, 0);
        }
        let mut handler_bytes = Vec::new();
        let (_, offsets) = self.write_handlers(&mut handler_bytes);
        for try_item in &self.tries {
            c += write_u4(out, try_item.start_addr);
            c += write_u2(out, try_item.insn_count);
            c += write_u2(out, offsets.get(try_item.handler).copied().unwrap_or(0));
        }
        out.extend_from_slice(&handler_bytes);
        c + handler_bytes.len()
    }

    fn count_bytes(&self) -> usize {
        let mut c = 16 + self.insns.len() * 2;
        if !self.tries.is_empty() {
            c += (self.insns.len() % 2) * 2 + self.tries.len() * 8;
            c += measure(|out| self.write_handlers(out).0);
        }
        c
    }
}

impl SectionItem for Code {
    const TYPE: u16 = tag::CODE;

    fn visit_refs(&self, visit: &mut dyn FnMut(u16, &ItemRef)) {
        visit(tag::DEBUG_INFO, &self.debug_info);
        for r in &self.insn_refs {
            visit(r.target, &r.item);
        }
        for pair in self.handlers.iter().flat_map(|h| &h.pairs) {
            visit(tag::TYPE_ID, &pair.type_ref);
        }
    }

    fn visit_refs_mut(&mut self, visit: &mut dyn FnMut(u16, &mut ItemRef)) {
        visit(tag::DEBUG_INFO, &mut self.debug_info);
        for r in &mut self.insn_refs {
            visit(r.target, &mut r.item);
        }
        for pair in self.handlers.iter_mut().flat_map(|h| &mut h.pairs) {
            visit(tag::TYPE_ID, &mut pair.type_ref);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Code {
        // const-string v0, string@3; throw v0
        let mut code = Code::new(1, 0, 0, vec![0x001a, 0x0003, 0x0027]);
        code.handlers = vec![
            CatchHandler { pairs: vec![TypeAddrPair { type_ref: ItemRef::from_raw(2), addr: 2 }], catch_all_addr: None },
            CatchHandler { pairs: vec![], catch_all_addr: Some(2) },
        ];
        code.tries = vec![
            TryItem { start_addr: 0, insn_count: 2, handler: 1 },
            TryItem { start_addr: 2, insn_count: 1, handler: 0 },
        ];
        code
    }

    #[test]
    fn tries_point_at_handler_offsets() {
        let code = sample();
        let bytes = code.bytes();
        assert_eq!(bytes.len(), code.count_bytes());
        // header 16, three units, one unit of padding
        assert_eq!(&bytes[22..24], &[0, 0]);
        // first try uses the second handler, which starts after the list size and 3 bytes
        assert_eq!(u16::from_le_bytes([bytes[30], bytes[31]]), 4);
        assert_eq!(u16::from_le_bytes([bytes[38], bytes[39]]), 1);

        let mut back = Code::default();
        back.read(&mut BlockReader::new(&bytes)).unwrap();
        assert_eq!(back, code);
    }

    #[test]
    fn instruction_refs_are_patched_on_write() {
        let mut code = sample();
        code.instruction_refs_mut()[0].item.set_raw(9);
        assert_eq!(code.instructions(), vec![0x001a, 0x0009, 0x0027]);
        let mut refs = vec![];
        code.visit_refs(&mut |t, r| refs.push((t, r.raw())));
        assert_eq!(refs, vec![(tag::DEBUG_INFO, 0), (tag::STRING_ID, 9), (tag::TYPE_ID, 2)]);
    }
}
