use crate::block::{Block, BlockReader};
use crate::dex::item::{ItemRef, SectionItem};
use crate::dex::section_type::tag;
use crate::dex::{measure, write_sleb128, write_u1, write_uleb128, write_uleb128p1};
use crate::error::Result;

const DBG_END_SEQUENCE: u8 = 0x00;
const DBG_ADVANCE_PC: u8 = 0x01;
const DBG_ADVANCE_LINE: u8 = 0x02;
const DBG_START_LOCAL: u8 = 0x03;
const DBG_START_LOCAL_EXTENDED: u8 = 0x04;
const DBG_END_LOCAL: u8 = 0x05;
const DBG_RESTART_LOCAL: u8 = 0x06;
const DBG_SET_PROLOGUE_END: u8 = 0x07;
const DBG_SET_EPILOGUE_BEGIN: u8 = 0x08;
const DBG_SET_FILE: u8 = 0x09;

/// One opcode of the debug info state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebugOp {
    EndSequence,
    AdvancePc(u32),
    AdvanceLine(i32),
    StartLocal { register: u32, name: ItemRef, type_ref: ItemRef },
    StartLocalExtended { register: u32, name: ItemRef, type_ref: ItemRef, signature: ItemRef },
    EndLocal(u32),
    RestartLocal(u32),
    SetPrologueEnd,
    SetEpilogueBegin,
    SetFile(ItemRef),
    /// Opcodes 0x0a and above advance line and address together.
    Special(u8),
}

impl DebugOp {
    fn read(reader: &mut BlockReader<'_>) -> Result<DebugOp> {
        let opcode = reader.read_u8()?;
        let op = match opcode {
            DBG_END_SEQUENCE => DebugOp::EndSequence,
            DBG_ADVANCE_PC => DebugOp::AdvancePc(reader.read_uleb128()?),
            DBG_ADVANCE_LINE => DebugOp::AdvanceLine(reader.read_sleb128()?),
            DBG_START_LOCAL => DebugOp::StartLocal {
                register: reader.read_uleb128()?,
                name: ItemRef::from_raw(reader.read_uleb128p1()?),
                type_ref: ItemRef::from_raw(reader.read_uleb128p1()?),
            },
            DBG_START_LOCAL_EXTENDED => DebugOp::StartLocalExtended {
                register: reader.read_uleb128()?,
                name: ItemRef::from_raw(reader.read_uleb128p1()?),
                type_ref: ItemRef::from_raw(reader.read_uleb128p1()?),
                signature: ItemRef::from_raw(reader.read_uleb128p1()?),
            },
            DBG_END_LOCAL => DebugOp::EndLocal(reader.read_uleb128()?),
            DBG_RESTART_LOCAL => DebugOp::RestartLocal(reader.read_uleb128()?),
            DBG_SET_PROLOGUE_END => DebugOp::SetPrologueEnd,
            DBG_SET_EPILOGUE_BEGIN => DebugOp::SetEpilogueBegin,
            DBG_SET_FILE => DebugOp::SetFile(ItemRef::from_raw(reader.read_uleb128p1()?)),
            special => DebugOp::Special(special),
        };
        Ok(op)
    }

    fn write(&self, out: &mut Vec<u8>) -> usize {
        match self {
            DebugOp::EndSequence => write_u1(out, DBG_END_SEQUENCE),
            DebugOp::AdvancePc(diff) => write_u1(out, DBG_ADVANCE_PC) + write_uleb128(out, *diff),
            DebugOp::AdvanceLine(diff) => write_u1(out, DBG_ADVANCE_LINE) + write_sleb128(out, *diff),
            DebugOp::StartLocal { register, name, type_ref } => {
                write_u1(out, DBG_START_LOCAL)
                    + write_uleb128(out, *register)
                    + write_uleb128p1(out, name.raw())
                    + write_uleb128p1(out, type_ref.raw())
            }
            DebugOp::StartLocalExtended { register, name, type_ref, signature } => {
                write_u1(out, DBG_START_LOCAL_EXTENDED)
                    + write_uleb128(out, *register)
                    + write_uleb128p1(out, name.raw())
                    + write_uleb128p1(out, type_ref.raw())
                    + write_uleb128p1(out, signature.raw())
            }
            DebugOp::EndLocal(register) => write_u1(out, DBG_END_LOCAL) + write_uleb128(out, *register),
            DebugOp::RestartLocal(register) => write_u1(out, DBG_RESTART_LOCAL) + write_uleb128(out, *register),
            DebugOp::SetPrologueEnd => write_u1(out, DBG_SET_PROLOGUE_END),
            DebugOp::SetEpilogueBegin => write_u1(out, DBG_SET_EPILOGUE_BEGIN),
            DebugOp::SetFile(name) => write_u1(out, DBG_SET_FILE) + write_uleb128p1(out, name.raw()),
            DebugOp::Special(opcode) => write_u1(out, *opcode),
        }
    }
}

/// `debug_info_item`: line table and local variable scopes of one method.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DebugInfo {
    pub line_start: u32,
    pub parameter_names: Vec<ItemRef>,
    /// The opcodes, ending with [`DebugOp::EndSequence`] once read or refreshed.
    pub program: Vec<DebugOp>,
}

impl Block for DebugInfo {
    fn read(&mut self, reader: &mut BlockReader<'_>) -> Result<()> {
        self.line_start = reader.read_uleb128()?;
        let parameters = reader.read_uleb128()? as usize;
        self.parameter_names = Vec::with_capacity(parameters.min(reader.remaining()));
        for _ in 0..parameters {
            self.parameter_names.push(ItemRef::from_raw(reader.read_uleb128p1()?));
        }
        self.program.clear();
        loop {
            let op = DebugOp::read(reader)?;
            let end = op == DebugOp::EndSequence;
            self.program.push(op);
            if end {
                break;
            }
        }
        Ok(())
    }

    fn write(&self, out: &mut Vec<u8>) -> usize {
        let mut c = write_uleb128(out, self.line_start);
        c += write_uleb128(out, self.parameter_names.len() as u32);
        for name in &self.parameter_names {
            c += write_uleb128p1(out, name.raw());
        }
        for op in &self.program {
            c += op.write(out);
        }
        if self.program.last() != Some(&DebugOp::EndSequence) {
            c += DebugOp::EndSequence.write(out);
        }
        c
    }

    fn count_bytes(&self) -> usize {
        measure(|out| self.write(out))
    }
}

impl SectionItem for DebugInfo {
    const TYPE: u16 = tag::DEBUG_INFO;

    fn visit_refs(&self, visit: &mut dyn FnMut(u16, &ItemRef)) {
        for name in &self.parameter_names {
            visit(tag::STRING_ID, name);
        }
        for op in &self.program {
            match op {
                DebugOp::StartLocal { name, type_ref, .. } => {
                    visit(tag::STRING_ID, name);
                    visit(tag::TYPE_ID, type_ref);
                }
                DebugOp::StartLocalExtended { name, type_ref, signature, .. } => {
                    visit(tag::STRING_ID, name);
                    visit(tag::TYPE_ID, type_ref);
                    visit(tag::STRING_ID, signature);
                }
                DebugOp::SetFile(name) => visit(tag::STRING_ID, name),
                _ => {}
            }
        }
    }

    fn visit_refs_mut(&mut self, visit: &mut dyn FnMut(u16, &mut ItemRef)) {
        for name in &mut self.parameter_names {
            visit(tag::STRING_ID, name);
        }
        for op in &mut self.program {
            match op {
                DebugOp::StartLocal { name, type_ref, .. } => {
                    visit(tag::STRING_ID, name);
                    visit(tag::TYPE_ID, type_ref);
                }
                DebugOp::StartLocalExtended { name, type_ref, signature, .. } => {
                    visit(tag::STRING_ID, name);
                    visit(tag::TYPE_ID, type_ref);
                    visit(tag::STRING_ID, signature);
                }
                DebugOp::SetFile(name) => visit(tag::STRING_ID, name),
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn program_reads_to_end_sequence() {
        // line 3, one unnamed parameter, start local v1 "x":I, advance, special, end
        let bytes = [0x03, 0x01, 0x00, 0x03, 0x01, 0x05, 0x02, 0x01, 0x02, 0x0e, 0x00, 0xAA];
        let mut info = DebugInfo::default();
        let mut reader = BlockReader::new(&bytes);
        info.read(&mut reader).unwrap();
        assert_eq!(reader.position(), 11, "trailing bytes belong to the next record");
        assert_eq!(info.line_start, 3);
        assert_eq!(info.parameter_names[0].raw(), crate::dex::NO_INDEX);
        assert_eq!(
            info.program[0],
            DebugOp::StartLocal { register: 1, name: ItemRef::from_raw(4), type_ref: ItemRef::from_raw(1) }
        );
        assert_eq!(info.program[2], DebugOp::Special(0x0e));
        assert_eq!(info.bytes(), &bytes[..11]);

        let mut refs = vec![];
        info.visit_refs(&mut |t, r| refs.push((t, r.raw())));
        assert_eq!(refs, vec![(tag::STRING_ID, crate::dex::NO_INDEX), (tag::STRING_ID, 4), (tag::TYPE_ID, 1)]);
    }

    #[test]
    fn missing_end_sequence_is_written() {
        let info = DebugInfo { line_start: 1, parameter_names: vec![], program: vec![DebugOp::SetPrologueEnd] };
        assert_eq!(info.bytes(), vec![0x01, 0x00, 0x07, 0x00]);
        assert_eq!(info.count_bytes(), 4);
    }
}
