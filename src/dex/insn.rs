use crate::dex::item::ItemRef;
use crate::dex::section_type::tag;
use log::debug;
use once_cell::sync::Lazy;
use rangemap::RangeInclusiveMap;

/// Dalvik instruction formats, named after their unit count, register count and kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    F10x,
    F12x,
    F11n,
    F11x,
    F10t,
    F20t,
    F22x,
    F21t,
    F21s,
    F21h,
    F21c,
    F23x,
    F22b,
    F22t,
    F22s,
    F22c,
    F30t,
    F32x,
    F31i,
    F31t,
    F31c,
    F35c,
    F3rc,
    F45cc,
    F4rcc,
    F51l,
}

impl Format {
    /// Length of the instruction in 16-bit code units.
    pub fn units(self) -> usize {
        use Format::*;
        match self {
            F10x | F12x | F11n | F11x | F10t => 1,
            F20t | F22x | F21t | F21s | F21h | F21c | F23x | F22b | F22t | F22s | F22c => 2,
            F30t | F32x | F31i | F31t | F31c | F35c | F3rc => 3,
            F45cc | F4rcc => 4,
            F51l => 5,
        }
    }
}

/// Kind of pool index an instruction carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceType {
    None,
    String,
    Type,
    Field,
    Method,
    CallSite,
    MethodProto,
    MethodHandle,
}

impl ReferenceType {
    pub fn target(self) -> Option<u16> {
        match self {
            ReferenceType::None => None,
            ReferenceType::String => Some(tag::STRING_ID),
            ReferenceType::Type => Some(tag::TYPE_ID),
            ReferenceType::Field => Some(tag::FIELD_ID),
            ReferenceType::Method => Some(tag::METHOD_ID),
            ReferenceType::CallSite => Some(tag::CALL_SITE_ID),
            ReferenceType::MethodProto => Some(tag::PROTO_ID),
            ReferenceType::MethodHandle => Some(tag::METHOD_HANDLE),
        }
    }
}

static OPCODE_TABLE: Lazy<RangeInclusiveMap<u8, (Format, ReferenceType)>> = Lazy::new(|| {
    use Format::*;
    use ReferenceType as R;
    let mut map = RangeInclusiveMap::new();
    let mut add = |from: u8, to: u8, format: Format, reference: ReferenceType| {
        map.insert(from..=to, (format, reference));
    };
    add(0x00, 0x00, F10x, R::None);
    add(0x01, 0x01, F12x, R::None);
    add(0x02, 0x02, F22x, R::None);
    add(0x03, 0x03, F32x, R::None);
    add(0x04, 0x04, F12x, R::None);
    add(0x05, 0x05, F22x, R::None);
    add(0x06, 0x06, F32x, R::None);
    add(0x07, 0x07, F12x, R::None);
    add(0x08, 0x08, F22x, R::None);
    add(0x09, 0x09, F32x, R::None);
    add(0x0a, 0x0d, F11x, R::None);
    add(0x0e, 0x0e, F10x, R::None);
    add(0x0f, 0x11, F11x, R::None);
    add(0x12, 0x12, F11n, R::None);
    add(0x13, 0x13, F21s, R::None);
    add(0x14, 0x14, F31i, R::None);
    add(0x15, 0x15, F21h, R::None);
    add(0x16, 0x16, F21s, R::None);
    add(0x17, 0x17, F31i, R::None);
    add(0x18, 0x18, F51l, R::None);
    add(0x19, 0x19, F21h, R::None);
    add(0x1a, 0x1a, F21c, R::String);
    add(0x1b, 0x1b, F31c, R::String);
    add(0x1c, 0x1c, F21c, R::Type);
    add(0x1d, 0x1e, F11x, R::None);
    add(0x1f, 0x1f, F21c, R::Type);
    add(0x20, 0x20, F22c, R::Type);
    add(0x21, 0x21, F12x, R::None);
    add(0x22, 0x22, F21c, R::Type);
    add(0x23, 0x23, F22c, R::Type);
    add(0x24, 0x24, F35c, R::Type);
    add(0x25, 0x25, F3rc, R::Type);
    add(0x26, 0x26, F31t, R::None);
    add(0x27, 0x27, F11x, R::None);
    add(0x28, 0x28, F10t, R::None);
    add(0x29, 0x29, F20t, R::None);
    add(0x2a, 0x2a, F30t, R::None);
    add(0x2b, 0x2c, F31t, R::None);
    add(0x2d, 0x31, F23x, R::None);
    add(0x32, 0x37, F22t, R::None);
    add(0x38, 0x3d, F21t, R::None);
    add(0x3e, 0x43, F10x, R::None);
    add(0x44, 0x51, F23x, R::None);
    add(0x52, 0x5f, F22c, R::Field);
    add(0x60, 0x6d, F21c, R::Field);
    add(0x6e, 0x72, F35c, R::Method);
    add(0x73, 0x73, F10x, R::None);
    add(0x74, 0x78, F3rc, R::Method);
    add(0x79, 0x7a, F10x, R::None);
    add(0x7b, 0x8f, F12x, R::None);
    add(0x90, 0xaf, F23x, R::None);
    add(0xb0, 0xcf, F12x, R::None);
    add(0xd0, 0xd7, F22s, R::None);
    add(0xd8, 0xe2, F22b, R::None);
    add(0xe3, 0xf9, F10x, R::None);
    add(0xfa, 0xfa, F45cc, R::Method);
    add(0xfb, 0xfb, F4rcc, R::Method);
    add(0xfc, 0xfc, F35c, R::CallSite);
    add(0xfd, 0xfd, F3rc, R::CallSite);
    add(0xfe, 0xfe, F21c, R::MethodHandle);
    add(0xff, 0xff, F21c, R::MethodProto);
    map
});

pub fn opcode_info(opcode: u8) -> (Format, ReferenceType) {
    OPCODE_TABLE.get(&opcode).copied().unwrap_or((Format::F10x, ReferenceType::None))
}

const PACKED_SWITCH_PAYLOAD: u16 = 0x0100;
const SPARSE_SWITCH_PAYLOAD: u16 = 0x0200;
const FILL_ARRAY_DATA_PAYLOAD: u16 = 0x0300;

/// Units taken by the instruction or payload at `pc`, or `None` when it runs off the end.
pub fn instruction_units(insns: &[u16], pc: usize) -> Option<usize> {
    let unit = *insns.get(pc)?;
    let units = match unit {
        PACKED_SWITCH_PAYLOAD => *insns.get(pc + 1)? as usize * 2 + 4,
        SPARSE_SWITCH_PAYLOAD => *insns.get(pc + 1)? as usize * 4 + 2,
        FILL_ARRAY_DATA_PAYLOAD => {
            let width = *insns.get(pc + 1)? as usize;
            let size = *insns.get(pc + 2)? as usize | (*insns.get(pc + 3)? as usize) << 16;
            (size * width + 1) / 2 + 4
        }
        _ => opcode_info((unit & 0xff) as u8).0.units(),
    };
    if pc + units > insns.len() {
        return None;
    }
    Some(units)
}

/// A pool index embedded in the instruction stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InsnRef {
    /// Code unit holding the index (the low half for 32-bit indices).
    pub unit: usize,
    pub wide: bool,
    pub target: u16,
    pub item: ItemRef,
}

/// Locates every pool index in `insns`.
pub fn scan_refs(insns: &[u16]) -> Vec<InsnRef> {
    let mut refs = Vec::new();
    let mut pc = 0;
    while pc < insns.len() {
        let Some(units) = instruction_units(insns, pc) else {
            debug!("[code] instruction at unit {pc} runs past the end of the code");
            break;
        };
        let unit = insns[pc];
        let (format, reference) = opcode_info((unit & 0xff) as u8);
        if let Some(target) = reference.target() {
            let wide = format == Format::F31c;
            let raw = if wide { insns[pc + 1] as u32 | (insns[pc + 2] as u32) << 16 } else { insns[pc + 1] as u32 };
            refs.push(InsnRef { unit: pc + 1, wide, target, item: ItemRef::from_raw(raw) });
            if matches!(format, Format::F45cc | Format::F4rcc) {
                let proto = ItemRef::from_raw(insns[pc + 3] as u32);
                refs.push(InsnRef { unit: pc + 3, wide: false, target: tag::PROTO_ID, item: proto });
            }
        }
        pc += units;
    }
    refs
}

/// Writes the raw value of every reference back into `insns`.
pub fn patch_refs(insns: &mut [u16], refs: &[InsnRef]) {
    for r in refs {
        let raw = r.item.raw();
        if let Some(slot) = insns.get_mut(r.unit) {
            *slot = raw as u16;
        }
        if r.wide {
            if let Some(slot) = insns.get_mut(r.unit + 1) {
                *slot = (raw >> 16) as u16;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_opcode_has_a_format() {
        for opcode in 0..=255u8 {
            assert!(OPCODE_TABLE.get(&opcode).is_some(), "opcode {opcode:02x}");
        }
        assert_eq!(opcode_info(0x1b), (Format::F31c, ReferenceType::String));
        assert_eq!(opcode_info(0x73).0.units(), 1);
        assert_eq!(opcode_info(0x18).0.units(), 5);
    }

    #[test]
    fn finds_refs_and_skips_payloads() {
        let insns: Vec<u16> = vec![
            0x001a, 0x0005, // const-string v0, string@5
            0x001b, 0x0002, 0x0001, // const-string/jumbo v0, string@0x10002
            0x2070, 0x0009, 0x0010, // invoke-direct {v0, v1}, method@9
            0x0026, 0x0006, 0x0000, // fill-array-data v0, +6
            0x000e, // return-void
            0x0300, 0x0001, 0x0003, 0x0000, 0x1a1a, 0x001a, // fill-array-data payload, 3 bytes
        ];
        let mut refs = scan_refs(&insns);
        assert_eq!(refs.len(), 3);
        assert_eq!((refs[0].unit, refs[0].target, refs[0].item.raw()), (1, tag::STRING_ID, 5));
        assert_eq!((refs[1].wide, refs[1].item.raw()), (true, 0x10002));
        assert_eq!((refs[2].unit, refs[2].target), (6, tag::METHOD_ID));

        let mut patched = insns.clone();
        refs[1].item.set_raw(0x30004);
        patch_refs(&mut patched, &refs);
        assert_eq!(&patched[3..5], &[0x0004, 0x0003]);
        assert_eq!(&patched[12..], &insns[12..]);
    }

    #[test]
    fn polymorphic_invoke_carries_a_proto() {
        let insns = vec![0x20fa, 0x0003, 0x0010, 0x0007];
        let refs = scan_refs(&insns);
        assert_eq!(refs.len(), 2);
        assert_eq!((refs[1].target, refs[1].item.raw()), (tag::PROTO_ID, 7));
        assert_eq!(instruction_units(&[0x0100, 0x0002], 0), None, "truncated switch payload");
    }
}
