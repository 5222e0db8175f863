use crate::block::BlockReader;
use crate::dex::item::ItemRef;
use crate::dex::section_type::tag;
use crate::dex::{write_u1, write_uleb128, write_x};
use crate::error::Result;

#[derive(Debug, PartialEq, Clone, Default)]
pub struct EncodedAnnotation {
    pub type_ref: ItemRef,
    pub elements: Vec<AnnotationElement>,
}

impl EncodedAnnotation {
    pub fn read(reader: &mut BlockReader<'_>) -> Result<EncodedAnnotation> {
        let type_ref = ItemRef::from_raw(reader.read_uleb128()?);
        let size = reader.read_uleb128()? as usize;
        let mut elements = Vec::with_capacity(size.min(reader.remaining()));

        for _ in 0..size {
            elements.push(AnnotationElement::read(reader)?);
        }

        Ok(EncodedAnnotation { type_ref, elements })
    }

    pub fn write(&self, bytes: &mut Vec<u8>) -> usize {
        let mut written_bytes = 0;

        written_bytes += write_uleb128(bytes, self.type_ref.raw());
        written_bytes += write_uleb128(bytes, self.elements.len() as u32);

        for element in &self.elements {
            written_bytes += element.write(bytes);
        }

        written_bytes
    }

    pub fn visit_refs(&self, visit: &mut dyn FnMut(u16, &ItemRef)) {
        visit(tag::TYPE_ID, &self.type_ref);
        for element in &self.elements {
            visit(tag::STRING_ID, &element.name);
            element.value.visit_refs(visit);
        }
    }

    pub fn visit_refs_mut(&mut self, visit: &mut dyn FnMut(u16, &mut ItemRef)) {
        visit(tag::TYPE_ID, &mut self.type_ref);
        for element in &mut self.elements {
            visit(tag::STRING_ID, &mut element.name);
            element.value.visit_refs_mut(visit);
        }
    }
}

#[derive(Debug, PartialEq, Clone)]
pub struct AnnotationElement {
    pub name: ItemRef,
    pub value: EncodedValue,
}

impl AnnotationElement {
    pub fn read(reader: &mut BlockReader<'_>) -> Result<AnnotationElement> {
        let name = ItemRef::from_raw(reader.read_uleb128()?);
        let value = EncodedValue::read(reader)?;

        Ok(AnnotationElement { name, value })
    }

    pub fn write(&self, bytes: &mut Vec<u8>) -> usize {
        write_uleb128(bytes, self.name.raw()) + self.value.write(bytes)
    }
}

/// A tagged constant of an encoded array or annotation.
///
/// Index-carrying variants hold [`ItemRef`]s into the id sections; `Enum` points at the
/// enum constant's field.
#[derive(Debug, PartialEq, Clone)]
pub enum EncodedValue {
    Byte(i8),
    Short(i16),
    Char(u16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    MethodType(ItemRef),
    MethodHandle(ItemRef),
    String(ItemRef),
    Type(ItemRef),
    Field(ItemRef),
    Method(ItemRef),
    Enum(ItemRef),
    Array(Vec<EncodedValue>),
    Annotation(EncodedAnnotation),
    Null,
    Boolean(bool),
}

impl EncodedValue
{
    #[inline]
    pub fn as_annotation(&self) -> Option<&EncodedAnnotation> {
        match self {
            EncodedValue::Annotation(ann) => Some(ann),
            _ => None,
        }
    }

    fn reference(&self) -> Option<(u16, &ItemRef)>
    {
        match self
        {
            EncodedValue::MethodType(r) => Some((tag::PROTO_ID, r)),
            EncodedValue::MethodHandle(r) => Some((tag::METHOD_HANDLE, r)),
            EncodedValue::String(r) => Some((tag::STRING_ID, r)),
            EncodedValue::Type(r) => Some((tag::TYPE_ID, r)),
            EncodedValue::Field(r) | EncodedValue::Enum(r) => Some((tag::FIELD_ID, r)),
            EncodedValue::Method(r) => Some((tag::METHOD_ID, r)),
            _ => None,
        }
    }

    pub fn visit_refs(&self, visit: &mut dyn FnMut(u16, &ItemRef))
    {
        match self
        {
            EncodedValue::Array(values) => values.iter().for_each(|v| v.visit_refs(visit)),
            EncodedValue::Annotation(annotation) => annotation.visit_refs(visit),
            other => {
                if let Some((target, r)) = other.reference() {
                    visit(target, r);
                }
            }
        }
    }

    pub fn visit_refs_mut(&mut self, visit: &mut dyn FnMut(u16, &mut ItemRef))
    {
        match self
        {
            EncodedValue::MethodType(r) => visit(tag::PROTO_ID, r),
            EncodedValue::MethodHandle(r) => visit(tag::METHOD_HANDLE, r),
            EncodedValue::String(r) => visit(tag::STRING_ID, r),
            EncodedValue::Type(r) => visit(tag::TYPE_ID, r),
            EncodedValue::Field(r) | EncodedValue::Enum(r) => visit(tag::FIELD_ID, r),
            EncodedValue::Method(r) => visit(tag::METHOD_ID, r),
            EncodedValue::Array(values) => values.iter_mut().for_each(|v| v.visit_refs_mut(visit)),
            EncodedValue::Annotation(annotation) => annotation.visit_refs_mut(visit),
            _ => {}
        }
    }

    pub fn read(reader: &mut BlockReader<'_>) -> Result<EncodedValue> {
        let position = reader.position();
        let header_byte = reader.read_u8()?;
        let value_arg = header_byte >> 5;
        let value_type = header_byte & 0x1F;
        let size = (value_arg + 1) as usize;

        let value = match value_type {
            0x00 => EncodedValue::Byte(reader.read_u8()? as i8),
            0x02 => EncodedValue::Short(read_signed(reader, size)? as i16),
            0x03 => EncodedValue::Char(read_unsigned(reader, size)? as u16),
            0x04 => EncodedValue::Int(read_signed(reader, size)? as i32),
            0x06 => EncodedValue::Long(read_signed(reader, size)?),
            0x10 => EncodedValue::Float(f32::from_bits(read_right_extended(reader, size, 4)? as u32)),
            0x11 => EncodedValue::Double(f64::from_bits(read_right_extended(reader, size, 8)?)),
            0x15 => EncodedValue::MethodType(read_index(reader, size)?),
            0x16 => EncodedValue::MethodHandle(read_index(reader, size)?),
            0x17 => EncodedValue::String(read_index(reader, size)?),
            0x18 => EncodedValue::Type(read_index(reader, size)?),
            0x19 => EncodedValue::Field(read_index(reader, size)?),
            0x1A => EncodedValue::Method(read_index(reader, size)?),
            0x1B => EncodedValue::Enum(read_index(reader, size)?),
            0x1C => EncodedValue::Array(read_encoded_array(reader)?),
            0x1D => EncodedValue::Annotation(EncodedAnnotation::read(reader)?),
            0x1E => EncodedValue::Null,
            0x1F => EncodedValue::Boolean(value_arg != 0),
            _ => fail!(("unknown encoded value type 0x{value_type:02x}"), ("encoded value at offset {position}")),
        };
        Ok(value)
    }

    pub fn write(&self, bytes: &mut Vec<u8>) -> usize
    {
        match self {
            EncodedValue::Byte(val) => {
                write_u1(bytes, 0x00) + write_u1(bytes, *val as u8)
            },
            EncodedValue::Short(value) => write_sized(bytes, 0x02, &value.to_le_bytes(), signed_size(*value as i64, 2)),
            EncodedValue::Char(value) => write_sized(bytes, 0x03, &value.to_le_bytes(), unsigned_size(*value as u64)),
            EncodedValue::Int(value) => write_sized(bytes, 0x04, &value.to_le_bytes(), signed_size(*value as i64, 4)),
            EncodedValue::Long(value) => write_sized(bytes, 0x06, &value.to_le_bytes(), signed_size(*value, 8)),
            EncodedValue::Float(value) => write_right_extended(bytes, 0x10, &value.to_bits().to_le_bytes()),
            EncodedValue::Double(value) => write_right_extended(bytes, 0x11, &value.to_bits().to_le_bytes()),
            EncodedValue::MethodType(r) => write_index(bytes, 0x15, r),
            EncodedValue::MethodHandle(r) => write_index(bytes, 0x16, r),
            EncodedValue::String(r) => write_index(bytes, 0x17, r),
            EncodedValue::Type(r) => write_index(bytes, 0x18, r),
            EncodedValue::Field(r) => write_index(bytes, 0x19, r),
            EncodedValue::Method(r) => write_index(bytes, 0x1a, r),
            EncodedValue::Enum(r) => write_index(bytes, 0x1b, r),
            EncodedValue::Array(value) => {
                write_u1(bytes, 0x1c) + write_encoded_array(value, bytes)
            },
            EncodedValue::Annotation(value) => {
                write_u1(bytes, 0x1d) + value.write(bytes)
            },
            EncodedValue::Null => write_u1(bytes, 0x1e),
            EncodedValue::Boolean(val) => write_u1(bytes, 0x1f | ((*val as u8) << 5)),
        }
    }
}

fn read_unsigned(reader: &mut BlockReader<'_>, size: usize) -> Result<u64> {
    let raw = reader.read_bytes(size)?;
    Ok(raw.iter().rev().fold(0u64, |acc, b| (acc << 8) | *b as u64))
}

fn read_signed(reader: &mut BlockReader<'_>, size: usize) -> Result<i64> {
    let value = read_unsigned(reader, size)?;
    let shift = 64 - 8 * size as u32;
    Ok(((value << shift) as i64) >> shift)
}

/// Floats keep their high-order bytes; the missing low bytes are zero.
fn read_right_extended(reader: &mut BlockReader<'_>, size: usize, width: usize) -> Result<u64> {
    let value = read_unsigned(reader, size)?;
    Ok(value << (8 * width.saturating_sub(size)))
}

fn read_index(reader: &mut BlockReader<'_>, size: usize) -> Result<ItemRef> {
    Ok(ItemRef::from_raw(read_unsigned(reader, size)? as u32))
}

/// Fewest bytes whose sign extension gives back `value`.
fn signed_size(value: i64, width: usize) -> usize
{
    (1..width).find(|&n| {
        let shift = 64 - 8 * n as u32;
        ((value << shift) >> shift) == value
    }).unwrap_or(width)
}

fn unsigned_size(value: u64) -> usize
{
    let used = 8 - (value.leading_zeros() / 8) as usize;
    used.max(1)
}

fn write_sized(bytes: &mut Vec<u8>, value_type: u8, le: &[u8], size: usize) -> usize
{
    write_u1(bytes, (((size - 1) as u8) << 5) | value_type) + write_x(bytes, &le[..size])
}

fn write_right_extended(bytes: &mut Vec<u8>, value_type: u8, le: &[u8]) -> usize
{
    let zeros = le.iter().take_while(|b| **b == 0).count().min(le.len() - 1);
    let size = le.len() - zeros;
    write_u1(bytes, (((size - 1) as u8) << 5) | value_type) + write_x(bytes, &le[zeros..])
}

fn write_index(bytes: &mut Vec<u8>, value_type: u8, r: &ItemRef) -> usize
{
    let raw = r.raw();
    write_sized(bytes, value_type, &raw.to_le_bytes(), unsigned_size(raw as u64))
}

pub fn write_encoded_array(encoded_array: &[EncodedValue], bytes: &mut Vec<u8>) -> usize
{
    let mut c = 0;
    c += write_uleb128(bytes, encoded_array.len() as u32);

    for value in encoded_array {
        c += value.write(bytes);
    }

    c
}

pub fn read_encoded_array(reader: &mut BlockReader<'_>) -> Result<Vec<EncodedValue>>
{
    let size = reader.read_uleb128()? as usize;

    let mut values = Vec::with_capacity(size.min(reader.remaining()));
    for _ in 0..size
    {
        values.push(EncodedValue::read(reader)?);
    }

    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(bytes: &[u8]) -> EncodedValue {
        let mut reader = BlockReader::new(bytes);
        let value = EncodedValue::read(&mut reader).unwrap();
        assert_eq!(reader.remaining(), 0, "value consumed all of {bytes:?}");
        value
    }

    fn encode(value: &EncodedValue) -> Vec<u8> {
        let mut out = vec![];
        let written = value.write(&mut out);
        assert_eq!(written, out.len());
        out
    }

    #[test]
    fn negative_numbers_use_minimal_sign_extended_width() {
        assert_eq!(encode(&EncodedValue::Int(-1)), vec![0x04, 0xFF]);
        assert_eq!(encode(&EncodedValue::Int(128)), vec![0x24, 0x80, 0x00]);
        assert_eq!(encode(&EncodedValue::Short(-129)), vec![0x22, 0x7F, 0xFF]);
        assert_eq!(encode(&EncodedValue::Long(i64::MIN)).len(), 9);
        assert_eq!(decode(&[0x04, 0xFF]), EncodedValue::Int(-1));
        assert_eq!(decode(&[0x46, 0x00, 0x80, 0xFF]), EncodedValue::Long(-0x8000));
        assert_eq!(decode(&[0x22, 0x7F, 0xFF]), EncodedValue::Short(-129));
    }

    #[test]
    fn floats_drop_low_zero_bytes() {
        // 1.0f32 is 0x3F800000: only the top two bytes are written
        assert_eq!(encode(&EncodedValue::Float(1.0)), vec![0x30, 0x80, 0x3F]);
        assert_eq!(decode(&[0x30, 0x80, 0x3F]), EncodedValue::Float(1.0));
        assert_eq!(encode(&EncodedValue::Double(0.0)), vec![0x11, 0x00]);
        assert_eq!(decode(&[0x11, 0x00]), EncodedValue::Double(0.0));
        let bytes = encode(&EncodedValue::Double(-2.5));
        assert_eq!(decode(&bytes), EncodedValue::Double(-2.5));
    }

    #[test]
    fn index_values_keep_their_raw_index() {
        let bytes = [0x37, 0x34, 0x12];
        let value = decode(&bytes);
        assert_eq!(value, EncodedValue::String(ItemRef::from_raw(0x1234)));
        assert_eq!(encode(&value), bytes);
    }

    #[test]
    fn booleans_null_and_bytes() {
        assert_eq!(decode(&[0x3F]), EncodedValue::Boolean(true));
        assert_eq!(encode(&EncodedValue::Boolean(false)), vec![0x1F]);
        assert_eq!(decode(&[0x1E]), EncodedValue::Null);
        assert_eq!(decode(&[0x00, 0x80]), EncodedValue::Byte(-128));
        assert!(EncodedValue::read(&mut BlockReader::new(&[0x05])).is_err());
    }

    #[test]
    fn annotation_refs_are_visited_in_write_order() {
        let annotation = EncodedAnnotation {
            type_ref: ItemRef::from_raw(1),
            elements: vec![
                AnnotationElement { name: ItemRef::from_raw(2), value: EncodedValue::Boolean(true) },
                AnnotationElement {
                    name: ItemRef::from_raw(3),
                    value: EncodedValue::Array(vec![EncodedValue::Enum(ItemRef::from_raw(4)), EncodedValue::Int(42)]),
                },
            ],
        };
        let mut seen = vec![];
        annotation.visit_refs(&mut |t, r| seen.push((t, r.raw())));
        assert_eq!(seen, vec![(tag::TYPE_ID, 1), (tag::STRING_ID, 2), (tag::STRING_ID, 3), (tag::FIELD_ID, 4)]);

        let mut bytes = vec![];
        annotation.write(&mut bytes);
        let back = EncodedAnnotation::read(&mut BlockReader::new(&bytes)).unwrap();
        assert_eq!(back, annotation);
    }
}
