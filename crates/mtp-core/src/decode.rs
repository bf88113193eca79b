//! Field decoders for PTP datasets.
//!
//! PTP datasets are sequences of little-endian fixed-width integers,
//! self-describing strings (one count byte, then two bytes per character)
//! and count-prefixed arrays (a `u32` element count, then the elements).
//! Every decoder takes a buffer and an offset and returns the decoded value
//! together with the number of bytes it consumed.
//!
//! Decoders fail only with [`Error::BufferTooShort`] when the buffer cannot
//! hold the declared field, or [`Error::UnknownDataType`] for an undeclared
//! property type.

use crate::codes::{DataType, ScalarType};
use crate::error::{Error, Result};

/// How string code units are turned into characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StringDecoding {
    /// Keep only the low byte of each 16-bit code unit.
    ///
    /// Matches what deployed hosts have always done, so device-reported names
    /// compare equal to existing records.
    #[default]
    Narrow,
    /// Decode code units as UTF-16. Unpaired surrogates become U+FFFD.
    Utf16,
}

/// Property value decoded according to its declared data type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyValue {
    /// INT8.
    Int8(i8),
    /// UINT8.
    UInt8(u8),
    /// INT16.
    Int16(i16),
    /// UINT16.
    UInt16(u16),
    /// INT32.
    Int32(i32),
    /// UINT32.
    UInt32(u32),
    /// INT64.
    Int64(i64),
    /// UINT64.
    UInt64(u64),
    /// INT128.
    Int128(i128),
    /// UINT128.
    UInt128(u128),
    /// STR.
    String(String),
    /// Any AINTxx / AUINTxx array.
    Array(Vec<PropertyValue>),
}

impl PropertyValue {
    /// Unsigned view of an integer value that fits in 64 bits.
    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            PropertyValue::UInt8(v) => Some(v as u64),
            PropertyValue::UInt16(v) => Some(v as u64),
            PropertyValue::UInt32(v) => Some(v as u64),
            PropertyValue::UInt64(v) => Some(v),
            PropertyValue::UInt128(v) => u64::try_from(v).ok(),
            PropertyValue::Int8(v) => u64::try_from(v).ok(),
            PropertyValue::Int16(v) => u64::try_from(v).ok(),
            PropertyValue::Int32(v) => u64::try_from(v).ok(),
            PropertyValue::Int64(v) => u64::try_from(v).ok(),
            PropertyValue::Int128(v) => u64::try_from(v).ok(),
            PropertyValue::String(_) | PropertyValue::Array(_) => None,
        }
    }

    /// String contents, if this is a string value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) => Some(s),
            _ => None,
        }
    }
}

/// Read a little-endian integer of `width` bytes (1, 2, 4 or 8) at `offset`.
///
/// Signed reads are sign-extended. Returns the value and the offset just past it.
pub fn fixed_width_read(
    buf: &[u8],
    offset: usize,
    width: usize,
    signed: bool,
) -> Result<(i128, usize)> {
    if !matches!(width, 1 | 2 | 4 | 8) {
        return Err(Error::UnsupportedWidth(width));
    }
    let field = field_at(buf, offset, width)?;
    let mut raw = [0u8; 8];
    raw[..width].copy_from_slice(field);
    let unsigned = u64::from_le_bytes(raw);
    let value = if signed {
        let shift = 64 - 8 * width as u32;
        (((unsigned << shift) as i64) >> shift) as i128
    } else {
        unsigned as i128
    };
    Ok((value, offset + width))
}

/// Read a PTP string at `offset`.
///
/// The first byte is the character count `N` (including any terminating NUL);
/// `2·N` bytes of code units follow. Decoding stops at the first NUL code
/// unit. Consumes `1 + 2·N` bytes.
pub fn string_read(buf: &[u8], offset: usize, mode: StringDecoding) -> Result<(String, usize)> {
    let count = *field_at(buf, offset, 1)?.first().unwrap_or(&0) as usize;
    if count == 0 {
        return Ok((String::new(), 1));
    }
    let units = field_at(buf, offset + 1, 2 * count)?
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .take_while(|&unit| unit != 0);

    let text = match mode {
        StringDecoding::Narrow => units.map(|unit| char::from(unit as u8)).collect(),
        StringDecoding::Utf16 => char::decode_utf16(units)
            .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
            .collect(),
    };
    Ok((text, 1 + 2 * count))
}

/// Read a count-prefixed array of unsigned `elem_width`-byte integers.
///
/// Consumes `4 + M·elem_width` bytes.
pub fn array_read(buf: &[u8], offset: usize, elem_width: usize) -> Result<(Vec<u64>, usize)> {
    if !matches!(elem_width, 1 | 2 | 4 | 8) {
        return Err(Error::UnsupportedWidth(elem_width));
    }
    let count = read_u32_le(field_at(buf, offset, 4)?) as usize;
    let body = field_at(buf, offset + 4, count.saturating_mul(elem_width))?;
    let values = body
        .chunks_exact(elem_width)
        .map(|chunk| {
            let mut raw = [0u8; 8];
            raw[..elem_width].copy_from_slice(chunk);
            u64::from_le_bytes(raw)
        })
        .collect();
    Ok((values, 4 + count * elem_width))
}

/// Read a property value whose wire type is `declared_type`.
pub fn property_value_read(
    buf: &[u8],
    offset: usize,
    declared_type: u16,
    mode: StringDecoding,
) -> Result<(PropertyValue, usize)> {
    match DataType::from_u16(declared_type).ok_or(Error::UnknownDataType(declared_type))? {
        DataType::Scalar(scalar) => scalar_read(buf, offset, scalar),
        DataType::String => {
            let (text, used) = string_read(buf, offset, mode)?;
            Ok((PropertyValue::String(text), used))
        }
        DataType::Array(scalar) => {
            let count = read_u32_le(field_at(buf, offset, 4)?) as usize;
            // Validate the whole body up front so a hostile count fails fast.
            field_at(buf, offset + 4, count.saturating_mul(scalar.width()))?;
            let mut items = Vec::with_capacity(count);
            let mut pos = offset + 4;
            for _ in 0..count {
                let (item, used) = scalar_read(buf, pos, scalar)?;
                items.push(item);
                pos += used;
            }
            Ok((PropertyValue::Array(items), pos - offset))
        }
    }
}

fn scalar_read(buf: &[u8], offset: usize, scalar: ScalarType) -> Result<(PropertyValue, usize)> {
    let width = scalar.width();
    let field = field_at(buf, offset, width)?;
    let value = match scalar {
        ScalarType::Int8 => PropertyValue::Int8(field[0] as i8),
        ScalarType::UInt8 => PropertyValue::UInt8(field[0]),
        ScalarType::Int16 => PropertyValue::Int16(read_u16_le(field) as i16),
        ScalarType::UInt16 => PropertyValue::UInt16(read_u16_le(field)),
        ScalarType::Int32 => PropertyValue::Int32(read_u32_le(field) as i32),
        ScalarType::UInt32 => PropertyValue::UInt32(read_u32_le(field)),
        ScalarType::Int64 => PropertyValue::Int64(read_u64_le(field) as i64),
        ScalarType::UInt64 => PropertyValue::UInt64(read_u64_le(field)),
        ScalarType::Int128 => PropertyValue::Int128(read_u128_le(field) as i128),
        ScalarType::UInt128 => PropertyValue::UInt128(read_u128_le(field)),
    };
    Ok((value, width))
}

/// Sequential reader over a dataset.
#[derive(Debug, Clone)]
pub struct FieldReader<'a> {
    buf: &'a [u8],
    pos: usize,
    mode: StringDecoding,
}

impl<'a> FieldReader<'a> {
    /// Reader positioned at the start of `buf`.
    pub fn new(buf: &'a [u8], mode: StringDecoding) -> Self {
        FieldReader { buf, pos: 0, mode }
    }

    /// Current offset.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left after the current offset.
    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    /// Move the cursor forward.
    pub fn skip(&mut self, n: usize) -> Result<()> {
        field_at(self.buf, self.pos, n)?;
        self.pos += n;
        Ok(())
    }

    /// `u8` field.
    pub fn u8(&mut self) -> Result<u8> {
        let (v, next) = fixed_width_read(self.buf, self.pos, 1, false)?;
        self.pos = next;
        Ok(v as u8)
    }

    /// `u16` field.
    pub fn u16(&mut self) -> Result<u16> {
        let (v, next) = fixed_width_read(self.buf, self.pos, 2, false)?;
        self.pos = next;
        Ok(v as u16)
    }

    /// `u32` field.
    pub fn u32(&mut self) -> Result<u32> {
        let (v, next) = fixed_width_read(self.buf, self.pos, 4, false)?;
        self.pos = next;
        Ok(v as u32)
    }

    /// `u64` field.
    pub fn u64(&mut self) -> Result<u64> {
        let (v, next) = fixed_width_read(self.buf, self.pos, 8, false)?;
        self.pos = next;
        Ok(v as u64)
    }

    /// String field.
    pub fn string(&mut self) -> Result<String> {
        let (text, used) = string_read(self.buf, self.pos, self.mode)?;
        self.pos += used;
        Ok(text)
    }

    /// String field, or empty if the dataset ends here.
    ///
    /// Several devices truncate trailing optional strings.
    pub fn optional_string(&mut self) -> Result<String> {
        if self.remaining() == 0 {
            return Ok(String::new());
        }
        self.string()
    }

    /// Array of `u16`.
    pub fn u16_array(&mut self) -> Result<Vec<u16>> {
        let (values, used) = array_read(self.buf, self.pos, 2)?;
        self.pos += used;
        Ok(values.into_iter().map(|v| v as u16).collect())
    }

    /// Array of `u32`.
    pub fn u32_array(&mut self) -> Result<Vec<u32>> {
        let (values, used) = array_read(self.buf, self.pos, 4)?;
        self.pos += used;
        Ok(values.into_iter().map(|v| v as u32).collect())
    }

    /// Property value of the declared wire type.
    pub fn value(&mut self, declared_type: u16) -> Result<PropertyValue> {
        let (value, used) = property_value_read(self.buf, self.pos, declared_type, self.mode)?;
        self.pos += used;
        Ok(value)
    }
}

fn field_at(buf: &[u8], offset: usize, width: usize) -> Result<&[u8]> {
    let end = offset.checked_add(width).ok_or(Error::BufferTooShort {
        needed: usize::MAX,
        available: buf.len().saturating_sub(offset),
    })?;
    if end > buf.len() {
        return Err(Error::BufferTooShort {
            needed: width,
            available: buf.len().saturating_sub(offset),
        });
    }
    Ok(&buf[offset..end])
}

#[inline]
pub(crate) fn check_len(data: &[u8], needed: usize) -> Result<()> {
    if data.len() < needed {
        Err(Error::BufferTooShort {
            needed,
            available: data.len(),
        })
    } else {
        Ok(())
    }
}

#[inline]
pub(crate) fn read_u16_le(data: &[u8]) -> u16 {
    u16::from_le_bytes([data[0], data[1]])
}

#[inline]
pub(crate) fn read_u32_le(data: &[u8]) -> u32 {
    u32::from_le_bytes([data[0], data[1], data[2], data[3]])
}

#[inline]
fn read_u64_le(data: &[u8]) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&data[..8]);
    u64::from_le_bytes(raw)
}

#[inline]
fn read_u128_le(data: &[u8]) -> u128 {
    let mut raw = [0u8; 16];
    raw.copy_from_slice(&data[..16]);
    u128::from_le_bytes(raw)
}
