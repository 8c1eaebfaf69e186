use byteorder::{LittleEndian, ReadBytesExt};

use crate::error::DecodeError;
use crate::varint::VarInt;

pub const WIRE_VARINT: u8 = 0;
pub const WIRE_FIXED64: u8 = 1;
pub const WIRE_LEN: u8 = 2;
pub const WIRE_START_GROUP: u8 = 3;
pub const WIRE_END_GROUP: u8 = 4;
pub const WIRE_FIXED32: u8 = 5;

/// Largest field number protobuf allows.
pub const MAX_FIELD_NUMBER: u32 = (1 << 29) - 1;

/// One raw value off the wire. Length-delimited values borrow from the parsed buffer.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum WireValue<'a> {
    Varint(u64),
    Fixed64(u64),
    Len(&'a [u8]),
    Fixed32(u32),
}

impl<'a> WireValue<'a> {
    pub fn wire_type(&self) -> u8 {
        match self {
            WireValue::Varint(_) => WIRE_VARINT,
            WireValue::Fixed64(_) => WIRE_FIXED64,
            WireValue::Len(_) => WIRE_LEN,
            WireValue::Fixed32(_) => WIRE_FIXED32,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            WireValue::Varint(_) => "varint",
            WireValue::Fixed64(_) => "fixed64",
            WireValue::Len(_) => "length-delimited",
            WireValue::Fixed32(_) => "fixed32",
        }
    }

    fn mismatch(&self, field: u32, expected: &str) -> DecodeError {
        DecodeError::malformed(format!(
            "field {}: expected {} value, got {}",
            field,
            expected,
            self.name()
        ))
    }

    pub fn varint(self, field: u32) -> Result<u64, DecodeError> {
        match self {
            WireValue::Varint(v) => Ok(v),
            other => Err(other.mismatch(field, "varint")),
        }
    }

    pub fn fixed64(self, field: u32) -> Result<u64, DecodeError> {
        match self {
            WireValue::Fixed64(v) => Ok(v),
            other => Err(other.mismatch(field, "fixed64")),
        }
    }

    pub fn fixed32(self, field: u32) -> Result<u32, DecodeError> {
        match self {
            WireValue::Fixed32(v) => Ok(v),
            other => Err(other.mismatch(field, "fixed32")),
        }
    }

    pub fn len_delimited(self, field: u32) -> Result<&'a [u8], DecodeError> {
        match self {
            WireValue::Len(v) => Ok(v),
            other => Err(other.mismatch(field, "length-delimited")),
        }
    }
}

/// A field number paired with its raw value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Element<'a> {
    pub field: u32,
    pub value: WireValue<'a>,
}

/// Serialize an element onto a byte vector.
pub fn serialize_elem(buf: &mut Vec<u8>, elem: Element) {
    let key = ((elem.field as u64) << 3) | elem.value.wire_type() as u64;
    VarInt(key).write(buf);
    match elem.value {
        WireValue::Varint(v) => VarInt(v).write(buf),
        WireValue::Fixed64(v) => buf.extend_from_slice(&v.to_le_bytes()),
        WireValue::Fixed32(v) => buf.extend_from_slice(&v.to_le_bytes()),
        WireValue::Len(v) => {
            let len = VarInt(v.len() as u64);
            buf.reserve(len.encoded_len() + v.len());
            len.write(buf);
            buf.extend_from_slice(v);
        }
    }
}

/// Iterator over the elements of one message. Once an element fails to parse, the parser stops
/// yielding anything further.
pub struct Parser<'a> {
    data: &'a [u8],
    errored: bool,
}

impl<'a> Parser<'a> {
    pub fn new(data: &'a [u8]) -> Parser<'a> {
        Self {
            data,
            errored: false,
        }
    }

    fn parse_element(&mut self) -> Result<Element<'a>, DecodeError> {
        let key = VarInt::read(&mut self.data)?.0;
        let wire_type = (key & 0x7) as u8;
        let field = key >> 3;
        if field == 0 || field > MAX_FIELD_NUMBER as u64 {
            return Err(DecodeError::malformed(format!(
                "invalid field number {}",
                field
            )));
        }
        let field = field as u32;
        let left = self.data.len();
        let value = match wire_type {
            WIRE_VARINT => WireValue::Varint(VarInt::read(&mut self.data)?.0),
            WIRE_FIXED64 => {
                let v = self.data.read_u64::<LittleEndian>().map_err(|_| {
                    DecodeError::malformed(format!(
                        "field {}: expected 8 bytes of fixed64, got {}",
                        field, left
                    ))
                })?;
                WireValue::Fixed64(v)
            }
            WIRE_FIXED32 => {
                let v = self.data.read_u32::<LittleEndian>().map_err(|_| {
                    DecodeError::malformed(format!(
                        "field {}: expected 4 bytes of fixed32, got {}",
                        field, left
                    ))
                })?;
                WireValue::Fixed32(v)
            }
            WIRE_LEN => {
                let len = VarInt::read(&mut self.data)?.0;
                if len > self.data.len() as u64 {
                    return Err(DecodeError::malformed(format!(
                        "field {}: length {} runs past the end of the data ({} bytes left)",
                        field,
                        len,
                        self.data.len()
                    )));
                }
                let (v, rem) = self.data.split_at(len as usize);
                self.data = rem;
                WireValue::Len(v)
            }
            WIRE_START_GROUP | WIRE_END_GROUP => {
                return Err(DecodeError::malformed(format!(
                    "field {}: groups are not supported",
                    field
                )))
            }
            _ => {
                return Err(DecodeError::malformed(format!(
                    "field {}: reserved wire type {}",
                    field, wire_type
                )))
            }
        };
        Ok(Element { field, value })
    }
}

impl<'a> Iterator for Parser<'a> {
    type Item = Result<Element<'a>, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.data.is_empty() || self.errored {
            return None;
        }
        let result = self.parse_element();
        if result.is_err() {
            self.errored = true;
        }
        Some(result)
    }
}
