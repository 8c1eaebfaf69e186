//! Encoding: wrapping values into envelopes, and assembling arbitrary messages.
//!
//! This is the inverse of decoding, for producers and for building test data. The envelope's
//! field numbers are re-exported here.

use crate::element::{serialize_elem, Element, WireValue};
pub use crate::envelope::{
    WRAPPED_BOOL, WRAPPED_BYTE, WRAPPED_BYTES, WRAPPED_CHAR, WRAPPED_DATE_MILLIS,
    WRAPPED_DESCRIPTOR_FULL_NAME, WRAPPED_DESCRIPTOR_ID, WRAPPED_DOUBLE, WRAPPED_EMPTY,
    WRAPPED_ENUM, WRAPPED_FIXED32, WRAPPED_FIXED64, WRAPPED_FLOAT, WRAPPED_INSTANT_NANOS,
    WRAPPED_INSTANT_SECONDS, WRAPPED_INT32, WRAPPED_INT64, WRAPPED_MESSAGE, WRAPPED_SFIXED32,
    WRAPPED_SFIXED64, WRAPPED_SHORT, WRAPPED_SINT32, WRAPPED_SINT64, WRAPPED_STRING,
    WRAPPED_UINT32, WRAPPED_UINT64,
};
use crate::scalar::Scalar;
use crate::varint::{zigzag_encode32, zigzag_encode64};

/// Builds one protobuf message, field by field, in the order the fields are written.
#[derive(Clone, Debug, Default)]
pub struct MessageWriter {
    buf: Vec<u8>,
}

impl MessageWriter {
    pub fn new() -> Self {
        Self::default()
    }

    fn elem(mut self, field: u32, value: WireValue) -> Self {
        serialize_elem(&mut self.buf, Element { field, value });
        self
    }

    pub fn varint(self, field: u32, v: u64) -> Self {
        self.elem(field, WireValue::Varint(v))
    }

    /// Negative values take the full ten bytes, as protobuf requires.
    pub fn int32(self, field: u32, v: i32) -> Self {
        self.varint(field, v as i64 as u64)
    }

    pub fn int64(self, field: u32, v: i64) -> Self {
        self.varint(field, v as u64)
    }

    pub fn uint32(self, field: u32, v: u32) -> Self {
        self.varint(field, v.into())
    }

    pub fn sint32(self, field: u32, v: i32) -> Self {
        self.varint(field, zigzag_encode32(v).into())
    }

    pub fn sint64(self, field: u32, v: i64) -> Self {
        self.varint(field, zigzag_encode64(v))
    }

    pub fn bool(self, field: u32, v: bool) -> Self {
        self.varint(field, v.into())
    }

    pub fn fixed32(self, field: u32, v: u32) -> Self {
        self.elem(field, WireValue::Fixed32(v))
    }

    pub fn fixed64(self, field: u32, v: u64) -> Self {
        self.elem(field, WireValue::Fixed64(v))
    }

    pub fn float(self, field: u32, v: f32) -> Self {
        self.fixed32(field, v.to_bits())
    }

    pub fn double(self, field: u32, v: f64) -> Self {
        self.fixed64(field, v.to_bits())
    }

    pub fn bytes(self, field: u32, v: &[u8]) -> Self {
        self.elem(field, WireValue::Len(v))
    }

    pub fn string(self, field: u32, v: &str) -> Self {
        self.bytes(field, v.as_bytes())
    }

    /// An embedded message, already encoded.
    pub fn message(self, field: u32, v: &[u8]) -> Self {
        self.bytes(field, v)
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// Wrap a scalar in an envelope.
///
/// Instants write their nanoseconds only when non-zero. Enums write their type name alongside the
/// number.
pub fn wrap_scalar(scalar: &Scalar) -> Vec<u8> {
    let w = MessageWriter::new();
    match scalar {
        Scalar::String(v) => w.string(WRAPPED_STRING, v),
        Scalar::Int32(v) => w.int32(WRAPPED_INT32, *v),
        Scalar::Int64(v) => w.int64(WRAPPED_INT64, *v),
        Scalar::UInt32(v) => w.uint32(WRAPPED_UINT32, *v),
        Scalar::UInt64(v) => w.varint(WRAPPED_UINT64, *v),
        Scalar::SInt32(v) => w.sint32(WRAPPED_SINT32, *v),
        Scalar::SInt64(v) => w.sint64(WRAPPED_SINT64, *v),
        Scalar::Fixed32(v) => w.fixed32(WRAPPED_FIXED32, *v),
        Scalar::Fixed64(v) => w.fixed64(WRAPPED_FIXED64, *v),
        Scalar::SFixed32(v) => w.fixed32(WRAPPED_SFIXED32, *v as u32),
        Scalar::SFixed64(v) => w.fixed64(WRAPPED_SFIXED64, *v as u64),
        Scalar::Double(v) => w.double(WRAPPED_DOUBLE, *v),
        Scalar::Float(v) => w.float(WRAPPED_FLOAT, *v),
        Scalar::Bool(v) => w.bool(WRAPPED_BOOL, *v),
        Scalar::Bytes(v) => w.bytes(WRAPPED_BYTES, v),
        Scalar::Char(v) => w.int32(WRAPPED_CHAR, *v as i32),
        Scalar::Short(v) => w.int32(WRAPPED_SHORT, (*v).into()),
        Scalar::Byte(v) => w.int32(WRAPPED_BYTE, (*v).into()),
        Scalar::DateMillis(t) => w.int64(WRAPPED_DATE_MILLIS, t.timestamp_millis()),
        Scalar::Instant(t) => {
            let w = w.int64(WRAPPED_INSTANT_SECONDS, t.timestamp_utc());
            match t.timestamp_subsec_nanos() {
                0 => w,
                nanos => w.int32(WRAPPED_INSTANT_NANOS, nanos as i32),
            }
        }
        Scalar::Enum { type_name, number } => w
            .string(WRAPPED_DESCRIPTOR_FULL_NAME, type_name)
            .int32(WRAPPED_ENUM, *number),
    }
    .finish()
}

/// The explicit empty marker.
pub fn wrap_empty() -> Vec<u8> {
    MessageWriter::new().bool(WRAPPED_EMPTY, true).finish()
}

/// Wrap an encoded nested message, identified by type id and/or type name.
pub fn wrap_message(type_id: Option<u32>, type_name: Option<&str>, bytes: &[u8]) -> Vec<u8> {
    let mut w = MessageWriter::new();
    if let Some(name) = type_name {
        w = w.string(WRAPPED_DESCRIPTOR_FULL_NAME, name);
    }
    if let Some(id) = type_id {
        w = w.uint32(WRAPPED_DESCRIPTOR_ID, id);
    }
    w.message(WRAPPED_MESSAGE, bytes).finish()
}
