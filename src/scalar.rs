use std::fmt;

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::timestamp::Timestamp;
use crate::value::Value;

/// The scalar kinds a wrapped value can carry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    String,
    Int32,
    Int64,
    UInt32,
    UInt64,
    SInt32,
    SInt64,
    Fixed32,
    Fixed64,
    SFixed32,
    SFixed64,
    Double,
    Float,
    Bool,
    Bytes,
    Char,
    Short,
    Byte,
    DateMillis,
    Instant,
    Enum,
}

impl ScalarKind {
    pub fn name(&self) -> &'static str {
        use self::ScalarKind::*;
        match self {
            String => "string",
            Int32 => "int32",
            Int64 => "int64",
            UInt32 => "uint32",
            UInt64 => "uint64",
            SInt32 => "sint32",
            SInt64 => "sint64",
            Fixed32 => "fixed32",
            Fixed64 => "fixed64",
            SFixed32 => "sfixed32",
            SFixed64 => "sfixed64",
            Double => "double",
            Float => "float",
            Bool => "bool",
            Bytes => "bytes",
            Char => "char",
            Short => "short",
            Byte => "byte",
            DateMillis => "dateMillis",
            Instant => "instant",
            Enum => "enum",
        }
    }
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A decoded scalar, tagged with the kind it was wrapped as.
///
/// Kinds that share a Rust type (`Int32`, `SInt32` and `SFixed32`, for instance) stay distinct so
/// a value can be re-wrapped exactly as it arrived.
#[derive(Clone, Debug, PartialEq)]
pub enum Scalar {
    String(String),
    Int32(i32),
    Int64(i64),
    UInt32(u32),
    UInt64(u64),
    SInt32(i32),
    SInt64(i64),
    Fixed32(u32),
    Fixed64(u64),
    SFixed32(i32),
    SFixed64(i64),
    Double(f64),
    Float(f32),
    Bool(bool),
    Bytes(Vec<u8>),
    Char(char),
    Short(i16),
    Byte(i8),
    DateMillis(Timestamp),
    Instant(Timestamp),
    Enum { type_name: String, number: i32 },
}

impl Scalar {
    pub fn kind(&self) -> ScalarKind {
        match self {
            Scalar::String(_) => ScalarKind::String,
            Scalar::Int32(_) => ScalarKind::Int32,
            Scalar::Int64(_) => ScalarKind::Int64,
            Scalar::UInt32(_) => ScalarKind::UInt32,
            Scalar::UInt64(_) => ScalarKind::UInt64,
            Scalar::SInt32(_) => ScalarKind::SInt32,
            Scalar::SInt64(_) => ScalarKind::SInt64,
            Scalar::Fixed32(_) => ScalarKind::Fixed32,
            Scalar::Fixed64(_) => ScalarKind::Fixed64,
            Scalar::SFixed32(_) => ScalarKind::SFixed32,
            Scalar::SFixed64(_) => ScalarKind::SFixed64,
            Scalar::Double(_) => ScalarKind::Double,
            Scalar::Float(_) => ScalarKind::Float,
            Scalar::Bool(_) => ScalarKind::Bool,
            Scalar::Bytes(_) => ScalarKind::Bytes,
            Scalar::Char(_) => ScalarKind::Char,
            Scalar::Short(_) => ScalarKind::Short,
            Scalar::Byte(_) => ScalarKind::Byte,
            Scalar::DateMillis(_) => ScalarKind::DateMillis,
            Scalar::Instant(_) => ScalarKind::Instant,
            Scalar::Enum { .. } => ScalarKind::Enum,
        }
    }

    /// Unwrap into a plain value, forgetting the wire kind.
    pub fn into_value(self) -> Value {
        match self {
            Scalar::String(v) => Value::Str(v),
            Scalar::Int32(v) | Scalar::SInt32(v) | Scalar::SFixed32(v) => Value::Int(v.into()),
            Scalar::Int64(v) | Scalar::SInt64(v) | Scalar::SFixed64(v) => Value::Int(v),
            Scalar::UInt32(v) | Scalar::Fixed32(v) => Value::UInt(v.into()),
            Scalar::UInt64(v) | Scalar::Fixed64(v) => Value::UInt(v),
            Scalar::Double(v) => Value::F64(v),
            Scalar::Float(v) => Value::F32(v),
            Scalar::Bool(v) => Value::Bool(v),
            Scalar::Bytes(v) => Value::Bin(v),
            Scalar::Char(v) => Value::Char(v),
            Scalar::Short(v) => Value::Int(v.into()),
            Scalar::Byte(v) => Value::Int(v.into()),
            Scalar::DateMillis(v) | Scalar::Instant(v) => Value::Timestamp(v),
            Scalar::Enum { type_name, number } => Value::Enum(format!("{}({})", type_name, number)),
        }
    }
}

/// Renders the primitive directly: numbers and strings as-is, bytes as standard base64, dates and
/// instants as ISO-8601, enums as `TypeName(number)`.
impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Scalar::String(v) => f.write_str(v),
            Scalar::Int32(v) | Scalar::SInt32(v) | Scalar::SFixed32(v) => write!(f, "{}", v),
            Scalar::Int64(v) | Scalar::SInt64(v) | Scalar::SFixed64(v) => write!(f, "{}", v),
            Scalar::UInt32(v) | Scalar::Fixed32(v) => write!(f, "{}", v),
            Scalar::UInt64(v) | Scalar::Fixed64(v) => write!(f, "{}", v),
            Scalar::Double(v) => write!(f, "{}", v),
            Scalar::Float(v) => write!(f, "{}", v),
            Scalar::Bool(v) => write!(f, "{}", v),
            Scalar::Bytes(v) => f.write_str(&STANDARD.encode(v)),
            Scalar::Char(v) => write!(f, "{}", v),
            Scalar::Short(v) => write!(f, "{}", v),
            Scalar::Byte(v) => write!(f, "{}", v),
            Scalar::DateMillis(v) | Scalar::Instant(v) => f.write_str(v.iso8601()),
            Scalar::Enum { type_name, number } => write!(f, "{}({})", type_name, number),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn kinds_unwrap_to_plain_values() {
        assert_eq!(Scalar::SInt32(-4).into_value(), Value::Int(-4));
        assert_eq!(Scalar::Fixed32(4).into_value(), Value::UInt(4));
        assert_eq!(Scalar::Short(-300).into_value(), Value::Int(-300));
        assert_eq!(Scalar::Char('é').into_value(), Value::Char('é'));
        assert_eq!(
            Scalar::Enum {
                type_name: "Color".into(),
                number: 2
            }
            .into_value(),
            Value::Enum("Color(2)".into())
        );
    }

    #[test]
    fn display() {
        assert_eq!(Scalar::String("hello".into()).to_string(), "hello");
        assert_eq!(Scalar::Bytes(b"hi".to_vec()).to_string(), "aGk=");
        assert_eq!(Scalar::Double(0.25).to_string(), "0.25");
        assert_eq!(Scalar::Bool(false).to_string(), "false");
        assert_eq!(
            Scalar::DateMillis(Timestamp::from_millis(0)).to_string(),
            "1970-01-01T00:00:00.000Z"
        );
        assert_eq!(ScalarKind::SFixed64.to_string(), "sfixed64");
    }
}
