//! The wrapped-value envelope: what a decode produces, and how the fixed envelope message is read
//! off the wire.

use tracing::debug;

use crate::element::{Parser, WireValue};
use crate::error::DecodeError;
use crate::scalar::Scalar;
use crate::timestamp::Timestamp;
use crate::value::Value;
use crate::varint::{zigzag_decode32, zigzag_decode64};

pub const WRAPPED_DOUBLE: u32 = 1;
pub const WRAPPED_FLOAT: u32 = 2;
pub const WRAPPED_INT64: u32 = 3;
pub const WRAPPED_UINT64: u32 = 4;
pub const WRAPPED_INT32: u32 = 5;
pub const WRAPPED_FIXED64: u32 = 6;
pub const WRAPPED_FIXED32: u32 = 7;
pub const WRAPPED_BOOL: u32 = 8;
pub const WRAPPED_STRING: u32 = 9;
pub const WRAPPED_BYTES: u32 = 10;
pub const WRAPPED_UINT32: u32 = 11;
pub const WRAPPED_SFIXED32: u32 = 12;
pub const WRAPPED_SFIXED64: u32 = 13;
pub const WRAPPED_SINT32: u32 = 14;
pub const WRAPPED_SINT64: u32 = 15;
pub const WRAPPED_DESCRIPTOR_FULL_NAME: u32 = 16;
pub const WRAPPED_MESSAGE: u32 = 17;
pub const WRAPPED_ENUM: u32 = 18;
pub const WRAPPED_DESCRIPTOR_ID: u32 = 19;
pub const WRAPPED_DATE_MILLIS: u32 = 20;
pub const WRAPPED_INSTANT_SECONDS: u32 = 21;
pub const WRAPPED_INSTANT_NANOS: u32 = 22;
pub const WRAPPED_EMPTY: u32 = 23;
pub const WRAPPED_CHAR: u32 = 24;
pub const WRAPPED_SHORT: u32 = 25;
pub const WRAPPED_BYTE: u32 = 26;

/// Type name used for nested messages that carry no name of their own.
pub const UNKNOWN_TYPE_NAME: &str = "Unknown";

/// The result of decoding one wrapped value.
#[derive(Clone, Debug, PartialEq)]
pub enum WrappedValue {
    /// The explicit empty marker.
    Empty,
    Scalar(Scalar),
    /// A nested message, identified by type id and/or type name.
    Message {
        type_id: Option<u32>,
        type_name: String,
        payload: Payload,
    },
    /// Nothing recognisable was in the envelope. `field` names the first unrecognised field, if
    /// there was one at all.
    Unknown { field: Option<String>, raw: Value },
}

/// What became of a nested message's bytes.
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    /// The nested bytes, exactly as they were in the envelope. Either the type couldn't be
    /// resolved, or nothing knows how to decode it.
    RawBytes(Vec<u8>),
    /// A decode hook turned the message into structured data.
    Decoded(BucketData),
}

/// Structured result of a decode hook.
#[derive(Clone, Debug, PartialEq)]
pub struct BucketData {
    pub type_name: String,
    /// Pre-rendered, human-readable form.
    pub display_value: String,
    pub native_value: Value,
}

impl WrappedValue {
    pub fn type_id(&self) -> Option<u32> {
        match self {
            WrappedValue::Message { type_id, .. } => *type_id,
            _ => None,
        }
    }

    pub fn as_scalar(&self) -> Option<&Scalar> {
        if let WrappedValue::Scalar(s) = self {
            Some(s)
        } else {
            None
        }
    }

    pub fn as_bucket(&self) -> Option<&BucketData> {
        match self {
            WrappedValue::Message {
                payload: Payload::Decoded(data),
                ..
            } => Some(data),
            _ => None,
        }
    }

    pub fn raw_bytes(&self) -> Option<&[u8]> {
        match self {
            WrappedValue::Message {
                payload: Payload::RawBytes(raw),
                ..
            } => Some(raw),
            _ => None,
        }
    }

    /// Unwrap into a plain value. Undecoded messages become their raw bytes.
    pub fn into_native(self) -> Value {
        match self {
            WrappedValue::Empty => Value::Null,
            WrappedValue::Scalar(s) => s.into_value(),
            WrappedValue::Message {
                payload: Payload::Decoded(data),
                ..
            } => data.native_value,
            WrappedValue::Message {
                payload: Payload::RawBytes(raw),
                ..
            } => Value::Bin(raw),
            WrappedValue::Unknown { raw, .. } => raw,
        }
    }
}

/// The one-of member an envelope carried. Members that need a companion field to become a value
/// are held back until the whole envelope has been read.
#[derive(Clone, Debug, PartialEq)]
enum OneOf<'a> {
    Empty,
    Scalar(Scalar),
    Enum(i32),
    InstantSeconds(i64),
    Message(&'a [u8]),
}

/// An envelope after classification, before any type resolution.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Classified<'a> {
    Value(WrappedValue),
    Enum {
        type_id: Option<u32>,
        type_name: Option<String>,
        number: i32,
    },
    Nested {
        type_id: Option<u32>,
        type_name: Option<String>,
        bytes: &'a [u8],
    },
}

/// The fields of one envelope, read off the wire.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct Envelope<'a> {
    value: Option<OneOf<'a>>,
    type_name: Option<String>,
    type_id: Option<u32>,
    instant_nanos: Option<i32>,
    unknown: Option<(u32, WireValue<'a>)>,
}

fn lossy_string(v: &[u8]) -> String {
    String::from_utf8_lossy(v).into_owned()
}

impl<'a> Envelope<'a> {
    /// Read an envelope. Fails only if the bytes aren't a well-formed message, or a known field is
    /// carried with the wrong wire type.
    pub fn parse(bytes: &'a [u8]) -> Result<Self, DecodeError> {
        let mut env = Envelope::default();
        for elem in Parser::new(bytes) {
            let elem = elem?;
            let (f, v) = (elem.field, elem.value);
            let one_of = match f {
                WRAPPED_DOUBLE => OneOf::Scalar(Scalar::Double(f64::from_bits(v.fixed64(f)?))),
                WRAPPED_FLOAT => OneOf::Scalar(Scalar::Float(f32::from_bits(v.fixed32(f)?))),
                WRAPPED_INT64 => OneOf::Scalar(Scalar::Int64(v.varint(f)? as i64)),
                WRAPPED_UINT64 => OneOf::Scalar(Scalar::UInt64(v.varint(f)?)),
                WRAPPED_INT32 => OneOf::Scalar(Scalar::Int32(v.varint(f)? as i32)),
                WRAPPED_FIXED64 => OneOf::Scalar(Scalar::Fixed64(v.fixed64(f)?)),
                WRAPPED_FIXED32 => OneOf::Scalar(Scalar::Fixed32(v.fixed32(f)?)),
                WRAPPED_BOOL => OneOf::Scalar(Scalar::Bool(v.varint(f)? != 0)),
                WRAPPED_STRING => OneOf::Scalar(Scalar::String(lossy_string(v.len_delimited(f)?))),
                WRAPPED_BYTES => OneOf::Scalar(Scalar::Bytes(v.len_delimited(f)?.to_vec())),
                WRAPPED_UINT32 => OneOf::Scalar(Scalar::UInt32(v.varint(f)? as u32)),
                WRAPPED_SFIXED32 => OneOf::Scalar(Scalar::SFixed32(v.fixed32(f)? as i32)),
                WRAPPED_SFIXED64 => OneOf::Scalar(Scalar::SFixed64(v.fixed64(f)? as i64)),
                WRAPPED_SINT32 => {
                    OneOf::Scalar(Scalar::SInt32(zigzag_decode32(v.varint(f)? as u32)))
                }
                WRAPPED_SINT64 => OneOf::Scalar(Scalar::SInt64(zigzag_decode64(v.varint(f)?))),
                WRAPPED_MESSAGE => OneOf::Message(v.len_delimited(f)?),
                WRAPPED_ENUM => OneOf::Enum(v.varint(f)? as i32),
                WRAPPED_DATE_MILLIS => {
                    OneOf::Scalar(Scalar::DateMillis(Timestamp::from_millis(v.varint(f)? as i64)))
                }
                WRAPPED_INSTANT_SECONDS => OneOf::InstantSeconds(v.varint(f)? as i64),
                WRAPPED_EMPTY => {
                    v.varint(f)?;
                    OneOf::Empty
                }
                WRAPPED_CHAR => {
                    let c = char::from_u32(v.varint(f)? as u32)
                        .unwrap_or(char::REPLACEMENT_CHARACTER);
                    OneOf::Scalar(Scalar::Char(c))
                }
                WRAPPED_SHORT => OneOf::Scalar(Scalar::Short(v.varint(f)? as i16)),
                WRAPPED_BYTE => OneOf::Scalar(Scalar::Byte(v.varint(f)? as i8)),
                WRAPPED_DESCRIPTOR_FULL_NAME => {
                    env.type_name = Some(lossy_string(v.len_delimited(f)?));
                    continue;
                }
                WRAPPED_DESCRIPTOR_ID => {
                    env.type_id = Some(v.varint(f)? as u32);
                    continue;
                }
                WRAPPED_INSTANT_NANOS => {
                    env.instant_nanos = Some(v.varint(f)? as i32);
                    continue;
                }
                _ => {
                    if env.unknown.is_none() {
                        env.unknown = Some((f, v));
                    }
                    continue;
                }
            };
            env.value = Some(one_of);
        }
        Ok(env)
    }

    /// Decide what the envelope holds. Envelopes without any one-of member go down a degraded
    /// path that recovers what it can from companion and unknown fields.
    pub fn classify(self) -> Classified<'a> {
        let Envelope {
            value,
            type_name,
            type_id,
            instant_nanos,
            unknown,
        } = self;
        match value {
            Some(OneOf::Empty) => Classified::Value(WrappedValue::Empty),
            Some(OneOf::Scalar(s)) => Classified::Value(WrappedValue::Scalar(s)),
            Some(OneOf::InstantSeconds(sec)) => Classified::Value(WrappedValue::Scalar(
                Scalar::Instant(Timestamp::from_utc(sec, instant_nanos.unwrap_or(0).into())),
            )),
            Some(OneOf::Enum(number)) => Classified::Enum {
                type_id,
                type_name,
                number,
            },
            Some(OneOf::Message(bytes)) => Classified::Nested {
                type_id,
                type_name,
                bytes,
            },
            None if type_id.is_some() || type_name.is_some() => {
                debug!(?type_id, ?type_name, "envelope names a type but has no payload");
                Classified::Nested {
                    type_id,
                    type_name,
                    bytes: &[],
                }
            }
            None => {
                if let Some(nanos) = instant_nanos {
                    debug!(nanos, "envelope has instant nanos with no seconds");
                    return Classified::Value(WrappedValue::Scalar(Scalar::Instant(
                        Timestamp::from_utc(0, nanos.into()),
                    )));
                }
                let unknown = match unknown {
                    Some((field, wire)) => {
                        debug!(field, "envelope has only unrecognised fields");
                        let raw = match wire {
                            WireValue::Varint(v) | WireValue::Fixed64(v) => Value::UInt(v),
                            WireValue::Fixed32(v) => Value::UInt(v.into()),
                            WireValue::Len(v) => Value::Bin(v.to_vec()),
                        };
                        WrappedValue::Unknown {
                            field: Some(format!("field{}", field)),
                            raw,
                        }
                    }
                    None => WrappedValue::Unknown {
                        field: None,
                        raw: Value::Null,
                    },
                };
                Classified::Value(unknown)
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::element::{serialize_elem, Element};

    fn enc(elems: &[(u32, WireValue)]) -> Vec<u8> {
        let mut buf = Vec::new();
        for (field, value) in elems {
            serialize_elem(
                &mut buf,
                Element {
                    field: *field,
                    value: *value,
                },
            );
        }
        buf
    }

    fn classify(buf: &[u8]) -> Classified {
        Envelope::parse(buf).unwrap().classify()
    }

    #[test]
    fn string() {
        let buf = enc(&[(WRAPPED_STRING, WireValue::Len(b"hello"))]);
        assert_eq!(
            classify(&buf),
            Classified::Value(WrappedValue::Scalar(Scalar::String("hello".into())))
        );
    }

    #[test]
    fn negative_int32_uses_ten_bytes() {
        let buf = enc(&[(WRAPPED_INT32, WireValue::Varint(-5i64 as u64))]);
        assert_eq!(buf.len(), 11);
        assert_eq!(
            classify(&buf),
            Classified::Value(WrappedValue::Scalar(Scalar::Int32(-5)))
        );
    }

    #[test]
    fn last_one_of_member_wins() {
        let buf = enc(&[
            (WRAPPED_STRING, WireValue::Len(b"first")),
            (WRAPPED_BOOL, WireValue::Varint(1)),
        ]);
        assert_eq!(
            classify(&buf),
            Classified::Value(WrappedValue::Scalar(Scalar::Bool(true)))
        );
    }

    #[test]
    fn wrong_wire_type_is_malformed() {
        let buf = enc(&[(WRAPPED_STRING, WireValue::Varint(3))]);
        assert!(matches!(
            Envelope::parse(&buf),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn char_short_byte_conversions() {
        let buf = enc(&[(WRAPPED_CHAR, WireValue::Varint('Ω' as u64))]);
        assert_eq!(
            classify(&buf),
            Classified::Value(WrappedValue::Scalar(Scalar::Char('Ω')))
        );
        let buf = enc(&[(WRAPPED_CHAR, WireValue::Varint(0xD800))]);
        assert_eq!(
            classify(&buf),
            Classified::Value(WrappedValue::Scalar(Scalar::Char(char::REPLACEMENT_CHARACTER)))
        );
        let buf = enc(&[(WRAPPED_SHORT, WireValue::Varint(-2i64 as u64))]);
        assert_eq!(
            classify(&buf),
            Classified::Value(WrappedValue::Scalar(Scalar::Short(-2)))
        );
        let buf = enc(&[(WRAPPED_BYTE, WireValue::Varint(0xff))]);
        assert_eq!(
            classify(&buf),
            Classified::Value(WrappedValue::Scalar(Scalar::Byte(-1)))
        );
    }

    #[test]
    fn instant_uses_nanos_companion() {
        let buf = enc(&[
            (WRAPPED_INSTANT_NANOS, WireValue::Varint(500)),
            (WRAPPED_INSTANT_SECONDS, WireValue::Varint(60)),
        ]);
        match classify(&buf) {
            Classified::Value(WrappedValue::Scalar(Scalar::Instant(t))) => {
                assert_eq!(t.timestamp_utc(), 60);
                assert_eq!(t.timestamp_subsec_nanos(), 500);
                assert_eq!(t.iso8601(), "1970-01-01T00:01:00.000000500Z");
            }
            other => panic!("expected instant, got {:?}", other),
        }
    }

    #[test]
    fn date_millis_rendered_at_decode() {
        let buf = enc(&[(WRAPPED_DATE_MILLIS, WireValue::Varint(1_000))]);
        match classify(&buf) {
            Classified::Value(WrappedValue::Scalar(Scalar::DateMillis(t))) => {
                assert_eq!(t.iso8601(), "1970-01-01T00:00:01.000Z")
            }
            other => panic!("expected date, got {:?}", other),
        }
    }

    #[test]
    fn nested_message() {
        let buf = enc(&[
            (WRAPPED_DESCRIPTOR_ID, WireValue::Varint(42)),
            (WRAPPED_MESSAGE, WireValue::Len(&[0x08, 0x01])),
        ]);
        assert_eq!(
            classify(&buf),
            Classified::Nested {
                type_id: Some(42),
                type_name: None,
                bytes: &[0x08, 0x01],
            }
        );
    }

    #[test]
    fn enum_keeps_type_name() {
        let buf = enc(&[
            (WRAPPED_DESCRIPTOR_FULL_NAME, WireValue::Len(b"pkg.Color")),
            (WRAPPED_ENUM, WireValue::Varint(2)),
        ]);
        assert_eq!(
            classify(&buf),
            Classified::Enum {
                type_id: None,
                type_name: Some("pkg.Color".into()),
                number: 2,
            }
        );
    }

    mod degraded {
        use super::*;

        #[test]
        fn type_id_without_payload() {
            let buf = enc(&[(WRAPPED_DESCRIPTOR_ID, WireValue::Varint(7))]);
            assert_eq!(
                classify(&buf),
                Classified::Nested {
                    type_id: Some(7),
                    type_name: None,
                    bytes: &[],
                }
            );
        }

        #[test]
        fn nanos_without_seconds() {
            let buf = enc(&[(WRAPPED_INSTANT_NANOS, WireValue::Varint(9))]);
            match classify(&buf) {
                Classified::Value(WrappedValue::Scalar(Scalar::Instant(t))) => {
                    assert_eq!(t.timestamp_utc(), 0);
                    assert_eq!(t.timestamp_subsec_nanos(), 9);
                }
                other => panic!("expected instant, got {:?}", other),
            }
        }

        #[test]
        fn unknown_field() {
            let buf = enc(&[
                (99, WireValue::Len(b"??")),
                (100, WireValue::Varint(1)),
            ]);
            assert_eq!(
                classify(&buf),
                Classified::Value(WrappedValue::Unknown {
                    field: Some("field99".into()),
                    raw: Value::Bin(b"??".to_vec()),
                })
            );
        }

        #[test]
        fn empty_buffer() {
            assert_eq!(
                classify(&[]),
                Classified::Value(WrappedValue::Unknown {
                    field: None,
                    raw: Value::Null,
                })
            );
        }
    }
}
