//! Display rendering of decoded values.

use std::panic::{catch_unwind, AssertUnwindSafe};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::json;
use tracing::warn;

use crate::dispatch::TypeTable;
use crate::envelope::{Payload, WrappedValue, UNKNOWN_TYPE_NAME};

/// Render a decoded value as text. Never fails, and the same value always renders the same way.
///
/// In order of preference: the type's format hook, the display value a decode hook produced, the
/// scalar itself, `(empty)` for the empty marker, and finally a pretty-printed JSON object
/// describing whatever couldn't be decoded.
pub fn format(value: &WrappedValue, table: &TypeTable) -> String {
    if let Some(text) = run_format_hook(value, table) {
        return text;
    }
    match value {
        WrappedValue::Message {
            payload: Payload::Decoded(data),
            ..
        } => data.display_value.clone(),
        WrappedValue::Scalar(scalar) => scalar.to_string(),
        WrappedValue::Empty => "(empty)".to_string(),
        WrappedValue::Message {
            type_id,
            type_name,
            payload: Payload::RawBytes(raw),
        } => {
            let note = match type_id {
                None => "nested message carries no type id",
                Some(id) if table.resolve(*id).is_none() => "type id is not registered",
                Some(_) => "nested message was not decoded",
            };
            pretty(json!({
                "typeName": type_name,
                "typeId": type_id,
                "note": note,
                "raw": STANDARD.encode(raw),
            }))
        }
        WrappedValue::Unknown { field, raw } => pretty(json!({
            "typeName": UNKNOWN_TYPE_NAME,
            "typeId": null,
            "note": "envelope carries no recognised value",
            "field": field,
            "value": serde_json::Value::from(raw),
        })),
    }
}

fn run_format_hook(value: &WrappedValue, table: &TypeTable) -> Option<String> {
    let type_id = value.type_id()?;
    let hook = table.resolve(type_id)?.format_hook()?;
    match catch_unwind(AssertUnwindSafe(|| hook.format(value))) {
        Ok(text) => text,
        Err(_) => {
            warn!(type_id, "format hook panicked, using default rendering");
            None
        }
    }
}

fn pretty(obj: serde_json::Value) -> String {
    serde_json::to_string_pretty(&obj).unwrap_or_else(|_| obj.to_string())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dispatch::TypeEntry;
    use crate::envelope::BucketData;
    use crate::scalar::Scalar;
    use crate::timestamp::Timestamp;
    use crate::value::Value;

    fn message(type_id: Option<u32>, payload: Payload) -> WrappedValue {
        WrappedValue::Message {
            type_id,
            type_name: "pkg.Thing".into(),
            payload,
        }
    }

    #[test]
    fn scalars() {
        let table = TypeTable::default();
        let cases = [
            (Scalar::String("hello".into()), "hello"),
            (Scalar::SInt64(-12), "-12"),
            (Scalar::Float(1.5), "1.5"),
            (Scalar::Bytes(vec![0xff, 0x00]), "/wA="),
            (Scalar::Char('x'), "x"),
            (
                Scalar::Enum {
                    type_name: "Color".into(),
                    number: 3,
                },
                "Color(3)",
            ),
            (
                Scalar::Instant(Timestamp::from_utc(1, 5_000_000)),
                "1970-01-01T00:00:01.005Z",
            ),
        ];
        for (scalar, expected) in cases {
            assert_eq!(format(&WrappedValue::Scalar(scalar), &table), expected);
        }
        assert_eq!(format(&WrappedValue::Empty, &table), "(empty)");
    }

    #[test]
    fn decoded_uses_display_value() {
        let table = TypeTable::default();
        let value = message(
            Some(5),
            Payload::Decoded(BucketData {
                type_name: "Thing".into(),
                display_value: "Set(0) {}".into(),
                native_value: Value::Set(Vec::new()),
            }),
        );
        assert_eq!(format(&value, &table), "Set(0) {}");
    }

    #[test]
    fn raw_fallback() {
        let table = TypeTable::builder()
            .add(TypeEntry::new(5, "p.proto", "pkg.Thing"))
            .build();
        let text = format(&message(Some(9), Payload::RawBytes(vec![1, 2, 3])), &table);
        assert_eq!(
            text,
            concat!(
                "{\n",
                "  \"typeName\": \"pkg.Thing\",\n",
                "  \"typeId\": 9,\n",
                "  \"note\": \"type id is not registered\",\n",
                "  \"raw\": \"AQID\"\n",
                "}"
            )
        );
        let text = format(&message(Some(5), Payload::RawBytes(Vec::new())), &table);
        assert!(text.contains("\"note\": \"nested message was not decoded\""));
        let text = format(&message(None, Payload::RawBytes(Vec::new())), &table);
        assert!(text.contains("\"typeId\": null"));
    }

    #[test]
    fn unknown_fallback() {
        let table = TypeTable::default();
        let value = WrappedValue::Unknown {
            field: Some("field99".into()),
            raw: Value::UInt(7),
        };
        let text = format(&value, &table);
        let json: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(json["field"], "field99");
        assert_eq!(json["value"], 7);
        assert_eq!(json["typeName"], "Unknown");
    }

    #[test]
    fn format_hooks() {
        let table = TypeTable::builder()
            .add(
                TypeEntry::new(1, "p.proto", "pkg.Thing")
                    .with_format_hook(|_: &WrappedValue| Some("custom".to_string())),
            )
            .add(
                TypeEntry::new(2, "p.proto", "pkg.Thing")
                    .with_format_hook(|_: &WrappedValue| -> Option<String> { None }),
            )
            .add(
                TypeEntry::new(3, "p.proto", "pkg.Thing")
                    .with_format_hook(|_: &WrappedValue| -> Option<String> { panic!("boom") }),
            )
            .build();
        let decoded = |id| {
            message(
                Some(id),
                Payload::Decoded(BucketData {
                    type_name: "Thing".into(),
                    display_value: "default".into(),
                    native_value: Value::Null,
                }),
            )
        };
        assert_eq!(format(&decoded(1), &table), "custom");
        assert_eq!(format(&decoded(2), &table), "default");
        assert_eq!(format(&decoded(3), &table), "default");
    }

    #[test]
    fn deterministic() {
        let table = TypeTable::standard();
        let value = message(Some(5305), Payload::RawBytes(vec![9; 20]));
        assert_eq!(format(&value, &table), format(&value, &table));
    }
}
