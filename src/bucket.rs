//! Decode hooks for container types whose elements are further wrapped values.

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::dispatch::{CollectionKind, DecodeHook, HookContext};
use crate::envelope::BucketData;
use crate::error::DecodeError;
use crate::schema::{FieldMap, FieldValue};
use crate::value::Value;

#[derive(Clone, Debug)]
enum Layout {
    Single(Vec<String>),
    Pair { key: Vec<String>, value: Vec<String> },
}

/// Generic hook for containers of wrapped values.
///
/// The container's elements are the occurrences of one repeated message field. Inside each
/// element, a path of zero or more message fields leads to the embedded envelope. For maps, a key
/// path and a value path lead to two envelopes. Each envelope is decoded with the engine, and the
/// results are collected as the entry's [`CollectionKind`] says.
///
/// An element that can't be located or decoded is kept as its raw bytes. A missing element field
/// becomes null.
#[derive(Clone, Debug)]
pub struct BucketDecoder {
    elements: String,
    layout: Layout,
}

fn owned_path(path: &[&str]) -> Vec<String> {
    path.iter().map(|s| s.to_string()).collect()
}

impl BucketDecoder {
    pub fn elements(field: &str, path: &[&str]) -> Self {
        Self {
            elements: field.to_string(),
            layout: Layout::Single(owned_path(path)),
        }
    }

    pub fn pairs(field: &str, key_path: &[&str], value_path: &[&str]) -> Self {
        Self {
            elements: field.to_string(),
            layout: Layout::Pair {
                key: owned_path(key_path),
                value: owned_path(value_path),
            },
        }
    }

    async fn element(
        &self,
        ctx: &HookContext<'_>,
        elem: &FieldValue<'_>,
        path: &[String],
        index: usize,
    ) -> Value {
        let span = match locate(ctx.fields(), elem, path) {
            Ok(Some(span)) => span,
            Ok(None) => return Value::Null,
            Err(err) => {
                warn!(
                    type_id = ctx.type_id(),
                    index,
                    path = %path.join("."),
                    error = %err,
                    "could not locate wrapped element"
                );
                let raw = elem.as_message().map(|(_, b)| b.to_vec());
                return Value::Bin(raw.unwrap_or_default());
            }
        };
        match ctx.decode_nested(span).await {
            Ok(value) => value.into_native(),
            Err(err) => {
                warn!(
                    type_id = ctx.type_id(),
                    index,
                    error = %err,
                    "wrapped element failed to decode, keeping raw bytes"
                );
                Value::Bin(span.to_vec())
            }
        }
    }
}

/// Follow `path` from an element down to the bytes of the envelope it holds.
fn locate<'a>(
    fields: &FieldMap<'a>,
    elem: &FieldValue<'a>,
    path: &[String],
) -> Result<Option<&'a [u8]>, DecodeError> {
    let (type_name, mut bytes) = elem
        .as_message()
        .ok_or_else(|| DecodeError::malformed("container element is not a message"))?;
    let mut type_name = type_name.to_string();
    for segment in path {
        let map = fields.decode_message(&type_name, bytes)?;
        match map.get(segment) {
            None => return Ok(None),
            Some(FieldValue::Message {
                type_name: next,
                bytes: next_bytes,
            }) => {
                type_name = next.clone();
                bytes = *next_bytes;
            }
            Some(_) => {
                return Err(DecodeError::malformed(format!(
                    "{}.{} is not a message field",
                    type_name, segment
                )))
            }
        }
    }
    Ok(Some(bytes))
}

fn bracketed(name: &str, open: &str, close: &str, items: Vec<String>) -> String {
    if items.is_empty() {
        format!("{}(0) {}{}", name, open, close)
    } else {
        format!(
            "{}({}) {} {} {}",
            name,
            items.len(),
            open,
            items.join(", "),
            close
        )
    }
}

/// Deterministic display form of a collected container.
fn render(native: &Value) -> String {
    match native {
        Value::Set(v) => bracketed("Set", "{", "}", v.iter().map(Value::to_string).collect()),
        Value::List(v) => bracketed("List", "[", "]", v.iter().map(Value::to_string).collect()),
        Value::Map(v) => bracketed(
            "Map",
            "{",
            "}",
            v.iter().map(|(k, v)| format!("{} => {}", k, v)).collect(),
        ),
        other => other.to_string(),
    }
}

#[async_trait]
impl DecodeHook for BucketDecoder {
    async fn decode(&self, ctx: HookContext<'_>) -> Result<Option<BucketData>, DecodeError> {
        let kind = match ctx.entry().collection() {
            Some(kind) => kind,
            None => {
                warn!(
                    type_id = ctx.type_id(),
                    "container entry declares no collection kind"
                );
                return Ok(None);
            }
        };
        let elements: Vec<&FieldValue> = ctx
            .fields()
            .get(&self.elements)
            .map(|f| f.iter().collect())
            .unwrap_or_default();
        debug!(type_id = ctx.type_id(), count = elements.len(), "decoding container");

        let native = match (&self.layout, kind) {
            (Layout::Single(path), CollectionKind::List | CollectionKind::Set) => {
                let mut items = Vec::with_capacity(elements.len());
                for (index, elem) in elements.into_iter().enumerate() {
                    items.push(self.element(&ctx, elem, path, index).await);
                }
                if kind == CollectionKind::Set {
                    Value::set_from(items)
                } else {
                    Value::List(items)
                }
            }
            (Layout::Pair { key, value }, CollectionKind::Map) => {
                let mut pairs = Vec::with_capacity(elements.len());
                for (index, elem) in elements.into_iter().enumerate() {
                    let k = self.element(&ctx, elem, key, index).await;
                    let v = self.element(&ctx, elem, value, index).await;
                    pairs.push((k, v));
                }
                Value::map_from(pairs)
            }
            (_, kind) => {
                warn!(
                    type_id = ctx.type_id(),
                    ?kind,
                    "container layout does not fit its collection kind"
                );
                return Ok(None);
            }
        };

        Ok(Some(BucketData {
            type_name: ctx.entry().short_name().to_string(),
            display_value: render(&native),
            native_value: native,
        }))
    }
}

/// Hook for messages holding one JSON document in a `value` field, as bytes or a string.
///
/// The display value is the pretty-printed document, keeping its key order. Invalid JSON declines.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonBucketDecoder;

#[async_trait]
impl DecodeHook for JsonBucketDecoder {
    async fn decode(&self, ctx: HookContext<'_>) -> Result<Option<BucketData>, DecodeError> {
        let text = match ctx.fields().get("value").and_then(FieldValue::as_value) {
            Some(Value::Bin(b)) => b.as_slice(),
            Some(Value::Str(s)) => s.as_bytes(),
            _ => return Ok(None),
        };
        let json: serde_json::Value = match serde_json::from_slice(text) {
            Ok(json) => json,
            Err(err) => {
                warn!(type_id = ctx.type_id(), error = %err, "JSON bucket holds invalid JSON");
                return Ok(None);
            }
        };
        let display_value = serde_json::to_string_pretty(&json)
            .map_err(|e| DecodeError::malformed(e.to_string()))?;
        Ok(Some(BucketData {
            type_name: ctx.entry().short_name().to_string(),
            display_value,
            native_value: Value::from(json),
        }))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn display_forms() {
        assert_eq!(
            render(&Value::Set(vec!["a".into(), "b".into()])),
            "Set(2) { a, b }"
        );
        assert_eq!(
            render(&Value::List(vec![Value::Int(1), Value::Int(1)])),
            "List(2) [ 1, 1 ]"
        );
        assert_eq!(
            render(&Value::Map(vec![("k".into(), Value::Bool(true))])),
            "Map(1) { k => true }"
        );
        assert_eq!(render(&Value::Set(Vec::new())), "Set(0) {}");
        assert_eq!(render(&Value::List(Vec::new())), "List(0) []");
        assert_eq!(render(&Value::Map(Vec::new())), "Map(0) {}");
    }
}
