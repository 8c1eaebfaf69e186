use std::collections::BTreeMap;
use std::fmt;
use std::ops::Index;

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::timestamp::Timestamp;

/// A plain decoded value, with no wire or schema information left in it.
///
/// This is what container decoders collect their elements into, what generic message decoding
/// produces, and what a [`WrappedValue`][crate::WrappedValue] unwraps to.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    F32(f32),
    F64(f64),
    Char(char),
    Str(String),
    Bin(Vec<u8>),
    Timestamp(Timestamp),
    /// An enum value, by name when the schema names it, by number otherwise.
    Enum(String),
    /// Ordered sequence, duplicates allowed.
    List(Vec<Value>),
    /// Insertion-ordered sequence with no two equal elements.
    Set(Vec<Value>),
    /// Insertion-ordered key/value pairs with no two equal keys.
    Map(Vec<(Value, Value)>),
    /// Named fields of a decoded message, sorted by name. JSON objects become a [`Value::Map`]
    /// instead, keeping their key order.
    Object(BTreeMap<String, Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_str(&self) -> bool {
        matches!(self, Value::Str(_))
    }

    pub fn is_bin(&self) -> bool {
        matches!(self, Value::Bin(_))
    }

    pub fn as_bool(&self) -> Option<bool> {
        if let Value::Bool(val) = *self {
            Some(val)
        } else {
            None
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::Int(n) => Some(n),
            Value::UInt(n) => i64::try_from(n).ok(),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            Value::Int(n) => u64::try_from(n).ok(),
            Value::UInt(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_floating(&self) -> Option<f64> {
        match *self {
            Value::F32(n) => Some(n.into()),
            Value::F64(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        if let Value::Str(ref val) = *self {
            Some(val.as_str())
        } else {
            None
        }
    }

    pub fn as_slice(&self) -> Option<&[u8]> {
        if let Value::Bin(ref val) = *self {
            Some(val)
        } else {
            None
        }
    }

    /// The elements of a list or a set.
    pub fn as_elements(&self) -> Option<&[Value]> {
        match *self {
            Value::List(ref v) | Value::Set(ref v) => Some(v),
            _ => None,
        }
    }

    pub fn as_pairs(&self) -> Option<&[(Value, Value)]> {
        if let Value::Map(ref v) = *self {
            Some(v)
        } else {
            None
        }
    }

    pub fn as_object(&self) -> Option<&BTreeMap<String, Value>> {
        if let Value::Object(ref map) = *self {
            Some(map)
        } else {
            None
        }
    }

    /// Look up a map value by key.
    pub fn get(&self, key: &Value) -> Option<&Value> {
        self.as_pairs()?
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// Number of elements in a collection, or `None` if this isn't one.
    pub fn size(&self) -> Option<usize> {
        match self {
            Value::List(v) | Value::Set(v) => Some(v.len()),
            Value::Map(v) => Some(v.len()),
            Value::Object(v) => Some(v.len()),
            _ => None,
        }
    }

    /// Build a set, dropping any element equal to one already seen.
    pub fn set_from(elements: impl IntoIterator<Item = Value>) -> Value {
        let mut set: Vec<Value> = Vec::new();
        for elem in elements {
            if !set.contains(&elem) {
                set.push(elem);
            }
        }
        Value::Set(set)
    }

    /// Build a map, with later pairs replacing the value of an equal earlier key.
    pub fn map_from(pairs: impl IntoIterator<Item = (Value, Value)>) -> Value {
        let mut map: Vec<(Value, Value)> = Vec::new();
        for (k, v) in pairs {
            match map.iter_mut().find(|(existing, _)| *existing == k) {
                Some(slot) => slot.1 = v,
                None => map.push((k, v)),
            }
        }
        Value::Map(map)
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

static NULL: Value = Value::Null;

impl Index<usize> for Value {
    type Output = Value;

    fn index(&self, index: usize) -> &Self::Output {
        self.as_elements()
            .and_then(|v| v.get(index))
            .unwrap_or(&NULL)
    }
}

impl Index<&str> for Value {
    type Output = Value;

    fn index(&self, index: &str) -> &Self::Output {
        match self {
            Value::Object(map) => map.get(index).unwrap_or(&NULL),
            Value::Map(_) => self.get(&Value::from(index)).unwrap_or(&NULL),
            _ => &NULL,
        }
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::UInt(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::F64(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bin(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        use serde_json::Value as Json;
        match v {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(b),
            Json::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else if let Some(u) = n.as_u64() {
                    Value::UInt(u)
                } else {
                    Value::F64(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            Json::String(s) => Value::Str(s),
            Json::Array(a) => Value::List(a.into_iter().map(Value::from).collect()),
            Json::Object(o) => Value::Map(
                o.into_iter()
                    .map(|(k, v)| (Value::Str(k), v.into()))
                    .collect(),
            ),
        }
    }
}

/// JSON form of a value. Bytes become base64 strings, and maps whose keys are not all strings
/// become arrays of `[key, value]` pairs.
impl From<&Value> for serde_json::Value {
    fn from(v: &Value) -> Self {
        use serde_json::Value as Json;
        match v {
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Int(i) => Json::from(*i),
            Value::UInt(u) => Json::from(*u),
            Value::F32(f) => serde_json::Number::from_f64((*f).into())
                .map(Json::Number)
                .unwrap_or(Json::Null),
            Value::F64(f) => serde_json::Number::from_f64(*f)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            Value::Char(c) => Json::String(c.to_string()),
            Value::Str(s) => Json::String(s.clone()),
            Value::Bin(b) => Json::String(STANDARD.encode(b)),
            Value::Timestamp(t) => Json::String(t.iso8601().to_string()),
            Value::Enum(e) => Json::String(e.clone()),
            Value::List(l) | Value::Set(l) => Json::Array(l.iter().map(Json::from).collect()),
            Value::Map(m) => {
                if m.iter().all(|(k, _)| k.is_str()) {
                    Json::Object(
                        m.iter()
                            .map(|(k, v)| (k.to_string(), Json::from(v)))
                            .collect(),
                    )
                } else {
                    Json::Array(
                        m.iter()
                            .map(|(k, v)| Json::Array(vec![Json::from(k), Json::from(v)]))
                            .collect(),
                    )
                }
            }
            Value::Object(o) => Json::Object(
                o.iter()
                    .map(|(k, v)| (k.clone(), Json::from(v)))
                    .collect(),
            ),
        }
    }
}

fn write_joined<I>(
    f: &mut fmt::Formatter,
    items: impl IntoIterator<Item = I>,
    mut each: impl FnMut(&mut fmt::Formatter, I) -> fmt::Result,
) -> fmt::Result {
    for (i, item) in items.into_iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        each(f, item)?;
    }
    Ok(())
}

/// Human-readable rendering. Strings are written without quotes and bytes as standard base64.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::UInt(v) => write!(f, "{}", v),
            Value::F32(v) => write!(f, "{}", v),
            Value::F64(v) => write!(f, "{}", v),
            Value::Char(v) => write!(f, "{}", v),
            Value::Str(v) => f.write_str(v),
            Value::Bin(v) => f.write_str(&STANDARD.encode(v)),
            Value::Timestamp(v) => write!(f, "{}", v),
            Value::Enum(v) => f.write_str(v),
            Value::List(v) => {
                f.write_str("[")?;
                write_joined(f, v, |f, e| write!(f, "{}", e))?;
                f.write_str("]")
            }
            Value::Set(v) => {
                f.write_str("{")?;
                write_joined(f, v, |f, e| write!(f, "{}", e))?;
                f.write_str("}")
            }
            Value::Map(v) => {
                f.write_str("{")?;
                write_joined(f, v, |f, (k, e)| write!(f, "{}: {}", k, e))?;
                f.write_str("}")
            }
            Value::Object(v) => {
                f.write_str("{")?;
                write_joined(f, v, |f, (k, e)| write!(f, "{}: {}", k, e))?;
                f.write_str("}")
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn set_collapses_duplicates() {
        let set = Value::set_from(vec!["a".into(), "b".into(), "b".into(), "a".into()]);
        assert_eq!(set, Value::Set(vec!["a".into(), "b".into()]));
        assert_eq!(set.size(), Some(2));
    }

    #[test]
    fn map_replaces_values() {
        let map = Value::map_from(vec![
            ("k".into(), Value::Int(1)),
            ("j".into(), Value::Int(2)),
            ("k".into(), Value::Int(3)),
        ]);
        assert_eq!(map.size(), Some(2));
        assert_eq!(map["k"], Value::Int(3));
        assert_eq!(map.get(&"j".into()), Some(&Value::Int(2)));
    }

    #[test]
    fn index_misses_are_null() {
        let list = Value::List(vec![Value::Bool(true)]);
        assert_eq!(list[0], Value::Bool(true));
        assert!(list[1].is_null());
        assert!(list["nope"].is_null());
        assert!(Value::Int(3)[0].is_null());
    }

    #[test]
    fn display() {
        assert_eq!(Value::Str("hi".into()).to_string(), "hi");
        assert_eq!(Value::Bin(vec![0, 1, 2]).to_string(), "AAEC");
        assert_eq!(Value::F64(1.5).to_string(), "1.5");
        let list = Value::List(vec![Value::Int(1), Value::Null, "x".into()]);
        assert_eq!(list.to_string(), "[1, null, x]");
        let map = Value::Map(vec![("a".into(), Value::UInt(1))]);
        assert_eq!(map.to_string(), "{a: 1}");
    }

    #[test]
    fn from_json() {
        let json: serde_json::Value = serde_json::from_str(r#"{"b":[1,-2,2.5],"a":null}"#).unwrap();
        let value = Value::from(json);
        assert_eq!(value["a"], Value::Null);
        assert_eq!(
            value["b"],
            Value::List(vec![Value::Int(1), Value::Int(-2), Value::F64(2.5)])
        );
        // Keys stay in document order, both here and on the way back out.
        let keys: Vec<_> = value.as_pairs().unwrap().iter().map(|(k, _)| k.to_string()).collect();
        assert_eq!(keys, ["b", "a"]);
        assert_eq!(
            serde_json::Value::from(&value).to_string(),
            r#"{"b":[1,-2,2.5],"a":null}"#
        );
    }
}
