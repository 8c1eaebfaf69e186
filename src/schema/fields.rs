use std::collections::BTreeMap;

use byteorder::{LittleEndian, ReadBytesExt};

use super::{FieldDef, FieldType, MessageType, ScalarType, SchemaTree, TypeRef};
use crate::depth_tracking::DepthTracker;
use crate::element::{Parser, WireValue, WIRE_FIXED32, WIRE_FIXED64, WIRE_VARINT};
use crate::error::DecodeError;
use crate::value::Value;
use crate::varint::{zigzag_decode32, zigzag_decode64, VarInt};

/// One decoded field of a message.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue<'a> {
    /// A scalar or enum value.
    Value(Value),
    /// An embedded message, left undecoded. `type_name` is fully qualified.
    Message { type_name: String, bytes: &'a [u8] },
    /// One entry of a `map<K, V>` field.
    Entry(Box<(FieldValue<'a>, FieldValue<'a>)>),
    /// Every occurrence of a repeated field, in wire order.
    Repeated(Vec<FieldValue<'a>>),
}

impl<'a> FieldValue<'a> {
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            FieldValue::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_message(&self) -> Option<(&str, &'a [u8])> {
        match self {
            FieldValue::Message { type_name, bytes } => Some((type_name.as_str(), *bytes)),
            _ => None,
        }
    }

    /// Iterate over the occurrences of a field: the elements of a repeated field, or the single
    /// value of any other.
    pub fn iter(&self) -> std::slice::Iter<'_, FieldValue<'a>> {
        match self {
            FieldValue::Repeated(v) => v.iter(),
            other => std::slice::from_ref(other).iter(),
        }
    }
}

/// The fields of one message, decoded generically against its schema type.
///
/// Field values borrow from the message bytes. Embedded messages are only located, not decoded;
/// use [`decode_message`][FieldMap::decode_message] to descend into one.
#[derive(Clone, Debug)]
pub struct FieldMap<'a> {
    type_name: String,
    tree: &'a SchemaTree,
    fields: BTreeMap<String, FieldValue<'a>>,
}

impl<'a> FieldMap<'a> {
    /// Decode `bytes` as an instance of `message`. Fields the schema doesn't know are skipped.
    /// Repeated fields accumulate, and for any other field the last occurrence wins.
    pub fn decode(
        bytes: &'a [u8],
        message: &MessageType,
        tree: &'a SchemaTree,
    ) -> Result<Self, DecodeError> {
        let mut fields: BTreeMap<String, FieldValue<'a>> = BTreeMap::new();
        for elem in Parser::new(bytes) {
            let elem = elem?;
            let def = match message.field_by_number(elem.field) {
                Some(def) => def,
                None => continue,
            };
            let decoded = decode_field(tree, &message.full_name, def, elem.value)?;
            if def.is_repeated() {
                let slot = fields
                    .entry(def.name.clone())
                    .or_insert_with(|| FieldValue::Repeated(Vec::new()));
                if let FieldValue::Repeated(list) = slot {
                    list.extend(decoded);
                }
            } else if let Some(last) = decoded.into_iter().last() {
                fields.insert(def.name.clone(), last);
            }
        }
        Ok(Self {
            type_name: message.full_name.clone(),
            tree,
            fields,
        })
    }

    /// Fully-qualified name of the decoded message type.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn tree(&self) -> &'a SchemaTree {
        self.tree
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue<'a>> {
        self.fields.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue<'a>)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Decode an embedded message found in this map, using the same schema tree.
    pub fn decode_message(&self, type_name: &str, bytes: &'a [u8]) -> Result<Self, DecodeError> {
        let message = self.tree.message(type_name).ok_or_else(|| {
            DecodeError::malformed(format!("message type {} is not defined", type_name))
        })?;
        Self::decode(bytes, message, self.tree)
    }

    /// Render the whole map as a [`Value::Object`], recursing into embedded messages. An embedded
    /// message that fails to decode, or lies past the depth limit, is kept as its raw bytes.
    pub fn to_value(&self, depth: DepthTracker) -> Value {
        Value::Object(
            self.fields
                .iter()
                .map(|(name, field)| (name.clone(), self.render(field, depth)))
                .collect(),
        )
    }

    fn render(&self, field: &FieldValue<'a>, depth: DepthTracker) -> Value {
        match field {
            FieldValue::Value(v) => v.clone(),
            FieldValue::Message { type_name, bytes } => depth
                .descend()
                .and_then(|depth| {
                    self.decode_message(type_name, *bytes)
                        .map(|nested| nested.to_value(depth))
                })
                .unwrap_or_else(|_| Value::Bin(bytes.to_vec())),
            FieldValue::Entry(entry) => Value::List(vec![
                self.render(&entry.0, depth),
                self.render(&entry.1, depth),
            ]),
            FieldValue::Repeated(list) => {
                if list.iter().all(|f| matches!(f, FieldValue::Entry(_))) && !list.is_empty() {
                    Value::map_from(list.iter().filter_map(|f| match f {
                        FieldValue::Entry(entry) => {
                            Some((self.render(&entry.0, depth), self.render(&entry.1, depth)))
                        }
                        _ => None,
                    }))
                } else {
                    Value::List(list.iter().map(|f| self.render(f, depth)).collect())
                }
            }
        }
    }
}

/// Decode one occurrence of a field. Packed repeated fields yield several values.
fn decode_field<'a>(
    tree: &'a SchemaTree,
    scope: &str,
    def: &FieldDef,
    wire: WireValue<'a>,
) -> Result<Vec<FieldValue<'a>>, DecodeError> {
    let field = def.number;
    match &def.ty {
        FieldType::Map(key, value) => {
            let entry = decode_entry(tree, scope, *key, value, wire.len_delimited(field)?)?;
            Ok(vec![entry])
        }
        FieldType::Scalar(ty) => {
            if let WireValue::Len(packed) = wire {
                if def.is_repeated() && ty.is_packable() {
                    return unpack(packed, ty.wire_type(), field)?
                        .into_iter()
                        .map(|w| scalar_value(*ty, w, field).map(FieldValue::Value))
                        .collect();
                }
            }
            Ok(vec![FieldValue::Value(scalar_value(*ty, wire, field)?)])
        }
        FieldType::Named(name) => match tree.resolve(scope, name) {
            Some(TypeRef::Message(m)) => Ok(vec![FieldValue::Message {
                type_name: m.full_name.clone(),
                bytes: wire.len_delimited(field)?,
            }]),
            Some(TypeRef::Enum(e)) => {
                let numbers = match wire {
                    WireValue::Len(packed) if def.is_repeated() => {
                        unpack(packed, WIRE_VARINT, field)?
                    }
                    other => vec![other],
                };
                numbers
                    .into_iter()
                    .map(|w| {
                        let number = w.varint(field)? as i32;
                        let name = e
                            .name_of(number)
                            .map(str::to_string)
                            .unwrap_or_else(|| number.to_string());
                        Ok(FieldValue::Value(Value::Enum(name)))
                    })
                    .collect()
            }
            None => Err(DecodeError::malformed(format!(
                "field {} of {}: type {} is not defined",
                def.name, scope, name
            ))),
        },
    }
}

/// Decode a map entry: key in field 1, value in field 2. A missing key or value decodes as null.
fn decode_entry<'a>(
    tree: &'a SchemaTree,
    scope: &str,
    key_ty: ScalarType,
    value_ty: &FieldType,
    bytes: &'a [u8],
) -> Result<FieldValue<'a>, DecodeError> {
    let mut key = FieldValue::Value(Value::Null);
    let mut value = FieldValue::Value(Value::Null);
    let value_def = FieldDef {
        name: "value".into(),
        number: 2,
        label: super::Label::Optional,
        ty: value_ty.clone(),
        oneof: None,
    };
    for elem in Parser::new(bytes) {
        let elem = elem?;
        match elem.field {
            1 => key = FieldValue::Value(scalar_value(key_ty, elem.value, 1)?),
            2 => {
                if let Some(v) = decode_field(tree, scope, &value_def, elem.value)?.pop() {
                    value = v;
                }
            }
            _ => (),
        }
    }
    Ok(FieldValue::Entry(Box::new((key, value))))
}

/// Split a packed repeated field into its individual wire values.
fn unpack(mut data: &[u8], wire_type: u8, field: u32) -> Result<Vec<WireValue<'_>>, DecodeError> {
    let mut out = Vec::new();
    let short = |left: usize| {
        DecodeError::malformed(format!(
            "field {}: packed data ends mid-value ({} bytes left)",
            field, left
        ))
    };
    while !data.is_empty() {
        let left = data.len();
        let v = match wire_type {
            WIRE_VARINT => WireValue::Varint(VarInt::read(&mut data)?.0),
            WIRE_FIXED64 => {
                WireValue::Fixed64(data.read_u64::<LittleEndian>().map_err(|_| short(left))?)
            }
            WIRE_FIXED32 => {
                WireValue::Fixed32(data.read_u32::<LittleEndian>().map_err(|_| short(left))?)
            }
            _ => {
                return Err(DecodeError::malformed(format!(
                    "field {}: length-delimited values cannot be packed",
                    field
                )))
            }
        };
        out.push(v);
    }
    Ok(out)
}

fn scalar_value(ty: ScalarType, wire: WireValue, field: u32) -> Result<Value, DecodeError> {
    use ScalarType::*;
    Ok(match ty {
        Double => Value::F64(f64::from_bits(wire.fixed64(field)?)),
        Float => Value::F32(f32::from_bits(wire.fixed32(field)?)),
        Int32 => Value::Int((wire.varint(field)? as i32).into()),
        Int64 => Value::Int(wire.varint(field)? as i64),
        UInt32 => Value::UInt((wire.varint(field)? as u32).into()),
        UInt64 => Value::UInt(wire.varint(field)?),
        SInt32 => Value::Int(zigzag_decode32(wire.varint(field)? as u32).into()),
        SInt64 => Value::Int(zigzag_decode64(wire.varint(field)?)),
        Fixed32 => Value::UInt(wire.fixed32(field)?.into()),
        Fixed64 => Value::UInt(wire.fixed64(field)?),
        SFixed32 => Value::Int((wire.fixed32(field)? as i32).into()),
        SFixed64 => Value::Int(wire.fixed64(field)? as i64),
        Bool => Value::Bool(wire.varint(field)? != 0),
        String => Value::Str(
            std::string::String::from_utf8_lossy(wire.len_delimited(field)?).into_owned(),
        ),
        Bytes => Value::Bin(wire.len_delimited(field)?.to_vec()),
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::encode::MessageWriter;
    use crate::schema::parse_proto;

    const SCHEMA: &str = r#"
        package t;
        enum Color { RED = 0; GREEN = 1; }
        message Inner { optional string name = 1; optional Inner child = 2; }
        message Outer {
            optional int32 small = 1;
            optional sint64 zig = 2;
            repeated int32 packed = 3;
            repeated string names = 4;
            optional Inner inner = 5;
            optional Color color = 6;
            map<string, int64> counts = 7;
            optional double ratio = 8;
            optional bytes blob = 9;
            repeated Color colors = 10;
        }
    "#;

    fn tree() -> SchemaTree {
        SchemaTree::new("t.proto", parse_proto(SCHEMA).unwrap(), Vec::new())
    }

    #[test]
    fn scalars_and_last_wins() {
        let tree = tree();
        let msg = tree.message("t.Outer").unwrap();
        let bytes = MessageWriter::new()
            .int32(1, 5)
            .int32(1, -7)
            .sint64(2, -3)
            .double(8, 0.5)
            .bytes(9, &[1, 2])
            .varint(99, 1234)
            .finish();
        let map = FieldMap::decode(&bytes, msg, &tree).unwrap();
        assert_eq!(map.type_name(), "t.Outer");
        assert_eq!(map.len(), 4);
        assert_eq!(map.get("small").unwrap().as_value(), Some(&Value::Int(-7)));
        assert_eq!(map.get("zig").unwrap().as_value(), Some(&Value::Int(-3)));
        assert_eq!(map.get("ratio").unwrap().as_value(), Some(&Value::F64(0.5)));
        assert_eq!(
            map.get("blob").unwrap().as_value(),
            Some(&Value::Bin(vec![1, 2]))
        );
    }

    #[test]
    fn repeated_packed_and_unpacked() {
        let tree = tree();
        let msg = tree.message("t.Outer").unwrap();
        let mut inner = Vec::new();
        for v in [1u64, 300, 2] {
            VarInt(v).write(&mut inner);
        }
        let bytes = MessageWriter::new()
            .bytes(3, &inner)
            .int32(3, 9)
            .string(4, "a")
            .string(4, "b")
            .bytes(10, &[0, 1, 5])
            .finish();
        let map = FieldMap::decode(&bytes, msg, &tree).unwrap();
        let packed: Vec<&Value> = map
            .get("packed")
            .unwrap()
            .iter()
            .filter_map(FieldValue::as_value)
            .collect();
        assert_eq!(
            packed,
            vec![&Value::Int(1), &Value::Int(300), &Value::Int(2), &Value::Int(9)]
        );
        assert_eq!(map.get("names").unwrap().iter().count(), 2);
        let colors: Vec<&Value> = map
            .get("colors")
            .unwrap()
            .iter()
            .filter_map(FieldValue::as_value)
            .collect();
        assert_eq!(
            colors,
            vec![
                &Value::Enum("RED".into()),
                &Value::Enum("GREEN".into()),
                &Value::Enum("5".into())
            ]
        );
    }

    #[test]
    fn nested_messages_and_maps() {
        let tree = tree();
        let msg = tree.message("t.Outer").unwrap();
        let child = MessageWriter::new().string(1, "kid").finish();
        let inner = MessageWriter::new()
            .string(1, "parent")
            .message(2, &child)
            .finish();
        let entry_a = MessageWriter::new().string(1, "a").int64(2, 1).finish();
        let entry_b = MessageWriter::new().string(1, "b").int64(2, 2).finish();
        let entry_a2 = MessageWriter::new().string(1, "a").int64(2, 3).finish();
        let bytes = MessageWriter::new()
            .message(5, &inner)
            .int32(6, 1)
            .message(7, &entry_a)
            .message(7, &entry_b)
            .message(7, &entry_a2)
            .finish();
        let map = FieldMap::decode(&bytes, msg, &tree).unwrap();
        let (name, span) = map.get("inner").unwrap().as_message().unwrap();
        assert_eq!(name, "t.Inner");
        assert_eq!(span, &inner[..]);
        assert_eq!(
            map.get("color").unwrap().as_value(),
            Some(&Value::Enum("GREEN".into()))
        );

        let rendered = map.to_value(DepthTracker::default());
        assert_eq!(rendered["inner"]["name"], Value::Str("parent".into()));
        assert_eq!(rendered["inner"]["child"]["name"], Value::Str("kid".into()));
        assert_eq!(
            rendered["counts"],
            Value::Map(vec![
                (Value::Str("a".into()), Value::Int(3)),
                (Value::Str("b".into()), Value::Int(2)),
            ])
        );
    }

    #[test]
    fn depth_limit_keeps_raw_bytes() {
        let tree = tree();
        let msg = tree.message("t.Outer").unwrap();
        let inner = MessageWriter::new().string(1, "deep").finish();
        let bytes = MessageWriter::new().message(5, &inner).finish();
        let map = FieldMap::decode(&bytes, msg, &tree).unwrap();
        let rendered = map.to_value(DepthTracker::new(0));
        assert_eq!(rendered["inner"], Value::Bin(inner));
    }

    #[test]
    fn wrong_wire_type() {
        let tree = tree();
        let msg = tree.message("t.Outer").unwrap();
        let bytes = MessageWriter::new().string(1, "nope").finish();
        assert!(matches!(
            FieldMap::decode(&bytes, msg, &tree),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn undefined_type() {
        let tree = SchemaTree::new(
            "x.proto",
            parse_proto("message X { optional Missing m = 1; }").unwrap(),
            Vec::new(),
        );
        let msg = tree.message("X").unwrap();
        let bytes = MessageWriter::new().bytes(1, &[]).finish();
        assert!(FieldMap::decode(&bytes, msg, &tree).is_err());
    }
}
