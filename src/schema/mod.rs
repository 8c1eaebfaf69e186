//! Schemas: the protobuf IDL files that describe nested message types.
//!
//! Schema files are fetched by name from a [`SchemaSource`], parsed into a [`ProtoFile`], and
//! bundled with their imports into a [`SchemaTree`] by the [`SchemaRegistry`], which caches one
//! tree per file name for the life of the process.
//!
//! All schema files live in one flat namespace under a single root. An import is resolved by its
//! base name alone, so `import "org/example/base.proto";` and `import "base.proto";` load the
//! same file.

mod fields;
mod parse;
mod registry;

pub use self::fields::*;
pub use self::parse::parse_proto;
pub use self::registry::*;

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::element::{WIRE_FIXED32, WIRE_FIXED64, WIRE_LEN, WIRE_VARINT};

/// The scalar field types of the protobuf language.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ScalarType {
    Double,
    Float,
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
    Bool,
    String,
    Bytes,
}

impl ScalarType {
    pub fn from_name(name: &str) -> Option<Self> {
        use self::ScalarType::*;
        Some(match name {
            "double" => Double,
            "float" => Float,
            "int32" => Int32,
            "int64" => Int64,
            "uint32" => UInt32,
            "uint64" => UInt64,
            "sint32" => SInt32,
            "sint64" => SInt64,
            "fixed32" => Fixed32,
            "fixed64" => Fixed64,
            "sfixed32" => SFixed32,
            "sfixed64" => SFixed64,
            "bool" => Bool,
            "string" => String,
            "bytes" => Bytes,
            _ => return None,
        })
    }

    pub fn wire_type(&self) -> u8 {
        use self::ScalarType::*;
        match self {
            Double | Fixed64 | SFixed64 => WIRE_FIXED64,
            Float | Fixed32 | SFixed32 => WIRE_FIXED32,
            String | Bytes => WIRE_LEN,
            Int32 | Int64 | UInt32 | UInt64 | SInt32 | SInt64 | Bool => WIRE_VARINT,
        }
    }

    /// Whether repeated fields of this type may be packed into a single length-delimited value.
    pub fn is_packable(&self) -> bool {
        self.wire_type() != WIRE_LEN
    }
}

/// A field type as written in the schema. Named types are resolved against the schema tree when
/// the field is decoded, since they may live in an imported file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FieldType {
    Scalar(ScalarType),
    Named(String),
    Map(ScalarType, Box<FieldType>),
}

impl FieldType {
    pub(crate) fn from_written(name: &str) -> Self {
        match ScalarType::from_name(name) {
            Some(s) => FieldType::Scalar(s),
            None => FieldType::Named(name.to_string()),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Label {
    Optional,
    Required,
    Repeated,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldDef {
    pub name: String,
    pub number: u32,
    pub label: Label,
    pub ty: FieldType,
    /// Name of the `oneof` this field belongs to, if any.
    pub oneof: Option<String>,
}

impl FieldDef {
    /// Whether every occurrence of this field on the wire is kept, rather than only the last.
    pub fn is_repeated(&self) -> bool {
        self.label == Label::Repeated || matches!(self.ty, FieldType::Map(..))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageType {
    /// Fully-qualified name, without a leading dot.
    pub full_name: String,
    pub fields: Vec<FieldDef>,
}

impl MessageType {
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_by_number(&self, number: u32) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.number == number)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnumType {
    pub full_name: String,
    pub values: Vec<(String, i32)>,
}

impl EnumType {
    /// Name of the first value with this number.
    pub fn name_of(&self, number: i32) -> Option<&str> {
        self.values
            .iter()
            .find(|(_, n)| *n == number)
            .map(|(name, _)| name.as_str())
    }
}

/// One parsed schema file. Nested declarations are flattened into the maps under their
/// fully-qualified names.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProtoFile {
    pub syntax: Option<String>,
    pub package: Option<String>,
    /// Imports exactly as written.
    pub imports: Vec<String>,
    pub messages: BTreeMap<String, MessageType>,
    pub enums: BTreeMap<String, EnumType>,
}

/// A reference to a resolved named type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TypeRef<'a> {
    Message(&'a MessageType),
    Enum(&'a EnumType),
}

/// A parsed schema file together with the trees of everything it imports.
#[derive(Debug)]
pub struct SchemaTree {
    name: String,
    file: ProtoFile,
    imports: Vec<Arc<SchemaTree>>,
}

impl SchemaTree {
    pub fn new(name: impl Into<String>, file: ProtoFile, imports: Vec<Arc<SchemaTree>>) -> Self {
        Self {
            name: name.into(),
            file,
            imports,
        }
    }

    /// Canonical file name this tree was loaded under.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn file(&self) -> &ProtoFile {
        &self.file
    }

    pub fn imports(&self) -> &[Arc<SchemaTree>] {
        &self.imports
    }

    /// Look up a message by fully-qualified name, in this file first and then in its imports.
    pub fn message(&self, full_name: &str) -> Option<&MessageType> {
        let full_name = full_name.strip_prefix('.').unwrap_or(full_name);
        self.file
            .messages
            .get(full_name)
            .or_else(|| self.imports.iter().find_map(|t| t.message(full_name)))
    }

    /// Look up an enum by fully-qualified name, in this file first and then in its imports.
    pub fn enum_type(&self, full_name: &str) -> Option<&EnumType> {
        let full_name = full_name.strip_prefix('.').unwrap_or(full_name);
        self.file
            .enums
            .get(full_name)
            .or_else(|| self.imports.iter().find_map(|t| t.enum_type(full_name)))
    }

    fn lookup(&self, full_name: &str) -> Option<TypeRef<'_>> {
        self.message(full_name)
            .map(TypeRef::Message)
            .or_else(|| self.enum_type(full_name).map(TypeRef::Enum))
    }

    /// Resolve a type name as written inside `scope` (the fully-qualified name of the enclosing
    /// message), searching from the innermost scope outwards. A leading `.` makes the name
    /// absolute.
    pub fn resolve(&self, scope: &str, name: &str) -> Option<TypeRef<'_>> {
        if let Some(absolute) = name.strip_prefix('.') {
            return self.lookup(absolute);
        }
        let mut scope = scope;
        loop {
            if scope.is_empty() {
                return self.lookup(name);
            }
            if let Some(found) = self.lookup(&format!("{}.{}", scope, name)) {
                return Some(found);
            }
            scope = scope.rfind('.').map(|i| &scope[..i]).unwrap_or("");
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn tree(text: &str, imports: Vec<Arc<SchemaTree>>) -> SchemaTree {
        SchemaTree::new("test.proto", parse_proto(text).unwrap(), imports)
    }

    #[test]
    fn resolves_innermost_scope_first() {
        let t = tree(
            r#"
            package a.b;
            message Thing { optional int32 x = 1; }
            message Outer {
                message Thing { optional int32 y = 1; }
                optional Thing t = 1;
            }
            "#,
            Vec::new(),
        );
        match t.resolve("a.b.Outer", "Thing") {
            Some(TypeRef::Message(m)) => assert_eq!(m.full_name, "a.b.Outer.Thing"),
            other => panic!("unexpected {:?}", other),
        }
        match t.resolve("a.b.Other", "Thing") {
            Some(TypeRef::Message(m)) => assert_eq!(m.full_name, "a.b.Thing"),
            other => panic!("unexpected {:?}", other),
        }
        match t.resolve("a.b.Outer", ".a.b.Thing") {
            Some(TypeRef::Message(m)) => assert_eq!(m.full_name, "a.b.Thing"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(t.resolve("a.b.Outer", "Missing").is_none());
    }

    #[test]
    fn searches_imports() {
        let base = Arc::new(SchemaTree::new(
            "base.proto",
            parse_proto("package base; enum Color { RED = 0; GREEN = 1; }").unwrap(),
            Vec::new(),
        ));
        let t = tree(
            "package top; import \"x/y/base.proto\"; message M { optional base.Color c = 1; }",
            vec![base],
        );
        match t.resolve("top.M", "base.Color") {
            Some(TypeRef::Enum(e)) => assert_eq!(e.name_of(1), Some("GREEN")),
            other => panic!("unexpected {:?}", other),
        }
        assert!(t.message(".top.M").is_some());
        assert!(t.enum_type("base.Color").is_some());
    }
}
