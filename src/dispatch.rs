//! The type dispatch table: which schema describes each nested type id, and what to do with it.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::bucket::{BucketDecoder, JsonBucketDecoder};
use crate::depth_tracking::DepthTracker;
use crate::engine::Engine;
use crate::envelope::{BucketData, WrappedValue};
use crate::error::DecodeError;
use crate::schema::{FieldMap, SchemaTree};

pub const SET_BUCKET_ID: u32 = 5305;
pub const LIST_BUCKET_ID: u32 = 5306;
pub const HASH_MAP_BUCKET_ID: u32 = 5307;
pub const JSON_BUCKET_ID: u32 = 6104;

/// Schema file holding the standard container types.
pub const BUCKETS_SCHEMA: &str = "buckets.proto";

/// How a container type's elements are collected.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CollectionKind {
    /// Wire order, duplicates kept.
    List,
    /// Wire order of first occurrence, duplicates dropped.
    Set,
    /// Key/value pairs, a repeated key replacing the earlier value.
    Map,
}

/// Type-specific decoding, run after a nested message has been parsed against its schema.
///
/// Returning `Ok(None)` declines, leaving the message as raw bytes. Errors and panics are treated
/// the same way, so a hook never fails the decode it runs in.
#[async_trait]
pub trait DecodeHook: Send + Sync {
    async fn decode(&self, ctx: HookContext<'_>) -> Result<Option<BucketData>, DecodeError>;
}

/// Type-specific rendering. Returning `None` falls through to the default formatting.
pub trait FormatHook: Send + Sync {
    fn format(&self, value: &WrappedValue) -> Option<String>;
}

impl<F> FormatHook for F
where
    F: Fn(&WrappedValue) -> Option<String> + Send + Sync,
{
    fn format(&self, value: &WrappedValue) -> Option<String> {
        self(value)
    }
}

/// Everything a decode hook gets to work with.
pub struct HookContext<'a> {
    pub(crate) engine: &'a Engine,
    pub(crate) bytes: &'a [u8],
    pub(crate) fields: &'a FieldMap<'a>,
    pub(crate) type_id: u32,
    pub(crate) entry: &'a TypeEntry,
    pub(crate) tree: &'a SchemaTree,
    pub(crate) depth: DepthTracker,
}

impl<'a> HookContext<'a> {
    pub fn engine(&self) -> &'a Engine {
        self.engine
    }

    /// The nested message bytes, as they appeared in the envelope.
    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// The message's fields, decoded against its schema type.
    pub fn fields(&self) -> &'a FieldMap<'a> {
        self.fields
    }

    pub fn type_id(&self) -> u32 {
        self.type_id
    }

    pub fn entry(&self) -> &'a TypeEntry {
        self.entry
    }

    pub fn tree(&self) -> &'a SchemaTree {
        self.tree
    }

    pub fn depth(&self) -> DepthTracker {
        self.depth
    }

    /// Decode a wrapped value embedded in this message, one level deeper than the message itself.
    pub async fn decode_nested(&self, bytes: &[u8]) -> Result<WrappedValue, DecodeError> {
        let depth = self.depth.descend()?;
        self.engine.decode_at(bytes, depth).await
    }
}

/// One registered nested type.
#[derive(Clone)]
pub struct TypeEntry {
    type_id: u32,
    schema_file: String,
    type_name: String,
    collection: Option<CollectionKind>,
    decode_hook: Option<Arc<dyn DecodeHook>>,
    format_hook: Option<Arc<dyn FormatHook>>,
}

impl TypeEntry {
    /// `type_name` is the fully-qualified message name within `schema_file`.
    pub fn new(type_id: u32, schema_file: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            type_id,
            schema_file: schema_file.into(),
            type_name: type_name.into(),
            collection: None,
            decode_hook: None,
            format_hook: None,
        }
    }

    pub fn with_collection(mut self, kind: CollectionKind) -> Self {
        self.collection = Some(kind);
        self
    }

    pub fn with_decode_hook(mut self, hook: impl DecodeHook + 'static) -> Self {
        self.decode_hook = Some(Arc::new(hook));
        self
    }

    pub fn with_format_hook(mut self, hook: impl FormatHook + 'static) -> Self {
        self.format_hook = Some(Arc::new(hook));
        self
    }

    pub fn type_id(&self) -> u32 {
        self.type_id
    }

    pub fn schema_file(&self) -> &str {
        &self.schema_file
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// The type name without its package, e.g. `SetBucket` for `buckets.SetBucket`.
    pub fn short_name(&self) -> &str {
        self.type_name
            .rsplit('.')
            .next()
            .unwrap_or(&self.type_name)
    }

    pub fn collection(&self) -> Option<CollectionKind> {
        self.collection
    }

    pub fn decode_hook(&self) -> Option<&dyn DecodeHook> {
        self.decode_hook.as_deref()
    }

    pub fn format_hook(&self) -> Option<&dyn FormatHook> {
        self.format_hook.as_deref()
    }
}

impl fmt::Debug for TypeEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeEntry")
            .field("type_id", &self.type_id)
            .field("schema_file", &self.schema_file)
            .field("type_name", &self.type_name)
            .field("collection", &self.collection)
            .field("decode_hook", &self.decode_hook.is_some())
            .field("format_hook", &self.format_hook.is_some())
            .finish()
    }
}

/// Immutable map from type id to [`TypeEntry`]. Build one with [`TypeTable::builder`].
#[derive(Clone, Debug, Default)]
pub struct TypeTable {
    entries: HashMap<u32, TypeEntry>,
}

impl TypeTable {
    pub fn builder() -> TypeTableBuilder {
        TypeTableBuilder::default()
    }

    /// The standard container types: set, list and map buckets of wrapped values, and the JSON
    /// bucket.
    pub fn standard() -> Self {
        Self::builder().standard().build()
    }

    pub fn resolve(&self, type_id: u32) -> Option<&TypeEntry> {
        self.entries.get(&type_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TypeEntry> {
        self.entries.values()
    }
}

#[derive(Default)]
pub struct TypeTableBuilder {
    entries: HashMap<u32, TypeEntry>,
}

impl TypeTableBuilder {
    /// Register an entry. If its type id is already taken, the first registration is kept.
    pub fn add(mut self, entry: TypeEntry) -> Self {
        if let Some(existing) = self.entries.get(&entry.type_id) {
            warn!(
                type_id = entry.type_id,
                kept = %existing.type_name,
                ignored = %entry.type_name,
                "type id registered twice"
            );
        } else {
            self.entries.insert(entry.type_id, entry);
        }
        self
    }

    /// Add the standard container types.
    pub fn standard(self) -> Self {
        self.add(
            TypeEntry::new(SET_BUCKET_ID, BUCKETS_SCHEMA, "buckets.SetBucket")
                .with_collection(CollectionKind::Set)
                .with_decode_hook(BucketDecoder::elements("wrappedValues", &["object"])),
        )
        .add(
            TypeEntry::new(LIST_BUCKET_ID, BUCKETS_SCHEMA, "buckets.ListBucket")
                .with_collection(CollectionKind::List)
                .with_decode_hook(BucketDecoder::elements("values", &["object"])),
        )
        .add(
            TypeEntry::new(HASH_MAP_BUCKET_ID, BUCKETS_SCHEMA, "buckets.HashMapBucket")
                .with_collection(CollectionKind::Map)
                .with_decode_hook(BucketDecoder::pairs("values", &["key"], &["value"])),
        )
        .add(
            TypeEntry::new(JSON_BUCKET_ID, BUCKETS_SCHEMA, "buckets.JsonBucket")
                .with_decode_hook(JsonBucketDecoder),
        )
    }

    pub fn build(self) -> TypeTable {
        TypeTable {
            entries: self.entries,
        }
    }
}
