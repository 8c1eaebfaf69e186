use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_core::future::BoxFuture;
use futures_util::FutureExt;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::depth_tracking::DepthTracker;
use crate::dispatch::{HookContext, TypeTable};
use crate::envelope::{Classified, Envelope, Payload, WrappedValue, UNKNOWN_TYPE_NAME};
use crate::error::{DecodeError, Error, Result};
use crate::scalar::Scalar;
use crate::schema::{FieldMap, MemorySource, SchemaRegistry, SchemaSource};
use crate::value::Value;

/// The decoding engine: a type table, a schema registry, and settings.
///
/// An `Engine` is `Send + Sync`, and any number of decodes may run on it at once. Cloning is
/// cheap; clones share the schema cache.
#[derive(Clone, Debug)]
pub struct Engine {
    table: Arc<TypeTable>,
    registry: SchemaRegistry,
    config: EngineConfig,
}

impl Default for Engine {
    fn default() -> Self {
        EngineBuilder::default().build()
    }
}

fn raw(type_id: Option<u32>, type_name: String, bytes: &[u8]) -> WrappedValue {
    WrappedValue::Message {
        type_id,
        type_name,
        payload: Payload::RawBytes(bytes.to_vec()),
    }
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    pub fn table(&self) -> &TypeTable {
        &self.table
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Decode one wrapped value.
    ///
    /// The only error is [`DecodeError::Malformed`], for bytes that aren't a well-formed envelope.
    /// Anything that goes wrong further in (an unknown type id, a schema that won't load, a hook
    /// that fails) leaves the nested message as raw bytes instead.
    pub fn decode<'a>(
        &'a self,
        bytes: &'a [u8],
    ) -> BoxFuture<'a, Result<WrappedValue, DecodeError>> {
        self.decode_at(bytes, DepthTracker::new(self.config.max_depth))
    }

    pub(crate) fn decode_at<'a>(
        &'a self,
        bytes: &'a [u8],
        depth: DepthTracker,
    ) -> BoxFuture<'a, Result<WrappedValue, DecodeError>> {
        async move {
            Ok(match Envelope::parse(bytes)?.classify() {
                Classified::Value(value) => value,
                Classified::Enum {
                    type_id,
                    type_name,
                    number,
                } => {
                    let type_name = type_name
                        .or_else(|| {
                            type_id
                                .and_then(|id| self.table.resolve(id))
                                .map(|e| e.type_name().to_string())
                        })
                        .unwrap_or_else(|| UNKNOWN_TYPE_NAME.to_string());
                    WrappedValue::Scalar(Scalar::Enum { type_name, number })
                }
                Classified::Nested {
                    type_id,
                    type_name,
                    bytes,
                } => self.decode_nested(type_id, type_name, bytes, depth).await,
            })
        }
        .boxed()
    }

    async fn decode_nested(
        &self,
        type_id: Option<u32>,
        type_name: Option<String>,
        bytes: &[u8],
        depth: DepthTracker,
    ) -> WrappedValue {
        let type_id = match type_id {
            Some(id) => id,
            None => {
                let type_name = type_name.unwrap_or_else(|| UNKNOWN_TYPE_NAME.to_string());
                debug!(%type_name, "nested message has no type id");
                return raw(None, type_name, bytes);
            }
        };
        let entry = match self.table.resolve(type_id) {
            Some(entry) => entry,
            None => {
                warn!(type_id, "no dispatch entry for type id, keeping raw bytes");
                let type_name = type_name.unwrap_or_else(|| UNKNOWN_TYPE_NAME.to_string());
                return raw(Some(type_id), type_name, bytes);
            }
        };
        let type_name = type_name.unwrap_or_else(|| entry.type_name().to_string());

        let tree = match self.registry.load(entry.schema_file()).await {
            Ok(tree) => tree,
            Err(err) => {
                warn!(
                    type_id,
                    file = entry.schema_file(),
                    error = %err,
                    "schema unavailable, keeping raw bytes"
                );
                return raw(Some(type_id), type_name, bytes);
            }
        };
        let message = match tree.message(entry.type_name()) {
            Some(message) => message,
            None => {
                warn!(
                    type_id,
                    file = entry.schema_file(),
                    message = entry.type_name(),
                    "schema does not define the registered message"
                );
                return raw(Some(type_id), type_name, bytes);
            }
        };
        let fields = match FieldMap::decode(bytes, message, &tree) {
            Ok(fields) => fields,
            Err(err) => {
                warn!(type_id, error = %err, "nested message does not match its schema");
                return raw(Some(type_id), type_name, bytes);
            }
        };
        let hook = match entry.decode_hook() {
            Some(hook) => hook,
            None => {
                debug!(type_id, "no decode hook, keeping raw bytes");
                return raw(Some(type_id), type_name, bytes);
            }
        };

        let ctx = HookContext {
            engine: self,
            bytes,
            fields: &fields,
            type_id,
            entry,
            tree: &tree,
            depth,
        };
        match AssertUnwindSafe(hook.decode(ctx)).catch_unwind().await {
            Ok(Ok(Some(data))) => WrappedValue::Message {
                type_id: Some(type_id),
                type_name: data.type_name.clone(),
                payload: Payload::Decoded(data),
            },
            Ok(Ok(None)) => {
                warn!(type_id, "decode hook declined, keeping raw bytes");
                raw(Some(type_id), type_name, bytes)
            }
            Ok(Err(err)) => {
                warn!(type_id, error = %err, "decode hook failed, keeping raw bytes");
                raw(Some(type_id), type_name, bytes)
            }
            Err(_) => {
                warn!(type_id, "decode hook panicked, keeping raw bytes");
                raw(Some(type_id), type_name, bytes)
            }
        }
    }

    /// Render a decoded value for display.
    pub fn format(&self, value: &WrappedValue) -> String {
        crate::format::format(value, &self.table)
    }

    pub async fn decode_and_format(
        &self,
        bytes: &[u8],
    ) -> Result<(WrappedValue, String), DecodeError> {
        let value = self.decode(bytes).await?;
        let text = self.format(&value);
        Ok((value, text))
    }

    /// Decode a bare message of a registered type into a generic [`Value`], with no fallback: an
    /// unknown type id, a schema that won't load, or bytes that don't match the schema are all
    /// errors.
    pub async fn decode_fields(&self, type_id: u32, bytes: &[u8]) -> Result<Value> {
        let entry = self
            .table
            .resolve(type_id)
            .ok_or(Error::UnknownType(type_id))?;
        let tree = self.registry.load(entry.schema_file()).await?;
        let message = tree
            .message(entry.type_name())
            .ok_or_else(|| Error::MissingType {
                file: entry.schema_file().to_string(),
                type_name: entry.type_name().to_string(),
            })?;
        let fields = FieldMap::decode(bytes, message, &tree)?;
        Ok(fields.to_value(DepthTracker::new(self.config.max_depth)))
    }
}

/// Assembles an [`Engine`]. Unset parts default to the standard type table and the bundled
/// schemas.
#[derive(Default)]
pub struct EngineBuilder {
    config: EngineConfig,
    table: Option<TypeTable>,
    source: Option<Arc<dyn SchemaSource>>,
    registry: Option<SchemaRegistry>,
}

impl EngineBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn table(mut self, table: TypeTable) -> Self {
        self.table = Some(table);
        self
    }

    /// Fetch schemas from `source`, under the configured schema root.
    pub fn source(mut self, source: impl SchemaSource + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Share an existing registry and its cache. Takes precedence over `source`.
    pub fn registry(mut self, registry: SchemaRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn build(self) -> Engine {
        let EngineBuilder {
            config,
            table,
            source,
            registry,
        } = self;
        let registry = registry.unwrap_or_else(|| {
            let source = source.unwrap_or_else(|| Arc::new(MemorySource::builtin()));
            SchemaRegistry::new(source, config.schema_root.clone())
        });
        Engine {
            table: Arc::new(table.unwrap_or_else(TypeTable::standard)),
            registry,
            config,
        }
    }
}
