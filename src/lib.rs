//! wrapped-pack decodes self-describing wrapped values: protobuf envelopes that carry exactly one
//! of a scalar, an empty marker, or a nested message tagged with a numeric type id.
//!
//! Decoding a value works out from the bytes alone what they hold:
//!
//! - Scalars decode directly, with dates and instants rendered to ISO-8601 on the way.
//! - Nested messages are looked up by type id in a [`TypeTable`]. The entry names the schema file
//!   describing the type, which the [`SchemaRegistry`] loads on first use (imports included) and
//!   keeps for the life of the process.
//! - A type's [`DecodeHook`] then turns the message into structured data. Container types, whose
//!   elements are further wrapped values, decode each element with the same engine, so containers
//!   nest to any depth the engine allows.
//!
//! Only bytes that aren't a well-formed envelope fail a decode. Unknown type ids, schemas that
//! won't load, and hooks that fail all leave the nested message as raw bytes, and a failed
//! element inside a container is kept as raw bytes alongside its decoded siblings.
//!
//! Schema text comes from a [`SchemaSource`]. [`MemorySource::builtin`] carries the bundled
//! schemas. [`FileSource`] reads from disk with blocking calls, so it only suits blocking
//! executors such as `block_on`. An async runtime wants a source built on non-blocking reads.
//!
//! ```
//! use wrapped_pack::{encode, Engine, Scalar};
//!
//! let engine = Engine::default();
//! let bytes = encode::wrap_scalar(&Scalar::String("hello".into()));
//! let (value, text) = futures_executor::block_on(engine.decode_and_format(&bytes)).unwrap();
//! assert_eq!(value.as_scalar(), Some(&Scalar::String("hello".into())));
//! assert_eq!(text, "hello");
//! ```

mod bucket;
mod config;
mod depth_tracking;
mod dispatch;
mod element;
mod engine;
mod envelope;
mod error;
mod format;
mod scalar;
mod timestamp;
mod value;
mod varint;

pub mod encode;
pub mod schema;

pub use self::bucket::{BucketDecoder, JsonBucketDecoder};
pub use self::config::EngineConfig;
pub use self::depth_tracking::{DepthTracker, DEFAULT_MAX_DEPTH};
pub use self::dispatch::{
    CollectionKind, DecodeHook, FormatHook, HookContext, TypeEntry, TypeTable, TypeTableBuilder,
    BUCKETS_SCHEMA, HASH_MAP_BUCKET_ID, JSON_BUCKET_ID, LIST_BUCKET_ID, SET_BUCKET_ID,
};
pub use self::engine::{Engine, EngineBuilder};
pub use self::envelope::{BucketData, Payload, WrappedValue, UNKNOWN_TYPE_NAME};
pub use self::error::{DecodeError, Error, Result, SchemaError};
pub use self::format::format;
pub use self::scalar::{Scalar, ScalarKind};
pub use self::schema::{
    FieldMap, FieldValue, FileSource, MemorySource, SchemaRegistry, SchemaSource, SchemaTree,
};
pub use self::timestamp::Timestamp;
pub use self::value::Value;
