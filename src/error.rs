use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failure to decode wrapped-value bytes.
///
/// This is the only error [`Engine::decode`][crate::Engine::decode] ever returns. Everything else
/// that can go wrong while decoding (unknown type ids, missing schemas, failing hooks) is absorbed
/// into a degraded [`WrappedValue`][crate::WrappedValue].
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The bytes do not parse against the schema they are being decoded with.
    #[error("malformed data: {0}")]
    Malformed(String),
}

impl DecodeError {
    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }
}

/// Failure to load a schema file.
///
/// Both variants are terminal for one `load` call only; the registry does not cache failures.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum SchemaError {
    /// The schema source could not produce the file.
    #[error("schema source unavailable for {file}: {reason}")]
    SourceUnavailable { file: String, reason: String },
    /// The schema text (or one of its imports) could not be parsed.
    #[error("failed to parse schema {file}: {reason}")]
    ParseError { file: String, reason: String },
}

impl SchemaError {
    /// Name of the schema file that failed.
    pub fn file(&self) -> &str {
        match self {
            SchemaError::SourceUnavailable { file, .. } => file,
            SchemaError::ParseError { file, .. } => file,
        }
    }
}

/// Errors for callers that accept no degraded fallback, see
/// [`Engine::decode_fields`][crate::Engine::decode_fields].
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum Error {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    /// The type id has no entry in the dispatch table.
    #[error("no dispatch entry for type id {0}")]
    UnknownType(u32),
    /// The dispatch entry names a message type its schema file does not define.
    #[error("schema {file} does not define message {type_name}")]
    MissingType { file: String, type_name: String },
}
