use crate::schema::DefinedType;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DocShelfError {
    #[error("Invalid schema: {0}")]
    InvalidSchemaType(String),

    #[error("Schema mismatch for store '{store}': field '{field}' {reason}")]
    SchemaMismatch {
        store: String,
        field: String,
        reason: String,
    },

    #[error("Store not found: {0}")]
    StoreNotFound(String),

    #[error("Invalid embedding: {0}")]
    InvalidEmbedding(String),

    #[error("Unknown field: {0}")]
    UnknownField(String),

    #[error("Unsupported operator: {0}")]
    UnsupportedOperator(String),

    #[error("Key not found in store '{store}': {}", ids.join(", "))]
    KeyNotFound { store: String, ids: Vec<String> },

    #[error("Invalid aggregate field: {0}")]
    InvalidAggregateField(String),

    #[error("Field '{field}' expects a {expected} value, got {found}")]
    TypeMismatch {
        field: String,
        expected: DefinedType,
        found: String,
    },

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, DocShelfError>;
