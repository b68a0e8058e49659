mod parser;
mod types;

pub use parser::{parse_schema, parse_schema_str};
pub use types::{
    ColumnAffinity, DefinedType, Field, Schema, HASH_COLUMN_PREFIX, LEN_COLUMN_PREFIX,
};
