use super::types::{DefinedType, Schema};
use crate::error::{DocShelfError, Result};
use std::path::Path;

/// Parse a schema declaration file (`field: type` mapping, YAML or JSON).
pub fn parse_schema(path: &Path) -> Result<Schema> {
    let content = std::fs::read_to_string(path)?;
    parse_schema_str(&content)
}

/// Parse a schema declaration string. Field order follows the document.
pub fn parse_schema_str(content: &str) -> Result<Schema> {
    let doc: serde_yaml::Value = serde_yaml::from_str(content)?;
    let mapping = doc.as_mapping().ok_or_else(|| {
        DocShelfError::InvalidSchemaType("schema must be a mapping of field names to types".into())
    })?;

    let mut pairs = Vec::with_capacity(mapping.len());
    for (key, value) in mapping {
        let name = key.as_str().ok_or_else(|| {
            DocShelfError::InvalidSchemaType(format!("field name must be a string, got {key:?}"))
        })?;
        let type_name = value.as_str().ok_or_else(|| {
            DocShelfError::InvalidSchemaType(format!("type of field '{name}' must be a string"))
        })?;
        pairs.push((name.to_string(), type_name.parse::<DefinedType>()?));
    }

    Schema::from_pairs(pairs)
}
