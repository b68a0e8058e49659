use crate::document::Record;
use crate::error::{DocShelfError, Result};
use crate::schema::Schema;
use regex::Regex;
use std::sync::OnceLock;

/// Names of the built-in row columns a schema may not redeclare.
pub const RESERVED_FIELDS: [&str; 2] = ["id", "updated_at"];

/// Prefix of every internal table and column.
pub const INTERNAL_PREFIX: &str = "__";

fn identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern is valid")
    })
}

/// Whether `name` can be used as an unescaped SQL identifier.
pub fn is_identifier(name: &str) -> bool {
    identifier_pattern().is_match(name)
}

/// Validate a schema field name: a plain identifier outside the reserved names
/// and the internal namespace.
pub fn validate_field_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(DocShelfError::InvalidSchemaType(
            "field name must not be empty".into(),
        ));
    }
    if !is_identifier(name) {
        return Err(DocShelfError::InvalidSchemaType(format!(
            "field name '{name}' must match [A-Za-z_][A-Za-z0-9_]*"
        )));
    }
    if RESERVED_FIELDS.contains(&name) {
        return Err(DocShelfError::InvalidSchemaType(format!(
            "field name '{name}' is reserved"
        )));
    }
    if name.starts_with(INTERNAL_PREFIX) {
        return Err(DocShelfError::InvalidSchemaType(format!(
            "field name '{name}' uses the reserved '{INTERNAL_PREFIX}' prefix"
        )));
    }
    Ok(())
}

/// Validate a store name, which becomes the backing table name.
pub fn validate_store_name(name: &str) -> Result<()> {
    if !is_identifier(name) || name.starts_with(INTERNAL_PREFIX) {
        return Err(DocShelfError::Config(format!(
            "store name '{name}' must be an identifier not starting with '{INTERNAL_PREFIX}'"
        )));
    }
    Ok(())
}

/// Validate that every field in a record is declared by the schema.
pub fn validate_record(schema: &Schema, record: &Record) -> Result<()> {
    match record.keys().find(|k| schema.get(k).is_none()) {
        Some(unknown) => Err(DocShelfError::UnknownField(unknown.clone())),
        None => Ok(()),
    }
}

/// Validate a field projection and return it in the order given.
pub fn validate_projection<'a>(schema: &Schema, fields: &'a [String]) -> Result<&'a [String]> {
    if let Some(unknown) = fields.iter().find(|f| schema.get(f).is_none()) {
        return Err(DocShelfError::UnknownField(unknown.clone()));
    }
    Ok(fields)
}

/// Quote an identifier for use in SQL text.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Value;
    use crate::schema::DefinedType;

    #[test]
    fn test_identifiers() {
        assert!(is_identifier("name"));
        assert!(is_identifier("_private"));
        assert!(is_identifier("field_2"));
        assert!(!is_identifier("2field"));
        assert!(!is_identifier("na-me"));
        assert!(!is_identifier("na\"me"));
    }

    #[test]
    fn test_validate_field_name() {
        assert!(validate_field_name("email").is_ok());
        assert!(validate_field_name("id").is_err());
        assert!(validate_field_name("updated_at").is_err());
        assert!(validate_field_name("__len_email").is_err());
    }

    #[test]
    fn test_validate_store_name() {
        assert!(validate_store_name("users").is_ok());
        assert!(validate_store_name("__docshelf_fields").is_err());
        assert!(validate_store_name("users; DROP TABLE x").is_err());
    }

    #[test]
    fn test_validate_record_unknown_field() {
        let schema = Schema::new().field("name", DefinedType::String);
        let mut record = Record::new();
        record.insert("name".into(), Value::from("Ann"));
        assert!(validate_record(&schema, &record).is_ok());

        record.insert("nickname".into(), Value::from("A"));
        let err = validate_record(&schema, &record).unwrap_err();
        assert!(matches!(err, DocShelfError::UnknownField(f) if f == "nickname"));
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("age"), "\"age\"");
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
    }
}
