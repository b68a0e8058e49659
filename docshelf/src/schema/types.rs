use crate::error::{DocShelfError, Result};
use crate::validation;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Prefix of the shadow column holding the content hash of a field.
pub const HASH_COLUMN_PREFIX: &str = "__hash_";
/// Prefix of the shadow column holding the stored byte length of a field.
pub const LEN_COLUMN_PREFIX: &str = "__len_";

/// The closed set of logical field types a schema may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefinedType {
    Number,
    String,
    Boolean,
    Datetime,
    Json,
    Blob,
    CompressedString,
    Other,
    NormalizedEmbedding,
}

/// Storage column affinity a field type maps onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnAffinity {
    Numeric,
    Text,
    /// Text column holding serialized JSON.
    StructuredText,
    Binary,
}

impl ColumnAffinity {
    /// Declared SQLite column type.
    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnAffinity::Numeric => "NUMERIC",
            ColumnAffinity::Text | ColumnAffinity::StructuredText => "TEXT",
            ColumnAffinity::Binary => "BLOB",
        }
    }
}

impl DefinedType {
    pub const ALL: [DefinedType; 9] = [
        DefinedType::Number,
        DefinedType::String,
        DefinedType::Boolean,
        DefinedType::Datetime,
        DefinedType::Json,
        DefinedType::Blob,
        DefinedType::CompressedString,
        DefinedType::Other,
        DefinedType::NormalizedEmbedding,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DefinedType::Number => "number",
            DefinedType::String => "string",
            DefinedType::Boolean => "boolean",
            DefinedType::Datetime => "datetime",
            DefinedType::Json => "json",
            DefinedType::Blob => "blob",
            DefinedType::CompressedString => "compressed_string",
            DefinedType::Other => "other",
            DefinedType::NormalizedEmbedding => "normalized_embedding",
        }
    }

    pub fn affinity(&self) -> ColumnAffinity {
        match self {
            DefinedType::Number | DefinedType::Boolean | DefinedType::Datetime => {
                ColumnAffinity::Numeric
            }
            DefinedType::String => ColumnAffinity::Text,
            DefinedType::Json => ColumnAffinity::StructuredText,
            DefinedType::Blob
            | DefinedType::CompressedString
            | DefinedType::Other
            | DefinedType::NormalizedEmbedding => ColumnAffinity::Binary,
        }
    }

    /// Whether equality on this type goes through a content-hash shadow column.
    pub fn is_content_addressed(&self) -> bool {
        matches!(self, DefinedType::Blob | DefinedType::Other)
    }

    /// Whether a stored value needs more than a direct cast when read back.
    pub fn needs_decode(&self) -> bool {
        !matches!(self, DefinedType::Number | DefinedType::String)
    }

    pub fn is_numeric(&self) -> bool {
        self.affinity() == ColumnAffinity::Numeric
    }

    /// Whether values of this type can be ordered and range-compared in SQL.
    pub fn is_orderable(&self) -> bool {
        matches!(
            self,
            DefinedType::Number
                | DefinedType::String
                | DefinedType::Boolean
                | DefinedType::Datetime
        )
    }
}

impl fmt::Display for DefinedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DefinedType {
    type Err = DocShelfError;

    fn from_str(s: &str) -> Result<Self> {
        DefinedType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| DocShelfError::InvalidSchemaType(format!("unknown field type '{s}'")))
    }
}

/// A single declared field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: DefinedType,
}

impl Field {
    pub fn hash_column(&self) -> Option<String> {
        self.ty
            .is_content_addressed()
            .then(|| format!("{HASH_COLUMN_PREFIX}{}", self.name))
    }

    pub fn len_column(&self) -> Option<String> {
        self.ty
            .is_content_addressed()
            .then(|| format!("{LEN_COLUMN_PREFIX}{}", self.name))
    }
}

/// Ordered mapping from field name to declared type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    fields: Vec<Field>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style field declaration. Validation happens in [`Schema::validate`].
    pub fn field(mut self, name: impl Into<String>, ty: DefinedType) -> Self {
        self.fields.push(Field {
            name: name.into(),
            ty,
        });
        self
    }

    /// Build and validate a schema from `(name, type)` pairs.
    pub fn from_pairs<I, S>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, DefinedType)>,
        S: Into<String>,
    {
        let schema = Schema {
            fields: pairs
                .into_iter()
                .map(|(name, ty)| Field {
                    name: name.into(),
                    ty,
                })
                .collect(),
        };
        schema.validate()?;
        Ok(schema)
    }

    /// Check every field name against the identifier and reserved-name rules.
    pub fn validate(&self) -> Result<()> {
        if self.fields.is_empty() {
            return Err(DocShelfError::InvalidSchemaType(
                "schema must declare at least one field".into(),
            ));
        }
        for (i, field) in self.fields.iter().enumerate() {
            validation::validate_field_name(&field.name)?;
            if self.fields[..i].iter().any(|f| f.name == field.name) {
                return Err(DocShelfError::InvalidSchemaType(format!(
                    "field '{}' is declared more than once",
                    field.name
                )));
            }
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<DefinedType> {
        self.fields.iter().find(|f| f.name == name).map(|f| f.ty)
    }

    pub fn get_field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
