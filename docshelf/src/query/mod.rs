//! Predicate compiler.
//!
//! Translates a nested, MongoDB-like predicate document into a SQLite filter
//! expression and its ordered parameter list. Compilation is a pure recursive
//! walk: every step returns its own [`Filter`] fragment and the caller
//! concatenates SQL and parameters in the same order.
//!
//! Column identifiers come only from the validated schema. Every comparison
//! value and every JSON path is bound as a parameter.

mod json_path;

pub use json_path::JsonPath;

use crate::codec::Codec;
use crate::error::{DocShelfError, Result};
use crate::schema::{DefinedType, Schema, HASH_COLUMN_PREFIX};
use crate::validation::quote_ident;
use rusqlite::types::Value as SqlValue;
use serde_json::{Map, Value as JsonValue};
use std::fmt;

/// Table alias every compiled expression qualifies its columns with.
pub const DOC_ALIAS: &str = "doc";

const TRUE_SQL: &str = "1";
const FALSE_SQL: &str = "0";

/// A compiled filter expression and its bound parameters, in placeholder order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl Filter {
    /// A filter matching every row.
    pub fn match_all() -> Self {
        Filter::raw(TRUE_SQL)
    }

    fn raw(sql: impl Into<String>) -> Self {
        Filter {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    fn push(&mut self, sql: &str) -> &mut Self {
        self.sql.push_str(sql);
        self
    }

    fn bind(&mut self, value: SqlValue) -> &mut Self {
        self.sql.push('?');
        self.params.push(value);
        self
    }

    fn append(&mut self, other: Filter) -> &mut Self {
        self.sql.push_str(&other.sql);
        self.params.extend(other.params);
        self
    }

    fn finish(&mut self) -> Filter {
        std::mem::take(self)
    }

    fn negated(self) -> Filter {
        let mut out = Filter::raw("NOT (");
        out.append(self).push(")");
        out
    }

    /// Join parts with a boolean operator, parenthesizing each when there is
    /// more than one. No parts yields `empty`.
    fn join(parts: Vec<Filter>, op: &str, empty: &str) -> Filter {
        match parts.len() {
            0 => Filter::raw(empty),
            1 => parts.into_iter().next().unwrap_or_default(),
            _ => {
                let mut out = Filter::default();
                for (i, part) in parts.into_iter().enumerate() {
                    if i > 0 {
                        out.push(op);
                    }
                    out.push("(").append(part).push(")");
                }
                out
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    StartsWith,
    EndsWith,
    In,
    Nin,
    Exists,
    And,
    Or,
}

impl Operator {
    fn parse(key: &str) -> Option<Self> {
        let op = match key {
            "$eq" => Operator::Eq,
            "$ne" => Operator::Ne,
            "$gt" => Operator::Gt,
            "$gte" => Operator::Gte,
            "$lt" => Operator::Lt,
            "$lte" => Operator::Lte,
            "$like" => Operator::Like,
            "$startswith" => Operator::StartsWith,
            "$endswith" => Operator::EndsWith,
            "$in" => Operator::In,
            "$nin" => Operator::Nin,
            "$exists" => Operator::Exists,
            "$and" => Operator::And,
            "$or" => Operator::Or,
            _ => return None,
        };
        Some(op)
    }

    fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "$eq",
            Operator::Ne => "$ne",
            Operator::Gt => "$gt",
            Operator::Gte => "$gte",
            Operator::Lt => "$lt",
            Operator::Lte => "$lte",
            Operator::Like => "$like",
            Operator::StartsWith => "$startswith",
            Operator::EndsWith => "$endswith",
            Operator::In => "$in",
            Operator::Nin => "$nin",
            Operator::Exists => "$exists",
            Operator::And => "$and",
            Operator::Or => "$or",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a predicate value is compared against.
#[derive(Debug, Clone)]
enum Target<'a> {
    Column { name: &'a str, ty: DefinedType },
    /// A sub-path of a `json` column.
    Path { column: &'a str, path: JsonPath },
}

fn column_sql(name: &str) -> String {
    format!("{DOC_ALIAS}.{}", quote_ident(name))
}

impl<'a> Target<'a> {
    fn is_structured(&self) -> bool {
        matches!(
            self,
            Target::Path { .. }
                | Target::Column {
                    ty: DefinedType::Json,
                    ..
                }
        )
    }

    fn label(&self) -> String {
        match self {
            Target::Column { name, .. } => name.to_string(),
            Target::Path { column, path } => path.dotted(column),
        }
    }

    fn narrow(&self, key: &str) -> Result<Target<'a>> {
        match self {
            Target::Column { name, .. } => Ok(Target::Path {
                column: *name,
                path: JsonPath::root().child(key)?,
            }),
            Target::Path { column, path } => Ok(Target::Path {
                column: *column,
                path: path.child(key)?,
            }),
        }
    }

    /// `json_extract` style call on the path, or the bare column.
    fn call(&self, function: &str) -> Filter {
        match self {
            Target::Column { name, .. } => Filter::raw(column_sql(name)),
            Target::Path { column, path } => {
                let mut f = Filter::raw(format!("{function}({}, ", column_sql(column)));
                f.bind(SqlValue::Text(path.render())).push(")");
                f.finish()
            }
        }
    }

    /// Table-valued source iterating the elements of a structured target.
    fn elements(&self) -> Filter {
        match self {
            Target::Column { name, .. } => Filter::raw(format!("json_each({})", column_sql(name))),
            Target::Path { .. } => self.call("json_each"),
        }
    }

    /// Matches rows whose value is null. On a sub-path this means the path is
    /// present and holds JSON null, which is distinct from an absent path.
    fn null_test(&self) -> Filter {
        match self {
            Target::Column { .. } => {
                let mut f = self.call("json_extract");
                f.push(" IS NULL");
                f.finish()
            }
            Target::Path { .. } => {
                let mut f = self.call("json_type");
                f.push(" = 'null'");
                f.finish()
            }
        }
    }

    /// Matches rows holding a non-null value.
    fn not_null_test(&self) -> Filter {
        let mut f = self.call("json_extract");
        f.push(" IS NOT NULL");
        f.finish()
    }
}

/// Compile a predicate document against a schema. `null` and `{}` match
/// everything.
pub fn compile(schema: &Schema, codec: &Codec, predicate: &JsonValue) -> Result<Filter> {
    if predicate.is_null() {
        return Ok(Filter::match_all());
    }
    let filter = Compiler { schema, codec }.document(predicate)?;
    log::debug!("compiled predicate {predicate} -> {}", filter.sql);
    Ok(filter)
}

struct Compiler<'a> {
    schema: &'a Schema,
    codec: &'a Codec,
}

impl<'a> Compiler<'a> {
    /// A predicate document: field names and top-level `$and`/`$or`.
    fn document(&self, doc: &JsonValue) -> Result<Filter> {
        let obj = doc.as_object().ok_or_else(|| {
            DocShelfError::InvalidQuery(format!("predicate must be an object, got {doc}"))
        })?;

        let mut parts = Vec::with_capacity(obj.len());
        for (key, value) in obj {
            let part = match key.as_str() {
                "$and" => self.logical(Operator::And, value, |child| self.document(child))?,
                "$or" => self.logical(Operator::Or, value, |child| self.document(child))?,
                op if op.starts_with('$') => {
                    return Err(DocShelfError::UnsupportedOperator(op.to_string()))
                }
                field => {
                    let field = self
                        .schema
                        .get_field(field)
                        .ok_or_else(|| DocShelfError::UnknownField(field.to_string()))?;
                    let target = Target::Column {
                        name: &field.name,
                        ty: field.ty,
                    };
                    self.field(&target, value)?
                }
            };
            parts.push(part);
        }
        Ok(Filter::join(parts, " AND ", TRUE_SQL))
    }

    fn logical<F>(&self, op: Operator, value: &JsonValue, compile_child: F) -> Result<Filter>
    where
        F: Fn(&JsonValue) -> Result<Filter>,
    {
        let children = value.as_array().ok_or_else(|| {
            DocShelfError::InvalidQuery(format!("{op} expects an array, got {value}"))
        })?;
        let parts = children
            .iter()
            .map(compile_child)
            .collect::<Result<Vec<_>>>()?;
        Ok(match op {
            Operator::Or => Filter::join(parts, " OR ", FALSE_SQL),
            _ => Filter::join(parts, " AND ", TRUE_SQL),
        })
    }

    /// The value of one field key: literal, list literal or operator document.
    ///
    /// A list is membership except on embedding and `other` columns, where it
    /// is the stored value itself. A list-valued `other` payload is matched by
    /// its digest like an object payload; use `$in` for membership there.
    fn field(&self, target: &Target<'_>, value: &JsonValue) -> Result<Filter> {
        match value {
            JsonValue::Object(map) => self.object(target, map),
            JsonValue::Array(items) => match target {
                Target::Column {
                    ty: DefinedType::NormalizedEmbedding | DefinedType::Other,
                    ..
                } => self.equals(target, value),
                _ => self.membership(target, &items.iter().collect::<Vec<_>>()),
            },
            _ => self.equals(target, value),
        }
    }

    fn object(&self, target: &Target<'_>, map: &Map<String, JsonValue>) -> Result<Filter> {
        if let Target::Column {
            ty: DefinedType::Other,
            ..
        } = target
        {
            if !map.keys().any(|k| k.starts_with('$')) {
                return self.equals(target, &JsonValue::Object(map.clone()));
            }
        }

        let mut parts = Vec::with_capacity(map.len());
        for (key, arg) in map {
            if key.starts_with('$') {
                let op = Operator::parse(key)
                    .ok_or_else(|| DocShelfError::UnsupportedOperator(key.clone()))?;
                parts.push(self.operator(target, op, arg)?);
            } else if target.is_structured() {
                parts.push(self.field(&target.narrow(key)?, arg)?);
            } else {
                return Err(DocShelfError::UnknownField(format!(
                    "{}.{key}",
                    target.label()
                )));
            }
        }
        Ok(Filter::join(parts, " AND ", TRUE_SQL))
    }

    fn operator(&self, target: &Target<'_>, op: Operator, arg: &JsonValue) -> Result<Filter> {
        match op {
            Operator::Eq => self.equals(target, arg),
            Operator::Ne => self.not_equals(target, arg),
            Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte => {
                self.compare(target, op, arg)
            }
            Operator::Like | Operator::StartsWith | Operator::EndsWith => {
                self.pattern(target, op, arg)
            }
            Operator::In => {
                let items = list_argument(op, arg)?;
                self.membership(target, &items.iter().collect::<Vec<_>>())
            }
            Operator::Nin => self.exclusion(target, list_argument(op, arg)?),
            Operator::Exists => {
                let exists = arg.as_bool().ok_or_else(|| {
                    DocShelfError::InvalidQuery(format!("$exists expects a boolean, got {arg}"))
                })?;
                let mut f = target.call("json_type");
                f.push(if exists { " IS NOT NULL" } else { " IS NULL" });
                Ok(f.finish())
            }
            Operator::And | Operator::Or => {
                self.logical(op, arg, |child| self.field(target, child))
            }
        }
    }

    /// Left-hand side and bound value of a comparison with a non-null literal.
    ///
    /// Content-addressed fields compare the shadow hash of the encoded literal;
    /// `json` columns compare serialized JSON text.
    fn operand(&self, target: &Target<'_>, literal: &JsonValue) -> Result<(Filter, SqlValue)> {
        match target {
            Target::Path { .. } => Ok((target.call("json_extract"), json_param(literal))),
            Target::Column {
                name,
                ty: DefinedType::Json,
            } => Ok((
                Filter::raw(column_sql(name)),
                SqlValue::Text(serde_json::to_string(literal)?),
            )),
            Target::Column { name, ty } if ty.is_content_addressed() => {
                let encoded = self.codec.encode_json(name, *ty, literal)?;
                let digest = encoded.digest.ok_or_else(|| {
                    DocShelfError::Codec(format!("no digest computed for field '{name}'"))
                })?;
                Ok((
                    Filter::raw(column_sql(&format!("{HASH_COLUMN_PREFIX}{name}"))),
                    SqlValue::Text(digest.hash),
                ))
            }
            Target::Column { name, ty } => {
                let encoded = self.codec.encode_json(name, *ty, literal)?;
                Ok((Filter::raw(column_sql(name)), encoded.value))
            }
        }
    }

    fn equals(&self, target: &Target<'_>, literal: &JsonValue) -> Result<Filter> {
        if literal.is_null() {
            return Ok(target.null_test());
        }
        let (mut lhs, value) = self.operand(target, literal)?;
        lhs.push(" = ").bind(value);
        Ok(lhs.finish())
    }

    fn not_equals(&self, target: &Target<'_>, literal: &JsonValue) -> Result<Filter> {
        if literal.is_null() {
            return Ok(target.not_null_test());
        }
        let (lhs, value) = self.operand(target, literal)?;
        let mut f = Filter::raw("(");
        f.append(lhs.clone()).push(" != ").bind(value);
        f.push(" OR ").append(lhs).push(" IS NULL)");
        Ok(f.finish())
    }

    fn compare(&self, target: &Target<'_>, op: Operator, literal: &JsonValue) -> Result<Filter> {
        if literal.is_null() {
            return Err(DocShelfError::InvalidQuery(format!(
                "{op} on '{}' needs a non-null value",
                target.label()
            )));
        }
        match target {
            Target::Column { name, ty } if !ty.is_orderable() => {
                return Err(DocShelfError::UnsupportedOperator(format!(
                    "{op} on {ty} field '{name}'"
                )))
            }
            Target::Path { .. } if literal.is_object() || literal.is_array() => {
                return Err(DocShelfError::InvalidQuery(format!(
                    "{op} on '{}' needs a scalar value",
                    target.label()
                )))
            }
            _ => {}
        }
        let symbol = match op {
            Operator::Gt => " > ",
            Operator::Gte => " >= ",
            Operator::Lt => " < ",
            _ => " <= ",
        };
        let (mut lhs, value) = self.operand(target, literal)?;
        lhs.push(symbol).bind(value);
        Ok(lhs.finish())
    }

    fn pattern(&self, target: &Target<'_>, op: Operator, arg: &JsonValue) -> Result<Filter> {
        let text = arg.as_str().ok_or_else(|| {
            DocShelfError::InvalidQuery(format!("{op} expects a string, got {arg}"))
        })?;
        let (pattern, escape) = match op {
            Operator::StartsWith => (format!("{}%", escape_like(text)), " ESCAPE '\\'"),
            Operator::EndsWith => (format!("%{}", escape_like(text)), " ESCAPE '\\'"),
            _ => (text.to_string(), ""),
        };

        let mut f = Filter::default();
        match target {
            Target::Column {
                name,
                ty: DefinedType::String,
            } => {
                f.push(&column_sql(name)).push(" LIKE ");
            }
            Target::Column { name, ty } if *ty != DefinedType::Json => {
                return Err(DocShelfError::UnsupportedOperator(format!(
                    "{op} on {ty} field '{name}'"
                )))
            }
            _ => {
                f.push("EXISTS (SELECT 1 FROM ")
                    .append(target.elements())
                    .push(" AS je WHERE je.value LIKE ");
            }
        }
        f.bind(SqlValue::Text(pattern)).push(escape);
        if target.is_structured() {
            f.push(")");
        }
        Ok(f.finish())
    }

    /// List membership.
    ///
    /// Scalar columns compile to `(col IN (...) OR col IS NULL)`: a list also
    /// matches rows where the field is null or was never written. Structured
    /// targets compile to a disjunction of per-element existential tests.
    fn membership(&self, target: &Target<'_>, items: &[&JsonValue]) -> Result<Filter> {
        if target.is_structured() {
            let parts = items
                .iter()
                .map(|item| self.element_test(target, item))
                .collect::<Result<Vec<_>>>()?;
            return Ok(Filter::join(parts, " OR ", FALSE_SQL));
        }

        let values: Vec<&JsonValue> = items.iter().copied().filter(|v| !v.is_null()).collect();
        if values.is_empty() {
            return Ok(target.null_test());
        }
        let mut f = Filter::raw("(");
        f.append(self.in_list(target, &values, " IN (")?);
        f.push(" OR ").append(target.null_test()).push(")");
        Ok(f.finish())
    }

    /// `$nin`: non-null values compile to `NOT IN (...)`; a `null` in the list
    /// additionally excludes null rows.
    ///
    /// Null rows never match a non-empty exclusion. On scalar columns `NOT IN`
    /// already yields NULL for them; structured targets need an explicit
    /// presence test because `json_each(NULL)` is empty.
    fn exclusion(&self, target: &Target<'_>, items: &[JsonValue]) -> Result<Filter> {
        let has_null = items.iter().any(JsonValue::is_null);
        let values: Vec<&JsonValue> = items.iter().filter(|v| !v.is_null()).collect();

        let mut parts = Vec::new();
        let mut require_present = has_null;
        if !values.is_empty() {
            if target.is_structured() {
                parts.push(self.membership(target, &values)?.negated());
                require_present = true;
            } else {
                parts.push(self.in_list(target, &values, " NOT IN (")?);
            }
        }
        if require_present {
            parts.push(target.not_null_test());
        }
        Ok(Filter::join(parts, " AND ", TRUE_SQL))
    }

    fn in_list(&self, target: &Target<'_>, values: &[&JsonValue], keyword: &str) -> Result<Filter> {
        let mut f = Filter::default();
        for (i, value) in values.iter().enumerate() {
            let (lhs, param) = self.operand(target, value)?;
            if i == 0 {
                f.append(lhs).push(keyword);
            } else {
                f.push(", ");
            }
            f.bind(param);
        }
        f.push(")");
        Ok(f.finish())
    }

    /// Whether any element of a structured target equals `item`.
    fn element_test(&self, target: &Target<'_>, item: &JsonValue) -> Result<Filter> {
        let mut f = Filter::raw("EXISTS (SELECT 1 FROM ");
        f.append(target.elements()).push(" AS je WHERE ");
        match item {
            JsonValue::Null => {
                f.push("je.type = 'null'");
            }
            JsonValue::Object(_) | JsonValue::Array(_) => {
                let kind = if item.is_object() { "object" } else { "array" };
                f.push(&format!("je.type = '{kind}' AND je.value = "))
                    .bind(SqlValue::Text(serde_json::to_string(item)?));
            }
            _ => {
                f.push("je.value = ").bind(json_param(item));
            }
        }
        f.push(")");
        Ok(f.finish())
    }
}

fn list_argument(op: Operator, arg: &JsonValue) -> Result<&[JsonValue]> {
    arg.as_array()
        .map(Vec::as_slice)
        .ok_or_else(|| DocShelfError::InvalidQuery(format!("{op} expects an array, got {arg}")))
}

/// Bind a JSON literal the way SQLite's JSON functions report scalars.
fn json_param(value: &JsonValue) -> SqlValue {
    match value {
        JsonValue::Null => SqlValue::Null,
        JsonValue::Bool(b) => SqlValue::Integer(i64::from(*b)),
        JsonValue::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        JsonValue::String(s) => SqlValue::Text(s.clone()),
        JsonValue::Array(_) | JsonValue::Object(_) => SqlValue::Text(value.to_string()),
    }
}

fn escape_like(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Compression, Digest};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn schema() -> Schema {
        Schema::new()
            .field("name", DefinedType::String)
            .field("age", DefinedType::Number)
            .field("verified", DefinedType::Boolean)
            .field("joined", DefinedType::Datetime)
            .field("profile", DefinedType::Json)
            .field("bio", DefinedType::CompressedString)
            .field("avatar", DefinedType::Blob)
            .field("payload", DefinedType::Other)
            .field("embedding", DefinedType::NormalizedEmbedding)
    }

    fn compile_ok(predicate: JsonValue) -> Filter {
        compile(&schema(), &Codec::default(), &predicate).unwrap()
    }

    fn compile_err(predicate: JsonValue) -> DocShelfError {
        compile(&schema(), &Codec::default(), &predicate).unwrap_err()
    }

    fn text(s: &str) -> SqlValue {
        SqlValue::Text(s.to_string())
    }

    #[test]
    fn test_empty_predicate_matches_all() {
        assert_eq!(compile_ok(json!({})), Filter::match_all());
        assert_eq!(compile_ok(JsonValue::Null), Filter::match_all());
    }

    #[test]
    fn test_scalar_equality() {
        let filter = compile_ok(json!({"name": "Ann"}));
        assert_eq!(filter.sql, "doc.\"name\" = ?");
        assert_eq!(filter.params, vec![text("Ann")]);
    }

    #[test]
    fn test_range_operator() {
        let filter = compile_ok(json!({"age": {"$gt": 25}}));
        assert_eq!(filter.sql, "doc.\"age\" > ?");
        assert_eq!(filter.params, vec![SqlValue::Integer(25)]);
    }

    #[test]
    fn test_multiple_fields_are_conjunction() {
        let filter = compile_ok(json!({"age": {"$gte": 18, "$lt": 65}, "verified": true}));
        assert_eq!(
            filter.sql,
            "((doc.\"age\" >= ?) AND (doc.\"age\" < ?)) AND (doc.\"verified\" = ?)"
        );
        assert_eq!(
            filter.params,
            vec![SqlValue::Integer(18), SqlValue::Integer(65), SqlValue::Integer(1)]
        );
    }

    #[test]
    fn test_datetime_literal_encoded_as_timestamp() {
        let filter = compile_ok(json!({"joined": {"$lt": "1970-01-01T00:01:00Z"}}));
        assert_eq!(filter.sql, "doc.\"joined\" < ?");
        assert_eq!(filter.params, vec![SqlValue::Real(60.0)]);
    }

    #[test]
    fn test_null_literal_is_null_test() {
        let filter = compile_ok(json!({"name": null}));
        assert_eq!(filter.sql, "doc.\"name\" IS NULL");
        assert!(filter.params.is_empty());

        let filter = compile_ok(json!({"name": {"$eq": null}}));
        assert_eq!(filter.sql, "doc.\"name\" IS NULL");
    }

    #[test]
    fn test_ne_includes_nulls() {
        let filter = compile_ok(json!({"name": {"$ne": "Ann"}}));
        assert_eq!(filter.sql, "(doc.\"name\" != ? OR doc.\"name\" IS NULL)");
        assert_eq!(filter.params, vec![text("Ann")]);

        let filter = compile_ok(json!({"name": {"$ne": null}}));
        assert_eq!(filter.sql, "doc.\"name\" IS NOT NULL");
    }

    #[test]
    fn test_list_literal_includes_nulls() {
        let filter = compile_ok(json!({"age": [30, 40]}));
        assert_eq!(filter.sql, "(doc.\"age\" IN (?, ?) OR doc.\"age\" IS NULL)");
        assert_eq!(filter.params, vec![SqlValue::Integer(30), SqlValue::Integer(40)]);

        let filter = compile_ok(json!({"age": {"$in": [30, null]}}));
        assert_eq!(filter.sql, "(doc.\"age\" IN (?) OR doc.\"age\" IS NULL)");

        let filter = compile_ok(json!({"age": []}));
        assert_eq!(filter.sql, "doc.\"age\" IS NULL");
    }

    #[test]
    fn test_nin_with_null() {
        let filter = compile_ok(json!({"age": {"$nin": [30, null]}}));
        assert_eq!(filter.sql, "(doc.\"age\" NOT IN (?)) AND (doc.\"age\" IS NOT NULL)");
        assert_eq!(filter.params, vec![SqlValue::Integer(30)]);

        let filter = compile_ok(json!({"age": {"$nin": [30]}}));
        assert_eq!(filter.sql, "doc.\"age\" NOT IN (?)");

        let filter = compile_ok(json!({"age": {"$nin": []}}));
        assert_eq!(filter, Filter::match_all());
    }

    #[test]
    fn test_logical_operators() {
        let filter = compile_ok(json!({"$or": [{"age": 30}, {"verified": false}]}));
        assert_eq!(filter.sql, "(doc.\"age\" = ?) OR (doc.\"verified\" = ?)");
        assert_eq!(filter.params, vec![SqlValue::Integer(30), SqlValue::Integer(0)]);

        assert_eq!(compile_ok(json!({"$or": []})).sql, "0");
        assert_eq!(compile_ok(json!({"$and": []})).sql, "1");

        let filter = compile_ok(json!({"age": {"$or": [{"$lt": 18}, {"$gt": 65}]}}));
        assert_eq!(filter.sql, "(doc.\"age\" < ?) OR (doc.\"age\" > ?)");
    }

    #[test]
    fn test_nested_logical_groups_keep_precedence() {
        let filter = compile_ok(json!({
            "$and": [
                {"$or": [{"age": 1}, {"age": 2}]},
                {"name": "Ann"}
            ]
        }));
        assert_eq!(
            filter.sql,
            "((doc.\"age\" = ?) OR (doc.\"age\" = ?)) AND (doc.\"name\" = ?)"
        );
    }

    #[test]
    fn test_pattern_operators() {
        let filter = compile_ok(json!({"name": {"$like": "A%"}}));
        assert_eq!(filter.sql, "doc.\"name\" LIKE ?");
        assert_eq!(filter.params, vec![text("A%")]);

        let filter = compile_ok(json!({"name": {"$startswith": "50%_"}}));
        assert_eq!(filter.sql, "doc.\"name\" LIKE ? ESCAPE '\\'");
        assert_eq!(filter.params, vec![text("50\\%\\_%")]);

        let filter = compile_ok(json!({"name": {"$endswith": "son"}}));
        assert_eq!(filter.params, vec![text("%son")]);
    }

    #[test]
    fn test_json_sub_path() {
        let filter = compile_ok(json!({"profile": {"address": {"city": "Oslo"}}}));
        assert_eq!(filter.sql, "json_extract(doc.\"profile\", ?) = ?");
        assert_eq!(filter.params, vec![text("$.\"address\".\"city\""), text("Oslo")]);
    }

    #[test]
    fn test_json_sub_path_null_and_exists() {
        let filter = compile_ok(json!({"profile": {"nickname": null}}));
        assert_eq!(filter.sql, "json_type(doc.\"profile\", ?) = 'null'");

        let filter = compile_ok(json!({"profile": {"nickname": {"$exists": false}}}));
        assert_eq!(filter.sql, "json_type(doc.\"profile\", ?) IS NULL");
        assert_eq!(filter.params, vec![text("$.\"nickname\"")]);
    }

    #[test]
    fn test_json_list_membership_is_existential() {
        let filter = compile_ok(json!({"profile": ["rust", 3]}));
        assert_eq!(
            filter.sql,
            "(EXISTS (SELECT 1 FROM json_each(doc.\"profile\") AS je WHERE je.value = ?)) \
             OR (EXISTS (SELECT 1 FROM json_each(doc.\"profile\") AS je WHERE je.value = ?))"
        );
        assert_eq!(filter.params, vec![text("rust"), SqlValue::Integer(3)]);
    }

    #[test]
    fn test_json_sub_path_membership() {
        let filter = compile_ok(json!({"profile": {"tags": {"$in": [null]}}}));
        assert_eq!(
            filter.sql,
            "EXISTS (SELECT 1 FROM json_each(doc.\"profile\", ?) AS je WHERE je.type = 'null')"
        );
        assert_eq!(filter.params, vec![text("$.\"tags\"")]);
    }

    #[test]
    fn test_json_nin_negates_membership() {
        let filter = compile_ok(json!({"profile": {"tags": {"$nin": ["x"]}}}));
        assert_eq!(
            filter.sql,
            "(NOT (EXISTS (SELECT 1 FROM json_each(doc.\"profile\", ?) AS je WHERE je.value = ?))) \
             AND (json_extract(doc.\"profile\", ?) IS NOT NULL)"
        );
        assert_eq!(
            filter.params,
            vec![text("$.\"tags\""), text("x"), text("$.\"tags\"")]
        );

        let filter = compile_ok(json!({"profile": {"$nin": ["x", null]}}));
        assert_eq!(
            filter.sql,
            "(NOT (EXISTS (SELECT 1 FROM json_each(doc.\"profile\") AS je WHERE je.value = ?))) \
             AND (doc.\"profile\" IS NOT NULL)"
        );
    }

    #[test]
    fn test_json_sub_path_range() {
        let filter = compile_ok(json!({"profile": {"age": {"$gt": 25}}}));
        assert_eq!(filter.sql, "json_extract(doc.\"profile\", ?) > ?");
        assert_eq!(filter.params, vec![text("$.\"age\""), SqlValue::Integer(25)]);
    }

    #[test]
    fn test_other_list_literal_is_payload() {
        let filter = compile_ok(json!({"payload": [1, 2]}));
        assert_eq!(filter.sql, "doc.\"__hash_payload\" = ?");
        assert_eq!(filter.params.len(), 1);

        let filter = compile_ok(json!({"payload": {"$in": [1, 2]}}));
        assert_eq!(
            filter.sql,
            "(doc.\"__hash_payload\" IN (?, ?) OR doc.\"payload\" IS NULL)"
        );
    }

    #[test]
    fn test_json_like_is_existential() {
        let filter = compile_ok(json!({"profile": {"$like": "ru%"}}));
        assert_eq!(
            filter.sql,
            "EXISTS (SELECT 1 FROM json_each(doc.\"profile\") AS je WHERE je.value LIKE ?)"
        );
    }

    #[test]
    fn test_json_whole_value_equality() {
        let filter = compile_ok(json!({"profile": {"$eq": {"a": 1}}}));
        assert_eq!(filter.sql, "doc.\"profile\" = ?");
        assert_eq!(filter.params, vec![text("{\"a\":1}")]);
    }

    #[test]
    fn test_content_addressed_equality_uses_hash() {
        let codec = Codec::new(Compression::Lz4);
        let filter = compile(&schema(), &codec, &json!({"payload": {"kind": "a"}})).unwrap();
        assert_eq!(filter.sql, "doc.\"__hash_payload\" = ?");

        let encoded = codec
            .encode_json("payload", DefinedType::Other, &json!({"kind": "a"}))
            .unwrap();
        let SqlValue::Blob(stored) = encoded.value else {
            panic!("expected blob");
        };
        assert_eq!(filter.params, vec![SqlValue::Text(Digest::of(&stored).hash)]);
    }

    #[test]
    fn test_content_addressed_membership() {
        let filter = compile_ok(json!({"avatar": {"$in": ["00ff", "ab"]}}));
        assert_eq!(
            filter.sql,
            "(doc.\"__hash_avatar\" IN (?, ?) OR doc.\"avatar\" IS NULL)"
        );
    }

    #[test]
    fn test_embedding_list_is_equality() {
        let filter = compile_ok(json!({"embedding": [1.0, 0.0]}));
        assert_eq!(filter.sql, "doc.\"embedding\" = ?");
        let mut bytes = 1.0f32.to_le_bytes().to_vec();
        bytes.extend(0.0f32.to_le_bytes());
        assert_eq!(filter.params, vec![SqlValue::Blob(bytes)]);
    }

    #[test]
    fn test_values_are_never_interpolated() {
        let hostile = "x'); DROP TABLE users; --";
        let mut profile = Map::new();
        profile.insert(hostile.to_string(), json!(1));
        let filter = compile_ok(json!({"name": hostile, "profile": profile}));
        assert!(!filter.sql.contains("DROP"));
        assert!(filter.params.contains(&text(hostile)));
    }

    #[test]
    fn test_unknown_field() {
        assert!(matches!(
            compile_err(json!({"email": "a@b"})),
            DocShelfError::UnknownField(f) if f == "email"
        ));
        assert!(matches!(
            compile_err(json!({"name": {"first": "Ann"}})),
            DocShelfError::UnknownField(f) if f == "name.first"
        ));
    }

    #[test]
    fn test_unsupported_operators() {
        assert!(matches!(
            compile_err(json!({"age": {"$regex": "x"}})),
            DocShelfError::UnsupportedOperator(_)
        ));
        assert!(matches!(
            compile_err(json!({"$nor": []})),
            DocShelfError::UnsupportedOperator(_)
        ));
        assert!(matches!(
            compile_err(json!({"avatar": {"$gt": "00"}})),
            DocShelfError::UnsupportedOperator(_)
        ));
        assert!(matches!(
            compile_err(json!({"bio": {"$like": "%x%"}})),
            DocShelfError::UnsupportedOperator(_)
        ));
    }

    #[test]
    fn test_malformed_arguments() {
        assert!(matches!(
            compile_err(json!({"age": {"$in": 3}})),
            DocShelfError::InvalidQuery(_)
        ));
        assert!(matches!(
            compile_err(json!({"age": {"$gt": null}})),
            DocShelfError::InvalidQuery(_)
        ));
        assert!(matches!(
            compile_err(json!({"$or": {"age": 1}})),
            DocShelfError::InvalidQuery(_)
        ));
        assert!(matches!(compile_err(json!([1, 2])), DocShelfError::InvalidQuery(_)));
        assert!(matches!(
            compile_err(json!({"age": "thirty"})),
            DocShelfError::TypeMismatch { .. }
        ));
    }
}
