mod distance;
mod search;

pub use distance::Distance;
pub use search::{Cursor, Nearest, Query, SearchResults, Sort, SortOrder};

use self::search::Plan;
use crate::codec::{
    coerce, datetime_to_timestamp, json_kind, timestamp_to_datetime, Codec, Compression,
};
use crate::document::{Document, Record, Value};
use crate::error::{DocShelfError, Result};
use crate::options::StoreOptions;
use crate::query::{self, Filter, DOC_ALIAS};
use crate::schema::{DefinedType, Field, Schema};
use crate::system_db::{verify_schema, SystemDb};
use crate::validation::{self, quote_ident};
use chrono::Utc;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params, params_from_iter, Row};
use serde_json::Value as JsonValue;
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Ids bound per statement when reading or deleting by id.
const ID_CHUNK: usize = 500;

/// A named, schema-typed document store backed by one SQLite table.
///
/// Each store owns its connection. `Store` is `Send` but not `Sync`: share it
/// across threads behind a lock.
pub struct Store {
    name: String,
    table: String,
    schema: Schema,
    codec: Codec,
    options: StoreOptions,
    db: SystemDb,
}

impl Store {
    /// Open (or create) the store `name` in the database file at `path`.
    ///
    /// With a schema, a new store is created from it, or an existing store is
    /// verified against it. Without one, the persisted schema is loaded and a
    /// missing store is an error.
    pub fn open(
        path: impl AsRef<Path>,
        name: &str,
        schema: Option<Schema>,
        options: StoreOptions,
    ) -> Result<Self> {
        let db = SystemDb::open(path.as_ref(), &options)?;
        Self::from_db(db, name, schema, options)
    }

    /// Open a store in a private in-memory database (for testing).
    pub fn open_in_memory(name: &str, schema: Option<Schema>, options: StoreOptions) -> Result<Self> {
        Self::from_db(SystemDb::open_in_memory()?, name, schema, options)
    }

    pub fn from_db(
        db: SystemDb,
        name: &str,
        schema: Option<Schema>,
        options: StoreOptions,
    ) -> Result<Self> {
        validation::validate_store_name(name)?;
        distance::register(db.conn())?;

        let (schema, compression) = match (db.load_schema(name)?, schema) {
            (Some(stored), supplied) => {
                if let Some(supplied) = supplied {
                    supplied.validate()?;
                    verify_schema(name, &stored, &supplied)?;
                }
                let compression =
                    resolve_compression(name, db.stored_compression(name)?, options.compression)?;
                log::debug!("opened store '{name}' ({compression})");
                (stored, compression)
            }
            (None, Some(supplied)) => {
                supplied.validate()?;
                let compression = options.compression.unwrap_or_default();
                let tx = db.transaction()?;
                db.conn().execute_batch(&create_table_sql(name, &supplied))?;
                db.record_store(name, &supplied, compression)?;
                tx.commit()?;
                log::info!(
                    "created store '{name}' with {} fields ({compression})",
                    supplied.len()
                );
                (supplied, compression)
            }
            (None, None) => return Err(DocShelfError::StoreNotFound(name.to_string())),
        };

        Ok(Store {
            name: name.to_string(),
            table: quote_ident(name),
            schema,
            codec: Codec::new(compression),
            options,
            db,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn compression(&self) -> Compression {
        self.codec.compression()
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    pub fn system_db(&self) -> &SystemDb {
        &self.db
    }

    /// Give up the store and keep its connection, e.g. to open a sibling store.
    pub fn into_db(self) -> SystemDb {
        self.db
    }

    /// Drop the backing table, its indexes and all metadata of this store.
    pub fn destroy(self) -> Result<()> {
        let tx = self.db.transaction()?;
        self.db
            .conn()
            .execute_batch(&format!("DROP TABLE IF EXISTS {}", self.table))?;
        self.db.forget_store(&self.name)?;
        tx.commit()?;
        log::info!("destroyed store '{}'", self.name);
        Ok(())
    }

    // ── Writes ───────────────────────────────────────────────────────

    /// Insert or replace the document `id`. Fields absent from the record are
    /// stored as null.
    pub fn upsert(&self, id: &str, record: &Record) -> Result<()> {
        self.write_row(id, record)?;
        log::debug!("upserted '{id}' into '{}'", self.name);
        Ok(())
    }

    /// Upsert many documents in one transaction. Nothing is written if any
    /// document fails.
    pub fn upsert_many<I, S>(&self, items: I) -> Result<usize>
    where
        I: IntoIterator<Item = (S, Record)>,
        S: AsRef<str>,
    {
        let tx = self.db.transaction()?;
        let mut written = 0;
        for (id, record) in items {
            self.write_row(id.as_ref(), &record)?;
            written += 1;
        }
        tx.commit()?;
        log::debug!("upserted {written} documents into '{}'", self.name);
        Ok(written)
    }

    /// Upsert a document given as a JSON object.
    pub fn upsert_json(&self, id: &str, document: &JsonValue) -> Result<()> {
        let record = self.record_from_json(document)?;
        self.upsert(id, &record)
    }

    /// Upsert under a freshly generated id and return it.
    pub fn insert(&self, record: &Record) -> Result<String> {
        let id = self.options.id_strategy.generate();
        self.write_row(&id, record)?;
        Ok(id)
    }

    /// Overwrite only the fields present in `record`.
    pub fn update(&self, id: &str, record: &Record) -> Result<()> {
        validation::validate_record(&self.schema, record)?;

        let mut columns = vec![("updated_at".to_string(), SqlValue::Real(now()))];
        columns.extend(self.encode_columns(
            self.schema
                .fields()
                .iter()
                .filter(|f| record.contains_key(&f.name)),
            record,
        )?);

        let assignments = columns
            .iter()
            .map(|(column, _)| format!("{} = ?", quote_ident(column)))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!("UPDATE {} SET {assignments} WHERE id = ?", self.table);

        let mut values: Vec<SqlValue> = columns.into_iter().map(|(_, v)| v).collect();
        values.push(SqlValue::Text(id.to_string()));
        let changed = self
            .db
            .conn()
            .execute(&sql, params_from_iter(values.iter()))?;
        if changed == 0 {
            return Err(self.not_found(vec![id.to_string()]));
        }
        Ok(())
    }

    pub fn update_json(&self, id: &str, fields: &JsonValue) -> Result<()> {
        let record = self.record_from_json(fields)?;
        self.update(id, &record)
    }

    fn write_row(&self, id: &str, record: &Record) -> Result<()> {
        validation::validate_record(&self.schema, record)?;

        let mut columns = vec![
            ("id".to_string(), SqlValue::Text(id.to_string())),
            ("updated_at".to_string(), SqlValue::Real(now())),
        ];
        columns.extend(self.encode_columns(self.schema.fields().iter(), record)?);

        let names: Vec<String> = columns.iter().map(|(c, _)| quote_ident(c)).collect();
        let updates = names
            .iter()
            .skip(1)
            .map(|c| format!("{c} = excluded.{c}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT(id) DO UPDATE SET {updates}",
            self.table,
            names.join(", "),
            placeholders(names.len()),
        );

        let mut stmt = self.db.conn().prepare_cached(&sql)?;
        stmt.execute(params_from_iter(columns.iter().map(|(_, v)| v)))?;
        Ok(())
    }

    /// Encode the given fields of a record into (column, value) pairs,
    /// shadow columns included. Missing fields encode as null.
    fn encode_columns<'f>(
        &self,
        fields: impl Iterator<Item = &'f Field>,
        record: &Record,
    ) -> Result<Vec<(String, SqlValue)>> {
        let mut columns = Vec::new();
        for field in fields {
            let value = record.get(&field.name).unwrap_or(&Value::Null);
            let encoded = self.codec.encode(&field.name, field.ty, value)?;
            columns.push((field.name.clone(), encoded.value));

            if let (Some(hash_column), Some(len_column)) = (field.hash_column(), field.len_column())
            {
                let (hash, len) = match encoded.digest {
                    Some(digest) => (SqlValue::Text(digest.hash), SqlValue::Integer(digest.len)),
                    None => (SqlValue::Null, SqlValue::Null),
                };
                columns.push((hash_column, hash));
                columns.push((len_column, len));
            }
        }
        Ok(columns)
    }

    fn record_from_json(&self, document: &JsonValue) -> Result<Record> {
        let obj = document.as_object().ok_or_else(|| {
            DocShelfError::Codec(format!(
                "a document must be a JSON object, got {}",
                json_kind(document)
            ))
        })?;
        let mut record = Record::new();
        for (key, value) in obj {
            let ty = self
                .schema
                .get(key)
                .ok_or_else(|| DocShelfError::UnknownField(key.clone()))?;
            record.insert(key.clone(), coerce(key, ty, value)?);
        }
        Ok(record)
    }

    // ── Reads ────────────────────────────────────────────────────────

    pub fn get(&self, id: &str) -> Result<Document> {
        self.get_many(&[id], None)?
            .into_iter()
            .next()
            .ok_or_else(|| self.not_found(vec![id.to_string()]))
    }

    /// Fetch one document, decoding only the named fields.
    pub fn get_fields(&self, id: &str, fields: &[String]) -> Result<Document> {
        self.get_many(&[id], Some(fields))?
            .into_iter()
            .next()
            .ok_or_else(|| self.not_found(vec![id.to_string()]))
    }

    /// Fetch documents in the order of `ids`. Fails with `KeyNotFound` listing
    /// every missing id.
    pub fn get_many<S: AsRef<str>>(
        &self,
        ids: &[S],
        fields: Option<&[String]>,
    ) -> Result<Vec<Document>> {
        let ids: Vec<&str> = ids.iter().map(AsRef::as_ref).collect();
        let fields = self.projection(fields)?;
        let found = self.fetch_by_ids(&ids, &fields)?;

        let mut missing: Vec<String> = Vec::new();
        for id in &ids {
            if !found.contains_key(*id) && !missing.iter().any(|m| m == id) {
                missing.push(id.to_string());
            }
        }
        if !missing.is_empty() {
            return Err(self.not_found(missing));
        }
        Ok(ids.iter().filter_map(|id| found.get(*id).cloned()).collect())
    }

    /// Like [`Store::get_many`], skipping missing ids.
    pub fn get_many_partial<S: AsRef<str>>(
        &self,
        ids: &[S],
        fields: Option<&[String]>,
    ) -> Result<Vec<Document>> {
        let ids: Vec<&str> = ids.iter().map(AsRef::as_ref).collect();
        let fields = self.projection(fields)?;
        let found = self.fetch_by_ids(&ids, &fields)?;
        Ok(ids.iter().filter_map(|id| found.get(*id).cloned()).collect())
    }

    pub fn contains(&self, id: &str) -> Result<bool> {
        let sql = format!("SELECT EXISTS(SELECT 1 FROM {} WHERE id = ?1)", self.table);
        let exists: bool = self.db.conn().query_row(&sql, params![id], |row| row.get(0))?;
        Ok(exists)
    }

    fn fetch_by_ids(&self, ids: &[&str], fields: &[Field]) -> Result<HashMap<String, Document>> {
        let mut found = HashMap::with_capacity(ids.len());
        for chunk in ids.chunks(ID_CHUNK) {
            let sql = format!(
                "SELECT {} FROM {} AS {DOC_ALIAS} WHERE {DOC_ALIAS}.id IN ({})",
                select_list(fields),
                self.table,
                placeholders(chunk.len())
            );
            let mut stmt = self.db.conn().prepare(&sql)?;
            let mut rows = stmt.query(params_from_iter(chunk.iter()))?;
            while let Some(row) = rows.next()? {
                let doc = self.decode_row(row, fields, false)?;
                found.insert(doc.id.clone(), doc);
            }
        }
        Ok(found)
    }

    fn projection(&self, fields: Option<&[String]>) -> Result<Vec<Field>> {
        match fields {
            None => Ok(self.schema.fields().to_vec()),
            Some(names) => Ok(validation::validate_projection(&self.schema, names)?
                .iter()
                .filter_map(|name| self.schema.get_field(name).cloned())
                .collect()),
        }
    }

    fn decode_row(&self, row: &Row<'_>, fields: &[Field], with_distance: bool) -> Result<Document> {
        let id: String = row.get(0)?;
        let stamp: f64 = row.get(1)?;
        let updated_at = timestamp_to_datetime(stamp).ok_or_else(|| {
            DocShelfError::Codec(format!("document '{id}' has an invalid updated_at {stamp}"))
        })?;

        let mut record = Record::new();
        for (i, field) in fields.iter().enumerate() {
            let value = self.codec.decode(&field.name, field.ty, row.get_ref(i + 2)?)?;
            record.insert(field.name.clone(), value);
        }
        let distance = if with_distance {
            row.get::<_, Option<f64>>(fields.len() + 2)?
        } else {
            None
        };

        Ok(Document {
            id,
            updated_at,
            fields: record,
            distance,
        })
    }

    // ── Deletes ──────────────────────────────────────────────────────

    /// Delete documents by id. If any id is missing nothing is deleted.
    pub fn delete<S: AsRef<str>>(&self, ids: &[S]) -> Result<usize> {
        let ids: Vec<&str> = ids.iter().map(AsRef::as_ref).collect();
        let tx = self.db.transaction()?;
        self.require_ids(&ids)?;
        let deleted = self.delete_ids(&ids)?;
        tx.commit()?;
        Ok(deleted)
    }

    /// Delete documents by id and return them as they were.
    pub fn delete_returning<S: AsRef<str>>(&self, ids: &[S]) -> Result<Vec<Document>> {
        let tx = self.db.transaction()?;
        let docs = self.get_many(ids, None)?;
        let ids: Vec<&str> = docs.iter().map(|d| d.id.as_str()).collect();
        self.delete_ids(&ids)?;
        tx.commit()?;
        Ok(docs)
    }

    /// Delete every document matching a predicate. Returns the count deleted.
    pub fn delete_where(&self, predicate: &JsonValue) -> Result<usize> {
        let filter = self.compile(predicate)?;
        let tx = self.db.transaction()?;
        let ids = self.matching_ids(&filter)?;
        let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let deleted = self.delete_ids(&refs)?;
        tx.commit()?;
        log::debug!("deleted {deleted} documents from '{}'", self.name);
        Ok(deleted)
    }

    pub fn delete_where_returning(&self, predicate: &JsonValue) -> Result<Vec<Document>> {
        let plan = self.plan(&Query::new().filter(predicate.clone()))?;
        let tx = self.db.transaction()?;
        let docs = self.run_plan(&plan, None, 0)?;
        let ids: Vec<&str> = docs.iter().map(|d| d.id.as_str()).collect();
        self.delete_ids(&ids)?;
        tx.commit()?;
        Ok(docs)
    }

    fn require_ids(&self, ids: &[&str]) -> Result<()> {
        let mut existing = HashSet::with_capacity(ids.len());
        for chunk in ids.chunks(ID_CHUNK) {
            let sql = format!(
                "SELECT id FROM {} WHERE id IN ({})",
                self.table,
                placeholders(chunk.len())
            );
            let mut stmt = self.db.conn().prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(chunk.iter()), |row| row.get::<_, String>(0))?;
            for row in rows {
                existing.insert(row?);
            }
        }

        let mut missing: Vec<String> = Vec::new();
        for id in ids {
            if !existing.contains(*id) && !missing.iter().any(|m| m == id) {
                missing.push(id.to_string());
            }
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(self.not_found(missing))
        }
    }

    fn delete_ids(&self, ids: &[&str]) -> Result<usize> {
        let mut deleted = 0;
        for chunk in ids.chunks(ID_CHUNK) {
            let sql = format!(
                "DELETE FROM {} WHERE id IN ({})",
                self.table,
                placeholders(chunk.len())
            );
            deleted += self
                .db
                .conn()
                .execute(&sql, params_from_iter(chunk.iter()))?;
        }
        Ok(deleted)
    }

    fn matching_ids(&self, filter: &Filter) -> Result<Vec<String>> {
        let sql = format!(
            "SELECT {DOC_ALIAS}.id FROM {} AS {DOC_ALIAS} WHERE {} ORDER BY {DOC_ALIAS}.__rowid",
            self.table, filter.sql
        );
        let mut stmt = self.db.conn().prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(filter.params.iter()), |row| row.get(0))?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }

    // ── Search ───────────────────────────────────────────────────────

    /// Run a search. With a limit the page is fetched eagerly; without one a
    /// lazy cursor is returned.
    pub fn search(&self, query: &Query) -> Result<SearchResults<'_>> {
        let plan = self.plan(query)?;
        match query.limit {
            Some(limit) => Ok(SearchResults::Page(self.run_plan(
                &plan,
                Some(limit),
                query.offset,
            )?)),
            None => Ok(SearchResults::Lazy(Cursor::new(
                self,
                plan,
                query.offset,
                self.options.cursor_batch_size,
            ))),
        }
    }

    /// Compile a predicate against this store's schema.
    pub fn compile(&self, predicate: &JsonValue) -> Result<Filter> {
        query::compile(&self.schema, &self.codec, predicate)
    }

    fn plan(&self, query: &Query) -> Result<Plan> {
        let fields = self.projection(query.fields.as_deref())?;
        let filter = self.compile(&query.predicate)?;

        let mut select = select_list(&fields);
        let mut params = Vec::new();
        let mut order = Vec::new();

        if let Some(nearest) = &query.nearest {
            let field = self
                .schema
                .get_field(&nearest.field)
                .ok_or_else(|| DocShelfError::UnknownField(nearest.field.clone()))?;
            if field.ty != DefinedType::NormalizedEmbedding {
                return Err(DocShelfError::InvalidEmbedding(format!(
                    "nearest search needs a normalized_embedding field, '{}' is {}",
                    field.name, field.ty
                )));
            }
            let encoded = self.codec.encode(
                &field.name,
                field.ty,
                &Value::Embedding(nearest.vector.clone()),
            )?;
            select.push_str(&format!(
                ", {}(?, {}, ?) AS __distance",
                distance::DISTANCE_FUNCTION,
                column_ref(&field.name)
            ));
            params.push(SqlValue::Text(nearest.metric.as_str().to_string()));
            params.push(encoded.value);
            order.push("(__distance IS NULL)".to_string());
            order.push("__distance".to_string());
        }

        for sort in &query.sort {
            order.push(format!("{} {}", self.sort_column(&sort.field)?, sort.order.sql()));
        }
        order.push(format!("{DOC_ALIAS}.__rowid"));

        let sql = format!(
            "SELECT {select} FROM {} AS {DOC_ALIAS} WHERE {} ORDER BY {}",
            self.table,
            filter.sql,
            order.join(", ")
        );
        params.extend(filter.params);

        Ok(Plan {
            sql,
            params,
            fields,
            with_distance: query.nearest.is_some(),
        })
    }

    fn sort_column(&self, name: &str) -> Result<String> {
        if name == "id" || name == "updated_at" {
            return Ok(format!("{DOC_ALIAS}.{name}"));
        }
        let ty = self
            .schema
            .get(name)
            .ok_or_else(|| DocShelfError::UnknownField(name.to_string()))?;
        if !ty.is_orderable() && ty != DefinedType::Json {
            return Err(DocShelfError::UnsupportedOperator(format!(
                "sort on {ty} field '{name}'"
            )));
        }
        Ok(column_ref(name))
    }

    pub(crate) fn run_plan(&self, plan: &Plan, limit: Option<u64>, offset: u64) -> Result<Vec<Document>> {
        let sql = format!("{} LIMIT ? OFFSET ?", plan.sql);
        let mut params = plan.params.clone();
        params.push(SqlValue::Integer(
            limit.map_or(-1, |l| i64::try_from(l).unwrap_or(i64::MAX)),
        ));
        params.push(SqlValue::Integer(i64::try_from(offset).unwrap_or(i64::MAX)));
        log::debug!("search on '{}': {sql}", self.name);

        let mut stmt = self.db.conn().prepare_cached(&sql)?;
        let mut rows = stmt.query(params_from_iter(params.iter()))?;
        let mut docs = Vec::new();
        while let Some(row) = rows.next()? {
            docs.push(self.decode_row(row, &plan.fields, plan.with_distance)?);
        }
        Ok(docs)
    }

    // ── Aggregates ───────────────────────────────────────────────────

    pub fn count(&self, predicate: &JsonValue) -> Result<u64> {
        let filter = self.compile(predicate)?;
        let sql = format!(
            "SELECT COUNT(*) FROM {} AS {DOC_ALIAS} WHERE {}",
            self.table, filter.sql
        );
        let count: i64 =
            self.db
                .conn()
                .query_row(&sql, params_from_iter(filter.params.iter()), |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Number of documents in the store.
    pub fn len(&self) -> Result<u64> {
        self.count(&JsonValue::Null)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn sum(&self, field: &str, predicate: &JsonValue) -> Result<Option<f64>> {
        let (_, value) = self.aggregate("SUM", field, predicate)?;
        Ok(as_f64(&value))
    }

    pub fn avg(&self, field: &str, predicate: &JsonValue) -> Result<Option<f64>> {
        let (_, value) = self.aggregate("AVG", field, predicate)?;
        Ok(as_f64(&value))
    }

    pub fn min(&self, field: &str, predicate: &JsonValue) -> Result<Value> {
        let (field, value) = self.aggregate("MIN", field, predicate)?;
        self.codec
            .decode(&field.name, field.ty, ValueRef::from(&value))
    }

    pub fn max(&self, field: &str, predicate: &JsonValue) -> Result<Value> {
        let (field, value) = self.aggregate("MAX", field, predicate)?;
        self.codec
            .decode(&field.name, field.ty, ValueRef::from(&value))
    }

    fn aggregate(
        &self,
        function: &str,
        field: &str,
        predicate: &JsonValue,
    ) -> Result<(Field, SqlValue)> {
        let field = self.schema.get_field(field).ok_or_else(|| {
            DocShelfError::InvalidAggregateField(format!("unknown field '{field}'"))
        })?;
        if !field.ty.is_numeric() {
            return Err(DocShelfError::InvalidAggregateField(format!(
                "{function} needs a numeric field, '{}' is {}",
                field.name, field.ty
            )));
        }

        let filter = self.compile(predicate)?;
        let sql = format!(
            "SELECT {function}({}) FROM {} AS {DOC_ALIAS} WHERE {}",
            column_ref(&field.name),
            self.table,
            filter.sql
        );
        let value: SqlValue =
            self.db
                .conn()
                .query_row(&sql, params_from_iter(filter.params.iter()), |row| row.get(0))?;
        Ok((field.clone(), value))
    }

    /// Distinct non-null values of a field among matching documents, in the
    /// order they were first written. `json` fields are flattened: each
    /// element of an array (or value of an object) counts on its own.
    pub fn distinct(&self, field: &str, predicate: &JsonValue) -> Result<Vec<Value>> {
        let field = self
            .schema
            .get_field(field)
            .ok_or_else(|| DocShelfError::UnknownField(field.to_string()))?;
        let filter = self.compile(predicate)?;
        let column = column_ref(&field.name);

        if field.ty == DefinedType::Json {
            let sql = format!(
                "SELECT je.type, je.value FROM {} AS {DOC_ALIAS}, json_each({column}) AS je \
                 WHERE ({}) AND je.type != 'null' \
                 GROUP BY je.type, je.value \
                 ORDER BY MIN({DOC_ALIAS}.__rowid * 4294967296 + je.id)",
                self.table, filter.sql
            );
            let mut stmt = self.db.conn().prepare(&sql)?;
            let mut rows = stmt.query(params_from_iter(filter.params.iter()))?;
            let mut values = Vec::new();
            while let Some(row) = rows.next()? {
                let kind: String = row.get(0)?;
                values.push(Value::Json(json_element(&kind, row.get_ref(1)?)?));
            }
            return Ok(values);
        }

        let group = match field.hash_column() {
            Some(hash_column) => column_ref(&hash_column),
            None => column.clone(),
        };
        let sql = format!(
            "SELECT {column} FROM {} AS {DOC_ALIAS} \
             WHERE ({}) AND {column} IS NOT NULL \
             GROUP BY {group} \
             ORDER BY MIN({DOC_ALIAS}.__rowid)",
            self.table, filter.sql
        );
        let mut stmt = self.db.conn().prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(filter.params.iter()))?;
        let mut values = Vec::new();
        while let Some(row) = rows.next()? {
            values.push(self.codec.decode(&field.name, field.ty, row.get_ref(0)?)?);
        }
        Ok(values)
    }

    // ── Indexes ──────────────────────────────────────────────────────

    /// Create a secondary index on a field. Content-addressed fields index
    /// their hash column. Returns false if the index already existed.
    pub fn create_index(&self, field: &str) -> Result<bool> {
        let field = self
            .schema
            .get_field(field)
            .ok_or_else(|| DocShelfError::UnknownField(field.to_string()))?;
        let column = field.hash_column().unwrap_or_else(|| field.name.clone());

        let tx = self.db.transaction()?;
        self.db.conn().execute_batch(&format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
            self.index_name(&field.name),
            self.table,
            quote_ident(&column)
        ))?;
        let created = self.db.record_index(&self.name, &field.name)?;
        tx.commit()?;

        if created {
            log::info!("created index on '{}.{}'", self.name, field.name);
        }
        Ok(created)
    }

    /// Drop a secondary index. Returns false if there was none.
    pub fn drop_index(&self, field: &str) -> Result<bool> {
        if self.schema.get(field).is_none() {
            return Err(DocShelfError::UnknownField(field.to_string()));
        }
        let tx = self.db.transaction()?;
        self.db
            .conn()
            .execute_batch(&format!("DROP INDEX IF EXISTS {}", self.index_name(field)))?;
        let removed = self.db.remove_index(&self.name, field)?;
        tx.commit()?;
        Ok(removed)
    }

    pub fn indexed_fields(&self) -> Result<Vec<String>> {
        self.db.list_indexes(&self.name)
    }

    fn index_name(&self, field: &str) -> String {
        quote_ident(&format!("idx__{}__{field}", self.name))
    }

    fn not_found(&self, ids: Vec<String>) -> DocShelfError {
        DocShelfError::KeyNotFound {
            store: self.name.clone(),
            ids,
        }
    }
}

/// The persisted compression wins; asking for a different one is an error.
fn resolve_compression(
    store: &str,
    stored: Option<Compression>,
    requested: Option<Compression>,
) -> Result<Compression> {
    match (stored, requested) {
        (Some(stored), Some(requested)) if stored != requested => {
            Err(DocShelfError::Config(format!(
                "store '{store}' was created with {stored} compression, not {requested}"
            )))
        }
        (Some(stored), _) => Ok(stored),
        (None, requested) => Ok(requested.unwrap_or_default()),
    }
}

fn create_table_sql(name: &str, schema: &Schema) -> String {
    let mut columns = vec![
        "__rowid INTEGER PRIMARY KEY AUTOINCREMENT".to_string(),
        "id TEXT NOT NULL UNIQUE".to_string(),
        "updated_at REAL NOT NULL".to_string(),
    ];
    for field in schema.fields() {
        columns.push(format!(
            "{} {}",
            quote_ident(&field.name),
            field.ty.affinity().sql_type()
        ));
        if let (Some(hash_column), Some(len_column)) = (field.hash_column(), field.len_column()) {
            columns.push(format!("{} TEXT", quote_ident(&hash_column)));
            columns.push(format!("{} INTEGER", quote_ident(&len_column)));
        }
    }
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote_ident(name),
        columns.join(", ")
    )
}

fn column_ref(name: &str) -> String {
    format!("{DOC_ALIAS}.{}", quote_ident(name))
}

fn select_list(fields: &[Field]) -> String {
    let mut select = format!("{DOC_ALIAS}.id, {DOC_ALIAS}.updated_at");
    for field in fields {
        select.push_str(", ");
        select.push_str(&column_ref(&field.name));
    }
    select
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn now() -> f64 {
    datetime_to_timestamp(&Utc::now())
}

fn as_f64(value: &SqlValue) -> Option<f64> {
    match value {
        SqlValue::Integer(i) => Some(*i as f64),
        SqlValue::Real(f) => Some(*f),
        _ => None,
    }
}

/// Rebuild a JSON value from a `json_each` (type, value) pair.
fn json_element(kind: &str, raw: ValueRef<'_>) -> Result<JsonValue> {
    let value = match (kind, raw) {
        ("true", _) => JsonValue::Bool(true),
        ("false", _) => JsonValue::Bool(false),
        ("integer", ValueRef::Integer(i)) => JsonValue::from(i),
        ("real", ValueRef::Real(f)) => JsonValue::from(f),
        ("text", ValueRef::Text(t)) => JsonValue::String(String::from_utf8_lossy(t).into_owned()),
        ("object" | "array", ValueRef::Text(t)) => serde_json::from_slice(t)?,
        _ => {
            return Err(DocShelfError::Codec(format!(
                "unexpected json element of type '{kind}'"
            )))
        }
    };
    Ok(value)
}
