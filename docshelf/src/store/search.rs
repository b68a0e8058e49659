//! Search requests and their results.

use super::distance::Distance;
use super::Store;
use crate::document::Document;
use crate::error::Result;
use crate::schema::Field;
use rusqlite::types::Value as SqlValue;
use serde_json::Value as JsonValue;
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub(crate) fn sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sort {
    pub field: String,
    pub order: SortOrder,
}

/// Order results by distance between an embedding field and a query vector.
#[derive(Debug, Clone, PartialEq)]
pub struct Nearest {
    pub field: String,
    pub vector: Vec<f32>,
    pub metric: Distance,
}

/// A search request: predicate, projection, ordering and paging.
///
/// ```ignore
/// let query = Query::new()
///     .filter(json!({"age": {"$gt": 25}}))
///     .sort_by("name", SortOrder::Asc)
///     .limit(10);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub(crate) predicate: JsonValue,
    pub(crate) fields: Option<Vec<String>>,
    pub(crate) sort: Vec<Sort>,
    pub(crate) nearest: Option<Nearest>,
    pub(crate) offset: u64,
    pub(crate) limit: Option<u64>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, predicate: JsonValue) -> Self {
        self.predicate = predicate;
        self
    }

    /// Only decode these fields. The default is every schema field.
    pub fn select<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Add a sort key. Keys apply in the order they are added; `id` and
    /// `updated_at` are accepted alongside schema fields.
    pub fn sort_by(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sort.push(Sort {
            field: field.into(),
            order,
        });
        self
    }

    /// Rank by distance to `vector`. Every distance is computed on each query,
    /// and a lazy cursor re-runs the query once per batch, so an unlimited
    /// nearest search over `n` rows costs `O(n * n / batch)` distance
    /// evaluations. Set a limit when only the top results are needed.
    pub fn nearest(mut self, field: impl Into<String>, vector: Vec<f32>, metric: Distance) -> Self {
        self.nearest = Some(Nearest {
            field: field.into(),
            vector,
            metric,
        });
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    /// Page size. Without a limit, `search` returns a lazy cursor.
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// A prepared search: SQL without paging, its parameters and the decoded
/// projection.
#[derive(Debug, Clone)]
pub(crate) struct Plan {
    pub sql: String,
    pub params: Vec<SqlValue>,
    pub fields: Vec<Field>,
    pub with_distance: bool,
}

pub enum SearchResults<'a> {
    Page(Vec<Document>),
    Lazy(Cursor<'a>),
}

impl SearchResults<'_> {
    /// Collect every result, draining a lazy cursor.
    pub fn into_vec(self) -> Result<Vec<Document>> {
        match self {
            SearchResults::Page(docs) => Ok(docs),
            SearchResults::Lazy(cursor) => cursor.collect(),
        }
    }
}

/// Forward-only iterator over search results, fetched in fixed-size batches.
///
/// No statement stays open between batches; each batch re-runs the plan at
/// the next offset. Rows written between batches may therefore shift the
/// window, and every batch pays for sorting the full result set again.
pub struct Cursor<'a> {
    store: &'a Store,
    plan: Plan,
    batch_size: u64,
    start: u64,
    position: u64,
    buffer: VecDeque<Document>,
    exhausted: bool,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(store: &'a Store, plan: Plan, start: u64, batch_size: usize) -> Self {
        Cursor {
            store,
            plan,
            batch_size: batch_size.max(1) as u64,
            start,
            position: start,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    /// Rewind to the first result.
    pub fn restart(&mut self) {
        self.position = self.start;
        self.buffer.clear();
        self.exhausted = false;
    }

    fn fetch(&mut self) -> Result<()> {
        let batch = self
            .store
            .run_plan(&self.plan, Some(self.batch_size), self.position)?;
        log::debug!(
            "cursor on '{}' fetched {} rows at offset {}",
            self.store.name(),
            batch.len(),
            self.position
        );
        if (batch.len() as u64) < self.batch_size {
            self.exhausted = true;
        }
        self.position += batch.len() as u64;
        self.buffer.extend(batch);
        Ok(())
    }
}

impl Iterator for Cursor<'_> {
    type Item = Result<Document>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            if let Err(e) = self.fetch() {
                self.exhausted = true;
                return Some(Err(e));
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}
