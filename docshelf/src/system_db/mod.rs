use crate::codec::Compression;
use crate::error::{DocShelfError, Result};
use crate::options::StoreOptions;
use crate::schema::{DefinedType, Schema};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::path::Path;
use std::time::Duration;

/// Owns the SQLite connection and the internal metadata tables that record
/// every store's schema, compression and secondary indexes.
///
/// Metadata lives in dedicated `__docshelf_*` tables, never in user tables.
pub struct SystemDb {
    conn: Connection,
}

impl SystemDb {
    /// Open or create the database file at the given path.
    pub fn open(path: &Path, options: &StoreOptions) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_millis(options.busy_timeout_ms))?;
        if options.wal {
            let mode: String =
                conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
            log::debug!("journal mode for {}: {mode}", path.display());
        }
        let db = SystemDb { conn };
        db.initialize_tables()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = SystemDb { conn };
        db.initialize_tables()?;
        Ok(db)
    }

    fn initialize_tables(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS __docshelf_stores (
                name TEXT PRIMARY KEY,
                compression TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS __docshelf_fields (
                store TEXT NOT NULL,
                position INTEGER NOT NULL,
                field TEXT NOT NULL,
                type TEXT NOT NULL,
                PRIMARY KEY (store, field)
            );

            CREATE TABLE IF NOT EXISTS __docshelf_indexes (
                store TEXT NOT NULL,
                field TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                PRIMARY KEY (store, field)
            );
            ",
        )?;
        Ok(())
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Begin a transaction. It rolls back when dropped without `commit`.
    pub fn transaction(&self) -> Result<Transaction<'_>> {
        Ok(self.conn.unchecked_transaction()?)
    }

    // ── Schema State ─────────────────────────────────────────────────

    /// Load the persisted schema of a store, in declaration order.
    pub fn load_schema(&self, store: &str) -> Result<Option<Schema>> {
        let mut stmt = self.conn.prepare(
            "SELECT field, type FROM __docshelf_fields WHERE store = ?1 ORDER BY position",
        )?;
        let rows = stmt.query_map(params![store], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut schema = Schema::new();
        for row in rows {
            let (field, type_name) = row?;
            schema = schema.field(field, type_name.parse::<DefinedType>()?);
        }
        Ok((!schema.is_empty()).then_some(schema))
    }

    /// The compression recorded when the store was created.
    pub fn stored_compression(&self, store: &str) -> Result<Option<Compression>> {
        let name: Option<String> = self
            .conn
            .query_row(
                "SELECT compression FROM __docshelf_stores WHERE name = ?1",
                params![store],
                |row| row.get(0),
            )
            .optional()?;
        name.map(|n| n.parse()).transpose()
    }

    /// Record a new store's schema and compression.
    pub fn record_store(&self, store: &str, schema: &Schema, compression: Compression) -> Result<()> {
        self.conn.execute(
            "INSERT INTO __docshelf_stores (name, compression) VALUES (?1, ?2)",
            params![store, compression.as_str()],
        )?;
        let mut stmt = self.conn.prepare(
            "INSERT INTO __docshelf_fields (store, position, field, type) VALUES (?1, ?2, ?3, ?4)",
        )?;
        for (position, field) in schema.fields().iter().enumerate() {
            stmt.execute(params![store, position as i64, field.name, field.ty.as_str()])?;
        }
        Ok(())
    }

    /// Names of every store recorded in this database.
    pub fn list_stores(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM __docshelf_stores ORDER BY name")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        let mut names = Vec::new();
        for row in rows {
            names.push(row?);
        }
        Ok(names)
    }

    /// Remove every metadata row of a store.
    pub fn forget_store(&self, store: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM __docshelf_indexes WHERE store = ?1", params![store])?;
        self.conn
            .execute("DELETE FROM __docshelf_fields WHERE store = ?1", params![store])?;
        self.conn
            .execute("DELETE FROM __docshelf_stores WHERE name = ?1", params![store])?;
        Ok(())
    }

    // ── Index Registry ───────────────────────────────────────────────

    /// Record an accelerated field. Returns false if it was already recorded.
    pub fn record_index(&self, store: &str, field: &str) -> Result<bool> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO __docshelf_indexes (store, field) VALUES (?1, ?2)",
            params![store, field],
        )?;
        Ok(inserted > 0)
    }

    pub fn remove_index(&self, store: &str, field: &str) -> Result<bool> {
        let removed = self.conn.execute(
            "DELETE FROM __docshelf_indexes WHERE store = ?1 AND field = ?2",
            params![store, field],
        )?;
        Ok(removed > 0)
    }

    pub fn list_indexes(&self, store: &str) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT field FROM __docshelf_indexes WHERE store = ?1 ORDER BY created_at, field",
        )?;
        let rows = stmt.query_map(params![store], |row| row.get(0))?;
        let mut fields = Vec::new();
        for row in rows {
            fields.push(row?);
        }
        Ok(fields)
    }
}

/// Compare a supplied schema with the persisted one. Names the first field
/// that is missing, extra, or of a different type.
pub fn verify_schema(store: &str, stored: &Schema, supplied: &Schema) -> Result<()> {
    let mismatch = |field: &str, reason: String| DocShelfError::SchemaMismatch {
        store: store.to_string(),
        field: field.to_string(),
        reason,
    };

    for field in stored.fields() {
        match supplied.get(&field.name) {
            None => {
                return Err(mismatch(&field.name, "is missing from the supplied schema".into()))
            }
            Some(ty) if ty != field.ty => {
                return Err(mismatch(
                    &field.name,
                    format!("is declared as {ty} but the store was created with {}", field.ty),
                ))
            }
            Some(_) => {}
        }
    }
    if let Some(extra) = supplied.fields().iter().find(|f| stored.get(&f.name).is_none()) {
        return Err(mismatch(&extra.name, "is not part of the stored schema".into()));
    }
    Ok(())
}
