use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::Path;

pub const ANALYSIS_COLLECTION: &str = "ai_analysis";
pub const MAP_CONFIG_COLLECTION: &str = "map_configurations";

/// Collection-oriented document persistence.
pub trait DocumentStore {
    /// Appends a document and returns its row id.
    fn insert_one(&self, collection: &str, document: &Value) -> Result<i64>;

    /// Inserts or replaces the document identified by `key`.
    fn upsert(&self, collection: &str, key: &str, document: &Value) -> Result<()>;
}

/// A persisted analysis as read back for history listings.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredAnalysis {
    pub id: i64,
    pub location: Option<String>,
    pub created_at: String,
    pub document: Value,
}

/// SQLite-backed document store. Documents are kept as JSON text.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let store = SqliteStore { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS documents (
                    Id INTEGER PRIMARY KEY AUTOINCREMENT,
                    collection TEXT NOT NULL,
                    docKey TEXT,
                    location TEXT,
                    body TEXT NOT NULL,
                    createdAt TEXT NOT NULL,
                    updatedAt TEXT NOT NULL
                );
                CREATE UNIQUE INDEX IF NOT EXISTS idx_documents_key
                    ON documents (collection, docKey);
                CREATE INDEX IF NOT EXISTS idx_documents_location
                    ON documents (collection, location);",
            )
            .context("Failed to initialize document schema")?;
        Ok(())
    }

    pub fn get(&self, collection: &str, key: &str) -> Result<Option<Value>> {
        let body: Option<String> = self
            .conn
            .query_row(
                "SELECT body FROM documents WHERE collection = ? AND docKey = ?",
                params![collection, key],
                |row| row.get(0),
            )
            .optional()?;

        body.map(|b| serde_json::from_str(&b).context("Stored document is not valid JSON"))
            .transpose()
    }

    pub fn count(&self, collection: &str) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM documents WHERE collection = ?",
            [collection],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Most recent analyses first, optionally limited to one location.
    pub fn recent_analyses(
        &self,
        location: Option<&str>,
        limit: usize,
    ) -> Result<Vec<StoredAnalysis>> {
        let mut query = String::from(
            "SELECT Id, location, createdAt, body
             FROM documents
             WHERE collection = ?",
        );
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(ANALYSIS_COLLECTION)];

        if let Some(location) = location {
            query.push_str(" AND location = ? COLLATE NOCASE");
            params.push(Box::new(location.to_string()));
        }
        query.push_str(" ORDER BY Id DESC LIMIT ?");
        params.push(Box::new(limit as i64));

        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let mut stmt = self.conn.prepare(&query)?;
        let rows = stmt
            .query_map(param_refs.as_slice(), |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, location, created_at, body)| {
                Ok(StoredAnalysis {
                    id,
                    location,
                    created_at,
                    document: serde_json::from_str(&body)
                        .with_context(|| format!("Analysis {} is not valid JSON", id))?,
                })
            })
            .collect()
    }
}

fn location_of(document: &Value) -> Option<&str> {
    document.get("location").and_then(Value::as_str)
}

impl DocumentStore for SqliteStore {
    fn insert_one(&self, collection: &str, document: &Value) -> Result<i64> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO documents (collection, docKey, location, body, createdAt, updatedAt)
             VALUES (?, NULL, ?, ?, ?, ?)",
            params![
                collection,
                location_of(document),
                document.to_string(),
                now,
                now
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn upsert(&self, collection: &str, key: &str, document: &Value) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO documents (collection, docKey, location, body, createdAt, updatedAt)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)
             ON CONFLICT (collection, docKey)
             DO UPDATE SET body = excluded.body,
                           location = excluded.location,
                           updatedAt = excluded.updatedAt",
            params![collection, key, location_of(document), document.to_string(), now],
        )?;
        Ok(())
    }
}
