//! SQLite-backed canonical memory records.
//!
//! The relational store is the source of truth: a memory exists once
//! its row is committed, whether or not the vector index has caught
//! up. The `indexed` flag plus [`SqliteStore::unindexed_ids`] form the
//! reconciliation ledger for records awaiting index upserts.

use crate::error::{MemoryError, Result};
use crate::types::{EncoderKind, InteractionType, MemoryRecord};
use crate::vector::{bytes_to_vec, vec_to_bytes};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// SQLite store for canonical memory records.
pub struct SqliteStore {
    db_path: PathBuf,
}

impl SqliteStore {
    /// Create a store at the given data directory.
    ///
    /// Creates the database at `{data_dir}/memory/mentor.db`.
    pub fn new(data_dir: &Path) -> Result<Self> {
        let memory_dir = data_dir.join("memory");
        std::fs::create_dir_all(&memory_dir)
            .map_err(|e| MemoryError::Store(format!("failed to create data dir: {e}")))?;

        let db_path = memory_dir.join("mentor.db");
        let conn = Connection::open(&db_path)?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS memories (
                memory_id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                content TEXT NOT NULL,
                interaction_type TEXT NOT NULL,
                encoder TEXT NOT NULL,
                embedding BLOB NOT NULL,
                metadata TEXT NOT NULL,
                created_at TEXT NOT NULL,
                indexed INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_memories_owner_time
                ON memories(owner_id, created_at DESC);

            CREATE INDEX IF NOT EXISTS idx_memories_unindexed
                ON memories(indexed) WHERE indexed = 0;
            "#,
        )?;

        Ok(Self { db_path })
    }

    /// Insert a new record. Memories are immutable: a duplicate id is
    /// a store error, never an overwrite.
    pub async fn insert(&self, record: &MemoryRecord) -> Result<()> {
        let db_path = self.db_path.clone();
        let record = record.clone();

        tokio::task::spawn_blocking(move || -> Result<()> {
            let conn = Connection::open(&db_path)?;
            conn.execute(
                r#"
                INSERT INTO memories
                    (memory_id, owner_id, content, interaction_type, encoder,
                     embedding, metadata, created_at, indexed)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
                params![
                    record.id,
                    record.owner_id,
                    record.content,
                    record.interaction_type.to_string(),
                    record.encoder.to_string(),
                    vec_to_bytes(&record.embedding),
                    serde_json::to_string(&record.metadata)
                        .map_err(|e| MemoryError::Store(e.to_string()))?,
                    millis_to_rfc3339(record.created_at),
                    record.indexed as i64,
                ],
            )?;
            Ok(())
        })
        .await?
    }

    /// Get a record by id.
    pub async fn get(&self, id: &str) -> Result<Option<MemoryRecord>> {
        let db_path = self.db_path.clone();
        let id = id.to_string();

        tokio::task::spawn_blocking(move || -> Result<Option<MemoryRecord>> {
            let conn = Connection::open(&db_path)?;
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM memories WHERE memory_id = ?1"
            ))?;
            let record = stmt.query_row(params![id], row_to_record).optional()?;
            Ok(record)
        })
        .await?
    }

    /// List an owner's records, newest first. Optional filters: one
    /// interaction type, a minimum creation time, and a row limit.
    pub async fn list(
        &self,
        owner_id: &str,
        interaction_type: Option<InteractionType>,
        since_ms: Option<i64>,
        limit: Option<usize>,
    ) -> Result<Vec<MemoryRecord>> {
        let db_path = self.db_path.clone();
        let owner_id = owner_id.to_string();

        tokio::task::spawn_blocking(move || -> Result<Vec<MemoryRecord>> {
            let conn = Connection::open(&db_path)?;

            let mut sql = format!("SELECT {COLUMNS} FROM memories WHERE owner_id = ?1");
            let mut args: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(owner_id)];

            if let Some(t) = interaction_type {
                sql.push_str(" AND interaction_type = ?");
                args.push(Box::new(t.to_string()));
            }
            if let Some(since) = since_ms {
                sql.push_str(" AND created_at >= ?");
                args.push(Box::new(millis_to_rfc3339(since)));
            }
            sql.push_str(" ORDER BY created_at DESC");
            if let Some(n) = limit {
                sql.push_str(&format!(" LIMIT {n}"));
            }

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(
                rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())),
                row_to_record,
            )?;
            Ok(rows.flatten().collect())
        })
        .await?
    }

    /// The most recent records for an owner.
    pub async fn recent(&self, owner_id: &str, limit: usize) -> Result<Vec<MemoryRecord>> {
        self.list(owner_id, None, None, Some(limit)).await
    }

    /// Delete a record. Returns true if it existed.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let db_path = self.db_path.clone();
        let id = id.to_string();

        let affected = tokio::task::spawn_blocking(move || -> Result<usize> {
            let conn = Connection::open(&db_path)?;
            let affected = conn.execute("DELETE FROM memories WHERE memory_id = ?1", params![id])?;
            Ok(affected)
        })
        .await??;

        Ok(affected > 0)
    }

    /// Update the indexed-status flag.
    pub async fn mark_indexed(&self, id: &str, indexed: bool) -> Result<()> {
        let db_path = self.db_path.clone();
        let id = id.to_string();

        tokio::task::spawn_blocking(move || -> Result<()> {
            let conn = Connection::open(&db_path)?;
            let affected = conn.execute(
                "UPDATE memories SET indexed = ?1 WHERE memory_id = ?2",
                params![indexed as i64, id],
            )?;
            if affected == 0 {
                return Err(MemoryError::NotFound(format!("memory '{id}'")));
            }
            Ok(())
        })
        .await?
    }

    /// Ids of all records awaiting an index upsert, oldest first.
    pub async fn unindexed_ids(&self) -> Result<Vec<String>> {
        let db_path = self.db_path.clone();

        tokio::task::spawn_blocking(move || -> Result<Vec<String>> {
            let conn = Connection::open(&db_path)?;
            let mut stmt = conn.prepare(
                "SELECT memory_id FROM memories WHERE indexed = 0 ORDER BY created_at ASC",
            )?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            Ok(rows.flatten().collect())
        })
        .await?
    }

    /// Count an owner's records.
    pub async fn count(&self, owner_id: &str) -> Result<usize> {
        let db_path = self.db_path.clone();
        let owner_id = owner_id.to_string();

        tokio::task::spawn_blocking(move || -> Result<usize> {
            let conn = Connection::open(&db_path)?;
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM memories WHERE owner_id = ?1",
                params![owner_id],
                |row| row.get(0),
            )?;
            Ok(count as usize)
        })
        .await?
    }

    /// Health check. True when the database is reachable.
    pub async fn health_check(&self) -> bool {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            Connection::open(&db_path)
                .and_then(|conn| conn.execute_batch("SELECT 1"))
                .is_ok()
        })
        .await
        .unwrap_or(false)
    }
}

const COLUMNS: &str =
    "memory_id, owner_id, content, interaction_type, encoder, embedding, metadata, created_at, indexed";

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<MemoryRecord> {
    let metadata_json: String = row.get(6)?;
    let created_at: String = row.get(7)?;

    Ok(MemoryRecord {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        content: row.get(2)?,
        interaction_type: InteractionType::from(row.get::<_, String>(3)?.as_str()),
        encoder: EncoderKind::from(row.get::<_, String>(4)?.as_str()),
        embedding: bytes_to_vec(&row.get::<_, Vec<u8>>(5)?),
        metadata: serde_json::from_str::<HashMap<String, String>>(&metadata_json)
            .unwrap_or_default(),
        created_at: chrono::DateTime::parse_from_rfc3339(&created_at)
            .map(|dt| dt.timestamp_millis())
            .unwrap_or(0),
        indexed: row.get::<_, i64>(8)? != 0,
    })
}

/// Fixed-width UTC RFC3339 so string comparison in SQL matches
/// chronological order.
fn millis_to_rfc3339(ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ms)
        .unwrap_or_default()
        .to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
