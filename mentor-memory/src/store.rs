//! Dual-write coordination between the relational store and the
//! vector index.
//!
//! The relational insert is the commit point: if it fails, nothing was
//! recorded. The index upsert that follows is best-effort: on failure
//! the record stays with `indexed = false` and a periodic reconciler
//! retries it once the index comes back.

use crate::embeddings::Embedding;
use crate::error::Result;
use crate::index::{IndexPayload, IndexPoint, VectorIndex};
use crate::sqlite::SqliteStore;
use crate::types::{InteractionType, MemoryRecord, RecordOutcome};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Coordinates writes across the relational store and the vector
/// index.
pub struct MemoryStore {
    sqlite: Arc<SqliteStore>,
    index: Arc<dyn VectorIndex>,
}

impl MemoryStore {
    pub fn new(sqlite: Arc<SqliteStore>, index: Arc<dyn VectorIndex>) -> Self {
        Self { sqlite, index }
    }

    pub fn sqlite(&self) -> &Arc<SqliteStore> {
        &self.sqlite
    }

    pub fn index(&self) -> &Arc<dyn VectorIndex> {
        &self.index
    }

    /// Persist a record, then index it.
    ///
    /// The relational insert is fatal on failure. The index upsert is
    /// not: an unreachable index leaves the record readable and
    /// recency-rankable, with `indexed = false` reported in the
    /// outcome so the caller can signal reduced recall.
    pub async fn record(&self, mut record: MemoryRecord) -> Result<RecordOutcome> {
        record.indexed = false;
        self.sqlite.insert(&record).await?;

        match self.index.upsert(index_point(&record)).await {
            Ok(()) => {
                // The memory is durably recorded at this point; an
                // error surfaced from here would invite the caller to
                // retry and duplicate it. A failed flag update (e.g. a
                // concurrent erase won the race) is reported as
                // unindexed and left to the reconciler.
                if let Err(e) = self.sqlite.mark_indexed(&record.id, true).await {
                    warn!(
                        id = %record.id,
                        error = %e,
                        "failed to flag record indexed, leaving it to reconciliation"
                    );
                    return Ok(RecordOutcome {
                        memory: record,
                        indexed: false,
                    });
                }
                record.indexed = true;
                Ok(RecordOutcome {
                    memory: record,
                    indexed: true,
                })
            }
            Err(e) if e.is_transient() => {
                warn!(
                    id = %record.id,
                    error = %e,
                    "index upsert failed, record stored unindexed"
                );
                Ok(RecordOutcome {
                    memory: record,
                    indexed: false,
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Delete a memory from both stores. Owner-checked: a record
    /// belonging to a different owner is treated as absent.
    ///
    /// Returns true if the record existed and was deleted.
    pub async fn erase(&self, owner_id: &str, id: &str) -> Result<bool> {
        match self.sqlite.get(id).await? {
            Some(record) if record.owner_id == owner_id => {}
            _ => return Ok(false),
        }

        self.sqlite.delete(id).await?;

        // Best-effort: an orphaned index point is skipped at
        // hydration time and cleaned up on the next delete retry.
        if let Err(e) = self.index.delete(id).await {
            warn!(id = id, error = %e, "index delete failed, point orphaned");
        }

        Ok(true)
    }

    /// Retry indexing for every record left with `indexed = false`.
    ///
    /// Safe to run concurrently with live traffic: upserts are
    /// idempotent, and a record indexed twice still has exactly one
    /// point. Stops at the first transient index failure and resumes
    /// on the next pass. Returns the number of records indexed.
    pub async fn reconcile(&self) -> Result<usize> {
        if !self.index.health_check().await {
            debug!("index unhealthy, skipping reconciliation pass");
            return Ok(0);
        }

        let pending = self.sqlite.unindexed_ids().await?;
        if pending.is_empty() {
            return Ok(0);
        }

        debug!(pending = pending.len(), "reconciling unindexed records");
        let mut indexed = 0;

        for id in pending {
            let Some(record) = self.sqlite.get(&id).await? else {
                // Deleted since the ledger was read
                continue;
            };

            match self.index.upsert(index_point(&record)).await {
                Ok(()) => {
                    self.sqlite.mark_indexed(&id, true).await?;
                    indexed += 1;
                }
                Err(e) if e.is_transient() => {
                    debug!(id = %id, error = %e, "index still unavailable, stopping pass");
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        if indexed > 0 {
            info!(indexed, "reconciled unindexed records");
        }
        Ok(indexed)
    }

    /// Spawn a periodic reconciliation task.
    pub fn run_reconciler(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = store.reconcile().await {
                    warn!(error = %e, "reconciliation pass failed");
                }
            }
        })
    }
}

/// Build a new record from its parts, with a fresh uuid.
pub fn new_record(
    owner_id: impl Into<String>,
    content: impl Into<String>,
    interaction_type: InteractionType,
    embedding: Embedding,
    metadata: HashMap<String, String>,
    created_at: i64,
) -> MemoryRecord {
    MemoryRecord {
        id: uuid::Uuid::new_v4().to_string(),
        owner_id: owner_id.into(),
        content: content.into(),
        interaction_type,
        encoder: embedding.encoder,
        embedding: embedding.vector,
        created_at,
        metadata,
        indexed: false,
    }
}

fn index_point(record: &MemoryRecord) -> IndexPoint {
    IndexPoint {
        id: record.id.clone(),
        vector: record.embedding.clone(),
        payload: IndexPayload {
            owner_id: record.owner_id.clone(),
            interaction_type: record.interaction_type,
            encoder: record.encoder,
            created_at: record.created_at,
        },
    }
}
