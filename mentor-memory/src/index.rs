//! Vector index abstraction and the embedded in-process backend.
//!
//! The index is a similarity-search store only; the relational store
//! remains the source of truth. Filters are applied *before* ranking
//! so the top-k is never skewed by excluded candidates, and every
//! filter carries the owner and the encoder variant of the query
//! vector, so rankings never mix vectors from different encoders.

use crate::error::Result;
use crate::types::{EncoderKind, InteractionType};
use crate::vector::cosine_similarity;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// A point to upsert into the index.
#[derive(Debug, Clone)]
pub struct IndexPoint {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: IndexPayload,
}

/// Payload stored with each point, used for filtering and tie-breaks.
#[derive(Debug, Clone)]
pub struct IndexPayload {
    pub owner_id: String,
    pub interaction_type: InteractionType,
    pub encoder: EncoderKind,
    pub created_at: i64,
}

/// Pre-ranking filter. Owner and encoder are mandatory.
#[derive(Debug, Clone)]
pub struct IndexFilter {
    pub owner_id: String,
    pub encoder: EncoderKind,
    pub interaction_type: Option<InteractionType>,
}

impl IndexFilter {
    pub fn owner(owner_id: impl Into<String>, encoder: EncoderKind) -> Self {
        Self {
            owner_id: owner_id.into(),
            encoder,
            interaction_type: None,
        }
    }

    pub fn with_type(mut self, interaction_type: InteractionType) -> Self {
        self.interaction_type = Some(interaction_type);
        self
    }

    fn matches(&self, payload: &IndexPayload) -> bool {
        payload.owner_id == self.owner_id
            && payload.encoder == self.encoder
            && self
                .interaction_type
                .map_or(true, |t| payload.interaction_type == t)
    }
}

/// A query hit: id, cosine similarity, and creation timestamp.
#[derive(Debug, Clone)]
pub struct ScoredPoint {
    pub id: String,
    pub score: f32,
    pub created_at: i64,
}

/// Similarity-search store.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Backend name (e.g. "qdrant", "embedded")
    fn name(&self) -> &str;

    /// Insert or overwrite a point. Idempotent: re-inserting an id
    /// leaves exactly one entry.
    async fn upsert(&self, point: IndexPoint) -> Result<()>;

    /// Delete a point. Idempotent.
    async fn delete(&self, id: &str) -> Result<()>;

    /// Top-k by descending cosine similarity, ties broken by newer
    /// `created_at` first. Fails with `IndexUnavailable` when the
    /// backing store is unreachable.
    async fn query(&self, vector: &[f32], k: usize, filter: &IndexFilter)
        -> Result<Vec<ScoredPoint>>;

    /// Health check. True when the backend is operational.
    async fn health_check(&self) -> bool;
}

/// Sort hits by descending score, newer timestamp first on ties.
pub(crate) fn sort_hits(hits: &mut [ScoredPoint]) {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(b.created_at.cmp(&a.created_at))
    });
}

/// Embedded in-process index: brute-force cosine over a map.
///
/// Suitable for the single-owner working set this engine targets and
/// for fully offline operation; the Qdrant backend covers everything
/// larger.
#[derive(Default)]
pub struct MemoryIndex {
    points: RwLock<HashMap<String, (Vec<f32>, IndexPayload)>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored points.
    pub async fn len(&self) -> usize {
        self.points.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.points.read().await.is_empty()
    }
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    fn name(&self) -> &str {
        "embedded"
    }

    async fn upsert(&self, point: IndexPoint) -> Result<()> {
        self.points
            .write()
            .await
            .insert(point.id, (point.vector, point.payload));
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.points.write().await.remove(id);
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: &IndexFilter,
    ) -> Result<Vec<ScoredPoint>> {
        let points = self.points.read().await;
        let mut hits: Vec<ScoredPoint> = points
            .iter()
            .filter(|(_, (_, payload))| filter.matches(payload))
            .map(|(id, (v, payload))| ScoredPoint {
                id: id.clone(),
                score: cosine_similarity(vector, v),
                created_at: payload.created_at,
            })
            .collect();

        sort_hits(&mut hits);
        hits.truncate(k);
        Ok(hits)
    }

    async fn health_check(&self) -> bool {
        true
    }
}
