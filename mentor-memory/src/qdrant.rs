//! Qdrant-backed vector index.
//!
//! Named-collection similarity search with payload filters. Requires a
//! running Qdrant instance; every call is bounded by the configured
//! timeout and surfaces transport failures as `IndexUnavailable` so
//! callers can take their degraded path.

use crate::error::{MemoryError, Result};
use crate::index::{sort_hits, IndexFilter, IndexPoint, ScoredPoint, VectorIndex};
use async_trait::async_trait;
use qdrant_client::qdrant::value::Kind;
use qdrant_client::qdrant::{
    Condition, CreateCollectionBuilder, DeletePointsBuilder, Distance, Filter, PointId,
    PointStruct, PointsIdsList, SearchPointsBuilder, UpsertPointsBuilder, Value,
    VectorParamsBuilder,
};
use qdrant_client::Qdrant;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info};

/// Qdrant-backed index over one named collection.
pub struct QdrantIndex {
    client: Qdrant,
    collection: String,
    dimension: usize,
    timeout: Duration,
}

impl QdrantIndex {
    /// Connect to a Qdrant instance and ensure the collection exists
    /// with cosine distance and the declared dimension.
    pub async fn connect(
        url: &str,
        collection: &str,
        dimension: usize,
        timeout: Duration,
    ) -> Result<Self> {
        if dimension == 0 {
            return Err(MemoryError::Misconfiguration(
                "vector index dimension must be non-zero".into(),
            ));
        }

        let client = Qdrant::from_url(url)
            .build()
            .map_err(|e| MemoryError::Misconfiguration(format!("invalid Qdrant URL: {e}")))?;

        let index = Self {
            client,
            collection: collection.to_string(),
            dimension,
            timeout,
        };

        index.ensure_collection().await?;
        Ok(index)
    }

    /// Ensure the collection exists with correct configuration.
    async fn ensure_collection(&self) -> Result<()> {
        let collections = self
            .bounded(self.client.list_collections())
            .await?
            .map_err(unavailable)?;

        let exists = collections
            .collections
            .iter()
            .any(|c| c.name == self.collection);

        if !exists {
            info!(collection = %self.collection, dimension = self.dimension, "creating Qdrant collection");
            let vector_params = VectorParamsBuilder::new(self.dimension as u64, Distance::Cosine);
            self.bounded(
                self.client.create_collection(
                    CreateCollectionBuilder::new(&self.collection).vectors_config(vector_params),
                ),
            )
            .await?
            .map_err(unavailable)?;
        }

        Ok(())
    }

    /// Run a backend call under the configured timeout.
    async fn bounded<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = T>,
    {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| MemoryError::IndexUnavailable("operation timed out".into()))
    }

    fn build_payload(point: &IndexPoint) -> HashMap<String, Value> {
        let p = &point.payload;
        HashMap::from([
            (
                "owner_id".to_string(),
                Value {
                    kind: Some(Kind::StringValue(p.owner_id.clone())),
                },
            ),
            (
                "interaction_type".to_string(),
                Value {
                    kind: Some(Kind::StringValue(p.interaction_type.to_string())),
                },
            ),
            (
                "encoder".to_string(),
                Value {
                    kind: Some(Kind::StringValue(p.encoder.to_string())),
                },
            ),
            (
                "created_at".to_string(),
                Value {
                    kind: Some(Kind::IntegerValue(p.created_at)),
                },
            ),
        ])
    }

    fn build_filter(filter: &IndexFilter) -> Filter {
        let mut conditions = vec![
            Condition::matches("owner_id", filter.owner_id.clone()),
            Condition::matches("encoder", filter.encoder.to_string()),
        ];
        if let Some(t) = filter.interaction_type {
            conditions.push(Condition::matches("interaction_type", t.to_string()));
        }
        Filter::must(conditions)
    }
}

fn unavailable(e: impl std::fmt::Display) -> MemoryError {
    MemoryError::IndexUnavailable(e.to_string())
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    fn name(&self) -> &str {
        "qdrant"
    }

    async fn upsert(&self, point: IndexPoint) -> Result<()> {
        if point.vector.len() != self.dimension {
            return Err(MemoryError::Misconfiguration(format!(
                "vector length {} does not match collection dimension {}",
                point.vector.len(),
                self.dimension
            )));
        }

        let payload = Self::build_payload(&point);
        let qdrant_point =
            PointStruct::new(PointId::from(point.id.clone()), point.vector, payload);

        self.bounded(
            self.client.upsert_points(
                UpsertPointsBuilder::new(&self.collection, vec![qdrant_point]).wait(true),
            ),
        )
        .await?
        .map_err(unavailable)?;

        debug!(id = %point.id, collection = %self.collection, "upserted point");
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.bounded(
            self.client.delete_points(
                DeletePointsBuilder::new(&self.collection)
                    .points(PointsIdsList {
                        ids: vec![PointId::from(id.to_string())],
                    })
                    .wait(true),
            ),
        )
        .await?
        .map_err(unavailable)?;

        debug!(id = id, collection = %self.collection, "deleted point");
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: &IndexFilter,
    ) -> Result<Vec<ScoredPoint>> {
        let results = self
            .bounded(
                self.client.search_points(
                    SearchPointsBuilder::new(&self.collection, vector.to_vec(), k as u64)
                        .filter(Self::build_filter(filter))
                        .with_payload(true),
                ),
            )
            .await?
            .map_err(unavailable)?;

        let mut hits: Vec<ScoredPoint> = results
            .result
            .into_iter()
            .filter_map(|point| {
                let id = point.id.and_then(|id| match id.point_id_options {
                    Some(qdrant_client::qdrant::point_id::PointIdOptions::Uuid(s)) => Some(s),
                    Some(qdrant_client::qdrant::point_id::PointIdOptions::Num(n)) => {
                        Some(n.to_string())
                    }
                    None => None,
                })?;
                let created_at = point
                    .payload
                    .get("created_at")
                    .and_then(|v| v.as_integer())
                    .unwrap_or(0);
                Some(ScoredPoint {
                    id,
                    score: point.score,
                    created_at,
                })
            })
            .collect();

        // Qdrant orders by score; re-sort to apply the newer-first
        // tie-break deterministically.
        sort_hits(&mut hits);
        Ok(hits)
    }

    async fn health_check(&self) -> bool {
        matches!(self.bounded(self.client.health_check()).await, Ok(Ok(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EncoderKind, InteractionType};

    fn sample_point() -> IndexPoint {
        IndexPoint {
            id: "1f0e7c2a-aaaa-bbbb-cccc-000000000001".into(),
            vector: vec![0.1; 4],
            payload: crate::index::IndexPayload {
                owner_id: "u1".into(),
                interaction_type: InteractionType::Goal,
                encoder: EncoderKind::Fallback,
                created_at: 42,
            },
        }
    }

    #[test]
    fn payload_fields() {
        let payload = QdrantIndex::build_payload(&sample_point());
        assert!(matches!(
            payload.get("owner_id").and_then(|v| v.kind.clone()),
            Some(Kind::StringValue(s)) if s == "u1"
        ));
        assert!(matches!(
            payload.get("interaction_type").and_then(|v| v.kind.clone()),
            Some(Kind::StringValue(s)) if s == "goal"
        ));
        assert!(matches!(
            payload.get("encoder").and_then(|v| v.kind.clone()),
            Some(Kind::StringValue(s)) if s == "fallback"
        ));
        assert!(matches!(
            payload.get("created_at").and_then(|v| v.kind.clone()),
            Some(Kind::IntegerValue(42))
        ));
    }

    #[test]
    fn filter_includes_owner_and_encoder() {
        let filter = IndexFilter::owner("u1", EncoderKind::Model);
        let built = QdrantIndex::build_filter(&filter);
        assert_eq!(built.must.len(), 2);
    }

    #[test]
    fn filter_with_type_adds_condition() {
        let filter =
            IndexFilter::owner("u1", EncoderKind::Model).with_type(InteractionType::Struggle);
        let built = QdrantIndex::build_filter(&filter);
        assert_eq!(built.must.len(), 3);
    }

    #[tokio::test]
    #[ignore = "requires Qdrant"]
    async fn qdrant_upsert_query_delete() {
        let index = QdrantIndex::connect(
            "http://localhost:6334",
            "mentor_test",
            4,
            Duration::from_secs(3),
        )
        .await
        .expect("failed to connect to Qdrant");

        let point = sample_point();
        index.upsert(point.clone()).await.expect("upsert failed");
        // Idempotent: second upsert overwrites
        index.upsert(point.clone()).await.expect("re-upsert failed");

        let filter = IndexFilter::owner("u1", EncoderKind::Fallback);
        let hits = index
            .query(&point.vector, 10, &filter)
            .await
            .expect("query failed");
        assert_eq!(hits.iter().filter(|h| h.id == point.id).count(), 1);

        index.delete(&point.id).await.expect("delete failed");
        let hits = index.query(&point.vector, 10, &filter).await.unwrap();
        assert!(hits.iter().all(|h| h.id != point.id));
    }

    #[tokio::test]
    async fn unreachable_backend_is_index_unavailable() {
        // Nothing listens on this port; connect must fail with the
        // transient error class, not panic or hang.
        let result = QdrantIndex::connect(
            "http://127.0.0.1:1",
            "mentor_test",
            4,
            Duration::from_millis(200),
        )
        .await;
        assert!(matches!(result, Err(MemoryError::IndexUnavailable(_))));
    }
}
