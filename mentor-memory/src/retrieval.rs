//! Context retrieval with composite ranking.
//!
//! Candidates come from the vector index pre-filtered by owner and
//! encoder variant, then get a composite score:
//!
//! ```text
//! w_sim * cosine + w_rec * 2^(-age_days / half_life_days) + w_cat * boost(type)
//! ```
//!
//! Near-duplicates are collapsed (keeping the most recent) before
//! truncating to the requested size. When the index is unavailable the
//! assembler degrades to a recency-only ranking from the relational
//! store rather than failing the caller.

use crate::embeddings::EmbeddingProvider;
use crate::error::Result;
use crate::index::IndexFilter;
use crate::store::MemoryStore;
use crate::types::{InteractionType, MemoryRecord, ScoredMemory};
use crate::vector::cosine_similarity;
use chrono::Utc;
use mentor_common::{CategoryBoosts, RankingConfig};
use std::sync::Arc;
use tracing::{debug, warn};

/// Assembles ranked memory context for a query.
pub struct ContextAssembler {
    provider: Arc<dyn EmbeddingProvider>,
    store: Arc<MemoryStore>,
    config: RankingConfig,
}

impl ContextAssembler {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        store: Arc<MemoryStore>,
        config: RankingConfig,
    ) -> Self {
        Self {
            provider,
            store,
            config,
        }
    }

    /// Retrieve the top-n memories for a query at the current time.
    pub async fn retrieve(
        &self,
        owner_id: &str,
        query: &str,
        n: usize,
    ) -> Result<Vec<ScoredMemory>> {
        self.retrieve_at(owner_id, query, n, Utc::now().timestamp_millis())
            .await
    }

    /// Retrieve the top-n memories for a query, scoring recency
    /// against the injected `now_ms`. Deterministic for fixed inputs.
    pub async fn retrieve_at(
        &self,
        owner_id: &str,
        query: &str,
        n: usize,
        now_ms: i64,
    ) -> Result<Vec<ScoredMemory>> {
        if n == 0 {
            return Ok(Vec::new());
        }

        let embedding = self.provider.encode(query).await?;
        let k = n * self.config.candidate_multiplier;
        let filter = IndexFilter::owner(owner_id, embedding.encoder);

        let hits = match self.store.index().query(&embedding.vector, k, &filter).await {
            Ok(hits) => hits,
            Err(e) if e.is_transient() => {
                warn!(error = %e, "index query failed, degrading to recency-only ranking");
                return self.recency_only(owner_id, n, now_ms).await;
            }
            Err(e) => return Err(e),
        };

        if hits.is_empty() {
            return Ok(Vec::new());
        }

        // Hydrate from the source of truth; a point whose row has been
        // deleted since indexing is simply skipped.
        let mut candidates = Vec::with_capacity(hits.len());
        for hit in hits {
            if let Some(record) = self.store.sqlite().get(&hit.id).await? {
                if record.owner_id == owner_id {
                    let score = self.composite_score(hit.score, &record, now_ms);
                    candidates.push(ScoredMemory {
                        memory: record,
                        score,
                    });
                }
            }
        }

        let mut kept = self.dedupe(candidates);
        sort_scored(&mut kept);
        kept.truncate(n);
        debug!(owner = owner_id, returned = kept.len(), "assembled context");
        Ok(kept)
    }

    fn composite_score(&self, similarity: f32, record: &MemoryRecord, now_ms: i64) -> f32 {
        let c = &self.config;
        c.similarity_weight * similarity
            + c.recency_weight * recency_score(record.age_days(now_ms), c.half_life_days)
            + c.category_weight * category_boost(&c.boosts, record.interaction_type)
    }

    /// Collapse near-duplicate candidates, keeping the most recent of
    /// each duplicate group.
    fn dedupe(&self, mut candidates: Vec<ScoredMemory>) -> Vec<ScoredMemory> {
        // Newest first, so every kept memory is at least as recent as
        // any duplicate it absorbs.
        candidates.sort_by(|a, b| b.memory.created_at.cmp(&a.memory.created_at));

        let mut kept: Vec<ScoredMemory> = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let duplicate = kept.iter().any(|k| {
                cosine_similarity(&k.memory.embedding, &candidate.memory.embedding)
                    >= self.config.dedupe_threshold
            });
            if !duplicate {
                kept.push(candidate);
            }
        }
        kept
    }

    /// Degraded path: most recent memories straight from SQLite,
    /// scored by recency decay alone.
    async fn recency_only(
        &self,
        owner_id: &str,
        n: usize,
        now_ms: i64,
    ) -> Result<Vec<ScoredMemory>> {
        let records = self.store.sqlite().recent(owner_id, n).await?;
        Ok(records
            .into_iter()
            .map(|record| {
                let score = recency_score(record.age_days(now_ms), self.config.half_life_days);
                ScoredMemory {
                    memory: record,
                    score,
                }
            })
            .collect())
    }
}

/// Exponential decay: 1.0 at zero age, halved every `half_life_days`.
fn recency_score(age_days: f32, half_life_days: f32) -> f32 {
    (-age_days / half_life_days).exp2()
}

/// Per-category ranking boost.
pub(crate) fn category_boost(boosts: &CategoryBoosts, t: InteractionType) -> f32 {
    match t {
        InteractionType::Goal => boosts.goal,
        InteractionType::Habit => boosts.habit,
        InteractionType::Struggle => boosts.struggle,
        InteractionType::Achievement => boosts.achievement,
        InteractionType::General => boosts.general,
        InteractionType::Reflection => boosts.reflection,
    }
}

/// Descending score, newer first on ties.
fn sort_scored(items: &mut [ScoredMemory]) {
    items.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(b.memory.created_at.cmp(&a.memory.created_at))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::HashEmbedding;
    use crate::index::MemoryIndex;
    use crate::sqlite::SqliteStore;
    use crate::store::{new_record, MemoryStore};
    use crate::types::EncoderKind;
    use std::collections::HashMap;
    use tempfile::TempDir;

    const DAY_MS: i64 = 86_400_000;

    fn similarity_only() -> RankingConfig {
        RankingConfig {
            similarity_weight: 1.0,
            recency_weight: 0.0,
            category_weight: 0.0,
            ..RankingConfig::default()
        }
    }

    async fn setup(config: RankingConfig) -> (TempDir, Arc<MemoryStore>, ContextAssembler) {
        let tmp = TempDir::new().unwrap();
        let sqlite = Arc::new(SqliteStore::new(tmp.path()).unwrap());
        let index = Arc::new(MemoryIndex::new());
        let store = Arc::new(MemoryStore::new(sqlite, index));
        let provider = Arc::new(HashEmbedding::new(64));
        let assembler = ContextAssembler::new(provider.clone(), store.clone(), config);
        (tmp, store, assembler)
    }

    async fn store_memory(
        store: &MemoryStore,
        owner: &str,
        content: &str,
        t: InteractionType,
        created_at: i64,
    ) -> String {
        let provider = HashEmbedding::new(64);
        let embedding = crate::embeddings::Embedding {
            vector: provider.encode_sync(content),
            encoder: EncoderKind::Fallback,
        };
        let record = new_record(owner, content, t, embedding, HashMap::new(), created_at);
        let id = record.id.clone();
        store.record(record).await.unwrap();
        id
    }

    #[tokio::test]
    async fn ranks_by_similarity_when_other_weights_zero() {
        let (_tmp, store, assembler) = setup(similarity_only()).await;
        store_memory(
            &store,
            "u1",
            "training for the marathon next spring",
            InteractionType::Goal,
            1000,
        )
        .await;
        store_memory(
            &store,
            "u1",
            "tried a new pasta recipe today",
            InteractionType::General,
            2000,
        )
        .await;

        let results = assembler
            .retrieve_at("u1", "marathon training plan", 2, 10_000)
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0].memory.content.contains("marathon"));
        assert!(results[0].score > results[1].score);
    }

    #[tokio::test]
    async fn recency_term_prefers_newer_of_equal_similarity() {
        let config = RankingConfig {
            similarity_weight: 0.0,
            recency_weight: 1.0,
            category_weight: 0.0,
            dedupe_threshold: 1.0,
            half_life_days: 14.0,
            ..RankingConfig::default()
        };
        let (_tmp, store, assembler) = setup(config).await;
        let now = 30 * DAY_MS;
        store_memory(&store, "u1", "walked the dog", InteractionType::Habit, 0).await;
        store_memory(
            &store,
            "u1",
            "fed the cat",
            InteractionType::Habit,
            29 * DAY_MS,
        )
        .await;

        let results = assembler.retrieve_at("u1", "pets", 2, now).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].memory.content, "fed the cat");
        // 30 days old at half-life 14 ≈ 0.226; 1 day old ≈ 0.952
        assert!((results[1].score - (-30.0f32 / 14.0).exp2()).abs() < 1e-4);
    }

    #[tokio::test]
    async fn category_boost_breaks_similarity_ties() {
        let config = RankingConfig {
            similarity_weight: 0.0,
            recency_weight: 0.0,
            category_weight: 1.0,
            ..RankingConfig::default()
        };
        let (_tmp, store, assembler) = setup(config).await;
        store_memory(&store, "u1", "random chat", InteractionType::General, 1000).await;
        store_memory(
            &store,
            "u1",
            "finish the novel draft",
            InteractionType::Goal,
            1000,
        )
        .await;

        let results = assembler.retrieve_at("u1", "writing", 2, 10_000).await.unwrap();
        assert_eq!(results[0].memory.interaction_type, InteractionType::Goal);
        assert!((results[0].score - 1.0).abs() < 1e-6);
        assert!((results[1].score - 0.2).abs() < 1e-6);
    }

    #[tokio::test]
    async fn near_duplicates_collapse_to_most_recent() {
        let (_tmp, store, assembler) = setup(similarity_only()).await;
        // Identical content hashes to the identical vector: cosine 1.0
        store_memory(
            &store,
            "u1",
            "meditated for ten minutes",
            InteractionType::Habit,
            1000,
        )
        .await;
        let newer = store_memory(
            &store,
            "u1",
            "meditated for ten minutes",
            InteractionType::Habit,
            5000,
        )
        .await;

        let results = assembler
            .retrieve_at("u1", "meditation", 10, 10_000)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].memory.id, newer);
    }

    #[tokio::test]
    async fn owner_isolation() {
        let (_tmp, store, assembler) = setup(similarity_only()).await;
        store_memory(&store, "u1", "my secret plan", InteractionType::Goal, 1000).await;
        store_memory(&store, "u2", "my secret plan", InteractionType::Goal, 1000).await;

        let results = assembler
            .retrieve_at("u1", "secret plan", 10, 10_000)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].memory.owner_id, "u1");
    }

    #[tokio::test]
    async fn empty_store_returns_empty() {
        let (_tmp, _store, assembler) = setup(similarity_only()).await;
        let results = assembler.retrieve_at("u1", "anything", 5, 1000).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn zero_n_returns_empty() {
        let (_tmp, store, assembler) = setup(similarity_only()).await;
        store_memory(&store, "u1", "something", InteractionType::General, 1000).await;
        let results = assembler.retrieve_at("u1", "something", 0, 10_000).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn truncates_to_n() {
        let (_tmp, store, assembler) = setup(similarity_only()).await;
        for i in 0..8 {
            store_memory(
                &store,
                "u1",
                &format!("memory number {i}"),
                InteractionType::General,
                1000 + i,
            )
            .await;
        }
        let results = assembler.retrieve_at("u1", "memory", 3, 10_000).await.unwrap();
        assert_eq!(results.len(), 3);
    }

    #[tokio::test]
    async fn deterministic_for_fixed_inputs() {
        let (_tmp, store, assembler) = setup(RankingConfig::default()).await;
        store_memory(&store, "u1", "swam twenty laps", InteractionType::Habit, 1000).await;
        store_memory(&store, "u1", "signed up for a triathlon", InteractionType::Goal, 2000).await;

        let a = assembler.retrieve_at("u1", "swimming", 5, 10_000).await.unwrap();
        let b = assembler.retrieve_at("u1", "swimming", 5, 10_000).await.unwrap();
        let ids_a: Vec<_> = a.iter().map(|s| s.memory.id.clone()).collect();
        let ids_b: Vec<_> = b.iter().map(|s| s.memory.id.clone()).collect();
        assert_eq!(ids_a, ids_b);
        for (x, y) in a.iter().zip(&b) {
            assert_eq!(x.score, y.score);
        }
    }

    #[test]
    fn recency_score_half_life() {
        assert!((recency_score(0.0, 14.0) - 1.0).abs() < 1e-6);
        assert!((recency_score(14.0, 14.0) - 0.5).abs() < 1e-6);
        assert!((recency_score(28.0, 14.0) - 0.25).abs() < 1e-6);
    }

    #[test]
    fn boost_lookup_covers_all_types() {
        let boosts = CategoryBoosts::default();
        assert_eq!(category_boost(&boosts, InteractionType::Goal), 1.0);
        assert_eq!(category_boost(&boosts, InteractionType::General), 0.2);
        for t in InteractionType::ALL {
            assert!(category_boost(&boosts, t) > 0.0);
        }
    }
}
