//! The memory manager facade.
//!
//! Wires the embedding provider, stores, assembler, and aggregator
//! from configuration, and exposes the operations upstream callers
//! use: record, retrieve context, erase, reflect. Strictly
//! one-directional; the manager never calls back into its callers.

use crate::embeddings::{create_embedding_provider, EmbeddingProvider};
use crate::error::{MemoryError, Result};
use crate::index::{MemoryIndex, VectorIndex};
use crate::qdrant::QdrantIndex;
use crate::reflection::{JourneySnapshot, ReflectionAggregator, ReflectionBundle};
use crate::retrieval::ContextAssembler;
use crate::sqlite::SqliteStore;
use crate::store::{new_record, MemoryStore};
use crate::types::{InteractionType, RecordOutcome, ScoredMemory};
use chrono::Utc;
use mentor_common::{MentorConfig, RankingConfig, ReflectionConfig};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Facade over the memory engine.
pub struct MemoryManager {
    provider: Arc<dyn EmbeddingProvider>,
    store: Arc<MemoryStore>,
    assembler: Arc<ContextAssembler>,
    aggregator: ReflectionAggregator,
    context_size: usize,
}

impl MemoryManager {
    /// Build the full engine from configuration.
    ///
    /// The embedding provider is created once here; a failed model
    /// probe downgrades to the hash fallback for the process lifetime.
    /// The configured index backend must be reachable at startup;
    /// outages after that degrade per-operation instead.
    pub async fn new(config: &MentorConfig) -> Result<Self> {
        let provider = create_embedding_provider(&config.embedding).await?;

        let index: Arc<dyn VectorIndex> = match config.index.backend.as_str() {
            "embedded" => Arc::new(MemoryIndex::new()),
            "qdrant" => Arc::new(
                QdrantIndex::connect(
                    &config.index.url(),
                    &config.index.collection,
                    config.embedding.dimension,
                    Duration::from_millis(config.index.timeout_ms),
                )
                .await?,
            ),
            other => {
                return Err(MemoryError::Misconfiguration(format!(
                    "unknown index backend '{other}'"
                )))
            }
        };

        let sqlite = Arc::new(SqliteStore::new(&config.store.data_dir())?);
        info!(
            provider = provider.name(),
            index = index.name(),
            dimension = provider.dimension(),
            "memory engine initialized"
        );

        Ok(Self::from_parts(
            provider,
            Arc::new(MemoryStore::new(sqlite, index)),
            config.ranking.clone(),
            config.reflection.clone(),
        ))
    }

    /// Assemble the engine from already-built parts.
    pub fn from_parts(
        provider: Arc<dyn EmbeddingProvider>,
        store: Arc<MemoryStore>,
        ranking: RankingConfig,
        reflection: ReflectionConfig,
    ) -> Self {
        let context_size = ranking.context_size;
        let assembler = Arc::new(ContextAssembler::new(
            provider.clone(),
            store.clone(),
            ranking,
        ));
        let aggregator = ReflectionAggregator::new(store.clone(), assembler.clone(), reflection);
        Self {
            provider,
            store,
            assembler,
            aggregator,
            context_size,
        }
    }

    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.provider
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    /// Spawn the background reconciler for unindexed records.
    pub fn start_reconciler(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        self.store.run_reconciler(interval)
    }

    /// Store a memory with an explicit category.
    pub async fn record(
        &self,
        owner_id: &str,
        content: &str,
        interaction_type: InteractionType,
        metadata: HashMap<String, String>,
    ) -> Result<RecordOutcome> {
        self.record_at(
            owner_id,
            content,
            interaction_type,
            metadata,
            Utc::now().timestamp_millis(),
        )
        .await
    }

    /// Store a memory with an explicit creation time.
    pub async fn record_at(
        &self,
        owner_id: &str,
        content: &str,
        interaction_type: InteractionType,
        metadata: HashMap<String, String>,
        now_ms: i64,
    ) -> Result<RecordOutcome> {
        let embedding = self.provider.encode(content).await?;
        let record = new_record(
            owner_id,
            content,
            interaction_type,
            embedding,
            metadata,
            now_ms,
        );
        self.store.record(record).await
    }

    /// Classify the content with the keyword heuristic, then store it.
    pub async fn record_classified(
        &self,
        owner_id: &str,
        content: &str,
        metadata: HashMap<String, String>,
    ) -> Result<RecordOutcome> {
        let interaction_type = classify(content);
        self.record(owner_id, content, interaction_type, metadata)
            .await
    }

    /// Retrieve ranked context for a query. `n` defaults to the
    /// configured context size.
    pub async fn retrieve_context(
        &self,
        owner_id: &str,
        query: &str,
        n: Option<usize>,
    ) -> Result<Vec<ScoredMemory>> {
        self.assembler
            .retrieve(owner_id, query, n.unwrap_or(self.context_size))
            .await
    }

    /// Retrieve ranked context scoring recency against `now_ms`.
    pub async fn retrieve_context_at(
        &self,
        owner_id: &str,
        query: &str,
        n: Option<usize>,
        now_ms: i64,
    ) -> Result<Vec<ScoredMemory>> {
        self.assembler
            .retrieve_at(owner_id, query, n.unwrap_or(self.context_size), now_ms)
            .await
    }

    /// Delete one memory, owner-checked, from both stores.
    pub async fn erase(&self, owner_id: &str, id: &str) -> Result<bool> {
        self.store.erase(owner_id, id).await
    }

    /// Build a reflection bundle for the period ending now.
    pub async fn reflect(
        &self,
        owner_id: &str,
        snapshot: JourneySnapshot,
    ) -> Result<ReflectionBundle> {
        self.aggregator.build(owner_id, snapshot).await
    }

    /// Build a reflection bundle for the period ending at `now_ms`.
    pub async fn reflect_at(
        &self,
        owner_id: &str,
        snapshot: JourneySnapshot,
        now_ms: i64,
    ) -> Result<ReflectionBundle> {
        self.aggregator.build_at(owner_id, snapshot, now_ms).await
    }
}

/// Keyword heuristic assigning a category to free-form content.
///
/// First matching bucket wins; anything unmatched is a general
/// conversation turn.
pub fn classify(content: &str) -> InteractionType {
    let text = content.to_lowercase();
    let contains_any = |keywords: &[&str]| keywords.iter().any(|k| text.contains(k));

    if contains_any(&["goal", "want to", "plan to", "aim to", "hope to", "my dream"]) {
        InteractionType::Goal
    } else if contains_any(&[
        "struggle",
        "struggling",
        "hard time",
        "difficult",
        "can't seem",
        "frustrated",
        "gave up",
    ]) {
        InteractionType::Struggle
    } else if contains_any(&[
        "achieved",
        "accomplished",
        "completed",
        "finished",
        "finally did",
        "proud of",
    ]) {
        InteractionType::Achievement
    } else if contains_any(&["habit", "every day", "daily", "each morning", "routine"]) {
        InteractionType::Habit
    } else {
        InteractionType::General
    }
}

/// Render retrieved context as a prompt section.
///
/// Numbered `[TYPE] (date): content` lines under a fixed heading, in
/// ranking order.
pub fn format_context(memories: &[ScoredMemory]) -> String {
    if memories.is_empty() {
        return "No relevant past memories.".to_string();
    }

    let mut out = String::from("Relevant past memories:\n");
    for (i, scored) in memories.iter().enumerate() {
        let date = chrono::DateTime::from_timestamp_millis(scored.memory.created_at)
            .unwrap_or_default()
            .format("%Y-%m-%d");
        out.push_str(&format!(
            "{}. [{}] ({}): {}\n",
            i + 1,
            scored.memory.interaction_type.to_string().to_uppercase(),
            date,
            scored.memory.content
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::HashEmbedding;
    use crate::types::{EncoderKind, MemoryRecord};
    use tempfile::TempDir;

    fn manager_with_embedded() -> (TempDir, MemoryManager) {
        let tmp = TempDir::new().unwrap();
        let sqlite = Arc::new(SqliteStore::new(tmp.path()).unwrap());
        let index: Arc<dyn VectorIndex> = Arc::new(MemoryIndex::new());
        let store = Arc::new(MemoryStore::new(sqlite, index));
        let provider: Arc<dyn EmbeddingProvider> = Arc::new(HashEmbedding::new(64));
        let manager = MemoryManager::from_parts(
            provider,
            store,
            RankingConfig::default(),
            ReflectionConfig::default(),
        );
        (tmp, manager)
    }

    #[test]
    fn classify_goal() {
        assert_eq!(classify("I want to run a marathon"), InteractionType::Goal);
        assert_eq!(classify("My goal is to read more"), InteractionType::Goal);
    }

    #[test]
    fn classify_struggle() {
        assert_eq!(
            classify("I'm struggling to stay consistent"),
            InteractionType::Struggle
        );
        assert_eq!(
            classify("Having a hard time waking up early"),
            InteractionType::Struggle
        );
    }

    #[test]
    fn classify_achievement() {
        assert_eq!(
            classify("I finished my first 10k today!"),
            InteractionType::Achievement
        );
        assert_eq!(
            classify("Really proud of sticking with it"),
            InteractionType::Achievement
        );
    }

    #[test]
    fn classify_habit() {
        assert_eq!(
            classify("I meditate every day before work"),
            InteractionType::Habit
        );
    }

    #[test]
    fn classify_general_fallthrough() {
        assert_eq!(classify("The weather was nice"), InteractionType::General);
        assert_eq!(classify(""), InteractionType::General);
    }

    #[test]
    fn format_context_renders_numbered_lines() {
        let memory = MemoryRecord {
            id: "m1".into(),
            owner_id: "u1".into(),
            content: "I want to run a marathon".into(),
            interaction_type: InteractionType::Goal,
            embedding: vec![0.0; 4],
            encoder: EncoderKind::Fallback,
            created_at: 1_700_000_000_000, // 2023-11-14
            metadata: HashMap::new(),
            indexed: true,
        };
        let rendered = format_context(&[ScoredMemory { memory, score: 0.9 }]);
        assert!(rendered.starts_with("Relevant past memories:\n"));
        assert!(rendered.contains("1. [GOAL] (2023-11-14): I want to run a marathon"));
    }

    #[test]
    fn format_context_empty_case() {
        assert_eq!(format_context(&[]), "No relevant past memories.");
    }

    #[tokio::test]
    async fn record_and_retrieve_roundtrip() {
        let (_tmp, manager) = manager_with_embedded();
        let outcome = manager
            .record("u1", "I want to run a marathon", InteractionType::Goal, HashMap::new())
            .await
            .unwrap();
        assert!(outcome.indexed);

        let context = manager
            .retrieve_context("u1", "marathon", None)
            .await
            .unwrap();
        assert_eq!(context.len(), 1);
        assert_eq!(context[0].memory.content, "I want to run a marathon");
    }

    #[tokio::test]
    async fn record_classified_assigns_category() {
        let (_tmp, manager) = manager_with_embedded();
        let outcome = manager
            .record_classified("u1", "I'm struggling with early mornings", HashMap::new())
            .await
            .unwrap();
        assert_eq!(outcome.memory.interaction_type, InteractionType::Struggle);
    }

    #[tokio::test]
    async fn erase_through_facade() {
        let (_tmp, manager) = manager_with_embedded();
        let outcome = manager
            .record("u1", "temporary note", InteractionType::General, HashMap::new())
            .await
            .unwrap();
        assert!(manager.erase("u1", &outcome.memory.id).await.unwrap());
        assert!(manager
            .retrieve_context("u1", "temporary", None)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn reflect_includes_recent_memories() {
        let (_tmp, manager) = manager_with_embedded();
        let now = Utc::now().timestamp_millis();
        manager
            .record("u1", "ran five kilometres", InteractionType::Habit, HashMap::new())
            .await
            .unwrap();

        let bundle = manager
            .reflect_at("u1", JourneySnapshot::default(), now + 1000)
            .await
            .unwrap();
        assert_eq!(bundle.conversations.len(), 1);
    }
}
