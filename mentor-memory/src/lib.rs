//! Mentor Memory - semantic memory engine for the mentor assistant.
//!
//! Stores each interaction as a categorized, embedded memory and
//! retrieves ranked context for ongoing conversations and periodic
//! reflections.
//!
//! ## Architecture
//!
//! Dual storage: SQLite holds the canonical records, a vector index
//! (Qdrant or embedded) serves similarity search. Retrieval combines
//! cosine similarity with recency decay and per-category boosts:
//!
//! ```text
//! Query → Embedding → Index Top-K ──→ Composite Rank → Dedupe → Context
//!                         │ (unavailable)
//!                         └──────────→ Recency-only from SQLite
//! ```
//!
//! The relational write is the commit point; index upserts are
//! best-effort and reconciled in the background.

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod embeddings;
pub mod error;
pub mod index;
pub mod manager;
pub mod qdrant;
pub mod reflection;
pub mod retrieval;
pub mod sqlite;
pub mod store;
pub mod types;
pub mod vector;

// Re-export commonly used types
pub use embeddings::{create_embedding_provider, Embedding, EmbeddingProvider, HashEmbedding, OpenAiEmbedding};
pub use error::{MemoryError, Result};
pub use index::{IndexFilter, IndexPayload, IndexPoint, MemoryIndex, ScoredPoint, VectorIndex};
pub use manager::{classify, format_context, MemoryManager};
pub use qdrant::QdrantIndex;
pub use reflection::{
    GoalSummary, HabitLogSummary, JourneySnapshot, ReflectionAggregator, ReflectionBundle,
};
pub use retrieval::ContextAssembler;
pub use sqlite::SqliteStore;
pub use store::{new_record, MemoryStore};
pub use types::{EncoderKind, InteractionType, MemoryRecord, RecordOutcome, ScoredMemory};
