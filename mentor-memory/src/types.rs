//! Core record types for the mentor memory engine.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Category of a stored interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InteractionType {
    /// Stated goal or intention
    Goal,
    /// Habit log entry
    Habit,
    /// Reported difficulty or challenge
    Struggle,
    /// Completed or accomplished outcome
    Achievement,
    /// General conversation turn
    General,
    /// Generated reflection
    Reflection,
}

impl InteractionType {
    /// All categories, for iteration in tests and tooling.
    pub const ALL: [Self; 6] = [
        Self::Goal,
        Self::Habit,
        Self::Struggle,
        Self::Achievement,
        Self::General,
        Self::Reflection,
    ];
}

impl std::fmt::Display for InteractionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Goal => write!(f, "goal"),
            Self::Habit => write!(f, "habit"),
            Self::Struggle => write!(f, "struggle"),
            Self::Achievement => write!(f, "achievement"),
            Self::General => write!(f, "general"),
            Self::Reflection => write!(f, "reflection"),
        }
    }
}

impl From<&str> for InteractionType {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "goal" => Self::Goal,
            "habit" => Self::Habit,
            "struggle" => Self::Struggle,
            "achievement" => Self::Achievement,
            "reflection" => Self::Reflection,
            _ => Self::General,
        }
    }
}

/// Which encoder variant produced a vector.
///
/// Vectors from different variants are never compared in one ranking;
/// index queries filter on the query vector's variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncoderKind {
    /// Trained text encoder
    Model,
    /// Deterministic hash encoder
    Fallback,
}

impl std::fmt::Display for EncoderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Model => write!(f, "model"),
            Self::Fallback => write!(f, "fallback"),
        }
    }
}

impl From<&str> for EncoderKind {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "model" => Self::Model,
            _ => Self::Fallback,
        }
    }
}

/// A stored memory with its embedding and indexing status.
///
/// Content is immutable after creation; corrections are new memories.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Unique id (uuid v4)
    pub id: String,
    /// Owning user. Every query is scoped to one owner.
    pub owner_id: String,
    /// The stored text
    pub content: String,
    /// Category tag
    pub interaction_type: InteractionType,
    /// Embedding vector of length D
    pub embedding: Vec<f32>,
    /// Encoder variant that produced the vector
    pub encoder: EncoderKind,
    /// Creation timestamp (Unix millis)
    pub created_at: i64,
    /// Free-form metadata
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// Whether the vector index holds this record. A false value only
    /// excludes the memory from similarity search until reconciled;
    /// relational reads are unaffected.
    pub indexed: bool,
}

impl MemoryRecord {
    /// Age of this memory at `now_ms`, in fractional days.
    pub fn age_days(&self, now_ms: i64) -> f32 {
        const DAY_MS: f32 = 86_400_000.0;
        ((now_ms - self.created_at).max(0) as f32) / DAY_MS
    }
}

/// A memory paired with its composite retrieval score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredMemory {
    pub memory: MemoryRecord,
    pub score: f32,
}

/// Outcome of a record operation.
///
/// `indexed == false` signals that content was stored but similarity
/// recall is temporarily reduced until the reconciler catches up.
#[derive(Debug, Clone)]
pub struct RecordOutcome {
    pub memory: MemoryRecord,
    pub indexed: bool,
}
