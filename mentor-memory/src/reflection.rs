//! Periodic reflection bundles.
//!
//! A bundle gathers three ordered sections for a reflection period:
//! the caller-supplied goals and habit snapshot, the most recent
//! conversation memories inside the lookback window, and the themes
//! surfaced by a synthetic retrieval query. The aggregator produces
//! the structured document only; prompting and generation happen
//! upstream.

use crate::error::Result;
use crate::retrieval::ContextAssembler;
use crate::store::MemoryStore;
use crate::types::InteractionType;
use chrono::Utc;
use mentor_common::ReflectionConfig;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

const DAY_MS: i64 = 86_400_000;

/// One goal in the journey snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoalSummary {
    pub title: String,
    /// Free-form progress note
    #[serde(default)]
    pub progress: Option<String>,
}

/// One habit's activity inside the lookback window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HabitLogSummary {
    pub habit: String,
    pub completions: u32,
}

/// Goals and habit activity for the period, supplied by the upstream
/// collaborator that owns goal and habit tracking.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JourneySnapshot {
    pub active_goals: Vec<GoalSummary>,
    pub completed_goals: Vec<GoalSummary>,
    pub habit_logs: Vec<HabitLogSummary>,
}

/// One conversation memory in the bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationEntry {
    pub content: String,
    pub interaction_type: InteractionType,
    pub created_at: i64,
}

/// One theme surfaced by retrieval, with its ranking score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThemeEntry {
    pub content: String,
    pub interaction_type: InteractionType,
    pub score: f32,
}

/// The assembled reflection input document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReflectionBundle {
    pub owner_id: String,
    pub generated_at: i64,
    pub lookback_days: u32,
    pub goals_habits: JourneySnapshot,
    pub conversations: Vec<ConversationEntry>,
    pub themes: Vec<ThemeEntry>,
}

impl ReflectionBundle {
    /// Total content size in characters, for budget enforcement.
    pub fn char_len(&self) -> usize {
        let goals: usize = self
            .goals_habits
            .active_goals
            .iter()
            .chain(&self.goals_habits.completed_goals)
            .map(|g| g.title.len() + g.progress.as_deref().map_or(0, str::len))
            .sum();
        let habits: usize = self
            .goals_habits
            .habit_logs
            .iter()
            .map(|h| h.habit.len())
            .sum();
        let conversations: usize = self.conversations.iter().map(|c| c.content.len()).sum();
        let themes: usize = self.themes.iter().map(|t| t.content.len()).sum();
        goals + habits + conversations + themes
    }
}

/// Builds reflection bundles from the memory stores.
pub struct ReflectionAggregator {
    store: Arc<MemoryStore>,
    assembler: Arc<ContextAssembler>,
    config: ReflectionConfig,
}

impl ReflectionAggregator {
    pub fn new(
        store: Arc<MemoryStore>,
        assembler: Arc<ContextAssembler>,
        config: ReflectionConfig,
    ) -> Self {
        Self {
            store,
            assembler,
            config,
        }
    }

    /// Build a bundle for the period ending now.
    pub async fn build(&self, owner_id: &str, snapshot: JourneySnapshot) -> Result<ReflectionBundle> {
        self.build_at(owner_id, snapshot, Utc::now().timestamp_millis())
            .await
    }

    /// Build a bundle for the period ending at `now_ms`.
    ///
    /// Over budget, lowest-ranked themes are dropped first, then the
    /// oldest conversations. The goals/habits section is never
    /// dropped.
    pub async fn build_at(
        &self,
        owner_id: &str,
        snapshot: JourneySnapshot,
        now_ms: i64,
    ) -> Result<ReflectionBundle> {
        let since = now_ms - i64::from(self.config.lookback_days) * DAY_MS;

        let conversations = self
            .store
            .sqlite()
            .list(owner_id, None, Some(since), Some(self.config.max_conversations))
            .await?
            .into_iter()
            .map(|record| ConversationEntry {
                content: record.content,
                interaction_type: record.interaction_type,
                created_at: record.created_at,
            })
            .collect();

        // Transient index failures already degrade inside the
        // assembler, so theme retrieval never aborts the bundle.
        let themes = self
            .assembler
            .retrieve_at(owner_id, &self.config.theme_query, self.config.theme_count, now_ms)
            .await?
            .into_iter()
            .map(|scored| ThemeEntry {
                content: scored.memory.content,
                interaction_type: scored.memory.interaction_type,
                score: scored.score,
            })
            .collect();

        let mut bundle = ReflectionBundle {
            owner_id: owner_id.to_string(),
            generated_at: now_ms,
            lookback_days: self.config.lookback_days,
            goals_habits: snapshot,
            conversations,
            themes,
        };

        self.enforce_budget(&mut bundle);
        debug!(
            owner = owner_id,
            conversations = bundle.conversations.len(),
            themes = bundle.themes.len(),
            chars = bundle.char_len(),
            "built reflection bundle"
        );
        Ok(bundle)
    }

    fn enforce_budget(&self, bundle: &mut ReflectionBundle) {
        // Themes arrive ranked best-first, conversations newest-first,
        // so popping from the back drops the least valuable item.
        while bundle.char_len() > self.config.budget_chars && !bundle.themes.is_empty() {
            bundle.themes.pop();
        }
        while bundle.char_len() > self.config.budget_chars && !bundle.conversations.is_empty() {
            bundle.conversations.pop();
        }
    }
}
