//! Shared configuration for the mentor memory engine.

#![warn(clippy::all)]

pub mod config;

pub use config::{
    config_dir, config_path, CategoryBoosts, ConfigError, EmbeddingConfig, IndexConfig,
    MentorConfig, RankingConfig, ReflectionConfig, StoreConfig,
};
