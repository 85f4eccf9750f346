//! Shared types, error model, and configuration for coursegraph.
//!
//! This crate is the foundation depended on by all other coursegraph crates.
//! It provides:
//! - [`CourseGraphError`]: the unified error type
//! - Domain types ([`CourseRecord`], [`TextField`], key normalization)
//! - Configuration ([`AppConfig`], [`RunConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, CommunityConfig, EmbeddingConfig, EmbeddingProviderKind, FusionConfig,
    GraphConfig, PathsConfig, ProjectionConfig, ProjectionMethod, RunConfig, config_dir,
    config_file_path, init_config, load_config, load_config_from, parse_code_list,
    resolve_embedding_endpoint,
};
pub use error::{CourseGraphError, Result};
pub use types::{
    CURRENT_SCHEMA_VERSION, CourseRecord, TextField, UNKNOWN_SCOPE, UNKNOWN_TITLE,
    code_from_json, normalize_code, parse_workload_hours,
};
