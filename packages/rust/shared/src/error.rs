//! Error types for coursegraph.
//!
//! Library crates use [`CourseGraphError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all coursegraph operations.
#[derive(Debug, thiserror::Error)]
pub enum CourseGraphError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// JSON/TOML (de)serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Shape or value error in stage input (fatal for the stage).
    #[error("input validation error: {message}")]
    InputValidation { message: String },

    /// Parallel inputs whose lengths or dimensions disagree.
    #[error("dimension mismatch for {what}: expected {expected}, found {found}")]
    DimensionMismatch {
        what: String,
        expected: usize,
        found: usize,
    },

    /// A required upstream artifact is absent and no in-memory value was supplied.
    #[error("missing artifact: {path:?}")]
    MissingArtifact { path: PathBuf },

    /// An algorithm received zero rows.
    #[error("empty input: {what}")]
    EmptyInput { what: String },

    /// Community detection received a graph with zero nodes.
    #[error("graph has no nodes")]
    EmptyGraph,

    /// Embedding provider failure (model server, response shape, ...).
    #[error("embedding error: {0}")]
    Embedding(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, CourseGraphError>;

impl CourseGraphError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create an input validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::InputValidation {
            message: msg.into(),
        }
    }

    /// Create a dimension mismatch error.
    pub fn dimension_mismatch(what: impl Into<String>, expected: usize, found: usize) -> Self {
        Self::DimensionMismatch {
            what: what.into(),
            expected,
            found,
        }
    }

    /// Create an empty input error.
    pub fn empty_input(what: impl Into<String>) -> Self {
        Self::EmptyInput { what: what.into() }
    }

    /// Create a missing artifact error for the given path.
    pub fn missing_artifact(path: impl Into<PathBuf>) -> Self {
        Self::MissingArtifact { path: path.into() }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<serde_json::Error> for CourseGraphError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = CourseGraphError::config("k must be at least 1");
        assert_eq!(err.to_string(), "config error: k must be at least 1");

        let err = CourseGraphError::dimension_mismatch("node_ids", 4, 3);
        assert_eq!(
            err.to_string(),
            "dimension mismatch for node_ids: expected 4, found 3"
        );

        let err = CourseGraphError::missing_artifact("data/artifacts/communities.json");
        assert!(err.to_string().contains("communities.json"));
    }

    #[test]
    fn empty_graph_message() {
        assert_eq!(CourseGraphError::EmptyGraph.to_string(), "graph has no nodes");
    }
}
