//! `manifest.json`: what the last executing run produced.
//!
//! Checksums are informational. The stage cache keys on file existence
//! only, so a changed checksum never triggers recomputation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use coursegraph_shared::CURRENT_SCHEMA_VERSION;

/// Manifest file name at the artifact directory root.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Metadata for a single artifact file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMeta {
    pub name: String,
    pub file: String,
    pub sha256: String,
    pub size_bytes: usize,
}

/// Summary of the most recent run that executed at least one stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunManifest {
    /// Schema version for forward compatibility.
    pub schema_version: u32,
    /// Time-sortable run identifier.
    pub run_id: Uuid,
    /// Tool version that wrote the manifest.
    pub tool_version: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    /// Embedding model identifier used (or that would have been used).
    pub embedding_model: String,
    /// Stages that executed in this run.
    pub executed_stages: Vec<String>,
    /// Every artifact present after the run.
    pub artifacts: Vec<ArtifactMeta>,
}

impl RunManifest {
    /// Start a manifest for a new run.
    pub fn begin(tool_version: impl Into<String>, embedding_model: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            run_id: Uuid::now_v7(),
            tool_version: tool_version.into(),
            started_at: now,
            completed_at: now,
            embedding_model: embedding_model.into(),
            executed_stages: Vec::new(),
            artifacts: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_serialization() {
        let mut manifest = RunManifest::begin("0.1.0", "all-MiniLM-L6-v2");
        manifest.executed_stages.push("graphs".into());
        manifest.artifacts.push(ArtifactMeta {
            name: "records".into(),
            file: "records.json".into(),
            sha256: "0".repeat(64),
            size_bytes: 10,
        });

        let json = serde_json::to_string_pretty(&manifest).expect("serialize");
        let parsed: RunManifest = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed.schema_version, CURRENT_SCHEMA_VERSION);
        assert_eq!(parsed.run_id, manifest.run_id);
        assert_eq!(parsed.artifacts, manifest.artifacts);
    }
}
