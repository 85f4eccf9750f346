//! Persisted pipeline artifacts.
//!
//! Every artifact is a JSON file under one artifact directory. Writes are
//! atomic (temp file, then rename) and, for stage outputs, write-if-absent:
//! an existing file is authoritative and is never overwritten. Deleting a
//! file is the only way to make its stage run again.

mod manifest;

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use tracing::debug;

use coursegraph_shared::{CourseGraphError, Result};

pub use manifest::{ArtifactMeta, MANIFEST_FILE, RunManifest};

// ---------------------------------------------------------------------------
// Artifact catalog
// ---------------------------------------------------------------------------

/// Every artifact the pipeline can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ArtifactKind {
    /// Preprocessed course records.
    Records,
    /// PCA projection table.
    ProjectionPca,
    /// t-SNE projection table.
    ProjectionTsne,
    /// k-NN similarity graph.
    SimilarityGraph,
    /// Course/instructor bipartite graph.
    BipartiteGraph,
    /// `{code, label, community_id}` table.
    Communities,
    /// Scope-filtered, enriched course table.
    FusedCourses,
    /// Re-scoped similarity graph.
    FusedSimilarityGraph,
    /// Re-scoped bipartite graph.
    FusedBipartiteGraph,
}

impl ArtifactKind {
    /// All artifacts in pipeline order.
    pub const ALL: [ArtifactKind; 9] = [
        Self::Records,
        Self::ProjectionPca,
        Self::ProjectionTsne,
        Self::SimilarityGraph,
        Self::BipartiteGraph,
        Self::Communities,
        Self::FusedCourses,
        Self::FusedSimilarityGraph,
        Self::FusedBipartiteGraph,
    ];

    /// Path relative to the artifact directory.
    pub fn file_name(&self) -> &'static str {
        match self {
            Self::Records => "records.json",
            Self::ProjectionPca => "projection_pca.json",
            Self::ProjectionTsne => "projection_tsne.json",
            Self::SimilarityGraph => "similarity_graph.json",
            Self::BipartiteGraph => "bipartite_graph.json",
            Self::Communities => "communities.json",
            Self::FusedCourses => "fused/courses.json",
            Self::FusedSimilarityGraph => "fused/similarity_graph.json",
            Self::FusedBipartiteGraph => "fused/bipartite_graph.json",
        }
    }

    /// Stable short name (CLI arguments, manifest entries).
    pub fn name(&self) -> &'static str {
        match self {
            Self::Records => "records",
            Self::ProjectionPca => "projection-pca",
            Self::ProjectionTsne => "projection-tsne",
            Self::SimilarityGraph => "similarity-graph",
            Self::BipartiteGraph => "bipartite-graph",
            Self::Communities => "communities",
            Self::FusedCourses => "fused-courses",
            Self::FusedSimilarityGraph => "fused-similarity-graph",
            Self::FusedBipartiteGraph => "fused-bipartite-graph",
        }
    }

    /// Look up an artifact by its short name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Whether a write-if-absent call produced a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    AlreadyPresent,
}

/// Presence and size of one artifact on disk.
#[derive(Debug, Clone)]
pub struct ArtifactStatus {
    pub kind: ArtifactKind,
    pub path: PathBuf,
    pub size_bytes: Option<u64>,
}

impl ArtifactStatus {
    pub fn exists(&self) -> bool {
        self.size_bytes.is_some()
    }
}

// ---------------------------------------------------------------------------
// ArtifactStore
// ---------------------------------------------------------------------------

/// Artifact directory with typed access to each artifact file.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute location of an artifact.
    pub fn path(&self, kind: ArtifactKind) -> PathBuf {
        self.root.join(kind.file_name())
    }

    pub fn exists(&self, kind: ArtifactKind) -> bool {
        self.path(kind).exists()
    }

    /// Serialize `value` into the artifact unless it already exists.
    pub fn write_if_absent<T: Serialize>(&self, kind: ArtifactKind, value: &T) -> Result<WriteOutcome> {
        write_json_if_absent(&self.path(kind), value)
    }

    /// Serialize `value` into the artifact, replacing any existing file.
    pub fn write<T: Serialize>(&self, kind: ArtifactKind, value: &T) -> Result<()> {
        let path = self.path(kind);
        write_json_atomic(&path, value)?;
        debug!(path = %path.display(), "artifact written");
        Ok(())
    }

    /// Read and deserialize an artifact; absent files are `MissingArtifact`.
    pub fn read<T: DeserializeOwned>(&self, kind: ArtifactKind) -> Result<T> {
        read_json(&self.path(kind))
    }

    /// Delete an artifact. Returns whether a file was removed.
    pub fn remove(&self, kind: ArtifactKind) -> Result<bool> {
        let path = self.path(kind);
        match std::fs::remove_file(&path) {
            Ok(()) => {
                debug!(path = %path.display(), "removed artifact");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CourseGraphError::io(&path, e)),
        }
    }

    /// Presence and size of every artifact.
    pub fn status(&self) -> Vec<ArtifactStatus> {
        ArtifactKind::ALL
            .into_iter()
            .map(|kind| {
                let path = self.path(kind);
                let size_bytes = std::fs::metadata(&path).ok().map(|m| m.len());
                ArtifactStatus {
                    kind,
                    path,
                    size_bytes,
                }
            })
            .collect()
    }

    /// Checksum and size of an existing artifact, `None` when absent.
    pub fn describe(&self, kind: ArtifactKind) -> Result<Option<ArtifactMeta>> {
        let path = self.path(kind);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(&path).map_err(|e| CourseGraphError::io(&path, e))?;
        Ok(Some(ArtifactMeta {
            name: kind.name().to_string(),
            file: kind.file_name().to_string(),
            sha256: sha256_hex(&bytes),
            size_bytes: bytes.len(),
        }))
    }

    /// Delete `manifest.json`. Returns whether a file was removed.
    pub fn remove_manifest(&self) -> Result<bool> {
        let path = self.root.join(MANIFEST_FILE);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CourseGraphError::io(&path, e)),
        }
    }

    /// Overwrite `manifest.json` atomically.
    pub fn write_manifest(&self, manifest: &RunManifest) -> Result<()> {
        write_json_atomic(&self.root.join(MANIFEST_FILE), manifest)
    }

    /// Read `manifest.json` if present.
    pub fn read_manifest(&self) -> Result<Option<RunManifest>> {
        let path = self.root.join(MANIFEST_FILE);
        if !path.exists() {
            return Ok(None);
        }
        read_json(&path).map(Some)
    }
}

// ---------------------------------------------------------------------------
// JSON file helpers
// ---------------------------------------------------------------------------

/// Write pretty JSON to `path` via a sibling temp file and a rename.
///
/// Parent directories are created as needed. A failed write leaves no file
/// at `path`.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;

    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent).map_err(|e| CourseGraphError::io(parent, e))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| CourseGraphError::validation(format!("not a file path: {}", path.display())))?;
    let temp = parent.join(format!(".{file_name}.tmp"));

    std::fs::write(&temp, json).map_err(|e| CourseGraphError::io(&temp, e))?;
    std::fs::rename(&temp, path).map_err(|e| CourseGraphError::io(path, e))?;

    debug!(path = %path.display(), "wrote JSON file");
    Ok(())
}

/// Write `value` unless `path` already exists (silent no-op).
pub fn write_json_if_absent<T: Serialize>(path: &Path, value: &T) -> Result<WriteOutcome> {
    if path.exists() {
        debug!(path = %path.display(), "artifact exists, write skipped");
        return Ok(WriteOutcome::AlreadyPresent);
    }
    write_json_atomic(path, value)?;
    Ok(WriteOutcome::Written)
}

/// Read a JSON file; an absent file is [`CourseGraphError::MissingArtifact`].
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    if !path.exists() {
        return Err(CourseGraphError::missing_artifact(path));
    }
    let content = std::fs::read_to_string(path).map_err(|e| CourseGraphError::io(path, e))?;
    serde_json::from_str(&content).map_err(|e| {
        CourseGraphError::Serialization(format!("invalid {}: {e}", path.display()))
    })
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("cg-artifacts-test-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn write_if_absent_keeps_existing_file() {
        let tmp = temp_dir();
        let store = ArtifactStore::new(&tmp);

        let first = store
            .write_if_absent(ArtifactKind::Communities, &vec![1, 2, 3])
            .unwrap();
        assert_eq!(first, WriteOutcome::Written);

        let second = store
            .write_if_absent(ArtifactKind::Communities, &vec![9])
            .unwrap();
        assert_eq!(second, WriteOutcome::AlreadyPresent);

        let stored: Vec<i32> = store.read(ArtifactKind::Communities).unwrap();
        assert_eq!(stored, vec![1, 2, 3]);

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn write_replaces_existing_file() {
        let tmp = temp_dir();
        let store = ArtifactStore::new(&tmp);

        store.write(ArtifactKind::FusedCourses, &vec![1, 2]).unwrap();
        store.write(ArtifactKind::FusedCourses, &vec![7]).unwrap();

        let stored: Vec<i32> = store.read(ArtifactKind::FusedCourses).unwrap();
        assert_eq!(stored, vec![7]);

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn nested_artifacts_create_directories() {
        let tmp = temp_dir();
        let store = ArtifactStore::new(&tmp);

        store
            .write_if_absent(ArtifactKind::FusedCourses, &serde_json::json!([]))
            .unwrap();
        assert!(tmp.join("fused/courses.json").exists());

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn atomic_write_leaves_no_temp_files() {
        let tmp = temp_dir();
        let path = tmp.join("table.json");
        write_json_atomic(&path, &serde_json::json!({"a": 1})).unwrap();

        for entry in std::fs::read_dir(&tmp).unwrap() {
            let name = entry.unwrap().file_name().to_string_lossy().to_string();
            assert!(!name.starts_with('.'), "temp file left behind: {name}");
        }

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn missing_artifact_is_reported() {
        let tmp = temp_dir();
        let store = ArtifactStore::new(&tmp);
        let err = store.read::<Vec<i32>>(ArtifactKind::SimilarityGraph).unwrap_err();
        assert!(matches!(err, CourseGraphError::MissingArtifact { .. }));

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn status_and_remove() {
        let tmp = temp_dir();
        let store = ArtifactStore::new(&tmp);
        store
            .write_if_absent(ArtifactKind::Records, &serde_json::json!([]))
            .unwrap();

        let status = store.status();
        assert_eq!(status.len(), ArtifactKind::ALL.len());
        assert!(status[0].exists());
        assert!(!status[1].exists());

        assert!(store.remove(ArtifactKind::Records).unwrap());
        assert!(!store.remove(ArtifactKind::Records).unwrap());
        assert!(!store.exists(ArtifactKind::Records));

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn describe_reports_checksum() {
        let tmp = temp_dir();
        let store = ArtifactStore::new(&tmp);
        assert!(store.describe(ArtifactKind::Records).unwrap().is_none());

        store
            .write_if_absent(ArtifactKind::Records, &serde_json::json!(["x"]))
            .unwrap();
        let meta = store.describe(ArtifactKind::Records).unwrap().unwrap();
        assert_eq!(meta.sha256.len(), 64);
        assert_eq!(meta.name, "records");
        assert!(meta.size_bytes > 0);

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn names_round_trip() {
        for kind in ArtifactKind::ALL {
            assert_eq!(ArtifactKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(ArtifactKind::from_name("nope"), None);
    }
}
