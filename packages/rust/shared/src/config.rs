//! Application configuration for coursegraph.
//!
//! User config lives at `~/.coursegraph/coursegraph.toml`.
//! CLI flags override config file values, which override defaults.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{CourseGraphError, Result};
use crate::types::{TextField, normalize_code};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "coursegraph.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".coursegraph";

// ---------------------------------------------------------------------------
// Config structs (matching coursegraph.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Input and output locations.
    #[serde(default)]
    pub paths: PathsConfig,

    /// Embedding provider settings.
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Similarity and bipartite graph settings.
    #[serde(default)]
    pub graph: GraphConfig,

    /// Community detection settings.
    #[serde(default)]
    pub community: CommunityConfig,

    /// 2D projection settings.
    #[serde(default)]
    pub projection: ProjectionConfig,

    /// Scope filter and mandatory-course settings.
    #[serde(default)]
    pub fusion: FusionConfig,
}

/// `[paths]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// JSON file with one record per course, produced by the crawler.
    #[serde(default = "default_raw_records")]
    pub raw_records: PathBuf,

    /// Directory holding every persisted artifact.
    #[serde(default = "default_artifact_dir")]
    pub artifact_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            raw_records: default_raw_records(),
            artifact_dir: default_artifact_dir(),
        }
    }
}

fn default_raw_records() -> PathBuf {
    PathBuf::from("data/output.json")
}
fn default_artifact_dir() -> PathBuf {
    PathBuf::from("data/artifacts")
}

/// Which embedding backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderKind {
    /// Deterministic offline feature-hashing embedder.
    Hashing,
    /// OpenAI-compatible `/embeddings` endpoint.
    Http,
}

/// `[embedding]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Backend selection.
    #[serde(default = "default_provider")]
    pub provider: EmbeddingProviderKind,

    /// Embedding model identifier.
    #[serde(default = "default_model")]
    pub model: String,

    /// Base URL of the embedding server (used by the `http` provider).
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Output vector dimension.
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,

    /// Texts per request.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Ordered text columns concatenated before embedding.
    #[serde(default = "default_text_columns")]
    pub text_columns: Vec<TextField>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            endpoint: default_endpoint(),
            api_key_env: default_api_key_env(),
            dimensions: default_dimensions(),
            batch_size: default_batch_size(),
            text_columns: default_text_columns(),
        }
    }
}

fn default_provider() -> EmbeddingProviderKind {
    EmbeddingProviderKind::Hashing
}
fn default_model() -> String {
    "all-MiniLM-L6-v2".into()
}
fn default_endpoint() -> String {
    "http://localhost:8080/v1".into()
}
fn default_api_key_env() -> String {
    "COURSEGRAPH_EMBEDDING_API_KEY".into()
}
fn default_dimensions() -> usize {
    384
}
fn default_batch_size() -> usize {
    32
}
fn default_text_columns() -> Vec<TextField> {
    vec![TextField::Objectives, TextField::Rationale, TextField::Syllabus]
}

/// `[graph]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Neighbors per course in the similarity graph.
    #[serde(default = "default_k")]
    pub k: usize,

    /// Separator between names in the instructor list.
    #[serde(default = "default_separator")]
    pub instructor_separator: String,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            k: default_k(),
            instructor_separator: default_separator(),
        }
    }
}

fn default_k() -> usize {
    5
}
fn default_separator() -> String {
    " | ".into()
}

/// `[community]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommunityConfig {
    /// Seed for the node visiting order.
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Modularity resolution (1.0 = classic modularity).
    #[serde(default = "default_resolution")]
    pub resolution: f64,
}

impl Default for CommunityConfig {
    fn default() -> Self {
        Self {
            seed: default_seed(),
            resolution: default_resolution(),
        }
    }
}

fn default_seed() -> u64 {
    42
}
fn default_resolution() -> f64 {
    1.0
}

/// Dimensionality reduction used for the plotting tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectionMethod {
    Pca,
    Tsne,
}

impl ProjectionMethod {
    /// Short lowercase name, also used in artifact file names.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pca => "pca",
            Self::Tsne => "tsne",
        }
    }
}

/// `[projection]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectionConfig {
    /// Projection tables to produce.
    #[serde(default = "default_methods")]
    pub methods: Vec<ProjectionMethod>,

    /// t-SNE perplexity.
    #[serde(default = "default_perplexity")]
    pub perplexity: f64,

    /// t-SNE gradient descent iterations.
    #[serde(default = "default_iterations")]
    pub iterations: usize,
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self {
            methods: default_methods(),
            perplexity: default_perplexity(),
            iterations: default_iterations(),
        }
    }
}

fn default_methods() -> Vec<ProjectionMethod> {
    vec![ProjectionMethod::Pca, ProjectionMethod::Tsne]
}
fn default_perplexity() -> f64 {
    30.0
}
fn default_iterations() -> usize {
    1000
}

/// `[fusion]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FusionConfig {
    /// Organizational units kept in the fused artifacts. Empty keeps all.
    #[serde(default)]
    pub scope_allow_list: Vec<String>,

    /// Course codes flagged as mandatory.
    #[serde(default)]
    pub mandatory_courses: Vec<String>,

    /// Optional file with one mandatory course code per line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mandatory_courses_file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Run config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime pipeline configuration, merged from config file + CLI flags.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Raw crawler output.
    pub raw_records: PathBuf,
    /// Artifact directory.
    pub artifact_dir: PathBuf,
    /// Embedding settings.
    pub embedding: EmbeddingConfig,
    /// Similarity graph neighbor count.
    pub k: usize,
    /// Instructor list separator.
    pub instructor_separator: String,
    /// Community detection seed.
    pub seed: u64,
    /// Modularity resolution.
    pub resolution: f64,
    /// Projection settings.
    pub projection: ProjectionConfig,
    /// Allowed organizational units (empty = all).
    pub scope_allow_list: BTreeSet<String>,
    /// Mandatory course codes, listed inline.
    pub mandatory_courses: Vec<String>,
    /// Mandatory course codes, one per line.
    pub mandatory_courses_file: Option<PathBuf>,
}

impl From<&AppConfig> for RunConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            raw_records: config.paths.raw_records.clone(),
            artifact_dir: config.paths.artifact_dir.clone(),
            embedding: config.embedding.clone(),
            k: config.graph.k,
            instructor_separator: config.graph.instructor_separator.clone(),
            seed: config.community.seed,
            resolution: config.community.resolution,
            projection: config.projection.clone(),
            scope_allow_list: config.fusion.scope_allow_list.iter().cloned().collect(),
            mandatory_courses: config.fusion.mandatory_courses.clone(),
            mandatory_courses_file: config.fusion.mandatory_courses_file.clone(),
        }
    }
}

impl RunConfig {
    /// Check value ranges that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.k == 0 {
            return Err(CourseGraphError::config("graph.k must be at least 1"));
        }
        if self.instructor_separator.trim().is_empty() {
            return Err(CourseGraphError::config(
                "graph.instructor_separator must not be blank",
            ));
        }
        if self.embedding.dimensions == 0 {
            return Err(CourseGraphError::config(
                "embedding.dimensions must be at least 1",
            ));
        }
        if self.embedding.batch_size == 0 {
            return Err(CourseGraphError::config(
                "embedding.batch_size must be at least 1",
            ));
        }
        if self.embedding.text_columns.is_empty() {
            return Err(CourseGraphError::config(
                "embedding.text_columns must name at least one column",
            ));
        }
        if !(self.projection.perplexity > 0.0) {
            return Err(CourseGraphError::config(
                "projection.perplexity must be positive",
            ));
        }
        if !(self.resolution > 0.0) {
            return Err(CourseGraphError::config(
                "community.resolution must be positive",
            ));
        }
        Ok(())
    }

    /// The full mandatory course set (inline list plus file), normalized.
    pub fn mandatory_set(&self) -> Result<BTreeSet<String>> {
        let mut set: BTreeSet<String> = self
            .mandatory_courses
            .iter()
            .map(|c| normalize_code(c))
            .filter(|c| !c.is_empty())
            .collect();

        if let Some(path) = &self.mandatory_courses_file {
            let content =
                std::fs::read_to_string(path).map_err(|e| CourseGraphError::io(path, e))?;
            set.extend(parse_code_list(&content));
        }

        Ok(set)
    }
}

/// Parse a newline-separated code list; blank lines and `#` comments are ignored.
pub fn parse_code_list(content: &str) -> Vec<String> {
    content
        .lines()
        .map(|line| line.split('#').next().unwrap_or_default())
        .map(normalize_code)
        .filter(|code| !code.is_empty())
        .collect()
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.coursegraph/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| CourseGraphError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.coursegraph/coursegraph.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| CourseGraphError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        CourseGraphError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| CourseGraphError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| CourseGraphError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| CourseGraphError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Check that the HTTP embedding endpoint parses and its API key env var is usable.
///
/// Returns the API key, or `None` when the variable is unset (local servers
/// commonly run without authentication).
pub fn resolve_embedding_endpoint(config: &EmbeddingConfig) -> Result<(Url, Option<String>)> {
    let url = Url::parse(&config.endpoint).map_err(|e| {
        CourseGraphError::config(format!(
            "invalid embedding endpoint '{}': {e}",
            config.endpoint
        ))
    })?;

    let key = match std::env::var(&config.api_key_env) {
        Ok(val) if !val.trim().is_empty() => Some(val),
        _ => None,
    };

    Ok((url, key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("artifact_dir"));
        assert!(toml_str.contains("COURSEGRAPH_EMBEDDING_API_KEY"));
        assert!(toml_str.contains("objectives"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.graph.k, 5);
        assert_eq!(parsed.community.seed, 42);
        assert_eq!(parsed.embedding.provider, EmbeddingProviderKind::Hashing);
        assert_eq!(
            parsed.projection.methods,
            vec![ProjectionMethod::Pca, ProjectionMethod::Tsne]
        );
    }

    #[test]
    fn config_with_scopes() {
        let toml_str = r#"
[graph]
k = 3

[fusion]
scope_allow_list = ["S1", "S2"]
mandatory_courses = [" X1 ", "X9"]

[embedding]
provider = "http"
text_columns = ["title", "syllabus"]
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.graph.k, 3);
        assert_eq!(config.graph.instructor_separator, " | ");
        assert_eq!(config.embedding.provider, EmbeddingProviderKind::Http);
        assert_eq!(
            config.embedding.text_columns,
            vec![TextField::Title, TextField::Syllabus]
        );

        let run = RunConfig::from(&config);
        assert_eq!(run.scope_allow_list.len(), 2);
        let mandatory = run.mandatory_set().expect("mandatory set");
        assert!(mandatory.contains("X1"));
        assert!(mandatory.contains("X9"));
    }

    #[test]
    fn run_config_validation() {
        let mut run = RunConfig::from(&AppConfig::default());
        assert!(run.validate().is_ok());

        run.k = 0;
        let err = run.validate().unwrap_err();
        assert!(err.to_string().contains("graph.k"));

        let mut run = RunConfig::from(&AppConfig::default());
        run.embedding.text_columns.clear();
        assert!(run.validate().is_err());
    }

    #[test]
    fn code_list_parsing() {
        let codes = parse_code_list("SME0100\n  SME0200  # core\n\n# comment only\nSCC0300\n");
        assert_eq!(codes, vec!["SME0100", "SME0200", "SCC0300"]);
    }

    #[test]
    fn mandatory_file_is_merged() {
        let path = std::env::temp_dir().join(format!(
            "cg-mandatory-{}.txt",
            uuid::Uuid::now_v7()
        ));
        std::fs::write(&path, "A1\nB2\n").unwrap();

        let mut run = RunConfig::from(&AppConfig::default());
        run.mandatory_courses = vec!["C3".into()];
        run.mandatory_courses_file = Some(path.clone());

        let set = run.mandatory_set().unwrap();
        assert_eq!(set.len(), 3);
        assert!(set.contains("B2"));

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn embedding_endpoint_must_parse() {
        let mut config = EmbeddingConfig::default();
        config.endpoint = "not a url".into();
        assert!(resolve_embedding_endpoint(&config).is_err());

        let mut config = EmbeddingConfig::default();
        config.api_key_env = "CG_TEST_NONEXISTENT_KEY_12345".into();
        let (url, key) = resolve_embedding_endpoint(&config).unwrap();
        assert_eq!(url.host_str(), Some("localhost"));
        assert!(key.is_none());
    }
}
