//! End-to-end run: records → embeddings → projections → graphs →
//! communities → fused artifacts.
//!
//! Every stage checks for its output files first and is skipped when they
//! exist. Inputs a later stage needs are read back from disk lazily, so a
//! second run over an unchanged artifact directory computes and writes
//! nothing.

use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use ndarray::Array2;
use serde::Serialize;
use tracing::{debug, info, instrument};

use coursegraph_artifacts::{ArtifactKind, ArtifactStore, RunManifest, WriteOutcome};
use coursegraph_embeddings::{EmbeddingProvider, build_provider, embed_all};
use coursegraph_graph::{
    BipartiteGraphBuilder, CommunityDetector, CommunityRow, Graph, SimilarityGraphBuilder,
};
use coursegraph_shared::{CourseGraphError, CourseRecord, ProjectionMethod, Result, RunConfig};

use crate::fusion::{ArtifactFusionEngine, FusionReport, Input};
use crate::projection::ProjectionReducer;
use crate::records::{embedding_text, graph_columns, load_raw_records, preprocess};

/// Orchestrator position. Each transition runs one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    EmbeddingReady,
    ProjectionsReady,
    GraphsReady,
    CommunityReady,
    ArtifactsFused,
    Done,
}

/// A unit of work whose outcome is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Records,
    Embedding,
    Projections,
    SimilarityGraph,
    BipartiteGraph,
    Communities,
    Fusion,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Records => "records",
            Self::Embedding => "embedding",
            Self::Projections => "projections",
            Self::SimilarityGraph => "similarity_graph",
            Self::BipartiteGraph => "bipartite_graph",
            Self::Communities => "communities",
            Self::Fusion => "fusion",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    Executed,
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub stage: Stage,
    pub outcome: StageOutcome,
}

/// Result of a pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub state: PipelineState,
    pub artifact_dir: PathBuf,
    pub stages: Vec<StageReport>,
    /// Present when fusion executed.
    pub fusion: Option<FusionReport>,
    pub elapsed: Duration,
}

impl PipelineReport {
    pub fn outcome(&self, stage: Stage) -> Option<StageOutcome> {
        self.stages
            .iter()
            .find(|s| s.stage == stage)
            .map(|s| s.outcome)
    }

    pub fn executed(&self) -> impl Iterator<Item = Stage> + '_ {
        self.stages
            .iter()
            .filter(|s| s.outcome == StageOutcome::Executed)
            .map(|s| s.stage)
    }
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when a stage starts.
    fn stage_started(&self, stage: Stage);
    /// Called when a stage finished or was skipped.
    fn stage_finished(&self, stage: Stage, outcome: StageOutcome);
    /// Called when the pipeline completes.
    fn done(&self, report: &PipelineReport);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn stage_started(&self, _stage: Stage) {}
    fn stage_finished(&self, _stage: Stage, _outcome: StageOutcome) {}
    fn done(&self, _report: &PipelineReport) {}
}

/// Run the whole pipeline with the embedding provider named in `config`.
pub fn run_pipeline(config: &RunConfig, progress: &dyn ProgressReporter) -> Result<PipelineReport> {
    config.validate()?;
    let provider = build_provider(&config.embedding)?;
    PipelineOrchestrator::new(config.clone(), provider, progress).run()
}

/// Stage sequencer with a file-existence cache.
pub struct PipelineOrchestrator<'p> {
    config: RunConfig,
    store: ArtifactStore,
    provider: Box<dyn EmbeddingProvider>,
    progress: &'p dyn ProgressReporter,
    state: PipelineState,
    stages: Vec<StageReport>,
    fusion: Option<FusionReport>,
    records: Option<Vec<CourseRecord>>,
    embeddings: Option<Array2<f32>>,
    similarity: Option<Graph>,
    bipartite: Option<Graph>,
    communities: Option<Vec<CommunityRow>>,
}

impl<'p> PipelineOrchestrator<'p> {
    pub fn new(
        config: RunConfig,
        provider: Box<dyn EmbeddingProvider>,
        progress: &'p dyn ProgressReporter,
    ) -> Self {
        let store = ArtifactStore::new(&config.artifact_dir);
        Self {
            config,
            store,
            provider,
            progress,
            state: PipelineState::Idle,
            stages: Vec::new(),
            fusion: None,
            records: None,
            embeddings: None,
            similarity: None,
            bipartite: None,
            communities: None,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Advance until `Done`. A failing stage aborts the run; artifacts
    /// written by earlier stages stay on disk.
    #[instrument(skip_all, fields(artifact_dir = %self.config.artifact_dir.display()))]
    pub fn run(mut self) -> Result<PipelineReport> {
        let start = Instant::now();
        let mut manifest = RunManifest::begin(env!("CARGO_PKG_VERSION"), self.provider.model_id());
        info!("starting pipeline");

        while self.state != PipelineState::Done {
            self.advance()?;
        }

        let executed: Vec<String> = self
            .stages
            .iter()
            .filter(|s| s.outcome == StageOutcome::Executed)
            .map(|s| s.stage.to_string())
            .collect();

        if executed.is_empty() {
            debug!("nothing executed, manifest left untouched");
        } else {
            manifest.executed_stages = executed;
            for kind in ArtifactKind::ALL {
                if let Some(meta) = self.store.describe(kind)? {
                    manifest.artifacts.push(meta);
                }
            }
            manifest.completed_at = chrono::Utc::now();
            self.store.write_manifest(&manifest)?;
        }

        let report = PipelineReport {
            state: self.state,
            artifact_dir: self.config.artifact_dir.clone(),
            stages: self.stages,
            fusion: self.fusion,
            elapsed: start.elapsed(),
        };
        self.progress.done(&report);

        info!(
            executed = report.executed().count(),
            elapsed_ms = report.elapsed.as_millis(),
            "pipeline complete"
        );
        Ok(report)
    }

    /// Run the stage leaving the current state.
    pub fn advance(&mut self) -> Result<PipelineState> {
        let next = match self.state {
            PipelineState::Idle => {
                self.records_stage()?;
                self.embedding_stage()?;
                PipelineState::EmbeddingReady
            }
            PipelineState::EmbeddingReady => {
                self.projection_stage()?;
                PipelineState::ProjectionsReady
            }
            PipelineState::ProjectionsReady => {
                self.similarity_stage()?;
                self.bipartite_stage()?;
                PipelineState::GraphsReady
            }
            PipelineState::GraphsReady => {
                self.community_stage()?;
                PipelineState::CommunityReady
            }
            PipelineState::CommunityReady => {
                self.fusion_stage()?;
                PipelineState::ArtifactsFused
            }
            PipelineState::ArtifactsFused | PipelineState::Done => PipelineState::Done,
        };
        debug!(from = ?self.state, to = ?next, "state transition");
        self.state = next;
        Ok(next)
    }

    fn finish(&mut self, stage: Stage, outcome: StageOutcome) {
        match outcome {
            StageOutcome::Executed => info!(%stage, "stage executed"),
            StageOutcome::Skipped => debug!(%stage, "stage skipped, outputs exist"),
        }
        self.progress.stage_finished(stage, outcome);
        self.stages.push(StageReport { stage, outcome });
    }

    fn projection_kinds(&self) -> Vec<(ProjectionMethod, ArtifactKind)> {
        self.config
            .projection
            .methods
            .iter()
            .map(|&method| (method, projection_artifact(method)))
            .collect()
    }

    // --- stages ---

    fn records_stage(&mut self) -> Result<()> {
        self.progress.stage_started(Stage::Records);
        let outcome = if self.store.exists(ArtifactKind::Records) {
            self.records = Some(self.store.read(ArtifactKind::Records)?);
            StageOutcome::Skipped
        } else {
            let raw = load_raw_records(&self.config.raw_records)?;
            let (records, _) = preprocess(raw);
            self.store.write_if_absent(ArtifactKind::Records, &records)?;
            self.records = Some(records);
            StageOutcome::Executed
        };
        self.finish(Stage::Records, outcome);
        Ok(())
    }

    fn embedding_stage(&mut self) -> Result<()> {
        self.progress.stage_started(Stage::Embedding);
        let needed = !self.store.exists(ArtifactKind::SimilarityGraph)
            || self
                .projection_kinds()
                .iter()
                .any(|(_, kind)| !self.store.exists(*kind));

        let outcome = if needed {
            let columns = self.config.embedding.text_columns.clone();
            let texts: Vec<String> = self
                .records()?
                .iter()
                .map(|r| embedding_text(r, &columns))
                .collect();
            self.embeddings = Some(embed_all(self.provider.as_ref(), &texts)?);
            StageOutcome::Executed
        } else {
            StageOutcome::Skipped
        };
        self.finish(Stage::Embedding, outcome);
        Ok(())
    }

    fn projection_stage(&mut self) -> Result<()> {
        self.progress.stage_started(Stage::Projections);
        let mut outcome = StageOutcome::Skipped;

        for (method, kind) in self.projection_kinds() {
            if self.store.exists(kind) {
                debug!(method = method.as_str(), "projection exists, skipping");
                continue;
            }
            let reducer = ProjectionReducer::new(method, &self.config.projection);
            let rows = reducer.project(self.embeddings()?, self.records.as_deref().unwrap_or_default())?;
            if self.store.write_if_absent(kind, &rows)? == WriteOutcome::Written {
                outcome = StageOutcome::Executed;
            }
        }

        self.finish(Stage::Projections, outcome);
        Ok(())
    }

    fn similarity_stage(&mut self) -> Result<()> {
        self.progress.stage_started(Stage::SimilarityGraph);
        let outcome = if self.store.exists(ArtifactKind::SimilarityGraph) {
            StageOutcome::Skipped
        } else {
            let (ids, labels, _) = graph_columns(self.records()?);
            let graph = SimilarityGraphBuilder::new(self.embeddings()?, &ids, &labels, self.config.k)?
                .build()?;
            self.store.write_if_absent(ArtifactKind::SimilarityGraph, &graph)?;
            self.similarity = Some(graph);
            StageOutcome::Executed
        };
        self.finish(Stage::SimilarityGraph, outcome);
        Ok(())
    }

    fn bipartite_stage(&mut self) -> Result<()> {
        self.progress.stage_started(Stage::BipartiteGraph);
        let outcome = if self.store.exists(ArtifactKind::BipartiteGraph) {
            StageOutcome::Skipped
        } else {
            let (ids, labels, instructors) = graph_columns(self.records()?);
            let graph = BipartiteGraphBuilder::new(
                &ids,
                &labels,
                &instructors,
                &self.config.instructor_separator,
            )?
            .build();
            self.store.write_if_absent(ArtifactKind::BipartiteGraph, &graph)?;
            self.bipartite = Some(graph);
            StageOutcome::Executed
        };
        self.finish(Stage::BipartiteGraph, outcome);
        Ok(())
    }

    fn community_stage(&mut self) -> Result<()> {
        self.progress.stage_started(Stage::Communities);
        let outcome = if self.store.exists(ArtifactKind::Communities) {
            StageOutcome::Skipped
        } else {
            let graph = match self.similarity.take() {
                Some(graph) => graph,
                None => self.store.read(ArtifactKind::SimilarityGraph)?,
            };
            let rows = CommunityDetector::new(&graph, self.config.seed)
                .with_resolution(self.config.resolution)
                .to_rows()?;
            self.store.write_if_absent(ArtifactKind::Communities, &rows)?;
            self.similarity = Some(graph);
            self.communities = Some(rows);
            StageOutcome::Executed
        };
        self.finish(Stage::Communities, outcome);
        Ok(())
    }

    fn fusion_stage(&mut self) -> Result<()> {
        self.progress.stage_started(Stage::Fusion);
        let outputs = [
            ArtifactKind::FusedCourses,
            ArtifactKind::FusedSimilarityGraph,
            ArtifactKind::FusedBipartiteGraph,
        ];
        if outputs.iter().all(|kind| self.store.exists(*kind)) {
            self.finish(Stage::Fusion, StageOutcome::Skipped);
            return Ok(());
        }

        let engine = ArtifactFusionEngine::new(
            self.config.scope_allow_list.clone(),
            self.config.mandatory_set()?,
            self.config.instructor_separator.clone(),
        );
        let output = engine.run(
            self.input(ArtifactKind::Records, self.records.clone()),
            self.input(ArtifactKind::Communities, self.communities.clone()),
            self.input(ArtifactKind::SimilarityGraph, self.similarity.clone()),
            self.input(ArtifactKind::BipartiteGraph, self.bipartite.clone()),
        )?;

        // the three fused files only agree when written from one fusion pass
        self.store.write(ArtifactKind::FusedCourses, &output.courses)?;
        self.store
            .write(ArtifactKind::FusedSimilarityGraph, &output.similarity)?;
        self.store
            .write(ArtifactKind::FusedBipartiteGraph, &output.bipartite)?;
        self.fusion = Some(output.report);

        self.finish(Stage::Fusion, StageOutcome::Executed);
        Ok(())
    }

    // --- lazy inputs ---

    fn records(&mut self) -> Result<&[CourseRecord]> {
        if self.records.is_none() {
            self.records = Some(self.store.read(ArtifactKind::Records)?);
        }
        Ok(self.records.as_deref().unwrap_or_default())
    }

    fn embeddings(&self) -> Result<&Array2<f32>> {
        self.embeddings
            .as_ref()
            .ok_or_else(|| CourseGraphError::validation("embeddings were not computed"))
    }

    fn input<T>(&self, kind: ArtifactKind, value: Option<T>) -> Input<T> {
        match value {
            Some(value) => Input::Value(value),
            None => Input::Path(self.store.path(kind)),
        }
    }
}

/// Artifact holding the table for a projection method.
pub fn projection_artifact(method: ProjectionMethod) -> ArtifactKind {
    match method {
        ProjectionMethod::Pca => ArtifactKind::ProjectionPca,
        ProjectionMethod::Tsne => ArtifactKind::ProjectionTsne,
    }
}
