//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use coursegraph_artifacts::{ArtifactKind, ArtifactStore};
use coursegraph_core::pipeline::{
    PipelineReport, ProgressReporter, Stage, StageOutcome, run_pipeline,
};
use coursegraph_shared::{
    AppConfig, EmbeddingProviderKind, RunConfig, init_config, load_config, load_config_from,
};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// coursegraph: course records to graphs, communities, and fused tables.
#[derive(Parser)]
#[command(
    name = "coursegraph",
    version,
    about = "Build similarity graphs, instructor graphs, communities, and projections from course records.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file (defaults to ~/.coursegraph/coursegraph.toml).
    #[arg(long, global = true, env = "COURSEGRAPH_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Embedding provider selectable from the command line.
#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub(crate) enum ProviderArg {
    Hashing,
    Http,
}

impl From<ProviderArg> for EmbeddingProviderKind {
    fn from(arg: ProviderArg) -> Self {
        match arg {
            ProviderArg::Hashing => EmbeddingProviderKind::Hashing,
            ProviderArg::Http => EmbeddingProviderKind::Http,
        }
    }
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run the pipeline, skipping every stage whose outputs already exist.
    Run {
        /// Raw records JSON (overrides paths.raw_records).
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Artifact directory (overrides paths.artifact_dir).
        #[arg(short, long)]
        artifact_dir: Option<PathBuf>,

        /// Neighbors per course in the similarity graph.
        #[arg(short, long)]
        k: Option<usize>,

        /// Community detection seed.
        #[arg(long)]
        seed: Option<u64>,

        /// Allowed scope (repeatable). Replaces the configured allow-list.
        #[arg(long = "scope")]
        scopes: Vec<String>,

        /// Embedding provider.
        #[arg(long, value_enum)]
        provider: Option<ProviderArg>,

        /// Print the run report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show which artifacts exist.
    Status {
        /// Artifact directory (overrides paths.artifact_dir).
        #[arg(short, long)]
        artifact_dir: Option<PathBuf>,
    },

    /// Delete artifacts so their stages run again.
    Clean {
        /// Artifact directory (overrides paths.artifact_dir).
        #[arg(short = 'd', long)]
        artifact_dir: Option<PathBuf>,

        /// Artifact to delete by name (repeatable), e.g. `communities`.
        #[arg(long = "artifact")]
        artifacts: Vec<String>,

        /// Delete every artifact and the run manifest.
        #[arg(long, conflicts_with = "artifacts")]
        all: bool,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "coursegraph=info",
        1 => "coursegraph=debug",
        _ => "coursegraph=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Run {
            input,
            artifact_dir,
            k,
            seed,
            scopes,
            provider,
            json,
        } => {
            let overrides = RunOverrides {
                input,
                artifact_dir,
                k,
                seed,
                scopes,
                provider,
            };
            cmd_run(config_path, overrides, json)
        }
        Command::Status { artifact_dir } => cmd_status(config_path, artifact_dir),
        Command::Clean {
            artifact_dir,
            artifacts,
            all,
        } => cmd_clean(config_path, artifact_dir, &artifacts, all),
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(config_path),
        },
    }
}

fn load_app_config(path: Option<&Path>) -> Result<AppConfig> {
    Ok(match path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    })
}

fn artifact_store(config_path: Option<&Path>, artifact_dir: Option<PathBuf>) -> Result<ArtifactStore> {
    let dir = match artifact_dir {
        Some(dir) => dir,
        None => load_app_config(config_path)?.paths.artifact_dir,
    };
    Ok(ArtifactStore::new(dir))
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

/// Command-line values that take precedence over the config file.
struct RunOverrides {
    input: Option<PathBuf>,
    artifact_dir: Option<PathBuf>,
    k: Option<usize>,
    seed: Option<u64>,
    scopes: Vec<String>,
    provider: Option<ProviderArg>,
}

impl RunOverrides {
    fn apply(self, config: &mut RunConfig) {
        if let Some(input) = self.input {
            config.raw_records = input;
        }
        if let Some(dir) = self.artifact_dir {
            config.artifact_dir = dir;
        }
        if let Some(k) = self.k {
            config.k = k;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if !self.scopes.is_empty() {
            config.scope_allow_list = self.scopes.into_iter().collect();
        }
        if let Some(provider) = self.provider {
            config.embedding.provider = provider.into();
        }
    }
}

fn cmd_run(config_path: Option<&Path>, overrides: RunOverrides, json: bool) -> Result<()> {
    let app_config = load_app_config(config_path)?;
    let mut config = RunConfig::from(&app_config);
    overrides.apply(&mut config);

    info!(
        input = %config.raw_records.display(),
        artifact_dir = %config.artifact_dir.display(),
        k = config.k,
        seed = config.seed,
        "running pipeline"
    );

    let reporter = CliProgress::new();
    let report = run_pipeline(&config, &reporter)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!();
    println!("  Pipeline finished ({:?})", report.state);
    for stage in &report.stages {
        let outcome = match stage.outcome {
            StageOutcome::Executed => "executed",
            StageOutcome::Skipped => "skipped",
        };
        println!("  {:<18} {outcome}", stage.stage.as_str());
    }
    if let Some(fusion) = &report.fusion {
        println!();
        println!(
            "  Courses:     {} of {} kept by scope",
            fusion.rows_after_filter, fusion.rows_before_filter
        );
        println!("  Mandatory:   {}", fusion.mandatory_count);
        println!("  Instructors: {}", fusion.instructor_count);
        if !fusion.diagnostics.is_empty() {
            println!("  Warnings:    {}", fusion.diagnostics.len());
        }
    }
    println!("  Artifacts:   {}", report.artifact_dir.display());
    println!("  Time:        {:.1}s", report.elapsed.as_secs_f64());
    println!();

    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn stage_started(&self, stage: Stage) {
        self.spinner.set_message(format!("Running {stage}"));
    }

    fn stage_finished(&self, stage: Stage, outcome: StageOutcome) {
        if outcome == StageOutcome::Skipped {
            self.spinner.set_message(format!("Skipped {stage} (cached)"));
        }
    }

    fn done(&self, _report: &PipelineReport) {
        self.spinner.finish_and_clear();
    }
}

// ---------------------------------------------------------------------------
// status / clean
// ---------------------------------------------------------------------------

fn cmd_status(config_path: Option<&Path>, artifact_dir: Option<PathBuf>) -> Result<()> {
    let store = artifact_store(config_path, artifact_dir)?;
    println!("Artifacts in {}", store.root().display());
    for status in store.status() {
        match status.size_bytes {
            Some(size) => println!("  {:<24} present  {size:>10} bytes", status.kind.name()),
            None => println!("  {:<24} missing", status.kind.name()),
        }
    }

    if let Some(manifest) = store.read_manifest()? {
        println!();
        println!("Last run:  {}", manifest.run_id);
        println!("Completed: {}", manifest.completed_at.to_rfc3339());
        println!("Model:     {}", manifest.embedding_model);
        println!("Executed:  {}", manifest.executed_stages.join(", "));
    }
    Ok(())
}

fn cmd_clean(
    config_path: Option<&Path>,
    artifact_dir: Option<PathBuf>,
    names: &[String],
    all: bool,
) -> Result<()> {
    let store = artifact_store(config_path, artifact_dir)?;

    let kinds: Vec<ArtifactKind> = if all {
        ArtifactKind::ALL.to_vec()
    } else if names.is_empty() {
        return Err(eyre!("nothing to clean: pass --artifact <name> or --all"));
    } else {
        names
            .iter()
            .map(|name| {
                ArtifactKind::from_name(name).ok_or_else(|| {
                    let known: Vec<&str> = ArtifactKind::ALL.iter().map(|k| k.name()).collect();
                    eyre!("unknown artifact '{name}': expected one of {}", known.join(", "))
                })
            })
            .collect::<Result<_>>()?
    };

    for kind in kinds {
        if store.remove(kind)? {
            println!("Removed {}", store.path(kind).display());
        }
    }
    if all && store.remove_manifest()? {
        println!("Removed run manifest");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(config_path: Option<&Path>) -> Result<()> {
    let config = load_app_config(config_path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
