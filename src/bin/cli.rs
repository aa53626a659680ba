use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use pipeline_runner::engine::{Gate, HookRecord, StageOutcome};
use pipeline_runner::pipeline::check_tools;
use pipeline_runner::prelude::*;
use tracing_subscriber::EnvFilter;
#[cfg(feature = "otel")]
use tracing_subscriber::layer::SubscriberExt;
#[cfg(feature = "otel")]
use tracing_subscriber::util::SubscriberInitExt;

/// Exit code for usage, load and compile errors
const EXIT_ERROR: u8 = 2;

#[derive(Parser)]
#[command(name = "pipeline-runner")]
#[command(about = "Run staged CI pipelines defined in YAML", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Trigger one run of a pipeline file
    Run {
        /// Path to the pipeline YAML file
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Branch that triggered the run
        #[arg(short, long, default_value = "main")]
        branch: String,

        /// Commit reference that triggered the run
        #[arg(short, long, default_value = "HEAD")]
        commit: String,

        /// Working directory for commands and artifacts (default: current dir)
        #[arg(short, long)]
        workspace: Option<PathBuf>,

        /// Run timeout in seconds (overrides options.timeout_seconds)
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Allow overlapping runs (overrides options.allow_concurrent)
        #[arg(long)]
        allow_concurrent: bool,

        /// Write the run as JSON to this path
        #[arg(long, value_name = "PATH")]
        json_report: Option<PathBuf>,

        /// Write a JUnit XML report to this path
        #[arg(long, value_name = "PATH")]
        junit: Option<PathBuf>,

        /// POST the finished run to this URL
        #[arg(long, value_name = "URL")]
        webhook: Option<String>,
    },

    /// Validate pipeline files without running them
    Validate {
        /// Path to pipeline file or directory
        #[arg(value_name = "PATH")]
        path: PathBuf,
    },

    /// Show the stages of a pipeline and which branch gates open
    Plan {
        /// Path to the pipeline YAML file
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Branch to evaluate branch gates against
        #[arg(short, long, default_value = "main")]
        branch: String,
    },
}

fn log_filter(verbose: bool) -> EnvFilter {
    let default = if verbose {
        "pipeline_runner=debug"
    } else {
        "pipeline_runner=info"
    };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

#[cfg(feature = "otel")]
fn init_otel_tracing(verbose: bool) -> anyhow::Result<()> {
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::runtime::Tokio;
    use opentelemetry_sdk::trace::TracerProvider;

    let otlp_endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
        .unwrap_or_else(|_| "http://localhost:4317".to_string());

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&otlp_endpoint)
        .build()?;

    let provider = TracerProvider::builder()
        .with_batch_exporter(exporter, Tokio)
        .build();

    let tracer = provider.tracer("pipeline-runner");
    let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);

    tracing_subscriber::registry()
        .with(log_filter(verbose))
        .with(tracing_subscriber::fmt::layer())
        .with(otel_layer)
        .init();

    opentelemetry::global::set_tracer_provider(provider);
    Ok(())
}

#[cfg(not(feature = "otel"))]
fn init_tracing(verbose: bool) {
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(verbose))
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    #[cfg(feature = "otel")]
    if let Err(e) = init_otel_tracing(cli.verbose) {
        eprintln!("Failed to initialize OpenTelemetry: {}", e);
        return ExitCode::from(EXIT_ERROR);
    }

    #[cfg(not(feature = "otel"))]
    init_tracing(cli.verbose);

    let result = run(cli).await;

    #[cfg(feature = "otel")]
    opentelemetry::global::shutdown_tracer_provider();

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!(error = %e, "pipeline-runner failed");
            eprintln!("Error: {:#}", e);
            ExitCode::from(EXIT_ERROR)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<u8> {
    match cli.command {
        Commands::Run {
            file,
            branch,
            commit,
            workspace,
            timeout,
            allow_concurrent,
            json_report,
            junit,
            webhook,
        } => {
            let overrides = Overrides {
                workspace,
                timeout,
                allow_concurrent,
            };
            let reports = Reports {
                json: json_report,
                junit,
                webhook,
            };
            run_pipeline(&file, Trigger::new(branch, commit), overrides, reports).await
        }
        Commands::Validate { path } => validate(&path),
        Commands::Plan { file, branch } => plan(&file, &branch),
    }
}

/// CLI flags layered over the pipeline's `options:` block
struct Overrides {
    workspace: Option<PathBuf>,
    timeout: Option<u64>,
    allow_concurrent: bool,
}

impl Overrides {
    fn apply(self, definition: &PipelineDefinition) -> anyhow::Result<RunnerOptions> {
        let mut options = RunnerOptions::from(&definition.options);
        if let Some(seconds) = self.timeout {
            options.timeout = Duration::from_secs(seconds);
        }
        if self.allow_concurrent {
            options.allow_concurrent = true;
        }
        options.workspace = match self.workspace {
            Some(dir) => dir,
            None => std::env::current_dir()?,
        };
        if !options.workspace.is_dir() {
            anyhow::bail!("Workspace not found: {}", options.workspace.display());
        }
        Ok(options)
    }
}

struct Reports {
    json: Option<PathBuf>,
    junit: Option<PathBuf>,
    webhook: Option<String>,
}

async fn run_pipeline(
    file: &Path,
    trigger: Trigger,
    overrides: Overrides,
    reports: Reports,
) -> anyhow::Result<u8> {
    if !file.exists() {
        anyhow::bail!("Pipeline file not found: {}", file.display());
    }

    let definition = PipelineLoader::load_file(file)?;
    let options = overrides.apply(&definition)?;
    warn_missing_tools(&definition);

    let mut runner = PipelineRunner::from_definition(&definition)?.with_options(options);
    if let Some(path) = reports.json {
        runner = runner.with_sink(Arc::new(JsonReportSink::new(path)));
    }
    if let Some(path) = reports.junit {
        runner = runner.with_sink(Arc::new(JunitReportSink::new(path)));
    }
    if let Some(url) = reports.webhook {
        runner = runner.with_sink(Arc::new(WebhookReportSink::new(url)?));
    }

    println!(
        "Running pipeline: {} ({} on {})\n",
        definition.name, trigger.commit_ref, trigger.branch
    );

    let run = runner.execute(trigger).await?;
    print_run(&run);
    Ok(run.state.exit_code())
}

fn validate(path: &Path) -> anyhow::Result<u8> {
    if !path.exists() {
        anyhow::bail!("Path not found: {}", path.display());
    }

    let definitions = if path.is_dir() {
        PipelineLoader::load_directory(path)?
    } else {
        vec![PipelineLoader::load_file(path)?]
    };

    if definitions.is_empty() {
        println!("No pipelines found in: {}", path.display());
        return Ok(0);
    }

    for definition in &definitions {
        let pipeline = Pipeline::from_definition(definition)?;
        println!(
            "✓ {} is valid ({} stages)",
            definition.name,
            pipeline.stages.len()
        );
        warn_missing_tools(definition);
    }

    Ok(0)
}

fn plan(file: &Path, branch: &str) -> anyhow::Result<u8> {
    if !file.exists() {
        anyhow::bail!("Pipeline file not found: {}", file.display());
    }

    let definition = PipelineLoader::load_file(file)?;
    let pipeline = Pipeline::from_definition(&definition)?;

    let mut env = Environment::new();
    env.set("BRANCH_NAME", branch);

    println!("Pipeline: {} (branch {})\n", pipeline.name, branch);
    for (i, stage) in pipeline.stages.iter().enumerate() {
        let decision = match stage.gate() {
            Gate::Always => "runs".to_string(),
            gate @ Gate::Branch(_) => match gate.evaluate(&env) {
                Ok(true) => format!("runs ({})", gate),
                Ok(false) => format!("skipped ({})", gate),
                Err(e) => format!("gate error: {}", e),
            },
            gate => format!("decided at run time ({})", gate),
        };
        println!("  {}. {} - {}", i + 1, stage.name(), decision);
    }

    Ok(0)
}

fn warn_missing_tools(definition: &PipelineDefinition) {
    for tool in check_tools(&definition.tools) {
        if !tool.is_available() {
            tracing::warn!("Required tool '{}' not found on PATH", tool.name);
            println!("⚠ {}: tool '{}' not found on PATH", definition.name, tool.name);
        }
    }
}

fn print_run(run: &Run) {
    println!("\n=== Run #{} of {} ===\n", run.number, run.pipeline);
    println!("State: {}", run.state);
    println!("Run ID: {}", run.id);
    if let Some(ms) = run.duration_ms() {
        println!("Duration: {} ms", ms);
    }
    if let Some(err) = &run.setup_error {
        println!("Setup error: {}", err);
    }
    println!();

    for stage in &run.stages {
        let marker = match stage.outcome {
            StageOutcome::Success => "✓",
            StageOutcome::Unstable => "!",
            StageOutcome::Failure | StageOutcome::Aborted => "✗",
            StageOutcome::Skipped(_) => "-",
        };
        println!("{} {} [{}]", marker, stage.name, stage.outcome);
        if let Some(err) = &stage.error {
            println!("    Error: {}", err);
        }
        print_hooks(&stage.hooks);
    }

    if !run.post.is_empty() {
        println!("\nPipeline post hooks:");
        print_hooks(&run.post);
    }
}

fn print_hooks(hooks: &[HookRecord]) {
    for hook in hooks {
        let status = if hook.succeeded { "ok" } else { "failed" };
        println!("    post {:?}: {}", hook.condition, status);
        if let Some(err) = &hook.error {
            println!("      Error: {}", err);
        }
    }
}
