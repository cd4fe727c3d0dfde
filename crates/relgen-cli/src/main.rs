mod registry;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use clap::{Args, Parser, Subcommand, ValueEnum};
use registry::{RunContext, RunOptions, init_run_logging, start_run};
use relgen_config::{
    CompiledConfig, ConfigError, ValidationOptions, ValidationReport, config_json_schema,
    load_config_value, validate_config_with,
};
use relgen_generate::{
    FakeRsFaker, GenerateOptions, GenerationEngine, GenerationError, JsonlSink, NullSink,
    SinkError, SinkFactory, StdoutSink,
};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
enum CliError {
    #[error("registry error: {0}")]
    Registry(#[from] registry::RegistryError),
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("generation error: {0}")]
    Generation(#[from] GenerationError),
    #[error("sink error: {0}")]
    Sink(#[from] SinkError),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid configuration: {0} errors")]
    InvalidConfig(usize),
    #[error("generation task failed: {0}")]
    Task(String),
}

#[derive(Parser, Debug)]
#[command(name = "relgen", version, about = "Relational test data generator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate a config file and print every issue found.
    Validate(ValidateArgs),
    /// Print the JSON Schema of the config document.
    Schema,
    /// Generate master and transactional data.
    Generate(GenerateArgs),
}

#[derive(Args, Debug)]
struct ValidateArgs {
    /// Config file (.json, .yaml, .yml or .toml).
    config: PathBuf,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum SinkKind {
    Jsonl,
    Stdout,
    Null,
}

#[derive(Args, Debug)]
struct GenerateArgs {
    /// Config file (.json, .yaml, .yml or .toml).
    config: PathBuf,
    /// Output directory for runs.
    #[arg(long, default_value = "runs")]
    run_dir: PathBuf,
    /// Where produced messages go.
    #[arg(long, value_enum, default_value_t = SinkKind::Jsonl)]
    sink: SinkKind,
    /// Worker threads per transactional entity.
    #[arg(long, default_value_t = 1)]
    workers: usize,
    /// Upper bound on messages per transactional entity.
    #[arg(long)]
    max_messages: Option<u64>,
    /// Overrides the config seed.
    #[arg(long)]
    seed: Option<u64>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Validate(args) => run_validate(&args),
        Command::Schema => run_schema(),
        Command::Generate(args) => run_generate(args).await,
    };

    if let Err(err) = result {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn run_validate(args: &ValidateArgs) -> Result<(), CliError> {
    let document = load_config_value(&args.config)?;
    let faker = FakeRsFaker::default();
    let compiled = validate_document(&args.config, &document, &faker)?;
    println!(
        "config validated successfully: {} master, {} transactional entities",
        compiled.config.master.len(),
        compiled.config.transactional.len()
    );
    Ok(())
}

fn run_schema() -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(&config_json_schema())?);
    Ok(())
}

async fn run_generate(args: GenerateArgs) -> Result<(), CliError> {
    let GenerateArgs {
        config,
        run_dir,
        sink,
        workers,
        max_messages,
        seed,
    } = args;

    let document = load_config_value(&config)?;
    let locale = document
        .get("locale")
        .and_then(serde_json::Value::as_str)
        .map(str::to_string);
    let faker = FakeRsFaker::new(locale.as_deref())?;
    let compiled = validate_document(&config, &document, &faker)?;

    let run_id = Uuid::new_v4().to_string();
    let run_ctx = RunContext {
        run_id: run_id.clone(),
        started_at: chrono::Utc::now(),
        run_dir,
        config_path: config.clone(),
        document,
        options: RunOptions {
            sink: format!("{sink:?}").to_lowercase(),
            workers,
            max_messages,
            seed,
        },
    };
    let run_paths = start_run(&run_ctx)?;
    init_run_logging(&run_paths, &run_ctx)?;

    tracing::info!(event = "run_started", run_id = %run_id, config = %config.display());
    for warning in &compiled.warnings {
        tracing::warn!(
            event = "config_warning",
            code = %warning.code,
            path = %warning.path,
            message = %warning.message
        );
    }

    let sinks: Box<dyn SinkFactory> = match sink {
        SinkKind::Jsonl => Box::new(JsonlSink::new(run_paths.root.clone())?),
        SinkKind::Stdout => Box::new(StdoutSink),
        SinkKind::Null => Box::new(NullSink),
    };

    let stop = Arc::new(AtomicBool::new(false));
    let signal_stop = Arc::clone(&stop);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!(event = "interrupt_received");
            signal_stop.store(true, Ordering::Relaxed);
        }
    });

    let engine = GenerationEngine::new(GenerateOptions {
        out_dir: run_paths.root.clone(),
        workers,
        seed,
        max_messages,
    });
    let timer = Instant::now();
    let span = tracing::info_span!("run", run_id = %run_id);
    let outcome = tokio::task::spawn_blocking(move || {
        span.in_scope(|| engine.run(&compiled.config, &faker, sinks.as_ref(), stop))
    })
    .await
    .map_err(|err| CliError::Task(err.to_string()))?;

    let result = match outcome {
        Ok(result) => result,
        Err(err) => {
            tracing::error!(event = "run_finished", status = "failed", error = %err);
            return Err(err.into());
        }
    };

    let status = if result.report.stopped_early {
        "stopped"
    } else {
        "success"
    };
    tracing::info!(
        event = "run_finished",
        status,
        duration_ms = timer.elapsed().as_millis() as u64,
        report = %result.report_path.display()
    );
    for (topic, count) in &result.report.produced {
        eprintln!("{topic}: {count} messages");
    }
    eprintln!("report written to {}", result.report_path.display());
    Ok(())
}

fn validate_document(
    path: &Path,
    document: &serde_json::Value,
    faker: &FakeRsFaker,
) -> Result<CompiledConfig, CliError> {
    let options = ValidationOptions {
        base_dir: path.parent(),
        faker: Some(faker),
    };
    match validate_config_with(document, options) {
        Ok(compiled) => {
            if !compiled.warnings.is_empty() {
                eprintln!("config validated with warnings:");
                print_report(&ValidationReport {
                    errors: Vec::new(),
                    warnings: compiled.warnings.clone(),
                });
            }
            Ok(compiled)
        }
        Err(report) => {
            eprintln!("config validation failed");
            print_report(&report);
            Err(CliError::InvalidConfig(report.errors.len()))
        }
    }
}

fn print_report(report: &ValidationReport) {
    for issue in report.errors.iter().chain(report.warnings.iter()) {
        eprintln!("{issue}");
    }
}
