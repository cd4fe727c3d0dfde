use std::fs::{File, OpenOptions, create_dir_all};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::prelude::*;

use super::{RegistryError, RegistryResult};

/// Filter applied when `RUST_LOG` is unset.
const DEFAULT_LOG_FILTER: &str = "info";

/// Command-line overrides recorded with each run.
#[derive(Debug, Clone, Serialize)]
pub struct RunOptions {
    pub sink: String,
    pub workers: usize,
    pub max_messages: Option<u64>,
    pub seed: Option<u64>,
}

/// Metadata captured at run start.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub run_dir: PathBuf,
    pub config_path: PathBuf,
    /// Config document as loaded, whatever its source format.
    pub document: serde_json::Value,
    pub options: RunOptions,
}

/// JSON config written to each run directory.
#[derive(Debug, Serialize)]
pub struct RunConfig<'a> {
    pub run_id: &'a str,
    pub started_at: String,
    pub config_path: String,
    pub options: &'a RunOptions,
    pub config: &'a serde_json::Value,
    pub git: GitInfo,
}

/// Git metadata for reproducibility.
#[derive(Debug, Serialize)]
pub struct GitInfo {
    pub commit: Option<String>,
    pub dirty: Option<bool>,
}

/// Paths for run artifacts.
#[derive(Debug, Clone)]
pub struct RunPaths {
    pub root: PathBuf,
    pub logs_path: PathBuf,
}

/// Create `<run_dir>/<timestamp>__run_<id>/` with `config.json` and an empty log file.
pub fn start_run(ctx: &RunContext) -> RegistryResult<RunPaths> {
    let timestamp = ctx.started_at.format("%Y-%m-%dT%H-%M-%SZ").to_string();
    let root = ctx.run_dir.join(format!("{timestamp}__run_{}", ctx.run_id));

    create_dir_all(&root).map_err(|source| RegistryError::Artifact {
        path: root.clone(),
        source,
    })?;

    let config_path = root.join("config.json");
    let logs_path = root.join("logs.ndjson");

    let config = RunConfig {
        run_id: &ctx.run_id,
        started_at: ctx.started_at.to_rfc3339(),
        config_path: ctx.config_path.display().to_string(),
        options: &ctx.options,
        config: &ctx.document,
        git: collect_git_info(),
    };

    write_json(&config_path, &config)?;
    open_log(&logs_path)?;

    Ok(RunPaths { root, logs_path })
}

/// Send tracing events to the run's `logs.ndjson` as JSON lines.
///
/// Events raised inside the `run` span carry the run id; the first line
/// records the run id with the seed and sink the run was started with.
pub fn init_run_logging(paths: &RunPaths, ctx: &RunContext) -> RegistryResult<()> {
    let file = open_log(&paths.logs_path)?;
    let layer = tracing_subscriber::fmt::layer()
        .json()
        .with_timer(UtcTime::rfc_3339())
        .with_writer(Mutex::new(file));
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init()
        .map_err(|err| RegistryError::Logging(err.to_string()))?;

    tracing::info!(
        event = "run_logging_started",
        run_id = %ctx.run_id,
        seed = ?ctx.options.seed,
        sink = %ctx.options.sink,
        workers = ctx.options.workers,
        root = %paths.root.display()
    );
    Ok(())
}

fn open_log(path: &Path) -> RegistryResult<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| RegistryError::Artifact {
            path: path.to_path_buf(),
            source,
        })
}

pub fn collect_git_info() -> GitInfo {
    let commit = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .output()
        .ok()
        .and_then(|output| {
            if output.status.success() {
                Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
            } else {
                None
            }
        })
        .filter(|value| !value.is_empty());

    let dirty = Command::new("git")
        .args(["status", "--porcelain"])
        .output()
        .ok()
        .map(|output| !output.stdout.is_empty());

    GitInfo { commit, dirty }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> RegistryResult<()> {
    let file = OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .open(path)
        .map_err(|source| RegistryError::Artifact {
            path: path.to_path_buf(),
            source,
        })?;
    serde_json::to_writer_pretty(file, value).map_err(RegistryError::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_run_writes_config_and_log_file() {
        let run_dir = std::env::temp_dir().join(format!("relgen_runs_{}", uuid::Uuid::new_v4()));
        let ctx = RunContext {
            run_id: "abc".to_string(),
            started_at: Utc::now(),
            run_dir: run_dir.clone(),
            config_path: PathBuf::from("configs/shop.yaml"),
            document: serde_json::json!({"seed": 7, "master_data": {}}),
            options: RunOptions {
                sink: "null".to_string(),
                workers: 2,
                max_messages: Some(10),
                seed: None,
            },
        };
        let paths = start_run(&ctx).expect("run");
        assert!(paths.root.starts_with(&run_dir));
        assert!(
            paths
                .root
                .file_name()
                .is_some_and(|name| name.to_string_lossy().ends_with("__run_abc"))
        );
        assert!(paths.logs_path.exists());

        let written: serde_json::Value =
            serde_json::from_slice(&std::fs::read(paths.root.join("config.json")).expect("read"))
                .expect("json");
        assert_eq!(written["config"]["seed"], 7);
        assert_eq!(written["options"]["workers"], 2);
        assert_eq!(written["config_path"], "configs/shop.yaml");
    }

    #[test]
    fn unwritable_run_dir_names_the_path() {
        let blocker = std::env::temp_dir().join(format!("relgen_blocker_{}", uuid::Uuid::new_v4()));
        std::fs::write(&blocker, b"not a directory").expect("write");
        let ctx = RunContext {
            run_id: "xyz".to_string(),
            started_at: Utc::now(),
            run_dir: blocker.clone(),
            config_path: PathBuf::from("shop.yaml"),
            document: serde_json::json!({}),
            options: RunOptions {
                sink: "jsonl".to_string(),
                workers: 1,
                max_messages: None,
                seed: Some(3),
            },
        };
        match start_run(&ctx) {
            Err(RegistryError::Artifact { path, .. }) => assert!(path.starts_with(&blocker)),
            other => panic!("expected artifact error, got {other:?}"),
        }
    }
}
