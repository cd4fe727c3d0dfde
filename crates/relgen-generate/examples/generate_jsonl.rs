use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use relgen_config::{ValidationOptions, load_config_value, validate_config_with};
use relgen_generate::{FakeRsFaker, GenerateOptions, GenerationEngine, JsonlSink};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut args = env::args().skip(1);
    let mut config_path: Option<PathBuf> = None;
    let mut out_dir: Option<PathBuf> = None;
    let mut workers: Option<usize> = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--out" => out_dir = args.next().map(PathBuf::from),
            "--workers" => workers = args.next().map(|value| value.parse()).transpose()?,
            _ => {
                if config_path.is_none() {
                    config_path = Some(PathBuf::from(arg));
                } else {
                    return Err("unexpected argument".into());
                }
            }
        }
    }

    let config_path = config_path.ok_or("missing config path")?;
    let document = load_config_value(&config_path)?;
    let faker = FakeRsFaker::new(document.get("locale").and_then(|locale| locale.as_str()))?;
    let options = ValidationOptions {
        base_dir: config_path.parent(),
        faker: Some(&faker),
    };
    let compiled = validate_config_with(&document, options).map_err(|report| report.to_string())?;

    let mut options = GenerateOptions::default();
    if let Some(out_dir) = out_dir {
        options.out_dir = out_dir;
    }
    if let Some(workers) = workers {
        options.workers = workers;
    }

    let sink = JsonlSink::new(options.out_dir.clone())?;
    let engine = GenerationEngine::new(options);
    let result = engine.run(
        &compiled.config,
        &faker,
        &sink,
        Arc::new(AtomicBool::new(false)),
    )?;

    println!("report={}", result.report_path.display());
    Ok(())
}
