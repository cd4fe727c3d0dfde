use std::env;
use std::path::PathBuf;

use relgen_config::{
    ValidationOptions, ValidationReport, load_config_value, validate_config_with,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = env::args()
        .nth(1)
        .map(PathBuf::from)
        .ok_or("missing config path")?;

    let document = load_config_value(&config_path)?;
    let options = ValidationOptions {
        base_dir: config_path.parent(),
        faker: None,
    };

    let compiled = match validate_config_with(&document, options) {
        Ok(compiled) => compiled,
        Err(report) => {
            eprintln!("config validation failed");
            print_report(&report);
            std::process::exit(1);
        }
    };

    if !compiled.warnings.is_empty() {
        eprintln!("config validated with warnings:");
        print_report(&ValidationReport {
            errors: Vec::new(),
            warnings: compiled.warnings,
        });
    } else {
        println!(
            "config validated successfully: {} master, {} transactional entities",
            compiled.config.master.len(),
            compiled.config.transactional.len()
        );
    }

    Ok(())
}

fn print_report(report: &ValidationReport) {
    for issue in report.errors.iter().chain(report.warnings.iter()) {
        eprintln!("{issue}");
    }
}
