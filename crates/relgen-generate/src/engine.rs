use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use relgen_config::{TransactionalEntity, ValidatedConfig, check_faker_calls};
use tracing::{info, warn};

use crate::correlated::{CorrelatedDataGenerator, record_key};
use crate::errors::GenerationError;
use crate::faker_rs::Faker;
use crate::master::MasterDataGenerator;
use crate::model::{CorrelationRunStats, GenerateOptions, GenerationReport, TransactionalReport};
use crate::pool::ReferencePool;
use crate::sink::SinkFactory;

const FLUSH_TIMEOUT: Duration = Duration::from_secs(30);

/// Result of a generation run.
#[derive(Debug, Clone)]
pub struct GenerationResult {
    pub report_path: PathBuf,
    pub report: GenerationReport,
}

/// Runs the master load, then the transactional workers.
#[derive(Debug, Clone)]
pub struct GenerationEngine {
    options: GenerateOptions,
}

struct WorkerOutcome {
    records: u64,
    stats: CorrelationRunStats,
}

impl GenerationEngine {
    pub fn new(options: GenerateOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &GenerateOptions {
        &self.options
    }

    /// Generate every entity of `config` into sinks built by `sinks`.
    ///
    /// `stop` is checked between transactional records; raising it ends the
    /// run early without an error.
    pub fn run(
        &self,
        config: &ValidatedConfig,
        faker: &dyn Faker,
        sinks: &dyn SinkFactory,
        stop: Arc<AtomicBool>,
    ) -> Result<GenerationResult, GenerationError> {
        let start = Instant::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        let seed = self
            .options
            .seed
            .or(config.seed)
            .unwrap_or_else(rand::random);
        let faker_issues = check_faker_calls(config, faker);
        if !faker_issues.is_ok() {
            warn!(
                run_id = %run_id,
                errors = faker_issues.errors.len(),
                "faker calls rejected before generation"
            );
            return Err(GenerationError::ConfigValidation(faker_issues));
        }
        std::fs::create_dir_all(&self.options.out_dir)?;
        let mut report = GenerationReport::new(run_id.clone(), seed);

        info!(
            run_id = %run_id,
            seed,
            master = config.master.len(),
            transactional = config.transactional.len(),
            "generation started"
        );

        let outcome = self.run_phases(config, faker, sinks, &stop, seed, &mut report);
        report.stopped_early = outcome.is_ok() && stop.load(Ordering::Relaxed);

        let report_path = self.options.out_dir.join("generation_report.json");
        match outcome {
            Ok(()) => {
                std::fs::write(&report_path, serde_json::to_vec_pretty(&report)?)?;
                info!(
                    run_id = %run_id,
                    duration_ms = start.elapsed().as_millis() as u64,
                    stopped_early = report.stopped_early,
                    "generation completed"
                );
                Ok(GenerationResult {
                    report_path,
                    report,
                })
            }
            Err(err) => {
                report.warnings.push(format!("generation failed: {err}"));
                std::fs::write(&report_path, serde_json::to_vec_pretty(&report)?)?;
                warn!(run_id = %run_id, error = %err, "generation failed");
                Err(err)
            }
        }
    }

    fn run_phases(
        &self,
        config: &ValidatedConfig,
        faker: &dyn Faker,
        sinks: &dyn SinkFactory,
        stop: &Arc<AtomicBool>,
        seed: u64,
        report: &mut GenerationReport,
    ) -> Result<(), GenerationError> {
        let mut master = MasterDataGenerator::new(config, faker, seed);
        master.load_all()?;
        let mut sink = sinks.create()?;
        report.produced = master.produce_all(sink.as_mut())?;
        report.master = master.get_loading_stats().to_vec();
        report.csv_exports = master.csv_exports().clone();
        for entity in &config.master {
            let duplicates = master.duplicate_count(&entity.name);
            if duplicates > 0 {
                report.warnings.push(format!(
                    "{}: {duplicates} records dropped for reusing an existing id",
                    entity.name
                ));
            }
        }

        let pool = Arc::new(master.into_pool());
        for entity in &config.transactional {
            if stop.load(Ordering::Relaxed) {
                break;
            }
            let transactional = self.run_entity(entity, &pool, faker, sinks, stop, seed)?;
            *report
                .produced
                .entry(entity.topic.clone())
                .or_insert(0) += transactional.records;
            report.transactional.push(transactional);
        }

        report.pool = pool.get_stats();
        report.memory = pool.get_memory_usage();
        Ok(())
    }

    fn run_entity(
        &self,
        entity: &TransactionalEntity,
        pool: &Arc<ReferencePool>,
        faker: &dyn Faker,
        sinks: &dyn SinkFactory,
        stop: &Arc<AtomicBool>,
        seed: u64,
    ) -> Result<TransactionalReport, GenerationError> {
        let start = Instant::now();
        let workers = self.options.workers.max(1);
        let limit = match (entity.max_messages, self.options.max_messages) {
            (Some(own), Some(cap)) => Some(own.min(cap)),
            (own, cap) => own.or(cap),
        };
        let rate = entity.rate_per_second.map(|rate| rate / workers as f64);
        info!(
            entity = %entity.name,
            topic = %entity.topic,
            workers,
            max_messages = ?limit,
            "transactional generation started"
        );

        let results: Vec<Result<WorkerOutcome, GenerationError>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..workers)
                .map(|worker| {
                    let share = limit.map(|limit| split_limit(limit, workers, worker));
                    let worker_seed = hash_seed(seed, &format!("{}#{worker}", entity.name));
                    let generator =
                        CorrelatedDataGenerator::new(entity, Arc::clone(pool), faker, worker_seed)
                            .with_stop_flag(Arc::clone(stop))
                            .with_max_messages(share)
                            .with_rate(rate)
                            .with_sequence(worker as u64, workers as u64);
                    scope.spawn(move || run_worker(generator, sinks, stop))
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    handle.join().unwrap_or_else(|_| {
                        Err(GenerationError::Worker(format!(
                            "worker for '{}' panicked",
                            entity.name
                        )))
                    })
                })
                .collect()
        });

        let mut correlation = CorrelationRunStats {
            entity: entity.name.clone(),
            ..CorrelationRunStats::default()
        };
        let mut records = 0;
        for result in results {
            let outcome = result?;
            records += outcome.records;
            correlation.merge(&outcome.stats);
        }
        info!(
            entity = %entity.name,
            records,
            duration_ms = start.elapsed().as_millis() as u64,
            "transactional generation finished"
        );
        Ok(TransactionalReport {
            entity: entity.name.clone(),
            topic: entity.topic.clone(),
            workers,
            records,
            duration_ms: start.elapsed().as_millis() as u64,
            correlation,
        })
    }
}

fn run_worker(
    mut generator: CorrelatedDataGenerator<'_>,
    sinks: &dyn SinkFactory,
    stop: &AtomicBool,
) -> Result<WorkerOutcome, GenerationError> {
    let outcome = produce_stream(&mut generator, sinks);
    if outcome.is_err() {
        stop.store(true, Ordering::Relaxed);
    }
    outcome
}

fn produce_stream(
    generator: &mut CorrelatedDataGenerator<'_>,
    sinks: &dyn SinkFactory,
) -> Result<WorkerOutcome, GenerationError> {
    let mut sink = sinks.create()?;
    let entity = generator.entity();
    let mut records = 0_u64;
    for record in generator.generate() {
        let record = record?;
        let key = record_key(entity.key_field.as_ref(), &record);
        sink.produce(&entity.topic, key.as_deref(), &record)?;
        records += 1;
    }
    let pending = sink.flush(FLUSH_TIMEOUT)?;
    if pending > 0 {
        warn!(entity = %entity.name, pending, "sink flush left messages pending");
    }
    Ok(WorkerOutcome {
        records,
        stats: generator.correlation_stats().clone(),
    })
}

/// Even share of `limit` for `worker`; the remainder goes to the first workers.
fn split_limit(limit: u64, workers: usize, worker: usize) -> u64 {
    let workers = workers as u64;
    let worker = worker as u64;
    limit / workers + u64::from(worker < limit % workers)
}

/// FNV-1a over `key`, mixed into `seed`.
pub(crate) fn hash_seed(seed: u64, key: &str) -> u64 {
    let mut hash = seed ^ 0xcbf29ce484222325;
    for byte in key.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_split_without_loss() {
        let shares: Vec<u64> = (0..3).map(|worker| split_limit(10, 3, worker)).collect();
        assert_eq!(shares, vec![4, 3, 3]);
        assert_eq!(split_limit(2, 4, 3), 0);
    }

    #[test]
    fn seeds_differ_per_key() {
        assert_eq!(hash_seed(42, "orders#0"), hash_seed(42, "orders#0"));
        assert_ne!(hash_seed(42, "orders#0"), hash_seed(42, "orders#1"));
        assert_ne!(hash_seed(42, "orders#0"), hash_seed(43, "orders#0"));
    }
}
