use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Options for the generation engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateOptions {
    /// Directory where run artifacts are written.
    pub out_dir: PathBuf,
    /// Worker threads per transactional entity.
    pub workers: usize,
    /// Overrides the seed from the configuration.
    pub seed: Option<u64>,
    /// Caps every transactional entity, on top of its own `max_messages`.
    pub max_messages: Option<u64>,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            out_dir: PathBuf::from("out"),
            workers: 1,
            seed: None,
            max_messages: None,
        }
    }
}

/// Per-type counters reported by the reference pool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolTypeStats {
    pub population: usize,
    pub cached_records: usize,
    /// Identifiers handed out by the samplers; zero unless stats are enabled.
    pub reference_count: u64,
    /// Cached record and index reads; zero unless stats are enabled.
    pub access_count: u64,
}

/// Approximate footprint of one entity type in the pool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeMemoryUsage {
    pub population: usize,
    pub cached_records: usize,
    pub index_entries: usize,
    pub recent_entries: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryUsage {
    pub total_references: usize,
    pub total_cached_records: usize,
    pub total_index_entries: usize,
    pub types: BTreeMap<String, TypeMemoryUsage>,
}

/// Outcome of loading one master entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadingStats {
    pub entity: String,
    pub source: String,
    pub records: u64,
    pub duration_ms: u64,
    pub records_per_second: f64,
}

/// Realized correlation of one relationship.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelationshipStats {
    pub field: String,
    pub entity: String,
    pub correlated: u64,
    pub uncorrelated: u64,
    /// Target ratio in `[0, 1]`.
    pub target_ratio: f64,
}

impl RelationshipStats {
    pub fn total(&self) -> u64 {
        self.correlated + self.uncorrelated
    }

    pub fn realized_ratio(&self) -> f64 {
        match self.total() {
            0 => 0.0,
            total => self.correlated as f64 / total as f64,
        }
    }

    /// Fold another worker's counters into this one.
    pub fn merge(&mut self, other: &RelationshipStats) {
        self.correlated += other.correlated;
        self.uncorrelated += other.uncorrelated;
    }
}

/// Correlation counters of one transactional generator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CorrelationRunStats {
    pub entity: String,
    pub records: u64,
    pub relationships: Vec<RelationshipStats>,
}

impl CorrelationRunStats {
    pub fn merge(&mut self, other: &CorrelationRunStats) {
        self.records += other.records;
        for relationship in &other.relationships {
            match self
                .relationships
                .iter_mut()
                .find(|existing| existing.field == relationship.field)
            {
                Some(existing) => existing.merge(relationship),
                None => self.relationships.push(relationship.clone()),
            }
        }
    }
}

/// Summary of a transactional entity across all of its workers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionalReport {
    pub entity: String,
    pub topic: String,
    pub workers: usize,
    pub records: u64,
    pub duration_ms: u64,
    pub correlation: CorrelationRunStats,
}

/// Report for a generation run, written as `generation_report.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationReport {
    pub run_id: String,
    pub seed: u64,
    pub stopped_early: bool,
    pub master: Vec<LoadingStats>,
    pub produced: BTreeMap<String, u64>,
    pub csv_exports: BTreeMap<String, PathBuf>,
    pub transactional: Vec<TransactionalReport>,
    pub pool: BTreeMap<String, PoolTypeStats>,
    pub memory: MemoryUsage,
    pub warnings: Vec<String>,
}

impl GenerationReport {
    pub fn new(run_id: String, seed: u64) -> Self {
        Self {
            run_id,
            seed,
            stopped_early: false,
            master: Vec::new(),
            produced: BTreeMap::new(),
            csv_exports: BTreeMap::new(),
            transactional: Vec::new(),
            pool: BTreeMap::new(),
            memory: MemoryUsage::default(),
            warnings: Vec::new(),
        }
    }
}
