//! Master-data loading: generation, CSV import/export and bulk production.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use relgen_config::{
    EntityType, ObjectSpec, ReferenceSpec, Source, ValidatedConfig, ValueSpec, common_kind,
};
use relgen_core::{Record, ScalarKind};
use tracing::{debug, info, warn};

use crate::correlated::record_key;
use crate::engine::hash_seed;
use crate::errors::GenerationError;
use crate::faker_rs::Faker;
use crate::generators::{GenerationContext, populate};
use crate::model::LoadingStats;
use crate::output::csv::{CsvRecordReader, DeclaredColumn, write_records_csv};
use crate::pool::ReferencePool;
use crate::sink::Sink;

const FLUSH_TIMEOUT: Duration = Duration::from_secs(30);
/// Reference chains longer than this import as strings.
const MAX_REFERENCE_HOPS: usize = 8;

struct LoadedEntity {
    name: String,
    records: Vec<Arc<Record>>,
    duplicates: u64,
}

/// Populates the [`ReferencePool`] from every master entity.
pub struct MasterDataGenerator<'a> {
    config: &'a ValidatedConfig,
    faker: &'a dyn Faker,
    seed: u64,
    pool: ReferencePool,
    loaded: Vec<LoadedEntity>,
    stats: Vec<LoadingStats>,
    csv_exports: BTreeMap<String, PathBuf>,
}

impl<'a> MasterDataGenerator<'a> {
    pub fn new(config: &'a ValidatedConfig, faker: &'a dyn Faker, seed: u64) -> Self {
        let mut pool = ReferencePool::new(config.pool);
        for entity in &config.master {
            pool.register_type(&entity.name, entity.id_field.clone());
            if let Some(window) = entity.recent_window {
                pool.enable_recent_tracking(&entity.name, window);
            }
            for path in &entity.index_fields {
                pool.create_index(&entity.name, path.clone());
            }
        }
        Self {
            config,
            faker,
            seed,
            pool,
            loaded: Vec::new(),
            stats: Vec::new(),
            csv_exports: BTreeMap::new(),
        }
    }

    /// Load generated entities first, then CSV imports, each in config order.
    pub fn load_all(&mut self) -> Result<(), GenerationError> {
        let config = self.config;
        let generated = config
            .master
            .iter()
            .filter(|entity| entity.source == Source::Generated);
        let imported = config
            .master
            .iter()
            .filter(|entity| entity.source != Source::Generated);
        for entity in generated.chain(imported) {
            self.load_entity(entity)?;
        }
        info!(
            entities = self.loaded.len(),
            references = self.pool.get_memory_usage().total_references,
            "master data loaded"
        );
        Ok(())
    }

    fn load_entity(&mut self, entity: &EntityType) -> Result<(), GenerationError> {
        let start = Instant::now();
        let source = match &entity.source {
            Source::Generated => {
                self.generate_entity(entity)?;
                "generated"
            }
            Source::CsvImport { file, delimiter } => {
                self.import_entity(entity, file, *delimiter)?;
                "csv"
            }
        };
        let records = self.records(&entity.name).len() as u64;
        let elapsed = start.elapsed();
        let records_per_second = if elapsed.as_secs_f64() > 0.0 {
            records as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };
        info!(
            entity = %entity.name,
            source,
            records,
            duration_ms = elapsed.as_millis() as u64,
            "master entity loaded"
        );
        self.stats.push(LoadingStats {
            entity: entity.name.clone(),
            source: source.to_string(),
            records,
            duration_ms: elapsed.as_millis() as u64,
            records_per_second,
        });

        if entity.source == Source::Generated
            && let Some(export) = &entity.csv_export
        {
            let summary = write_records_csv(
                &export.path,
                self.records(&entity.name).iter().map(|record| record.as_ref()),
                export,
            )?;
            info!(
                entity = %entity.name,
                path = %export.path.display(),
                rows = summary.rows,
                bytes = summary.bytes,
                "master entity exported"
            );
            self.csv_exports
                .insert(entity.name.clone(), export.path.clone());
        }
        Ok(())
    }

    fn generate_entity(&mut self, entity: &EntityType) -> Result<(), GenerationError> {
        let mut rng = ChaCha8Rng::seed_from_u64(hash_seed(self.seed, &entity.name));
        let now = chrono::Utc::now().timestamp_millis();
        self.begin(&entity.name);
        for sequence in 1..=entity.count {
            let mut ctx = GenerationContext::new(self.faker, &mut rng, sequence, now);
            populate(&entity.schema, &mut ctx, None)?;
            self.register(entity, ctx.into_record())?;
            if sequence % 100_000 == 0 {
                debug!(entity = %entity.name, records = sequence, "generating master records");
            }
        }
        Ok(())
    }

    fn import_entity(
        &mut self,
        entity: &EntityType,
        file: &std::path::Path,
        delimiter: u8,
    ) -> Result<(), GenerationError> {
        let declared = self.declared_columns(entity);
        let reader = CsvRecordReader::open(
            &entity.name,
            file,
            delimiter,
            &entity.id_field,
            declared.as_deref(),
        )?;
        self.begin(&entity.name);
        for record in reader {
            self.register(entity, record?)?;
        }
        Ok(())
    }

    /// Column kinds of the declared schema; `None` when nothing is declared.
    ///
    /// Leaves whose kind cannot be resolved import as strings.
    fn declared_columns(&self, entity: &EntityType) -> Option<Vec<DeclaredColumn>> {
        if entity.schema.is_empty() {
            return None;
        }
        let columns = entity
            .schema
            .leaves()
            .into_iter()
            .map(|(path, spec)| DeclaredColumn {
                path,
                kind: self
                    .column_kind(spec, &entity.schema, 0)
                    .unwrap_or(ScalarKind::String),
                is_object: matches!(spec, ValueSpec::Object(_)),
            })
            .collect();
        Some(columns)
    }

    /// Kind a spec produces, following references to the field they copy.
    fn column_kind(&self, spec: &ValueSpec, scope: &ObjectSpec, hops: usize) -> Option<ScalarKind> {
        match spec {
            ValueSpec::Faker(call) => self.faker.output_kind(&call.method),
            ValueSpec::Reference(reference) => {
                if hops >= MAX_REFERENCE_HOPS {
                    return None;
                }
                let (schema, path): (&ObjectSpec, _) = match reference {
                    ReferenceSpec::SelfField(path) => (scope, path),
                    ReferenceSpec::Entity { entity, path } => {
                        (&self.config.master_entity(entity)?.schema, path)
                    }
                };
                self.column_kind(schema.spec_at(path)?, schema, hops + 1)
            }
            ValueSpec::Conditional(conditional) => common_kind(
                [&conditional.when_true, &conditional.when_false]
                    .into_iter()
                    .flatten()
                    .map(|branch| self.column_kind(branch, scope, hops)),
            ),
            other => other.static_kind(),
        }
    }

    fn begin(&mut self, entity: &str) {
        self.loaded.push(LoadedEntity {
            name: entity.to_string(),
            records: Vec::new(),
            duplicates: 0,
        });
    }

    fn register(&mut self, entity: &EntityType, mut record: Record) -> Result<(), GenerationError> {
        let id = record
            .lookup(&entity.id_field)
            .filter(|id| !id.is_null())
            .cloned()
            .ok_or_else(|| {
                GenerationError::load(
                    &entity.name,
                    format!("record without id field '{}'", entity.id_field),
                )
            })?;
        for field in &entity.key_only_fields {
            record.hide(field);
        }

        let Some(loaded) = self.loaded.last_mut() else {
            return Err(GenerationError::UnknownEntity(entity.name.clone()));
        };
        if self.pool.add_references(&entity.name, [id.clone()]) == 0 {
            loaded.duplicates += 1;
            return Ok(());
        }
        let record = Arc::new(record);
        self.pool
            .cache_record(&entity.name, &id, Arc::clone(&record));
        self.pool
            .add_recent(&entity.name, id, chrono::Utc::now().timestamp_millis());
        loaded.records.push(record);
        Ok(())
    }

    fn records(&self, entity: &str) -> &[Arc<Record>] {
        self.loaded
            .iter()
            .find(|loaded| loaded.name == entity)
            .map(|loaded| loaded.records.as_slice())
            .unwrap_or_default()
    }

    /// Send every `bulk_load` entity to its topic; returns messages per topic.
    pub fn produce_all(&self, sink: &mut dyn Sink) -> Result<BTreeMap<String, u64>, GenerationError> {
        let mut produced = BTreeMap::new();
        for entity in self.config.master.iter().filter(|entity| entity.bulk_load) {
            let Some(topic) = entity.topic.as_deref() else {
                continue;
            };
            let mut count = 0_u64;
            for record in self.records(&entity.name) {
                let key = record_key(entity.key_field.as_ref(), record);
                sink.produce(topic, key.as_deref(), record)?;
                count += 1;
            }
            info!(entity = %entity.name, topic = %topic, messages = count, "master entity produced");
            *produced.entry(topic.to_string()).or_insert(0) += count;
        }
        let pending = sink.flush(FLUSH_TIMEOUT)?;
        if pending > 0 {
            warn!(pending, "sink flush left messages pending");
        }
        Ok(produced)
    }

    pub fn get_loading_stats(&self) -> &[LoadingStats] {
        &self.stats
    }

    /// First `count` loaded records of `entity`.
    pub fn get_sample(&self, entity: &str, count: usize) -> Vec<Arc<Record>> {
        self.records(entity).iter().take(count).cloned().collect()
    }

    /// Ids dropped because an earlier record already used them.
    pub fn duplicate_count(&self, entity: &str) -> u64 {
        self.loaded
            .iter()
            .filter(|loaded| loaded.name == entity)
            .map(|loaded| loaded.duplicates)
            .sum()
    }

    pub fn csv_exports(&self) -> &BTreeMap<String, PathBuf> {
        &self.csv_exports
    }

    pub fn pool(&self) -> &ReferencePool {
        &self.pool
    }

    /// Hand the fully loaded pool over to the read-only phase.
    pub fn into_pool(self) -> ReferencePool {
        self.pool
    }
}

#[cfg(test)]
mod tests {
    use relgen_config::validate_config;
    use serde_json::json;

    use relgen_core::Value;

    use super::*;
    use crate::faker_rs::FakeRsFaker;
    use crate::sink::MemorySink;

    #[test]
    fn generated_entities_register_unique_ids_and_produce() {
        let compiled = validate_config(&json!({
            "master_data": {
                "customers": {
                    "count": 25,
                    "kafka_topic": "customers",
                    "key_field": "id",
                    "key_only_fields": ["tenant"],
                    "schema": {
                        "id": {"type": "format", "pattern": "C-{seq:04d}"},
                        "tenant": {"type": "choice", "choices": ["acme"]},
                        "name": {"type": "faker", "method": "name"}
                    }
                },
                "tiers": {
                    "count": 10,
                    "schema": {"id": {"type": "choice", "choices": ["gold", "silver"]}}
                }
            }
        }))
        .expect("config");
        let faker = FakeRsFaker::default();
        let mut master = MasterDataGenerator::new(&compiled.config, &faker, 7);
        master.load_all().expect("load");

        assert_eq!(master.pool().get_type_count("customers"), 25);
        assert_eq!(master.pool().get_type_count("tiers"), 2);
        assert_eq!(master.duplicate_count("tiers"), 8);

        let sample = master.get_sample("customers", 2);
        assert_eq!(sample[0].get("id"), Some(&Value::from("C-0001")));
        assert_eq!(sample[0].get("tenant"), None);
        assert_eq!(sample[0].key_only("tenant"), Some(&Value::from("acme")));

        let mut sink = MemorySink::new();
        let produced = master.produce_all(&mut sink).expect("produce");
        assert_eq!(produced.get("customers"), Some(&25));
        assert_eq!(sink.len(), 25, "tiers has no topic and stays pool-only");
        assert_eq!(sink.messages()[1].key.as_deref(), Some("C-0002"));
        assert_eq!(master.get_loading_stats().len(), 2);
    }

    #[test]
    fn same_seed_loads_identical_records() {
        let compiled = validate_config(&json!({
            "master_data": {
                "customers": {
                    "count": 5,
                    "schema": {
                        "id": {"type": "uuid"},
                        "city": {"type": "faker", "method": "city"}
                    }
                }
            }
        }))
        .expect("config");
        let faker = FakeRsFaker::default();
        let mut first = MasterDataGenerator::new(&compiled.config, &faker, 11);
        let mut second = MasterDataGenerator::new(&compiled.config, &faker, 11);
        first.load_all().expect("load");
        second.load_all().expect("load");
        assert_eq!(
            first.get_sample("customers", 5),
            second.get_sample("customers", 5)
        );
    }

    #[test]
    fn extreme_float_bounds_generate_finite_values() {
        let compiled = validate_config(&json!({
            "master_data": {
                "readings": {
                    "count": 50,
                    "schema": {
                        "id": {"type": "format", "pattern": "R-{seq}"},
                        "value": {"type": "float_range", "min": -1e308, "max": 1e308, "decimals": 2}
                    }
                }
            }
        }))
        .expect("config");
        let faker = FakeRsFaker::default();
        let mut master = MasterDataGenerator::new(&compiled.config, &faker, 5);
        master.load_all().expect("load");
        for record in master.get_sample("readings", 50) {
            match record.get("value") {
                Some(Value::Float(value)) => assert!(value.is_finite(), "{value}"),
                other => panic!("unexpected value {other:?}"),
            }
        }
    }
}
