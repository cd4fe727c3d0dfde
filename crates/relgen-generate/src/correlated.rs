//! Transactional record generation against a loaded [`ReferencePool`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use relgen_config::{RelationshipSpec, TransactionalEntity};
use relgen_core::{FieldPath, Record, Value};
use tracing::debug;

use crate::errors::GenerationError;
use crate::faker_rs::Faker;
use crate::generators::{GenerationContext, populate};
use crate::model::{CorrelationRunStats, RelationshipStats};
use crate::pool::ReferencePool;

/// Sleeps just enough to hold a steady records-per-second rate.
#[derive(Debug)]
struct Pacer {
    interval: Duration,
    next_due: Option<Instant>,
}

impl Pacer {
    fn new(rate_per_second: f64) -> Option<Self> {
        if !rate_per_second.is_finite() || rate_per_second <= 0.0 {
            return None;
        }
        Some(Self {
            interval: Duration::from_secs_f64(1.0 / rate_per_second),
            next_due: None,
        })
    }

    fn wait(&mut self) {
        let now = Instant::now();
        let due = self.next_due.unwrap_or(now);
        if due > now {
            std::thread::sleep(due - now);
        }
        self.next_due = Some(due.max(now) + self.interval);
    }
}

/// Produces transactional records for one entity.
///
/// Each instance owns its PRNG and pacing; several instances may share one
/// pool and one stop flag.
pub struct CorrelatedDataGenerator<'a> {
    entity: &'a TransactionalEntity,
    pool: Arc<ReferencePool>,
    faker: &'a dyn Faker,
    rng: ChaCha8Rng,
    stop: Arc<AtomicBool>,
    max_messages: Option<u64>,
    produced: u64,
    sequence_offset: u64,
    sequence_stride: u64,
    pacer: Option<Pacer>,
    finished: bool,
    stats: CorrelationRunStats,
}

impl<'a> CorrelatedDataGenerator<'a> {
    pub fn new(
        entity: &'a TransactionalEntity,
        pool: Arc<ReferencePool>,
        faker: &'a dyn Faker,
        seed: u64,
    ) -> Self {
        let stats = CorrelationRunStats {
            entity: entity.name.clone(),
            records: 0,
            relationships: entity
                .relationships
                .iter()
                .map(|relationship| RelationshipStats {
                    field: relationship.field.clone(),
                    entity: relationship.entity.clone(),
                    correlated: 0,
                    uncorrelated: 0,
                    target_ratio: relationship.percentage / 100.0,
                })
                .collect(),
        };
        Self {
            entity,
            pool,
            faker,
            rng: ChaCha8Rng::seed_from_u64(seed),
            stop: Arc::new(AtomicBool::new(false)),
            max_messages: entity.max_messages,
            produced: 0,
            sequence_offset: 0,
            sequence_stride: 1,
            pacer: entity.rate_per_second.and_then(Pacer::new),
            finished: false,
            stats,
        }
    }

    /// Share a stop flag checked once between records.
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    pub fn with_max_messages(mut self, max_messages: Option<u64>) -> Self {
        self.max_messages = max_messages;
        self
    }

    pub fn with_rate(mut self, rate_per_second: Option<f64>) -> Self {
        self.pacer = rate_per_second.and_then(Pacer::new);
        self
    }

    /// Interleave sequence numbers with sibling workers: the n-th record gets
    /// `offset + 1 + n * stride`.
    pub fn with_sequence(mut self, offset: u64, stride: u64) -> Self {
        self.sequence_offset = offset;
        self.sequence_stride = stride.max(1);
        self
    }

    pub fn topic(&self) -> &str {
        &self.entity.topic
    }

    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn entity(&self) -> &'a TransactionalEntity {
        self.entity
    }

    /// Message key of a produced record.
    pub fn key_for(&self, record: &Record) -> Option<String> {
        record_key(self.entity.key_field.as_ref(), record)
    }

    /// Lazy, non-restartable record stream.
    ///
    /// Ends at `max_messages`, when the stop flag is raised, or after the
    /// first error.
    pub fn generate(&mut self) -> impl Iterator<Item = Result<Record, GenerationError>> + '_ {
        std::iter::from_fn(move || self.next_record())
    }

    pub fn correlation_stats(&self) -> &CorrelationRunStats {
        &self.stats
    }

    fn next_record(&mut self) -> Option<Result<Record, GenerationError>> {
        if self.finished || self.stop.load(Ordering::Relaxed) {
            return None;
        }
        if self.max_messages.is_some_and(|max| self.produced >= max) {
            self.finished = true;
            return None;
        }
        if let Some(pacer) = self.pacer.as_mut() {
            pacer.wait();
        }
        match self.build_record() {
            Ok(record) => {
                self.produced += 1;
                self.stats.records += 1;
                if self.produced % 10_000 == 0 {
                    debug!(entity = %self.entity.name, records = self.produced, "transactional records generated");
                }
                Some(Ok(record))
            }
            Err(err) => {
                self.finished = true;
                Some(Err(err))
            }
        }
    }

    fn build_record(&mut self) -> Result<Record, GenerationError> {
        let sequence = self.sequence_offset + 1 + self.produced * self.sequence_stride;
        let now = chrono::Utc::now().timestamp_millis();
        let entity = self.entity;
        let pool = Arc::clone(&self.pool);
        let mut ctx = GenerationContext::new(self.faker, &mut self.rng, sequence, now);

        for (relationship, stats) in entity
            .relationships
            .iter()
            .zip(self.stats.relationships.iter_mut())
        {
            let resolved = resolve(&pool, relationship, now, ctx.rng())?;
            match resolved {
                Some((value, record)) => {
                    stats.correlated += 1;
                    ctx.record_mut().insert(relationship.field.clone(), value);
                    ctx.set_relationship(&relationship.entity, Some(record));
                }
                None => {
                    stats.uncorrelated += 1;
                    ctx.record_mut()
                        .insert(relationship.field.clone(), Value::Null);
                    ctx.set_relationship(&relationship.entity, None);
                }
            }
        }

        populate(&entity.schema, &mut ctx, None)?;
        populate(&entity.derived_fields, &mut ctx, None)?;

        let mut record = ctx.into_record();
        for field in &entity.key_only_fields {
            record.hide(field);
        }
        Ok(record)
    }
}

/// Text of `key_field` in `record`; null or missing keys yield `None`.
pub fn record_key(key_field: Option<&FieldPath>, record: &Record) -> Option<String> {
    key_field
        .and_then(|field| record.lookup(field))
        .filter(|key| !key.is_null())
        .map(Value::to_text)
}

/// One Bernoulli draw against `percentage`, then a pick by selection mode.
fn resolve(
    pool: &ReferencePool,
    relationship: &RelationshipSpec,
    now_millis: i64,
    rng: &mut ChaCha8Rng,
) -> Result<Option<(Value, Arc<Record>)>, GenerationError> {
    let draw: f64 = rng.random();
    if draw >= relationship.percentage / 100.0 {
        return Ok(None);
    }
    let id = pool.get_random_weighted(&relationship.entity, &relationship.mode, now_millis, rng)?;
    let record = pool.resolve_record(&relationship.entity, &id)?;
    let value = record
        .lookup(&relationship.path)
        .cloned()
        .unwrap_or(Value::Null);
    Ok(Some((value, record)))
}

#[cfg(test)]
mod tests {
    use relgen_config::{SelectionMode, validate_config};
    use serde_json::json;

    use super::*;
    use crate::faker_rs::FakeRsFaker;

    fn customers_pool(count: usize) -> Arc<ReferencePool> {
        let mut pool = ReferencePool::default();
        pool.register_type("customers", FieldPath::field("id"));
        for n in 1..=count {
            let id = Value::from(format!("C{n}"));
            let mut record = Record::new();
            record.insert("id", id.clone());
            record.insert("tier", Value::from(if n % 2 == 0 { "gold" } else { "basic" }));
            pool.add_references("customers", [id.clone()]);
            pool.cache_record("customers", &id, Arc::new(record));
        }
        Arc::new(pool)
    }

    fn orders(percentage: f64) -> TransactionalEntity {
        let compiled = validate_config(&json!({
            "master_data": {
                "customers": {
                    "count": 1,
                    "schema": {
                        "id": {"type": "uuid"},
                        "tier": {"type": "choice", "choices": ["basic", "gold"]}
                    }
                }
            },
            "transactional_data": {
                "orders": {
                    "max_messages": 50,
                    "relationships": {
                        "customer_id": {"source": "customers.id", "percentage": percentage}
                    },
                    "schema": {"order_id": {"type": "format", "pattern": "O{seq:05d}"}},
                    "derived_fields": {
                        "tier": {
                            "type": "conditional",
                            "condition_field": "customer_id",
                            "when_true": {"type": "reference", "source": "customers.tier"},
                            "when_false": {"type": "choice", "choices": ["guest"]}
                        }
                    }
                }
            }
        }))
        .expect("config");
        compiled
            .config
            .transactional_entity("orders")
            .cloned()
            .expect("orders")
    }

    #[test]
    fn stream_honors_max_messages_and_relationships() {
        let entity = orders(100.0);
        let faker = FakeRsFaker::default();
        let mut generator = CorrelatedDataGenerator::new(&entity, customers_pool(10), &faker, 1);
        let records: Vec<Record> = generator
            .generate()
            .collect::<Result<_, _>>()
            .expect("records");
        assert_eq!(records.len(), 50);
        assert_eq!(records[0].get("order_id"), Some(&Value::from("O00001")));
        for record in &records {
            let customer = record.get("customer_id").expect("customer").to_text();
            let n: usize = customer[1..].parse().expect("number");
            let expected = if n % 2 == 0 { "gold" } else { "basic" };
            assert_eq!(record.get("tier"), Some(&Value::from(expected)));
        }
        let stats = generator.correlation_stats();
        assert_eq!(stats.records, 50);
        assert_eq!(stats.relationships[0].correlated, 50);
    }

    #[test]
    fn uncorrelated_records_carry_null_references() {
        let entity = orders(0.0);
        let faker = FakeRsFaker::default();
        let mut generator = CorrelatedDataGenerator::new(&entity, customers_pool(3), &faker, 2);
        for record in generator.generate() {
            let record = record.expect("record");
            assert_eq!(record.get("customer_id"), Some(&Value::Null));
            assert_eq!(record.get("tier"), Some(&Value::from("guest")));
        }
        assert_eq!(generator.correlation_stats().relationships[0].uncorrelated, 50);
    }

    #[test]
    fn stop_flag_ends_the_stream() {
        let entity = orders(100.0);
        let faker = FakeRsFaker::default();
        let stop = Arc::new(AtomicBool::new(false));
        let mut generator = CorrelatedDataGenerator::new(&entity, customers_pool(3), &faker, 3)
            .with_stop_flag(Arc::clone(&stop))
            .with_max_messages(None);
        let mut stream = generator.generate();
        assert!(stream.next().is_some());
        stop.store(true, Ordering::Relaxed);
        assert!(stream.next().is_none());
    }

    #[test]
    fn empty_pool_surfaces_once() {
        let entity = orders(100.0);
        let faker = FakeRsFaker::default();
        let mut generator =
            CorrelatedDataGenerator::new(&entity, Arc::new(ReferencePool::default()), &faker, 4);
        let results: Vec<_> = generator.generate().collect();
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0], Err(GenerationError::EmptyPool(_))));
    }

    #[test]
    fn interleaved_workers_keep_sequences_apart() {
        let entity = orders(100.0);
        let faker = FakeRsFaker::default();
        let mut second = CorrelatedDataGenerator::new(&entity, customers_pool(3), &faker, 5)
            .with_sequence(1, 2)
            .with_max_messages(Some(2));
        let ids: Vec<Value> = second
            .generate()
            .map(|record| record.expect("record").get("order_id").cloned().unwrap_or_default())
            .collect();
        assert_eq!(ids, vec![Value::from("O00002"), Value::from("O00004")]);
        assert_eq!(entity.relationships[0].mode, SelectionMode::Uniform);
    }
}
