//! In-memory store of master-data identifiers and records.
//!
//! The pool is written during the master load (`&mut self`) and only read
//! afterwards, shared as `Arc<ReferencePool>` across transactional workers.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use rand::Rng;
use rand::distr::Distribution;
use rand::distr::weighted::WeightedIndex;
use rand::seq::IndexedRandom;
use relgen_config::{DEFAULT_ID_FIELD, PoolOptions, SelectionMode};
use relgen_core::{FieldPath, Record, Value};
use tracing::debug;

use crate::errors::GenerationError;
use crate::model::{MemoryUsage, PoolTypeStats, TypeMemoryUsage};

const MILLIS_PER_MINUTE: i64 = 60_000;

/// Bounded FIFO of recently registered identifiers.
#[derive(Debug)]
struct RecentWindow {
    capacity: usize,
    entries: VecDeque<(Value, i64)>,
}

impl RecentWindow {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity.min(4096)),
        }
    }

    fn push(&mut self, id: Value, inserted_at: i64) {
        if self.capacity == 0 {
            return;
        }
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back((id, inserted_at));
    }
}

#[derive(Debug)]
struct SecondaryIndex {
    path: FieldPath,
    entries: HashMap<String, Vec<Value>>,
}

impl SecondaryIndex {
    fn insert(&mut self, id: &Value, record: &Record) {
        if let Some(value) = record.get_path(&self.path)
            && !value.is_null()
        {
            self.entries
                .entry(value.to_text())
                .or_default()
                .push(id.clone());
        }
    }

    fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }
}

#[derive(Debug)]
struct PoolEntry {
    id_field: FieldPath,
    ids: Vec<Value>,
    known: HashSet<String>,
    records: HashMap<String, Arc<Record>>,
    indexes: Vec<SecondaryIndex>,
    recent: Option<RecentWindow>,
    reference_count: AtomicU64,
    access_count: AtomicU64,
    /// Zipf samplers keyed by `alpha.to_bits()`, built for the current population.
    zipf: RwLock<HashMap<u64, Arc<WeightedIndex<f64>>>>,
}

impl PoolEntry {
    fn new(id_field: FieldPath) -> Self {
        Self {
            id_field,
            ids: Vec::new(),
            known: HashSet::new(),
            records: HashMap::new(),
            indexes: Vec::new(),
            recent: None,
            reference_count: AtomicU64::new(0),
            access_count: AtomicU64::new(0),
            zipf: RwLock::new(HashMap::new()),
        }
    }

    fn invalidate_samplers(&mut self) {
        match self.zipf.get_mut() {
            Ok(cache) => cache.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }
}

/// Per-run reference store.
#[derive(Debug)]
pub struct ReferencePool {
    entries: BTreeMap<String, PoolEntry>,
    cache_records: bool,
    stats_enabled: bool,
}

impl Default for ReferencePool {
    fn default() -> Self {
        Self::new(PoolOptions::default())
    }
}

impl ReferencePool {
    pub fn new(options: PoolOptions) -> Self {
        Self {
            entries: BTreeMap::new(),
            cache_records: options.cache_records,
            stats_enabled: options.stats,
        }
    }

    pub fn caches_records(&self) -> bool {
        self.cache_records
    }

    /// Declare an entity type and the field its identifiers live in.
    pub fn register_type(&mut self, entity: &str, id_field: FieldPath) {
        match self.entries.get_mut(entity) {
            Some(entry) => entry.id_field = id_field,
            None => {
                self.entries
                    .insert(entity.to_string(), PoolEntry::new(id_field));
            }
        }
    }

    fn entry_mut(&mut self, entity: &str) -> &mut PoolEntry {
        self.entries
            .entry(entity.to_string())
            .or_insert_with(|| PoolEntry::new(FieldPath::field(DEFAULT_ID_FIELD)))
    }

    fn populated(&self, entity: &str) -> Result<&PoolEntry, GenerationError> {
        self.entries
            .get(entity)
            .filter(|entry| !entry.ids.is_empty())
            .ok_or_else(|| GenerationError::EmptyPool(entity.to_string()))
    }

    /// Append identifiers, ignoring nulls and ids already present.
    ///
    /// Returns how many were new.
    pub fn add_references<I>(&mut self, entity: &str, ids: I) -> usize
    where
        I: IntoIterator<Item = Value>,
    {
        let entry = self.entry_mut(entity);
        let before = entry.ids.len();
        for id in ids {
            if id.is_null() {
                continue;
            }
            if entry.known.insert(id.to_text()) {
                entry.ids.push(id);
            }
        }
        let added = entry.ids.len() - before;
        if added > 0 {
            entry.invalidate_samplers();
        }
        added
    }

    pub fn contains(&self, entity: &str, id: &Value) -> bool {
        self.entries
            .get(entity)
            .is_some_and(|entry| entry.known.contains(&id.to_text()))
    }

    fn count_references(&self, entry: &PoolEntry, count: u64) {
        if self.stats_enabled {
            entry.reference_count.fetch_add(count, Ordering::Relaxed);
        }
    }

    fn count_access(&self, entry: &PoolEntry) {
        if self.stats_enabled {
            entry.access_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Uniformly sampled identifier.
    pub fn get_random<R: Rng + ?Sized>(
        &self,
        entity: &str,
        rng: &mut R,
    ) -> Result<Value, GenerationError> {
        let entry = self.populated(entity)?;
        let id = entry
            .ids
            .choose(rng)
            .cloned()
            .ok_or_else(|| GenerationError::EmptyPool(entity.to_string()))?;
        self.count_references(entry, 1);
        Ok(id)
    }

    /// Identifier sampled according to `mode`.
    ///
    /// `now_millis` is only consulted by recency-biased selection.
    pub fn get_random_weighted<R: Rng + ?Sized>(
        &self,
        entity: &str,
        mode: &SelectionMode,
        now_millis: i64,
        rng: &mut R,
    ) -> Result<Value, GenerationError> {
        match mode {
            SelectionMode::Uniform => self.get_random(entity, rng),
            SelectionMode::Zipf { alpha } => {
                let entry = self.populated(entity)?;
                let sampler = zipf_sampler(entry, *alpha)?;
                let id = entry.ids[sampler.sample(rng)].clone();
                self.count_references(entry, 1);
                Ok(id)
            }
            SelectionMode::RecencyBias { max_delay_minutes } => {
                let entry = self.populated(entity)?;
                let Some(window) = entry.recent.as_ref().filter(|w| !w.entries.is_empty())
                else {
                    return self.get_random(entity, rng);
                };
                let horizon = now_millis
                    .saturating_sub((*max_delay_minutes as i64).saturating_mul(MILLIS_PER_MINUTE));
                let fresh: Vec<&Value> = window
                    .entries
                    .iter()
                    .filter(|(_, inserted_at)| *inserted_at >= horizon)
                    .map(|(id, _)| id)
                    .collect();
                let candidates: Vec<&Value> = if fresh.is_empty() {
                    window.entries.iter().map(|(id, _)| id).collect()
                } else {
                    fresh
                };
                let id = newest_first(&candidates, rng).clone();
                self.count_references(entry, 1);
                Ok(id)
            }
        }
    }

    /// `count` distinct identifiers sampled without replacement.
    pub fn get_random_batch<R: Rng + ?Sized>(
        &self,
        entity: &str,
        count: usize,
        rng: &mut R,
    ) -> Result<Vec<Value>, GenerationError> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let entry = self.populated(entity)?;
        if count > entry.ids.len() {
            return Err(GenerationError::BatchTooLarge {
                entity: entity.to_string(),
                requested: count,
                available: entry.ids.len(),
            });
        }
        let picked = rand::seq::index::sample(rng, entry.ids.len(), count)
            .into_iter()
            .map(|idx| entry.ids[idx].clone())
            .collect();
        self.count_references(entry, count as u64);
        Ok(picked)
    }

    /// Keep the full record for `id`; feeds declared indexes even when caching is off.
    pub fn cache_record(&mut self, entity: &str, id: &Value, record: Arc<Record>) {
        let cache = self.cache_records;
        let entry = self.entry_mut(entity);
        for index in &mut entry.indexes {
            index.insert(id, &record);
        }
        if cache {
            entry.records.insert(id.to_text(), record);
        }
    }

    pub fn get_cached_record(&self, entity: &str, id: &Value) -> Option<Arc<Record>> {
        let entry = self.entries.get(entity)?;
        self.count_access(entry);
        entry.records.get(&id.to_text()).cloned()
    }

    /// Record a relationship resolves to: the cached record, or a bare record
    /// holding only the id field.
    pub fn resolve_record(&self, entity: &str, id: &Value) -> Result<Arc<Record>, GenerationError> {
        if let Some(record) = self.get_cached_record(entity, id) {
            return Ok(record);
        }
        let entry = self
            .entries
            .get(entity)
            .ok_or_else(|| GenerationError::UnknownEntity(entity.to_string()))?;
        let mut record = Record::new();
        record.set_path(&entry.id_field, id.clone())?;
        Ok(Arc::new(record))
    }

    /// Start tracking the newest `window` identifiers of `entity`.
    pub fn enable_recent_tracking(&mut self, entity: &str, window: usize) {
        let entry = self.entry_mut(entity);
        match entry.recent.as_mut() {
            Some(recent) => {
                recent.capacity = window;
                while recent.entries.len() > window {
                    recent.entries.pop_front();
                }
            }
            None => entry.recent = Some(RecentWindow::new(window)),
        }
        debug!(entity = %entity, window, "recent tracking enabled");
    }

    /// No-op unless tracking was enabled for `entity`.
    pub fn add_recent(&mut self, entity: &str, id: Value, inserted_at_millis: i64) {
        if let Some(recent) = self
            .entries
            .get_mut(entity)
            .and_then(|entry| entry.recent.as_mut())
        {
            recent.push(id, inserted_at_millis);
        }
    }

    /// Tracked identifiers, oldest first.
    pub fn get_recent(&self, entity: &str) -> Vec<Value> {
        self.entries
            .get(entity)
            .and_then(|entry| entry.recent.as_ref())
            .map(|recent| recent.entries.iter().map(|(id, _)| id.clone()).collect())
            .unwrap_or_default()
    }

    /// Build a secondary index over `path`, covering records cached so far.
    pub fn create_index(&mut self, entity: &str, path: FieldPath) {
        let entry = self.entry_mut(entity);
        if entry.indexes.iter().any(|index| index.path == path) {
            return;
        }
        let mut index = SecondaryIndex {
            path,
            entries: HashMap::new(),
        };
        for id in &entry.ids {
            if let Some(record) = entry.records.get(&id.to_text()) {
                index.insert(id, record);
            }
        }
        debug!(entity = %entity, path = %index.path, entries = index.len(), "index created");
        entry.indexes.push(index);
    }

    /// Identifiers whose `path` equals `value`, in insertion order.
    pub fn lookup(&self, entity: &str, path: &FieldPath, value: &Value) -> &[Value] {
        let Some(entry) = self.entries.get(entity) else {
            return &[];
        };
        let Some(index) = entry.indexes.iter().find(|index| &index.path == path) else {
            return &[];
        };
        self.count_access(entry);
        index
            .entries
            .get(&value.to_text())
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn enable_stats(&mut self) {
        self.stats_enabled = true;
    }

    pub fn stats_enabled(&self) -> bool {
        self.stats_enabled
    }

    pub fn get_stats(&self) -> BTreeMap<String, PoolTypeStats> {
        self.entries
            .iter()
            .map(|(name, entry)| {
                let stats = PoolTypeStats {
                    population: entry.ids.len(),
                    cached_records: entry.records.len(),
                    reference_count: entry.reference_count.load(Ordering::Relaxed),
                    access_count: entry.access_count.load(Ordering::Relaxed),
                };
                (name.clone(), stats)
            })
            .collect()
    }

    pub fn get_memory_usage(&self) -> MemoryUsage {
        let mut usage = MemoryUsage::default();
        for (name, entry) in &self.entries {
            let type_usage = TypeMemoryUsage {
                population: entry.ids.len(),
                cached_records: entry.records.len(),
                index_entries: entry.indexes.iter().map(SecondaryIndex::len).sum(),
                recent_entries: entry
                    .recent
                    .as_ref()
                    .map_or(0, |recent| recent.entries.len()),
            };
            usage.total_references += type_usage.population;
            usage.total_cached_records += type_usage.cached_records;
            usage.total_index_entries += type_usage.index_entries;
            usage.types.insert(name.clone(), type_usage);
        }
        usage
    }

    pub fn get_type_count(&self, entity: &str) -> usize {
        self.entries.get(entity).map_or(0, |entry| entry.ids.len())
    }

    pub fn entity_types(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Identifiers of `entity` in insertion order.
    pub fn ids(&self, entity: &str) -> &[Value] {
        self.entries
            .get(entity)
            .map(|entry| entry.ids.as_slice())
            .unwrap_or_default()
    }
}

/// Rank 1 is the first inserted identifier.
fn zipf_sampler(entry: &PoolEntry, alpha: f64) -> Result<Arc<WeightedIndex<f64>>, GenerationError> {
    let key = alpha.to_bits();
    if let Ok(cache) = entry.zipf.read()
        && let Some(sampler) = cache.get(&key)
    {
        return Ok(Arc::clone(sampler));
    }
    let weights = (1..=entry.ids.len()).map(|rank| 1.0 / (rank as f64).powf(alpha));
    let sampler = WeightedIndex::new(weights)
        .map(Arc::new)
        .map_err(|err| GenerationError::Sampling(format!("zipf sampler: {err}")))?;
    if let Ok(mut cache) = entry.zipf.write() {
        cache.insert(key, Arc::clone(&sampler));
    }
    Ok(sampler)
}

/// Quadratic bias toward the end of `candidates` (the newest entries).
fn newest_first<'a, R: Rng + ?Sized>(candidates: &[&'a Value], rng: &mut R) -> &'a Value {
    let u: f64 = rng.random();
    let offset = ((u * u) * candidates.len() as f64) as usize;
    let offset = offset.min(candidates.len() - 1);
    candidates[candidates.len() - 1 - offset]
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    use super::*;

    fn ids(prefix: &str, count: usize) -> Vec<Value> {
        (1..=count)
            .map(|n| Value::from(format!("{prefix}{n}")))
            .collect()
    }

    #[test]
    fn add_references_ignores_duplicates_across_loads() {
        let mut pool = ReferencePool::default();
        assert_eq!(pool.add_references("customers", ids("C", 10)), 10);
        assert_eq!(pool.add_references("customers", ids("C", 15)), 5);
        assert_eq!(pool.add_references("customers", [Value::Null]), 0);
        assert_eq!(pool.get_type_count("customers"), 15);
        let unique: HashSet<String> = pool.ids("customers").iter().map(Value::to_text).collect();
        assert_eq!(unique.len(), 15);
    }

    #[test]
    fn empty_type_cannot_be_sampled() {
        let pool = ReferencePool::default();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert!(matches!(
            pool.get_random("ghosts", &mut rng),
            Err(GenerationError::EmptyPool(_))
        ));
    }

    #[test]
    fn batch_is_distinct_and_bounded() {
        let mut pool = ReferencePool::default();
        pool.add_references("customers", ids("C", 20));
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let batch = pool.get_random_batch("customers", 20, &mut rng).expect("batch");
        let unique: HashSet<String> = batch.iter().map(Value::to_text).collect();
        assert_eq!(unique.len(), 20);
        assert!(matches!(
            pool.get_random_batch("customers", 21, &mut rng),
            Err(GenerationError::BatchTooLarge {
                requested: 21,
                available: 20,
                ..
            })
        ));
    }

    #[test]
    fn zipf_prefers_early_ranks() {
        let mut pool = ReferencePool::default();
        pool.add_references("products", ids("P", 100));
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let mode = SelectionMode::Zipf { alpha: 1.2 };
        let mut first = 0;
        let mut last = 0;
        for _ in 0..5_000 {
            let id = pool
                .get_random_weighted("products", &mode, 0, &mut rng)
                .expect("zipf");
            match id.to_text().as_str() {
                "P1" => first += 1,
                "P100" => last += 1,
                _ => {}
            }
        }
        assert!(first > last * 10, "first={first} last={last}");
    }

    #[test]
    fn recency_bias_uses_fresh_window_entries() {
        let mut pool = ReferencePool::default();
        pool.add_references("appointments", ids("A", 50));
        pool.enable_recent_tracking("appointments", 5);
        for (n, id) in ids("A", 50).into_iter().enumerate() {
            pool.add_recent("appointments", id, n as i64 * MILLIS_PER_MINUTE);
        }
        assert_eq!(pool.get_recent("appointments"), ids("A", 50)[45..].to_vec());

        let mut rng = ChaCha8Rng::seed_from_u64(4);
        let now = 49 * MILLIS_PER_MINUTE;
        let mode = SelectionMode::RecencyBias {
            max_delay_minutes: 2,
        };
        for _ in 0..200 {
            let id = pool
                .get_random_weighted("appointments", &mode, now, &mut rng)
                .expect("recent");
            assert!(["A48", "A49", "A50"].contains(&id.to_text().as_str()), "{id}");
        }
    }

    #[test]
    fn index_and_cache_resolve_records() {
        let mut pool = ReferencePool::new(PoolOptions {
            cache_records: true,
            stats: true,
        });
        pool.register_type("customers", FieldPath::field("id"));
        pool.create_index("customers", FieldPath::parse("address.city").expect("path"));
        for (id, city) in [("C1", "Lisbon"), ("C2", "Porto"), ("C3", "Lisbon")] {
            let mut address = Record::new();
            address.insert("city", Value::from(city));
            let mut record = Record::new();
            record.insert("id", Value::from(id));
            record.insert("address", Value::Object(address));
            pool.add_references("customers", [Value::from(id)]);
            pool.cache_record("customers", &Value::from(id), Arc::new(record));
        }
        let path = FieldPath::parse("address.city").expect("path");
        assert_eq!(
            pool.lookup("customers", &path, &Value::from("Lisbon")),
            &[Value::from("C1"), Value::from("C3")]
        );
        let record = pool
            .resolve_record("customers", &Value::from("C2"))
            .expect("record");
        assert_eq!(record.get_path(&path), Some(&Value::from("Porto")));
        let stats = pool.get_stats();
        assert_eq!(stats["customers"].population, 3);
        assert_eq!(stats["customers"].access_count, 2);
        assert_eq!(pool.get_memory_usage().total_index_entries, 3);
    }

    #[test]
    fn disabled_cache_resolves_bare_records() {
        let mut pool = ReferencePool::new(PoolOptions {
            cache_records: false,
            stats: false,
        });
        pool.register_type("customers", FieldPath::field("customer_id"));
        pool.add_references("customers", [Value::Int(7)]);
        pool.cache_record("customers", &Value::Int(7), Arc::new(Record::new()));
        let record = pool
            .resolve_record("customers", &Value::Int(7))
            .expect("record");
        assert_eq!(record.get("customer_id"), Some(&Value::Int(7)));
        assert_eq!(record.len(), 1);
        assert_eq!(pool.get_stats()["customers"].access_count, 0);
    }

    #[test]
    fn unregistered_types_key_bare_records_by_default_id_field() {
        let mut pool = ReferencePool::new(PoolOptions {
            cache_records: false,
            stats: false,
        });
        pool.add_references("tiers", [Value::from("gold")]);
        let record = pool
            .resolve_record("tiers", &Value::from("gold"))
            .expect("record");
        assert_eq!(record.get(DEFAULT_ID_FIELD), Some(&Value::from("gold")));
    }
}
