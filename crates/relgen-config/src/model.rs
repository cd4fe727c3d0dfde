use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;

use schemars::JsonSchema;
use schemars::r#gen::SchemaGenerator;
use schemars::schema::Schema;
use serde::de::{Error as _, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// Raw generator configuration document.
///
/// Field specs stay untyped JSON trees here; `validate_config` compiles them
/// into [`crate::spec::ValueSpec`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct GeneratorConfig {
    /// Seed for reproducibility; a random seed is drawn when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    /// Faker locale (`en_US` or `pt_BR`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    /// Reference pool behavior.
    #[serde(default)]
    pub pool: PoolConfig,
    /// Master entities keyed by name, in declaration order.
    #[serde(default)]
    pub master_data: OrderedMap<MasterEntityConfig>,
    /// Transactional entities keyed by name, in declaration order.
    #[serde(default)]
    pub transactional_data: OrderedMap<TransactionalEntityConfig>,
}

/// Reference pool options.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct PoolConfig {
    /// Cache full master records so references can reach nested fields.
    #[serde(default = "default_true")]
    pub cache_records: bool,
    /// Track per-type access counters.
    #[serde(default)]
    pub stats: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            cache_records: true,
            stats: false,
        }
    }
}

/// Where master records come from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    #[default]
    Faker,
    Csv,
}

/// Master entity definition.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct MasterEntityConfig {
    #[serde(default)]
    pub source: SourceKind,
    /// Number of records to generate (`faker` source).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    /// CSV file to import (`csv` source).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    /// Delimiter of the imported CSV file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delimiter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kafka_topic: Option<String>,
    #[serde(default = "default_id_field")]
    pub id_field: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_field: Option<String>,
    /// Send records to the topic; defaults to true when a topic is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bulk_load: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub csv_export: Option<CsvExportConfig>,
    /// Nested field specs.
    #[serde(default)]
    pub schema: Map<String, Value>,
    /// Reuse another master entity's schema (CSV column typing).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_from: Option<String>,
    /// Field paths indexed in the reference pool.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub index_fields: Vec<String>,
    /// Size of the recency window used by `recency_bias` relationships.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recent_window: Option<usize>,
    /// Fields kept for the message key but removed from the payload.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub key_only_fields: Vec<String>,
}

/// CSV export target: a bare path or full options.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum CsvExportConfig {
    Path(String),
    Options(CsvExportOptions),
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct CsvExportOptions {
    pub file: String,
    #[serde(default = "default_true")]
    pub include_headers: bool,
    #[serde(default = "default_true")]
    pub flatten_objects: bool,
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
}

impl CsvExportConfig {
    pub fn options(&self) -> CsvExportOptions {
        match self {
            CsvExportConfig::Path(file) => CsvExportOptions {
                file: file.clone(),
                include_headers: true,
                flatten_objects: true,
                delimiter: default_delimiter(),
            },
            CsvExportConfig::Options(options) => options.clone(),
        }
    }
}

/// Transactional entity definition.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct TransactionalEntityConfig {
    /// Output topic; defaults to the entity name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kafka_topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_field: Option<String>,
    /// Relationship fields keyed by the field they populate.
    #[serde(default)]
    pub relationships: OrderedMap<RelationshipConfig>,
    /// Base field specs evaluated after relationships.
    #[serde(default)]
    pub schema: Map<String, Value>,
    /// Field specs evaluated last, in declaration order.
    #[serde(default)]
    pub derived_fields: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_per_second: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_messages: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub key_only_fields: Vec<String>,
}

/// Relationship to a master entity.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct RelationshipConfig {
    /// Dotted `entity.path` of the referenced value.
    pub source: String,
    /// Probability (0-100) that the relationship resolves.
    #[serde(default = "default_percentage")]
    pub percentage: f64,
    #[serde(default)]
    pub strategy: RelationshipStrategy,
    /// Zipf exponent for the `zipf` strategy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alpha: Option<f64>,
    /// Recency horizon for the `recency_bias` strategy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_delay_minutes: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipStrategy {
    #[default]
    Uniform,
    /// Same sampling as `uniform`; the percentage gate applies to every strategy.
    Percentage,
    Zipf,
    RecencyBias,
}

pub const DEFAULT_ID_FIELD: &str = "id";
pub const DEFAULT_ZIPF_ALPHA: f64 = 1.0;
pub const DEFAULT_MAX_DELAY_MINUTES: u64 = 60;

fn default_true() -> bool {
    true
}

fn default_id_field() -> String {
    DEFAULT_ID_FIELD.to_string()
}

fn default_delimiter() -> String {
    ",".to_string()
}

fn default_percentage() -> f64 {
    100.0
}

/// String-keyed map that keeps document order and rejects duplicate keys.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderedMap<T>(Vec<(String, T)>);

impl<T> Default for OrderedMap<T> {
    fn default() -> Self {
        Self(Vec::new())
    }
}

impl<T> OrderedMap<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&T> {
        self.0
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    pub fn contains_key(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Insert or replace an entry, keeping its original position.
    pub fn insert(&mut self, name: impl Into<String>, value: T) {
        let name = name.into();
        match self.0.iter_mut().find(|(key, _)| *key == name) {
            Some(slot) => slot.1 = value,
            None => self.0.push((name, value)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &T)> {
        self.0.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(key, _)| key.as_str())
    }
}

impl<T> FromIterator<(String, T)> for OrderedMap<T> {
    fn from_iter<I: IntoIterator<Item = (String, T)>>(iter: I) -> Self {
        let mut map = OrderedMap::new();
        for (key, value) in iter {
            map.insert(key, value);
        }
        map
    }
}

impl<T: Serialize> Serialize for OrderedMap<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, value) in &self.0 {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for OrderedMap<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct OrderedMapVisitor<T>(PhantomData<T>);

        impl<'de, T: Deserialize<'de>> Visitor<'de> for OrderedMapVisitor<T> {
            type Value = OrderedMap<T>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map keyed by name")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut entries: Vec<(String, T)> = Vec::new();
                while let Some((key, value)) = access.next_entry::<String, T>()? {
                    if entries.iter().any(|(existing, _)| *existing == key) {
                        return Err(A::Error::custom(format!("duplicate key '{key}'")));
                    }
                    entries.push((key, value));
                }
                Ok(OrderedMap(entries))
            }
        }

        deserializer.deserialize_map(OrderedMapVisitor(PhantomData))
    }
}

impl<T: JsonSchema> JsonSchema for OrderedMap<T> {
    fn is_referenceable() -> bool {
        false
    }

    fn schema_name() -> String {
        format!("OrderedMap_of_{}", T::schema_name())
    }

    fn json_schema(generator: &mut SchemaGenerator) -> Schema {
        <BTreeMap<String, T>>::json_schema(generator)
    }
}
