//! Validated, immutable generation model compiled from the raw document.

use std::path::PathBuf;

use relgen_core::{FieldPath, ScalarKind, Value};

/// Declarative description of how one field value is computed.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueSpec {
    Format(FormatSpec),
    Faker(FakerCall),
    Uuid,
    IntRange {
        min: i64,
        max: i64,
    },
    FloatRange {
        min: f64,
        max: f64,
        decimals: Option<u32>,
    },
    Choice(Vec<Value>),
    WeightedChoice {
        choices: Vec<Value>,
        weights: Vec<f64>,
    },
    TimestampMillis(TimestampSpec),
    Conditional(Box<ConditionalSpec>),
    Template(TemplateSpec),
    Reference(ReferenceSpec),
    RandomBoolean {
        probability: f64,
    },
    Object(ObjectSpec),
}

impl ValueSpec {
    /// Scalar kind every evaluation of this spec produces, when statically known.
    pub fn static_kind(&self) -> Option<ScalarKind> {
        match self {
            ValueSpec::Format(_) | ValueSpec::Uuid | ValueSpec::Template(_) => {
                Some(ScalarKind::String)
            }
            ValueSpec::IntRange { .. } => Some(ScalarKind::Int),
            ValueSpec::FloatRange { .. } => Some(ScalarKind::Float),
            ValueSpec::RandomBoolean { .. } => Some(ScalarKind::Bool),
            ValueSpec::TimestampMillis(_) => Some(ScalarKind::Timestamp),
            ValueSpec::Choice(choices) | ValueSpec::WeightedChoice { choices, .. } => {
                common_kind(choices.iter().map(Value::scalar_kind))
            }
            ValueSpec::Conditional(conditional) => {
                let branches = [&conditional.when_true, &conditional.when_false];
                common_kind(
                    branches
                        .iter()
                        .filter_map(|branch| branch.as_ref())
                        .map(ValueSpec::static_kind),
                )
            }
            ValueSpec::Object(_) => Some(ScalarKind::Json),
            ValueSpec::Faker(_) | ValueSpec::Reference(_) => None,
        }
    }
}

/// Kind shared by every input; `None` when any is unknown or they differ.
pub fn common_kind(kinds: impl Iterator<Item = Option<ScalarKind>>) -> Option<ScalarKind> {
    let mut found: Option<ScalarKind> = None;
    for kind in kinds {
        let kind = kind?;
        match found {
            None => found = Some(kind),
            Some(existing) if existing == kind => {}
            Some(_) => return None,
        }
    }
    found
}

/// Parsed `format` pattern.
#[derive(Debug, Clone, PartialEq)]
pub struct FormatSpec {
    pub pattern: String,
    pub parts: Vec<FormatPart>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FormatPart {
    Literal(String),
    /// Per-entity sequence number, optionally zero padded to `width`.
    Seq { width: Option<usize> },
    RandomDigits(usize),
    /// Uppercase ASCII letters.
    RandomLetters(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FakerCall {
    pub method: String,
    pub params: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimestampSpec {
    pub relative_to: Option<ReferenceSpec>,
    /// Inclusive offset range in minutes applied to the anchor.
    pub offset_minutes: (i64, i64),
    pub fallback: TimestampFallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampFallback {
    Now,
    Null,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConditionalSpec {
    pub field: FieldPath,
    /// `None` tests that the field is present and non-null.
    pub value: Option<Value>,
    pub when_true: Option<ValueSpec>,
    pub when_false: Option<ValueSpec>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TemplateSpec {
    pub pattern: String,
    pub parts: Vec<TemplatePart>,
    pub fields: Vec<(String, ValueSpec)>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TemplatePart {
    Literal(String),
    Field(String),
}

/// Source of a `reference` spec.
#[derive(Debug, Clone, PartialEq)]
pub enum ReferenceSpec {
    /// `self.path`: the record under construction.
    SelfField(FieldPath),
    /// `entity.path`: the record resolved for a relationship.
    Entity { entity: String, path: FieldPath },
}

/// Ordered nested schema.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectSpec {
    pub fields: Vec<(String, ValueSpec)>,
}

impl ObjectSpec {
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn field(&self, name: &str) -> Option<&ValueSpec> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, spec)| spec)
    }

    /// Whether `path` addresses a declared field, descending through objects.
    pub fn declares(&self, path: &FieldPath) -> bool {
        let mut current = self;
        let segments = path.segments();
        for (depth, segment) in segments.iter().enumerate() {
            match current.field(segment) {
                Some(ValueSpec::Object(child)) => current = child,
                Some(_) => return depth == segments.len() - 1,
                None => return false,
            }
        }
        true
    }

    /// Spec declared at `path`, descending through nested objects.
    pub fn spec_at(&self, path: &FieldPath) -> Option<&ValueSpec> {
        let (last, parents) = path.segments().split_last()?;
        let mut current = self;
        for segment in parents {
            match current.field(segment)? {
                ValueSpec::Object(child) => current = child,
                _ => return None,
            }
        }
        current.field(last)
    }

    /// Every declared leaf as `(dotted path, spec)`, in declaration order.
    ///
    /// Objects are reported too, so unflattened object columns resolve.
    pub fn leaves(&self) -> Vec<(String, &ValueSpec)> {
        let mut out = Vec::new();
        collect_leaves(self, "", &mut out);
        out
    }
}

fn collect_leaves<'a>(object: &'a ObjectSpec, prefix: &str, out: &mut Vec<(String, &'a ValueSpec)>) {
    for (name, spec) in &object.fields {
        let path = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{prefix}.{name}")
        };
        out.push((path.clone(), spec));
        if let ValueSpec::Object(child) = spec {
            collect_leaves(child, &path, out);
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Source {
    Generated,
    CsvImport { file: PathBuf, delimiter: u8 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CsvExportSpec {
    pub path: PathBuf,
    pub delimiter: u8,
    pub include_headers: bool,
    pub flatten_objects: bool,
}

/// A master-data entity type.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityType {
    pub name: String,
    pub source: Source,
    pub count: u64,
    pub schema: ObjectSpec,
    pub id_field: FieldPath,
    pub key_field: Option<FieldPath>,
    pub topic: Option<String>,
    pub bulk_load: bool,
    pub csv_export: Option<CsvExportSpec>,
    pub index_fields: Vec<FieldPath>,
    pub recent_window: Option<usize>,
    pub key_only_fields: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SelectionMode {
    Uniform,
    Zipf { alpha: f64 },
    RecencyBias { max_delay_minutes: u64 },
}

/// How a transactional field picks a master-data reference.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationshipSpec {
    /// Field placed in the transactional record.
    pub field: String,
    pub entity: String,
    pub path: FieldPath,
    pub mode: SelectionMode,
    /// Probability in percent of a non-null resolution.
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransactionalEntity {
    pub name: String,
    pub topic: String,
    pub key_field: Option<FieldPath>,
    pub relationships: Vec<RelationshipSpec>,
    pub schema: ObjectSpec,
    pub derived_fields: ObjectSpec,
    pub rate_per_second: Option<f64>,
    pub max_messages: Option<u64>,
    pub key_only_fields: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolOptions {
    pub cache_records: bool,
    pub stats: bool,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            cache_records: true,
            stats: false,
        }
    }
}

/// Fully validated configuration; immutable for the rest of the run.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedConfig {
    pub seed: Option<u64>,
    pub locale: Option<String>,
    pub pool: PoolOptions,
    pub master: Vec<EntityType>,
    pub transactional: Vec<TransactionalEntity>,
}

impl ValidatedConfig {
    pub fn master_entity(&self, name: &str) -> Option<&EntityType> {
        self.master.iter().find(|entity| entity.name == name)
    }

    pub fn transactional_entity(&self, name: &str) -> Option<&TransactionalEntity> {
        self.transactional.iter().find(|entity| entity.name == name)
    }
}
