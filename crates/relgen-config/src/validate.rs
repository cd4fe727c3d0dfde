use std::collections::HashSet;
use std::path::{Path, PathBuf};

use jsonschema::JSONSchema;
use relgen_core::{FieldPath, Value};
use serde_json::{Map, Value as Json};

use crate::catalog::FakerCatalog;
use crate::errors::{ConfigError, IssueSeverity, ValidationIssue, ValidationReport};
use crate::model::{
    DEFAULT_ID_FIELD, DEFAULT_MAX_DELAY_MINUTES, DEFAULT_ZIPF_ALPHA, GeneratorConfig,
    MasterEntityConfig, RelationshipConfig, RelationshipStrategy, SourceKind,
    TransactionalEntityConfig,
};
use crate::schema::config_json_schema;
use crate::spec::{
    ConditionalSpec, CsvExportSpec, EntityType, FakerCall, FormatPart, FormatSpec, ObjectSpec,
    PoolOptions, ReferenceSpec, RelationshipSpec, SelectionMode, Source, TemplatePart,
    TemplateSpec, TimestampFallback, TimestampSpec, TransactionalEntity, ValidatedConfig,
    ValueSpec,
};

/// Recency window applied when a `recency_bias` relationship targets an
/// entity without an explicit `recent_window`.
pub const DEFAULT_RECENT_WINDOW: usize = 1000;

/// Validated configuration with accumulated warnings.
#[derive(Debug, Clone)]
pub struct CompiledConfig {
    pub config: ValidatedConfig,
    pub warnings: Vec<ValidationIssue>,
}

/// Inputs the semantic checks need besides the document itself.
#[derive(Clone, Copy, Default)]
pub struct ValidationOptions<'a> {
    /// Directory relative CSV paths resolve against.
    pub base_dir: Option<&'a Path>,
    /// Faker backend used to check method names and parameters.
    pub faker: Option<&'a dyn FakerCatalog>,
}

/// Validate a configuration document against a JSON Schema.
pub fn validate_config_json(
    config_json: &Json,
    config_schema: &Json,
) -> Result<ValidationReport, ConfigError> {
    let compiled =
        JSONSchema::compile(config_schema).map_err(|err| ConfigError::Schema(err.to_string()))?;

    let mut report = ValidationReport::default();

    if let Err(errors) = compiled.validate(config_json) {
        for error in errors {
            let path = dotted_instance_path(&error.instance_path.to_string());
            report.push_error(ValidationIssue::new(
                IssueSeverity::Error,
                "schema_violation",
                path,
                error.to_string(),
                None,
            ));
        }
    }

    Ok(report)
}

/// Validate a document end to end with default options.
///
/// Default options carry no faker backend, so faker methods and params are
/// left unchecked here; [`check_faker_calls`] covers them before generation.
pub fn validate_config(config_json: &Json) -> Result<CompiledConfig, ValidationReport> {
    validate_config_with(config_json, ValidationOptions::default())
}

/// Structural validation, deserialization, then semantic compilation.
pub fn validate_config_with(
    config_json: &Json,
    options: ValidationOptions<'_>,
) -> Result<CompiledConfig, ValidationReport> {
    let schema = match serde_json::to_value(config_json_schema()) {
        Ok(schema) => schema,
        Err(err) => return Err(single_issue("schema_generation_error", err.to_string())),
    };
    let structural = match validate_config_json(config_json, &schema) {
        Ok(report) => report,
        Err(err) => return Err(single_issue("schema_validation_error", err.to_string())),
    };
    if !structural.is_ok() {
        return Err(structural);
    }

    let config: GeneratorConfig = match serde_json::from_value(config_json.clone()) {
        Ok(config) => config,
        Err(err) => return Err(single_issue("invalid_config_json", err.to_string())),
    };

    compile_config(&config, options)
}

/// Compile a deserialized document into the immutable generation model.
pub fn compile_config(
    config: &GeneratorConfig,
    options: ValidationOptions<'_>,
) -> Result<CompiledConfig, ValidationReport> {
    let mut compiler = Compiler {
        options,
        report: ValidationReport::default(),
    };
    let validated = compiler.compile(config);
    if compiler.report.is_ok() {
        Ok(CompiledConfig {
            config: validated,
            warnings: compiler.report.warnings,
        })
    } else {
        Err(compiler.report)
    }
}

/// Check every faker call of generated entities against `faker`.
pub fn check_faker_calls<F>(config: &ValidatedConfig, faker: &F) -> ValidationReport
where
    F: FakerCatalog + ?Sized,
{
    let mut report = ValidationReport::default();
    if let Some(locale) = &config.locale
        && !faker.supports_locale(locale)
    {
        report.error(
            "unsupported_locale",
            "locale",
            format!("locale '{locale}' is not supported"),
        );
    }
    for entity in config
        .master
        .iter()
        .filter(|entity| entity.source == Source::Generated)
    {
        check_object_fakers(&mut report, faker, &entity.schema, &join(&entity.name, "schema"));
    }
    for entity in &config.transactional {
        check_object_fakers(&mut report, faker, &entity.schema, &join(&entity.name, "schema"));
        check_object_fakers(
            &mut report,
            faker,
            &entity.derived_fields,
            &join(&entity.name, "derived_fields"),
        );
    }
    report
}

fn check_object_fakers<F>(report: &mut ValidationReport, faker: &F, object: &ObjectSpec, path: &str)
where
    F: FakerCatalog + ?Sized,
{
    for (name, spec) in &object.fields {
        check_spec_fakers(report, faker, spec, &join(path, name));
    }
}

fn check_spec_fakers<F>(report: &mut ValidationReport, faker: &F, spec: &ValueSpec, path: &str)
where
    F: FakerCatalog + ?Sized,
{
    match spec {
        ValueSpec::Faker(call) => {
            check_faker_call(report, faker, &call.method, &call.params, path);
        }
        ValueSpec::Object(object) => check_object_fakers(report, faker, object, path),
        ValueSpec::Template(template) => {
            let fields_path = join(path, "fields");
            for (name, spec) in &template.fields {
                check_spec_fakers(report, faker, spec, &join(&fields_path, name));
            }
        }
        ValueSpec::Conditional(conditional) => {
            let branches = [
                ("when_true", &conditional.when_true),
                ("when_false", &conditional.when_false),
            ];
            for (key, branch) in branches {
                if let Some(branch) = branch {
                    check_spec_fakers(report, faker, branch, &join(path, key));
                }
            }
        }
        _ => {}
    }
}

/// Report an unknown method or bad params; true when the call is usable.
fn check_faker_call<F>(
    report: &mut ValidationReport,
    faker: &F,
    method: &str,
    params: &Map<String, Json>,
    path: &str,
) -> bool
where
    F: FakerCatalog + ?Sized,
{
    if !faker.supports(method) {
        report.error(
            "unknown_faker_method",
            join(path, "method"),
            format!("faker method '{method}' is not supported"),
        );
        return false;
    }
    if let Err(message) = faker.check_params(method, params) {
        report.error("invalid_faker_params", join(path, "params"), message);
        return false;
    }
    true
}

fn single_issue(code: &str, message: String) -> ValidationReport {
    let mut report = ValidationReport::default();
    report.error(code, "", message);
    report
}

fn dotted_instance_path(pointer: &str) -> String {
    pointer.trim_start_matches('/').replace('/', ".")
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

struct Compiler<'a> {
    options: ValidationOptions<'a>,
    report: ValidationReport,
}

impl Compiler<'_> {
    fn compile(&mut self, config: &GeneratorConfig) -> ValidatedConfig {
        if let Some(locale) = &config.locale
            && let Some(faker) = self.options.faker
            && !faker.supports_locale(locale)
        {
            self.report.error(
                "unsupported_locale",
                "locale",
                format!("locale '{locale}' is not supported"),
            );
        }

        let exported: HashSet<PathBuf> = config
            .master_data
            .iter()
            .filter(|(_, entity)| entity.source == SourceKind::Faker)
            .filter_map(|(_, entity)| entity.csv_export.as_ref())
            .map(|export| self.resolve_path(&export.options().file))
            .collect();

        let mut master = Vec::with_capacity(config.master_data.len());
        for (name, entity) in config.master_data.iter() {
            master.push(self.compile_master(name, entity, &exported, config.pool.cache_records));
        }
        self.resolve_schema_from(config, &mut master);
        for entity in &master {
            self.check_master_fields(entity);
        }

        let mut transactional = Vec::with_capacity(config.transactional_data.len());
        for (name, entity) in config.transactional_data.iter() {
            if config.master_data.contains_key(name) {
                self.report.error(
                    "duplicate_entity_name",
                    name,
                    format!("'{name}' is declared as both master and transactional data"),
                );
            }
            transactional.push(self.compile_transactional(
                name,
                entity,
                &master,
                config.pool.cache_records,
            ));
        }

        for entity in &transactional {
            for relationship in &entity.relationships {
                if !matches!(relationship.mode, SelectionMode::RecencyBias { .. }) {
                    continue;
                }
                if let Some(target) = master
                    .iter_mut()
                    .find(|target| target.name == relationship.entity)
                    && target.recent_window.is_none()
                {
                    target.recent_window = Some(DEFAULT_RECENT_WINDOW);
                }
            }
        }

        ValidatedConfig {
            seed: config.seed,
            locale: config.locale.clone(),
            pool: PoolOptions {
                cache_records: config.pool.cache_records,
                stats: config.pool.stats,
            },
            master,
            transactional,
        }
    }

    fn resolve_path(&self, file: &str) -> PathBuf {
        let path = PathBuf::from(file);
        match self.options.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path,
        }
    }

    fn check_entity_name(&mut self, name: &str) {
        if name.is_empty() || name.contains('.') || name == "self" {
            self.report.error(
                "invalid_entity_name",
                name,
                format!("entity name '{name}' must be non-empty, not 'self' and contain no '.'"),
            );
        }
    }

    fn compile_master(
        &mut self,
        name: &str,
        raw: &MasterEntityConfig,
        exported: &HashSet<PathBuf>,
        cache_records: bool,
    ) -> EntityType {
        self.check_entity_name(name);
        let schema = self.compile_object(&raw.schema, &join(name, "schema"));

        let source = match raw.source {
            SourceKind::Faker => {
                if raw.count.is_none() {
                    self.report.push_error(ValidationIssue::new(
                        IssueSeverity::Error,
                        "count_missing",
                        join(name, "count"),
                        "generated entities require a record count",
                        Some("set count to the number of records to generate".to_string()),
                    ));
                }
                if raw.file.is_some() {
                    self.report.warning(
                        "file_ignored",
                        join(name, "file"),
                        "file is only read for csv sources",
                    );
                }
                if raw.schema_from.is_some() {
                    self.report.error(
                        "schema_from_not_csv",
                        join(name, "schema_from"),
                        "schema_from only applies to csv sources",
                    );
                }
                if schema.is_empty() {
                    self.report.error(
                        "schema_empty",
                        join(name, "schema"),
                        "generated entities need at least one field",
                    );
                }
                Source::Generated
            }
            SourceKind::Csv => {
                let delimiter = self
                    .parse_delimiter(raw.delimiter.as_deref(), &join(name, "delimiter"))
                    .unwrap_or(b',');
                match &raw.file {
                    Some(file) => {
                        let file = self.resolve_path(file);
                        if !file.exists() && !exported.contains(&file) {
                            self.report.push_error(ValidationIssue::new(
                                IssueSeverity::Error,
                                "csv_file_missing",
                                join(name, "file"),
                                format!("csv file '{}' does not exist", file.display()),
                                Some(
                                    "point file at an existing csv or at another entity's csv_export"
                                        .to_string(),
                                ),
                            ));
                        }
                        Source::CsvImport { file, delimiter }
                    }
                    None => {
                        self.report.error(
                            "file_missing",
                            join(name, "file"),
                            "csv sources require a file",
                        );
                        Source::CsvImport {
                            file: PathBuf::new(),
                            delimiter,
                        }
                    }
                }
            }
        };

        let id_field = self
            .parse_field_path(&raw.id_field, &join(name, "id_field"))
            .unwrap_or_else(|| FieldPath::field(DEFAULT_ID_FIELD));
        let key_field = raw
            .key_field
            .as_deref()
            .and_then(|key| self.parse_field_path(key, &join(name, "key_field")));

        let topic = raw.kafka_topic.clone();
        let bulk_load = raw.bulk_load.unwrap_or(topic.is_some());
        if bulk_load && topic.is_none() {
            self.report.error(
                "bulk_load_without_topic",
                join(name, "bulk_load"),
                "bulk_load requires kafka_topic",
            );
        }

        let csv_export = match (&raw.csv_export, &source) {
            (Some(_), Source::CsvImport { .. }) => {
                self.report.warning(
                    "csv_export_ignored",
                    join(name, "csv_export"),
                    "csv-sourced entities are never exported",
                );
                None
            }
            (Some(export), Source::Generated) => {
                let options = export.options();
                let delimiter = self
                    .parse_delimiter(
                        Some(options.delimiter.as_str()),
                        &join(name, "csv_export.delimiter"),
                    )
                    .unwrap_or(b',');
                Some(CsvExportSpec {
                    path: self.resolve_path(&options.file),
                    delimiter,
                    include_headers: options.include_headers,
                    flatten_objects: options.flatten_objects,
                })
            }
            (None, _) => None,
        };

        let index_fields = raw
            .index_fields
            .iter()
            .enumerate()
            .filter_map(|(idx, field)| {
                self.parse_field_path(field, &format!("{name}.index_fields.{idx}"))
            })
            .collect::<Vec<_>>();
        if !index_fields.is_empty() && !cache_records {
            self.report.error(
                "index_requires_cache",
                join(name, "index_fields"),
                "secondary indexes are built from cached records; enable pool.cache_records",
            );
        }

        if raw.recent_window == Some(0) {
            self.report.error(
                "recent_window_zero",
                join(name, "recent_window"),
                "recent_window must be greater than zero",
            );
        }

        EntityType {
            name: name.to_string(),
            source,
            count: raw.count.unwrap_or_default(),
            schema,
            id_field,
            key_field,
            topic,
            bulk_load,
            csv_export,
            index_fields,
            recent_window: raw.recent_window,
            key_only_fields: raw.key_only_fields.clone(),
        }
    }

    fn resolve_schema_from(&mut self, config: &GeneratorConfig, master: &mut [EntityType]) {
        for (idx, (name, raw)) in config.master_data.iter().enumerate() {
            let Some(from) = &raw.schema_from else {
                continue;
            };
            if raw.source != SourceKind::Csv {
                continue;
            }
            let path = join(name, "schema_from");
            if !master[idx].schema.is_empty() {
                self.report
                    .error("schema_conflict", path, "set either schema or schema_from");
                continue;
            }
            match master.iter().find(|entity| entity.name == *from) {
                Some(source) if !source.schema.is_empty() => {
                    master[idx].schema = source.schema.clone();
                }
                Some(_) => self.report.error(
                    "schema_from_empty",
                    path,
                    format!("master entity '{from}' declares no schema"),
                ),
                None => self.report.error(
                    "unknown_entity",
                    path,
                    format!("master entity '{from}' does not exist"),
                ),
            }
        }
    }

    /// Checks that depend on the final schema of a master entity.
    fn check_master_fields(&mut self, entity: &EntityType) {
        let name = entity.name.as_str();
        let schema = &entity.schema;
        let typed = !schema.is_empty();

        if typed && !schema.declares(&entity.id_field) {
            self.report.error(
                "id_field_not_declared",
                join(name, "id_field"),
                format!("id field '{}' is not declared in the schema", entity.id_field),
            );
        }
        if let Some(key) = &entity.key_field
            && typed
            && !schema.declares(key)
        {
            self.report.error(
                "key_field_not_declared",
                join(name, "key_field"),
                format!("key field '{key}' is not declared in the schema"),
            );
        }
        for (idx, field) in entity.index_fields.iter().enumerate() {
            if typed && !schema.declares(field) {
                self.report.error(
                    "index_field_not_declared",
                    format!("{name}.index_fields.{idx}"),
                    format!("index field '{field}' is not declared in the schema"),
                );
            }
        }
        for (idx, field) in entity.key_only_fields.iter().enumerate() {
            if typed && schema.field(field).is_none() {
                self.report.error(
                    "key_only_field_not_declared",
                    format!("{name}.key_only_fields.{idx}"),
                    format!("key-only field '{field}' is not a top-level schema field"),
                );
            }
        }

        let mut uses = Vec::new();
        for (field, spec) in &schema.fields {
            collect_uses(spec, &format!("{name}.schema.{field}"), &mut uses);
        }
        for usage in uses {
            match usage.target {
                UseTarget::Field(path) => {
                    if !schema.declares(&path) {
                        self.report.error(
                            "dangling_reference",
                            usage.path,
                            format!("field '{path}' is not declared in '{name}'"),
                        );
                    }
                }
                UseTarget::Entity { entity, .. } => self.report.push_error(ValidationIssue::new(
                    IssueSeverity::Error,
                    "invalid_reference_scope",
                    usage.path,
                    format!("master data cannot reference entity '{entity}'"),
                    Some("master data may only reference self.<field>".to_string()),
                )),
            }
        }
        self.check_evaluation_order(name, &[("schema", schema)], Vec::new());
    }

    /// Reject `self.*` reads of fields that are only built later.
    ///
    /// Fields are built in declaration order, `schema` before
    /// `derived_fields`; `built` holds the fields set before either.
    fn check_evaluation_order(
        &mut self,
        name: &str,
        sections: &[(&str, &ObjectSpec)],
        mut built: Vec<FieldPath>,
    ) {
        let declared = |path: &FieldPath| sections.iter().any(|(_, object)| object.declares(path));
        let mut late = Vec::new();
        let mut visit = |usage: &FieldUse, built: &[FieldPath]| {
            if let UseTarget::Field(target) = &usage.target
                && declared(target)
                && !built
                    .iter()
                    .any(|done| target.segments().starts_with(done.segments()))
            {
                late.push((usage.path.clone(), target.clone()));
            }
        };
        for (section, object) in sections {
            let path = format!("{name}.{section}");
            walk_build_order(object, None, &path, &mut built, &mut visit);
        }
        for (path, target) in late {
            self.report.push_error(ValidationIssue::new(
                IssueSeverity::Error,
                "forward_reference",
                path,
                format!("field '{target}' is not built yet when this field is evaluated"),
                Some("declare the referenced field earlier".to_string()),
            ));
        }
    }

    fn compile_transactional(
        &mut self,
        name: &str,
        raw: &TransactionalEntityConfig,
        master: &[EntityType],
        cache_records: bool,
    ) -> TransactionalEntity {
        self.check_entity_name(name);

        let mut relationships = Vec::with_capacity(raw.relationships.len());
        for (field, relationship) in raw.relationships.iter() {
            let path = format!("{name}.relationships.{field}");
            if let Some(spec) =
                self.compile_relationship(field, relationship, &path, master, cache_records)
            {
                if relationships
                    .iter()
                    .any(|existing: &RelationshipSpec| existing.entity == spec.entity)
                {
                    self.report.warning(
                        "shared_relationship_entity",
                        &path,
                        format!(
                            "several relationships target '{}'; entity references see the last one",
                            spec.entity
                        ),
                    );
                }
                relationships.push(spec);
            }
        }

        let schema = self.compile_object(&raw.schema, &join(name, "schema"));
        let derived_fields = self.compile_object(&raw.derived_fields, &join(name, "derived_fields"));

        for relationship in &relationships {
            if schema.field(&relationship.field).is_some()
                || derived_fields.field(&relationship.field).is_some()
            {
                self.report.error(
                    "duplicate_field",
                    format!("{name}.relationships.{}", relationship.field),
                    format!("field '{}' is declared more than once", relationship.field),
                );
            }
        }
        for (field, _) in &derived_fields.fields {
            if schema.field(field).is_some() {
                self.report.error(
                    "duplicate_field",
                    format!("{name}.derived_fields.{field}"),
                    format!("field '{field}' is declared in both schema and derived_fields"),
                );
            }
        }

        let declares = |path: &FieldPath| {
            (path.len() == 1
                && relationships
                    .iter()
                    .any(|relationship| relationship.field == path.root()))
                || schema.declares(path)
                || derived_fields.declares(path)
        };

        let mut uses = Vec::new();
        for (field, spec) in &schema.fields {
            collect_uses(spec, &format!("{name}.schema.{field}"), &mut uses);
        }
        for (field, spec) in &derived_fields.fields {
            collect_uses(spec, &format!("{name}.derived_fields.{field}"), &mut uses);
        }
        for usage in uses {
            match usage.target {
                UseTarget::Field(path) => {
                    if !declares(&path) {
                        self.report.error(
                            "dangling_reference",
                            usage.path,
                            format!("field '{path}' is not declared in '{name}'"),
                        );
                    }
                }
                UseTarget::Entity { entity, path } => {
                    if !relationships
                        .iter()
                        .any(|relationship| relationship.entity == entity)
                    {
                        self.report.push_error(ValidationIssue::new(
                            IssueSeverity::Error,
                            "dangling_reference",
                            usage.path,
                            format!("entity '{entity}' is not a relationship target of '{name}'"),
                            Some("declare a relationship to the entity first".to_string()),
                        ));
                        continue;
                    };
                    let Some(target) = master.iter().find(|target| target.name == entity) else {
                        continue;
                    };
                    if !target.schema.is_empty() && !target.schema.declares(&path) {
                        self.report.error(
                            "dangling_reference",
                            usage.path,
                            format!("field '{path}' is not declared in '{entity}'"),
                        );
                    } else if !cache_records && path != target.id_field {
                        self.report.error(
                            "reference_requires_cache",
                            usage.path,
                            format!(
                                "'{entity}.{path}' needs cached records; enable pool.cache_records"
                            ),
                        );
                    }
                }
            }
        }

        self.check_evaluation_order(
            name,
            &[("schema", &schema), ("derived_fields", &derived_fields)],
            relationships
                .iter()
                .map(|relationship| FieldPath::field(&relationship.field))
                .collect(),
        );

        let key_field = raw.key_field.as_deref().and_then(|key| {
            let path = self.parse_field_path(key, &join(name, "key_field"))?;
            if !declares(&path) {
                self.report.error(
                    "key_field_not_declared",
                    join(name, "key_field"),
                    format!("key field '{path}' is not declared"),
                );
            }
            Some(path)
        });

        for (idx, field) in raw.key_only_fields.iter().enumerate() {
            let declared = relationships.iter().any(|rel| rel.field == *field)
                || schema.field(field).is_some()
                || derived_fields.field(field).is_some();
            if !declared {
                self.report.error(
                    "key_only_field_not_declared",
                    format!("{name}.key_only_fields.{idx}"),
                    format!("key-only field '{field}' is not a top-level field"),
                );
            }
        }

        if let Some(rate) = raw.rate_per_second
            && !(rate.is_finite() && rate > 0.0)
        {
            self.report.error(
                "invalid_rate",
                join(name, "rate_per_second"),
                "rate_per_second must be a positive number",
            );
        }

        if relationships.is_empty() && schema.is_empty() && derived_fields.is_empty() {
            self.report.warning(
                "empty_entity",
                name,
                "entity declares no fields; records will be empty",
            );
        }

        TransactionalEntity {
            name: name.to_string(),
            topic: raw.kafka_topic.clone().unwrap_or_else(|| name.to_string()),
            key_field,
            relationships,
            schema,
            derived_fields,
            rate_per_second: raw.rate_per_second,
            max_messages: raw.max_messages,
            key_only_fields: raw.key_only_fields.clone(),
        }
    }

    fn compile_relationship(
        &mut self,
        field: &str,
        raw: &RelationshipConfig,
        path: &str,
        master: &[EntityType],
        cache_records: bool,
    ) -> Option<RelationshipSpec> {
        if field.is_empty() || field.contains('.') {
            self.report.error(
                "invalid_field_name",
                path,
                format!("relationship field '{field}' must be non-empty and contain no '.'"),
            );
        }
        if !(0.0..=100.0).contains(&raw.percentage) {
            self.report.error(
                "percentage_out_of_range",
                join(path, "percentage"),
                format!("percentage {} must be within [0, 100]", raw.percentage),
            );
        }

        let mode = match raw.strategy {
            RelationshipStrategy::Uniform | RelationshipStrategy::Percentage => {
                SelectionMode::Uniform
            }
            RelationshipStrategy::Zipf => {
                let alpha = raw.alpha.unwrap_or(DEFAULT_ZIPF_ALPHA);
                if !(alpha.is_finite() && alpha > 0.0) {
                    self.report.error(
                        "invalid_alpha",
                        join(path, "alpha"),
                        format!("zipf alpha {alpha} must be greater than zero"),
                    );
                }
                SelectionMode::Zipf { alpha }
            }
            RelationshipStrategy::RecencyBias => {
                let max_delay_minutes = raw.max_delay_minutes.unwrap_or(DEFAULT_MAX_DELAY_MINUTES);
                if max_delay_minutes == 0 {
                    self.report.error(
                        "invalid_max_delay",
                        join(path, "max_delay_minutes"),
                        "max_delay_minutes must be greater than zero",
                    );
                }
                SelectionMode::RecencyBias { max_delay_minutes }
            }
        };

        let source_path = join(path, "source");
        let source = self.parse_field_path(&raw.source, &source_path)?;
        let entity = source.root().to_string();
        let Some(target) = master.iter().find(|target| target.name == entity) else {
            self.report.push_error(ValidationIssue::new(
                IssueSeverity::Error,
                "unknown_relationship_entity",
                source_path,
                format!("master entity '{entity}' does not exist"),
                Some("relationship sources take the form <master entity>.<field>".to_string()),
            ));
            return None;
        };
        let field_path = source.tail().unwrap_or_else(|| target.id_field.clone());
        if !target.schema.is_empty() && !target.schema.declares(&field_path) {
            self.report.error(
                "dangling_reference",
                &source_path,
                format!("field '{field_path}' is not declared in '{entity}'"),
            );
        } else if !cache_records && field_path != target.id_field {
            self.report.error(
                "reference_requires_cache",
                &source_path,
                format!("'{entity}.{field_path}' needs cached records; enable pool.cache_records"),
            );
        }

        Some(RelationshipSpec {
            field: field.to_string(),
            entity,
            path: field_path,
            mode,
            percentage: raw.percentage,
        })
    }

    fn parse_field_path(&mut self, raw: &str, path: &str) -> Option<FieldPath> {
        match FieldPath::parse(raw) {
            Ok(parsed) => Some(parsed),
            Err(err) => {
                self.report.error("invalid_field_path", path, err.to_string());
                None
            }
        }
    }

    fn parse_delimiter(&mut self, raw: Option<&str>, path: &str) -> Option<u8> {
        let raw = raw.unwrap_or(",");
        let mut chars = raw.chars();
        match (chars.next(), chars.next()) {
            (Some(ch), None) if ch.is_ascii() => Some(ch as u8),
            _ => {
                self.report.error(
                    "invalid_delimiter",
                    path,
                    format!("delimiter '{raw}' must be a single ASCII character"),
                );
                None
            }
        }
    }

    fn compile_object(&mut self, fields: &Map<String, Json>, path: &str) -> ObjectSpec {
        let mut object = ObjectSpec::default();
        for (name, raw) in fields {
            let field_path = join(path, name);
            if name.is_empty() || name.contains('.') {
                self.report.error(
                    "invalid_field_name",
                    &field_path,
                    format!("field name '{name}' must be non-empty and contain no '.'"),
                );
                continue;
            }
            if let Some(spec) = self.compile_spec(raw, &field_path) {
                object.fields.push((name.clone(), spec));
            }
        }
        object
    }

    fn compile_spec(&mut self, raw: &Json, path: &str) -> Option<ValueSpec> {
        let Some(object) = raw.as_object() else {
            self.report.error(
                "invalid_spec",
                path,
                format!("field spec must be an object, got {raw}"),
            );
            return None;
        };
        let Some(kind) = object.get("type") else {
            return Some(ValueSpec::Object(self.compile_object(object, path)));
        };
        let Some(kind) = kind.as_str() else {
            self.report
                .error("invalid_spec", join(path, "type"), "spec type must be a string");
            return None;
        };

        match kind {
            "format" => {
                self.check_keys(object, &["pattern"], path);
                let pattern = self.required_str(object, "pattern", path)?;
                let parts = self.parse_format(pattern, &join(path, "pattern"))?;
                Some(ValueSpec::Format(FormatSpec {
                    pattern: pattern.to_string(),
                    parts,
                }))
            }
            "faker" => {
                self.check_keys(object, &["method", "params"], path);
                let method = self.required_str(object, "method", path)?.to_string();
                let params = match object.get("params") {
                    None | Some(Json::Null) => Map::new(),
                    Some(Json::Object(params)) => params.clone(),
                    Some(_) => {
                        self.report.error(
                            "invalid_spec",
                            join(path, "params"),
                            "faker params must be an object",
                        );
                        return None;
                    }
                };
                if let Some(faker) = self.options.faker
                    && !check_faker_call(&mut self.report, faker, &method, &params, path)
                {
                    return None;
                }
                Some(ValueSpec::Faker(FakerCall { method, params }))
            }
            "uuid" => {
                self.check_keys(object, &[], path);
                Some(ValueSpec::Uuid)
            }
            "int_range" | "random_int" => {
                self.check_keys(object, &["min", "max"], path);
                let min = self.required_i64(object, "min", path)?;
                let max = self.required_i64(object, "max", path)?;
                if min > max {
                    self.report.error(
                        "invalid_range",
                        path,
                        format!("min {min} is greater than max {max}"),
                    );
                    return None;
                }
                Some(ValueSpec::IntRange { min, max })
            }
            "float_range" | "random_float" => {
                self.check_keys(object, &["min", "max", "decimals"], path);
                let min = self.required_f64(object, "min", path)?;
                let max = self.required_f64(object, "max", path)?;
                if min > max {
                    self.report.error(
                        "invalid_range",
                        path,
                        format!("min {min} is greater than max {max}"),
                    );
                    return None;
                }
                let decimals = match object.get("decimals") {
                    None | Some(Json::Null) => None,
                    Some(raw) => match raw.as_u64() {
                        Some(decimals) if decimals <= 15 => Some(decimals as u32),
                        _ => {
                            self.report.error(
                                "invalid_decimals",
                                join(path, "decimals"),
                                "decimals must be an integer between 0 and 15",
                            );
                            return None;
                        }
                    },
                };
                Some(ValueSpec::FloatRange { min, max, decimals })
            }
            "choice" => {
                self.check_keys(object, &["choices"], path);
                let choices = self.required_choices(object, path)?;
                Some(ValueSpec::Choice(choices))
            }
            "weighted_choice" => {
                self.check_keys(object, &["choices", "weights"], path);
                let choices = self.required_choices(object, path)?;
                let weights = self.required_weights(object, choices.len(), path)?;
                Some(ValueSpec::WeightedChoice { choices, weights })
            }
            "timestamp_millis" => {
                self.check_keys(
                    object,
                    &["relative_to_reference", "offset_minutes", "fallback"],
                    path,
                );
                self.compile_timestamp(object, path)
                    .map(ValueSpec::TimestampMillis)
            }
            "conditional" => {
                self.check_keys(
                    object,
                    &["condition_field", "condition_value", "when_true", "when_false"],
                    path,
                );
                let raw_field = self.required_str(object, "condition_field", path)?;
                let raw_field = raw_field.strip_prefix("self.").unwrap_or(raw_field);
                let field = self.parse_field_path(raw_field, &join(path, "condition_field"))?;
                let value = match object.get("condition_value") {
                    None | Some(Json::Null) => None,
                    Some(raw) => Some(Value::from_json(raw)),
                };
                let when_true = self.optional_branch(object, "when_true", path);
                let when_false = self.optional_branch(object, "when_false", path);
                if when_true.is_none() && when_false.is_none() {
                    self.report.warning(
                        "conditional_without_branches",
                        path,
                        "conditional declares no branch and always yields null",
                    );
                }
                Some(ValueSpec::Conditional(Box::new(ConditionalSpec {
                    field,
                    value,
                    when_true,
                    when_false,
                })))
            }
            "template" => {
                self.check_keys(object, &["pattern", "fields"], path);
                self.compile_template(object, path).map(ValueSpec::Template)
            }
            "reference" => {
                self.check_keys(object, &["source"], path);
                let source = self.required_str(object, "source", path)?;
                self.parse_reference(source, &join(path, "source"))
                    .map(ValueSpec::Reference)
            }
            "random_boolean" => {
                self.check_keys(object, &["probability"], path);
                let probability = match object.get("probability") {
                    None => 0.5,
                    Some(raw) => match raw.as_f64() {
                        Some(probability) => probability,
                        None => {
                            self.report.error(
                                "invalid_probability",
                                join(path, "probability"),
                                "probability must be a number",
                            );
                            return None;
                        }
                    },
                };
                if !(0.0..=1.0).contains(&probability) {
                    self.report.error(
                        "invalid_probability",
                        join(path, "probability"),
                        format!("probability {probability} must be within [0, 1]"),
                    );
                    return None;
                }
                Some(ValueSpec::RandomBoolean { probability })
            }
            "object" => {
                self.check_keys(object, &["fields"], path);
                match object.get("fields") {
                    Some(Json::Object(fields)) => {
                        Some(ValueSpec::Object(self.compile_object(fields, path)))
                    }
                    _ => {
                        self.report.error(
                            "missing_key",
                            join(path, "fields"),
                            "object specs require a 'fields' object",
                        );
                        None
                    }
                }
            }
            other => {
                self.report.push_error(ValidationIssue::new(
                    IssueSeverity::Error,
                    "unknown_spec_type",
                    join(path, "type"),
                    format!("unknown spec type '{other}'"),
                    Some(
                        "expected one of format, faker, uuid, int_range, float_range, choice, \
                         weighted_choice, timestamp_millis, conditional, template, reference, \
                         random_boolean, object"
                            .to_string(),
                    ),
                ));
                None
            }
        }
    }

    fn check_keys(&mut self, object: &Map<String, Json>, allowed: &[&str], path: &str) {
        for key in object.keys() {
            if key != "type" && !allowed.contains(&key.as_str()) {
                self.report.warning(
                    "unknown_spec_key",
                    join(path, key),
                    format!("key '{key}' is ignored"),
                );
            }
        }
    }

    fn missing(&mut self, key: &str, path: &str, expected: &str) {
        self.report.error(
            "missing_key",
            join(path, key),
            format!("'{key}' is required and must be {expected}"),
        );
    }

    fn required_str<'o>(
        &mut self,
        object: &'o Map<String, Json>,
        key: &str,
        path: &str,
    ) -> Option<&'o str> {
        let found = object.get(key).and_then(Json::as_str);
        if found.is_none() {
            self.missing(key, path, "a string");
        }
        found
    }

    fn required_i64(&mut self, object: &Map<String, Json>, key: &str, path: &str) -> Option<i64> {
        let found = object.get(key).and_then(Json::as_i64);
        if found.is_none() {
            self.missing(key, path, "an integer");
        }
        found
    }

    fn required_f64(&mut self, object: &Map<String, Json>, key: &str, path: &str) -> Option<f64> {
        let found = object
            .get(key)
            .and_then(Json::as_f64)
            .filter(|value| value.is_finite());
        if found.is_none() {
            self.missing(key, path, "a number");
        }
        found
    }

    fn required_choices(&mut self, object: &Map<String, Json>, path: &str) -> Option<Vec<Value>> {
        let Some(choices) = object.get("choices").and_then(Json::as_array) else {
            self.missing("choices", path, "a list");
            return None;
        };
        if choices.is_empty() {
            self.report.error(
                "empty_choices",
                join(path, "choices"),
                "choices must not be empty",
            );
            return None;
        }
        Some(choices.iter().map(Value::from_json).collect())
    }

    fn required_weights(
        &mut self,
        object: &Map<String, Json>,
        expected: usize,
        path: &str,
    ) -> Option<Vec<f64>> {
        let weights_path = join(path, "weights");
        let Some(raw) = object.get("weights").and_then(Json::as_array) else {
            self.missing("weights", path, "a list of numbers");
            return None;
        };
        if raw.len() != expected {
            self.report.push_error(ValidationIssue::new(
                IssueSeverity::Error,
                "weight_count_mismatch",
                weights_path,
                format!("{} weights for {expected} choices", raw.len()),
                Some("declare exactly one weight per choice".to_string()),
            ));
            return None;
        }
        let mut weights = Vec::with_capacity(raw.len());
        for (idx, weight) in raw.iter().enumerate() {
            match weight.as_f64() {
                Some(weight) if weight.is_finite() && weight >= 0.0 => weights.push(weight),
                _ => {
                    self.report.error(
                        "invalid_weight",
                        format!("{weights_path}.{idx}"),
                        "weights must be non-negative numbers",
                    );
                    return None;
                }
            }
        }
        if weights.iter().sum::<f64>() <= 0.0 {
            self.report
                .error("zero_weights", weights_path, "at least one weight must be positive");
            return None;
        }
        Some(weights)
    }

    fn optional_branch(
        &mut self,
        object: &Map<String, Json>,
        key: &str,
        path: &str,
    ) -> Option<ValueSpec> {
        match object.get(key) {
            None | Some(Json::Null) => None,
            Some(raw) => self.compile_spec(raw, &join(path, key)),
        }
    }

    fn compile_timestamp(&mut self, object: &Map<String, Json>, path: &str) -> Option<TimestampSpec> {
        let relative_to = match object.get("relative_to_reference") {
            None | Some(Json::Null) => None,
            Some(Json::String(source)) => {
                Some(self.parse_reference(source, &join(path, "relative_to_reference"))?)
            }
            Some(_) => {
                self.report.error(
                    "invalid_spec",
                    join(path, "relative_to_reference"),
                    "relative_to_reference must be a string",
                );
                return None;
            }
        };

        let offset_minutes = match object.get("offset_minutes") {
            None | Some(Json::Null) => (0, 0),
            Some(Json::Object(range)) => {
                let offset_path = join(path, "offset_minutes");
                let min = self.required_i64(range, "min", &offset_path)?;
                let max = self.required_i64(range, "max", &offset_path)?;
                if min > max {
                    self.report.error(
                        "invalid_range",
                        offset_path,
                        format!("min {min} is greater than max {max}"),
                    );
                    return None;
                }
                (min, max)
            }
            Some(_) => {
                self.report.error(
                    "invalid_spec",
                    join(path, "offset_minutes"),
                    "offset_minutes must be an object with min and max",
                );
                return None;
            }
        };
        if relative_to.is_none() && offset_minutes != (0, 0) {
            self.report.warning(
                "offset_without_anchor",
                join(path, "offset_minutes"),
                "offsets apply to the current time when no reference is set",
            );
        }

        let fallback = match object.get("fallback").and_then(Json::as_str) {
            None | Some("now") => TimestampFallback::Now,
            Some("null") => TimestampFallback::Null,
            Some(other) => {
                self.report.error(
                    "invalid_fallback",
                    join(path, "fallback"),
                    format!("fallback '{other}' must be 'now' or 'null'"),
                );
                return None;
            }
        };

        Some(TimestampSpec {
            relative_to,
            offset_minutes,
            fallback,
        })
    }

    fn compile_template(&mut self, object: &Map<String, Json>, path: &str) -> Option<TemplateSpec> {
        let pattern = self.required_str(object, "pattern", path)?;
        let pattern_path = join(path, "pattern");
        let pieces = match split_placeholders(pattern) {
            Ok(pieces) => pieces,
            Err(message) => {
                self.report.error("invalid_template", pattern_path, message);
                return None;
            }
        };

        let empty = Map::new();
        let raw_fields = match object.get("fields") {
            None | Some(Json::Null) => &empty,
            Some(Json::Object(fields)) => fields,
            Some(_) => {
                self.report.error(
                    "invalid_spec",
                    join(path, "fields"),
                    "template fields must be an object",
                );
                return None;
            }
        };
        let fields_path = join(path, "fields");
        let compiled = self.compile_object(raw_fields, &fields_path);

        for (name, spec) in &compiled.fields {
            let mut uses = Vec::new();
            collect_uses(spec, &join(&fields_path, name), &mut uses);
            for usage in uses {
                if let UseTarget::Field(target) = &usage.target
                    && target.root() != name.as_str()
                    && compiled.field(target.root()).is_some()
                {
                    self.report.error(
                        "template_sibling_reference",
                        usage.path,
                        format!("template field '{name}' cannot depend on sibling '{target}'"),
                    );
                }
            }
        }

        let mut parts = Vec::with_capacity(pieces.len());
        let mut used = HashSet::new();
        for piece in pieces {
            match piece {
                Piece::Literal(text) => parts.push(TemplatePart::Literal(text)),
                Piece::Placeholder(name) => {
                    if compiled.field(&name).is_none() && !raw_fields.contains_key(&name) {
                        self.report.error(
                            "unknown_placeholder",
                            &pattern_path,
                            format!("placeholder '{{{name}}}' has no field spec"),
                        );
                    }
                    used.insert(name.clone());
                    parts.push(TemplatePart::Field(name));
                }
            }
        }
        for (name, _) in &compiled.fields {
            if !used.contains(name) {
                self.report.warning(
                    "unused_template_field",
                    join(&fields_path, name),
                    format!("template field '{name}' is never substituted"),
                );
            }
        }

        Some(TemplateSpec {
            pattern: pattern.to_string(),
            parts,
            fields: compiled.fields,
        })
    }

    fn parse_format(&mut self, pattern: &str, path: &str) -> Option<Vec<FormatPart>> {
        let pieces = match split_placeholders(pattern) {
            Ok(pieces) => pieces,
            Err(message) => {
                self.report.error("invalid_format", path, message);
                return None;
            }
        };
        let mut parts = Vec::with_capacity(pieces.len());
        for piece in pieces {
            match piece {
                Piece::Literal(text) => parts.push(FormatPart::Literal(text)),
                Piece::Placeholder(token) => match parse_format_token(&token) {
                    Some(part) => parts.push(part),
                    None => {
                        self.report.push_error(ValidationIssue::new(
                            IssueSeverity::Error,
                            "unknown_format_token",
                            path,
                            format!("unknown format token '{{{token}}}'"),
                            Some(
                                "supported tokens: {seq}, {seq:06d}, {random_digits:N}, \
                                 {random_letters:N}"
                                    .to_string(),
                            ),
                        ));
                        return None;
                    }
                },
            }
        }
        Some(parts)
    }

    fn parse_reference(&mut self, source: &str, path: &str) -> Option<ReferenceSpec> {
        let parsed = self.parse_field_path(source, path)?;
        let Some(tail) = parsed.tail() else {
            self.report.error(
                "invalid_reference",
                path,
                format!("reference '{source}' must be self.<field> or <entity>.<field>"),
            );
            return None;
        };
        if parsed.root() == "self" {
            Some(ReferenceSpec::SelfField(tail))
        } else {
            Some(ReferenceSpec::Entity {
                entity: parsed.root().to_string(),
                path: tail,
            })
        }
    }
}

fn parse_format_token(token: &str) -> Option<FormatPart> {
    if token == "seq" {
        return Some(FormatPart::Seq { width: None });
    }
    if let Some(spec) = token.strip_prefix("seq:") {
        let width = spec.strip_suffix('d')?;
        let width = width.strip_prefix('0').unwrap_or(width);
        return width
            .parse()
            .ok()
            .map(|width| FormatPart::Seq { width: Some(width) });
    }
    if let Some(count) = token.strip_prefix("random_digits:") {
        return count.parse().ok().map(FormatPart::RandomDigits);
    }
    if let Some(count) = token.strip_prefix("random_letters:") {
        return count.parse().ok().map(FormatPart::RandomLetters);
    }
    None
}

enum Piece {
    Literal(String),
    Placeholder(String),
}

/// Split `a{b}c` into literal and placeholder pieces.
fn split_placeholders(pattern: &str) -> Result<Vec<Piece>, String> {
    let mut pieces = Vec::new();
    let mut literal = String::new();
    let mut chars = pattern.char_indices();
    while let Some((start, ch)) = chars.next() {
        match ch {
            '{' => {
                let mut name = String::new();
                let mut closed = false;
                for (_, inner) in chars.by_ref() {
                    match inner {
                        '}' => {
                            closed = true;
                            break;
                        }
                        '{' => return Err(format!("nested '{{' at offset {start}")),
                        other => name.push(other),
                    }
                }
                if !closed {
                    return Err(format!("unclosed '{{' at offset {start}"));
                }
                if name.is_empty() {
                    return Err(format!("empty placeholder at offset {start}"));
                }
                if !literal.is_empty() {
                    pieces.push(Piece::Literal(std::mem::take(&mut literal)));
                }
                pieces.push(Piece::Placeholder(name));
            }
            '}' => return Err(format!("unmatched '}}' at offset {start}")),
            other => literal.push(other),
        }
    }
    if !literal.is_empty() {
        pieces.push(Piece::Literal(literal));
    }
    Ok(pieces)
}

struct FieldUse {
    path: String,
    target: UseTarget,
}

enum UseTarget {
    /// A field of the record under construction.
    Field(FieldPath),
    Entity { entity: String, path: FieldPath },
}

fn collect_uses(spec: &ValueSpec, path: &str, out: &mut Vec<FieldUse>) {
    match spec {
        ValueSpec::Reference(reference) => push_reference(reference, join(path, "source"), out),
        ValueSpec::TimestampMillis(timestamp) => {
            if let Some(reference) = &timestamp.relative_to {
                push_reference(reference, join(path, "relative_to_reference"), out);
            }
        }
        ValueSpec::Conditional(conditional) => {
            out.push(FieldUse {
                path: join(path, "condition_field"),
                target: UseTarget::Field(conditional.field.clone()),
            });
            if let Some(branch) = &conditional.when_true {
                collect_uses(branch, &join(path, "when_true"), out);
            }
            if let Some(branch) = &conditional.when_false {
                collect_uses(branch, &join(path, "when_false"), out);
            }
        }
        ValueSpec::Template(template) => {
            for (name, sub) in &template.fields {
                collect_uses(sub, &format!("{path}.fields.{name}"), out);
            }
        }
        ValueSpec::Object(object) => {
            for (name, sub) in &object.fields {
                collect_uses(sub, &join(path, name), out);
            }
        }
        ValueSpec::Format(_)
        | ValueSpec::Faker(_)
        | ValueSpec::Uuid
        | ValueSpec::IntRange { .. }
        | ValueSpec::FloatRange { .. }
        | ValueSpec::Choice(_)
        | ValueSpec::WeightedChoice { .. }
        | ValueSpec::RandomBoolean { .. } => {}
    }
}

/// Visit each field's uses in the order records are built, with the
/// paths already complete at that point.
fn walk_build_order(
    object: &ObjectSpec,
    prefix: Option<&FieldPath>,
    path: &str,
    built: &mut Vec<FieldPath>,
    visit: &mut dyn FnMut(&FieldUse, &[FieldPath]),
) {
    for (name, spec) in &object.fields {
        let here = match prefix {
            Some(prefix) => prefix.child(name),
            None => FieldPath::field(name),
        };
        let spec_path = join(path, name);
        if let ValueSpec::Object(child) = spec {
            walk_build_order(child, Some(&here), &spec_path, built, visit);
        } else {
            let mut uses = Vec::new();
            collect_uses(spec, &spec_path, &mut uses);
            for usage in &uses {
                visit(usage, built.as_slice());
            }
        }
        built.push(here);
    }
}

fn push_reference(reference: &ReferenceSpec, path: String, out: &mut Vec<FieldUse>) {
    let target = match reference {
        ReferenceSpec::SelfField(field) => UseTarget::Field(field.clone()),
        ReferenceSpec::Entity { entity, path } => UseTarget::Entity {
            entity: entity.clone(),
            path: path.clone(),
        },
    };
    out.push(FieldUse { path, target });
}
