//! Configuration document, loading and validation into the generation model.

pub mod catalog;
pub mod errors;
pub mod load;
pub mod model;
pub mod schema;
pub mod spec;
pub mod validate;

pub use catalog::FakerCatalog;
pub use errors::{ConfigError, IssueSeverity, Result, ValidationIssue, ValidationReport};
pub use load::{load_config_value, parse_config_str};
pub use model::{
    CsvExportConfig, CsvExportOptions, DEFAULT_ID_FIELD, GeneratorConfig, MasterEntityConfig,
    OrderedMap, PoolConfig, RelationshipConfig, RelationshipStrategy, SourceKind,
    TransactionalEntityConfig,
};
pub use schema::config_json_schema;
pub use spec::{
    ConditionalSpec, CsvExportSpec, EntityType, FakerCall, FormatPart, FormatSpec, ObjectSpec,
    PoolOptions, ReferenceSpec, RelationshipSpec, SelectionMode, Source, TemplatePart,
    TemplateSpec, TimestampFallback, TimestampSpec, TransactionalEntity, ValidatedConfig,
    ValueSpec, common_kind,
};
pub use validate::{
    CompiledConfig, DEFAULT_RECENT_WINDOW, ValidationOptions, check_faker_calls, compile_config,
    validate_config, validate_config_json, validate_config_with,
};
