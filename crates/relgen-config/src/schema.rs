use schemars::schema::RootSchema;
use schemars::schema_for;

use crate::model::GeneratorConfig;

/// Emit the JSON Schema of the generator configuration document.
pub fn config_json_schema() -> RootSchema {
    schema_for!(GeneratorConfig)
}
