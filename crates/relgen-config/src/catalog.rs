use relgen_core::ScalarKind;
use serde_json::{Map, Value};

/// Validation-time view of a faker backend.
///
/// Lets the validator reject unknown faker methods and bad parameters before
/// any record is generated, without depending on the backend itself.
pub trait FakerCatalog {
    fn supports(&self, method: &str) -> bool;

    /// Check call parameters; the error message ends up in the report.
    fn check_params(&self, method: &str, params: &Map<String, Value>) -> Result<(), String>;

    /// Kind of value the method produces, used to type CSV columns.
    fn output_kind(&self, _method: &str) -> Option<ScalarKind> {
        None
    }

    fn supports_locale(&self, _locale: &str) -> bool {
        true
    }
}
