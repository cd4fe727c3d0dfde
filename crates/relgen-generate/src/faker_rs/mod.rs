//! Faker backend used by `faker` field specs.

mod adapter;
mod locales;
mod params;

use rand::RngCore;
use relgen_config::FakerCatalog;
use relgen_core::Value;
use serde_json::{Map, Value as Json};

use crate::errors::GenerationError;

pub use adapter::FakeRsFaker;
pub use locales::{DEFAULT_LOCALE, LocaleKey};

/// Source of realistic human-readable values.
///
/// Implementations draw every random choice from `rng`, so a seeded run
/// reproduces the same values.
pub trait Faker: FakerCatalog + Send + Sync {
    fn call(
        &self,
        method: &str,
        params: &Map<String, Json>,
        rng: &mut dyn RngCore,
    ) -> Result<Value, GenerationError>;
}
