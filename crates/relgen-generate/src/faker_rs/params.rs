use serde_json::{Map, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamKind {
    Int,
    String,
}

#[derive(Clone, Copy, Debug)]
pub struct ParamSpec {
    pub key: &'static str,
    pub kind: ParamKind,
    pub required: bool,
}

impl ParamSpec {
    pub const fn new(key: &'static str, kind: ParamKind, required: bool) -> Self {
        Self {
            key,
            kind,
            required,
        }
    }
}

pub struct ParamMap<'a> {
    map: &'a Map<String, Value>,
}

/// Check keys and value kinds of faker params against `specs`.
pub fn validate_params<'a>(
    params: &'a Map<String, Value>,
    specs: &[ParamSpec],
    ctx: &str,
) -> Result<ParamMap<'a>, String> {
    for (key, value) in params {
        let Some(spec) = specs.iter().find(|spec| spec.key == key.as_str()) else {
            return Err(format!("{ctx}: unknown param '{key}'"));
        };
        let valid = match spec.kind {
            ParamKind::Int => value.as_i64().is_some(),
            ParamKind::String => value.is_string(),
        };
        if !valid {
            return Err(format!("{ctx}: invalid value for param '{key}'"));
        }
    }

    for spec in specs {
        if spec.required && !params.contains_key(spec.key) {
            return Err(format!("{ctx}: missing required param '{}'", spec.key));
        }
    }

    Ok(ParamMap { map: params })
}

impl ParamMap<'_> {
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.map.get(key).and_then(|value| value.as_i64())
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.map.get(key).and_then(|value| value.as_str())
    }

    /// Non-negative integer param, falling back to `default`.
    pub fn get_usize_or(&self, key: &str, default: usize) -> Result<usize, String> {
        match self.get_i64(key) {
            None => Ok(default),
            Some(value) => usize::try_from(value)
                .map_err(|_| format!("param '{key}' must not be negative")),
        }
    }
}
