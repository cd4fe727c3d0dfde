use std::path::Path;

use serde_json::Value;

use crate::errors::{ConfigError, Result};

/// Read a configuration document as JSON, whatever its on-disk format.
///
/// The format is picked from the extension: `.json`, `.yaml`/`.yml` or
/// `.toml`. Key order is kept so field specs evaluate in declaration order.
pub fn load_config_value(path: &Path) -> Result<Value> {
    let contents = std::fs::read_to_string(path)?;
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default();
    parse_config_str(&contents, &extension)
}

/// Parse a document given its format name (`json`, `yaml`, `yml`, `toml`).
pub fn parse_config_str(contents: &str, format: &str) -> Result<Value> {
    match format {
        "json" => Ok(serde_json::from_str(contents)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(contents)?),
        "toml" => Ok(toml::from_str(contents)?),
        other => Err(ConfigError::UnsupportedFormat(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yaml_and_toml_parse_to_the_same_document() {
        let yaml = "seed: 7\nmaster_data:\n  customers:\n    count: 3\n";
        let toml = "seed = 7\n[master_data.customers]\ncount = 3\n";
        let from_yaml = parse_config_str(yaml, "yaml").expect("yaml");
        let from_toml = parse_config_str(toml, "toml").expect("toml");
        assert_eq!(from_yaml, from_toml);
        assert_eq!(from_yaml["master_data"]["customers"]["count"], 3);
    }

    #[test]
    fn yaml_keeps_declaration_order() {
        let yaml = "zeta: 1\nalpha: 2\nmid: 3\n";
        let value = parse_config_str(yaml, "yml").expect("yaml");
        let keys: Vec<&String> = value.as_object().expect("object").keys().collect();
        assert_eq!(keys, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn unknown_format_is_rejected() {
        assert!(matches!(
            parse_config_str("{}", "ini"),
            Err(ConfigError::UnsupportedFormat(_))
        ));
    }
}
