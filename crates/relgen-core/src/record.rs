use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::error::{Error, Result};
use crate::path::FieldPath;
use crate::value::Value;

/// Insertion-ordered map of field name to value.
///
/// Fields moved to the key-only side channel stay addressable for message
/// keys but are never serialized into the payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: Vec<(String, Value)>,
    key_only: Vec<(String, Value)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            fields: Vec::with_capacity(capacity),
            key_only: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Insert or replace a field, keeping the original position on replace.
    pub fn insert(&mut self, name: impl Into<String>, value: Value) -> Option<Value> {
        let name = name.into();
        if let Some(slot) = self.fields.iter_mut().find(|(key, _)| *key == name) {
            return Some(std::mem::replace(&mut slot.1, value));
        }
        self.fields.push((name, value));
        None
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Value> {
        self.fields
            .iter_mut()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    pub fn contains_key(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        let index = self.fields.iter().position(|(key, _)| key == name)?;
        Some(self.fields.remove(index).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(key, _)| key.as_str())
    }

    /// Follow a dotted path through nested objects.
    pub fn get_path(&self, path: &FieldPath) -> Option<&Value> {
        let mut segments = path.segments().iter();
        let first = segments.next()?;
        let mut current = self.get(first)?;
        for segment in segments {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    /// Same as [`Record::get_path`], falling back to the key-only side channel.
    pub fn lookup(&self, path: &FieldPath) -> Option<&Value> {
        self.get_path(path).or_else(|| {
            if path.len() == 1 {
                self.key_only(path.root())
            } else {
                None
            }
        })
    }

    /// Set a dotted path, creating intermediate objects as needed.
    pub fn set_path(&mut self, path: &FieldPath, value: Value) -> Result<()> {
        let segments = path.segments();
        let mut current = self;
        for (depth, segment) in segments[..segments.len() - 1].iter().enumerate() {
            if !current.contains_key(segment) {
                current.insert(segment.clone(), Value::Object(Record::new()));
            }
            current = match current.get_mut(segment) {
                Some(Value::Object(child)) => child,
                _ => {
                    return Err(Error::PathConflict(segments[..=depth].join(".")));
                }
            };
        }
        let leaf = &segments[segments.len() - 1];
        if matches!(current.get(leaf), Some(Value::Object(child)) if !child.is_empty()) {
            return Err(Error::PathConflict(path.to_string()));
        }
        current.insert(leaf.clone(), value);
        Ok(())
    }

    pub fn insert_key_only(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        if let Some(slot) = self.key_only.iter_mut().find(|(key, _)| *key == name) {
            slot.1 = value;
            return;
        }
        self.key_only.push((name, value));
    }

    pub fn key_only(&self, name: &str) -> Option<&Value> {
        self.key_only
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    /// Move a payload field into the key-only side channel.
    pub fn hide(&mut self, name: &str) -> bool {
        match self.remove(name) {
            Some(value) => {
                self.insert_key_only(name, value);
                true
            }
            None => false,
        }
    }

    /// Flatten nested objects into `parent.child.leaf` columns in field order.
    ///
    /// Lists and empty objects are kept as single leaves.
    pub fn flatten(&self) -> Vec<(String, Value)> {
        let mut out = Vec::new();
        flatten_into(self, "", &mut out);
        out
    }

    /// Rebuild nested records from flattened `parent.child.leaf` columns.
    pub fn unflatten<I, K>(columns: I) -> Result<Record>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: AsRef<str>,
    {
        let mut record = Record::new();
        for (name, value) in columns {
            let path = FieldPath::parse(name.as_ref())?;
            record.set_path(&path, value)?;
        }
        Ok(record)
    }

    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::with_capacity(self.fields.len());
        for (key, value) in &self.fields {
            map.insert(key.clone(), value.to_json());
        }
        serde_json::Value::Object(map)
    }

    pub fn from_json_map(map: &serde_json::Map<String, serde_json::Value>) -> Record {
        let mut record = Record::with_capacity(map.len());
        for (key, value) in map {
            record.insert(key.clone(), Value::from_json(value));
        }
        record
    }
}

fn flatten_into(record: &Record, prefix: &str, out: &mut Vec<(String, Value)>) {
    for (key, value) in &record.fields {
        let name = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match value {
            Value::Object(child) if !child.is_empty() => flatten_into(child, &name, out),
            other => out.push((name, other.clone())),
        }
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        let mut record = Record::new();
        for (key, value) in iter {
            record.insert(key, value);
        }
        record
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (key, value) in &self.fields {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nested() -> Record {
        let mut vehicle = Record::new();
        vehicle.insert("cLicenseNrCleaned", Value::from("AB123CD"));
        vehicle.insert("axles", Value::Int(2));
        let mut full = Record::new();
        full.insert("Vehicle", Value::Object(vehicle));
        let mut record = Record::new();
        record.insert("id", Value::from("APT-000001"));
        record.insert("full", Value::Object(full));
        record
    }

    #[test]
    fn insert_replaces_in_place() {
        let mut record = Record::new();
        record.insert("a", Value::Int(1));
        record.insert("b", Value::Int(2));
        record.insert("a", Value::Int(3));
        let keys: Vec<&str> = record.keys().collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(record.get("a"), Some(&Value::Int(3)));
    }

    #[test]
    fn flatten_then_unflatten_is_identity() {
        let record = nested();
        let flat = record.flatten();
        let names: Vec<&str> = flat.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(
            names,
            vec!["id", "full.Vehicle.cLicenseNrCleaned", "full.Vehicle.axles"]
        );
        let rebuilt = Record::unflatten(flat).expect("unflatten");
        assert_eq!(rebuilt, record);
    }

    #[test]
    fn unflatten_rejects_leaf_and_branch_on_same_path() {
        let columns = vec![
            ("a".to_string(), Value::Int(1)),
            ("a.b".to_string(), Value::Int(2)),
        ];
        assert!(matches!(
            Record::unflatten(columns),
            Err(Error::PathConflict(_))
        ));
    }

    #[test]
    fn key_only_fields_are_not_serialized() {
        let mut record = nested();
        record.insert("routing", Value::from("north"));
        assert!(record.hide("routing"));
        let json = serde_json::to_value(&record).expect("serialize");
        assert!(json.get("routing").is_none());
        let path = FieldPath::parse("routing").expect("path");
        assert_eq!(record.lookup(&path), Some(&Value::from("north")));
    }
}
