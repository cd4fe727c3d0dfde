use std::fmt;

use crate::error::{Error, Result};

/// Dotted path into a nested record, e.g. `full.Vehicle.cLicenseNrCleaned`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldPath {
    segments: Vec<String>,
}

impl FieldPath {
    /// Parse a dotted path. Empty paths and empty segments are rejected.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(Error::InvalidPath(raw.to_string()));
        }
        let segments: Vec<String> = raw.split('.').map(|s| s.to_string()).collect();
        if segments.iter().any(|segment| segment.is_empty()) {
            return Err(Error::InvalidPath(raw.to_string()));
        }
        Ok(Self { segments })
    }

    pub fn from_segments(segments: Vec<String>) -> Result<Self> {
        if segments.is_empty() || segments.iter().any(|segment| segment.is_empty()) {
            return Err(Error::InvalidPath(segments.join(".")));
        }
        Ok(Self { segments })
    }

    /// Single-segment path, taken verbatim.
    pub fn field(name: &str) -> Self {
        Self {
            segments: vec![name.to_string()],
        }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn root(&self) -> &str {
        &self.segments[0]
    }

    /// Everything after the first segment, `None` for single-segment paths.
    pub fn tail(&self) -> Option<FieldPath> {
        if self.segments.len() < 2 {
            return None;
        }
        Some(Self {
            segments: self.segments[1..].to_vec(),
        })
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn child(&self, segment: &str) -> FieldPath {
        let mut segments = self.segments.clone();
        segments.push(segment.to_string());
        Self { segments }
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("."))
    }
}
