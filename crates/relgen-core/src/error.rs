use thiserror::Error;

/// Core error type shared across relgen crates.
#[derive(Debug, Error)]
pub enum Error {
    /// A dotted field path is empty or has an empty segment.
    #[error("invalid field path: {0}")]
    InvalidPath(String),
    /// Two flattened columns disagree on whether a node is a leaf.
    #[error("path conflict at '{0}'")]
    PathConflict(String),
    /// A text cell could not be coerced to its declared scalar type.
    #[error("cannot coerce '{value}' at '{path}' to {expected}")]
    Coercion {
        path: String,
        value: String,
        expected: &'static str,
    },
}

/// Convenience alias for results returned by relgen crates.
pub type Result<T> = std::result::Result<T, Error>;
