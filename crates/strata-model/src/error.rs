/// Errors from record and value construction.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ModelError {
    /// Property names may not contain `.` or `/`.
    #[error("invalid property name {name:?}: {reason}")]
    InvalidPropertyName { name: String, reason: String },
}

/// Result alias for model operations.
pub type ModelResult<T> = Result<T, ModelError>;
