use thiserror::Error;

#[derive(Error, Debug)]
pub enum FieldStoreError {
    #[error("A collection named '{0}' already exists")]
    DuplicateCollection(String),

    #[error("Collection '{0}' does not exist")]
    UnknownCollection(String),

    #[error("Invalid field in collection '{collection}': {message}")]
    InvalidField { collection: String, message: String },

    #[error("Unsupported field type: {0}")]
    UnsupportedType(String),

    #[error("Filter syntax error at offset {offset}: expected {expected}")]
    FilterSyntax { offset: usize, expected: String },

    #[error("Unknown field '{field}' in collection '{collection}'")]
    UnknownField { collection: String, field: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Uniqueness violation in collection '{collection}': {message}")]
    UniquenessViolation { collection: String, message: String },

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<rusqlite::Error> for FieldStoreError {
    fn from(e: rusqlite::Error) -> Self {
        FieldStoreError::Backend(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, FieldStoreError>;
