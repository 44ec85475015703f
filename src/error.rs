use rusqlite::ffi;
use std::fmt;
use thiserror::Error;

/// Which table constraint the engine rejected a write with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    ForeignKey,
    PrimaryKey,
    Unique,
    NotNull,
    Check,
    Other,
}

impl ConstraintKind {
    /// Classify a SQLite extended result code.
    pub fn from_extended_code(code: i32) -> Self {
        match code {
            ffi::SQLITE_CONSTRAINT_FOREIGNKEY => ConstraintKind::ForeignKey,
            ffi::SQLITE_CONSTRAINT_PRIMARYKEY | ffi::SQLITE_CONSTRAINT_ROWID => {
                ConstraintKind::PrimaryKey
            }
            ffi::SQLITE_CONSTRAINT_UNIQUE => ConstraintKind::Unique,
            ffi::SQLITE_CONSTRAINT_NOTNULL => ConstraintKind::NotNull,
            ffi::SQLITE_CONSTRAINT_CHECK => ConstraintKind::Check,
            _ => ConstraintKind::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConstraintKind::ForeignKey => "foreign key",
            ConstraintKind::PrimaryKey => "primary key",
            ConstraintKind::Unique => "unique",
            ConstraintKind::NotNull => "not null",
            ConstraintKind::Check => "check",
            ConstraintKind::Other => "constraint",
        }
    }
}

impl fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// All possible errors in the annotation store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Project #{0} not found")]
    ProjectNotFound(i64),

    #[error("Task #{0} not found")]
    TaskNotFound(i64),

    #[error("Annotation #{0} not found")]
    AnnotationNotFound(i64),

    #[error("{kind} constraint violated: {message}")]
    Constraint {
        kind: ConstraintKind,
        message: String,
    },

    #[error("Value for `{column}` is {len} characters, maximum is {max}")]
    ValueTooLong {
        column: &'static str,
        max: usize,
        len: usize,
    },

    #[error("Table `{table}` exists but is incompatible: {reason}")]
    IncompatibleSchema { table: String, reason: String },

    #[error("Store not initialized. Run `labelstore init` first.")]
    NotInitialized,

    #[error("Annotator pool cannot be empty")]
    EmptyAnnotatorPool,

    #[error("Invalid attribute: {0}")]
    InvalidAttribute(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Database error: {0}")]
    Db(rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("MCP error: {0}")]
    Mcp(String),
}

impl StoreError {
    /// Stable code used in MCP error responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            StoreError::ProjectNotFound(_) => "ProjectNotFound",
            StoreError::TaskNotFound(_) => "TaskNotFound",
            StoreError::AnnotationNotFound(_) => "AnnotationNotFound",
            StoreError::Constraint { kind, .. } => match kind {
                ConstraintKind::ForeignKey => "ForeignKeyViolation",
                ConstraintKind::PrimaryKey => "PrimaryKeyViolation",
                ConstraintKind::Unique => "UniqueViolation",
                ConstraintKind::NotNull => "NotNullViolation",
                ConstraintKind::Check => "CheckViolation",
                ConstraintKind::Other => "ConstraintViolation",
            },
            StoreError::ValueTooLong { .. } => "ValueTooLong",
            StoreError::IncompatibleSchema { .. } => "IncompatibleSchema",
            StoreError::NotInitialized => "NotInitialized",
            StoreError::EmptyAnnotatorPool => "EmptyAnnotatorPool",
            StoreError::InvalidAttribute(_) => "InvalidAttribute",
            StoreError::InvalidInput(_) => "InvalidInput",
            StoreError::Db(_) => "DatabaseError",
            StoreError::Io(_) => "IoError",
            StoreError::Json(_) => "JsonError",
            StoreError::Mcp(_) => "McpError",
        }
    }

    pub fn is_constraint(&self, expected: ConstraintKind) -> bool {
        matches!(self, StoreError::Constraint { kind, .. } if *kind == expected)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(failure, message) = &err {
            if failure.code == rusqlite::ErrorCode::ConstraintViolation {
                return StoreError::Constraint {
                    kind: ConstraintKind::from_extended_code(failure.extended_code),
                    message: message.clone().unwrap_or_else(|| failure.to_string()),
                };
            }
        }
        StoreError::Db(err)
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, StoreError>;
