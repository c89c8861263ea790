/// Error types shared by the builder, the ORM compiler and the adapters.
use std::fmt;

/// Categorized failure reported by a database adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Syntax errors (SQLSTATE class 42 - syntax_error, etc.)
    Syntax,
    /// Semantic errors (missing table/column, ambiguous reference)
    Semantic,
    /// Execution/runtime errors (division by zero, constraint violation)
    Execution,
    /// Transaction state errors (e.g., transaction aborted)
    Transaction,
    /// Connection/communication errors
    Connection,
    /// Unknown or unclassified errors
    Unknown,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Syntax => write!(f, "Syntax Error"),
            ErrorCategory::Semantic => write!(f, "Semantic Error"),
            ErrorCategory::Execution => write!(f, "Execution Error"),
            ErrorCategory::Transaction => write!(f, "Transaction Error"),
            ErrorCategory::Connection => write!(f, "Connection Error"),
            ErrorCategory::Unknown => write!(f, "Error"),
        }
    }
}

impl ErrorCategory {
    /// Categorize a SQLSTATE code.
    pub fn from_sqlstate(code: &str) -> Self {
        if code.len() < 2 {
            return ErrorCategory::Unknown;
        }
        match &code[..2] {
            // 42601 = syntax_error, everything else in class 42 is about names
            "42" if code == "42601" || code == "42000" => ErrorCategory::Syntax,
            "42" => ErrorCategory::Semantic,
            "22" | "23" | "53" | "54" | "55" | "57" => ErrorCategory::Execution,
            "25" | "40" => ErrorCategory::Transaction,
            "08" => ErrorCategory::Connection,
            _ => ErrorCategory::Unknown,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed builder input, rejected when the node is constructed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A filter, sort or projection path names an element the entity does not have.
    #[error("unknown element `{element}` in `{path}` of entity {entity}")]
    UnknownElement {
        entity: String,
        element: String,
        path: String,
    },

    /// A path segment has the wrong kind for its position.
    #[error("invalid path `{path}`: {reason}")]
    InvalidFilterPath { path: String, reason: String },

    #[error("path `{path}` exceeds the maximum relation depth of {max}")]
    PathTooDeep { path: String, max: usize },

    #[error("{dialect} does not support {feature}")]
    UnsupportedDialectFeature { dialect: String, feature: String },

    /// A lazily supplied entity type could not be resolved.
    #[error("cannot resolve entity type: {0}")]
    Resolve(String),

    #[error("{category}: {message}")]
    Database {
        category: ErrorCategory,
        message: String,
        code: Option<String>,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    pub fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidFilterPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn unsupported(dialect: impl Into<String>, feature: impl Into<String>) -> Self {
        Error::UnsupportedDialectFeature {
            dialect: dialect.into(),
            feature: feature.into(),
        }
    }

    pub fn database(category: ErrorCategory, message: impl Into<String>) -> Self {
        Error::Database {
            category,
            message: message.into(),
            code: None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
