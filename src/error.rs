use std::fmt;

use thiserror::Error;

/// Boxed error from the underlying document store.
pub type BackendSource = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum DriverError {
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error("Missing operation")]
    MissingOperation,

    #[error("Missing required field '{0}'")]
    MissingField(&'static str),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Missing parameter ${index}: only {provided} argument(s) supplied")]
    MissingParameter { index: usize, provided: usize },

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Invalid cursor: {0}")]
    CursorInvalid(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Backend error: {0}")]
    Backend(#[source] BackendSource),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

pub type DriverResult<T> = Result<T, DriverError>;

/// Error classification shared with upper layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    MalformedInput,
    MissingOperation,
    UnsupportedOperation,
    MissingParameter,
    TypeMismatch,
    CursorInvalid,
    Cancelled,
    BackendError,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::MalformedInput => "malformed-input",
            ErrorKind::MissingOperation => "missing-operation",
            ErrorKind::UnsupportedOperation => "unsupported-operation",
            ErrorKind::MissingParameter => "missing-parameter",
            ErrorKind::TypeMismatch => "type-mismatch",
            ErrorKind::CursorInvalid => "cursor-invalid",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::BackendError => "backend-error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl DriverError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DriverError::MalformedInput(_) | DriverError::JsonError(_) => ErrorKind::MalformedInput,
            DriverError::MissingOperation | DriverError::MissingField(_) => {
                ErrorKind::MissingOperation
            }
            DriverError::UnsupportedOperation(_) => ErrorKind::UnsupportedOperation,
            DriverError::MissingParameter { .. } => ErrorKind::MissingParameter,
            DriverError::TypeMismatch(_) => ErrorKind::TypeMismatch,
            DriverError::CursorInvalid(_) => ErrorKind::CursorInvalid,
            DriverError::Cancelled => ErrorKind::Cancelled,
            DriverError::Backend(_) => ErrorKind::BackendError,
        }
    }

    pub fn backend<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        DriverError::Backend(Box::new(err))
    }

    /// Backend failure that has no richer error type of its own.
    pub fn backend_msg(msg: impl Into<String>) -> Self {
        let msg: String = msg.into();
        DriverError::Backend(msg.into())
    }
}

#[cfg(feature = "mongodb")]
impl From<mongodb::error::Error> for DriverError {
    fn from(err: mongodb::error::Error) -> Self {
        DriverError::backend(err)
    }
}

impl serde::Serialize for DriverError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}
