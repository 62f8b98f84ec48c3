//! Error types for mosaicdb
//!
//! Every layer returns [`Error`] through the [`Result`] alias. Managers that
//! stage writes on behalf of a transaction hand back a [`Status`] instead, so
//! the coordinator can see a failed step and abort the whole transaction
//! without unwinding through the index or storage code.
//!
//! ## Taxonomy
//!
//! | variant | meaning | class |
//! |---|---|---|
//! | `NotFound` | key absent | empty result |
//! | `Conflict` | commit-time collision, retryable | 409 |
//! | `IndexMisconfigured` | query needs an index kind that is not defined | 400 |
//! | `InvalidArgument` / `InvalidOperation` | caller error | 400 |
//! | `Corrupt` / `Serialization` | bytes on disk do not decode | 500 |
//! | `StorageIo` | filesystem failure | 500 |

use std::fmt;
use std::io;
use thiserror::Error;

/// Result type alias for mosaicdb operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for mosaicdb
#[derive(Debug, Error)]
pub enum Error {
    /// Key or object does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Commit-time write/read collision with another committed transaction
    #[error("Transaction conflict on key {key} (started at {start_seq}, committed at {committed_seq})")]
    Conflict {
        /// First conflicting key
        key: String,
        /// Snapshot sequence the transaction started from
        start_seq: u64,
        /// Sequence at which the other transaction committed the key
        committed_seq: u64,
    },

    /// Query against a column lacking the required index kind
    #[error("Index misconfigured: {0}")]
    IndexMisconfigured(String),

    /// Stored bytes fail to decode or a checksum does not match
    #[error("Data corruption: {0}")]
    Corrupt(String),

    /// I/O error (file operations)
    #[error("Storage I/O error: {0}")]
    StorageIo(#[from] io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Argument rejected before touching storage
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation not allowed in the current state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// How an error surfaces at an API boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Absent key: callers render an empty result
    NotFound,
    /// Retryable collision
    Conflict,
    /// Caller mistake
    BadRequest,
    /// Server-side failure
    Internal,
}

impl ErrorClass {
    /// HTTP-equivalent status code
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorClass::NotFound => 404,
            ErrorClass::Conflict => 409,
            ErrorClass::BadRequest => 400,
            ErrorClass::Internal => 500,
        }
    }
}

impl Error {
    /// Classify the error for an upstream API layer
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::NotFound(_) => ErrorClass::NotFound,
            Error::Conflict { .. } => ErrorClass::Conflict,
            Error::IndexMisconfigured(_)
            | Error::InvalidArgument(_)
            | Error::InvalidOperation(_) => ErrorClass::BadRequest,
            Error::Corrupt(_) | Error::Serialization(_) | Error::StorageIo(_) => {
                ErrorClass::Internal
            }
        }
    }

    /// Only commit conflicts are worth re-running
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Conflict { .. })
    }

    /// True for commit conflicts
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict { .. })
    }

    /// True for absent keys
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

// ============================================================================
// Status
// ============================================================================

/// Outcome code carried by a [`Status`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    /// Success
    Ok,
    /// Absent key
    NotFound,
    /// Commit conflict
    Conflict,
    /// Missing or wrong index kind
    IndexMisconfigured,
    /// Decode or checksum failure
    Corrupt,
    /// Filesystem failure
    StorageIo,
    /// Rejected argument or state
    Invalid,
}

/// Ok flag plus message, returned by manager write paths
///
/// A `Status` never panics or unwinds. Convert it back into a
/// [`Result`] with [`Status::into_result`] when `?` is more convenient.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub struct Status {
    code: StatusCode,
    message: String,
}

impl Status {
    /// Successful status
    pub fn ok() -> Self {
        Status {
            code: StatusCode::Ok,
            message: String::new(),
        }
    }

    /// Failed status with an explicit code
    pub fn error(code: StatusCode, message: impl Into<String>) -> Self {
        Status {
            code,
            message: message.into(),
        }
    }

    /// Whether the operation succeeded
    pub fn is_ok(&self) -> bool {
        self.code == StatusCode::Ok
    }

    /// Outcome code
    pub fn code(&self) -> StatusCode {
        self.code
    }

    /// Human-readable failure message (empty on success)
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Turn the status back into a `Result`
    pub fn into_result(self) -> Result<()> {
        let msg = self.message;
        match self.code {
            StatusCode::Ok => Ok(()),
            StatusCode::NotFound => Err(Error::NotFound(msg)),
            StatusCode::Conflict => Err(Error::Conflict {
                key: msg,
                start_seq: 0,
                committed_seq: 0,
            }),
            StatusCode::IndexMisconfigured => Err(Error::IndexMisconfigured(msg)),
            StatusCode::Corrupt => Err(Error::Corrupt(msg)),
            StatusCode::StorageIo => Err(Error::StorageIo(io::Error::new(
                io::ErrorKind::Other,
                msg,
            ))),
            StatusCode::Invalid => Err(Error::InvalidOperation(msg)),
        }
    }
}

impl From<Error> for Status {
    fn from(e: Error) -> Self {
        let code = match &e {
            Error::NotFound(_) => StatusCode::NotFound,
            Error::Conflict { .. } => StatusCode::Conflict,
            Error::IndexMisconfigured(_) => StatusCode::IndexMisconfigured,
            Error::Corrupt(_) | Error::Serialization(_) => StatusCode::Corrupt,
            Error::StorageIo(_) => StatusCode::StorageIo,
            Error::InvalidArgument(_) | Error::InvalidOperation(_) => StatusCode::Invalid,
        };
        Status::error(code, e.to_string())
    }
}

impl From<Result<()>> for Status {
    fn from(r: Result<()>) -> Self {
        match r {
            Ok(()) => Status::ok(),
            Err(e) => e.into(),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_ok() {
            write!(f, "OK")
        } else {
            write!(f, "{:?}: {}", self.code, self.message)
        }
    }
}
