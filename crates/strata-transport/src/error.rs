use std::error::Error as StdError;
use std::fmt;

/// Errors from transport operations. Variants that involve two stores name
/// both, so a failed copy can be attributed.
///
/// `Display`/`Error`/`From` are implemented by hand (not via `thiserror`)
/// because `SourceMissing` has a plain-`String` field named `source`, which
/// the derive would insist on exposing as the error source.
#[derive(Debug)]
pub enum TransportError {
    /// The requested object does not exist in the named transport.
    ///
    /// Only raised where absence is a failure (e.g. the root of a copy);
    /// plain `get_object` reports absence as `Ok(None)`.
    NotFound { id: String, transport: String },

    /// Copying an object whose source transport returned nothing.
    SourceMissing {
        id: String,
        source: String,
        target: String,
    },

    /// A write bracket was opened while one is already active.
    AlreadyWriting { transport: String },

    /// A background writer failed earlier; the batch is poisoned.
    Failed { transport: String, detail: String },

    /// Malformed payload (closure table, batch envelope).
    InvalidDocument(String),

    /// Cooperative cancellation was observed.
    Cancelled,

    Sqlite(rusqlite::Error),

    Http(reqwest::Error),

    Io(std::io::Error),

    Serialization(serde_json::Error),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { id, transport } => {
                write!(f, "object {id} not found in transport {transport}")
            }
            Self::SourceMissing { id, source, target } => {
                write!(
                    f,
                    "cannot copy {id} from {source} to {target}: source returned nothing"
                )
            }
            Self::AlreadyWriting { transport } => {
                write!(f, "transport {transport} is already writing")
            }
            Self::Failed { transport, detail } => {
                write!(f, "transport {transport} failed: {detail}")
            }
            Self::InvalidDocument(detail) => write!(f, "invalid document: {detail}"),
            Self::Cancelled => write!(f, "operation cancelled"),
            Self::Sqlite(err) => write!(f, "sqlite error: {err}"),
            Self::Http(err) => write!(f, "http error: {err}"),
            Self::Io(err) => write!(f, "I/O error: {err}"),
            Self::Serialization(err) => write!(f, "serialization error: {err}"),
        }
    }
}

impl StdError for TransportError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::Http(err) => Some(err),
            Self::Io(err) => Some(err),
            Self::Serialization(err) => Some(err),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for TransportError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Sqlite(err)
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(err)
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err)
    }
}

/// Result alias for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;
