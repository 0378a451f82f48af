use std::sync::Arc;

use strata_transport::TransportError;

/// Errors from graph decomposition (serialization).
#[derive(Debug, thiserror::Error)]
pub enum SerializeError {
    /// Cooperative cancellation was observed mid-walk.
    #[error("serialization cancelled")]
    Cancelled,

    /// A float with no JSON representation (NaN, infinity).
    #[error("cannot serialize non-finite float in property {prop:?}")]
    NonFiniteFloat { prop: String },

    /// A write transport failed; the whole serialize call aborts.
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type SerializeResult<T> = Result<T, SerializeError>;

/// Errors from graph reconstruction (deserialization).
#[derive(Debug, thiserror::Error)]
pub enum DeserializeError {
    /// The instance is already processing a root document.
    #[error("deserializer is busy: one instance processes one root document at a time")]
    Busy,

    /// Cooperative cancellation was observed mid-decode.
    #[error("deserialization cancelled")]
    Cancelled,

    /// An id named by a closure table (or a reference token) has no payload
    /// in the read transport.
    #[error("object {id} not found in transport {transport}")]
    ObjectMissing { id: String, transport: String },

    /// Structurally invalid document (bad reference token, non-record root).
    #[error("invalid document: {0}")]
    InvalidDocument(String),

    /// A typed property received a value of the wrong shape. One mismatch
    /// fails the whole record.
    #[error("type mismatch decoding {type_name}.{prop}: expected {expected}, found {found}")]
    TypeMismatch {
        type_name: String,
        prop: String,
        expected: String,
        found: String,
    },

    /// A pooled decode task failed; the error is shared with every resolver
    /// awaiting that task.
    #[error("background decode failed: {0}")]
    Shared(Arc<DeserializeError>),

    /// A pooled decode task panicked or its result channel closed early.
    #[error("decode worker lost: {0}")]
    WorkerLost(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("deserialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type DeserializeResult<T> = Result<T, DeserializeError>;
