//! Graph decomposition codec for Strata.
//!
//! The serializer walks a [`Record`](strata_model::Record) tree, detaches
//! and chunks flagged properties into independently content-addressed
//! records, and fans every record out to the configured write transports.
//! The deserializer reverses the walk: it prefetches a document's closure,
//! decodes it through a bounded worker pool, and resolves reference tokens
//! back into nested records.
//!
//! # Design Rules
//!
//! 1. Ids are deterministic: the same record tree always hashes to the
//!    same id (closure tables serialize in sorted order).
//! 2. With no write transports, serialization is a pure id computation:
//!    nothing detaches, nothing persists.
//! 3. Cancellation always surfaces as an error; there are no silent
//!    partial results.
//! 4. A deserializer instance processes one root document at a time.
//! 5. Worker admission is try-only: a saturated pool means the caller
//!    decodes inline, never queues behind itself.

pub mod deserializer;
pub mod error;
pub mod pool;
pub mod serializer;

pub use deserializer::Deserializer;
pub use error::{DeserializeError, DeserializeResult, SerializeError, SerializeResult};
pub use pool::{default_worker_count, WorkerPool};
pub use serializer::Serializer;
