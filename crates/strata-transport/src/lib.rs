//! Content-addressed storage transports for Strata.
//!
//! A transport is a passive key/value store of serialized records: opaque
//! ids mapped to opaque string payloads, write-once by convention. The
//! codec fans every persisted record out to one or more write transports
//! and resolves references through a single read transport.
//!
//! # Backends
//!
//! All backends implement the [`Transport`] trait:
//!
//! - [`MemoryTransport`] -- synchronous `HashMap` store for tests,
//!   embedding, and inline id computation
//! - [`SqliteTransport`] -- batching durable store on embedded SQLite
//!   (WAL mode, bounded flush transactions)
//! - [`ServerTransport`] -- batching remote store with server-side
//!   existence diff, generic over a [`ServerApi`]; [`HttpServerApi`] is
//!   the HTTP implementation
//!
//! # Contract highlights
//!
//! - `save_object` enqueues and never blocks; `write_complete().await`
//!   resolves once the queue is drained and nothing is mid-flush.
//! - `get_object` returns `Ok(None)` for missing ids -- absence is not an
//!   error at this layer.
//! - `copy_object_and_children` replicates a root and its closure,
//!   transferring only what the target is missing.
//! - Cancelling a batching transport discards its unflushed queue.

pub mod closure;
pub mod error;
pub mod http;
pub mod memory;
pub mod server;
pub mod sqlite;
pub mod traits;

pub use error::{TransportError, TransportResult};
pub use http::{HttpServerApi, ServerOptions};
pub use memory::MemoryTransport;
pub use server::{ServerApi, ServerTransport};
pub use sqlite::{SqliteTransport, SqliteTransportOptions};
pub use traits::{ProgressHandler, Transport};
