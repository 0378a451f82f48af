//! Dynamic record model for Strata.
//!
//! Strata decomposes arbitrarily nested, dynamically-typed object graphs
//! into independently hashed, storable fragments. This crate defines the
//! in-memory shape of those graphs:
//!
//! - [`Value`] -- a dynamically typed value: primitives, lists, ordered
//!   maps, and nested records
//! - [`Record`] -- a typed, content-hashed unit of the decomposed graph: a
//!   type discriminator plus an ordered property bag
//!
//! # Wire shape
//!
//! A serialized record is a JSON object carrying its discriminator under
//! [`wire::TYPE_DISCRIMINATOR`], an optional closure table under
//! [`wire::CLOSURE_FIELD`] (descendant id -> minimum reachable depth), and
//! its content hash under [`wire::ID_FIELD`]. Detached sub-records are
//! replaced by reference tokens (`{"strata_type": "reference",
//! "referencedId": "<id>"}`).
//!
//! # Design Rules
//!
//! 1. A record's id is the hash of its canonical JSON with the id itself
//!    excluded; once computed, the record is immutable by convention.
//! 2. Property order is meaningful and preserved end to end.
//! 3. Properties prefixed `__` are transient: never hashed, never stored.
//! 4. The hash is deterministic within one deployment; byte-for-byte
//!    interop with other implementations is not guaranteed.

pub mod error;
pub mod hash;
pub mod record;
pub mod value;
pub mod wire;

pub use error::{ModelError, ModelResult};
pub use record::Record;
pub use value::{Value, ValueKind};
