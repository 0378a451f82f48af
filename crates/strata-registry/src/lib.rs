//! Process-wide type and property registry for Strata records.
//!
//! The codec does not inspect Rust types: what a record's "typed" fields
//! are, and which of them are detachable or chunkable, is declared here by
//! the owning object-model module as a [`TypeDescriptor`] and cached for
//! the lifetime of the process.
//!
//! Resolution never fails: an unknown discriminator falls back to a cached
//! generic descriptor, and the decoded record keeps the original
//! discriminator string.
//!
//! Dynamic (ad hoc) properties are not registered; their detach and chunk
//! flags are carried in the property name itself and parsed per instance
//! by [`dynamic_flags`]:
//!
//! - `@name` -- detachable
//! - `@(200)name` -- detachable, chunked at 200 elements
//! - `@()name` -- detachable, chunked at the default size
//!
//! The global map is `RwLock`-protected: concurrent readers, build-once per
//! type, with [`invalidate`] and [`clear`] as explicit hot-reload hatches.

pub mod count;
pub mod descriptor;
pub mod dynamic;
pub mod registry;

pub use count::count_descendants;
pub use descriptor::{PostDecodeHook, PropertyFlags, PropertySpec, TypeDescriptor};
pub use dynamic::dynamic_flags;
pub use registry::{clear, invalidate, is_registered, register, resolve};
