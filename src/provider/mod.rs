//! Provider capability layer.
//!
//! The engine is provider-agnostic: everything that touches real
//! infrastructure goes through the [`Provider`] trait. The in-memory
//! provider is the builtin implementation for local runs and tests.

mod capability;
mod memory;
mod schema;
mod types;

pub use capability::Provider;
pub use memory::MemoryProvider;
pub use schema::{builtin_kinds, builtin_schema};
pub use types::{CreateResponse, KindSchema, RetryPolicy};
