//! LI³DS Core - Typed metadata records and the idempotent publisher
//!
//! This crate provides the building blocks shared by every importer:
//! - Resource kinds with their attribute whitelists and natural keys
//! - Records linked into an object graph, compared structurally
//! - A get-or-create store client with retries and race handling
//! - An in-memory staging backend for dry runs
//! - Collections publishing a whole import in dependency order

pub mod attrs;
pub mod collection;
pub mod record;
pub mod schema;
pub mod staging;
pub mod store;
pub mod time;

pub use attrs::Attributes;
pub use collection::Collection;
pub use record::{Link, Record, RecordRef};
pub use schema::{ResourceKind, ResourcePath, SchemaError};
pub use staging::StagingBackend;
pub use store::{Backend, Outcome, RetryPolicy, Store, StoreError};
pub use time::{Timestamp, TimeError};
