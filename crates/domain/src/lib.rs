//! Domain layer for the event-sourcing system.
//!
//! This crate provides:
//! - `AggregateKind` and `AggregateRegistry`: per-type transition tables
//! - `Aggregate`: a live aggregate with its uncommitted event buffer
//! - `Reconstructor`: snapshot-plus-replay loading
//! - `Repository`: append, snapshot policy and command retries
//! - `Cart`: a sample aggregate built on the above

pub mod aggregate;
pub mod cart;
pub mod codec;
pub mod config;
pub mod error;
pub mod reconstructor;
pub mod registry;
pub mod repository;

pub use aggregate::{Aggregate, DomainEvent, EventMetadata};
pub use cart::{CART_AGGREGATE_TYPE, Cart, CartError, CartLine, CartStatus};
pub use codec::{Codec, CodecError, JsonCodec};
pub use config::{RepositoryConfig, SnapshotPolicy};
pub use error::DomainError;
pub use reconstructor::Reconstructor;
pub use registry::{AggregateKind, AggregateRegistry};
pub use repository::{CommandResult, Repository, Saved};
