//! Shared identity types for the event-sourced persistence engine.

pub mod types;

pub use types::AggregateId;
