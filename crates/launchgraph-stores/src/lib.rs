//! # Launchgraph Stores
//!
//! Concrete persistence for the runtime:
//! - `CheckpointStore` backends: in-memory (dev/test), Redis, Postgres
//! - `RunEventBus`: per-run ordered event log with broadcast fan-out
//!
//! The traits live in `launchgraph-core`; this crate only implements them.

mod checkpoint;
mod event_bus;

pub use checkpoint::{InMemoryCheckpointStore, PostgresCheckpointStore, RedisCheckpointStore};
pub use event_bus::RunEventBus;
