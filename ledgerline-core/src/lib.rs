//! Core traits and types for the ledgerline commit log.
//!
//! This crate provides the building blocks for optimistic-concurrency event
//! storage:
//!
//! - [`key`] - Stream addressing (`StreamKey`)
//! - [`commit`] - Commits and commit attempts (`Commit`, `CommitAttempt`)
//! - [`store`] - Commit persistence abstraction (`CommitStore`)
//! - [`snapshot`] - Snapshot storage abstraction (`SnapshotCache`)
//! - [`concurrency`] - Conflict reporting (`ConflictError`)
//! - [`clock`] - Commit timestamp source (`Clock`)
//! - [`aggregate`] - Command-side primitives (`Aggregate`, `Handle`)
//! - [`repository`] - Command execution and aggregate loading (`Repository`)
//!
//! # Example
//!
//! ```
//! use ledgerline_core::{key::StreamKey, store::inmemory};
//!
//! let log: inmemory::Store<String> = inmemory::Store::new();
//! let key = StreamKey::new("orders", "order-42");
//! assert_eq!(log.stream_count(), 0);
//! assert_eq!(key.to_string(), "orders/order-42");
//! ```
//!
//! Most users should depend on the `ledgerline` crate, which re-exports these
//! types with a flatter API surface.

pub mod aggregate;
pub mod clock;
pub mod commit;
pub mod concurrency;
pub mod key;
pub mod repository;
pub mod snapshot;
pub mod store;
