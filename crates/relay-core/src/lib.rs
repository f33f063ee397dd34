//! # Relay Core
//!
//! Shared, runtime-agnostic logic for Relay: message models, content
//! identity, SMIL layout reconstruction, and the store abstraction with an
//! in-memory implementation.
//!
//! This crate contains no tokio, sqlx, or filesystem I/O. Source access,
//! orchestration and the SQLite store live in the `relay-ingest` crate.

pub mod identity;
pub mod models;
pub mod smil;
pub mod store;
