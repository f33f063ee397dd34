//! # Relay
//!
//! Incremental message ingestion and normalization.
//!
//! Relay reads SMS, MMS and heuristically detected RCS rows from an external
//! message provider, normalizes them into messages, parts and addresses,
//! deduplicates them by a content hash, and commits them to a store in
//! bounded batches. Consumers observe the store through a reactive feed.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌────────────────────────────┐   ┌──────────────┐
//! │ MessageSource│──▶│ Ingestor                   │──▶│ MessageStore │
//! │ (provider)   │   │ watermark → extract →      │   │ SQLite / mem │
//! └──────────────┘   │ identify → batch → commit  │   └──────┬───────┘
//!                    └────────────────────────────┘          │
//!                                                            ▼
//!                                                     ┌──────────────┐
//!                                                     │ ObservedStore│
//!                                                     │ subscribers  │
//!                                                     └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! relay init                     # create database
//! relay ingest                   # ingest all channels from the configured dump
//! relay ingest --channel mms     # one channel only
//! relay list --limit 20
//! relay stats
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`logging`] | `tracing` subscriber setup |
//! | [`source`] | Provider abstraction, typed row decoders, JSON dump source |
//! | [`extract`] | Rows to candidate records |
//! | [`capability`] | Cached secondary-provider availability |
//! | [`watermark`] | Per-channel progress |
//! | [`ingest`] | Orchestrator with single-flight guard |
//! | [`feed`] | Reactive subscription over a store |
//! | [`sqlite_store`] | SQLite store |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`stats`] | Database statistics |
//! | [`list`] | Message listing |
//!
//! Data model, identity, SMIL parsing and the store trait live in
//! [`relay_core`] and are re-exported here.

pub use relay_core::{identity, models, smil, store};

pub mod capability;
pub mod config;
pub mod db;
pub mod extract;
pub mod feed;
pub mod ingest;
pub mod list;
pub mod logging;
pub mod migrate;
pub mod source;
pub mod sqlite_store;
pub mod stats;
pub mod watermark;
