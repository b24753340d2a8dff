//! # docsync
//!
//! Incremental sync and batch processing of office document libraries.
//!
//! docsync enumerates a document source (a local folder tree or a remote
//! drive), decides which items are new or changed since the last run, stages
//! them locally with bounded concurrency and retry, and runs each one through
//! extraction, optional rendering, embedding and indexing. Every item's
//! lifecycle is tracked in a durable SQLite state store so interrupted or
//! failed runs resume where they left off.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌────────────┐   ┌───────────┐   ┌──────────────────┐
//! │ Connector   │──▶│ plan_work  │──▶│ Transfer  │──▶│ Processing       │
//! │ FS / remote │   │ (filter)   │   │ (N-way)   │   │ extract → render │
//! └─────────────┘   └─────┬──────┘   └─────┬─────┘   │ → embed → index  │
//!                         │                │         └────────┬─────────┘
//!                         ▼                ▼                  ▼
//!                    ┌──────────────────────────────────────────────┐
//!                    │ StateStore (items + processing_logs)         │
//!                    └──────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`state`] | Durable item state and processing log |
//! | [`connector_fs`] | Filesystem discovery |
//! | [`connector_remote`] | Remote drive discovery and download |
//! | [`filter`] | Change detection and work-list planning |
//! | [`transfer`] | Concurrent staging with retry |
//! | [`processing`] | Per-item extract/render/embed/index |
//! | [`ingest`] | Batch orchestration |
//! | [`extract`] | Office document and PDF text extraction |
//! | [`render`] | External page renderer |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | SQLite vector index |
//! | [`search`] | Query front-end |
//! | [`stats`] | State inspection commands |

pub mod config;
pub mod connector_fs;
pub mod connector_remote;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod filter;
pub mod index;
pub mod ingest;
pub mod logging;
pub mod migrate;
pub mod models;
pub mod processing;
pub mod progress;
pub mod render;
pub mod search;
pub mod state;
pub mod stats;
pub mod traits;
pub mod transfer;
