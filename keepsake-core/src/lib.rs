//! # keepsake-core
//!
//! Core library for keepsake - a curator of memorable chat exchanges.
//!
//! This library provides:
//! - A chunker that splits chat exports into calendar-day units
//! - A cache-checked, concurrency-gated LLM extraction pipeline
//! - Normalization of extraction results into a SQLite entity graph
//! - A curation engine for deleting and merging exchanges
//! - Configuration management and logging infrastructure
//!
//! ## Architecture
//!
//! Data flows in one direction:
//! - **Chunker:** raw export → per-day chunks (ephemeral)
//! - **Extractor:** chunk → fingerprint → cache or LLM → cached result
//! - **Normalizer:** cached results → exchange/message rows
//! - **Curation engine:** read, delete, and merge over the rows
//!
//! ## Example
//!
//! ```rust,no_run
//! use keepsake_core::{Config, Database};
//!
//! // Load configuration
//! let config = Config::load().expect("failed to load config");
//!
//! // Open database
//! let db = Database::open(&Config::database_path()).expect("failed to open database");
//! db.migrate().expect("failed to run migrations");
//! ```

// Re-export commonly used items at the crate root
pub use config::Config;
pub use curate::CurationEngine;
pub use db::Database;
pub use error::{CurationError, Error, Result};
pub use extract::{Extractor, HttpLlmClient, LlmClient};
pub use types::*;

// Public modules
pub mod chunker;
pub mod config;
pub mod curate;
pub mod db;
pub mod error;
pub mod extract;
pub mod logging;
pub mod normalize;
pub mod types;
