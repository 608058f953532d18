//! Reconciliation and deduplication of cited references gathered from several
//! bibliographic sources.
//!
//! `bibmerge` takes the noisy reference lists produced by an automatic reference
//! extractor and validates them against the reference lists that bibliographic
//! metadata providers return for the same citing work. The result is one
//! validated, deduplicated and identifier-enriched reference list per citing work,
//! with provenance ("which provider corroborated this reference") and best-effort
//! author affiliations.
//!
//! # Key Features
//!
//! - **Merging**: align provider reference lists on a creator/year [`MatchKey`] and
//!   combine them under a configurable set of [`MergePolicy`] values
//! - **Reconciliation**: resolve references lacking a DOI or ISBN through provider
//!   lookups with edit-distance thresholds
//! - **Affiliations**: merge per-author affiliation data across sources
//! - **Corpus backfill**: fill missing identifiers and affiliations from records found
//!   elsewhere in the processed corpus
//! - **Parallel processing** of independent citing works
//!
//! # Basic Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use bibmerge::model::BibliographicItem;
//! use bibmerge::provider::{ProviderRegistry, StaticProvider};
//! use bibmerge::{MergeConfig, MergeCoordinator};
//!
//! let extracted = BibliographicItem::from_json_str(r#"{
//!     "DOI": "10.1/x",
//!     "x-references": [{"author": [{"family": "Smith"}], "issued": "2000", "title": "A Study"}]
//! }"#).unwrap();
//! let crossref = BibliographicItem::from_json_str(r#"{
//!     "DOI": "10.1/x",
//!     "reference": [{"author": [{"family": "Smith"}], "issued": "2000", "title": "A Study", "DOI": "10.9/y"}]
//! }"#).unwrap();
//!
//! let mut registry = ProviderRegistry::new();
//! registry.register(Arc::new(StaticProvider::new("anystyle").with_items(vec![extracted])));
//! registry.register(Arc::new(StaticProvider::new("crossref").with_items(vec![crossref])));
//!
//! let config = MergeConfig {
//!     datasources: vec!["anystyle".to_string(), "crossref".to_string()],
//!     ..Default::default()
//! };
//! let coordinator = MergeCoordinator::new(Arc::new(registry), config).unwrap();
//! let (item, stats) = coordinator.merge("10.1/x").unwrap();
//!
//! assert_eq!(item.x_references.len(), 1);
//! assert_eq!(item.x_references[0].doi.as_deref(), Some("10.9/y"));
//! assert_eq!(stats.validated, 1);
//! ```
//!
//! # Corpus Processing
//!
//! ```rust,ignore
//! let mut dataset = Dataset::default();
//! let report = dataset.import(&ids, &coordinator, None);
//! let backfill = dataset.backfill();
//! ```
//!
//! # Error Handling
//!
//! Fallible operations return [`Result`], which wraps [`MergeError`]. Provider
//! failures never surface as errors: they are logged and treated as "no data" so
//! that the remaining providers can still contribute.
//!
//! # Logging
//!
//! The crate emits [`tracing`] events and never installs a subscriber itself.

use thiserror::Error;

pub mod affiliation;
pub mod cache;
pub mod config;
pub mod dataset;
pub mod dedupe;
pub mod merge;
pub mod model;
pub mod provider;
pub mod reconcile;
mod regex;
mod utils;

// Reexports
pub use config::{MergeConfig, MergePolicy, Pattern};
pub use dataset::Dataset;
pub use merge::{MergeCoordinator, MergeStats};
pub use model::{Affiliation, BibliographicItem, Creator, DateValue, ItemType, MatchKey};
pub use provider::{Provider, ProviderError, ProviderRegistry};
pub use utils::{format_doi, guess_language, parse_author_name};

/// A specialized Result type for merge operations.
pub type Result<T> = std::result::Result<T, MergeError>;

/// Errors that abort a merge or reject a configuration.
#[derive(Error, Debug)]
pub enum MergeError {
    #[error("No data available for {id}")]
    NoData { id: String },

    #[error("Invalid work id: {0}")]
    InvalidWorkId(String),

    #[error("Unknown datasource: {0}")]
    UnknownProvider(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Duplicate item id: {0}")]
    DuplicateItem(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
