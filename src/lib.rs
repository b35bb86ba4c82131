//! slugscout
//!
//! Resolve a free-form natural-language request into a small, ranked set of
//! matching catalog entries by delegating semantic interpretation to
//! interchangeable LLM backends — while tolerating backends that are slow,
//! rate-limited, broken, or wrong.
//!
//! The crate tracks per-model health over time, orders candidate models by
//! a priority score, falls back across models and backends on failure, and
//! caches final responses.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use slugscout::{Scout, CatalogEntry};
//!
//! # async fn run() -> Result<(), slugscout::ScoutError> {
//! let scout = Scout::builder().with_env_backends()?.build();
//!
//! let search = Arc::new(|keywords: Vec<String>| -> slugscout::SearchFuture {
//!     Box::pin(async move {
//!         // Query your catalog here.
//!         let _ = keywords;
//!         Ok(Vec::<CatalogEntry>::new())
//!     })
//! });
//!
//! let selection = scout
//!     .process_query("calendar tools, but not Google", search.as_ref())
//!     .await?;
//! println!("{:?}", selection.selected_slugs);
//! # Ok(())
//! # }
//! ```
#![deny(unsafe_code)]

pub mod error;
pub mod health;
pub mod orchestrator;
pub mod parse;
pub mod prompt;
pub mod provider;
pub mod store;
pub mod types;

pub use error::ScoutError;
pub use health::{Model, ModelHealth};
pub use orchestrator::{ModelSnapshot, ProblemDetail, Scout, ScoutBuilder, ScoutStats};
pub use provider::{Backend, GroqBackend, OllamaBackend, OpenRouterBackend, ProviderClient};
pub use store::{MemoryStore, Persister, StateStore};
pub use types::{
    CachedResponse, CatalogEntry, ModelMetadata, ProviderKind, QueryAnalysis, QueryOutcome,
    SearchFn, SearchFuture, SlugSelection, TokenUsage,
};

/// Commonly used items.
pub mod prelude {
    pub use crate::error::ScoutError;
    pub use crate::orchestrator::{Scout, ScoutBuilder};
    pub use crate::store::{MemoryStore, StateStore};
    pub use crate::types::{CatalogEntry, SearchFn, SearchFuture, SlugSelection};
}
