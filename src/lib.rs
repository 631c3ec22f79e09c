//! Timeline - conversational memory engine
//!
//! Context-augmented generation for chat agents: message ingestion with
//! parent-link chaining, chunked vector indexing, a rolling session window
//! with incremental summarization, neighborhood-expanded retrieval, and
//! budgeted prompt assembly.

pub mod chain;
pub mod chunking;
pub mod config;
pub mod embedding;
pub mod error;
pub mod http;
pub mod index;
pub mod llm;
pub mod pipeline;
pub mod prompt;
pub mod retrieval;
pub mod storage;
pub mod summary;
pub mod types;
pub mod window;

pub use error::{Result, TimelineError};
pub use storage::Storage;
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
