//! Recall - local-first long-term memory for LLM assistants
//!
//! Persists conversations in SQLite, mirrors their content into a cosine
//! vector collection and an FTS5 lexical index, and answers retrieval
//! queries with a fused, token-budgeted memory context block.

pub mod chunker;
pub mod config;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod ops;
pub mod search;
pub mod storage;
pub mod summary;
pub mod types;
pub mod vector;

pub use config::EngineConfig;
pub use engine::MemoryEngine;
pub use error::{ErrorKind, RecallError, Result};
pub use storage::Storage;
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
