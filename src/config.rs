//! Engine configuration loaded from the environment.
//!
//! Validation never crashes: out-of-range values are warned about and
//! clamped, malformed values fall back to their defaults.

use serde::{Deserialize, Serialize};

/// Feature flags and budgets that may also be overridden at runtime via the
/// typed-preferences table.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RuntimeFlags {
    /// Fuse dense and lexical search
    pub hybrid: bool,
    /// Segment messages into prose/code chunks before indexing
    pub chunking: bool,
    /// Allow `backfill_message_chunks` to chunk historical messages
    pub backfill_chunks: bool,
    /// Context-block token budget, [100, 5000]
    pub token_budget: usize,
    /// Summarize every N assistant messages, [0, 100]; 0 disables
    pub summary_frequency: u32,
}

impl Default for RuntimeFlags {
    fn default() -> Self {
        Self {
            hybrid: true,
            chunking: true,
            backfill_chunks: false,
            token_budget: DEFAULT_TOKEN_BUDGET,
            summary_frequency: DEFAULT_SUMMARY_FREQUENCY,
        }
    }
}

pub const TOKEN_BUDGET_RANGE: (usize, usize) = (100, 5000);
pub const DEFAULT_TOKEN_BUDGET: usize = 1000;
pub const SUMMARY_FREQUENCY_RANGE: (u32, u32) = (0, 100);
pub const DEFAULT_SUMMARY_FREQUENCY: u32 = 5;

impl RuntimeFlags {
    /// Clamp budgets into their documented ranges, warning on drift.
    pub fn clamped(mut self) -> Self {
        self.token_budget = clamp_warn(
            "token_budget",
            self.token_budget,
            TOKEN_BUDGET_RANGE.0,
            TOKEN_BUDGET_RANGE.1,
        );
        self.summary_frequency = clamp_warn(
            "summary_frequency",
            self.summary_frequency,
            SUMMARY_FREQUENCY_RANGE.0,
            SUMMARY_FREQUENCY_RANGE.1,
        );
        self
    }
}

/// Weights for the hybrid rerank `alpha * dense + beta * bm25 + gamma * code`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RerankWeights {
    pub alpha: f32,
    pub beta: f32,
    pub gamma: f32,
}

impl Default for RerankWeights {
    fn default() -> Self {
        Self {
            alpha: 0.6,
            beta: 0.3,
            gamma: 0.1,
        }
    }
}

impl RerankWeights {
    /// The weights must sum to 1.0 within a 0.01 tolerance. On drift we warn
    /// and renormalize rather than fail.
    pub fn validated(mut self) -> Self {
        self.alpha = self.alpha.clamp(0.0, 1.0);
        self.beta = self.beta.clamp(0.0, 1.0);
        self.gamma = self.gamma.clamp(0.0, 1.0);
        let sum = self.alpha + self.beta + self.gamma;
        if (sum - 1.0).abs() > 0.01 {
            tracing::warn!(
                alpha = self.alpha,
                beta = self.beta,
                gamma = self.gamma,
                sum,
                "rerank weights do not sum to 1.0, renormalizing"
            );
            if sum > f32::EPSILON {
                self.alpha /= sum;
                self.beta /= sum;
                self.gamma /= sum;
            } else {
                return Self::default();
            }
        }
        self
    }
}

/// Full engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Path to the SQLite database (":memory:" for tests)
    pub db_path: String,
    /// Vector index host
    pub vector_host: String,
    /// Vector index port
    pub vector_port: u16,
    /// Vector collection name
    pub collection_name: String,
    /// Embedding server endpoint (POST `{model, input}`)
    pub embedding_url: String,
    /// Embedding model name
    pub embedding_model: String,
    /// Per-request embedding timeout in milliseconds
    pub embed_timeout_ms: u64,
    /// Extra attempts after the first embedding request
    pub embed_retries: u32,
    /// Max entries held by the LRU embedding cache
    pub embed_cache_size: usize,
    /// Dense results below this similarity are dropped
    pub similarity_threshold: f32,
    /// Rolling retention for retrieval metrics, [1, 365] days
    pub metrics_retention_days: u32,
    /// Log retrieval queries (sampled) at debug level
    pub query_log_enabled: bool,
    /// Sample rate for query logging, [0, 1]
    pub query_log_sample_rate: f64,
    pub flags: RuntimeFlags,
    pub rerank: RerankWeights,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            db_path: "recall.db".to_string(),
            vector_host: "localhost".to_string(),
            vector_port: 8000,
            collection_name: "recall_memory".to_string(),
            embedding_url: "http://localhost:1234/v1/embeddings".to_string(),
            embedding_model: "text-embedding-nomic-embed-text-v1.5".to_string(),
            embed_timeout_ms: 30_000,
            embed_retries: 2,
            embed_cache_size: 1000,
            similarity_threshold: 0.3,
            metrics_retention_days: 30,
            query_log_enabled: false,
            query_log_sample_rate: 0.1,
            flags: RuntimeFlags::default(),
            rerank: RerankWeights::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from `RECALL_*` environment variables, falling
    /// back to defaults and clamping out-of-range values.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let flags = RuntimeFlags {
            hybrid: env_parse("RECALL_HYBRID", defaults.flags.hybrid),
            chunking: env_parse("RECALL_CHUNKING", defaults.flags.chunking),
            backfill_chunks: env_parse("RECALL_BACKFILL_CHUNKS", defaults.flags.backfill_chunks),
            token_budget: env_parse("RECALL_TOKEN_BUDGET", defaults.flags.token_budget),
            summary_frequency: env_parse(
                "RECALL_SUMMARY_FREQUENCY",
                defaults.flags.summary_frequency,
            ),
        }
        .clamped();

        let rerank = RerankWeights {
            alpha: env_parse("RECALL_RERANK_ALPHA", defaults.rerank.alpha),
            beta: env_parse("RECALL_RERANK_BETA", defaults.rerank.beta),
            gamma: env_parse("RECALL_RERANK_GAMMA", defaults.rerank.gamma),
        }
        .validated();

        Self {
            db_path: env_string("RECALL_DB_PATH", &defaults.db_path),
            vector_host: env_string("RECALL_VECTOR_HOST", &defaults.vector_host),
            vector_port: env_parse("RECALL_VECTOR_PORT", defaults.vector_port),
            collection_name: env_string("RECALL_COLLECTION", &defaults.collection_name),
            embedding_url: env_string("RECALL_EMBEDDING_URL", &defaults.embedding_url),
            embedding_model: env_string("RECALL_EMBEDDING_MODEL", &defaults.embedding_model),
            embed_timeout_ms: env_parse("RECALL_EMBED_TIMEOUT_MS", defaults.embed_timeout_ms),
            embed_retries: env_parse("RECALL_EMBED_RETRIES", defaults.embed_retries),
            embed_cache_size: env_parse("RECALL_EMBED_CACHE_SIZE", defaults.embed_cache_size)
                .max(1),
            similarity_threshold: env_parse(
                "RECALL_SIMILARITY_THRESHOLD",
                defaults.similarity_threshold,
            )
            .clamp(0.0, 1.0),
            metrics_retention_days: clamp_warn(
                "metrics_retention_days",
                env_parse(
                    "RECALL_METRICS_RETENTION_DAYS",
                    defaults.metrics_retention_days,
                ),
                1,
                365,
            ),
            query_log_enabled: env_parse("RECALL_QUERY_LOG_ENABLED", defaults.query_log_enabled),
            query_log_sample_rate: env_parse(
                "RECALL_QUERY_LOG_SAMPLE_RATE",
                defaults.query_log_sample_rate,
            )
            .clamp(0.0, 1.0),
            flags,
            rerank,
        }
    }

    /// Base URL of the vector index API
    pub fn vector_url(&self) -> String {
        format!("http://{}:{}", self.vector_host, self.vector_port)
    }
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_parse<T: std::str::FromStr + Copy>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(key, raw, "unparseable value, using default");
                default
            }
        },
        Err(_) => default,
    }
}

fn clamp_warn<T: PartialOrd + Copy + std::fmt::Debug>(name: &str, value: T, lo: T, hi: T) -> T {
    if value < lo {
        tracing::warn!(name, ?value, ?lo, "value below range, clamping");
        lo
    } else if value > hi {
        tracing::warn!(name, ?value, ?hi, "value above range, clamping");
        hi
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_in_range() {
        let config = EngineConfig::default();
        assert_eq!(config.flags.token_budget, 1000);
        assert_eq!(config.flags.summary_frequency, 5);
        assert_eq!(config.embed_cache_size, 1000);
        assert!((config.similarity_threshold - 0.3).abs() < f32::EPSILON);
    }

    #[test]
    fn test_flags_clamped() {
        let flags = RuntimeFlags {
            token_budget: 50,
            summary_frequency: 500,
            ..Default::default()
        }
        .clamped();
        assert_eq!(flags.token_budget, 100);
        assert_eq!(flags.summary_frequency, 100);
    }

    #[test]
    fn test_rerank_weights_renormalized() {
        let weights = RerankWeights {
            alpha: 0.6,
            beta: 0.6,
            gamma: 0.1,
        }
        .validated();
        let sum = weights.alpha + weights.beta + weights.gamma;
        assert!((sum - 1.0).abs() <= 0.01);
        // Relative proportions survive renormalization
        assert!(weights.alpha > weights.gamma);
    }

    #[test]
    fn test_rerank_weights_in_tolerance_untouched() {
        let weights = RerankWeights {
            alpha: 0.6,
            beta: 0.3,
            gamma: 0.1,
        }
        .validated();
        assert!((weights.alpha - 0.6).abs() < f32::EPSILON);
        assert!((weights.beta - 0.3).abs() < f32::EPSILON);
    }

    #[test]
    fn test_zero_weights_fall_back_to_defaults() {
        let weights = RerankWeights {
            alpha: 0.0,
            beta: 0.0,
            gamma: 0.0,
        }
        .validated();
        assert!((weights.alpha - 0.6).abs() < f32::EPSILON);
    }

    #[test]
    fn test_vector_url() {
        let config = EngineConfig {
            vector_host: "127.0.0.1".into(),
            vector_port: 9000,
            ..Default::default()
        };
        assert_eq!(config.vector_url(), "http://127.0.0.1:9000");
    }
}
