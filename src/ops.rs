//! In-process operational counters.
//!
//! Per-category success/failure counters plus a bounded ring of recent
//! failures. Counters live in process memory only; nothing here touches the
//! database.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Categories tracked by the ops counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpsCategory {
    Summary,
    Embedding,
    Retrieval,
    Metrics,
    Profile,
    Storage,
}

impl OpsCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpsCategory::Summary => "summary",
            OpsCategory::Embedding => "embedding",
            OpsCategory::Retrieval => "retrieval",
            OpsCategory::Metrics => "metrics",
            OpsCategory::Profile => "profile",
            OpsCategory::Storage => "storage",
        }
    }
}

/// A recorded failure, kept in the bounded history ring
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRecord {
    pub id: String,
    pub category: OpsCategory,
    /// Component and operation, e.g. "retriever.dense_search"
    pub source: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Success/failure totals for one category
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CategoryTotals {
    pub successes: u64,
    pub failures: u64,
}

#[derive(Default)]
struct CategoryCounters {
    successes: AtomicU64,
    failures: AtomicU64,
}

/// Maximum failures retained in the history ring
const FAILURE_HISTORY_CAP: usize = 100;

/// Thread-safe ops counters shared across the engine's handles
#[derive(Default)]
pub struct OpsCounters {
    counters: DashMap<OpsCategory, CategoryCounters>,
    failures: Mutex<VecDeque<FailureRecord>>,
}

impl OpsCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self, category: OpsCategory) {
        self.counters
            .entry(category)
            .or_default()
            .successes
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(
        &self,
        category: OpsCategory,
        source: impl Into<String>,
        message: impl Into<String>,
    ) {
        self.counters
            .entry(category)
            .or_default()
            .failures
            .fetch_add(1, Ordering::Relaxed);

        let record = FailureRecord {
            id: Uuid::new_v4().to_string(),
            category,
            source: source.into(),
            message: message.into(),
            timestamp: Utc::now(),
        };

        let mut ring = self.failures.lock();
        if ring.len() == FAILURE_HISTORY_CAP {
            ring.pop_front();
        }
        ring.push_back(record);
    }

    /// Totals for one category
    pub fn totals(&self, category: OpsCategory) -> CategoryTotals {
        self.counters
            .get(&category)
            .map(|c| CategoryTotals {
                successes: c.successes.load(Ordering::Relaxed),
                failures: c.failures.load(Ordering::Relaxed),
            })
            .unwrap_or_default()
    }

    /// Snapshot of every category that has recorded activity
    pub fn snapshot(&self) -> Vec<(OpsCategory, CategoryTotals)> {
        let mut out: Vec<(OpsCategory, CategoryTotals)> = self
            .counters
            .iter()
            .map(|entry| {
                (
                    *entry.key(),
                    CategoryTotals {
                        successes: entry.successes.load(Ordering::Relaxed),
                        failures: entry.failures.load(Ordering::Relaxed),
                    },
                )
            })
            .collect();
        out.sort_by_key(|(category, _)| category.as_str());
        out
    }

    /// Most recent failures, oldest first
    pub fn recent_failures(&self) -> Vec<FailureRecord> {
        self.failures.lock().iter().cloned().collect()
    }
}
