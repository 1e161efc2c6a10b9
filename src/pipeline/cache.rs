//! In-memory cache of answered questions.
//!
//! Entries are keyed by the normalized question, the response language and
//! the schema fingerprint, so a schema change never serves stale answers.
//! Time-to-live depends on the shape of the generated SQL. When full, the
//! entry created first is evicted.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::CacheConfig;
use crate::db::Row;
use crate::llm::templates::Language;
use crate::pipeline::validator::has_aggregate;

static ISO_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{4}-\d{2}-\d{2}").expect("date regex"));

static DIGITS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").expect("digits regex"));

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("whitespace regex"));

static METADATA_SQL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\binformation_schema\b|\bpg_catalog\b|\bsqlite_master\b|\bduckdb_[a-z_]+\s*\(|^\s*(?:SHOW|DESCRIBE|DESC|PRAGMA)\b",
    )
    .expect("metadata regex")
});

/// TTL class of a cached statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TtlTier {
    Metadata,
    Aggregate,
    Plain,
}

impl TtlTier {
    pub fn of_sql(sql: &str) -> Self {
        if METADATA_SQL.is_match(sql) {
            TtlTier::Metadata
        } else if has_aggregate(sql) {
            TtlTier::Aggregate
        } else {
            TtlTier::Plain
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub enabled: bool,
    pub max_size: usize,
    /// TTL of the plain tier; aggregate is 3x, metadata 12x
    pub short_ttl: Duration,
}

impl CacheSettings {
    pub fn ttl_for(&self, tier: TtlTier) -> Duration {
        match tier {
            TtlTier::Metadata => self.short_ttl * 12,
            TtlTier::Aggregate => self.short_ttl * 3,
            TtlTier::Plain => self.short_ttl,
        }
    }
}

impl From<&CacheConfig> for CacheSettings {
    fn from(config: &CacheConfig) -> Self {
        Self {
            enabled: config.enabled,
            max_size: config.max_size.max(1),
            short_ttl: Duration::from_secs(config.short_ttl_secs),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheEntry {
    pub sql: String,
    pub results: Vec<Row>,
    pub explanation: String,
    pub created_at: DateTime<Utc>,
    pub ttl: Duration,
    pub tier: TtlTier,
    pub language: Language,
    pub execution_time_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub enabled: bool,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub entries: usize,
    pub max_size: usize,
    /// Serialized size of keys and entries, not actual heap usage
    pub approx_memory_bytes: usize,
}

struct Stored {
    entry: CacheEntry,
    inserted: Instant,
    seq: u64,
}

impl Stored {
    fn is_expired(&self) -> bool {
        self.inserted.elapsed() > self.entry.ttl
    }
}

struct CacheState {
    enabled: bool,
    entries: HashMap<String, Stored>,
    hits: u64,
    misses: u64,
    next_seq: u64,
}

pub struct ResultCache {
    settings: CacheSettings,
    state: Mutex<CacheState>,
}

impl ResultCache {
    pub fn new(settings: CacheSettings) -> Self {
        Self {
            state: Mutex::new(CacheState {
                enabled: settings.enabled,
                entries: HashMap::new(),
                hits: 0,
                misses: 0,
                next_seq: 0,
            }),
            settings,
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_enabled(&self) -> bool {
        self.lock().enabled
    }

    /// Cached answer for the question, if present and not expired. An
    /// expired entry is removed and counts as a miss.
    pub fn lookup(&self, question: &str, language: Language, fingerprint: &str) -> Option<CacheEntry> {
        let key = cache_key(question, language, fingerprint);
        let mut state = self.lock();
        if !state.enabled {
            return None;
        }

        let expired = match state.entries.get(&key) {
            Some(stored) if stored.is_expired() => true,
            Some(stored) => {
                let entry = stored.entry.clone();
                state.hits += 1;
                debug!("Cache hit for key {}", key);
                return Some(entry);
            }
            None => false,
        };

        if expired {
            state.entries.remove(&key);
            debug!("Cache entry {} expired", key);
        }
        state.misses += 1;
        None
    }

    /// Store an answer. At capacity, the oldest entry is evicted first.
    #[allow(clippy::too_many_arguments)]
    pub fn store(
        &self,
        question: &str,
        language: Language,
        fingerprint: &str,
        sql: &str,
        rows: Vec<Row>,
        explanation: &str,
        execution_time_ms: u64,
    ) {
        let key = cache_key(question, language, fingerprint);
        let tier = TtlTier::of_sql(sql);
        let ttl = self.settings.ttl_for(tier);

        let mut state = self.lock();
        if !state.enabled {
            return;
        }

        if !state.entries.contains_key(&key) && state.entries.len() >= self.settings.max_size {
            let oldest = state
                .entries
                .iter()
                .min_by_key(|(_, stored)| (stored.inserted, stored.seq))
                .map(|(key, _)| key.clone());
            if let Some(oldest) = oldest {
                state.entries.remove(&oldest);
                debug!("Evicted oldest cache entry {}", oldest);
            }
        }

        let seq = state.next_seq;
        state.next_seq += 1;
        state.entries.insert(
            key,
            Stored {
                entry: CacheEntry {
                    sql: sql.to_string(),
                    results: rows,
                    explanation: explanation.to_string(),
                    created_at: Utc::now(),
                    ttl,
                    tier,
                    language,
                    execution_time_ms,
                },
                inserted: Instant::now(),
                seq,
            },
        );
    }

    /// Remove every entry whose SQL mentions `table`, case-insensitively.
    ///
    /// This is a substring match, so a table named `order` also drops
    /// entries that only touch `orders`.
    pub fn invalidate_by_table(&self, table: &str) -> usize {
        let needle = table.to_lowercase();
        let mut state = self.lock();
        let before = state.entries.len();
        state
            .entries
            .retain(|_, stored| !stored.entry.sql.to_lowercase().contains(&needle));
        let removed = before - state.entries.len();
        info!("Invalidated {} cache entries referencing {}", removed, table);
        removed
    }

    /// Drop all entries and reset hit/miss counters.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.hits = 0;
        state.misses = 0;
        info!("Result cache cleared");
    }

    /// Turning the cache off also drops everything it holds.
    pub fn set_enabled(&self, enabled: bool) {
        let mut state = self.lock();
        state.enabled = enabled;
        if !enabled {
            state.entries.clear();
        }
        info!("Result cache {}", if enabled { "enabled" } else { "disabled" });
    }

    pub fn purge_expired(&self) -> usize {
        let mut state = self.lock();
        let before = state.entries.len();
        state.entries.retain(|_, stored| !stored.is_expired());
        before - state.entries.len()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        let lookups = state.hits + state.misses;
        let approx_memory_bytes = state
            .entries
            .iter()
            .map(|(key, stored)| {
                key.len() + serde_json::to_vec(&stored.entry).map_or(0, |bytes| bytes.len())
            })
            .sum();

        CacheStats {
            enabled: state.enabled,
            hits: state.hits,
            misses: state.misses,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                state.hits as f64 / lookups as f64
            },
            entries: state.entries.len(),
            max_size: self.settings.max_size,
            approx_memory_bytes,
        }
    }

    /// Periodically purge expired entries until the cache is dropped.
    pub fn spawn_cleanup(self: &Arc<Self>, interval: Duration) -> Option<JoinHandle<()>> {
        if interval.is_zero() {
            return None;
        }

        let cache = Arc::downgrade(self);
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(cache) = cache.upgrade() else {
                    break;
                };
                let removed = cache.purge_expired();
                if removed > 0 {
                    debug!("Cache cleanup removed {} expired entries", removed);
                }
            }
        }))
    }
}

/// Lowercase, dates and numbers replaced by placeholders, whitespace
/// collapsed and trailing punctuation removed.
pub fn normalize_question(question: &str) -> String {
    let lowered = question.to_lowercase();
    let dated = ISO_DATE.replace_all(&lowered, "<date>");
    let numbered = DIGITS.replace_all(&dated, "<n>");
    let collapsed = WHITESPACE.replace_all(&numbered, " ");
    collapsed
        .trim()
        .trim_end_matches(|c: char| c.is_ascii_punctuation() && c != '>' && c != ')')
        .trim_end()
        .to_string()
}

pub fn cache_key(question: &str, language: Language, fingerprint: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_question(question).as_bytes());
    hasher.update([0x1f]);
    hasher.update(language.tag().as_bytes());
    hasher.update([0x1f]);
    hasher.update(fingerprint.as_bytes());
    format!("{:x}", hasher.finalize())
}
