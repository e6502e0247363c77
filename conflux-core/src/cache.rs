//! Response cache keyed by provider, prompt and parameters.
//!
//! Every operation takes the same async mutex for its whole duration, so
//! concurrent callers never see a half-applied insert or eviction.
//!
//! Eviction is by insertion order, not by access order: reads never reorder
//! entries. Inserting past capacity drops the entry that was inserted
//! longest ago. Re-inserting a key counts as a fresh insertion.

use crate::types::{Parameters, RecursiveValue};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt::Write as _;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Cache configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of entries held at once
    pub max_entries: usize,
    /// Entry lifetime in seconds
    pub ttl_seconds: u64,
    /// Whether the cache starts enabled
    pub enabled: bool,
}

impl CacheConfig {
    /// Create the default configuration
    pub fn new() -> Self {
        Self {
            max_entries: 100,
            ttl_seconds: 3600,
            enabled: true,
        }
    }

    /// Set maximum number of entries
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    /// Set entry lifetime, rounded up to whole seconds
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        let partial = u64::from(ttl.subsec_nanos() > 0);
        self.ttl_seconds = ttl.as_secs().saturating_add(partial);
        self
    }

    /// Set whether the cache starts enabled
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of cache state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStatistics {
    pub total_entries: usize,
    pub max_entries: usize,
    pub ttl_seconds: u64,
    pub hits: u64,
    pub misses: u64,
}

/// Cache key derived from provider id, prompt and canonical parameters
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    provider_id: String,
    prompt: String,
    parameters: String,
}

impl CacheKey {
    /// Build a key. Parameter order never affects the key.
    pub fn new(provider_id: &str, prompt: &str, parameters: &Parameters) -> Self {
        let mut canonical = String::new();
        write_map(&mut canonical, parameters.iter());
        Self {
            provider_id: provider_id.to_string(),
            prompt: prompt.to_string(),
            parameters: canonical,
        }
    }

    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }
}

fn write_map<'a>(
    out: &mut String,
    entries: impl Iterator<Item = (&'a String, &'a RecursiveValue)>,
) {
    out.push('{');
    for (i, (key, value)) in entries.enumerate() {
        if i > 0 {
            out.push(',');
        }
        let _ = write!(out, "{:?}:", key);
        write_value(out, value);
    }
    out.push('}');
}

fn write_value(out: &mut String, value: &RecursiveValue) {
    match value {
        RecursiveValue::Null => out.push_str("null"),
        RecursiveValue::Bool(b) => {
            let _ = write!(out, "{}", b);
        }
        RecursiveValue::Int(i) => {
            let _ = write!(out, "i{}", i);
        }
        // Bit pattern keeps NaN and -0.0 distinct and stable.
        RecursiveValue::Double(d) => {
            let _ = write!(out, "d{:016x}", d.to_bits());
        }
        RecursiveValue::String(s) => {
            let _ = write!(out, "{:?}", s);
        }
        RecursiveValue::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(out, item);
            }
            out.push(']');
        }
        RecursiveValue::Map(map) => write_map(out, map.iter()),
    }
}

#[derive(Debug)]
struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
    generation: u64,
}

#[derive(Debug)]
struct CacheState<V> {
    entries: HashMap<CacheKey, CacheEntry<V>>,
    // Insertion log; items whose generation no longer matches the live entry are stale.
    order: VecDeque<(CacheKey, u64)>,
    next_generation: u64,
    enabled: bool,
    hits: u64,
    misses: u64,
}

impl<V> CacheState<V> {
    fn remove_where(&mut self, mut predicate: impl FnMut(&CacheKey) -> bool) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| !predicate(key));
        let removed = before - self.entries.len();
        if removed > 0 {
            self.compact();
        }
        removed
    }

    fn evict_oldest(&mut self) -> Option<CacheKey> {
        while let Some((key, generation)) = self.order.pop_front() {
            let live = self
                .entries
                .get(&key)
                .is_some_and(|entry| entry.generation == generation);
            if live {
                self.entries.remove(&key);
                return Some(key);
            }
        }
        None
    }

    fn compact(&mut self) {
        let entries = &self.entries;
        self.order.retain(|(key, generation)| {
            entries
                .get(key)
                .is_some_and(|entry| entry.generation == *generation)
        });
    }
}

/// Bounded, expiring response cache.
///
/// Generic over the cached value so callers can store whole generations or
/// just content.
#[derive(Debug)]
pub struct ResponseCache<V> {
    config: CacheConfig,
    state: Mutex<CacheState<V>>,
}

impl<V: Clone + Send> ResponseCache<V> {
    /// Create a cache with the default configuration
    pub fn new() -> Self {
        Self::with_config(CacheConfig::default())
    }

    /// Create a cache with a custom configuration
    pub fn with_config(config: CacheConfig) -> Self {
        let enabled = config.enabled;
        Self {
            config,
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                order: VecDeque::new(),
                next_generation: 0,
                enabled,
                hits: 0,
                misses: 0,
            }),
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Look up a cached value. Expired entries are removed and reported as misses.
    pub async fn get(&self, provider_id: &str, prompt: &str, parameters: &Parameters) -> Option<V> {
        let key = CacheKey::new(provider_id, prompt, parameters);
        let mut state = self.state.lock().await;
        if !state.enabled {
            return None;
        }

        let ttl = self.config.ttl();
        let expired = state
            .entries
            .get(&key)
            .map(|entry| entry.inserted_at.elapsed() >= ttl);

        let Some(expired) = expired else {
            state.misses += 1;
            return None;
        };

        if expired {
            tracing::debug!(
                "[Cache] expired entry: provider={}, prompt_len={}",
                provider_id,
                prompt.len()
            );
            state.entries.remove(&key);
            state.misses += 1;
            return None;
        }

        state.hits += 1;
        state.entries.get(&key).map(|entry| entry.value.clone())
    }

    /// Store a value, evicting the oldest insertion if the cache is full
    pub async fn set(&self, value: V, provider_id: &str, prompt: &str, parameters: &Parameters) {
        let key = CacheKey::new(provider_id, prompt, parameters);
        let mut state = self.state.lock().await;
        if !state.enabled || self.config.max_entries == 0 {
            return;
        }

        if !state.entries.contains_key(&key) && state.entries.len() >= self.config.max_entries {
            if let Some(evicted) = state.evict_oldest() {
                tracing::debug!(
                    "[Cache] evicted oldest entry: provider={}",
                    evicted.provider_id()
                );
            }
        }

        let generation = state.next_generation;
        state.next_generation += 1;
        state.entries.insert(
            key.clone(),
            CacheEntry {
                value,
                inserted_at: Instant::now(),
                generation,
            },
        );
        state.order.push_back((key, generation));

        if state.order.len() > self.config.max_entries.saturating_mul(2) {
            state.compact();
        }
    }

    /// Remove every entry produced by a provider, returning how many were removed
    pub async fn invalidate_provider(&self, provider_id: &str) -> usize {
        let mut state = self.state.lock().await;
        state.remove_where(|key| key.provider_id == provider_id)
    }

    /// Remove every entry for a prompt across providers, returning how many were removed
    pub async fn invalidate_prompt(&self, prompt: &str) -> usize {
        let mut state = self.state.lock().await;
        state.remove_where(|key| key.prompt == prompt)
    }

    /// Remove expired entries eagerly, returning how many were removed
    pub async fn purge_expired(&self) -> usize {
        let ttl = self.config.ttl();
        let mut state = self.state.lock().await;
        let before = state.entries.len();
        state.entries.retain(|_, entry| entry.inserted_at.elapsed() < ttl);
        let removed = before - state.entries.len();
        if removed > 0 {
            state.compact();
        }
        removed
    }

    /// Remove all entries
    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        state.entries.clear();
        state.order.clear();
    }

    /// Number of entries currently held, including expired ones not yet purged
    pub async fn count(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    /// Enable or disable the cache. Disabling drops every entry.
    pub async fn set_enabled(&self, enabled: bool) {
        let mut state = self.state.lock().await;
        if !enabled {
            state.entries.clear();
            state.order.clear();
        }
        state.enabled = enabled;
    }

    /// Whether the cache is currently enabled
    pub async fn is_enabled(&self) -> bool {
        self.state.lock().await.enabled
    }

    /// Get a statistics snapshot
    pub async fn statistics(&self) -> CacheStatistics {
        let state = self.state.lock().await;
        CacheStatistics {
            total_entries: state.entries.len(),
            max_entries: self.config.max_entries,
            ttl_seconds: self.config.ttl_seconds,
            hits: state.hits,
            misses: state.misses,
        }
    }
}

impl<V: Clone + Send> Default for ResponseCache<V> {
    fn default() -> Self {
        Self::new()
    }
}
