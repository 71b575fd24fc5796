//! User override model: decay-weighted record of candidate corrections.
//!
//! Every accepted correction appends an event for `(context_key, candidate)`.
//! Readers never see individual events; `score` folds all events of a pair
//! into one weight using exponential decay of event age plus a frequency term
//! (see [`LearningSettings`](crate::settings::LearningSettings)).

mod persistence;

pub use persistence::{LoadOutcome, StoreError};

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::settings::settings;

const SECONDS_PER_HOUR: f64 = 3600.0;

/// One recorded user decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverrideEvent {
    pub context_key: String,
    pub candidate: String,
    /// Seconds since the Unix epoch.
    pub timestamp: u64,
    pub weight: f64,
}

/// Effective score of one candidate for a context.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredCandidate {
    pub candidate: String,
    pub weight: f64,
    pub last_used: u64,
}

/// `(timestamp, weight)` pairs, oldest first.
#[derive(Debug, Clone, Default)]
struct PairHistory {
    events: Vec<(u64, f64)>,
}

impl PairHistory {
    fn push(&mut self, timestamp: u64, weight: f64, cap: usize) {
        let pos = self.events.partition_point(|(t, _)| *t <= timestamp);
        self.events.insert(pos, (timestamp, weight));
        if self.events.len() > cap {
            let excess = self.events.len() - cap;
            self.events.drain(..excess);
        }
    }

    fn last_used(&self) -> u64 {
        self.events.last().map_or(0, |(t, _)| *t)
    }

    fn score(&self, now: u64) -> f64 {
        let s = &settings().learning;
        let decayed: f64 = self.events.iter().map(|(t, w)| w * decay(*t, now)).sum();
        let n = self.events.len().max(1) as f64;
        decayed * (1.0 + s.frequency_weight * n.ln())
    }
}

pub fn now_epoch() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// `0.5^(age / half_life)`; future timestamps count as age zero.
fn decay(timestamp: u64, now: u64) -> f64 {
    let hours = now.saturating_sub(timestamp) as f64 / SECONDS_PER_HOUR;
    0.5f64.powf(hours / settings().learning.half_life_hours)
}

/// A context key is single-unit when it holds exactly one reading.
fn is_unigram_key(context_key: &str) -> bool {
    context_key.split_whitespace().count() == 1
}

/// context_key -> candidate -> history
type PairMap = HashMap<String, HashMap<String, PairHistory>>;

/// Evict lowest-score pairs when exceeding capacity.
///
/// Among equal scores the least recently used pair goes first, then the
/// lexically smallest `(context, candidate)`.
fn evict_pairs(map: &mut PairMap, max: usize, now: u64) {
    let count: usize = map.values().map(|inner| inner.len()).sum();
    if count <= max {
        return;
    }
    let mut all: Vec<(f64, u64, &str, &str)> = Vec::with_capacity(count);
    for (context, inner) in map.iter() {
        for (candidate, history) in inner {
            all.push((history.score(now), history.last_used(), context, candidate));
        }
    }
    let to_remove = count - max;
    all.select_nth_unstable_by(to_remove - 1, |a, b| {
        a.0.total_cmp(&b.0)
            .then(a.1.cmp(&b.1))
            .then_with(|| a.2.cmp(b.2))
            .then_with(|| a.3.cmp(b.3))
    });
    let victims: Vec<(String, String)> = all[..to_remove]
        .iter()
        .map(|(_, _, context, candidate)| (context.to_string(), candidate.to_string()))
        .collect();
    for (context, candidate) in victims {
        if let Some(inner) = map.get_mut(&context) {
            inner.remove(&candidate);
            if inner.is_empty() {
                map.remove(&context);
            }
        }
    }
}

/// Decay-weighted event log for one locale variant.
///
/// Recording takes a short write lock and never touches the disk. Saving
/// clones a snapshot under a read lock and serializes outside it, so events
/// recorded while a save is in flight are kept for the next save. A per-store
/// mutex keeps saves of the same store from overlapping.
pub struct OverrideStore {
    pairs: RwLock<PairMap>,
    data_path: Option<PathBuf>,
    save_lock: Mutex<()>,
}

impl OverrideStore {
    /// A store that persists to `data_path` on `save` and after bleaching.
    pub fn new(data_path: PathBuf) -> Self {
        Self {
            pairs: RwLock::new(HashMap::new()),
            data_path: Some(data_path),
            save_lock: Mutex::new(()),
        }
    }

    /// A throwaway store that never persists.
    pub fn ephemeral() -> Self {
        Self {
            pairs: RwLock::new(HashMap::new()),
            data_path: None,
            save_lock: Mutex::new(()),
        }
    }

    pub fn data_path(&self) -> Option<&Path> {
        self.data_path.as_deref()
    }

    pub fn record_override(&self, context_key: &str, candidate: &str, at: u64) {
        self.record_weighted(context_key, candidate, at, 1.0);
    }

    pub fn record_weighted(&self, context_key: &str, candidate: &str, at: u64, weight: f64) {
        if context_key.is_empty() || candidate.is_empty() {
            return;
        }
        let s = &settings().learning;
        let mut pairs = self.pairs.write().unwrap();
        pairs
            .entry(context_key.to_string())
            .or_default()
            .entry(candidate.to_string())
            .or_default()
            .push(at, weight, s.max_events_per_pair);
        evict_pairs(&mut pairs, s.max_pairs, at);
    }

    /// Candidates learned for `context_key`, best first.
    ///
    /// Equal weights fall back to the most recent event, then to the
    /// candidate text, so identical logs always order identically.
    pub fn score(&self, context_key: &str, now: u64) -> Vec<ScoredCandidate> {
        let pairs = self.pairs.read().unwrap();
        let Some(inner) = pairs.get(context_key) else {
            return Vec::new();
        };
        let mut scored: Vec<ScoredCandidate> = inner
            .iter()
            .map(|(candidate, history)| ScoredCandidate {
                candidate: candidate.clone(),
                weight: history.score(now),
                last_used: history.last_used(),
            })
            .collect();
        scored.sort_by(|a, b| {
            b.weight
                .partial_cmp(&a.weight)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.last_used.cmp(&a.last_used))
                .then(a.candidate.cmp(&b.candidate))
        });
        scored
    }

    /// Best learned candidate for `context_key`, if any.
    pub fn suggest(&self, context_key: &str, now: u64) -> Option<ScoredCandidate> {
        self.score(context_key, now).into_iter().next()
    }

    /// Number of `(context, candidate)` pairs.
    pub fn len(&self) -> usize {
        self.pairs.read().unwrap().values().map(|m| m.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every context with at least one learned candidate, sorted.
    pub fn context_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.pairs.read().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Remove every pair whose candidate is in `targets`, then persist.
    /// Returns the number of pairs removed.
    pub fn bleach(&self, targets: &[&str]) -> usize {
        let removed = self.retain_pairs(|_, candidate| !targets.contains(&candidate));
        if removed > 0 {
            debug!(removed, "bleached override suggestions");
            self.persist();
        }
        removed
    }

    /// Remove overrides of single-unit contexts, keeping phrase overrides.
    pub fn bleach_all_unigrams(&self) -> usize {
        let removed = self.retain_pairs(|context, _| !is_unigram_key(context));
        if removed > 0 {
            debug!(removed, "bleached unigram overrides");
            self.persist();
        }
        removed
    }

    fn retain_pairs(&self, mut keep: impl FnMut(&str, &str) -> bool) -> usize {
        let mut pairs = self.pairs.write().unwrap();
        let before: usize = pairs.values().map(|m| m.len()).sum();
        pairs.retain(|context, inner| {
            inner.retain(|candidate, _| keep(context, candidate));
            !inner.is_empty()
        });
        let after: usize = pairs.values().map(|m| m.len()).sum();
        before - after
    }

    /// Save to the store's own path; failures are logged, not returned.
    pub fn persist(&self) {
        if let Some(path) = &self.data_path {
            if let Err(e) = self.save_data(path) {
                warn!(path = %path.display(), error = %e, "failed to persist override data");
            }
        }
    }

    /// Drop all in-memory events.
    fn reset(&self) {
        self.pairs.write().unwrap().clear();
    }

    /// Flatten to events, sorted for stable serialization.
    fn snapshot(&self) -> Vec<OverrideEvent> {
        let pairs = self.pairs.read().unwrap();
        let mut events = Vec::new();
        for (context, inner) in pairs.iter() {
            for (candidate, history) in inner {
                for (timestamp, weight) in &history.events {
                    events.push(OverrideEvent {
                        context_key: context.clone(),
                        candidate: candidate.clone(),
                        timestamp: *timestamp,
                        weight: *weight,
                    });
                }
            }
        }
        drop(pairs);
        events.sort_by(|a, b| {
            (&a.context_key, &a.candidate, a.timestamp).cmp(&(&b.context_key, &b.candidate, b.timestamp))
        });
        events
    }

    fn replace_with(&self, events: Vec<OverrideEvent>) {
        let cap = settings().learning.max_events_per_pair;
        let mut map: PairMap = HashMap::new();
        for ev in events {
            map.entry(ev.context_key)
                .or_default()
                .entry(ev.candidate)
                .or_default()
                .push(ev.timestamp, ev.weight, cap);
        }
        *self.pairs.write().unwrap() = map;
    }
}
