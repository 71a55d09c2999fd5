//! Background derivations keyed by fingerprint
//!
//! Expensive derived artifacts (recovery summaries, training insights) are
//! computed off the async runtime and cached by `(fingerprint, kind)`. Results
//! arrive on a channel tagged with the fingerprint they were computed for, so
//! a requester that fired several overlapping requests keeps only the answer
//! to its latest one.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::config::SyncSettings;
use crate::error::{Error, Result};
use crate::fingerprint::Fingerprint;

/// Kind of derived artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DerivationKind {
    MuscleRecovery,
    WorkoutInsight,
    SleepInsight,
    RecoveryInsight,
}

impl DerivationKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MuscleRecovery => "muscle_recovery",
            Self::WorkoutInsight => "workout_insight",
            Self::SleepInsight => "sleep_insight",
            Self::RecoveryInsight => "recovery_insight",
        }
    }
}

impl fmt::Display for DerivationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
struct CacheEntry<T> {
    value: T,
    computed_at: DateTime<Utc>,
    source_count: u64,
}

/// Derived artifacts by `(fingerprint, kind)`.
///
/// An entry is served while it is younger than the freshness window and no
/// new source records appeared since it was computed.
#[derive(Debug, Clone)]
pub struct InsightCache<T> {
    entries: HashMap<(Fingerprint, DerivationKind), CacheEntry<T>>,
    freshness: Duration,
}

impl<T: Clone> InsightCache<T> {
    pub fn new(freshness: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            freshness,
        }
    }

    /// A fresh artifact, if any
    pub fn get(
        &self,
        fingerprint: &Fingerprint,
        kind: DerivationKind,
        source_count: u64,
        now: DateTime<Utc>,
    ) -> Option<T> {
        self.entries
            .get(&(fingerprint.clone(), kind))
            .filter(|entry| {
                now.signed_duration_since(entry.computed_at) < self.freshness
                    && source_count <= entry.source_count
            })
            .map(|entry| entry.value.clone())
    }

    pub fn insert(
        &mut self,
        fingerprint: Fingerprint,
        kind: DerivationKind,
        value: T,
        source_count: u64,
        now: DateTime<Utc>,
    ) {
        self.entries.insert(
            (fingerprint, kind),
            CacheEntry {
                value,
                computed_at: now,
                source_count,
            },
        );
    }

    /// Drop entries past the freshness window; returns how many were removed
    pub fn evict_expired(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        let freshness = self.freshness;
        self.entries
            .retain(|_, entry| now.signed_duration_since(entry.computed_at) < freshness);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A finished derivation
#[derive(Debug)]
pub struct InsightMessage<T> {
    pub fingerprint: Fingerprint,
    pub kind: DerivationKind,
    pub result: Result<T>,
}

/// Outcome of `BackgroundOrchestrator::request`
#[derive(Debug, Clone, PartialEq)]
pub enum InsightRequest<T> {
    /// Served from cache; no message follows
    Cached(T),
    /// Computation started; the result arrives on the receiver
    Dispatched,
}

type LatestRequests = Arc<Mutex<HashMap<DerivationKind, Fingerprint>>>;

/// Dispatches derivations to blocking workers and caches their results
pub struct BackgroundOrchestrator<T> {
    cache: Arc<Mutex<InsightCache<T>>>,
    latest: LatestRequests,
    event_tx: mpsc::Sender<InsightMessage<T>>,
}

impl<T> Clone for BackgroundOrchestrator<T> {
    fn clone(&self) -> Self {
        Self {
            cache: Arc::clone(&self.cache),
            latest: Arc::clone(&self.latest),
            event_tx: self.event_tx.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> BackgroundOrchestrator<T> {
    /// Create an orchestrator and the receiver its results arrive on
    pub fn new(settings: &SyncSettings) -> (Self, InsightReceiver<T>) {
        let (event_tx, event_rx) = mpsc::channel(64);
        let latest = LatestRequests::default();
        let orchestrator = Self {
            cache: Arc::new(Mutex::new(InsightCache::new(settings.insight_freshness))),
            latest: Arc::clone(&latest),
            event_tx,
        };
        (orchestrator, InsightReceiver { event_rx, latest })
    }

    /// Return the cached artifact or start computing it.
    ///
    /// `source_count` is the number of source records the derivation reads;
    /// a cached entry computed over fewer records is stale. Must be called
    /// from within a tokio runtime.
    pub fn request<F>(
        &self,
        fingerprint: Fingerprint,
        kind: DerivationKind,
        source_count: u64,
        compute: F,
    ) -> InsightRequest<T>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(kind, fingerprint.clone());

        let cached = self
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&fingerprint, kind, source_count, Utc::now());
        if let Some(value) = cached {
            tracing::debug!(kind = %kind, fingerprint = %fingerprint, "Insight cache hit");
            return InsightRequest::Cached(value);
        }

        let cache = Arc::clone(&self.cache);
        let event_tx = self.event_tx.clone();
        tokio::spawn(async move {
            let result = match tokio::task::spawn_blocking(compute).await {
                Ok(result) => result,
                Err(error) => Err(Error::Background(error.to_string())),
            };

            match &result {
                Ok(value) => {
                    cache.lock().unwrap_or_else(PoisonError::into_inner).insert(
                        fingerprint.clone(),
                        kind,
                        value.clone(),
                        source_count,
                        Utc::now(),
                    );
                }
                Err(error) => tracing::warn!(kind = %kind, "Derivation failed: {error}"),
            }

            let _ = event_tx
                .send(InsightMessage {
                    fingerprint,
                    kind,
                    result,
                })
                .await;
        });

        InsightRequest::Dispatched
    }

    /// Drop expired cache entries
    pub fn evict_expired(&self) -> usize {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .evict_expired(Utc::now())
    }
}

/// Receiving end for finished derivations
pub struct InsightReceiver<T> {
    event_rx: mpsc::Receiver<InsightMessage<T>>,
    latest: LatestRequests,
}

impl<T> InsightReceiver<T> {
    /// Next message, stale or not; `None` once every orchestrator is dropped
    pub async fn recv(&mut self) -> Option<InsightMessage<T>> {
        self.event_rx.recv().await
    }

    /// The message's result when it answers the latest request for its kind
    pub fn accept(&self, message: InsightMessage<T>) -> Option<Result<T>> {
        let latest = self.latest.lock().unwrap_or_else(PoisonError::into_inner);
        if latest.get(&message.kind) == Some(&message.fingerprint) {
            Some(message.result)
        } else {
            tracing::debug!(
                kind = %message.kind,
                fingerprint = %message.fingerprint,
                "Discarding stale insight"
            );
            None
        }
    }

    /// Wait for the next message that answers a latest request
    pub async fn next_current(&mut self) -> Option<(DerivationKind, Result<T>)> {
        while let Some(message) = self.recv().await {
            let kind = message.kind;
            if let Some(result) = self.accept(message) {
                return Some((kind, result));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::Fingerprinter;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fingerprint(identity: &str) -> Fingerprint {
        Fingerprinter::new().record(identity, 1).finish()
    }

    fn orchestrator() -> (BackgroundOrchestrator<String>, InsightReceiver<String>) {
        BackgroundOrchestrator::new(&SyncSettings::default())
    }

    #[test]
    fn cache_expires_after_freshness_window() {
        let mut cache = InsightCache::new(Duration::hours(24));
        let key = fingerprint("w1");
        let now = Utc::now();
        cache.insert(key.clone(), DerivationKind::WorkoutInsight, "ok", 3, now);

        let later = now + Duration::hours(23);
        assert_eq!(
            cache.get(&key, DerivationKind::WorkoutInsight, 3, later),
            Some("ok")
        );
        let expired = now + Duration::hours(24);
        assert_eq!(cache.get(&key, DerivationKind::WorkoutInsight, 3, expired), None);
        assert_eq!(cache.evict_expired(expired), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn new_source_records_invalidate_entry() {
        let mut cache = InsightCache::new(Duration::hours(24));
        let key = fingerprint("w1");
        let now = Utc::now();
        cache.insert(key.clone(), DerivationKind::MuscleRecovery, 1, 5, now);

        assert_eq!(cache.get(&key, DerivationKind::MuscleRecovery, 5, now), Some(1));
        assert_eq!(cache.get(&key, DerivationKind::MuscleRecovery, 6, now), None);
    }

    #[test]
    fn kinds_do_not_share_entries() {
        let mut cache = InsightCache::new(Duration::hours(24));
        let key = fingerprint("w1");
        let now = Utc::now();
        cache.insert(key.clone(), DerivationKind::SleepInsight, 1, 0, now);
        assert_eq!(cache.get(&key, DerivationKind::RecoveryInsight, 0, now), None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn second_request_is_served_from_cache() {
        let (orchestrator, mut receiver) = orchestrator();
        let calls = Arc::new(AtomicUsize::new(0));
        let key = fingerprint("w1");

        let counter = Arc::clone(&calls);
        let first = orchestrator.request(key.clone(), DerivationKind::WorkoutInsight, 2, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok("push more".to_string())
        });
        assert_eq!(first, InsightRequest::Dispatched);
        let (kind, result) = receiver.next_current().await.unwrap();
        assert_eq!(kind, DerivationKind::WorkoutInsight);
        assert_eq!(result.unwrap(), "push more");

        let counter = Arc::clone(&calls);
        let second = orchestrator.request(key, DerivationKind::WorkoutInsight, 2, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok("recomputed".to_string())
        });
        assert_eq!(second, InsightRequest::Cached("push more".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stale_answers_are_discarded() {
        let (orchestrator, mut receiver) = orchestrator();
        let old = fingerprint("w1");
        let new = fingerprint("w2");

        orchestrator.request(old.clone(), DerivationKind::MuscleRecovery, 1, || {
            Ok("old".to_string())
        });
        let stale = receiver.recv().await.unwrap();
        assert_eq!(stale.fingerprint, old);

        orchestrator.request(new.clone(), DerivationKind::MuscleRecovery, 1, || {
            Ok("new".to_string())
        });
        assert!(receiver.accept(stale).is_none());

        let current = receiver.recv().await.unwrap();
        assert_eq!(current.fingerprint, new);
        assert_eq!(receiver.accept(current).unwrap().unwrap(), "new");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failures_are_delivered_and_not_cached() {
        let (orchestrator, mut receiver) = orchestrator();
        let key = fingerprint("w1");

        orchestrator.request(key.clone(), DerivationKind::SleepInsight, 0, || {
            Err(Error::InvalidInput("no sleep data".to_string()))
        });
        let (_, result) = receiver.next_current().await.unwrap();
        assert!(matches!(result, Err(Error::InvalidInput(_))));

        let retry = orchestrator.request(key, DerivationKind::SleepInsight, 0, || {
            Ok("rested".to_string())
        });
        assert_eq!(retry, InsightRequest::Dispatched);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn panicking_derivation_reports_background_error() {
        let (orchestrator, mut receiver) = orchestrator();
        orchestrator.request(fingerprint("w1"), DerivationKind::RecoveryInsight, 0, || {
            panic!("formula blew up")
        });
        let (_, result) = receiver.next_current().await.unwrap();
        assert!(matches!(result, Err(Error::Background(_))));
    }
}
