//! TTL + LRU cache for distance matrices with per-key single-flight:
//! concurrent lookups for an absent fingerprint share one compute future, so
//! the provider is called exactly once per TTL window.

use std::{
    num::NonZeroUsize,
    sync::{Arc, Mutex},
    time::Duration,
};

use futures::{
    future::{BoxFuture, Shared},
    FutureExt,
};
use lru::LruCache;
use model::route_version::{Objective, Profile};
use tokio::time::Instant;

use crate::{
    config::MatrixCacheConfig,
    provider::{Matrix, Point, ProviderError},
};

/// A matrix plus where it came from. Cached and handed out as one unit so a
/// fallback-computed matrix keeps its warning attached.
#[derive(Debug, Clone)]
pub struct MatrixOutcome {
    pub matrix: Arc<Matrix>,
    pub provider_name: &'static str,
    pub warnings: Vec<String>,
}

type MatrixFuture = Shared<BoxFuture<'static, Result<MatrixOutcome, ProviderError>>>;

enum Entry {
    Ready {
        outcome: MatrixOutcome,
        computed_at: Instant,
    },
    Pending(MatrixFuture),
}

pub struct MatrixCache {
    entries: Mutex<LruCache<String, Entry>>,
    ttl: Duration,
}

impl MatrixCache {
    pub fn new(config: &MatrixCacheConfig) -> Self {
        let capacity =
            NonZeroUsize::new(config.max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl: Duration::from_secs(config.ttl_s),
        }
    }

    /// Stable cache key: coordinates rounded to six decimals in input order,
    /// plus profile and objective.
    pub fn fingerprint(points: &[Point], profile: Profile, objective: Objective) -> String {
        let coords = points
            .iter()
            .map(|p| format!("{:.6},{:.6}", p.lat, p.lon))
            .collect::<Vec<_>>()
            .join(";");
        format!("{}|{}|{}", coords, profile.as_str(), objective.as_str())
    }

    pub async fn get_or_compute(
        &self,
        key: String,
        compute: impl FnOnce() -> BoxFuture<'static, Result<MatrixOutcome, ProviderError>>,
    ) -> Result<MatrixOutcome, ProviderError> {
        enum Lookup {
            Hit(MatrixOutcome),
            Join(MatrixFuture),
            Miss,
        }

        let future = {
            let mut entries = self.entries.lock().expect("matrix cache lock poisoned");
            let lookup = match entries.get(&key) {
                Some(Entry::Ready {
                    outcome,
                    computed_at,
                }) if computed_at.elapsed() < self.ttl => Lookup::Hit(outcome.clone()),
                Some(Entry::Pending(future)) => Lookup::Join(future.clone()),
                _ => Lookup::Miss,
            };
            match lookup {
                Lookup::Hit(outcome) => return Ok(outcome),
                Lookup::Join(future) => future,
                Lookup::Miss => {
                    let future: MatrixFuture = compute().shared();
                    entries.put(key.clone(), Entry::Pending(future.clone()));
                    future
                }
            }
        };

        let result = future.await;

        let mut entries = self.entries.lock().expect("matrix cache lock poisoned");
        match &result {
            Ok(outcome) => {
                if matches!(entries.peek(&key), Some(Entry::Pending(_))) {
                    entries.put(
                        key,
                        Entry::Ready {
                            outcome: outcome.clone(),
                            computed_at: Instant::now(),
                        },
                    );
                }
            }
            Err(_) => {
                // Drop the failed pending entry so the next caller retries.
                if matches!(entries.peek(&key), Some(Entry::Pending(_))) {
                    entries.pop(&key);
                }
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures::FutureExt;

    use super::*;

    fn outcome() -> MatrixOutcome {
        MatrixOutcome {
            matrix: Arc::new(Matrix {
                distance: vec![vec![0.0]],
                duration: vec![vec![0.0]],
                geometry: None,
            }),
            provider_name: "test",
            warnings: Vec::new(),
        }
    }

    #[tokio::test]
    async fn concurrent_lookups_share_one_compute() {
        let cache = Arc::new(MatrixCache::new(&MatrixCacheConfig::default()));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute("key".to_owned(), move || {
                        async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(20)).await;
                            Ok(outcome())
                        }
                        .boxed()
                    })
                    .await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entries_are_recomputed() {
        let cache = MatrixCache::new(&MatrixCacheConfig {
            ttl_s: 300,
            max_entries: 8,
        });
        let calls = Arc::new(AtomicUsize::new(0));

        for advance in [false, true] {
            if advance {
                tokio::time::advance(Duration::from_secs(301)).await;
            }
            let calls = Arc::clone(&calls);
            cache
                .get_or_compute("key".to_owned(), move || {
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(outcome())
                    }
                    .boxed()
                })
                .await
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_computes_are_not_cached() {
        let cache = MatrixCache::new(&MatrixCacheConfig::default());

        let result = cache
            .get_or_compute("key".to_owned(), || {
                async { Err(ProviderError::Timeout) }.boxed()
            })
            .await;
        assert!(result.is_err());

        let result = cache
            .get_or_compute("key".to_owned(), || async { Ok(outcome()) }.boxed())
            .await;
        assert!(result.is_ok());
    }
}
