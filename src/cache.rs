//! Per-environment engine instance cache.
//!
//! Each deployment family gets at most one live engine per process,
//! constructed lazily on first request by a caller-supplied factory. The
//! cache is an explicitly constructed value: callers create one at
//! process start and pass it to request handlers, which keeps tests free
//! of hidden cross-test state.
//!
//! Construction is strictly once per key: the cache holds its lock across
//! the factory call, so parallel first accesses for the same key never
//! build two engines. The cost is that a slow factory blocks the cache
//! for the duration of one construction per key per process.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::debug;

use crate::engine::Engine;
use crate::error::RulesResult;

/// A get-or-create cache of engine instances keyed by environment.
///
/// Generic over the key so tests and ad-hoc tenants can use any hashable
/// key; production code uses [`crate::Environment`].
///
/// # Examples
///
/// ```
/// use carbon_rules::{Engine, EngineCache, Environment, RuleGraph};
///
/// let cache = EngineCache::new();
/// let engine = cache
///     .get_or_create(Environment::Bc, || {
///         let graph = RuleGraph::from_json(r#"{ "input": 0, "total": "input + 10" }"#)?;
///         Ok(Engine::new(graph))
///     })
///     .unwrap();
/// assert!(engine.graph().contains("total"));
/// ```
#[derive(Debug)]
pub struct EngineCache<K = crate::Environment> {
    entries: Mutex<HashMap<K, Arc<Engine>>>,
}

impl<K> Default for EngineCache<K> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<K> EngineCache<K>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
{
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // A panic inside a factory poisons the lock but never the map:
    // insertion happens only after the factory returns. Every accessor
    // recovers the guard, so a crashed construction attempt does not
    // disable the cache.
    fn entries(&self) -> MutexGuard<'_, HashMap<K, Arc<Engine>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the cached engine for `key`, constructing it with
    /// `factory` on first access.
    ///
    /// The factory is invoked at most once per distinct key for the
    /// lifetime of the cache. A factory error propagates to the caller
    /// and leaves the key unpopulated, so a subsequent call retries.
    pub fn get_or_create<F>(&self, key: K, factory: F) -> RulesResult<Arc<Engine>>
    where
        F: FnOnce() -> RulesResult<Engine>,
    {
        let mut entries = self.entries();

        if let Some(engine) = entries.get(&key) {
            return Ok(Arc::clone(engine));
        }

        debug!("engine cache miss for {key:?}, constructing");
        let engine = Arc::new(factory()?);
        let _ = entries.insert(key, Arc::clone(&engine));
        Ok(engine)
    }

    /// Returns the cached engine for `key` without constructing.
    pub fn get(&self, key: &K) -> Option<Arc<Engine>> {
        self.entries().get(key).map(Arc::clone)
    }

    /// Returns true if an engine is cached for `key`.
    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        self.entries().contains_key(key)
    }

    /// Number of cached engines.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    /// Returns true if no engine has been constructed yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the keys with a live engine.
    #[must_use]
    pub fn keys(&self) -> Vec<K> {
        self.entries().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::error::ConstructionError;
    use crate::rule::RuleGraph;
    use crate::Environment;

    fn bc_engine() -> RulesResult<Engine> {
        let graph = RuleGraph::from_json(r#"{ "input": 0, "total": "input + 10" }"#)?;
        Ok(Engine::new(graph))
    }

    #[test]
    fn factory_runs_exactly_once_per_key() {
        let cache: EngineCache<Environment> = EngineCache::new();
        let calls = AtomicUsize::new(0);

        let first = cache
            .get_or_create(Environment::Bc, || {
                let _ = calls.fetch_add(1, Ordering::SeqCst);
                bc_engine()
            })
            .unwrap();
        let second = cache
            .get_or_create(Environment::Bc, || {
                let _ = calls.fetch_add(1, Ordering::SeqCst);
                bc_engine()
            })
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn distinct_keys_get_distinct_instances() {
        let cache: EngineCache<Environment> = EngineCache::new();
        let bc = cache.get_or_create(Environment::Bc, bc_engine).unwrap();
        let cut = cache.get_or_create(Environment::Cut, bc_engine).unwrap();
        assert!(!Arc::ptr_eq(&bc, &cut));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn factory_error_leaves_key_unpopulated() {
        let cache: EngineCache<Environment> = EngineCache::new();

        let err = cache
            .get_or_create(Environment::Tilt, || {
                Err(ConstructionError::BundleRead {
                    message: "bundle missing".to_string(),
                }
                .into())
            })
            .unwrap_err();
        assert!(err.is_construction());
        assert!(!cache.contains(&Environment::Tilt));

        // Retry with a working factory succeeds.
        let engine = cache.get_or_create(Environment::Tilt, bc_engine).unwrap();
        assert!(engine.graph().contains("total"));
        assert!(cache.contains(&Environment::Tilt));
    }

    #[test]
    fn get_does_not_construct() {
        let cache: EngineCache<Environment> = EngineCache::new();
        assert!(cache.get(&Environment::Bc).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn keys_reports_live_entries() {
        let cache: EngineCache<Environment> = EngineCache::new();
        let _ = cache.get_or_create(Environment::Bc, bc_engine).unwrap();
        let _ = cache.get_or_create(Environment::Clickson, bc_engine).unwrap();

        let mut keys = cache.keys();
        keys.sort_by_key(|k| k.to_string());
        assert_eq!(keys, vec![Environment::Bc, Environment::Clickson]);
    }

    #[test]
    fn cache_accepts_arbitrary_hashable_keys() {
        let cache: EngineCache<&str> = EngineCache::new();
        let a = cache.get_or_create("tenant-a", bc_engine).unwrap();
        let b = cache.get_or_create("tenant-b", bc_engine).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn cache_survives_factory_panic() {
        let cache: Arc<EngineCache<Environment>> = Arc::new(EngineCache::new());
        let _ = cache.get_or_create(Environment::Bc, bc_engine).unwrap();

        let poisoner = Arc::clone(&cache);
        let result = std::thread::spawn(move || {
            let _ = poisoner.get_or_create(Environment::Cut, || -> RulesResult<Engine> {
                panic!("bundle load blew up")
            });
        })
        .join();
        assert!(result.is_err());

        // The map was untouched by the failed construction and every
        // accessor still works, including a retry for the same key.
        assert!(cache.contains(&Environment::Bc));
        assert_eq!(cache.len(), 1);
        assert!(cache.get(&Environment::Cut).is_none());
        let cut = cache.get_or_create(Environment::Cut, bc_engine).unwrap();
        assert!(cut.graph().contains("total"));
    }

    #[test]
    fn concurrent_first_access_constructs_once() {
        let cache: Arc<EngineCache<Environment>> = Arc::new(EngineCache::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let calls = Arc::clone(&calls);
                std::thread::spawn(move || {
                    cache
                        .get_or_create(Environment::Bc, || {
                            let _ = calls.fetch_add(1, Ordering::SeqCst);
                            bc_engine()
                        })
                        .unwrap()
                })
            })
            .collect();

        let engines: Vec<Arc<Engine>> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        for engine in &engines[1..] {
            assert!(Arc::ptr_eq(&engines[0], engine));
        }
    }
}
