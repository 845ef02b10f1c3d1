//! Get-or-build memoization over a persistent key-value store.
//!
//! Entries are keyed by an explicit, versioned [`CacheKey`] built per use
//! site, and hold the JSON encoding of the fully built value. Entries are
//! never invalidated: staleness is the caller's concern. Two callers racing
//! on the same missing key may both build; the last write wins and both see
//! equal values as long as the builder is pure.

use crate::domain::error::LowvolError;
use crate::ports::cache_port::KeyValueStore;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt::{self, Debug, Display, Write as _};
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(namespace: &str, version: u32) -> Self {
        CacheKey(format!("{namespace}/v{version}"))
    }

    pub fn param(mut self, name: &str, value: impl Display) -> Self {
        let _ = write!(self.0, "/{name}={value}");
        self
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

type KeyFn<P> = Box<dyn Fn(&P) -> CacheKey + Send + Sync>;

pub struct MemoizingCache<P, T> {
    store: Arc<dyn KeyValueStore>,
    key_fn: KeyFn<P>,
    _value: PhantomData<fn() -> T>,
}

impl<P: Debug + 'static, T> MemoizingCache<P, T> {
    /// Key on the debug rendering of the parameters under `namespace`.
    pub fn with_default_key(store: Arc<dyn KeyValueStore>, namespace: &'static str) -> Self {
        Self {
            store,
            key_fn: Box::new(move |params: &P| {
                CacheKey::new(namespace, 1).param("params", format!("{params:?}"))
            }),
            _value: PhantomData,
        }
    }
}

impl<P, T> MemoizingCache<P, T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        key_fn: impl Fn(&P) -> CacheKey + Send + Sync + 'static,
    ) -> Self {
        Self {
            store,
            key_fn: Box::new(key_fn),
            _value: PhantomData,
        }
    }

    pub fn key(&self, params: &P) -> CacheKey {
        (self.key_fn)(params)
    }

    /// Stored value for `params`, building and persisting it on a miss.
    /// A failed build stores nothing.
    pub fn get<F>(&self, params: &P, builder: F) -> Result<T, LowvolError>
    where
        F: FnOnce() -> Result<T, LowvolError>,
    {
        let key = self.key(params);
        if let Some(value) = self.lookup(&key)? {
            return Ok(value);
        }
        let value = builder()?;
        self.persist(&key, &value)?;
        Ok(value)
    }

    /// [`MemoizingCache::get`] with an asynchronous builder.
    pub async fn get_async<F, Fut>(&self, params: &P, builder: F) -> Result<T, LowvolError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, LowvolError>>,
    {
        let key = self.key(params);
        if let Some(value) = self.lookup(&key)? {
            return Ok(value);
        }
        let value = builder().await?;
        self.persist(&key, &value)?;
        Ok(value)
    }

    fn lookup(&self, key: &CacheKey) -> Result<Option<T>, LowvolError> {
        let Some(raw) = self.store.get(key.as_str())? else {
            debug!("cache miss for {key}");
            return Ok(None);
        };
        debug!("cache hit for {key}");
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| LowvolError::Cache {
                key: key.to_string(),
                reason: format!("stored value does not decode: {e}"),
            })
    }

    fn persist(&self, key: &CacheKey, value: &T) -> Result<(), LowvolError> {
        let raw = serde_json::to_string(value).map_err(|e| LowvolError::Cache {
            key: key.to_string(),
            reason: format!("value does not encode: {e}"),
        })?;
        self.store.put(key.as_str(), &raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory_adapter::InMemoryStore;
    use std::cell::Cell;
    use std::collections::BTreeMap;

    fn store() -> Arc<InMemoryStore> {
        Arc::new(InMemoryStore::new())
    }

    #[test]
    fn key_is_versioned_and_named() {
        let key = CacheKey::new("volatility", 2)
            .param("as_of", "200712")
            .param("lookback", 18);
        assert_eq!(key.as_str(), "volatility/v2/as_of=200712/lookback=18");
    }

    #[test]
    fn builder_runs_once_per_key() {
        let cache: MemoizingCache<(u32, u32), BTreeMap<String, f64>> =
            MemoizingCache::new(store(), |(a, b)| {
                CacheKey::new("test", 1).param("a", a).param("b", b)
            });
        let calls = Cell::new(0);
        let build = || {
            calls.set(calls.get() + 1);
            Ok(BTreeMap::from([("IBM".to_string(), 0.012)]))
        };

        let first = cache.get(&(1, 2), build).unwrap();
        let second = cache.get(&(1, 2), build).unwrap();
        assert_eq!(first, second);
        assert_eq!(calls.get(), 1);

        cache.get(&(2, 1), build).unwrap();
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn failed_build_is_not_cached() {
        let cache: MemoizingCache<u32, Vec<u32>> =
            MemoizingCache::new(store(), |n| CacheKey::new("test", 1).param("n", n));
        let result = cache.get(&7, || {
            Err(LowvolError::DataSource {
                reason: "boom".into(),
            })
        });
        assert!(result.is_err());
        let value = cache.get(&7, || Ok(vec![7])).unwrap();
        assert_eq!(value, vec![7]);
    }

    #[test]
    fn entries_persist_across_cache_instances() {
        let shared = store();
        let first: MemoizingCache<u32, String> =
            MemoizingCache::new(shared.clone(), |n| CacheKey::new("test", 1).param("n", n));
        first.get(&1, || Ok("built".to_string())).unwrap();

        let second: MemoizingCache<u32, String> =
            MemoizingCache::new(shared, |n| CacheKey::new("test", 1).param("n", n));
        let value = second
            .get(&1, || Ok("rebuilt".to_string()))
            .unwrap();
        assert_eq!(value, "built");
    }

    #[test]
    fn default_key_uses_debug_rendering() {
        let cache: MemoizingCache<(&str, u32), u32> =
            MemoizingCache::with_default_key(store(), "screen");
        assert_eq!(
            cache.key(&("200712", 18)).as_str(),
            "screen/v1/params=(\"200712\", 18)"
        );
    }

    #[test]
    fn undecodable_entry_is_an_error() {
        let shared = store();
        shared.put("test/v1/n=1", "not json").unwrap();
        let cache: MemoizingCache<u32, Vec<u32>> =
            MemoizingCache::new(shared, |n| CacheKey::new("test", 1).param("n", n));
        let result = cache.get(&1, || Ok(vec![]));
        assert!(matches!(result, Err(LowvolError::Cache { .. })));
    }

    #[tokio::test]
    async fn async_builder_runs_once() {
        let cache: MemoizingCache<u32, u64> =
            MemoizingCache::new(store(), |n| CacheKey::new("test", 1).param("n", n));
        let first = cache.get_async(&3, || async { Ok(9) }).await.unwrap();
        let second = cache
            .get_async(&3, || async { Err(LowvolError::NotInitialized) })
            .await
            .unwrap();
        assert_eq!(first, 9);
        assert_eq!(second, 9);
    }
}
