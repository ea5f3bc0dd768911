//! Cache-aside engine.
//!
//! Every store fault is absorbed here: reads degrade to a miss, writes and
//! deletes are logged and skipped. Each fault is counted with
//! [`MetricsRecorder::record_error`]. Only a `remember` factory's own error
//! reaches the caller.

use crate::key::KeyBuilder;
use crate::metrics::MetricsRecorder;
use crate::store::CacheStore;
use crate::tags::TagIndex;
use chrono::Utc;
use futures::future::join_all;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Per-write options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheOptions {
    /// Entry lifetime; falls back to the cache default.
    pub ttl: Option<Duration>,
    /// Tags the key is indexed under.
    pub tags: Vec<String>,
    /// Stores the value inside a [`VersionedEntry`] envelope.
    pub version: Option<String>,
}

impl CacheOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    #[must_use]
    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }
}

/// Envelope written when a version is supplied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionedEntry<T> {
    pub data: T,
    pub version: String,
    /// Milliseconds since the Unix epoch.
    pub cached_at: i64,
}

enum Lookup<T> {
    Hit(T, Duration),
    Miss,
    Fault,
}

/// Fail-open cache over a [`CacheStore`].
#[derive(Clone)]
pub struct Cache {
    store: Arc<dyn CacheStore>,
    tags: Arc<TagIndex>,
    metrics: Arc<MetricsRecorder>,
    default_ttl: Option<Duration>,
}

impl Cache {
    pub fn new(store: Arc<dyn CacheStore>, tags: Arc<TagIndex>, metrics: Arc<MetricsRecorder>) -> Self {
        Self {
            store,
            tags,
            metrics,
            default_ttl: None,
        }
    }

    /// TTL applied when a write does not specify one.
    #[must_use]
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    pub fn metrics(&self) -> &Arc<MetricsRecorder> {
        &self.metrics
    }

    pub fn tag_index(&self) -> &Arc<TagIndex> {
        &self.tags
    }

    async fn lookup<T: DeserializeOwned>(&self, key: &str) -> Lookup<T> {
        let started = Instant::now();

        let raw = match self.store.get(key).await {
            Ok(Some(raw)) if raw != "null" => raw,
            Ok(_) => return Lookup::Miss,
            Err(fault) => {
                warn!(key = %key, error = %fault, "Cache GET failed");
                self.metrics.record_error();
                return Lookup::Fault;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => Lookup::Hit(value, started.elapsed()),
            Err(e) => {
                warn!(key = %key, error = %e, "Cached value could not be decoded");
                self.metrics.record_error();
                Lookup::Fault
            }
        }
    }

    /// Returns the cached value, or `None` on a miss or a store fault.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.lookup(key).await {
            Lookup::Hit(value, elapsed) => {
                debug!(key = %key, "Cache HIT");
                self.metrics.record_hit(elapsed);
                Some(value)
            }
            Lookup::Miss => {
                debug!(key = %key, "Cache MISS");
                self.metrics.record_miss();
                None
            }
            Lookup::Fault => None,
        }
    }

    /// Reads a value written with a version.
    pub async fn get_versioned<T: DeserializeOwned>(&self, key: &str) -> Option<VersionedEntry<T>> {
        self.get(key).await
    }

    /// Writes a value; faults are logged and counted.
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, options: &CacheOptions) {
        let encoded = match &options.version {
            Some(version) => serde_json::to_string(&VersionedEntry {
                data: value,
                version: version.clone(),
                cached_at: Utc::now().timestamp_millis(),
            }),
            None => serde_json::to_string(value),
        };

        let encoded = match encoded {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!(key = %key, error = %e, "Cache value could not be encoded");
                self.metrics.record_error();
                return;
            }
        };

        let ttl = options.ttl.or(self.default_ttl);
        match self.store.set(key, &encoded, ttl).await {
            Ok(()) => {
                self.tags.tag(key, &options.tags);
                debug!(key = %key, ttl = ?ttl, tags = ?options.tags, "Cache SET");
            }
            Err(fault) => {
                warn!(key = %key, error = %fault, "Cache SET failed");
                self.metrics.record_error();
            }
        }
    }

    /// Deletes one key. Returns `true` if the store held it.
    pub async fn delete(&self, key: &str) -> bool {
        self.delete_many([key]).await > 0
    }

    /// Deletes keys concurrently and drops them from the tag index.
    ///
    /// The index is pruned even when the store call fails. Returns the
    /// number of keys the store reported as removed.
    pub async fn delete_many<I, K>(&self, keys: I) -> usize
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let keys: Vec<String> = keys.into_iter().map(|k| k.as_ref().to_string()).collect();
        if keys.is_empty() {
            return 0;
        }

        let results = join_all(keys.iter().map(|key| self.store.delete(key))).await;

        let mut deleted = 0;
        for (key, result) in keys.iter().zip(results) {
            match result {
                Ok(true) => deleted += 1,
                Ok(false) => {}
                Err(fault) => {
                    warn!(key = %key, error = %fault, "Cache DELETE failed");
                    self.metrics.record_error();
                }
            }
            self.tags.remove_key(key);
        }

        debug!(count = keys.len(), deleted, "Cache DELETE");
        deleted
    }

    /// Cache-aside read.
    ///
    /// Concurrent misses on the same key each run `factory`; there is no
    /// single-flight. With a version in `options`, an entry written under a
    /// different version counts as a miss.
    pub async fn remember<T, E, F, Fut>(&self, key: &str, factory: F, options: &CacheOptions) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        E: Display,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        match &options.version {
            Some(version) => match self.lookup::<VersionedEntry<T>>(key).await {
                Lookup::Hit(entry, elapsed) if &entry.version == version => {
                    debug!(key = %key, version = %version, "Cache HIT");
                    self.metrics.record_hit(elapsed);
                    return Ok(entry.data);
                }
                Lookup::Hit(entry, _) => {
                    debug!(key = %key, cached = %entry.version, wanted = %version, "Cache version mismatch");
                    self.metrics.record_miss();
                }
                Lookup::Miss => self.metrics.record_miss(),
                Lookup::Fault => {}
            },
            None => {
                if let Some(value) = self.get(key).await {
                    return Ok(value);
                }
            }
        }

        let value = factory().await.map_err(|e| {
            warn!(key = %key, error = %e, "Cache factory failed");
            e
        })?;

        self.set(key, &value, options).await;
        Ok(value)
    }

    /// Deletes every key stored under any of `tags` and forgets the tags.
    ///
    /// Keys tagged only with other tags are untouched.
    pub async fn invalidate_tags<S: AsRef<str>>(&self, tags: &[S]) -> usize {
        let keys = self.tags.take(tags);
        if keys.is_empty() {
            return 0;
        }

        let deleted = self.delete_many(&keys).await;
        let tags: Vec<&str> = tags.iter().map(|t| t.as_ref()).collect();
        debug!(tags = ?tags, keys = keys.len(), "Cache tags invalidated");
        deleted
    }

    /// Clears the store and the tag index.
    pub async fn flush(&self) {
        match self.store.flush().await {
            Ok(()) => {
                self.tags.clear();
                warn!("Cache FLUSHED - all entries cleared");
            }
            Err(fault) => {
                warn!(error = %fault, "Cache FLUSH failed");
                self.metrics.record_error();
            }
        }
    }

    /// Binds `f` to a key pattern with `{0}`, `{1}`... placeholders.
    pub fn wrap<F>(&self, pattern: impl Into<String>, f: F, options: CacheOptions) -> CachedFn<F> {
        CachedFn {
            cache: self.clone(),
            pattern: pattern.into(),
            f,
            options,
        }
    }

    /// Caches a unit of work under `scope:method:<hash of args>`.
    pub async fn cacheable<A, T, E, F, Fut>(
        &self,
        scope: &str,
        method: &str,
        args: &A,
        factory: F,
        options: &CacheOptions,
    ) -> Result<T, E>
    where
        A: Serialize + ?Sized,
        T: Serialize + DeserializeOwned,
        E: Display,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let key = crate::cache_key!(scope, method, KeyBuilder::hash_of(args));
        self.remember(&key, factory, options).await
    }

    /// Runs a mutation and invalidates `tags` only if it succeeds.
    pub async fn evicting<S, T, E, Fut>(&self, tags: &[S], mutation: Fut) -> Result<T, E>
    where
        S: AsRef<str>,
        Fut: Future<Output = Result<T, E>>,
    {
        let result = mutation.await;
        if result.is_ok() {
            self.invalidate_tags(tags).await;
        }
        result
    }

    /// Drops index entries for keys the store no longer holds.
    ///
    /// Stops at the first store fault and leaves the rest of the index as is.
    /// Returns how many keys were pruned.
    pub async fn reconcile_tags(&self) -> usize {
        let mut pruned = 0;

        for key in self.tags.indexed_keys() {
            match self.store.exists(&key).await {
                Ok(true) => {}
                Ok(false) => {
                    self.tags.remove_key(&key);
                    pruned += 1;
                }
                Err(fault) => {
                    warn!(key = %key, error = %fault, "Tag reconciliation interrupted");
                    self.metrics.record_error();
                    break;
                }
            }
        }

        if pruned > 0 {
            debug!(pruned, "Pruned stale keys from tag index");
        }
        pruned
    }
}

/// Arguments that can fill `{n}` placeholders in a key pattern.
pub trait KeyArgs {
    fn key_args(&self) -> Vec<String>;
}

impl KeyArgs for () {
    fn key_args(&self) -> Vec<String> {
        Vec::new()
    }
}

macro_rules! impl_key_args_for_tuples {
    ($(($($name:ident : $idx:tt),+)),+ $(,)?) => {
        $(
            impl<$($name: Display),+> KeyArgs for ($($name,)+) {
                fn key_args(&self) -> Vec<String> {
                    vec![$(self.$idx.to_string()),+]
                }
            }
        )+
    };
}

impl_key_args_for_tuples!(
    (A: 0),
    (A: 0, B: 1),
    (A: 0, B: 1, C: 2),
    (A: 0, B: 1, C: 2, D: 3),
);

/// Substitutes `{n}` with `args[n]`. Placeholders without a matching
/// argument are left as written.
fn fill_pattern(pattern: &str, args: &[String]) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut rest = pattern;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];

        let substituted = after.find('}').and_then(|close| {
            let index: usize = after[..close].parse().ok()?;
            args.get(index).map(|arg| (arg, close))
        });

        match substituted {
            Some((arg, close)) => {
                out.push_str(arg);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }

    out.push_str(rest);
    out
}

/// A function whose results are cached under a key derived from its arguments.
pub struct CachedFn<F> {
    cache: Cache,
    pattern: String,
    f: F,
    options: CacheOptions,
}

impl<F> CachedFn<F> {
    /// The key a call with `args` would use.
    pub fn key_for<A: KeyArgs>(&self, args: &A) -> String {
        fill_pattern(&self.pattern, &args.key_args())
    }

    pub async fn call<A, T, E, Fut>(&self, args: A) -> Result<T, E>
    where
        A: KeyArgs,
        F: Fn(A) -> Fut,
        T: Serialize + DeserializeOwned,
        E: Display,
        Fut: Future<Output = Result<T, E>>,
    {
        let key = self.key_for(&args);
        self.cache.remember(&key, || (self.f)(args), &self.options).await
    }
}
