use std::{fmt, marker::PhantomData};

use crate::{Clock, RateLimitedCache, RefreshPolicy, SystemClock};

/// Typed view of one named cache entry.
///
/// The underlying cache stores values of any type side by side. A slot fixes
/// the type for one name so call sites cannot disagree about it.
///
/// ```
/// use std::convert::Infallible;
/// use ratecache::{RateCacheOptions, RateLimitedCache};
///
/// let cache = RateLimitedCache::new(RateCacheOptions::default());
/// let quote = cache.slot::<String>("quote");
///
/// assert_eq!(quote.get(), None);
/// let fresh = quote.get_or_update(|| Ok::<_, Infallible>(Some("ok".to_string())));
/// assert_eq!(fresh.as_deref(), Some("ok"));
/// assert_eq!(quote.get().as_deref(), Some("ok"));
/// ```
pub struct CacheSlot<'a, T, C: Clock = SystemClock> {
    cache: &'a RateLimitedCache<C>,
    name: String,
    _value: PhantomData<fn() -> T>,
}

impl<'a, T, C> CacheSlot<'a, T, C>
where
    T: Clone + Send + Sync + 'static,
    C: Clock,
{
    pub(crate) fn new(cache: &'a RateLimitedCache<C>, name: &str) -> Self {
        Self {
            cache,
            name: name.to_owned(),
            _value: PhantomData,
        }
    }

    /// Name of the entry.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Cached value, if any.
    pub fn get(&self) -> Option<T> {
        self.cache.get_cache(&self.name)
    }

    /// See [`RateLimitedCache::get_or_update`].
    pub fn get_or_update<E, F>(&self, loader: F) -> Option<T>
    where
        E: fmt::Display,
        F: FnOnce() -> Result<Option<T>, E>,
    {
        self.cache.get_or_update(&self.name, loader)
    }

    /// See [`RateLimitedCache::get_or_update_with`].
    pub fn get_or_update_with<E, F>(&self, loader: F, policy: RefreshPolicy) -> Option<T>
    where
        E: fmt::Display,
        F: FnOnce() -> Result<Option<T>, E>,
    {
        self.cache.get_or_update_with(&self.name, loader, policy)
    }

    /// Drop the value and its last-update stamp.
    pub fn clear(&self) {
        self.cache.clear_cache(&self.name);
    }

    /// See [`RateLimitedCache::millis_since_last_update`].
    pub fn millis_since_last_update(&self) -> i64 {
        self.cache.millis_since_last_update(&self.name)
    }
}
