use std::{
    any::{Any, type_name},
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    time::Duration,
};

use dashmap::DashMap;
use parking_lot::ReentrantMutex;

use crate::{
    CacheSlot, Clock, LoaderMode, RateCacheError, RateCacheOptions, RateLimitDecision,
    RefreshPolicy, SystemClock,
    common::{SlidingWindow, WindowKey},
    options::DefaultLimits,
};

type CachedValue = Arc<dyn Any + Send + Sync>;

/// Sliding-window rate limiter combined with a named, cooldown-gated cache.
///
/// One instance is meant to live for the whole process (or whatever scope
/// owns it). Recreating it mid-flight forgets every admission and cooldown,
/// so build it once and share it, usually through an [`Arc`].
///
/// # State
///
/// - **Windows:** per-key admission timestamps, plus one reserved global window
///   that no caller key can reach.
/// - **Values:** one cached value per name. Values of different types can live
///   side by side; reading a name with the wrong type yields `None`.
/// - **Last update:** per-name timestamp of the last refresh attempt that did
///   not fail. Drives the cooldown.
///
/// # Thread Safety
///
/// - The three mappings are [`DashMap`]s, so plain reads never block on
///   each other.
/// - Every admission and every `get_or_update` runs under one coarse gate
///   shared by all keys. Admit, read, write and stamp are therefore atomic
///   as a group.
/// - [`get_cache`](Self::get_cache), [`clear_cache`](Self::clear_cache),
///   [`clear_all_cache`](Self::clear_all_cache) and
///   [`millis_since_last_update`](Self::millis_since_last_update) skip the gate
///   and are only eventually consistent with an in-flight refresh.
///
/// # Liveness
///
/// With [`LoaderMode::HoldGate`] (the default) the loader runs while the gate
/// is held. A slow or blocking loader stalls every other admission and
/// refresh in the process. [`LoaderMode::ReleaseGate`] runs the loader outside
/// the gate and re-checks the cooldown before writing.
///
/// The gate is re-entrant: a loader may call back into the same cache on the
/// same thread.
///
/// # Examples
///
/// ```
/// use std::convert::Infallible;
/// use ratecache::{RateCacheOptions, RateLimitedCache};
///
/// let cache = RateLimitedCache::new(RateCacheOptions::default());
///
/// // At most 3 logins per minute for this user.
/// assert!(cache.admit("login:alice", 3, 60));
///
/// let price = cache.get_or_update("price", || Ok::<_, Infallible>(Some(100_u32)));
/// assert_eq!(price, Some(100));
///
/// // Still cooling down: the loader is not called, the cached value is served.
/// let price = cache.get_or_update("price", || Ok::<_, Infallible>(Some(200_u32)));
/// assert_eq!(price, Some(100));
/// ```
pub struct RateLimitedCache<C: Clock = SystemClock> {
    clock: C,
    defaults: DefaultLimits,
    compose_global_gate: bool,
    loader_mode: LoaderMode,
    gate: ReentrantMutex<()>,
    windows: DashMap<WindowKey, SlidingWindow>,
    values: DashMap<String, CachedValue>,
    last_update_ms: DashMap<String, u64>,
}

impl RateLimitedCache<SystemClock> {
    /// Create a cache driven by the wall clock.
    pub fn new(options: RateCacheOptions) -> Self {
        Self::with_clock(options, SystemClock)
    }
}

impl Default for RateLimitedCache<SystemClock> {
    fn default() -> Self {
        Self::new(RateCacheOptions::default())
    }
}

impl<C: Clock> RateLimitedCache<C> {
    /// Create a cache driven by `clock`.
    pub fn with_clock(options: RateCacheOptions, clock: C) -> Self {
        Self {
            clock,
            defaults: DefaultLimits::new(&options),
            compose_global_gate: options.compose_global_gate,
            loader_mode: options.loader_mode,
            gate: ReentrantMutex::new(()),
            windows: DashMap::new(),
            values: DashMap::new(),
            last_update_ms: DashMap::new(),
        }
    } // end constructor

    /// Set the default global limit used by [`get_or_update`](Self::get_or_update).
    ///
    /// Both values are clamped to at least `1`. Calls already past their
    /// admission check are unaffected.
    pub fn set_default_global_limit(&self, max_count: u64, window_seconds: u64) {
        self.defaults.set_global_limit(max_count, window_seconds);
    }

    /// Set the default per-name cooldown, clamped to at least one second.
    pub fn set_default_cooldown(&self, seconds: u64) {
        self.defaults.set_cooldown(seconds);
    }

    /// The policy [`get_or_update`](Self::get_or_update) would use right now.
    pub fn default_policy(&self) -> RefreshPolicy {
        self.defaults.policy()
    }

    /// Record an admission for `key` if fewer than `max_count` admissions
    /// happened within the last `window_seconds`.
    ///
    /// Arguments are used as given: a `window_seconds` of `0` expires every
    /// entry from an earlier millisecond, and a `max_count` of `0` never admits.
    pub fn admit(&self, key: &str, max_count: u64, window_seconds: u64) -> bool {
        self.decide(key, max_count, window_seconds).is_allowed()
    }

    /// Same as [`admit`](Self::admit), returning backoff hints on rejection.
    pub fn decide(&self, key: &str, max_count: u64, window_seconds: u64) -> RateLimitDecision {
        let _gate = self.gate.lock();
        let now_ms = self.clock.now_millis();
        self.record(WindowKey::named(key), now_ms, max_count, window_seconds)
    }

    /// Admission check against the reserved global window.
    pub fn admit_global(&self, max_count: u64, window_seconds: u64) -> bool {
        let _gate = self.gate.lock();
        let now_ms = self.clock.now_millis();
        self.record(WindowKey::Global, now_ms, max_count, window_seconds)
            .is_allowed()
    }

    /// Per-key admission check.
    ///
    /// Equivalent to [`admit`](Self::admit) unless the cache was built with
    /// [`RateCacheOptions::compose_global_gate`], in which case the global
    /// window (with the current default limit) must admit first.
    pub fn is_allowed(&self, key: &str, max_count: u64, window_seconds: u64) -> bool {
        let _gate = self.gate.lock();
        self.is_allowed_locked(key, max_count, window_seconds)
    }

    /// Per-key admission check that also writes the cache on success.
    ///
    /// When admitted, `Some(value)` is stored under `key` and stamped as an
    /// update; `None` removes the entry and its timestamp. The cache is left
    /// alone on rejection.
    pub fn is_allowed_with_value<T>(
        &self,
        key: &str,
        max_count: u64,
        window_seconds: u64,
        value: Option<T>,
    ) -> bool
    where
        T: Send + Sync + 'static,
    {
        let _gate = self.gate.lock();
        if !self.is_allowed_locked(key, max_count, window_seconds) {
            return false;
        }

        match value {
            Some(value) => {
                self.values.insert(key.to_owned(), Arc::new(value));
                self.last_update_ms
                    .insert(key.to_owned(), self.clock.now_millis());
            }
            None => {
                self.values.remove(key);
                self.last_update_ms.remove(key);
            }
        }

        true
    } // end method is_allowed_with_value

    /// [`get_or_update_with`](Self::get_or_update_with) using the current
    /// default cooldown and global limit.
    pub fn get_or_update<T, E, F>(&self, name: &str, loader: F) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
        E: fmt::Display,
        F: FnOnce() -> Result<Option<T>, E>,
    {
        self.get_or_update_with(name, loader, self.defaults.policy())
    }

    /// Return the value cached under `name`, refreshing it through `loader`
    /// when policy allows.
    ///
    /// # Behavior
    ///
    /// 1. The global window must admit, otherwise the cached value is returned
    ///    and the cooldown is not consulted.
    /// 2. If `name` was updated less than `cooldown_seconds` ago, the cached
    ///    value is returned without calling `loader`.
    /// 3. Otherwise `loader` is called:
    ///    - `Ok(Some(v))`: `v` is cached, the update is stamped, `v` is returned.
    ///    - `Ok(None)`: the cache is left as is, the update is still stamped,
    ///      and `None` is returned.
    ///    - `Err(_)` or a panic: nothing is written or stamped, and the cached
    ///      value is returned. The error is logged and not propagated.
    ///
    /// A cached value of a different type than `T` reads as `None`.
    pub fn get_or_update_with<T, E, F>(
        &self,
        name: &str,
        loader: F,
        policy: RefreshPolicy,
    ) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
        E: fmt::Display,
        F: FnOnce() -> Result<Option<T>, E>,
    {
        match self.loader_mode {
            LoaderMode::HoldGate => {
                let _gate = self.gate.lock();
                let now_ms = self.clock.now_millis();
                if self.refresh_blocked(name, now_ms, &policy) {
                    return self.get_cache(name);
                }

                let outcome = run_loader(loader);
                self.apply_refresh(name, now_ms, outcome)
            }
            LoaderMode::ReleaseGate => {
                let now_ms = {
                    let _gate = self.gate.lock();
                    let now_ms = self.clock.now_millis();
                    if self.refresh_blocked(name, now_ms, &policy) {
                        return self.get_cache(name);
                    }
                    now_ms
                };

                let outcome = run_loader(loader);

                let _gate = self.gate.lock();
                if outcome.is_ok() && self.in_cooldown(name, now_ms, policy.cooldown_ms()) {
                    tracing::debug!(name, "entry refreshed while loading, dropping late result");
                    return self.get_cache(name);
                }
                self.apply_refresh(name, now_ms, outcome)
            }
        }
    } // end method get_or_update_with

    /// Typed handle for the entry `name`.
    pub fn slot<T>(&self, name: &str) -> CacheSlot<'_, T, C>
    where
        T: Clone + Send + Sync + 'static,
    {
        CacheSlot::new(self, name)
    }

    /// Cached value for `name`, or `None` when absent or of another type.
    pub fn get_cache<T>(&self, name: &str) -> Option<T>
    where
        T: Clone + 'static,
    {
        self.try_get_cache(name).unwrap_or_else(|err| {
            tracing::trace!(error = %err, "cache read type mismatch");
            None
        })
    }

    /// Cached value for `name`, reporting a type mismatch as an error.
    pub fn try_get_cache<T>(&self, name: &str) -> Result<Option<T>, RateCacheError>
    where
        T: Clone + 'static,
    {
        let Some(entry) = self.values.get(name) else {
            return Ok(None);
        };

        let value: &(dyn Any + Send + Sync) = &**entry;
        match value.downcast_ref::<T>() {
            Some(value) => Ok(Some(value.clone())),
            None => Err(RateCacheError::TypeMismatch {
                name: name.to_owned(),
                expected: type_name::<T>(),
            }),
        }
    }

    /// Remove the value and last-update stamp for `name`.
    ///
    /// Rate-limit history is not touched.
    pub fn clear_cache(&self, name: &str) {
        self.values.remove(name);
        self.last_update_ms.remove(name);
    }

    /// Remove every cached value and last-update stamp.
    ///
    /// Rate-limit history is not touched; use
    /// [`reset_all_rate_limits`](Self::reset_all_rate_limits) for that.
    pub fn clear_all_cache(&self) {
        self.values.clear();
        self.last_update_ms.clear();
    }

    /// Forget the admission history of `key`.
    pub fn reset_rate_limit(&self, key: &str) {
        let _gate = self.gate.lock();
        self.windows.remove(&WindowKey::named(key));
    }

    /// Forget the admission history of every key, the global window included.
    pub fn reset_all_rate_limits(&self) {
        let _gate = self.gate.lock();
        self.windows.clear();
    }

    /// Number of admissions of `key` within the last `window_seconds`.
    ///
    /// Meant for diagnostics. Prunes expired entries as a side effect.
    pub fn get_current_count(&self, key: &str, window_seconds: u64) -> usize {
        let _gate = self.gate.lock();
        self.count_in_window(&WindowKey::named(key), window_seconds)
    }

    /// Number of admissions through the global window within the last
    /// `window_seconds`.
    pub fn global_count(&self, window_seconds: u64) -> usize {
        let _gate = self.gate.lock();
        self.count_in_window(&WindowKey::Global, window_seconds)
    }

    /// Milliseconds since `name` was last updated, or `-1` if it never was.
    pub fn millis_since_last_update(&self, name: &str) -> i64 {
        match self.since_last_update(name) {
            None => -1,
            Some(elapsed) => i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX),
        }
    }

    /// Time since `name` was last updated.
    pub fn since_last_update(&self, name: &str) -> Option<Duration> {
        let last_ms = self.last_update_ms.get(name).map(|last| *last)?;
        let now_ms = self.clock.now_millis();
        Some(Duration::from_millis(now_ms.saturating_sub(last_ms)))
    }

    fn is_allowed_locked(&self, key: &str, max_count: u64, window_seconds: u64) -> bool {
        let now_ms = self.clock.now_millis();

        if self.compose_global_gate {
            let (global_max_count, global_window_seconds) = self.defaults.global_limit();
            let global = self.record(
                WindowKey::Global,
                now_ms,
                global_max_count,
                global_window_seconds,
            );
            if !global.is_allowed() {
                tracing::debug!(key, "global limit reached");
                return false;
            }
        }

        self.record(WindowKey::named(key), now_ms, max_count, window_seconds)
            .is_allowed()
    }

    fn record(
        &self,
        key: WindowKey,
        now_ms: u64,
        max_count: u64,
        window_seconds: u64,
    ) -> RateLimitDecision {
        self.windows
            .entry(key)
            .or_default()
            .record_if_allowed(now_ms, max_count, window_seconds)
    }

    fn count_in_window(&self, key: &WindowKey, window_seconds: u64) -> usize {
        let now_ms = self.clock.now_millis();
        let Some(mut window) = self.windows.get_mut(key) else {
            return 0;
        };

        window.prune(now_ms, window_seconds.saturating_mul(1000));
        window.len()
    }

    fn in_cooldown(&self, name: &str, now_ms: u64, cooldown_ms: u64) -> bool {
        self.last_update_ms
            .get(name)
            .is_some_and(|last| now_ms.saturating_sub(*last) < cooldown_ms)
    }

    /// Global admission and cooldown. `true` means serve from cache.
    fn refresh_blocked(&self, name: &str, now_ms: u64, policy: &RefreshPolicy) -> bool {
        let global = self.record(
            WindowKey::Global,
            now_ms,
            policy.global_max_count,
            policy.global_window_seconds,
        );
        if let RateLimitDecision::Rejected { retry_after_ms, .. } = global {
            tracing::debug!(name, retry_after_ms, "global limit reached, serving cached value");
            return true;
        }

        if self.in_cooldown(name, now_ms, policy.cooldown_ms()) {
            tracing::trace!(name, "cooling down, serving cached value");
            return true;
        }

        false
    }

    fn apply_refresh<T>(
        &self,
        name: &str,
        now_ms: u64,
        outcome: Result<Option<T>, RateCacheError>,
    ) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        match outcome {
            Err(err) => {
                tracing::warn!(name, error = %err, "refresh failed, serving cached value");
                self.get_cache(name)
            }
            Ok(fresh) => {
                if let Some(value) = &fresh {
                    self.values.insert(name.to_owned(), Arc::new(value.clone()));
                }
                // stamped even for `None` so an empty loader is not hammered
                self.last_update_ms.insert(name.to_owned(), now_ms);
                fresh
            }
        }
    } // end method apply_refresh
} // end of impl

fn run_loader<T, E, F>(loader: F) -> Result<Option<T>, RateCacheError>
where
    E: fmt::Display,
    F: FnOnce() -> Result<Option<T>, E>,
{
    match panic::catch_unwind(AssertUnwindSafe(loader)) {
        Ok(Ok(fresh)) => Ok(fresh),
        Ok(Err(err)) => Err(RateCacheError::LoaderFailed(err.to_string())),
        Err(payload) => Err(RateCacheError::LoaderPanicked(panic_message(&*payload))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
