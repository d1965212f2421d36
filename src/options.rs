use std::sync::atomic::{AtomicU64, Ordering};

/// Where the loader of `get_or_update` runs relative to the cache's gate.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LoaderMode {
    /// Run the loader while holding the gate.
    ///
    /// Admission, cooldown check, load and write form one atomic step. A slow
    /// loader stalls every other admission and cache update in the process.
    #[default]
    HoldGate,
    /// Run the loader with the gate released.
    ///
    /// Admission and the cooldown check happen under the gate, the loader runs
    /// outside it, and the cooldown is re-checked under the gate before the
    /// result is written. When another caller refreshed the same name in the
    /// meantime, the late result is dropped and the cached value is returned.
    /// Concurrent callers may each invoke their loader once.
    ReleaseGate,
}

/// Configuration for [`RateLimitedCache`](crate::RateLimitedCache).
///
/// Counts and durations are clamped to at least `1` when the cache is built.
///
/// ```
/// use ratecache::{LoaderMode, RateCacheOptions};
///
/// let options = RateCacheOptions::default()
///     .with_global_limit(100, 60)
///     .with_cooldown_seconds(30)
///     .with_loader_mode(LoaderMode::ReleaseGate);
///
/// assert_eq!(options.global_max_count, 100);
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RateCacheOptions {
    /// Admissions allowed through the global gate per window. Default: 5.
    pub global_max_count: u64,
    /// Global gate window in seconds. Default: 60.
    pub global_window_seconds: u64,
    /// Minimum seconds between two refreshes of the same name. Default: 60.
    pub cooldown_seconds: u64,
    /// Whether `is_allowed` passes the global gate before the per-key window.
    ///
    /// Off by default: `is_allowed` consults only the per-key window.
    pub compose_global_gate: bool,
    /// See [`LoaderMode`].
    pub loader_mode: LoaderMode,
}

impl Default for RateCacheOptions {
    fn default() -> Self {
        Self {
            global_max_count: 5,
            global_window_seconds: 60,
            cooldown_seconds: 60,
            compose_global_gate: false,
            loader_mode: LoaderMode::HoldGate,
        }
    }
}

impl RateCacheOptions {
    /// Set the default global limit: `max_count` admissions per `window_seconds`.
    pub fn with_global_limit(mut self, max_count: u64, window_seconds: u64) -> Self {
        self.global_max_count = max_count;
        self.global_window_seconds = window_seconds;
        self
    }

    /// Set the default per-name cooldown.
    pub fn with_cooldown_seconds(mut self, seconds: u64) -> Self {
        self.cooldown_seconds = seconds;
        self
    }

    /// Make `is_allowed` pass the global gate first.
    pub fn with_composed_global_gate(mut self, compose: bool) -> Self {
        self.compose_global_gate = compose;
        self
    }

    /// Choose where loaders run.
    pub fn with_loader_mode(mut self, loader_mode: LoaderMode) -> Self {
        self.loader_mode = loader_mode;
        self
    }
}

/// Parameters of one `get_or_update_with` call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RefreshPolicy {
    /// Minimum seconds between refreshes of the name. Clamped to 1 at use.
    pub cooldown_seconds: u64,
    /// Global gate capacity.
    pub global_max_count: u64,
    /// Global gate window in seconds.
    pub global_window_seconds: u64,
}

impl RefreshPolicy {
    /// Build a policy from explicit values.
    pub fn new(cooldown_seconds: u64, global_max_count: u64, global_window_seconds: u64) -> Self {
        Self {
            cooldown_seconds,
            global_max_count,
            global_window_seconds,
        }
    }

    pub(crate) fn cooldown_ms(&self) -> u64 {
        self.cooldown_seconds.max(1).saturating_mul(1000)
    }
}

/// Runtime-mutable defaults. Read at call time, never under the gate.
#[derive(Debug)]
pub(crate) struct DefaultLimits {
    global_max_count: AtomicU64,
    global_window_seconds: AtomicU64,
    cooldown_seconds: AtomicU64,
}

impl DefaultLimits {
    pub(crate) fn new(options: &RateCacheOptions) -> Self {
        Self {
            global_max_count: AtomicU64::new(options.global_max_count.max(1)),
            global_window_seconds: AtomicU64::new(options.global_window_seconds.max(1)),
            cooldown_seconds: AtomicU64::new(options.cooldown_seconds.max(1)),
        }
    }

    pub(crate) fn set_global_limit(&self, max_count: u64, window_seconds: u64) {
        self.global_max_count
            .store(max_count.max(1), Ordering::Relaxed);
        self.global_window_seconds
            .store(window_seconds.max(1), Ordering::Relaxed);
    }

    pub(crate) fn set_cooldown(&self, seconds: u64) {
        self.cooldown_seconds.store(seconds.max(1), Ordering::Relaxed);
    }

    pub(crate) fn global_limit(&self) -> (u64, u64) {
        (
            self.global_max_count.load(Ordering::Relaxed),
            self.global_window_seconds.load(Ordering::Relaxed),
        )
    }

    pub(crate) fn policy(&self) -> RefreshPolicy {
        let (global_max_count, global_window_seconds) = self.global_limit();
        RefreshPolicy {
            cooldown_seconds: self.cooldown_seconds.load(Ordering::Relaxed),
            global_max_count,
            global_window_seconds,
        }
    }
}
