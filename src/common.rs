use std::collections::VecDeque;

/// Key under which a sliding window is tracked.
///
/// The global window lives in its own variant, so no caller-supplied key can
/// ever alias it.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) enum WindowKey {
    Global,
    Named(String),
}

impl WindowKey {
    pub(crate) fn named(key: &str) -> Self {
        Self::Named(key.to_owned())
    }
}

/// Admission timestamps for one key, oldest first.
///
/// Entries are appended in non-decreasing order, which is what lets
/// [`SlidingWindow::prune`] stop at the first unexpired entry.
#[derive(Debug, Default)]
pub(crate) struct SlidingWindow {
    timestamps: VecDeque<u64>,
}

impl SlidingWindow {
    /// Drop entries older than `window_ms` relative to `now_ms`.
    pub(crate) fn prune(&mut self, now_ms: u64, window_ms: u64) {
        while let Some(&oldest) = self.timestamps.front()
            && now_ms.saturating_sub(oldest) > window_ms
        {
            self.timestamps.pop_front();
        }
    } // end method prune

    pub(crate) fn len(&self) -> usize {
        self.timestamps.len()
    }

    /// Prune, then record `now_ms` if fewer than `max_count` entries remain.
    ///
    /// A rejection leaves the window untouched apart from the pruning.
    pub(crate) fn record_if_allowed(
        &mut self,
        now_ms: u64,
        max_count: u64,
        window_seconds: u64,
    ) -> RateLimitDecision {
        let window_ms = window_seconds.saturating_mul(1000);
        self.prune(now_ms, window_ms);

        let current_count = self.timestamps.len() as u64;
        if current_count < max_count {
            // a clock stepping backwards must not break the ordering
            let stamp = self
                .timestamps
                .back()
                .map_or(now_ms, |&newest| newest.max(now_ms));
            self.timestamps.push_back(stamp);

            return RateLimitDecision::Allowed;
        }

        let retry_after_ms = match self.timestamps.front() {
            None => 0,
            Some(&oldest) => oldest
                .saturating_add(window_ms)
                .saturating_add(1)
                .saturating_sub(now_ms),
        };

        RateLimitDecision::Rejected {
            window_size_seconds: window_seconds,
            retry_after_ms,
            current_count,
        }
    } // end method record_if_allowed
}

/// Outcome of a sliding-window admission check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
    /// The call was admitted and recorded in the window.
    Allowed,
    /// The call was rejected; nothing was recorded.
    ///
    /// Includes best-effort hints for callers that want to communicate backoff.
    Rejected {
        /// Sliding window size used for the decision.
        window_size_seconds: u64,
        /// Milliseconds until the oldest entry leaves the window.
        retry_after_ms: u64,
        /// Number of admissions currently inside the window.
        current_count: u64,
    },
}

impl RateLimitDecision {
    /// `true` for [`RateLimitDecision::Allowed`].
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitDecision::Allowed)
    }
}
