use crate::{ManualClock, RateCacheOptions, RateLimitedCache};

mod test_get_or_update;

pub(super) const START_MS: u64 = 1_700_000_000_000;

pub(super) fn manual_cache(
    options: RateCacheOptions,
) -> (RateLimitedCache<ManualClock>, ManualClock) {
    let clock = ManualClock::new(START_MS);
    (RateLimitedCache::with_clock(options, clock.clone()), clock)
}
