use std::{cell::Cell, convert::Infallible, time::Duration};

use super::manual_cache;
use crate::{LoaderMode, RateCacheOptions, RefreshPolicy};

fn policy(cooldown_seconds: u64) -> RefreshPolicy {
    RefreshPolicy::new(cooldown_seconds, 1_000, 60)
}

fn counting_loader(
    calls: &Cell<u32>,
    value: Option<u32>,
) -> impl FnOnce() -> Result<Option<u32>, Infallible> + '_ {
    move || {
        calls.set(calls.get() + 1);
        Ok(value)
    }
}

#[test]
fn loader_runs_once_within_cooldown() {
    let (cache, _clock) = manual_cache(RateCacheOptions::default());
    let calls = Cell::new(0);

    let first = cache.get_or_update_with("n", counting_loader(&calls, Some(1)), policy(60));
    let second = cache.get_or_update_with("n", counting_loader(&calls, Some(2)), policy(60));

    assert_eq!(first, Some(1));
    assert_eq!(second, Some(1));
    assert_eq!(calls.get(), 1);
}

#[test]
fn price_refreshes_only_after_cooldown() {
    let (cache, clock) = manual_cache(RateCacheOptions::default());
    let calls = Cell::new(0);

    let at_0 = cache.get_or_update_with("price", counting_loader(&calls, Some(100)), policy(60));
    assert_eq!(at_0, Some(100));
    assert_eq!(calls.get(), 1);

    clock.advance(Duration::from_secs(30));
    let at_30 = cache.get_or_update_with("price", counting_loader(&calls, Some(200)), policy(60));
    assert_eq!(at_30, Some(100));
    assert_eq!(calls.get(), 1);

    clock.advance(Duration::from_secs(31));
    let at_61 = cache.get_or_update_with("price", counting_loader(&calls, Some(200)), policy(60));
    assert_eq!(at_61, Some(200));
    assert_eq!(calls.get(), 2);
    assert_eq!(cache.get_cache::<u32>("price"), Some(200));
}

#[test]
fn failing_loader_serves_stale_value_without_stamping() {
    let (cache, clock) = manual_cache(RateCacheOptions::default());

    cache.get_or_update_with("n", || Ok::<_, Infallible>(Some(100_u32)), policy(60));
    clock.advance(Duration::from_secs(61));

    let served =
        cache.get_or_update_with("n", || Err::<Option<u32>, _>("upstream down"), policy(60));
    assert_eq!(served, Some(100));
    assert_eq!(cache.millis_since_last_update("n"), 61_000);

    // the failure left no stamp, so an immediate retry reaches the loader
    let calls = Cell::new(0);
    let retried = cache.get_or_update_with("n", counting_loader(&calls, Some(300)), policy(60));
    assert_eq!(calls.get(), 1);
    assert_eq!(retried, Some(300));
}

#[test]
fn failing_loader_with_empty_cache_returns_none() {
    let (cache, _clock) = manual_cache(RateCacheOptions::default());

    let served = cache.get_or_update_with("n", || Err::<Option<u32>, _>("boom"), policy(60));

    assert_eq!(served, None);
    assert_eq!(cache.millis_since_last_update("n"), -1);
}

#[test]
fn panicking_loader_is_treated_as_failure() {
    let (cache, clock) = manual_cache(RateCacheOptions::default());

    cache.get_or_update_with("n", || Ok::<_, Infallible>(Some(100_u32)), policy(60));
    clock.advance(Duration::from_secs(61));

    let served = cache.get_or_update_with(
        "n",
        || -> Result<Option<u32>, Infallible> { panic!("loader exploded") },
        policy(60),
    );

    assert_eq!(served, Some(100));
    assert_eq!(cache.millis_since_last_update("n"), 61_000);
}

#[test]
fn absent_result_keeps_cache_but_stamps() {
    let (cache, clock) = manual_cache(RateCacheOptions::default());

    cache.get_or_update_with("n", || Ok::<_, Infallible>(Some(100_u32)), policy(60));
    clock.advance(Duration::from_secs(61));

    let fresh = cache.get_or_update_with("n", || Ok::<Option<u32>, Infallible>(None), policy(60));

    assert_eq!(fresh, None);
    assert_eq!(cache.get_cache::<u32>("n"), Some(100));
    assert_eq!(cache.millis_since_last_update("n"), 0);

    // stamped, so the next call within the cooldown serves the old value
    let calls = Cell::new(0);
    let served = cache.get_or_update_with("n", counting_loader(&calls, Some(5)), policy(60));
    assert_eq!(calls.get(), 0);
    assert_eq!(served, Some(100));
}

#[test]
fn global_rejection_serves_cache_and_leaves_cooldown_alone() {
    let (cache, clock) = manual_cache(RateCacheOptions::default());
    let tight = RefreshPolicy::new(60, 1, 3_600);
    let calls = Cell::new(0);

    let first = cache.get_or_update_with("n", counting_loader(&calls, Some(1)), tight);
    assert_eq!(first, Some(1));

    clock.advance(Duration::from_secs(61));
    let second = cache.get_or_update_with("n", counting_loader(&calls, Some(2)), tight);

    assert_eq!(second, Some(1));
    assert_eq!(calls.get(), 1);
    assert_eq!(cache.millis_since_last_update("n"), 61_000);
}

#[test]
fn global_rejection_with_empty_cache_returns_none() {
    let (cache, _clock) = manual_cache(RateCacheOptions::default());
    let calls = Cell::new(0);

    assert!(cache.admit_global(1, 60));
    let served = cache.get_or_update_with(
        "n",
        counting_loader(&calls, Some(1)),
        RefreshPolicy::new(60, 1, 60),
    );

    assert_eq!(served, None);
    assert_eq!(calls.get(), 0);
}

#[test]
fn every_call_passes_through_global_window() {
    let (cache, _clock) = manual_cache(RateCacheOptions::default());

    for _ in 0..3 {
        cache.get_or_update_with("n", || Ok::<_, Infallible>(Some(1_u32)), policy(60));
    }

    // cooldown hits still consumed global admissions
    assert_eq!(cache.global_count(60), 3);
}

#[test]
fn defaults_are_read_at_call_time() {
    let (cache, clock) = manual_cache(RateCacheOptions::default());
    cache.set_default_global_limit(2, 60);
    cache.set_default_cooldown(1);
    let calls = Cell::new(0);

    assert_eq!(cache.get_or_update("n", counting_loader(&calls, Some(1))), Some(1));
    clock.advance(Duration::from_secs(1));
    assert_eq!(cache.get_or_update("n", counting_loader(&calls, Some(2))), Some(2));
    clock.advance(Duration::from_secs(1));
    // third call inside the 60 s global window
    assert_eq!(cache.get_or_update("n", counting_loader(&calls, Some(3))), Some(2));

    assert_eq!(calls.get(), 2);
}

#[test]
fn zero_cooldown_is_clamped_to_one_second() {
    let (cache, clock) = manual_cache(RateCacheOptions::default());
    let calls = Cell::new(0);

    cache.get_or_update_with("n", counting_loader(&calls, Some(1)), policy(0));
    clock.advance(Duration::from_millis(999));
    cache.get_or_update_with("n", counting_loader(&calls, Some(2)), policy(0));
    assert_eq!(calls.get(), 1);

    clock.advance(Duration::from_millis(1));
    cache.get_or_update_with("n", counting_loader(&calls, Some(2)), policy(0));
    assert_eq!(calls.get(), 2);
}

#[test]
fn type_mismatch_reads_as_none() {
    let (cache, _clock) = manual_cache(RateCacheOptions::default());

    cache.get_or_update_with("n", || Ok::<_, Infallible>(Some(1_u32)), policy(60));
    let served = cache.get_or_update_with(
        "n",
        || Ok::<_, Infallible>(Some("text".to_string())),
        policy(60),
    );

    assert_eq!(served, None);
    assert_eq!(cache.get_cache::<u32>("n"), Some(1));
}

#[test]
fn hold_gate_allows_reentrant_loader() {
    let (cache, _clock) = manual_cache(RateCacheOptions::default());

    let outer = cache.get_or_update_with(
        "n",
        || {
            let inner =
                cache.get_or_update_with("n", || Ok::<_, Infallible>(Some(1_u32)), policy(60));
            assert_eq!(inner, Some(1));
            Ok::<_, Infallible>(Some(2_u32))
        },
        policy(60),
    );

    // the outer refresh writes last
    assert_eq!(outer, Some(2));
    assert_eq!(cache.get_cache::<u32>("n"), Some(2));
}

#[test]
fn release_gate_drops_result_when_refreshed_meanwhile() {
    let (cache, _clock) =
        manual_cache(RateCacheOptions::default().with_loader_mode(LoaderMode::ReleaseGate));

    let outer = cache.get_or_update_with(
        "n",
        || {
            cache.get_or_update_with("n", || Ok::<_, Infallible>(Some(1_u32)), policy(60));
            Ok::<_, Infallible>(Some(2_u32))
        },
        policy(60),
    );

    assert_eq!(outer, Some(1));
    assert_eq!(cache.get_cache::<u32>("n"), Some(1));
}

#[test]
fn release_gate_follows_same_refresh_rules() {
    let (cache, clock) =
        manual_cache(RateCacheOptions::default().with_loader_mode(LoaderMode::ReleaseGate));
    let calls = Cell::new(0);

    let first = cache.get_or_update_with("n", counting_loader(&calls, Some(1)), policy(60));
    let second = cache.get_or_update_with("n", counting_loader(&calls, Some(2)), policy(60));
    assert_eq!(first, Some(1));
    assert_eq!(second, Some(1));
    assert_eq!(calls.get(), 1);

    clock.advance(Duration::from_secs(61));
    let served = cache.get_or_update_with("n", || Err::<Option<u32>, _>("down"), policy(60));
    assert_eq!(served, Some(1));
    assert_eq!(cache.millis_since_last_update("n"), 61_000);

    let fresh = cache.get_or_update_with("n", counting_loader(&calls, None), policy(60));
    assert_eq!(fresh, None);
    assert_eq!(cache.get_cache::<u32>("n"), Some(1));
    assert_eq!(cache.millis_since_last_update("n"), 0);
}
