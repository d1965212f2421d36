#![doc = include_str!("../README.md")]
#![deny(missing_docs)]
#![forbid(unsafe_code)]

mod rate_limited_cache;
pub use rate_limited_cache::*;

mod cache_slot;
pub use cache_slot::*;

mod clock;
pub use clock::{Clock, ManualClock, SystemClock};

mod options;
pub use options::{LoaderMode, RateCacheOptions, RefreshPolicy};

mod error;
pub use error::*;

mod common;
pub use common::RateLimitDecision;

#[cfg(test)]
mod tests;
