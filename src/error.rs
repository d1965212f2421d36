/// Error type for this crate.
///
/// Loader failures never reach callers of `get_or_update`; they are converted
/// into this type internally so they can be logged in one place.
#[derive(Debug, thiserror::Error)]
pub enum RateCacheError {
    /// The named entry holds a value of a different type than requested.
    #[error("cache entry '{name}' does not hold a value of type {expected}")]
    TypeMismatch {
        /// Name of the cache entry.
        name: String,
        /// Type the caller asked for.
        expected: &'static str,
    },
    /// The loader returned an error.
    #[error("loader failed: {0}")]
    LoaderFailed(String),
    /// The loader panicked.
    #[error("loader panicked: {0}")]
    LoaderPanicked(String),
}
