//! Retry configuration.

/// How many times a failed stream may be resubscribed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RetryPolicy {
    /// Forward the first failure.
    Never,

    /// Resubscribe up to this many times, then forward the last failure.
    Limited(usize),

    /// Resubscribe after every failure.
    Unbounded,
}

impl RetryPolicy {
    /// Whether another attempt is allowed after `failures` failures so far.
    pub fn allows(&self, failures: usize) -> bool {
        match self {
            RetryPolicy::Never => false,
            RetryPolicy::Limited(retries) => failures <= *retries,
            RetryPolicy::Unbounded => true,
        }
    }
}
