//! The crate's single error domain.
//!
//! # Why one enum
//! Every public operation in this crate surfaces one of a small, closed set
//! of failure kinds (spec §7): a contract violation the caller made
//! (`InvalidArgument`), a call arriving after shutdown (`Disposed`), a
//! capacity limit (`TooManySubscriptions`), cooperative cancellation, an
//! `OnTopicsAdded` hook failure that must unwind the subscribe call that
//! triggered it, and the three *local-recovery* kinds that are logged and
//! counted rather than surfaced (`DispatchFailure`, `CalculatorFailure`,
//! `InputStreamFailure` — the latter is still constructed and attached to a
//! closed stream, just never returned from a function call the way the
//! others are).
//!
//! Keeping these in one `#[non_exhaustive]` enum — rather than one type per
//! component — means a caller matching on `CoreError` gets the same
//! vocabulary regardless of which component raised it.

/// Convenience alias used throughout the crate's public signatures.
pub type CoreResult<T> = Result<T, CoreError>;

#[derive(Clone, Debug, thiserror::Error)]
#[non_exhaustive]
pub enum CoreError {
    /// A required parameter was missing, null, or otherwise malformed —
    /// includes `utcStart >= utcEnd`, `sampleInterval <= 0`, and an
    /// unparseable request. The input sequence, if any, is never consumed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The call landed after the owning component was shut down.
    #[error("component disposed")]
    Disposed,

    /// `maxSubscriptionCount` was exceeded.
    #[error("too many subscriptions (limit {limit})")]
    TooManySubscriptions { limit: usize },

    /// A cancellation signal tripped. Closes the output sequence cleanly;
    /// not surfaced as an `Err` to a caller unless the caller supplied the
    /// signal themselves and is inspecting why their own operation ended.
    #[error("operation cancelled")]
    Cancelled,

    /// The owner's `OnTopicsAdded` hook returned an error while a
    /// `Subscribe` call was synchronously waiting on a 0→1 transition. The
    /// subscription that triggered the transition is rolled back before
    /// this is returned.
    #[error("upstream attach hook failed: {0}")]
    UpstreamHookFailure(String),

    /// Delivery to one subscriber's channel failed. Never surfaced to a
    /// caller — logged and counted by the dispatch loop, and every other
    /// subscriber in the same batch is still served.
    #[error("dispatch to subscriber failed: {0}")]
    DispatchFailure(String),

    /// A calculator raised on one bucket. Logged and skipped; the pipeline
    /// keeps running for subsequent buckets and other functions.
    #[error("aggregate calculator failed: {0}")]
    CalculatorFailure(String),

    /// The raw-sample producer closed with an error. The aggregation
    /// output stream is closed with this same error.
    #[error("raw sample stream failed: {0}")]
    InputStreamFailure(String),
}

impl CoreError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        CoreError::InvalidArgument(message.into())
    }
}
