//! Cooperative cancellation primitive shared by every streaming operator.
//!
//! # Why
//! Every long-running operation in this crate — a subscription's reader, a
//! dispatch loop, an aggregation pipeline — must be interruptible without
//! the producer blocking on a lock the consumer might never release. A
//! single atomic flag behind an `Arc`, checked cooperatively at yield
//! points, is the cheapest primitive that satisfies that and composes
//! across an arbitrary number of independent triggers (spec §4.1: "array
//! of linked cancellation signals").
//!
//! # How
//! [`Cancellation::new`] starts a fresh, independent token. [`Cancellation::child`]
//! clones the same underlying flag (cancelling the child cancels the
//! parent and vice versa — they are the same signal). [`Cancellation::any_of`]
//! instead composes several *independent* flags into one derived view whose
//! `is_cancelled` is true the moment any one of them trips; cancelling the
//! derived view only trips its own flag, leaving the sources untouched.
//!
//! # Trade-offs
//! There is no callback/notify mechanism — callers poll `is_cancelled()` at
//! their own yield points. A notify-on-cancel primitive would need an
//! async condvar or a broadcast channel per token, which is more machinery
//! than any caller in this crate needs: every loop here already wakes on
//! its own queue and can check the flag each time it does.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Clone, Debug, Default)]
pub struct Cancellation {
    inner: Arc<CancellationState>,
}

#[derive(Debug, Default)]
struct CancellationState {
    flag: AtomicBool,
    /// Additional flags this token also considers cancelled. Populated
    /// only by [`Cancellation::any_of`]; empty for ordinary tokens and
    /// children, which share a single flag directly instead.
    linked: Vec<Cancellation>,
}

impl Cancellation {
    /// A fresh token, not cancelled.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CancellationState {
                flag: AtomicBool::new(false),
                linked: Vec::new(),
            }),
        }
    }

    /// True if this token, or (for a token built with [`Cancellation::any_of`])
    /// any of the signals it links, has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.inner.flag.load(Ordering::Acquire)
            || self.inner.linked.iter().any(Cancellation::is_cancelled)
    }

    /// Trips this token. Returns `true` the first time it is cancelled and
    /// `false` on every subsequent call — idempotent, as the spec requires
    /// for `Cancel()` on the subscription channel.
    pub fn cancel(&self) -> bool {
        self.inner
            .flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// A clone sharing this token's own flag: cancelling either cancels
    /// both.
    pub fn child(&self) -> Self {
        self.clone()
    }

    /// A derived token that reports cancelled as soon as any of `signals`
    /// does, without tying their individual flags together. Cancelling the
    /// returned token does not cancel any of `signals`.
    pub fn any_of(signals: impl IntoIterator<Item = Cancellation>) -> Self {
        Self {
            inner: Arc::new(CancellationState {
                flag: AtomicBool::new(false),
                linked: signals.into_iter().collect(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_token_is_not_cancelled() {
        assert!(!Cancellation::new().is_cancelled());
    }

    #[test]
    fn cancel_is_idempotent() {
        let token = Cancellation::new();
        assert!(token.cancel());
        assert!(!token.cancel());
        assert!(token.is_cancelled());
    }

    #[test]
    fn child_shares_the_parent_flag() {
        let parent = Cancellation::new();
        let child = parent.child();
        assert!(!child.is_cancelled());
        parent.cancel();
        assert!(child.is_cancelled());
    }

    #[test]
    fn any_of_trips_when_one_source_trips() {
        let a = Cancellation::new();
        let b = Cancellation::new();
        let derived = Cancellation::any_of([a.clone(), b.clone()]);
        assert!(!derived.is_cancelled());
        b.cancel();
        assert!(derived.is_cancelled());
        // cancelling the derived view does not propagate back to sources
        let c = Cancellation::new();
        let derived2 = Cancellation::any_of([c.clone()]);
        derived2.cancel();
        assert!(!c.is_cancelled());
        assert!(derived2.is_cancelled());
    }
}
