//! Type aliases for the lazy, finite, non-restartable sequences that flow
//! through every streaming operator in this crate.
//!
//! Every component spec'd as consuming or producing "a lazy sequence of T"
//! is expressed here as a [`BoxStream`] built on the `futures` crate's
//! `Stream` trait rather than a hand-rolled poll loop — the whole pack
//! (and the wider ecosystem) reaches for `futures`/`tokio_stream` for this,
//! so we do too.

use futures::stream::BoxStream as FuturesBoxStream;
use std::future::Future;
use std::pin::Pin;

/// A boxed, owned future following the `Send + 'static` convention used
/// throughout this crate's trait objects (task handles, dispatch hooks).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A boxed, finite, non-restartable sequence of `T`. Ends when the
/// producer closes it or a linked [`crate::Cancellation`] trips.
pub type BoxStream<'a, T> = FuturesBoxStream<'a, T>;
