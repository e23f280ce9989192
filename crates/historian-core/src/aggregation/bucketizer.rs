//! Streaming time-bucketing: turns one tag's ordered raw samples into a
//! lazy sequence of tiled [`TagValueBucket`]s.
use std::time::{Duration, SystemTime};

use futures::StreamExt;

use crate::error::CoreResult;
use crate::stream::BoxStream;

use super::types::{BoundaryInfo, TagValueBucket, TagValueExtended};

/// Which edge of a bucket a [`BoundaryInfo`] is being folded for.
#[derive(Clone, Copy, PartialEq, Eq)]
enum BoundarySide {
    Start,
    End,
}

/// Folds one more candidate into a [`BoundaryInfo`] that is still
/// accumulating: the `start_boundary` of a bucket (pre-range samples seen
/// while the stream is still upstream of the query range) or the
/// `end_boundary` (in-range samples seen while the bucket is still open,
/// plus the sample that eventually forces it closed).
///
/// The input stream is time-ordered, so for a start boundary a later
/// candidate is always at least as close as the one before it: once a
/// value is recorded, only a strictly older candidate could ever be
/// ignored, which in forward streaming never happens. For an end
/// boundary the roles invert — the first in-range sample is the closest
/// one available *before* the bucket has any data of its own to offer a
/// better anchor, so once it is recorded, later (newer) candidates no
/// longer narrow the boundary; only a quality-indifferent fallback would
/// ever let a later sample in, and this bucketizer never produces one.
/// `best_quality_value` only advances when the eligible candidate is at
/// least as good as the current one; `closest_value` moves in lockstep.
fn fold_boundary(info: &mut BoundaryInfo, candidate: TagValueExtended, side: BoundarySide) {
    let Some(best) = info.best_quality_value.clone() else {
        info.best_quality_value = Some(candidate.clone());
        info.closest_value = Some(candidate);
        return;
    };
    let ignore = match side {
        BoundarySide::Start => candidate.utc_sample_time < best.utc_sample_time,
        BoundarySide::End => candidate.utc_sample_time > best.utc_sample_time,
    };
    if ignore {
        return;
    }
    if candidate.status >= best.status {
        info.best_quality_value = Some(candidate.clone());
        info.closest_value = Some(candidate);
    } else {
        info.closest_value = Some(candidate);
    }
}

struct BucketizeState {
    input: BoxStream<'static, CoreResult<TagValueExtended>>,
    bucket: TagValueBucket,
    /// A sample already pulled from `input` that didn't fit the bucket
    /// current at the time it was read; re-examined against the next
    /// bucket on the following step. This is what lets a single value
    /// drive several consecutive empty-bucket emissions across a gap.
    held: Option<TagValueExtended>,
    finished_input: bool,
    utc_query_end: SystemTime,
    interval: Duration,
}

/// Starts the next bucket, carrying the just-closed bucket's
/// `end_boundary` forward as the new bucket's `start_boundary` — whatever
/// the closed bucket settled on as its own closest-to-end reference (its
/// own in-range data if it had any, otherwise the sample that forced the
/// rollover) is also the closest known sample on the near side of the new
/// bucket.
fn advance_bucket(state: &mut BucketizeState) {
    let next_start = state.bucket.utc_bucket_end;
    let next_end = next_start + state.interval;
    let carried_start_boundary = state.bucket.end_boundary.clone();
    state.bucket = TagValueBucket {
        utc_bucket_start: next_start,
        utc_bucket_end: next_end,
        utc_query_start: state.bucket.utc_query_start,
        utc_query_end: state.bucket.utc_query_end,
        raw_samples: Vec::new(),
        start_boundary: carried_start_boundary,
        end_boundary: BoundaryInfo::default(),
    };
}

async fn step(mut state: BucketizeState) -> Option<(CoreResult<TagValueBucket>, BucketizeState)> {
    loop {
        // A bucket that starts at or after the query end is out of range
        // in both directions this function is called from (mid-stream
        // overflow and post-input tail rolling): stop here rather than
        // emit it.
        if state.bucket.utc_bucket_start >= state.utc_query_end {
            return None;
        }

        let value = if let Some(value) = state.held.take() {
            value
        } else if state.finished_input {
            let emitted = state.bucket.clone();
            advance_bucket(&mut state);
            return Some((Ok(emitted), state));
        } else {
            match state.input.next().await {
                None => {
                    state.finished_input = true;
                    continue;
                }
                Some(Err(err)) => {
                    return Some((Err(err), state));
                }
                Some(Ok(value)) => value,
            }
        };

        if value.utc_sample_time < state.bucket.utc_bucket_start {
            fold_boundary(&mut state.bucket.start_boundary, value, BoundarySide::Start);
            continue;
        }

        if value.utc_sample_time >= state.bucket.utc_bucket_end {
            // This sample forces the bucket closed. If the bucket already
            // folded in-range samples of its own, those take precedence
            // over the forcing sample as the near-side anchor for the
            // next bucket's interpolation.
            fold_boundary(&mut state.bucket.end_boundary, value.clone(), BoundarySide::End);
            let emitted = state.bucket.clone();
            advance_bucket(&mut state);
            state.held = Some(value);
            return Some((Ok(emitted), state));
        }

        if value.utc_sample_time <= state.utc_query_end {
            fold_boundary(&mut state.bucket.end_boundary, value.clone(), BoundarySide::End);
            state.bucket.raw_samples.push(value);
        }
    }
}

/// Consumes one tag's ordered raw samples and emits a lazy sequence of
/// tiled [`TagValueBucket`]s covering `[utc_query_start, utc_query_end)`.
///
/// A single raw-stream error ends the bucket sequence with that same
/// error — the caller sees exactly one `Err` and no further buckets.
pub fn bucketize(
    input: BoxStream<'static, CoreResult<TagValueExtended>>,
    utc_query_start: SystemTime,
    utc_query_end: SystemTime,
    interval: Duration,
) -> BoxStream<'static, CoreResult<TagValueBucket>> {
    let initial = BucketizeState {
        input,
        bucket: TagValueBucket::empty(
            utc_query_start,
            utc_query_start + interval,
            utc_query_start,
            utc_query_end,
        ),
        held: None,
        finished_input: false,
        utc_query_end,
        interval,
    };
    Box::pin(futures::stream::unfold(initial, step))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::types::{SampleStatus, TagValue};
    use futures::stream;
    use proptest::prelude::*;

    fn at(seconds: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(seconds)
    }

    fn sample(seconds: u64, value: f64, status: SampleStatus) -> CoreResult<TagValueExtended> {
        Ok(TagValueExtended::new(at(seconds), TagValue::Numeric(value), status))
    }

    #[tokio::test]
    async fn tiles_the_query_range_into_ceil_interval_buckets() {
        let input: BoxStream<'static, CoreResult<TagValueExtended>> = Box::pin(stream::iter(vec![
            sample(0, 10.0, SampleStatus::Good),
            sample(1, 20.0, SampleStatus::Good),
            sample(2, 30.0, SampleStatus::Bad),
        ]));
        let buckets: Vec<_> = bucketize(input, at(0), at(3), Duration::from_secs(3))
            .collect()
            .await;
        assert_eq!(buckets.len(), 1);
        let bucket = buckets[0].as_ref().unwrap();
        assert_eq!(bucket.utc_bucket_start, at(0));
        assert_eq!(bucket.utc_bucket_end, at(3));
        assert_eq!(bucket.raw_samples.len(), 3);
    }

    #[tokio::test]
    async fn interpolate_seed_scenario_boundary_context_matches_worked_example() {
        // raw = [(t=0, 0), (t=10, 100)], interval=5, range=[0,10)
        // expected downstream interpolation: v(5)=50, v(10)=100.
        let input: BoxStream<'static, CoreResult<TagValueExtended>> = Box::pin(stream::iter(vec![
            sample(0, 0.0, SampleStatus::Good),
            sample(10, 100.0, SampleStatus::Good),
        ]));
        let buckets: Vec<_> = bucketize(input, at(0), at(10), Duration::from_secs(5))
            .collect()
            .await;
        assert_eq!(buckets.len(), 2);

        let first = buckets[0].as_ref().unwrap();
        assert_eq!(first.raw_samples.len(), 1);
        assert_eq!(first.raw_samples[0].utc_sample_time, at(0));
        // The bucket's own in-range sample at t=0 is its end_boundary —
        // the forcing sample at t=10 must not overwrite it, or the next
        // bucket loses its anchor for interpolating back to t=0.
        let first_end_ref = first.end_boundary.reference_value().unwrap();
        assert_eq!(first_end_ref.utc_sample_time, at(0));
        assert_eq!(first_end_ref.value.as_numeric(), Some(0.0));

        let second = buckets[1].as_ref().unwrap();
        assert!(second.raw_samples.is_empty());
        let second_start_ref = second.start_boundary.reference_value().unwrap();
        assert_eq!(second_start_ref.utc_sample_time, at(0));
        let second_end_ref = second.end_boundary.reference_value().unwrap();
        assert_eq!(second_end_ref.utc_sample_time, at(10));
        assert_eq!(second_end_ref.value.as_numeric(), Some(100.0));
    }

    #[tokio::test]
    async fn input_error_ends_the_bucket_sequence() {
        let input: BoxStream<'static, CoreResult<TagValueExtended>> = Box::pin(stream::iter(vec![
            sample(0, 1.0, SampleStatus::Good),
            Err(crate::error::CoreError::invalid_argument("boom")),
        ]));
        let buckets: Vec<_> = bucketize(input, at(0), at(3), Duration::from_secs(3))
            .collect()
            .await;
        assert!(buckets.last().unwrap().is_err());
    }

    #[tokio::test]
    async fn tail_buckets_roll_forward_after_input_ends_early() {
        let input: BoxStream<'static, CoreResult<TagValueExtended>> =
            Box::pin(stream::iter(vec![sample(0, 1.0, SampleStatus::Good)]));
        let buckets: Vec<_> = bucketize(input, at(0), at(9), Duration::from_secs(3))
            .collect()
            .await;
        assert_eq!(buckets.len(), 3);
        assert_eq!(buckets[2].as_ref().unwrap().utc_bucket_start, at(6));
    }

    #[tokio::test]
    async fn pre_range_samples_accumulate_into_the_first_bucket_start_boundary() {
        let input: BoxStream<'static, CoreResult<TagValueExtended>> = Box::pin(stream::iter(vec![
            sample(0, 1.0, SampleStatus::Bad),
            sample(1, 2.0, SampleStatus::Good),
        ]));
        let buckets: Vec<_> = bucketize(input, at(2), at(5), Duration::from_secs(3))
            .collect()
            .await;
        assert_eq!(buckets.len(), 1);
        let bucket = buckets[0].as_ref().unwrap();
        let best = bucket.start_boundary.best_quality_value.as_ref().unwrap();
        assert_eq!(best.utc_sample_time, at(1));
        assert_eq!(best.status, SampleStatus::Good);
    }

    proptest! {
        /// Universal property: a query over `[start, start + span)` at a
        /// given interval always emits exactly `ceil(span / interval)`
        /// buckets, regardless of how the raw samples are scattered
        /// across that range.
        #[test]
        fn emits_exactly_ceil_span_over_interval_buckets(
            span_secs in 1u64..200,
            interval_secs in 1u64..50,
            sample_offsets in proptest::collection::vec(0u64..200, 0..20),
        ) {
            let interval = Duration::from_secs(interval_secs);
            let span = Duration::from_secs(span_secs);
            let query_start = at(1_000);
            let query_end = query_start + span;

            let samples: Vec<CoreResult<TagValueExtended>> = sample_offsets
                .into_iter()
                .map(|offset| sample(1_000 + offset, offset as f64, SampleStatus::Good))
                .collect();
            let input: BoxStream<'static, CoreResult<TagValueExtended>> = Box::pin(stream::iter(samples));

            let expected = span_secs.div_ceil(interval_secs) as usize;
            let buckets = tokio::runtime::Builder::new_current_thread()
                .build()
                .unwrap()
                .block_on(bucketize(input, query_start, query_end, interval).collect::<Vec<_>>());
            prop_assert_eq!(buckets.len(), expected);
            prop_assert!(buckets.iter().all(|b| b.is_ok()));
        }
    }
}
