//! Built-in aggregate calculators: each one reduces a single
//! [`TagValueBucket`] to a single [`TagValueExtended`] output sample.
use std::sync::OnceLock;
use std::time::{Duration, SystemTime};

use super::types::{SampleStatus, TagValue, TagValueBucket, TagValueExtended};

/// Stamped onto every calculator output as the `X-Powered-By` property,
/// identifying which build of this crate computed the value — useful
/// when several historian adapter versions are live at once and a
/// consumer needs to tell their aggregates apart.
fn powered_by() -> &'static str {
    static VALUE: OnceLock<String> = OnceLock::new();
    VALUE.get_or_init(|| format!("historian-core/{}", env!("CARGO_PKG_VERSION")))
}

fn stamped(mut sample: TagValueExtended) -> TagValueExtended {
    sample.properties.insert("X-Powered-By".to_string(), powered_by().to_string());
    sample
}

fn uncertain_at(at: SystemTime) -> TagValueExtended {
    stamped(TagValueExtended::new(at, TagValue::Null, SampleStatus::Uncertain))
}

fn good_numeric_at(at: SystemTime, value: f64) -> TagValueExtended {
    stamped(TagValueExtended::new(at, TagValue::Numeric(value), SampleStatus::Good))
}

fn good_values(bucket: &TagValueBucket) -> Vec<f64> {
    bucket.good_samples().filter_map(|s| s.value.as_numeric()).collect()
}

/// The status [`average`] and [`count`] report: `Good` only when the
/// bucket held at least one raw sample and every one of them was
/// `Good`; `Uncertain` otherwise (including an empty bucket, which
/// carries no evidence either way).
fn all_raw_good_status(bucket: &TagValueBucket) -> SampleStatus {
    if !bucket.raw_samples.is_empty() && bucket.raw_samples.iter().all(|s| s.status == SampleStatus::Good) {
        SampleStatus::Good
    } else {
        SampleStatus::Uncertain
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Bessel-corrected (divide by `n - 1`) sample variance. A single
/// sample has no spread to measure, so it reports `0.0` rather than the
/// `NaN` an `n - 1` divisor would otherwise produce.
fn sample_variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let avg = mean(values);
    values.iter().map(|v| (v - avg).powi(2)).sum::<f64>() / (values.len() - 1) as f64
}

/// The value immediately before the bucket, or the closest raw sample
/// already inside it, whichever is more recent — the left anchor
/// [`interpolate`] and [`range`]-style gap-fills extrapolate from.
fn left_anchor(bucket: &TagValueBucket) -> Option<&TagValueExtended> {
    bucket
        .raw_samples
        .iter()
        .filter(|s| s.status != SampleStatus::Bad)
        .last()
        .or_else(|| bucket.start_boundary.reference_value())
}

fn linear_interpolate(at: SystemTime, left: &TagValueExtended, right: &TagValueExtended) -> Option<f64> {
    let v0 = left.value.as_numeric()?;
    let v1 = right.value.as_numeric()?;
    if left.utc_sample_time == right.utc_sample_time {
        return Some(v1);
    }
    let span = right
        .utc_sample_time
        .duration_since(left.utc_sample_time)
        .unwrap_or(Duration::ZERO)
        .as_secs_f64();
    if span == 0.0 {
        return Some(v1);
    }
    let offset = at
        .duration_since(left.utc_sample_time)
        .unwrap_or(Duration::ZERO)
        .as_secs_f64();
    Some(v0 + (offset / span) * (v1 - v0))
}

/// Linear interpolation of the tag's value at `utc_bucket_start`,
/// bridging across gaps using the last known sample on either side. When
/// this bucket reaches or crosses `utc_query_end` (the last bucket of
/// the query), a second value is also emitted there, clipped to
/// `utc_query_end` rather than the bucket's own (possibly overshooting)
/// end — so a query range that doesn't divide evenly by the interval
/// still gets its closing value at the instant the caller asked for.
pub fn interpolate(bucket: &TagValueBucket) -> Vec<TagValueExtended> {
    let left = left_anchor(bucket);
    let right = bucket.end_boundary.reference_value().or(left);

    let value_at = |at: SystemTime| match (left, right) {
        (Some(left), Some(right)) => match linear_interpolate(at, left, right) {
            Some(value) => good_numeric_at(at, value),
            None => uncertain_at(at),
        },
        _ => uncertain_at(at),
    };

    let mut out = vec![value_at(bucket.utc_bucket_start)];
    if bucket.utc_bucket_end >= bucket.utc_query_end && bucket.utc_query_end > bucket.utc_bucket_start {
        out.push(value_at(bucket.utc_query_end));
    }
    out
}

/// Arithmetic mean of the bucket's good samples, falling back to the
/// nearest boundary reference (marked `Uncertain`) when none were
/// recorded. Status is `Good` only when every raw sample in the bucket
/// was `Good`; a bucket with any `Bad`/`Uncertain` raw sample still
/// averages just the good ones but reports `Uncertain` overall, since
/// the mean was computed from partial evidence.
pub fn average(bucket: &TagValueBucket) -> TagValueExtended {
    let at = bucket.utc_bucket_start;
    let values = good_values(bucket);
    if values.is_empty() {
        return boundary_fallback(bucket, at);
    }
    stamped(TagValueExtended::new(at, TagValue::Numeric(mean(&values)), all_raw_good_status(bucket)))
}

fn boundary_fallback(bucket: &TagValueBucket, at: SystemTime) -> TagValueExtended {
    match bucket
        .start_boundary
        .reference_value()
        .or_else(|| bucket.end_boundary.reference_value())
        .and_then(|v| v.value.as_numeric())
    {
        Some(value) => stamped(TagValueExtended::new(at, TagValue::Numeric(value), SampleStatus::Uncertain)),
        None => uncertain_at(at),
    }
}

/// The good-status sample with the smallest numeric value, returned as
/// found — its own timestamp, units and notes survive, unlike the other
/// calculators which re-stamp their result at `utcBucketStart`.
pub fn minimum(bucket: &TagValueBucket) -> TagValueExtended {
    match extreme_sample(bucket, |a, b| a < b) {
        Some(sample) => stamped(sample.clone()),
        None => boundary_fallback(bucket, bucket.utc_bucket_start),
    }
}

/// The good-status sample with the largest numeric value, returned as
/// found (see [`minimum`]).
pub fn maximum(bucket: &TagValueBucket) -> TagValueExtended {
    match extreme_sample(bucket, |a, b| a > b) {
        Some(sample) => stamped(sample.clone()),
        None => boundary_fallback(bucket, bucket.utc_bucket_start),
    }
}

fn extreme_sample(bucket: &TagValueBucket, better: fn(f64, f64) -> bool) -> Option<&TagValueExtended> {
    bucket.good_samples().filter(|s| s.value.as_numeric().is_some()).fold(None, |acc, candidate| {
        let candidate_value = candidate.value.as_numeric().unwrap();
        match acc {
            None => Some(candidate),
            Some(best) if better(candidate_value, best.value.as_numeric().unwrap()) => Some(candidate),
            Some(best) => Some(best),
        }
    })
}

/// Count of good samples in the bucket (`0` if none). Status mirrors
/// [`average`]'s rule: `Good` only when every raw sample was `Good`,
/// `Uncertain` otherwise — a count drawn from a bucket with any bad
/// data, or with no raw samples at all, is still reported, just not
/// vouched for.
pub fn count(bucket: &TagValueBucket) -> TagValueExtended {
    stamped(TagValueExtended::new(
        bucket.utc_bucket_start,
        TagValue::Numeric(good_values(bucket).len() as f64),
        all_raw_good_status(bucket),
    ))
}

/// `maximum - minimum` over the bucket's good samples.
pub fn range(bucket: &TagValueBucket) -> TagValueExtended {
    let at = bucket.utc_bucket_start;
    let values = good_values(bucket);
    if values.is_empty() {
        return boundary_fallback(bucket, at);
    }
    let lo = values.iter().cloned().fold(f64::INFINITY, f64::min);
    let hi = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    good_numeric_at(at, hi - lo)
}

/// Signed `first - last` over the bucket's good samples, in time order.
/// Zero for a single-sample bucket. Falls back to the boundary
/// reference when the bucket has no good samples at all.
pub fn delta(bucket: &TagValueBucket) -> TagValueExtended {
    let at = bucket.utc_bucket_start;
    let values = good_values(bucket);
    match (values.first(), values.last()) {
        (Some(first), Some(last)) => good_numeric_at(at, first - last),
        _ => boundary_fallback(bucket, at),
    }
}

/// Percentage of raw samples in the bucket with `Good` status.
/// `Uncertain` with value `0.0` on an empty bucket (no raw samples at
/// all) rather than treating the absence of data as 100% or 0% good.
pub fn percent_good(bucket: &TagValueBucket) -> TagValueExtended {
    percent_with_status(bucket, SampleStatus::Good)
}

/// Percentage of raw samples in the bucket with `Bad` status. Same
/// empty-bucket convention as [`percent_good`].
pub fn percent_bad(bucket: &TagValueBucket) -> TagValueExtended {
    percent_with_status(bucket, SampleStatus::Bad)
}

fn percent_with_status(bucket: &TagValueBucket, status: SampleStatus) -> TagValueExtended {
    let at = bucket.utc_bucket_start;
    if bucket.raw_samples.is_empty() {
        return uncertain_at(at);
    }
    let matching = bucket.raw_samples.iter().filter(|s| s.status == status).count();
    let pct = (matching as f64 / bucket.raw_samples.len() as f64) * 100.0;
    good_numeric_at(at, pct)
}

/// Bessel-corrected sample variance of the bucket's good samples.
pub fn variance(bucket: &TagValueBucket) -> TagValueExtended {
    let at = bucket.utc_bucket_start;
    let values = good_values(bucket);
    if values.is_empty() {
        return boundary_fallback(bucket, at);
    }
    good_numeric_at(at, sample_variance(&values))
}

/// Square root of [`variance`]'s Bessel-corrected sample variance.
/// Carries the average, variance, and the `average ± 3 * std_dev` band
/// it was computed from as named properties, so a caller charting this
/// value doesn't have to re-run `average`/`variance` separately to draw
/// control limits around it.
pub fn standard_deviation(bucket: &TagValueBucket) -> TagValueExtended {
    let at = bucket.utc_bucket_start;
    let values = good_values(bucket);
    if values.is_empty() {
        return boundary_fallback(bucket, at);
    }
    let avg = mean(&values);
    let var = sample_variance(&values);
    let std_dev = var.sqrt();
    let mut out = good_numeric_at(at, std_dev);
    out.properties.insert("average".to_string(), avg.to_string());
    out.properties.insert("variance".to_string(), var.to_string());
    out.properties.insert("upper_bound_3_sigma".to_string(), (avg + 3.0 * std_dev).to_string());
    out.properties.insert("lower_bound_3_sigma".to_string(), (avg - 3.0 * std_dev).to_string());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn at(seconds: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(seconds)
    }

    fn sample(seconds: u64, value: f64, status: SampleStatus) -> TagValueExtended {
        TagValueExtended::new(at(seconds), TagValue::Numeric(value), status)
    }

    fn bucket_with(raw_samples: Vec<TagValueExtended>) -> TagValueBucket {
        let mut bucket = TagValueBucket::empty(at(0), at(5), at(0), at(10));
        bucket.raw_samples = raw_samples;
        bucket
    }

    #[test]
    fn interpolate_midpoint_between_two_boundary_samples() {
        let mut bucket = TagValueBucket::empty(at(0), at(5), at(0), at(10));
        bucket.raw_samples.push(sample(0, 0.0, SampleStatus::Good));
        bucket.end_boundary.best_quality_value = Some(sample(10, 100.0, SampleStatus::Good));
        bucket.end_boundary.closest_value = Some(sample(10, 100.0, SampleStatus::Good));
        let out = interpolate(&bucket);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].utc_sample_time, at(0));
        assert_eq!(out[0].value.as_numeric(), Some(0.0));
        assert_eq!(out[0].status, SampleStatus::Good);
    }

    #[test]
    fn interpolate_emits_a_second_value_at_query_end_for_the_terminal_bucket() {
        let mut bucket = TagValueBucket::empty(at(5), at(10), at(0), at(10));
        bucket.start_boundary.best_quality_value = Some(sample(0, 0.0, SampleStatus::Good));
        bucket.start_boundary.closest_value = Some(sample(0, 0.0, SampleStatus::Good));
        bucket.end_boundary.best_quality_value = Some(sample(10, 100.0, SampleStatus::Good));
        bucket.end_boundary.closest_value = Some(sample(10, 100.0, SampleStatus::Good));
        let out = interpolate(&bucket);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].utc_sample_time, at(5));
        assert_eq!(out[0].value.as_numeric(), Some(50.0));
        assert_eq!(out[1].utc_sample_time, at(10));
        assert_eq!(out[1].value.as_numeric(), Some(100.0));
    }

    #[test]
    fn interpolate_non_terminal_bucket_emits_only_the_start_value() {
        let mut bucket = TagValueBucket::empty(at(0), at(5), at(0), at(15));
        bucket.end_boundary.best_quality_value = Some(sample(5, 50.0, SampleStatus::Good));
        bucket.end_boundary.closest_value = Some(sample(5, 50.0, SampleStatus::Good));
        let out = interpolate(&bucket);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn average_ignores_bad_samples_but_reports_uncertain_when_any_are_bad() {
        // matches the spec's worked seed scenario: samples
        // (t=0,v=10,Good), (t=1,v=20,Good), (t=2,v=30,Bad), interval=3,
        // range [0,3) -> one Average bucket at t=0 with value 15,
        // status Uncertain.
        let bucket = bucket_with(vec![
            sample(0, 10.0, SampleStatus::Good),
            sample(1, 20.0, SampleStatus::Good),
            sample(2, 30.0, SampleStatus::Bad),
        ]);
        let out = average(&bucket);
        assert_eq!(out.value.as_numeric(), Some(15.0));
        assert_eq!(out.status, SampleStatus::Uncertain);
    }

    #[test]
    fn average_is_good_only_when_every_raw_sample_was_good() {
        let bucket = bucket_with(vec![
            sample(1, 10.0, SampleStatus::Good),
            sample(2, 20.0, SampleStatus::Good),
        ]);
        assert_eq!(average(&bucket).status, SampleStatus::Good);
    }

    #[test]
    fn average_on_empty_bucket_falls_back_to_boundary() {
        let mut bucket = bucket_with(vec![]);
        bucket.start_boundary.best_quality_value = Some(sample(0, 7.0, SampleStatus::Good));
        bucket.start_boundary.closest_value = Some(sample(0, 7.0, SampleStatus::Good));
        let out = average(&bucket);
        assert_eq!(out.value.as_numeric(), Some(7.0));
        assert_eq!(out.status, SampleStatus::Uncertain);
    }

    #[test]
    fn minimum_and_maximum_preserve_the_winning_sample_including_its_own_timestamp() {
        let bucket = bucket_with(vec![
            sample(1, 10.0, SampleStatus::Good),
            sample(2, -5.0, SampleStatus::Good),
            sample(3, 20.0, SampleStatus::Good),
        ]);
        let min = minimum(&bucket);
        assert_eq!(min.value.as_numeric(), Some(-5.0));
        assert_eq!(min.utc_sample_time, at(2));
        let max = maximum(&bucket);
        assert_eq!(max.value.as_numeric(), Some(20.0));
        assert_eq!(max.utc_sample_time, at(3));
    }

    #[test]
    fn minimum_ignores_bad_samples() {
        let bucket = bucket_with(vec![
            sample(1, -100.0, SampleStatus::Bad),
            sample(2, 10.0, SampleStatus::Good),
        ]);
        assert_eq!(minimum(&bucket).value.as_numeric(), Some(10.0));
    }

    #[test]
    fn count_on_an_empty_bucket_is_zero_but_uncertain() {
        // mirrors average's rule: an empty bucket carries no evidence
        // that "everything was good", so the count is reported, not
        // vouched for.
        let bucket = bucket_with(vec![]);
        let out = count(&bucket);
        assert_eq!(out.value.as_numeric(), Some(0.0));
        assert_eq!(out.status, SampleStatus::Uncertain);
    }

    #[test]
    fn count_is_good_when_every_raw_sample_was_good() {
        let bucket = bucket_with(vec![
            sample(1, 1.0, SampleStatus::Good),
            sample(2, 2.0, SampleStatus::Good),
        ]);
        let out = count(&bucket);
        assert_eq!(out.value.as_numeric(), Some(2.0));
        assert_eq!(out.status, SampleStatus::Good);
    }

    #[test]
    fn count_is_uncertain_when_any_raw_sample_was_bad() {
        let bucket = bucket_with(vec![
            sample(1, 1.0, SampleStatus::Good),
            sample(2, 2.0, SampleStatus::Bad),
        ]);
        let out = count(&bucket);
        assert_eq!(out.value.as_numeric(), Some(1.0));
        assert_eq!(out.status, SampleStatus::Uncertain);
    }

    #[test]
    fn range_is_spread_of_good_samples() {
        let bucket = bucket_with(vec![
            sample(1, 10.0, SampleStatus::Good),
            sample(2, -5.0, SampleStatus::Good),
        ]);
        assert_eq!(range(&bucket).value.as_numeric(), Some(15.0));
    }

    #[test]
    fn delta_is_signed_first_minus_last() {
        let bucket = bucket_with(vec![
            sample(1, 10.0, SampleStatus::Good),
            sample(2, 4.0, SampleStatus::Good),
        ]);
        assert_eq!(delta(&bucket).value.as_numeric(), Some(6.0));
    }

    #[test]
    fn delta_on_single_sample_is_zero() {
        let bucket = bucket_with(vec![sample(1, 10.0, SampleStatus::Good)]);
        assert_eq!(delta(&bucket).value.as_numeric(), Some(0.0));
    }

    #[test]
    fn percent_good_and_bad_on_empty_bucket_are_uncertain() {
        let bucket = bucket_with(vec![]);
        let good = percent_good(&bucket);
        let bad = percent_bad(&bucket);
        assert_eq!(good.status, SampleStatus::Uncertain);
        assert_eq!(bad.status, SampleStatus::Uncertain);
    }

    #[test]
    fn percent_good_counts_status_ratio() {
        let bucket = bucket_with(vec![
            sample(1, 1.0, SampleStatus::Good),
            sample(2, 1.0, SampleStatus::Good),
            sample(3, 1.0, SampleStatus::Bad),
            sample(4, 1.0, SampleStatus::Uncertain),
        ]);
        assert_eq!(percent_good(&bucket).value.as_numeric(), Some(50.0));
        assert_eq!(percent_bad(&bucket).value.as_numeric(), Some(25.0));
    }

    #[test]
    fn variance_is_bessel_corrected() {
        let bucket = bucket_with(vec![
            sample(1, 2.0, SampleStatus::Good),
            sample(2, 4.0, SampleStatus::Good),
            sample(3, 6.0, SampleStatus::Good),
        ]);
        // mean=4, squared deviations sum to 8, divided by (n-1)=2 -> 4.0
        let var = variance(&bucket).value.as_numeric().unwrap();
        assert!((var - 4.0).abs() < 1e-9);
        let sd_sample = standard_deviation(&bucket);
        let sd = sd_sample.value.as_numeric().unwrap();
        assert!((sd - var.sqrt()).abs() < 1e-9);
        assert_eq!(sd_sample.properties.get("average").unwrap(), "4");
        assert_eq!(sd_sample.properties.get("variance").unwrap(), "4");
        assert!(sd_sample.properties.contains_key("upper_bound_3_sigma"));
        assert!(sd_sample.properties.contains_key("lower_bound_3_sigma"));
    }

    #[test]
    fn variance_of_a_single_sample_is_zero_not_nan() {
        let bucket = bucket_with(vec![sample(1, 5.0, SampleStatus::Good)]);
        assert_eq!(variance(&bucket).value.as_numeric(), Some(0.0));
        assert_eq!(standard_deviation(&bucket).value.as_numeric(), Some(0.0));
    }

    #[test]
    fn every_output_carries_the_powered_by_property() {
        let bucket = bucket_with(vec![sample(1, 1.0, SampleStatus::Good)]);
        let out = average(&bucket);
        assert!(out.properties.get("X-Powered-By").unwrap().starts_with("historian-core/"));
    }
}
