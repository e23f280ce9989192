//! Data model shared by every calculator and the bucketizer: raw samples,
//! tag identity, and the per-bucket shape calculators consume.
use std::collections::BTreeMap;
use std::time::SystemTime;

/// A tag's value at a point in time: numeric, text, or absent.
#[derive(Clone, Debug, PartialEq)]
pub enum TagValue {
    Numeric(f64),
    Text(String),
    Null,
}

impl TagValue {
    /// `Some(v)` for a numeric value, `None` otherwise. Every built-in
    /// calculator that does arithmetic goes through this rather than
    /// matching `TagValue` directly.
    pub fn as_numeric(&self) -> Option<f64> {
        match self {
            TagValue::Numeric(v) => Some(*v),
            _ => None,
        }
    }
}

/// Data quality, ordered worst to best so `status >= other` reads as
/// "at least as good as".
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum SampleStatus {
    Bad,
    Uncertain,
    Good,
}

/// A single timestamped, quality-tagged sample — both the raw input to the
/// bucketizer and the shape every calculator emits.
#[derive(Clone, Debug, PartialEq)]
pub struct TagValueExtended {
    pub utc_sample_time: SystemTime,
    pub value: TagValue,
    pub status: SampleStatus,
    pub units: Option<String>,
    pub notes: Option<String>,
    pub error: Option<String>,
    pub properties: BTreeMap<String, String>,
}

impl TagValueExtended {
    pub fn new(utc_sample_time: SystemTime, value: TagValue, status: SampleStatus) -> Self {
        TagValueExtended {
            utc_sample_time,
            value,
            status,
            units: None,
            notes: None,
            error: None,
            properties: BTreeMap::new(),
        }
    }

    pub fn with_units(mut self, units: impl Into<String>) -> Self {
        self.units = Some(units.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

/// How a tag's value should be interpreted; only the numeric predicate is
/// load-bearing for the core (the aggregate calculators only operate on
/// numeric samples).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TagDataType {
    Numeric,
    State,
    Text,
}

/// Identity and shape of a tag, as handed to the aggregation pipeline by
/// whatever tag-browsing feature sits above this crate.
#[derive(Clone, Debug)]
pub struct TagSummary {
    pub id: String,
    pub name: String,
    pub units: Option<String>,
    pub data_type: TagDataType,
}

impl TagSummary {
    pub fn new(id: impl Into<String>, name: impl Into<String>, data_type: TagDataType) -> Self {
        TagSummary {
            id: id.into(),
            name: name.into(),
            units: None,
            data_type,
        }
    }

    pub fn with_units(mut self, units: impl Into<String>) -> Self {
        self.units = Some(units.into());
        self
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self.data_type, TagDataType::Numeric)
    }
}

/// The most relevant raw sample immediately outside a bucket on one side,
/// carried forward so calculators like Interpolate have context across a
/// gap in the raw data.
///
/// # Why
/// A bucket with no raw samples of its own (a gap in the source data)
/// still needs to know "what was the value just before this bucket" to
/// interpolate meaningfully. [`BoundaryInfo`] is that one remembered
/// sample, tracked separately from `bestQualityValue` (the best-quality
/// candidate seen) and `closestValue` (the literal closest-in-time
/// candidate) since a quality downgrade should not also discard temporal
/// proximity.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BoundaryInfo {
    pub best_quality_value: Option<TagValueExtended>,
    pub closest_value: Option<TagValueExtended>,
}

impl BoundaryInfo {
    /// The sample calculators should actually use as boundary context:
    /// the closest one, falling back to the best-quality one if no
    /// closest value was ever recorded (the two always agree unless a
    /// later, lower-quality candidate narrowed `closest_value` only).
    pub fn reference_value(&self) -> Option<&TagValueExtended> {
        self.closest_value.as_ref().or(self.best_quality_value.as_ref())
    }

    /// Good when `bestQualityValue` and `closestValue` are the same
    /// sample (no quality/proximity conflict occurred); Uncertain
    /// otherwise, including when no sample was ever recorded.
    pub fn derived_status(&self) -> SampleStatus {
        match (&self.best_quality_value, &self.closest_value) {
            (Some(best), Some(closest)) if best == closest => SampleStatus::Good,
            _ => SampleStatus::Uncertain,
        }
    }
}

/// A fixed-width, half-open time bucket with the raw samples that fell
/// inside it and the boundary context carried in from its neighbors.
///
/// Invariants (enforced by [`super::bucketizer::bucketize`]): every entry
/// of `raw_samples` lies in `[utc_bucket_start, utc_bucket_end)`;
/// `utc_bucket_end - utc_bucket_start` equals the pipeline's sample
/// interval; successive buckets for one tag tile `[utc_query_start,
/// utc_query_end)` without gaps or overlaps.
#[derive(Clone, Debug)]
pub struct TagValueBucket {
    pub utc_bucket_start: SystemTime,
    pub utc_bucket_end: SystemTime,
    pub utc_query_start: SystemTime,
    pub utc_query_end: SystemTime,
    pub raw_samples: Vec<TagValueExtended>,
    pub start_boundary: BoundaryInfo,
    pub end_boundary: BoundaryInfo,
}

impl TagValueBucket {
    pub(crate) fn empty(
        utc_bucket_start: SystemTime,
        utc_bucket_end: SystemTime,
        utc_query_start: SystemTime,
        utc_query_end: SystemTime,
    ) -> Self {
        TagValueBucket {
            utc_bucket_start,
            utc_bucket_end,
            utc_query_start,
            utc_query_end,
            raw_samples: Vec::new(),
            start_boundary: BoundaryInfo::default(),
            end_boundary: BoundaryInfo::default(),
        }
    }

    /// Raw samples whose status is [`SampleStatus::Good`], in time order.
    pub fn good_samples(&self) -> impl Iterator<Item = &TagValueExtended> {
        self.raw_samples.iter().filter(|s| s.status == SampleStatus::Good)
    }
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

    #[test]
    fn boundary_reference_value_prefers_closest_over_best() {
        let info = BoundaryInfo {
            best_quality_value: Some(sample(0, 1.0, SampleStatus::Good)),
            closest_value: Some(sample(1, 2.0, SampleStatus::Uncertain)),
        };
        assert_eq!(info.reference_value().unwrap().utc_sample_time, at(1));
    }

    #[test]
    fn boundary_derived_status_is_good_only_when_both_fields_match() {
        let same = sample(0, 1.0, SampleStatus::Good);
        let matching = BoundaryInfo {
            best_quality_value: Some(same.clone()),
            closest_value: Some(same),
        };
        assert_eq!(matching.derived_status(), SampleStatus::Good);

        let diverging = BoundaryInfo {
            best_quality_value: Some(sample(0, 1.0, SampleStatus::Good)),
            closest_value: Some(sample(1, 2.0, SampleStatus::Uncertain)),
        };
        assert_eq!(diverging.derived_status(), SampleStatus::Uncertain);

        assert_eq!(BoundaryInfo::default().derived_status(), SampleStatus::Uncertain);
    }
}
