//! Wires the bucketizer and the calculator registry into one pipeline: a
//! single raw-sample stream in, one merged stream of aggregate results
//! per tag per requested function out.
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use futures::stream::{self, StreamExt};
use tokio::sync::mpsc;

use crate::error::{CoreError, CoreResult};
use crate::observability::Logger;
use crate::runtime::{AsyncRuntime, TaskExecutorExt};
use crate::stream::BoxStream;

use super::bucketizer::bucketize;
use super::registry::{Calculator, DataFunctionRegistry};
use super::types::{TagSummary, TagValueExtended};

/// One raw sample tagged with the tag it belongs to — the shape the
/// pipeline's single input stream carries, interleaving samples for
/// every tag in a request.
#[derive(Clone, Debug)]
pub struct RawSample {
    pub tag_id: String,
    pub sample: TagValueExtended,
}

/// One tag and the aggregate functions it should be evaluated with.
#[derive(Clone, Debug)]
pub struct AggregationRequest {
    pub tag: TagSummary,
    pub function_ids: Vec<String>,
}

/// One calculator's output for one tag's bucket.
#[derive(Clone, Debug)]
pub struct AggregateResult {
    pub tag_id: String,
    pub function_id: String,
    pub sample: TagValueExtended,
}

const PER_TAG_CHANNEL_CAPACITY: usize = 1024;

/// Runs a set of per-tag aggregate requests over one interleaved raw
/// sample stream.
///
/// # Why
/// A historian adapter has exactly one wire-level stream of raw samples
/// for a query spanning several tags; the pipeline demultiplexes it
/// once, bucketizes each tag independently, and fans each bucket out to
/// every function the caller asked for on that tag — rather than making
/// the caller re-read the upstream source once per tag-function pair.
pub struct AggregationPipeline {
    runtime: Arc<dyn AsyncRuntime>,
    registry: Arc<DataFunctionRegistry>,
    logger: Arc<dyn Logger>,
}

impl AggregationPipeline {
    pub fn new(runtime: Arc<dyn AsyncRuntime>, registry: Arc<DataFunctionRegistry>, logger: Arc<dyn Logger>) -> Self {
        AggregationPipeline { runtime, registry, logger }
    }

    /// Starts the pipeline. Returns immediately with a lazy merged
    /// stream; nothing is read from `input` until the returned stream
    /// is polled.
    ///
    /// A `function_ids` entry that doesn't resolve against the registry
    /// is logged and skipped for that tag — it never fails the whole
    /// call, matching every other local-recovery failure kind in this
    /// crate. `utc_query_start >= utc_query_end` or a non-positive
    /// `interval` is rejected up front as `InvalidArgument`.
    pub fn run(
        &self,
        input: BoxStream<'static, CoreResult<RawSample>>,
        requests: Vec<AggregationRequest>,
        utc_query_start: SystemTime,
        utc_query_end: SystemTime,
        interval: Duration,
    ) -> CoreResult<BoxStream<'static, CoreResult<AggregateResult>>> {
        if requests.is_empty() {
            return Err(CoreError::invalid_argument("at least one tag must be requested"));
        }
        if utc_query_end <= utc_query_start {
            return Err(CoreError::invalid_argument("utc_query_end must be after utc_query_start"));
        }
        if interval.is_zero() {
            return Err(CoreError::invalid_argument("interval must be positive"));
        }

        let mut senders = Vec::with_capacity(requests.len());
        let mut per_tag_streams = Vec::with_capacity(requests.len());

        for request in &requests {
            let (tx, mut rx) = mpsc::channel::<CoreResult<TagValueExtended>>(PER_TAG_CHANNEL_CAPACITY);
            senders.push((request.tag.id.clone(), tx));

            let raw = Box::pin(futures::stream::poll_fn(move |cx| rx.poll_recv(cx)))
                as BoxStream<'static, CoreResult<TagValueExtended>>;

            let buckets = bucketize(raw, utc_query_start, utc_query_end, interval);
            let calculators = self.resolve_calculators(request);
            let tag_id = request.tag.id.clone();
            per_tag_streams.push(fan_out_calculators(tag_id, calculators, buckets, Arc::clone(&self.logger)));
        }

        self.runtime.spawn(demultiplex(input, senders));

        Ok(Box::pin(stream::select_all(per_tag_streams)))
    }

    fn resolve_calculators(&self, request: &AggregationRequest) -> Vec<(String, Calculator)> {
        request
            .function_ids
            .iter()
            .filter_map(|function_id| match self.registry.resolve(function_id) {
                Some(calculator) => Some((function_id.clone(), calculator)),
                None => {
                    self.logger.warn(
                        "unresolved aggregate function id, skipping",
                        &[("tag", request.tag.id.as_str()), ("function", function_id.as_str())],
                    );
                    None
                }
            })
            .collect()
    }
}

/// Pulls every sample out of the combined input and routes it to the
/// channel for its tag; tags with no matching request are dropped. On
/// an input error the same error is broadcast to every live channel so
/// each tag's bucket stream ends with it, matching the rest of this
/// crate's single-producer-failure convention.
async fn demultiplex(
    mut input: BoxStream<'static, CoreResult<RawSample>>,
    senders: Vec<(String, mpsc::Sender<CoreResult<TagValueExtended>>)>,
) {
    while let Some(item) = input.next().await {
        match item {
            Ok(raw) => {
                if let Some((_, tx)) = senders.iter().find(|(tag_id, _)| *tag_id == raw.tag_id) {
                    let _ = tx.send(Ok(raw.sample)).await;
                }
            }
            Err(err) => {
                for (_, tx) in &senders {
                    let _ = tx.send(Err(err.clone())).await;
                }
                return;
            }
        }
    }
}

/// A calculator that fails on one bucket is logged and its result for
/// that bucket-function pair is simply omitted — it never surfaces as
/// an `Err` on the output stream, matching
/// [`CoreError::CalculatorFailure`]'s documented local-recovery policy.
/// Only an upstream input-stream error (`Err(bucket)`) is forwarded.
fn fan_out_calculators(
    tag_id: String,
    calculators: Vec<(String, Calculator)>,
    buckets: BoxStream<'static, CoreResult<super::types::TagValueBucket>>,
    logger: Arc<dyn Logger>,
) -> BoxStream<'static, CoreResult<AggregateResult>> {
    Box::pin(buckets.flat_map(move |bucket| {
        let tag_id = tag_id.clone();
        let results: Vec<CoreResult<AggregateResult>> = match bucket {
            Ok(bucket) => calculators
                .iter()
                .flat_map(|(function_id, calculator)| match calculator(&bucket) {
                    Ok(samples) => samples
                        .into_iter()
                        .map(|sample| {
                            Ok(AggregateResult {
                                tag_id: tag_id.clone(),
                                function_id: function_id.clone(),
                                sample,
                            })
                        })
                        .collect::<Vec<_>>(),
                    Err(err) => {
                        logger.warn(
                            "aggregate calculator failed, skipping this bucket",
                            &[
                                ("tag", tag_id.as_str()),
                                ("function", function_id.as_str()),
                                ("error", err.to_string().as_str()),
                            ],
                        );
                        Vec::new()
                    }
                })
                .collect(),
            Err(err) => vec![Err(err)],
        };
        stream::iter(results)
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::types::{SampleStatus, TagDataType, TagSummary, TagValue};
    use crate::observability::TracingLogger;
    use crate::runtime::TokioRuntime;

    fn at(seconds: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(seconds)
    }

    fn raw(tag_id: &str, seconds: u64, value: f64) -> CoreResult<RawSample> {
        Ok(RawSample {
            tag_id: tag_id.to_string(),
            sample: TagValueExtended::new(at(seconds), TagValue::Numeric(value), SampleStatus::Good),
        })
    }

    #[tokio::test]
    async fn emits_ceil_interval_buckets_per_requested_function() {
        let runtime: Arc<dyn AsyncRuntime> = Arc::new(TokioRuntime::new());
        let pipeline = AggregationPipeline::new(runtime, Arc::new(DataFunctionRegistry::new()), Arc::new(TracingLogger));

        let input: BoxStream<'static, CoreResult<RawSample>> = Box::pin(futures::stream::iter(vec![
            raw("temp", 0, 10.0),
            raw("temp", 1, 20.0),
            raw("temp", 2, 30.0),
        ]));
        let requests = vec![AggregationRequest {
            tag: TagSummary::new("temp", "Temperature", TagDataType::Numeric),
            function_ids: vec!["average".to_string(), "count".to_string()],
        }];

        let results: Vec<_> = pipeline
            .run(input, requests, at(0), at(3), Duration::from_secs(3))
            .unwrap()
            .collect()
            .await;
        assert_eq!(results.len(), 2);
        let functions: Vec<_> = results.iter().map(|r| r.as_ref().unwrap().function_id.clone()).collect();
        assert!(functions.contains(&"average".to_string()));
        assert!(functions.contains(&"count".to_string()));
    }

    #[tokio::test]
    async fn unresolved_function_id_is_skipped_not_failed() {
        let runtime: Arc<dyn AsyncRuntime> = Arc::new(TokioRuntime::new());
        let pipeline = AggregationPipeline::new(runtime, Arc::new(DataFunctionRegistry::new()), Arc::new(TracingLogger));

        let input: BoxStream<'static, CoreResult<RawSample>> =
            Box::pin(futures::stream::iter(vec![raw("temp", 0, 10.0)]));
        let requests = vec![AggregationRequest {
            tag: TagSummary::new("temp", "Temperature", TagDataType::Numeric),
            function_ids: vec!["not_a_real_function".to_string()],
        }];

        let results: Vec<_> = pipeline
            .run(input, requests, at(0), at(3), Duration::from_secs(3))
            .unwrap()
            .collect()
            .await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn failing_custom_calculator_is_skipped_not_surfaced() {
        let runtime: Arc<dyn AsyncRuntime> = Arc::new(TokioRuntime::new());
        let mut registry = DataFunctionRegistry::new();
        registry
            .register_data_function(crate::aggregation::registry::DataFunctionDescriptor {
                id: "always_fails".to_string(),
                display_name: "AlwaysFails".to_string(),
                aliases: vec![],
                calculator: Arc::new(|_| Err(CoreError::CalculatorFailure("boom".to_string()))),
            })
            .unwrap();
        let pipeline = AggregationPipeline::new(runtime, Arc::new(registry), Arc::new(TracingLogger));

        let input: BoxStream<'static, CoreResult<RawSample>> =
            Box::pin(futures::stream::iter(vec![raw("temp", 0, 10.0)]));
        let requests = vec![AggregationRequest {
            tag: TagSummary::new("temp", "Temperature", TagDataType::Numeric),
            function_ids: vec!["always_fails".to_string(), "count".to_string()],
        }];

        let results: Vec<_> = pipeline
            .run(input, requests, at(0), at(3), Duration::from_secs(3))
            .unwrap()
            .collect()
            .await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].as_ref().unwrap().function_id, "count");
    }

    fn one_tag_request() -> Vec<AggregationRequest> {
        vec![AggregationRequest {
            tag: TagSummary::new("temp", "Temperature", TagDataType::Numeric),
            function_ids: vec!["average".to_string()],
        }]
    }

    #[tokio::test]
    async fn rejects_non_positive_interval_and_inverted_range() {
        let runtime: Arc<dyn AsyncRuntime> = Arc::new(TokioRuntime::new());
        let pipeline = AggregationPipeline::new(runtime, Arc::new(DataFunctionRegistry::new()), Arc::new(TracingLogger));
        let input: BoxStream<'static, CoreResult<RawSample>> = Box::pin(futures::stream::empty());
        assert!(pipeline
            .run(input, one_tag_request(), at(3), at(0), Duration::from_secs(1))
            .is_err());

        let input: BoxStream<'static, CoreResult<RawSample>> = Box::pin(futures::stream::empty());
        assert!(pipeline
            .run(input, one_tag_request(), at(0), at(3), Duration::ZERO)
            .is_err());
    }

    #[tokio::test]
    async fn rejects_an_empty_tag_request_list() {
        let runtime: Arc<dyn AsyncRuntime> = Arc::new(TokioRuntime::new());
        let pipeline = AggregationPipeline::new(runtime, Arc::new(DataFunctionRegistry::new()), Arc::new(TracingLogger));
        let input: BoxStream<'static, CoreResult<RawSample>> = Box::pin(futures::stream::empty());
        assert!(pipeline.run(input, vec![], at(0), at(3), Duration::from_secs(1)).is_err());
    }

    #[tokio::test]
    async fn interpolate_can_yield_two_results_for_its_terminal_bucket() {
        let runtime: Arc<dyn AsyncRuntime> = Arc::new(TokioRuntime::new());
        let pipeline = AggregationPipeline::new(runtime, Arc::new(DataFunctionRegistry::new()), Arc::new(TracingLogger));

        let input: BoxStream<'static, CoreResult<RawSample>> =
            Box::pin(futures::stream::iter(vec![raw("temp", 0, 0.0), raw("temp", 10, 100.0)]));
        let requests = vec![AggregationRequest {
            tag: TagSummary::new("temp", "Temperature", TagDataType::Numeric),
            function_ids: vec!["interpolate".to_string()],
        }];

        let mut results: Vec<_> = pipeline
            .run(input, requests, at(0), at(10), Duration::from_secs(5))
            .unwrap()
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .map(|r| r.unwrap().sample)
            .collect();
        results.sort_by_key(|s| s.utc_sample_time);

        // bucket [0,5): one value at t=0; bucket [5,10): two values, at
        // t=5 and the query's closing instant t=10 — the spec's worked
        // interpolate scenario (raw (0,0) and (10,100), interval 5,
        // range [0,10)) expects v(0)=0, v(5)=50, v(10)=100.
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].utc_sample_time, at(0));
        assert_eq!(results[0].value.as_numeric(), Some(0.0));
        assert_eq!(results[1].utc_sample_time, at(5));
        assert_eq!(results[1].value.as_numeric(), Some(50.0));
        assert_eq!(results[2].utc_sample_time, at(10));
        assert_eq!(results[2].value.as_numeric(), Some(100.0));
    }
}
