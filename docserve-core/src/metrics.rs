//! Request outcome, inference latency and output volume metrics.

use std::time::Duration;

use prometheus::{Encoder, Histogram, HistogramOpts, IntCounterVec, Opts, Registry, TextEncoder};
use snafu::ResultExt;

use crate::{
    consts::{
        LAYOUT_LATENCY_BUCKETS, LAYOUT_REGIONS_BUCKETS, TABLE_LATENCY_BUCKETS,
        TABLE_TABLES_BUCKETS,
    },
    error::{DocServeError, MetricsSnafu},
};

/// Outcome label of `*_requests_total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Error,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Error => "error",
        }
    }
}

/// The three series of one service, registered in their own registry.
#[derive(Clone)]
pub struct ServiceMetrics {
    registry: Registry,
    requests_total: IntCounterVec,
    inference_latency: Histogram,
    output_volume: Histogram,
}

impl ServiceMetrics {
    pub fn layout() -> Result<Self, DocServeError> {
        Self::new(
            "layout",
            &LAYOUT_LATENCY_BUCKETS,
            HistogramOpts::new(
                "layout_regions_per_request",
                "Number of layout regions detected per request",
            )
            .buckets(LAYOUT_REGIONS_BUCKETS.to_vec()),
        )
    }

    pub fn table() -> Result<Self, DocServeError> {
        Self::new(
            "table",
            &TABLE_LATENCY_BUCKETS,
            HistogramOpts::new(
                "table_tables_per_request",
                "Number of tables processed per request",
            )
            .buckets(TABLE_TABLES_BUCKETS.to_vec()),
        )
    }

    fn new(
        prefix: &str,
        latency_buckets: &[f64],
        volume: HistogramOpts,
    ) -> Result<Self, DocServeError> {
        let registry = Registry::new();

        let requests_total = IntCounterVec::new(
            Opts::new(
                format!("{prefix}_requests_total"),
                "Total number of predict requests",
            ),
            &["status"],
        )
        .context(MetricsSnafu)?;
        let inference_latency = Histogram::with_opts(
            HistogramOpts::new(
                format!("{prefix}_inference_latency_seconds"),
                "Inference latency in seconds",
            )
            .buckets(latency_buckets.to_vec()),
        )
        .context(MetricsSnafu)?;
        let output_volume = Histogram::with_opts(volume).context(MetricsSnafu)?;

        registry
            .register(Box::new(requests_total.clone()))
            .context(MetricsSnafu)?;
        registry
            .register(Box::new(inference_latency.clone()))
            .context(MetricsSnafu)?;
        registry
            .register(Box::new(output_volume.clone()))
            .context(MetricsSnafu)?;

        Ok(Self {
            registry,
            requests_total,
            inference_latency,
            output_volume,
        })
    }

    pub fn record_outcome(&self, outcome: Outcome) {
        self.requests_total
            .with_label_values(&[outcome.as_str()])
            .inc();
    }

    /// Latency of the predictor call and the number of boxes or tables it produced.
    pub fn record_inference(&self, latency: Duration, volume: usize) {
        self.inference_latency.observe(latency.as_secs_f64());
        self.output_volume.observe(volume as f64);
    }

    pub fn outcome_count(&self, outcome: Outcome) -> u64 {
        self.requests_total
            .with_label_values(&[outcome.as_str()])
            .get()
    }

    pub fn content_type(&self) -> String {
        TextEncoder::new().format_type().to_string()
    }

    /// Text exposition of every series.
    pub fn encode(&self) -> Result<String, DocServeError> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .context(MetricsSnafu)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}
