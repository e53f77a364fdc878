//! # Metrics Sinks
//!
//! Counter sinks for orchestration metrics. [`OtelMetricsSink`] records through
//! the global OpenTelemetry meter provider; [`TracingMetricsSink`] only logs.

use async_trait::async_trait;
use dashmap::DashMap;
use opentelemetry::metrics::{Counter, Meter};
use opentelemetry::KeyValue;
use std::fmt;
use tracing::debug;

use super::MetricsSink;
use crate::error::ServiceResult;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricAttribute {
    pub key: &'static str,
    pub value: String,
}

impl MetricAttribute {
    pub fn new(key: &'static str, value: impl ToString) -> Self {
        Self {
            key,
            value: value.to_string(),
        }
    }
}

impl fmt::Display for MetricAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

/// Lazily creates one `u64` counter per metric name.
pub struct OtelMetricsSink {
    meter: Meter,
    counters: DashMap<String, Counter<u64>>,
}

impl OtelMetricsSink {
    pub fn new() -> Self {
        Self::with_meter(opentelemetry::global::meter("sync-orchestrator"))
    }

    pub fn with_meter(meter: Meter) -> Self {
        Self {
            meter,
            counters: DashMap::new(),
        }
    }

    fn counter(&self, metric: &str) -> Counter<u64> {
        self.counters
            .entry(metric.to_string())
            .or_insert_with(|| {
                self.meter
                    .u64_counter(metric.to_string())
                    .with_description("Connection manager counter")
                    .build()
            })
            .clone()
    }
}

impl Default for OtelMetricsSink {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for OtelMetricsSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OtelMetricsSink")
            .field("counters", &self.counters.len())
            .finish()
    }
}

#[async_trait]
impl MetricsSink for OtelMetricsSink {
    async fn record_count(&self, metric: &str, attributes: &[MetricAttribute]) -> ServiceResult<()> {
        let labels: Vec<KeyValue> = attributes
            .iter()
            .map(|attribute| KeyValue::new(attribute.key, attribute.value.clone()))
            .collect();
        self.counter(metric).add(1, &labels);
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetricsSink;

#[async_trait]
impl MetricsSink for TracingMetricsSink {
    async fn record_count(&self, metric: &str, attributes: &[MetricAttribute]) -> ServiceResult<()> {
        let rendered: Vec<String> = attributes.iter().map(ToString::to_string).collect();
        debug!(metric = %metric, attributes = %rendered.join(","), "Metric counter incremented");
        Ok(())
    }
}
