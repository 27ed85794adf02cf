// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Prometheus metrics for the scheduling pipeline.
//!
//! Two instruments cover the whole core:
//!
//! - [`SchedulerMetrics::plugin_duration`]: per-invocation latency histogram
//!   labeled `(plugin_type, plugin_name)`. Every filter, scorer, picker,
//!   post-cycle, post-response, and profile-picker call records one sample.
//! - [`SchedulerMetrics::e2e_duration`]: one end-to-end latency sample per
//!   `schedule` call, recorded whether the call succeeded or errored.
//!
//! Metrics are observational only and never influence control flow.

use std::sync::LazyLock;
use std::time::Duration;

use prometheus::{Histogram, HistogramOpts, HistogramVec};

/// Exponential buckets from 1 µs to ~0.5 s, factor 2.
fn plugin_buckets() -> Vec<f64> {
    prometheus::exponential_buckets(0.000001, 2.0, 20).expect("exponential buckets should not fail")
}

pub struct SchedulerMetrics {
    pub plugin_duration: HistogramVec,
    pub e2e_duration: Histogram,
}

pub static SCHEDULER_METRICS: LazyLock<SchedulerMetrics> = LazyLock::new(|| SchedulerMetrics {
    plugin_duration: HistogramVec::new(
        HistogramOpts::new(
            "scheduler_plugin_duration_seconds",
            "Scheduling plugin processing latency",
        )
        .buckets(plugin_buckets()),
        &["plugin_type", "plugin_name"],
    )
    .expect("failed to create scheduler_plugin_duration_seconds histogram"),
    e2e_duration: Histogram::with_opts(
        HistogramOpts::new(
            "scheduler_e2e_duration_seconds",
            "End-to-end scheduling latency per request",
        )
        .buckets(plugin_buckets()),
    )
    .expect("failed to create scheduler_e2e_duration_seconds histogram"),
});

/// Register the scheduler histograms with the given Prometheus registry.
/// Called once during gateway setup.
pub fn register_scheduler_metrics(
    registry: &prometheus::Registry,
) -> Result<(), prometheus::Error> {
    let m = &*SCHEDULER_METRICS;
    registry.register(Box::new(m.plugin_duration.clone()))?;
    registry.register(Box::new(m.e2e_duration.clone()))?;
    Ok(())
}

/// Record one plugin invocation latency sample.
pub fn record_plugin_duration(plugin_type: &str, plugin_name: &str, elapsed: Duration) {
    SCHEDULER_METRICS
        .plugin_duration
        .with_label_values(&[plugin_type, plugin_name])
        .observe(elapsed.as_secs_f64());
}

/// Record one scheduler end-to-end latency sample.
pub fn record_e2e_duration(elapsed: Duration) {
    SCHEDULER_METRICS
        .e2e_duration
        .observe(elapsed.as_secs_f64());
}
