// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Scorer plugins over pod runtime metrics. Each returns scores in [0, 1]
//! with 1.0 marking the least-loaded pod, so profile weights stay
//! comparable across scorers.

use std::collections::HashMap;
use std::sync::Arc;

use crate::context::SchedulingContext;
use crate::framework::{Plugin, Scorer};
use crate::types::{Pod, PodId};

/// Scores pods by queue depth, min-max normalized over the candidate set.
/// Equal queues score 1.0 everywhere.
pub struct QueueScorer;

impl QueueScorer {
    pub fn new() -> Self {
        Self
    }
}

impl Default for QueueScorer {
    fn default() -> Self {
        Self::new()
    }
}

impl Plugin for QueueScorer {
    fn name(&self) -> &str {
        "queue"
    }

    fn as_scorer(self: Arc<Self>) -> Option<Arc<dyn Scorer>> {
        Some(self)
    }
}

impl Scorer for QueueScorer {
    fn score(&self, _ctx: &SchedulingContext, pods: &[Arc<Pod>]) -> HashMap<PodId, f64> {
        let min = pods.iter().map(|pod| pod.metrics.queue_depth).min().unwrap_or(0);
        let max = pods.iter().map(|pod| pod.metrics.queue_depth).max().unwrap_or(0);

        pods.iter()
            .map(|pod| {
                let score = if max == min {
                    1.0
                } else {
                    (max - pod.metrics.queue_depth) as f64 / (max - min) as f64
                };
                (pod.id.clone(), score)
            })
            .collect()
    }
}

/// Scores pods by free KV-cache headroom: `1.0 - utilization`.
pub struct KvCacheScorer;

impl KvCacheScorer {
    pub fn new() -> Self {
        Self
    }
}

impl Default for KvCacheScorer {
    fn default() -> Self {
        Self::new()
    }
}

impl Plugin for KvCacheScorer {
    fn name(&self) -> &str {
        "kv-cache-utilization"
    }

    fn as_scorer(self: Arc<Self>) -> Option<Arc<dyn Scorer>> {
        Some(self)
    }
}

impl Scorer for KvCacheScorer {
    fn score(&self, _ctx: &SchedulingContext, pods: &[Arc<Pod>]) -> HashMap<PodId, f64> {
        pods.iter()
            .map(|pod| (pod.id.clone(), 1.0 - pod.metrics.kv_cache_utilization))
            .collect()
    }
}
