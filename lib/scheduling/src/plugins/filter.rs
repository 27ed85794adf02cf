// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Filter plugins: capacity shedding, queue and KV-cache banding, LoRA
//! affinity, and the decision-tree combinator that composes them.

use std::sync::Arc;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::context::SchedulingContext;
use crate::framework::{Filter, Plugin};
use crate::types::Pod;

/// Queue depth above which a sheddable request is not placed on a pod.
pub const DEFAULT_SHEDDABLE_QUEUE_THRESHOLD: u64 = 5;

/// KV-cache utilization at or above which a sheddable request is not placed
/// on a pod.
pub const DEFAULT_KV_CACHE_THRESHOLD: f64 = 0.8;

/// Queue depth below which a pod counts as lightly loaded.
pub const DEFAULT_LOW_QUEUE_THRESHOLD: u64 = 128;

/// Probability of preferring adapter-affinity pods over pods with free
/// adapter slots.
pub const DEFAULT_LORA_AFFINITY_THRESHOLD: f64 = 0.999;

/// Drops saturated pods for sheddable requests; passes everything through
/// for requests that may not be dropped.
pub struct SheddableCapacityFilter {
    queue_threshold: u64,
    kv_cache_threshold: f64,
}

impl SheddableCapacityFilter {
    pub fn new() -> Self {
        Self {
            queue_threshold: DEFAULT_SHEDDABLE_QUEUE_THRESHOLD,
            kv_cache_threshold: DEFAULT_KV_CACHE_THRESHOLD,
        }
    }

    pub fn with_thresholds(queue_threshold: u64, kv_cache_threshold: f64) -> Self {
        Self {
            queue_threshold,
            kv_cache_threshold,
        }
    }
}

impl Default for SheddableCapacityFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl Plugin for SheddableCapacityFilter {
    fn name(&self) -> &str {
        "sheddable-capacity"
    }

    fn as_filter(self: Arc<Self>) -> Option<Arc<dyn Filter>> {
        Some(self)
    }
}

impl Filter for SheddableCapacityFilter {
    fn filter(&self, ctx: &SchedulingContext, pods: &[Arc<Pod>]) -> Vec<Arc<Pod>> {
        let sheddable = ctx
            .request()
            .map(|request| request.sheddable)
            .unwrap_or(false);
        if !sheddable {
            return pods.to_vec();
        }

        pods.iter()
            .filter(|pod| {
                pod.metrics.queue_depth < self.queue_threshold
                    && pod.metrics.kv_cache_utilization < self.kv_cache_threshold
            })
            .cloned()
            .collect()
    }
}

/// Keeps pods whose queue depth is below a fixed threshold.
pub struct LowQueueFilter {
    queue_threshold: u64,
}

impl LowQueueFilter {
    pub fn new() -> Self {
        Self {
            queue_threshold: DEFAULT_LOW_QUEUE_THRESHOLD,
        }
    }

    pub fn with_threshold(queue_threshold: u64) -> Self {
        Self { queue_threshold }
    }
}

impl Default for LowQueueFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl Plugin for LowQueueFilter {
    fn name(&self) -> &str {
        "low-queue"
    }

    fn as_filter(self: Arc<Self>) -> Option<Arc<dyn Filter>> {
        Some(self)
    }
}

impl Filter for LowQueueFilter {
    fn filter(&self, _ctx: &SchedulingContext, pods: &[Arc<Pod>]) -> Vec<Arc<Pod>> {
        pods.iter()
            .filter(|pod| pod.metrics.queue_depth < self.queue_threshold)
            .cloned()
            .collect()
    }
}

/// Keeps pods whose queue depth sits in the band
/// `[min, min + (max - min) / n]` over the candidate set, favoring the
/// least-queued pods without collapsing to a single winner.
pub struct LeastQueueFilter;

impl LeastQueueFilter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LeastQueueFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl Plugin for LeastQueueFilter {
    fn name(&self) -> &str {
        "least-queue"
    }

    fn as_filter(self: Arc<Self>) -> Option<Arc<dyn Filter>> {
        Some(self)
    }
}

impl Filter for LeastQueueFilter {
    fn filter(&self, _ctx: &SchedulingContext, pods: &[Arc<Pod>]) -> Vec<Arc<Pod>> {
        if pods.is_empty() {
            return Vec::new();
        }

        let min = pods.iter().map(|pod| pod.metrics.queue_depth).min().unwrap_or(0);
        let max = pods.iter().map(|pod| pod.metrics.queue_depth).max().unwrap_or(0);
        let threshold = min + (max - min) / pods.len() as u64;

        pods.iter()
            .filter(|pod| pod.metrics.queue_depth <= threshold)
            .cloned()
            .collect()
    }
}

/// Same banding as [`LeastQueueFilter`], over KV-cache utilization.
pub struct LeastKvCacheFilter;

impl LeastKvCacheFilter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LeastKvCacheFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl Plugin for LeastKvCacheFilter {
    fn name(&self) -> &str {
        "least-kv-cache"
    }

    fn as_filter(self: Arc<Self>) -> Option<Arc<dyn Filter>> {
        Some(self)
    }
}

impl Filter for LeastKvCacheFilter {
    fn filter(&self, _ctx: &SchedulingContext, pods: &[Arc<Pod>]) -> Vec<Arc<Pod>> {
        if pods.is_empty() {
            return Vec::new();
        }

        let min = pods
            .iter()
            .map(|pod| pod.metrics.kv_cache_utilization)
            .fold(f64::INFINITY, f64::min);
        let max = pods
            .iter()
            .map(|pod| pod.metrics.kv_cache_utilization)
            .fold(f64::NEG_INFINITY, f64::max);
        let threshold = min + (max - min) / pods.len() as f64;

        pods.iter()
            .filter(|pod| pod.metrics.kv_cache_utilization <= threshold)
            .cloned()
            .collect()
    }
}

/// Partitions pods into adapter-affinity pods (requested adapter already
/// resident) and available pods (room to load one more adapter), then keeps
/// the affinity side with the configured probability. Requests without an
/// adapter pass through unchanged.
pub struct LoraAffinityFilter {
    affinity_threshold: f64,
    rng: Option<Mutex<StdRng>>,
}

impl LoraAffinityFilter {
    pub fn new() -> Self {
        Self {
            affinity_threshold: DEFAULT_LORA_AFFINITY_THRESHOLD,
            rng: None,
        }
    }

    /// Override the affinity probability. `1.0` always prefers affinity
    /// pods, `0.0` always prefers available pods.
    pub fn with_threshold(affinity_threshold: f64) -> Self {
        Self {
            affinity_threshold,
            rng: None,
        }
    }

    /// Deterministic filter backed by a seeded generator, so the
    /// probabilistic affinity/available split itself can be exercised in
    /// tests.
    pub fn with_seed(affinity_threshold: f64, seed: u64) -> Self {
        Self {
            affinity_threshold,
            rng: Some(Mutex::new(StdRng::seed_from_u64(seed))),
        }
    }

    fn draw(&self) -> f64 {
        match &self.rng {
            Some(rng) => rng.lock().random(),
            None => rand::rng().random(),
        }
    }
}

impl Default for LoraAffinityFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl Plugin for LoraAffinityFilter {
    fn name(&self) -> &str {
        "lora-affinity"
    }

    fn as_filter(self: Arc<Self>) -> Option<Arc<dyn Filter>> {
        Some(self)
    }
}

impl Filter for LoraAffinityFilter {
    fn filter(&self, ctx: &SchedulingContext, pods: &[Arc<Pod>]) -> Vec<Arc<Pod>> {
        let adapter = match ctx.request().and_then(|request| request.lora_adapter.as_ref()) {
            Some(adapter) => adapter,
            None => return pods.to_vec(),
        };

        let mut affinity = Vec::new();
        let mut available = Vec::new();
        for pod in pods {
            if pod.has_adapter(adapter) {
                affinity.push(pod.clone());
            } else if pod.has_adapter_capacity() {
                available.push(pod.clone());
            }
        }

        if !affinity.is_empty() && !available.is_empty() {
            if self.draw() < self.affinity_threshold {
                affinity
            } else {
                available
            }
        } else if !affinity.is_empty() {
            affinity
        } else {
            available
        }
    }
}

/// Successor wiring of a decision-tree node. The combined successor is a
/// separate variant, so a node can never carry both branch successors and a
/// combined one.
enum NextNode {
    Leaf,
    Branches {
        on_success: Option<Arc<DecisionTreeFilter>>,
        on_failure: Option<Arc<DecisionTreeFilter>>,
    },
    Always(Arc<DecisionTreeFilter>),
}

/// Declarative success/failure branching over filter plugins.
///
/// Each node evaluates its base filter. A non-empty result takes the success
/// branch with the filtered pods; an empty result takes the failure branch
/// with the *input* pods, so downstream filters still have candidates. A
/// node without an applicable successor returns its current pod set.
pub struct DecisionTreeFilter {
    current: Arc<dyn Filter>,
    next: NextNode,
}

impl DecisionTreeFilter {
    /// Terminal node: just the base filter.
    pub fn leaf(current: Arc<dyn Filter>) -> Arc<Self> {
        Arc::new(Self {
            current,
            next: NextNode::Leaf,
        })
    }

    /// Node with distinct success/failure successors. Either may be absent.
    pub fn with_branches(
        current: Arc<dyn Filter>,
        on_success: Option<Arc<Self>>,
        on_failure: Option<Arc<Self>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            current,
            next: NextNode::Branches {
                on_success,
                on_failure,
            },
        })
    }

    /// Node whose successor runs in either case; shorthand for coinciding
    /// branches.
    pub fn with_next(current: Arc<dyn Filter>, next: Arc<Self>) -> Arc<Self> {
        Arc::new(Self {
            current,
            next: NextNode::Always(next),
        })
    }
}

impl Plugin for DecisionTreeFilter {
    fn name(&self) -> &str {
        self.current.name()
    }

    fn as_filter(self: Arc<Self>) -> Option<Arc<dyn Filter>> {
        Some(self)
    }
}

impl Filter for DecisionTreeFilter {
    fn filter(&self, ctx: &SchedulingContext, pods: &[Arc<Pod>]) -> Vec<Arc<Pod>> {
        let filtered = self.current.filter(ctx, pods);

        if filtered.is_empty() {
            match &self.next {
                NextNode::Always(next) => next.filter(ctx, pods),
                NextNode::Branches {
                    on_failure: Some(next),
                    ..
                } => next.filter(ctx, pods),
                // No applicable successor; the chain ends empty here.
                _ => filtered,
            }
        } else {
            match &self.next {
                NextNode::Always(next) => next.filter(ctx, &filtered),
                NextNode::Branches {
                    on_success: Some(next),
                    ..
                } => next.filter(ctx, &filtered),
                _ => filtered,
            }
        }
    }
}
