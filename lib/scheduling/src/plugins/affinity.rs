// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Adapter-affinity tracking across request lifecycles.
//!
//! [`AdapterAffinityTracker`] is one object registered under three roles:
//! as a post-cycle plugin it counts which adapter was just routed to which
//! pod, as a scorer it favors pods with in-flight requests for the requested
//! adapter, and as a post-response plugin it releases the count when the
//! response completes.
//!
//! The tracker is shared by every concurrent request against the profile,
//! so its placement table lives behind a `parking_lot::RwLock`; locks are
//! held only for the duration of a single table operation, never across
//! plugin calls.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::context::SchedulingContext;
use crate::framework::{Plugin, PostCycle, PostResponse, Scorer};
use crate::types::{Pod, PodId, ProfileResult};

#[derive(Default)]
pub struct AdapterAffinityTracker {
    /// pod -> adapter -> in-flight request count.
    placements: RwLock<HashMap<PodId, HashMap<String, usize>>>,
}

impl AdapterAffinityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// In-flight request count for an adapter on a pod.
    pub fn active_count(&self, pod_id: &PodId, adapter: &str) -> usize {
        self.placements
            .read()
            .get(pod_id)
            .and_then(|adapters| adapters.get(adapter))
            .copied()
            .unwrap_or(0)
    }

    fn record(&self, pod_id: &PodId, adapter: &str) {
        let mut placements = self.placements.write();
        *placements
            .entry(pod_id.clone())
            .or_default()
            .entry(adapter.to_string())
            .or_insert(0) += 1;
    }

    fn release(&self, pod_id: &PodId, adapter: &str) {
        let mut placements = self.placements.write();
        if let Some(adapters) = placements.get_mut(pod_id) {
            if let Some(count) = adapters.get_mut(adapter) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    adapters.remove(adapter);
                }
            }
            if adapters.is_empty() {
                placements.remove(pod_id);
            }
        }
    }
}

impl Plugin for AdapterAffinityTracker {
    fn name(&self) -> &str {
        "adapter-affinity"
    }

    fn as_scorer(self: Arc<Self>) -> Option<Arc<dyn Scorer>> {
        Some(self)
    }

    fn as_post_cycle(self: Arc<Self>) -> Option<Arc<dyn PostCycle>> {
        Some(self)
    }

    fn as_post_response(self: Arc<Self>) -> Option<Arc<dyn PostResponse>> {
        Some(self)
    }
}

impl Scorer for AdapterAffinityTracker {
    fn score(&self, ctx: &SchedulingContext, pods: &[Arc<Pod>]) -> HashMap<PodId, f64> {
        let adapter = match ctx.request().and_then(|request| request.lora_adapter.as_ref()) {
            Some(adapter) => adapter,
            None => return HashMap::new(),
        };

        let placements = self.placements.read();
        pods.iter()
            .map(|pod| {
                let active = placements
                    .get(&pod.id)
                    .and_then(|adapters| adapters.get(adapter))
                    .copied()
                    .unwrap_or(0);
                (pod.id.clone(), if active > 0 { 1.0 } else { 0.0 })
            })
            .collect()
    }
}

impl PostCycle for AdapterAffinityTracker {
    fn post_cycle(&self, ctx: &SchedulingContext, result: &ProfileResult) {
        if let Some(adapter) = ctx.request().and_then(|request| request.lora_adapter.as_ref()) {
            self.record(&result.target_pod.id, adapter);
        }
    }
}

impl PostResponse for AdapterAffinityTracker {
    fn post_response(&self, ctx: &SchedulingContext, target_pod: Option<&Arc<Pod>>) {
        let Some(target_pod) = target_pod else {
            // Target left the fleet; nothing to release against.
            return;
        };
        if let Some(adapter) = ctx
            .response()
            .and_then(|response| response.lora_adapter.as_ref())
        {
            self.release(&target_pod.id, adapter);
        }
    }
}
