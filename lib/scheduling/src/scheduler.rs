// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Request scheduling orchestration.
//!
//! [`Scheduler::schedule`] snapshots the fleet once, then iteratively asks
//! the profile picker which profiles to run, executing each profile's cycle
//! over the same snapshot until the picker returns empty.
//! [`Scheduler::on_response`] re-snapshots and fans post-response plugins
//! out against the originally selected pod.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::context::SchedulingContext;
use crate::error::SchedulingError;
use crate::framework::{
    AllProfilesPicker, Filter, ProfilePicker, SchedulerProfile, POST_RESPONSE_PLUGIN_TYPE,
    PROFILE_PICKER_TYPE,
};
use crate::metrics::{record_e2e_duration, record_plugin_duration};
use crate::plugins::filter::{
    DecisionTreeFilter, LeastKvCacheFilter, LeastQueueFilter, LoraAffinityFilter, LowQueueFilter,
    SheddableCapacityFilter,
};
use crate::plugins::picker::RandomPicker;
use crate::types::{LlmRequest, LlmResponse, Pod, PodsSnapshot, ProfileResult};

/// Source of pod metrics, externally maintained and safe for concurrent
/// invocation. The scheduler reads it exactly once per request entry.
pub trait Datastore: Send + Sync {
    /// Point-in-time list of known pods with their metrics. No ordering
    /// guarantees.
    fn pod_get_all(&self) -> Vec<Pod>;
}

/// Construction-time scheduler assembly: the profile picker plus the named
/// profiles it selects from.
pub struct SchedulerConfig {
    profile_picker: Arc<dyn ProfilePicker>,
    profiles: HashMap<String, Arc<SchedulerProfile>>,
}

impl SchedulerConfig {
    pub fn new(
        profile_picker: Arc<dyn ProfilePicker>,
        profiles: HashMap<String, Arc<SchedulerProfile>>,
    ) -> Self {
        Self {
            profile_picker,
            profiles,
        }
    }
}

pub struct Scheduler {
    datastore: Arc<dyn Datastore>,
    profile_picker: Arc<dyn ProfilePicker>,
    profiles: HashMap<String, Arc<SchedulerProfile>>,
}

impl Scheduler {
    /// Scheduler with the default plugin configuration: a sheddable-capacity
    /// pre-filter, a two-branch decision tree over low-queue / LoRA-affinity
    /// / least-queue / least-KV-cache filters, a uniform random picker, and
    /// the single-pass profile picker. Call [`Scheduler::with_config`] to
    /// assemble a different pipeline.
    pub fn new(datastore: Arc<dyn Datastore>) -> Self {
        let lora_affinity: Arc<dyn Filter> = Arc::new(LoraAffinityFilter::new());
        let least_queue: Arc<dyn Filter> = Arc::new(LeastQueueFilter::new());
        let least_kv_cache: Arc<dyn Filter> = Arc::new(LeastKvCacheFilter::new());

        let low_latency_filter = DecisionTreeFilter::with_branches(
            Arc::new(LowQueueFilter::new()),
            Some(DecisionTreeFilter::with_next(
                lora_affinity.clone(),
                DecisionTreeFilter::with_next(
                    least_queue.clone(),
                    DecisionTreeFilter::leaf(least_kv_cache.clone()),
                ),
            )),
            Some(DecisionTreeFilter::with_next(
                least_queue,
                DecisionTreeFilter::with_next(
                    lora_affinity,
                    DecisionTreeFilter::leaf(least_kv_cache),
                ),
            )),
        );

        let default_profile = SchedulerProfile::new()
            .with_filters(vec![
                Arc::new(SheddableCapacityFilter::new()),
                low_latency_filter,
            ])
            .with_picker(Arc::new(RandomPicker::new()));

        let mut profiles = HashMap::new();
        profiles.insert("default".to_string(), Arc::new(default_profile));

        Self::with_config(
            datastore,
            SchedulerConfig::new(Arc::new(AllProfilesPicker::new()), profiles),
        )
    }

    /// Scheduler with a custom plugin configuration.
    pub fn with_config(datastore: Arc<dyn Datastore>, config: SchedulerConfig) -> Self {
        Self {
            datastore,
            profile_picker: config.profile_picker,
            profiles: config.profiles,
        }
    }

    /// Find the target pod for the request under every profile the profile
    /// picker selects. Returns one result per profile that ran; any profile
    /// cycle error aborts the whole call.
    pub fn schedule(
        &self,
        cancel: &CancellationToken,
        request: &Arc<LlmRequest>,
    ) -> Result<HashMap<String, ProfileResult>, SchedulingError> {
        let schedule_start = Instant::now();
        let result = self.run_scheduling_cycles(cancel, request);
        record_e2e_duration(schedule_start.elapsed());
        result
    }

    fn run_scheduling_cycles(
        &self,
        cancel: &CancellationToken,
        request: &Arc<LlmRequest>,
    ) -> Result<HashMap<String, ProfileResult>, SchedulingError> {
        // Snapshot pod metrics from the datastore once, so every cycle of
        // this request sees identical data regardless of concurrent
        // datastore updates.
        let snapshot = self.snapshot_pods();
        tracing::debug!(
            request_id = %request.request_id,
            pods = snapshot.len(),
            "scheduling a request"
        );
        let ctx = SchedulingContext::for_request(request.clone(), snapshot, cancel.clone());

        let mut profile_results: HashMap<String, ProfileResult> = HashMap::new();

        // Get the next set of profiles to run iteratively, based on the
        // request and the results accumulated so far.
        loop {
            ctx.ensure_live()?;

            let before = Instant::now();
            let picked =
                self.profile_picker
                    .pick(Some(request.as_ref()), &self.profiles, &profile_results);
            record_plugin_duration(
                PROFILE_PICKER_TYPE,
                self.profile_picker.name(),
                before.elapsed(),
            );
            if picked.is_empty() {
                break;
            }

            for name in picked {
                let Some(profile) = self.profiles.get(&name) else {
                    tracing::debug!(
                        request_id = %request.request_id,
                        profile = %name,
                        "profile picker selected an unknown profile, ignoring"
                    );
                    continue;
                };

                let result = profile.run_cycle(&ctx)?;
                profile_results.insert(name, result);
            }
        }

        if profile_results.is_empty() {
            return Err(SchedulingError::NoProfileRan(request.request_id.clone()));
        }

        Ok(profile_results)
    }

    /// Run the post-response plugins of every profile against the pod the
    /// request was originally scheduled to. A target no longer present in
    /// the fleet is passed through as `None`. Plugin failures are never
    /// surfaced to the caller.
    pub fn on_response(
        &self,
        cancel: &CancellationToken,
        response: &Arc<LlmResponse>,
        target_pod_name: &str,
    ) {
        let snapshot = self.snapshot_pods();
        let target_pod = snapshot
            .iter()
            .find(|pod| pod.id.to_string() == target_pod_name)
            .cloned();
        if target_pod.is_none() {
            tracing::debug!(
                request_id = %response.request_id,
                target = %target_pod_name,
                "target pod not found in snapshot, proceeding without it"
            );
        }

        let ctx = SchedulingContext::for_response(response.clone(), snapshot, cancel.clone());

        // WORKAROUND: post-response plugins still live on profiles, so they
        // are reached through a profile-picker pass; replace with a
        // standalone response-observer registry once one exists.
        let picked = self.profile_picker.pick(None, &self.profiles, &HashMap::new());
        for name in picked {
            if let Some(profile) = self.profiles.get(&name) {
                self.run_post_response_plugins(&ctx, target_pod.as_ref(), profile);
            }
        }
    }

    fn run_post_response_plugins(
        &self,
        ctx: &SchedulingContext,
        target_pod: Option<&Arc<Pod>>,
        profile: &SchedulerProfile,
    ) {
        for plugin in profile.post_response_plugins() {
            tracing::trace!(
                request_id = %ctx.request_id(),
                plugin = plugin.name(),
                "running post-response plugin"
            );
            let before = Instant::now();
            plugin.post_response(ctx, target_pod);
            record_plugin_duration(POST_RESPONSE_PLUGIN_TYPE, plugin.name(), before.elapsed());
        }
    }

    fn snapshot_pods(&self) -> PodsSnapshot {
        self.datastore.pod_get_all().into_iter().map(Arc::new).collect()
    }
}
