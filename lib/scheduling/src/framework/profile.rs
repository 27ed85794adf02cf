// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! One scheduling profile: an ordered plugin pipeline producing a single
//! target pod per cycle.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use crate::context::SchedulingContext;
use crate::error::SchedulingError;
use crate::metrics::record_plugin_duration;
use crate::types::{Pod, PodId, ProfileResult, ScoredPod};

use super::{
    Filter, Picker, Plugin, PostCycle, PostResponse, WeightedScorer, FILTER_PLUGIN_TYPE,
    PICKER_PLUGIN_TYPE, POST_CYCLE_PLUGIN_TYPE, SCORER_PLUGIN_TYPE,
};

/// A profile configuration for the scheduler which influences routing
/// decisions: filters run in registration order, scorers accumulate weighted
/// scores, exactly one picker selects the target, post-cycle plugins observe
/// the result.
///
/// Profiles are immutable once handed to a scheduler and safe for concurrent
/// use; any mutable plugin-internal state is the plugin's own to protect.
#[derive(Default)]
pub struct SchedulerProfile {
    filters: Vec<Arc<dyn Filter>>,
    scorers: Vec<WeightedScorer>,
    picker: Option<Arc<dyn Picker>>,
    post_cycle_plugins: Vec<Arc<dyn PostCycle>>,
    // TODO: move post-response registration out of the profile once a
    // standalone response-observer registry exists.
    post_response_plugins: Vec<Arc<dyn PostResponse>>,
}

impl std::fmt::Debug for SchedulerProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerProfile")
            .field(
                "filters",
                &self.filters.iter().map(|p| p.name()).collect::<Vec<_>>(),
            )
            .field(
                "scorers",
                &self.scorers.iter().map(|s| s.name()).collect::<Vec<_>>(),
            )
            .field("picker", &self.picker.as_ref().map(|p| p.name()))
            .field(
                "post_cycle_plugins",
                &self
                    .post_cycle_plugins
                    .iter()
                    .map(|p| p.name())
                    .collect::<Vec<_>>(),
            )
            .field(
                "post_response_plugins",
                &self
                    .post_response_plugins
                    .iter()
                    .map(|p| p.name())
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl SchedulerProfile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the filter plugins, replacing any previously registered ones.
    pub fn with_filters(mut self, filters: Vec<Arc<dyn Filter>>) -> Self {
        self.filters = filters;
        self
    }

    /// Set the weighted scorer plugins, replacing any previously registered
    /// ones.
    pub fn with_scorers(mut self, scorers: Vec<WeightedScorer>) -> Self {
        self.scorers = scorers;
        self
    }

    /// Set the picker plugin, replacing any previously registered one.
    pub fn with_picker(mut self, picker: Arc<dyn Picker>) -> Self {
        self.picker = Some(picker);
        self
    }

    /// Set the post-cycle plugins, replacing any previously registered ones.
    pub fn with_post_cycle_plugins(mut self, plugins: Vec<Arc<dyn PostCycle>>) -> Self {
        self.post_cycle_plugins = plugins;
        self
    }

    /// Set the post-response plugins, replacing any previously registered
    /// ones.
    pub fn with_post_response_plugins(mut self, plugins: Vec<Arc<dyn PostResponse>>) -> Self {
        self.post_response_plugins = plugins;
        self
    }

    /// Add plugins, classifying each by the roles its capability probes
    /// report. A plugin implementing several roles is registered under each.
    ///
    /// Scorers must arrive wrapped in a [`WeightedScorer`]; a bare scorer is
    /// a configuration error, as is a second picker.
    pub fn add_plugins(mut self, plugins: Vec<Arc<dyn Plugin>>) -> Result<Self, SchedulingError> {
        for plugin in plugins {
            if let Some(weighted) = plugin.clone().as_weighted_scorer() {
                self.scorers.push((*weighted).clone());
                // Unwrap so any other roles the scorer implements register
                // as well.
                self.register_roles(weighted.scorer().clone())?;
            } else if plugin.clone().as_scorer().is_some() {
                return Err(SchedulingError::UnweightedScorer(plugin.name().to_string()));
            } else {
                self.register_roles(plugin)?;
            }
        }
        Ok(self)
    }

    fn register_roles<P>(&mut self, plugin: Arc<P>) -> Result<(), SchedulingError>
    where
        P: Plugin + ?Sized,
    {
        if let Some(filter) = plugin.clone().as_filter() {
            self.filters.push(filter);
        }
        if let Some(picker) = plugin.clone().as_picker() {
            if let Some(existing) = &self.picker {
                return Err(SchedulingError::DuplicatePicker {
                    new: picker.name().to_string(),
                    existing: existing.name().to_string(),
                });
            }
            self.picker = Some(picker);
        }
        if let Some(post_cycle) = plugin.clone().as_post_cycle() {
            self.post_cycle_plugins.push(post_cycle);
        }
        if let Some(post_response) = plugin.clone().as_post_response() {
            self.post_response_plugins.push(post_response);
        }
        Ok(())
    }

    pub(crate) fn post_response_plugins(&self) -> &[Arc<dyn PostResponse>] {
        &self.post_response_plugins
    }

    /// Run one profile cycle: filters, scorers, picker, post-cycle plugins,
    /// in that order. Returns the picker's result.
    pub fn run_cycle(&self, ctx: &SchedulingContext) -> Result<ProfileResult, SchedulingError> {
        let picker = self.picker.clone().ok_or(SchedulingError::MissingPicker)?;

        let pods = self.run_filter_plugins(ctx);
        if pods.is_empty() {
            return Err(SchedulingError::NoPodsAvailable);
        }
        ctx.ensure_live()?;

        // At least one pod survived filtering; score the candidates.
        let weighted_scores = self.run_scorer_plugins(ctx, &pods);
        ctx.ensure_live()?;

        let result = self.run_picker_plugin(ctx, &picker, pods, weighted_scores)?;

        self.run_post_cycle_plugins(ctx, &result);

        Ok(result)
    }

    fn run_filter_plugins(&self, ctx: &SchedulingContext) -> Vec<Arc<Pod>> {
        let mut filtered: Vec<Arc<Pod>> = ctx.pods_snapshot().to_vec();
        tracing::debug!(
            request_id = %ctx.request_id(),
            pods = filtered.len(),
            "before running filter plugins"
        );

        for filter in &self.filters {
            let before = Instant::now();
            filtered = filter.filter(ctx, &filtered);
            record_plugin_duration(FILTER_PLUGIN_TYPE, filter.name(), before.elapsed());
            tracing::debug!(
                request_id = %ctx.request_id(),
                plugin = filter.name(),
                pods = filtered.len(),
                "filter plugin result"
            );
            if filtered.is_empty() {
                break;
            }
        }

        filtered
    }

    fn run_scorer_plugins(
        &self,
        ctx: &SchedulingContext,
        pods: &[Arc<Pod>],
    ) -> HashMap<PodId, f64> {
        let mut weighted_score_per_pod: HashMap<PodId, f64> =
            pods.iter().map(|pod| (pod.id.clone(), 0.0)).collect();

        for weighted_scorer in &self.scorers {
            let scorer = weighted_scorer.scorer();
            let before = Instant::now();
            let scores = scorer.score(ctx, pods);
            record_plugin_duration(SCORER_PLUGIN_TYPE, scorer.name(), before.elapsed());

            // Pods outside the candidate set are dropped; pods the scorer
            // skipped contribute zero.
            for (pod_id, score) in scores {
                if let Some(total) = weighted_score_per_pod.get_mut(&pod_id) {
                    *total += score * f64::from(weighted_scorer.weight());
                }
            }
            tracing::trace!(
                request_id = %ctx.request_id(),
                plugin = scorer.name(),
                "after running scorer"
            );
        }

        weighted_score_per_pod
    }

    fn run_picker_plugin(
        &self,
        ctx: &SchedulingContext,
        picker: &Arc<dyn Picker>,
        pods: Vec<Arc<Pod>>,
        mut weighted_score_per_pod: HashMap<PodId, f64>,
    ) -> Result<ProfileResult, SchedulingError> {
        let scored_pods: Vec<ScoredPod> = pods
            .into_iter()
            .map(|pod| {
                let score = weighted_score_per_pod.remove(&pod.id).unwrap_or(0.0);
                ScoredPod { pod, score }
            })
            .collect();

        let before = Instant::now();
        let result = picker.pick(ctx, scored_pods);
        record_plugin_duration(PICKER_PLUGIN_TYPE, picker.name(), before.elapsed());

        match result {
            Some(result) => {
                tracing::debug!(
                    request_id = %ctx.request_id(),
                    plugin = picker.name(),
                    target = %result.target_pod.id,
                    "picker plugin result"
                );
                Ok(result)
            }
            None => Err(SchedulingError::PickerReturnedNothing(
                picker.name().to_string(),
            )),
        }
    }

    fn run_post_cycle_plugins(&self, ctx: &SchedulingContext, result: &ProfileResult) {
        for plugin in &self.post_cycle_plugins {
            tracing::trace!(
                request_id = %ctx.request_id(),
                plugin = plugin.name(),
                "running post-cycle plugin"
            );
            let before = Instant::now();
            plugin.post_cycle(ctx, result);
            record_plugin_duration(POST_CYCLE_PLUGIN_TYPE, plugin.name(), before.elapsed());
        }
    }
}
