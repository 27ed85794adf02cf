// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Plugin contracts composed by a scheduling profile.
//!
//! Every plugin has a stable name used for metrics labels and error text,
//! plus one capability probe per role it implements. A single object may
//! implement several roles; registration queries the probes and records the
//! plugin under each matching role (see
//! [`SchedulerProfile::add_plugins`](profile::SchedulerProfile::add_plugins)).

use std::collections::HashMap;
use std::sync::Arc;

use crate::context::SchedulingContext;
use crate::error::SchedulingError;
use crate::types::{Pod, PodId, ProfileResult, ScoredPod};

pub mod profile;
pub mod profile_picker;

pub use profile::SchedulerProfile;
pub use profile_picker::{AllProfilesPicker, ProfilePicker};

/// Plugin-type label values for the latency metric.
pub const FILTER_PLUGIN_TYPE: &str = "filter";
pub const SCORER_PLUGIN_TYPE: &str = "scorer";
pub const PICKER_PLUGIN_TYPE: &str = "picker";
pub const POST_CYCLE_PLUGIN_TYPE: &str = "post-cycle";
pub const POST_RESPONSE_PLUGIN_TYPE: &str = "post-response";
pub const PROFILE_PICKER_TYPE: &str = "profile-picker";

/// Base contract shared by all pipeline plugins.
///
/// The `as_*` probes classify a plugin at registration time: each returns
/// `Some` when the object implements that role. Implementations override the
/// probes for the roles they support, returning `Some(self)`.
pub trait Plugin: Send + Sync + 'static {
    /// Stable plugin name, used in metrics labels and error text.
    fn name(&self) -> &str;

    fn as_filter(self: Arc<Self>) -> Option<Arc<dyn Filter>> {
        None
    }

    fn as_scorer(self: Arc<Self>) -> Option<Arc<dyn Scorer>> {
        None
    }

    fn as_picker(self: Arc<Self>) -> Option<Arc<dyn Picker>> {
        None
    }

    fn as_post_cycle(self: Arc<Self>) -> Option<Arc<dyn PostCycle>> {
        None
    }

    fn as_post_response(self: Arc<Self>) -> Option<Arc<dyn PostResponse>> {
        None
    }

    fn as_weighted_scorer(self: Arc<Self>) -> Option<Arc<WeightedScorer>> {
        None
    }
}

/// Reduces a candidate pod set. The returned pods must be a subset of the
/// input; an empty result is legal and halts the filter chain.
pub trait Filter: Plugin {
    fn filter(&self, ctx: &SchedulingContext, pods: &[Arc<Pod>]) -> Vec<Arc<Pod>>;
}

/// Assigns a finite real score to each input pod. Pods missing from the
/// returned map are treated as scoring zero. Scorers are expected to be pure
/// over (snapshot, request) and must not fail.
pub trait Scorer: Plugin {
    fn score(&self, ctx: &SchedulingContext, pods: &[Arc<Pod>]) -> HashMap<PodId, f64>;
}

/// Selects the target pod from the scored candidates. Must return `Some`
/// given a non-empty input; `None` is a contract violation the profile
/// surfaces as an internal error. Tie-breaking is picker-defined.
pub trait Picker: Plugin {
    fn pick(&self, ctx: &SchedulingContext, scored_pods: Vec<ScoredPod>) -> Option<ProfileResult>;
}

/// Observes the cycle result after picking. Failures are not propagated.
pub trait PostCycle: Plugin {
    fn post_cycle(&self, ctx: &SchedulingContext, result: &ProfileResult);
}

/// Observes a completed response against the originally selected pod. The
/// target is `None` when the pod has since left the fleet; implementations
/// must tolerate that.
pub trait PostResponse: Plugin {
    fn post_response(&self, ctx: &SchedulingContext, target_pod: Option<&Arc<Pod>>);
}

/// A scorer paired with its profile-local relative weight.
///
/// Scorers are only registrable through this wrapper; handing a bare scorer
/// to `add_plugins` is a configuration error. When the wrapped scorer also
/// implements other roles, registration unwraps it and records those roles
/// as well.
#[derive(Clone)]
pub struct WeightedScorer {
    scorer: Arc<dyn Scorer>,
    weight: u32,
}

impl std::fmt::Debug for WeightedScorer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeightedScorer")
            .field("scorer", &self.scorer.name())
            .field("weight", &self.weight)
            .finish()
    }
}

impl WeightedScorer {
    /// Pair a scorer with a weight. Weights are relative within a profile
    /// and must be positive; a zero weight is a configuration error, since
    /// it would silently erase the scorer's contribution.
    pub fn new(scorer: Arc<dyn Scorer>, weight: u32) -> Result<Self, SchedulingError> {
        if weight == 0 {
            return Err(SchedulingError::ZeroWeightScorer(scorer.name().to_string()));
        }
        Ok(Self { scorer, weight })
    }

    pub fn scorer(&self) -> &Arc<dyn Scorer> {
        &self.scorer
    }

    pub fn weight(&self) -> u32 {
        self.weight
    }
}

impl Plugin for WeightedScorer {
    fn name(&self) -> &str {
        self.scorer.name()
    }

    fn as_scorer(self: Arc<Self>) -> Option<Arc<dyn Scorer>> {
        Some(self.scorer.clone())
    }

    fn as_weighted_scorer(self: Arc<Self>) -> Option<Arc<WeightedScorer>> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::plugins::scorer::QueueScorer;

    #[test]
    fn test_weighted_scorer_rejects_zero_weight() {
        let err = WeightedScorer::new(Arc::new(QueueScorer::new()), 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(matches!(err, SchedulingError::ZeroWeightScorer(name) if name == "queue"));
    }

    #[test]
    fn test_weighted_scorer_delegates_name() {
        let weighted = WeightedScorer::new(Arc::new(QueueScorer::new()), 3).unwrap();
        assert_eq!(weighted.name(), "queue");
        assert_eq!(weighted.weight(), 3);
    }
}
