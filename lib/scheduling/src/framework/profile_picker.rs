// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Iterative profile selection.
//!
//! Between cycles the scheduler asks a [`ProfilePicker`] which profiles to
//! run next, feeding back the results accumulated so far. Returning an empty
//! set terminates the loop, so convergence is the picker's responsibility.

use std::collections::HashMap;
use std::sync::Arc;

use crate::types::{LlmRequest, ProfileResult};

use super::SchedulerProfile;

/// Decides which scheduling profiles run next, given the request and the
/// results of the profiles that already ran.
///
/// Implementations must be pure over `(request, profiles, prior_results)`
/// and must eventually return an empty set for every request. Names not
/// present in `profiles` are ignored by the scheduler.
pub trait ProfilePicker: Send + Sync {
    /// Stable picker name, used in metrics labels.
    fn name(&self) -> &str;

    /// `request` is `None` on the response path.
    fn pick(
        &self,
        request: Option<&LlmRequest>,
        profiles: &HashMap<String, Arc<SchedulerProfile>>,
        prior_results: &HashMap<String, ProfileResult>,
    ) -> Vec<String>;
}

/// Single-pass picker: returns every profile that has no result yet, which
/// means all of them on the first call and none on the second.
#[derive(Debug, Default)]
pub struct AllProfilesPicker;

impl AllProfilesPicker {
    pub fn new() -> Self {
        Self
    }
}

impl ProfilePicker for AllProfilesPicker {
    fn name(&self) -> &str {
        "all-profiles"
    }

    fn pick(
        &self,
        _request: Option<&LlmRequest>,
        profiles: &HashMap<String, Arc<SchedulerProfile>>,
        prior_results: &HashMap<String, ProfileResult>,
    ) -> Vec<String> {
        profiles
            .keys()
            .filter(|name| !prior_results.contains_key(*name))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Pod, PodId, PodMetrics};

    fn profiles(names: &[&str]) -> HashMap<String, Arc<SchedulerProfile>> {
        names
            .iter()
            .map(|name| (name.to_string(), Arc::new(SchedulerProfile::new())))
            .collect()
    }

    fn result_for(pod_name: &str) -> ProfileResult {
        ProfileResult {
            target_pod: Arc::new(Pod::new(
                PodId::new("default", pod_name),
                PodMetrics::default(),
            )),
        }
    }

    #[test]
    fn test_all_profiles_first_pass() {
        let picker = AllProfilesPicker::new();
        let profiles = profiles(&["default", "prefill"]);

        let mut picked = picker.pick(None, &profiles, &HashMap::new());
        picked.sort();
        assert_eq!(picked, vec!["default".to_string(), "prefill".to_string()]);
    }

    #[test]
    fn test_all_profiles_converges_after_results() {
        let picker = AllProfilesPicker::new();
        let profiles = profiles(&["default", "prefill"]);

        let mut prior = HashMap::new();
        prior.insert("default".to_string(), result_for("p0"));
        assert_eq!(
            picker.pick(None, &profiles, &prior),
            vec!["prefill".to_string()]
        );

        prior.insert("prefill".to_string(), result_for("p1"));
        assert!(picker.pick(None, &profiles, &prior).is_empty());
    }
}
