// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Picker plugins.

use std::sync::Arc;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::context::SchedulingContext;
use crate::framework::{Picker, Plugin};
use crate::types::{ProfileResult, ScoredPod};

// Epsilon for floating-point tie comparison, so tiny accumulation
// differences between equally-scored pods do not break ties.
const SCORE_EPSILON: f64 = 1e-5;

/// Picks uniformly at random among the pods tied at the maximum aggregate
/// score.
///
/// The default constructor draws from the thread-local generator; tests
/// needing determinism construct it with a fixed seed instead.
pub struct RandomPicker {
    rng: Option<Mutex<StdRng>>,
}

impl RandomPicker {
    pub fn new() -> Self {
        Self { rng: None }
    }

    /// Deterministic picker backed by a seeded generator.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Some(Mutex::new(StdRng::seed_from_u64(seed))),
        }
    }

    fn pick_index(&self, len: usize) -> usize {
        match &self.rng {
            Some(rng) => rng.lock().random_range(0..len),
            None => rand::rng().random_range(0..len),
        }
    }
}

impl Default for RandomPicker {
    fn default() -> Self {
        Self::new()
    }
}

impl Plugin for RandomPicker {
    fn name(&self) -> &str {
        "random"
    }

    fn as_picker(self: Arc<Self>) -> Option<Arc<dyn Picker>> {
        Some(self)
    }
}

impl Picker for RandomPicker {
    fn pick(&self, _ctx: &SchedulingContext, scored_pods: Vec<ScoredPod>) -> Option<ProfileResult> {
        if scored_pods.is_empty() {
            return None;
        }

        let max_score = scored_pods
            .iter()
            .map(|scored| scored.score)
            .fold(f64::NEG_INFINITY, f64::max);
        let tied: Vec<&ScoredPod> = scored_pods
            .iter()
            .filter(|scored| (scored.score - max_score).abs() < SCORE_EPSILON)
            .collect();

        let chosen = tied[self.pick_index(tied.len())];
        Some(ProfileResult {
            target_pod: chosen.pod.clone(),
        })
    }
}
