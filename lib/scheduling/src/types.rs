// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Core data model shared across the scheduling pipeline: pod identity and
//! metrics, request/response descriptors, and per-profile results.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Stable identity of an inference worker pod: namespace plus name.
///
/// Identity strings (`"namespace/name"`) are used for target-pod lookup on
/// the response path and as score-map keys throughout the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PodId {
    pub namespace: String,
    pub name: String,
}

impl PodId {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for PodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Runtime metrics published by a worker pod.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodMetrics {
    /// Number of requests waiting in the pod's queue.
    pub queue_depth: u64,

    /// Fraction of the pod's KV-cache memory currently in use, in [0, 1].
    pub kv_cache_utilization: f64,

    /// LoRA adapters currently resident on the pod.
    pub loaded_adapters: HashSet<String>,

    /// Maximum number of adapters the pod can hold at once.
    pub max_adapters: usize,
}

impl Default for PodMetrics {
    fn default() -> Self {
        Self {
            queue_depth: 0,
            kv_cache_utilization: 0.0,
            loaded_adapters: HashSet::new(),
            max_adapters: 4,
        }
    }
}

/// One worker pod as seen by a scheduling cycle.
///
/// Pods are captured once per request into a snapshot and shared as
/// `Arc<Pod>`; they are never mutated inside a cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pod {
    pub id: PodId,
    pub metrics: PodMetrics,
}

impl Pod {
    pub fn new(id: PodId, metrics: PodMetrics) -> Self {
        Self { id, metrics }
    }

    /// Whether the given adapter is already resident on this pod.
    pub fn has_adapter(&self, adapter: &str) -> bool {
        self.metrics.loaded_adapters.contains(adapter)
    }

    /// Whether the pod has room to load one more adapter.
    pub fn has_adapter_capacity(&self) -> bool {
        self.metrics.loaded_adapters.len() < self.metrics.max_adapters
    }
}

/// Immutable per-request view of the fleet, captured once at request entry.
pub type PodsSnapshot = Vec<Arc<Pod>>;

/// Inbound request descriptor. Read-only within a scheduling cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmRequest {
    pub request_id: String,

    /// Model the request targets.
    pub model: String,

    /// LoRA adapter the request asks for, if any.
    pub lora_adapter: Option<String>,

    /// Whether the request's priority class permits dropping it under load.
    pub sheddable: bool,

    /// Prompt-length hint in tokens, when known.
    pub prompt_tokens: Option<usize>,

    /// Output-budget hint in tokens, when known.
    pub max_output_tokens: Option<usize>,
}

impl LlmRequest {
    pub fn new(request_id: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            model: model.into(),
            lora_adapter: None,
            sheddable: false,
            prompt_tokens: None,
            max_output_tokens: None,
        }
    }
}

/// Terminal status of a completed response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseStatus {
    Complete,
    Truncated,
    Errored,
}

/// Post-facto response descriptor surfaced to the response path.
/// Read-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub request_id: String,
    pub model: String,
    pub lora_adapter: Option<String>,
    pub status: ResponseStatus,
    pub prompt_tokens: usize,
    pub output_tokens: usize,
    /// End-to-end latency observed by the gateway.
    pub latency: Duration,
}

/// A pod paired with its aggregate weighted score, handed to the picker.
#[derive(Debug, Clone)]
pub struct ScoredPod {
    pub pod: Arc<Pod>,
    pub score: f64,
}

/// Output of a single profile cycle: the selected target pod.
#[derive(Debug, Clone)]
pub struct ProfileResult {
    pub target_pod: Arc<Pod>,
}
