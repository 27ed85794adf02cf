// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Per-request carrier threaded through the pipeline.
//!
//! A [`SchedulingContext`] bundles the request (or, on the response path,
//! the response), the immutable pods snapshot, and the ambient cancellation
//! token. It is created once per `schedule`/`on_response` invocation and
//! passed by reference; its identity fields are never mutated.

use std::any::Any;
use std::sync::Arc;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use crate::error::SchedulingError;
use crate::types::{LlmRequest, LlmResponse, Pod, PodsSnapshot};

pub struct SchedulingContext {
    request: Option<Arc<LlmRequest>>,
    response: Option<Arc<LlmResponse>>,
    pods_snapshot: PodsSnapshot,
    cancel: CancellationToken,

    /// Opaque plugin state, keyed by plugin-chosen strings. Entries do not
    /// outlive the context.
    state: DashMap<String, Box<dyn Any + Send + Sync>>,
}

impl SchedulingContext {
    /// Build a request-flavored context for the scheduling path.
    pub fn for_request(
        request: Arc<LlmRequest>,
        pods_snapshot: PodsSnapshot,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            request: Some(request),
            response: None,
            pods_snapshot,
            cancel,
            state: DashMap::new(),
        }
    }

    /// Build a response-flavored context for the response path.
    pub fn for_response(
        response: Arc<LlmResponse>,
        pods_snapshot: PodsSnapshot,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            request: None,
            response: Some(response),
            pods_snapshot,
            cancel,
            state: DashMap::new(),
        }
    }

    pub fn request(&self) -> Option<&Arc<LlmRequest>> {
        self.request.as_ref()
    }

    pub fn response(&self) -> Option<&Arc<LlmResponse>> {
        self.response.as_ref()
    }

    pub fn pods_snapshot(&self) -> &[Arc<Pod>] {
        &self.pods_snapshot
    }

    /// Request id for log correlation, from whichever side is present.
    pub fn request_id(&self) -> &str {
        if let Some(request) = &self.request {
            &request.request_id
        } else if let Some(response) = &self.response {
            &response.request_id
        } else {
            ""
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cooperative cancellation checkpoint between pipeline phases.
    pub fn ensure_live(&self) -> Result<(), SchedulingError> {
        if self.cancel.is_cancelled() {
            return Err(SchedulingError::Cancelled(self.request_id().to_string()));
        }
        Ok(())
    }

    /// Stash plugin-local state under a key. Overwrites any prior value.
    pub fn put_state<T: Any + Send + Sync>(&self, key: impl Into<String>, value: T) {
        self.state.insert(key.into(), Box::new(value));
    }

    /// Clone out previously stashed state, if the key exists and the type
    /// matches.
    pub fn state<T: Any + Clone + Send + Sync>(&self, key: &str) -> Option<T> {
        self.state
            .get(key)
            .and_then(|entry| entry.value().downcast_ref::<T>().cloned())
    }
}
