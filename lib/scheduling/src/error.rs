// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Error types for the scheduling pipeline.

/// Coarse classification of a [`SchedulingError`].
///
/// `Internal` means a pipeline invariant was violated at runtime,
/// `Configuration` means a profile was assembled incorrectly, and
/// `Cancelled` means the ambient cancellation token fired mid-cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Internal,
    Configuration,
    Cancelled,
}

#[derive(Debug, thiserror::Error)]
pub enum SchedulingError {
    #[error("no pods available for the given request")]
    NoPodsAvailable,

    #[error("picker '{0}' returned no result for a non-empty candidate set")]
    PickerReturnedNothing(String),

    #[error("failed to run any SchedulingProfile for request '{0}'")]
    NoProfileRan(String),

    #[error("profile has no picker plugin configured")]
    MissingPicker,

    #[error("failed to set '{new}' as picker, already have a registered picker plugin '{existing}'")]
    DuplicatePicker { new: String, existing: String },

    #[error("failed to register scorer '{0}' without a weight")]
    UnweightedScorer(String),

    #[error("failed to register scorer '{0}' with a zero weight")]
    ZeroWeightScorer(String),

    #[error("scheduling cancelled for request '{0}'")]
    Cancelled(String),
}

impl SchedulingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NoPodsAvailable | Self::PickerReturnedNothing(_) | Self::NoProfileRan(_) => {
                ErrorKind::Internal
            }
            Self::MissingPicker
            | Self::DuplicatePicker { .. }
            | Self::UnweightedScorer(_)
            | Self::ZeroWeightScorer(_) => ErrorKind::Configuration,
            Self::Cancelled(_) => ErrorKind::Cancelled,
        }
    }
}
