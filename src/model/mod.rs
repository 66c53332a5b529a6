// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

mod action;
mod target;

pub use action::{
    ActionId, ActionRequest, ActionResult, ActionStatus, ActionType, FailureKind, ResourceUsage,
};
pub use target::{Language, Target, TargetId, TargetKind};
