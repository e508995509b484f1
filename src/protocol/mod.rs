// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

pub mod envelope;
pub mod target;

pub use envelope::{CodecError, RequestEnvelope, ResultEnvelope, CODE_OK, OK_MESSAGE};
pub use target::{TargetResolver, BRANCH_ENV, DEFAULT_BRANCH};

/// Topic prefix for queued task messages.
pub const TASK_TOPIC_PREFIX: &str = "_.task_";

/// Subject prefix for fan-out notifications.
pub const NOTIFY_TOPIC_PREFIX: &str = "_.notify_";
