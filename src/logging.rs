// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Process logging setup.
//!
//! Two output forms: human-readable (default) and JSONL, selected with
//! `UNIMSG_LOG_JSONL=1`. Filters come from `UNIMSG_LOG` using the
//! standard `tracing` directive syntax; the default level is `info`.

use std::sync::Once;

use tracing_subscriber::EnvFilter;

/// Environment variable carrying the log filter directives.
pub const FILTER_ENV: &str = "UNIMSG_LOG";

/// Set to `1` to emit JSONL instead of the readable format.
pub const JSONL_ENV: &str = "UNIMSG_LOG_JSONL";

const DEFAULT_FILTER: &str = "info";

static INIT: Once = Once::new();

/// Install the global subscriber. Safe to call more than once; only
/// the first call takes effect.
pub fn init() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_env(FILTER_ENV)
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
        let jsonl = std::env::var(JSONL_ENV).map(|v| v == "1").unwrap_or(false);

        if jsonl {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .json()
                .try_init()
                .ok();
        } else {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .try_init()
                .ok();
        }
    });
}
