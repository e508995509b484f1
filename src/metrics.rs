// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Prometheus metrics owned by the runtime.

use std::sync::Arc;
use std::time::{Duration, Instant};

use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

struct Inner {
    registry: Registry,
    inbound: IntCounterVec,
    handler_errors: IntCounterVec,
    uptime: IntGauge,
    started_at: Instant,
}

/// Cheaply cloneable handle on the runtime's metric family.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<Inner>,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let inbound = IntCounterVec::new(
            Opts::new(
                "unimsg_inbound_messages_total",
                "Messages received, by transport",
            ),
            &["transport"],
        )
        .expect("static metric definition");
        let handler_errors = IntCounterVec::new(
            Opts::new(
                "unimsg_handler_errors_total",
                "Handler failures observed by the dispatch machinery, by method",
            ),
            &["method"],
        )
        .expect("static metric definition");
        let uptime = IntGauge::new("unimsg_uptime_seconds", "Runtime uptime in seconds")
            .expect("static metric definition");

        // Registration of freshly named collectors cannot collide.
        let _ = registry.register(Box::new(inbound.clone()));
        let _ = registry.register(Box::new(handler_errors.clone()));
        let _ = registry.register(Box::new(uptime.clone()));

        Self {
            inner: Arc::new(Inner {
                registry,
                inbound,
                handler_errors,
                uptime,
                started_at: Instant::now(),
            }),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    pub fn inbound(&self, transport: &str) {
        self.inner.inbound.with_label_values(&[transport]).inc();
    }

    pub fn handler_error(&self, method: &str) {
        self.inner
            .handler_errors
            .with_label_values(&[method])
            .inc();
    }

    pub fn uptime(&self) -> Duration {
        self.inner.started_at.elapsed()
    }

    /// Render the registry in the Prometheus text exposition format.
    pub fn render(&self) -> anyhow::Result<String> {
        self.inner.uptime.set(self.uptime().as_secs() as i64);

        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.inner.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
