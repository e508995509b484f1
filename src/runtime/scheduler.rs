// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Per-method concurrency scheduler for asynchronous dispatch.
//!
//! The queue and pub/sub paths have no reply channel, so handler
//! executions fan out through here. Three policies, selected by the
//! method's concurrency value at dispatch time:
//!
//! - `n > 0` bounded: a lazily created per-method lane (hand-off
//!   channel plus one dispatcher task) runs at most `n` workers, FIFO.
//! - `n == 0` synchronous: the handler runs on the calling task.
//! - `n < 0` unbounded: every arrival spawns an independent worker.
//!
//! Every worker body is wrapped in a catch-unwind guard: a panicking
//! handler takes down its own worker and nothing else.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::FutureExt;
use tokio::sync::{mpsc, Notify};
use tracing::{error, warn};

use crate::error::Error;
use crate::metrics::Metrics;
use crate::protocol::RequestEnvelope;
use crate::runtime::registry::MethodEntry;

/// Dispatches `(handler, envelope)` pairs under the method's policy.
#[derive(Clone)]
pub struct Scheduler {
    lanes: Arc<DashMap<String, mpsc::Sender<RequestEnvelope>>>,
    metrics: Metrics,
}

impl Scheduler {
    pub fn new(metrics: Metrics) -> Self {
        Self {
            lanes: Arc::new(DashMap::new()),
            metrics,
        }
    }

    /// Dispatch one envelope. For the synchronous policy this returns
    /// after the handler completes; for the bounded policy it returns
    /// once the lane accepted the message, which may wait for a
    /// hand-off when the method is saturated.
    pub async fn dispatch(&self, entry: Arc<MethodEntry>, envelope: RequestEnvelope) {
        let concurrency = entry.concurrency();

        if concurrency > 0 {
            let lane = self.lane(&entry);
            if lane.send(envelope).await.is_err() {
                // Lanes live until process exit, so this is unreachable
                // in practice.
                warn!(method = entry.method(), "dispatch lane closed");
            }
        } else if concurrency == 0 {
            run_guarded(&entry, &self.metrics, envelope).await;
        } else {
            let metrics = self.metrics.clone();
            tokio::spawn(async move {
                run_guarded(&entry, &metrics, envelope).await;
            });
        }
    }

    /// Take the method's lane, creating it on first use. Two racing
    /// creators resolve through the map entry: one wins, the other
    /// reuses.
    fn lane(&self, entry: &Arc<MethodEntry>) -> mpsc::Sender<RequestEnvelope> {
        match self.lanes.entry(entry.method().to_string()) {
            Entry::Occupied(existing) => existing.get().clone(),
            Entry::Vacant(slot) => {
                let (tx, rx) = mpsc::channel(1);
                slot.insert(tx.clone());
                tokio::spawn(run_lane(entry.clone(), self.metrics.clone(), rx));
                tx
            }
        }
    }
}

/// Dedicated dispatcher for one bounded method: pull FIFO, spawn each
/// message in its own worker, and only take the next message while the
/// running count is below the method's current cap.
async fn run_lane(
    entry: Arc<MethodEntry>,
    metrics: Metrics,
    mut lane: mpsc::Receiver<RequestEnvelope>,
) {
    let running = Arc::new(AtomicI64::new(0));
    let done = Arc::new(Notify::new());

    while let Some(envelope) = lane.recv().await {
        // Re-read the cap per message so a late set_concurrency applies.
        while running.load(Ordering::Acquire) >= entry.concurrency().max(1) {
            done.notified().await;
        }

        running.fetch_add(1, Ordering::AcqRel);
        let entry = entry.clone();
        let metrics = metrics.clone();
        let running = running.clone();
        let done = done.clone();
        tokio::spawn(async move {
            run_guarded(&entry, &metrics, envelope).await;
            running.fetch_sub(1, Ordering::AcqRel);
            done.notify_one();
        });
    }
}

async fn run_guarded(entry: &Arc<MethodEntry>, metrics: &Metrics, envelope: RequestEnvelope) {
    let method = entry.method().to_string();
    match AssertUnwindSafe(entry.handler().call(envelope))
        .catch_unwind()
        .await
    {
        Ok(Ok(_)) => {}
        Ok(Err(cause)) => {
            metrics.handler_error(&method);
            let error = Error::Handler(cause.to_string());
            warn!(%method, %error, "result discarded");
        }
        Err(_) => {
            metrics.handler_error(&method);
            let error = Error::Handler("handler panicked".to_string());
            error!(%method, %error, "worker terminated");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handler::method_fn;
    use crate::runtime::registry::MethodRegistry;
    use std::sync::Mutex;
    use std::time::Duration;

    fn entry_with(
        method: &str,
        concurrency: i64,
        handler: Arc<dyn crate::api::handler::Method>,
    ) -> (MethodRegistry, Arc<MethodEntry>) {
        let registry = MethodRegistry::new();
        registry.register(method, handler, concurrency);
        let entry = registry.lookup(method).unwrap();
        (registry, entry)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn bounded_policy_caps_in_flight_workers() {
        let in_flight = Arc::new(AtomicI64::new(0));
        let peak = Arc::new(AtomicI64::new(0));
        let completed = Arc::new(AtomicI64::new(0));

        let handler = {
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            let completed = completed.clone();
            method_fn(move |_| {
                let in_flight = in_flight.clone();
                let peak = peak.clone();
                let completed = completed.clone();
                async move {
                    let now = in_flight.fetch_add(1, Ordering::AcqRel) + 1;
                    peak.fetch_max(now, Ordering::AcqRel);
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    in_flight.fetch_sub(1, Ordering::AcqRel);
                    completed.fetch_add(1, Ordering::AcqRel);
                    Ok(None)
                }
            })
        };

        let (_registry, entry) = entry_with("slow", 3, handler);
        let scheduler = Scheduler::new(Metrics::new());

        for _ in 0..10 {
            scheduler.dispatch(entry.clone(), RequestEnvelope::empty()).await;
        }

        while completed.load(Ordering::Acquire) < 10 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert!(peak.load(Ordering::Acquire) <= 3);
        assert_eq!(completed.load(Ordering::Acquire), 10);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn bounded_policy_is_fifo_per_method() {
        let seen = Arc::new(Mutex::new(Vec::new()));

        let handler = {
            let seen = seen.clone();
            method_fn(move |envelope: RequestEnvelope| {
                let seen = seen.clone();
                async move {
                    seen.lock().unwrap().push(envelope.method.clone());
                    Ok(None)
                }
            })
        };

        let (_registry, entry) = entry_with("ordered", 1, handler);
        let scheduler = Scheduler::new(Metrics::new());

        for i in 0..8 {
            let mut envelope = RequestEnvelope::empty();
            envelope.method = format!("{i}");
            scheduler.dispatch(entry.clone(), envelope).await;
        }

        while seen.lock().unwrap().len() < 8 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let order: Vec<String> = seen.lock().unwrap().clone();
        assert_eq!(order, (0..8).map(|i| i.to_string()).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn synchronous_policy_blocks_the_caller() {
        let completed = Arc::new(AtomicI64::new(0));
        let handler = {
            let completed = completed.clone();
            method_fn(move |_| {
                let completed = completed.clone();
                async move {
                    completed.fetch_add(1, Ordering::AcqRel);
                    Ok(None)
                }
            })
        };

        let (_registry, entry) = entry_with("inline", 0, handler);
        let scheduler = Scheduler::new(Metrics::new());

        scheduler.dispatch(entry, RequestEnvelope::empty()).await;
        assert_eq!(completed.load(Ordering::Acquire), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unbounded_policy_runs_every_arrival() {
        let completed = Arc::new(AtomicI64::new(0));
        let handler = {
            let completed = completed.clone();
            method_fn(move |_| {
                let completed = completed.clone();
                async move {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    completed.fetch_add(1, Ordering::AcqRel);
                    Ok(None)
                }
            })
        };

        let (_registry, entry) = entry_with("burst", -1, handler);
        let scheduler = Scheduler::new(Metrics::new());

        for _ in 0..6 {
            scheduler.dispatch(entry.clone(), RequestEnvelope::empty()).await;
        }

        while completed.load(Ordering::Acquire) < 6 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn panicking_handler_kills_only_its_worker() {
        let completed = Arc::new(AtomicI64::new(0));
        let handler = {
            let completed = completed.clone();
            method_fn(move |envelope: RequestEnvelope| {
                let completed = completed.clone();
                async move {
                    if envelope.method == "boom" {
                        panic!("handler exploded");
                    }
                    completed.fetch_add(1, Ordering::AcqRel);
                    Ok(None)
                }
            })
        };

        let (_registry, entry) = entry_with("fragile", 1, handler);
        let scheduler = Scheduler::new(Metrics::new());

        let mut bad = RequestEnvelope::empty();
        bad.method = "boom".into();
        scheduler.dispatch(entry.clone(), bad).await;
        scheduler.dispatch(entry.clone(), RequestEnvelope::empty()).await;

        while completed.load(Ordering::Acquire) < 1 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn late_concurrency_change_applies_to_new_dispatches() {
        let peak = Arc::new(AtomicI64::new(0));
        let in_flight = Arc::new(AtomicI64::new(0));
        let completed = Arc::new(AtomicI64::new(0));

        let handler = {
            let peak = peak.clone();
            let in_flight = in_flight.clone();
            let completed = completed.clone();
            method_fn(move |_| {
                let peak = peak.clone();
                let in_flight = in_flight.clone();
                let completed = completed.clone();
                async move {
                    let now = in_flight.fetch_add(1, Ordering::AcqRel) + 1;
                    peak.fetch_max(now, Ordering::AcqRel);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    in_flight.fetch_sub(1, Ordering::AcqRel);
                    completed.fetch_add(1, Ordering::AcqRel);
                    Ok(None)
                }
            })
        };

        let registry = MethodRegistry::new();
        registry.register("tunable", handler, 1);
        let entry = registry.lookup("tunable").unwrap();
        let scheduler = Scheduler::new(Metrics::new());

        scheduler.dispatch(entry.clone(), RequestEnvelope::empty()).await;
        registry.set_concurrency("tunable", 4);
        for _ in 0..4 {
            scheduler.dispatch(entry.clone(), RequestEnvelope::empty()).await;
        }

        while completed.load(Ordering::Acquire) < 5 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert!(peak.load(Ordering::Acquire) > 1);
    }
}
