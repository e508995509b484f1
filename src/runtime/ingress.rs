// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Shared inbound pipeline for the asynchronous transports.
//!
//! Queue and pub/sub deliveries run the same sequence: decode the
//! envelope, verify it is addressed to this instance, look the method
//! up, and hand it to the scheduler. What differs is the failure
//! discipline — the queue acknowledges (or, optionally, requeues)
//! unprocessable deliveries, while pub/sub silently drops them.

use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::error::Error;
use crate::metrics::Metrics;
use crate::protocol::RequestEnvelope;
use crate::runtime::registry::MethodRegistry;
use crate::runtime::scheduler::Scheduler;
use crate::transport::DeliverySink;

/// Inbound routing state shared by every transport adapter.
pub(crate) struct Ingress {
    /// Effective identity compared against every inbound `receiver`.
    pub(crate) identity: String,
    pub(crate) registry: MethodRegistry,
    pub(crate) scheduler: Scheduler,
    pub(crate) metrics: Metrics,
    pub(crate) requeue_malformed: bool,
}

impl Ingress {
    /// Queue delivery. `Err` asks the broker for redelivery; everything
    /// else — including unprocessable messages — acknowledges.
    pub(crate) async fn ingest_task(&self, payload: Bytes) -> Result<(), Error> {
        self.metrics.inbound("queue");

        let envelope = match RequestEnvelope::decode(&payload) {
            Ok(envelope) => envelope,
            Err(cause) => {
                let error = Error::from(cause);
                warn!(%error, "task delivery unprocessable");
                if self.requeue_malformed {
                    return Err(error);
                }
                return Ok(());
            }
        };

        if envelope.receiver != self.identity {
            let error = Error::WrongReceiver {
                expected: self.identity.clone(),
                actual: envelope.receiver.clone(),
            };
            warn!(%error, "task delivery acknowledged without dispatch");
            return Ok(());
        }

        let Some(entry) = self.registry.lookup(&envelope.method) else {
            let error = Error::MethodNotFound(envelope.method.clone());
            warn!(%error, "task delivery acknowledged without dispatch");
            return Ok(());
        };

        self.scheduler.dispatch(entry, envelope).await;
        Ok(())
    }

    /// Pub/sub delivery. With fan-out, strays and unknown methods are
    /// common and benign; everything unprocessable is dropped.
    pub(crate) async fn ingest_notify(&self, payload: Bytes) {
        self.metrics.inbound("notify");

        let envelope = match RequestEnvelope::decode(&payload) {
            Ok(envelope) => envelope,
            Err(cause) => {
                let error = Error::from(cause);
                warn!(%error, "notify delivery dropped");
                return;
            }
        };

        if envelope.receiver != self.identity {
            let error = Error::WrongReceiver {
                expected: self.identity.clone(),
                actual: envelope.receiver.clone(),
            };
            debug!(%error, "notify delivery dropped");
            return;
        }

        let Some(entry) = self.registry.lookup(&envelope.method) else {
            let error = Error::MethodNotFound(envelope.method.clone());
            debug!(%error, "notify delivery dropped");
            return;
        };

        self.scheduler.dispatch(entry, envelope).await;
    }
}

/// Adapts [`Ingress::ingest_task`] to the queue transport's sink.
pub(crate) struct TaskSink(pub(crate) Arc<Ingress>);

#[async_trait::async_trait]
impl DeliverySink for TaskSink {
    async fn deliver(&self, payload: Bytes) -> Result<(), Error> {
        self.0.ingest_task(payload).await
    }
}

/// Adapts [`Ingress::ingest_notify`] to the pub/sub transport's sink.
pub(crate) struct NotifySink(pub(crate) Arc<Ingress>);

#[async_trait::async_trait]
impl DeliverySink for NotifySink {
    async fn deliver(&self, payload: Bytes) -> Result<(), Error> {
        self.0.ingest_notify(payload).await;
        Ok(())
    }
}
