// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Fan-out pub/sub transport on core NATS.
//!
//! No queue group and no acknowledgement: every subscriber of a
//! subject sees every message, and an unprocessable message is simply
//! dropped.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{DeliverySink, PubsubTransport};

/// Core-NATS-backed [`PubsubTransport`].
pub struct NatsPubsub {
    client: async_nats::Client,
    cancel: CancellationToken,
}

impl NatsPubsub {
    pub fn new(client: async_nats::Client, cancel: CancellationToken) -> Self {
        Self { client, cancel }
    }
}

#[async_trait]
impl PubsubTransport for NatsPubsub {
    async fn publish(&self, subject: &str, payload: Bytes) -> anyhow::Result<()> {
        self.client.publish(subject.to_string(), payload).await?;
        self.client.flush().await?;
        Ok(())
    }

    async fn subscribe(&self, subject: &str, sink: Arc<dyn DeliverySink>) -> anyhow::Result<()> {
        let mut subscription = self.client.subscribe(subject.to_string()).await?;
        let cancel = self.cancel.clone();
        let subject = subject.to_string();
        debug!(%subject, "pub/sub subscribed");

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    next = subscription.next() => {
                        let Some(message) = next else { break };
                        // Deliveries run in arrival order; the sink's
                        // scheduler absorbs any slow handlers.
                        let _ = sink.deliver(message.payload).await;
                    }
                }
            }
        });

        Ok(())
    }

    async fn shutdown(&self) {
        self.cancel.cancel();
    }
}
