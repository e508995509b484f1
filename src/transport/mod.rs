// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Transport adapters and their seams.
//!
//! The runtime talks to brokers through the [`QueueTransport`] and
//! [`PubsubTransport`] traits so tests can substitute in-process
//! implementations; production wiring uses the NATS-backed types in
//! [`queue`] and [`pubsub`].

pub mod pubsub;
pub mod queue;
pub mod rpc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Error;

pub use pubsub::NatsPubsub;
pub use queue::JetStreamQueue;
pub use rpc::{RpcClient, RpcServer, RPC_PORT};

/// Receives one raw inbound payload from a transport.
///
/// For queue transports the return value is the acknowledgement
/// decision: `Ok` acknowledges, `Err` asks for redelivery. Pub/sub
/// transports ignore it.
#[async_trait]
pub trait DeliverySink: Send + Sync {
    async fn deliver(&self, payload: Bytes) -> Result<(), Error>;
}

/// At-least-once queued delivery backed by an external broker.
#[async_trait]
pub trait QueueTransport: Send + Sync {
    /// Publish one payload to a topic.
    async fn publish(&self, topic: &str, payload: Bytes) -> anyhow::Result<()>;

    /// Install the permanent consumer for `topic`. All instances
    /// passing the same `channel` compete for messages; `workers`
    /// bounds concurrent deliveries into the sink.
    async fn subscribe(
        &self,
        topic: &str,
        channel: &str,
        workers: usize,
        sink: std::sync::Arc<dyn DeliverySink>,
    ) -> anyhow::Result<()>;

    /// Stop the producer and all consumers.
    async fn shutdown(&self);
}

/// Fan-out delivery: every subscriber of a subject sees every message.
#[async_trait]
pub trait PubsubTransport: Send + Sync {
    async fn publish(&self, subject: &str, payload: Bytes) -> anyhow::Result<()>;

    async fn subscribe(
        &self,
        subject: &str,
        sink: std::sync::Arc<dyn DeliverySink>,
    ) -> anyhow::Result<()>;

    async fn shutdown(&self);
}
