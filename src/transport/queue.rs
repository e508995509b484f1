// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! At-least-once queue transport on NATS JetStream.
//!
//! One stream per topic, one durable pull consumer per channel: every
//! instance of a service subscribes with the same channel name, so the
//! instances compete for messages. Delivery is at-least-once; the
//! acknowledgement decision comes from the sink.

use std::sync::Arc;

use async_nats::jetstream;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{DeliverySink, QueueTransport};

/// JetStream stream and consumer names reject the characters that are
/// legal in subjects; fold them away.
fn js_name(name: &str) -> String {
    name.replace(['.', '*', '>', '/', '\\', ' '], "_")
}

/// JetStream-backed [`QueueTransport`].
pub struct JetStreamQueue {
    context: jetstream::Context,
    cancel: CancellationToken,
}

impl JetStreamQueue {
    pub fn new(client: async_nats::Client, cancel: CancellationToken) -> Self {
        Self {
            context: jetstream::new(client),
            cancel,
        }
    }
}

#[async_trait]
impl QueueTransport for JetStreamQueue {
    async fn publish(&self, topic: &str, payload: Bytes) -> anyhow::Result<()> {
        self.context
            .publish(topic.to_string(), payload)
            .await?
            .await?;
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
        channel: &str,
        workers: usize,
        sink: Arc<dyn DeliverySink>,
    ) -> anyhow::Result<()> {
        let stream = self
            .context
            .get_or_create_stream(jetstream::stream::Config {
                name: js_name(topic),
                subjects: vec![topic.to_string()],
                ..Default::default()
            })
            .await?;

        let durable = js_name(channel);
        let consumer = stream
            .get_or_create_consumer(
                &durable,
                jetstream::consumer::pull::Config {
                    durable_name: Some(durable.clone()),
                    ..Default::default()
                },
            )
            .await?;

        let mut messages = consumer.messages().await?;
        let limit = Arc::new(Semaphore::new(workers.max(1)));
        let cancel = self.cancel.clone();
        let topic = topic.to_string();
        debug!(%topic, %durable, "queue subscribed");

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    next = messages.next() => {
                        let Some(delivery) = next else { break };
                        let message = match delivery {
                            Ok(message) => message,
                            Err(error) => {
                                warn!(%error, %topic, "queue consumer error");
                                continue;
                            }
                        };

                        let Ok(permit) = limit.clone().acquire_owned().await else {
                            break;
                        };
                        let sink = sink.clone();
                        tokio::spawn(async move {
                            let decision = sink.deliver(message.payload.clone()).await;
                            match decision {
                                Ok(()) => {
                                    if let Err(error) = message.ack().await {
                                        warn!(%error, "queue ack failed");
                                    }
                                }
                                Err(_) => {
                                    if let Err(error) = message
                                        .ack_with(jetstream::AckKind::Nak(None))
                                        .await
                                    {
                                        warn!(%error, "queue nak failed");
                                    }
                                }
                            }
                            drop(permit);
                        });
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn js_name_folds_subject_characters() {
        assert_eq!(js_name("_.task_s1"), "__task_s1");
        assert_eq!(js_name("a.b>c*d/e"), "a_b_c_d_e");
    }
}
