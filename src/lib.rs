// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Uniform messaging and dispatch fabric for cooperating services.
//!
//! A process registers named methods once, then any peer can invoke
//! them through whichever transport fits the delivery semantics it
//! needs:
//!
//! - **call** — synchronous request/reply over HTTP/2 cleartext;
//! - **task** — at-least-once queued delivery;
//! - **notify** — fan-out pub/sub to every instance of a service.
//!
//! All three carry the same MessagePack-encoded envelope and feed the
//! same handler contract. The asynchronous paths dispatch through a
//! per-method concurrency scheduler; the synchronous path runs the
//! handler in place so the reply stays on the serving task.
//!
//! ```no_run
//! use unimsg::{method_fn, protocol::ResultEnvelope, RuntimeBuilder};
//!
//! # async fn example() -> anyhow::Result<()> {
//! unimsg::logging::init();
//!
//! let runtime = RuntimeBuilder::new("greeter")
//!     .nats_url("nats://localhost:4222")
//!     .rpc_server()
//!     .build()
//!     .await?;
//!
//! runtime.register(
//!     "hello",
//!     method_fn(|envelope| async move {
//!         let name: String = envelope.unmarshal()?;
//!         Ok(Some(ResultEnvelope::new(&format!("hello, {name}"), false)?))
//!     }),
//!     0,
//! );
//!
//! runtime.run().await
//! # }
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod protocol;
pub mod runtime;
pub mod transport;

mod http_server;

pub use api::handler::{method_fn, Method, MethodResult};
pub use error::Error;
pub use protocol::{
    RequestEnvelope, ResultEnvelope, TargetResolver, NOTIFY_TOPIC_PREFIX, TASK_TOPIC_PREFIX,
};
pub use runtime::{Runtime, RuntimeBuilder};
pub use transport::{
    DeliverySink, PubsubTransport, QueueTransport, RpcClient, RpcServer, RPC_PORT,
};
