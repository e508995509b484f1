// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! The application shell: one `Runtime` per process, built by
//! `RuntimeBuilder`, owning identity, registry, scheduler and every
//! transport client.
//!
//! Handlers are registered before `start`; the registry is read-mostly
//! afterwards. Inbound transports start in a fixed order (queue,
//! pub/sub, RPC, operational HTTP) and shut down in reverse; every
//! shutdown step is best-effort so a partial failure cannot stall the
//! rest.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::api::handler::Method;
use crate::config::RuntimeConfig;
use crate::error::Error;
use crate::metrics::Metrics;
use crate::protocol::{
    RequestEnvelope, ResultEnvelope, TargetResolver, NOTIFY_TOPIC_PREFIX, TASK_TOPIC_PREFIX,
};
use crate::runtime::ingress::{Ingress, NotifySink, TaskSink};
use crate::runtime::registry::MethodRegistry;
use crate::runtime::scheduler::Scheduler;
use crate::transport::rpc::{RpcClient, RpcServer, TlsIdentity, RPC_PORT};
use crate::transport::{JetStreamQueue, NatsPubsub, PubsubTransport, QueueTransport};

/// Builder for [`Runtime`] instances.
///
/// # Example
///
/// ```no_run
/// use unimsg::runtime::RuntimeBuilder;
///
/// # async fn example() -> anyhow::Result<()> {
/// let runtime = RuntimeBuilder::new("billing")
///     .nats_url("nats://localhost:4222")
///     .rpc_server()
///     .build()
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct RuntimeBuilder {
    name: String,
    distinguish_branch: bool,
    branch: Option<String>,
    config: Option<RuntimeConfig>,
    rpc_enabled: bool,
    rpc_bind: Option<SocketAddr>,
    rpc_port: u16,
    rpc_tls: Option<TlsIdentity>,
    nats_url: Option<String>,
    queue: Option<Arc<dyn QueueTransport>>,
    pubsub: Option<Arc<dyn PubsubTransport>>,
    http_addr: Option<SocketAddr>,
    cancel: Option<CancellationToken>,
}

impl RuntimeBuilder {
    /// A builder for a service with the given logical name. Names are
    /// always lower-cased.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into().to_lowercase(),
            distinguish_branch: false,
            branch: None,
            config: None,
            rpc_enabled: false,
            rpc_bind: None,
            rpc_port: RPC_PORT,
            rpc_tls: None,
            nats_url: None,
            queue: None,
            pubsub: None,
            http_addr: None,
            cancel: None,
        }
    }

    /// Partition this service by deployment branch: the effective
    /// identity becomes `name_<branch>`.
    pub fn distinguish_branch(mut self, enabled: bool) -> Self {
        self.distinguish_branch = enabled;
        self
    }

    /// Explicit branch tag, bypassing the environment lookup.
    pub fn branch_tag(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    /// Explicit configuration, bypassing the layered load.
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Serve the request/reply transport on the default port.
    pub fn rpc_server(mut self) -> Self {
        self.rpc_enabled = true;
        self
    }

    /// Serve the request/reply transport on an explicit address.
    pub fn rpc_addr(mut self, addr: SocketAddr) -> Self {
        self.rpc_enabled = true;
        self.rpc_bind = Some(addr);
        self
    }

    /// Port used when dialling peers (and binding, unless `rpc_addr`
    /// was given).
    pub fn rpc_port(mut self, port: u16) -> Self {
        self.rpc_port = port;
        self
    }

    /// Serve the request/reply transport over TLS.
    pub fn rpc_tls(mut self, cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        self.rpc_tls = Some(TlsIdentity {
            cert_path: cert_path.into(),
            key_path: key_path.into(),
        });
        self
    }

    /// Connect to NATS and back the queue and pub/sub transports with
    /// it. Explicitly supplied transports take precedence.
    pub fn nats_url(mut self, url: impl Into<String>) -> Self {
        self.nats_url = Some(url.into());
        self
    }

    /// Supply a queue transport directly.
    pub fn queue(mut self, queue: Arc<dyn QueueTransport>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Supply a pub/sub transport directly.
    pub fn pubsub(mut self, pubsub: Arc<dyn PubsubTransport>) -> Self {
        self.pubsub = Some(pubsub);
        self
    }

    /// Serve `/health` and `/metrics` on the given address.
    pub fn http_server(mut self, addr: SocketAddr) -> Self {
        self.http_addr = Some(addr);
        self
    }

    /// Root cancellation token for graceful shutdown. A fresh token is
    /// created when not provided.
    pub fn cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub async fn build(self) -> anyhow::Result<Runtime> {
        let config = self.config.unwrap_or_else(RuntimeConfig::load);
        let resolver = match self.branch {
            Some(branch) => TargetResolver::new(self.distinguish_branch, branch),
            None => TargetResolver::from_env(self.distinguish_branch),
        };
        let identity = resolver.resolve(&self.name);
        let cancel = self.cancel.unwrap_or_default();
        let metrics = Metrics::new();
        let registry = MethodRegistry::new();
        let scheduler = Scheduler::new(metrics.clone());

        let (mut queue, mut pubsub) = (self.queue, self.pubsub);
        if let Some(url) = &self.nats_url {
            if queue.is_none() || pubsub.is_none() {
                let client = async_nats::connect(url.as_str()).await?;
                info!(%url, "nats connected");
                if queue.is_none() {
                    queue = Some(Arc::new(JetStreamQueue::new(
                        client.clone(),
                        cancel.child_token(),
                    )));
                }
                if pubsub.is_none() {
                    pubsub = Some(Arc::new(NatsPubsub::new(client, cancel.child_token())));
                }
            }
        }

        let rpc = if self.rpc_enabled {
            let addr = self
                .rpc_bind
                .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], self.rpc_port)));
            Some(RpcServer::new(addr, self.rpc_tls, cancel.child_token()))
        } else {
            None
        };

        let ingress = Arc::new(Ingress {
            identity: identity.clone(),
            registry: registry.clone(),
            scheduler,
            metrics: metrics.clone(),
            requeue_malformed: config.queue.requeue_malformed,
        });

        Ok(Runtime {
            inner: Arc::new(RuntimeInner {
                identity,
                resolver,
                config,
                registry,
                metrics,
                ingress,
                rpc,
                rpc_port: self.rpc_port,
                queue,
                pubsub,
                http_addr: self.http_addr,
                http_bound: OnceLock::new(),
                http_cancel: cancel.child_token(),
                cancel,
                started: AtomicBool::new(false),
            }),
        })
    }
}

struct RuntimeInner {
    identity: String,
    resolver: TargetResolver,
    config: RuntimeConfig,
    registry: MethodRegistry,
    metrics: Metrics,
    ingress: Arc<Ingress>,
    rpc: Option<RpcServer>,
    rpc_port: u16,
    queue: Option<Arc<dyn QueueTransport>>,
    pubsub: Option<Arc<dyn PubsubTransport>>,
    http_addr: Option<SocketAddr>,
    http_bound: OnceLock<SocketAddr>,
    http_cancel: CancellationToken,
    cancel: CancellationToken,
    started: AtomicBool,
}

/// A process's handle on the messaging fabric.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl Runtime {
    pub fn builder(name: impl Into<String>) -> RuntimeBuilder {
        RuntimeBuilder::new(name)
    }

    /// Effective wire identity (`name` or `name_<branch>`).
    pub fn identity(&self) -> &str {
        &self.inner.identity
    }

    pub fn resolver(&self) -> &TargetResolver {
        &self.inner.resolver
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    pub fn metrics(&self) -> &Metrics {
        &self.inner.metrics
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    /// Register a method handler. Registration belongs in the wiring
    /// phase, before `start`.
    pub fn register(&self, method: &str, handler: Arc<dyn Method>, concurrency: i64) {
        self.inner.registry.register(method, handler, concurrency);
    }

    /// Change a registered method's concurrency. Takes effect for
    /// subsequent dispatches only.
    pub fn set_concurrency(&self, method: &str, concurrency: i64) {
        self.inner.registry.set_concurrency(method, concurrency);
    }

    /// Address the RPC server actually bound, available after `start`.
    pub fn rpc_addr(&self) -> Option<SocketAddr> {
        self.inner.rpc.as_ref().and_then(|rpc| rpc.local_addr())
    }

    /// Address the operational HTTP server actually bound.
    pub fn http_addr(&self) -> Option<SocketAddr> {
        self.inner.http_bound.get().copied()
    }

    /// Start inbound transports: queue subscription, pub/sub
    /// subscription, RPC server, operational HTTP server.
    ///
    /// Broker subscription failures are logged and tolerated — the
    /// process can still serve RPC; bind failures are returned.
    pub async fn start(&self) -> anyhow::Result<()> {
        let inner = &self.inner;
        if inner.started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        if let Some(queue) = &inner.queue {
            let topic = format!("{TASK_TOPIC_PREFIX}{}", inner.identity);
            let sink = Arc::new(TaskSink(inner.ingress.clone()));
            match queue
                .subscribe(&topic, TASK_TOPIC_PREFIX, inner.config.n_workers, sink)
                .await
            {
                Ok(()) => debug!(%topic, "task subscription installed"),
                Err(error) => error!(%error, %topic, "task subscription failed"),
            }
        }

        if let Some(pubsub) = &inner.pubsub {
            let subject = format!("{NOTIFY_TOPIC_PREFIX}{}", inner.identity);
            let sink = Arc::new(NotifySink(inner.ingress.clone()));
            match pubsub.subscribe(&subject, sink).await {
                Ok(()) => debug!(%subject, "notify subscription installed"),
                Err(error) => error!(%error, %subject, "notify subscription failed"),
            }
        }

        if let Some(rpc) = &inner.rpc {
            rpc.start(inner.ingress.clone(), inner.config.rpc.server.access_log)
                .await?;
        }

        if let Some(addr) = inner.http_addr {
            let bound = crate::http_server::start(
                addr,
                inner.metrics.clone(),
                inner.http_cancel.clone(),
                inner.config.http.server.access_log,
            )
            .await?;
            let _ = inner.http_bound.set(bound);
        }

        info!(identity = %inner.identity, "runtime started");
        Ok(())
    }

    /// Stop components in reverse startup order. Best-effort: running
    /// async handlers are not awaited, the broker redelivers anything
    /// unacknowledged.
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        info!(identity = %inner.identity, "runtime shutting down");

        inner.http_cancel.cancel();
        if let Some(rpc) = &inner.rpc {
            debug!("rpc server shutting down");
            rpc.shutdown();
        }
        if let Some(pubsub) = &inner.pubsub {
            debug!("pub/sub disconnecting");
            pubsub.shutdown().await;
        }
        if let Some(queue) = &inner.queue {
            debug!("queue disconnecting");
            queue.shutdown().await;
        }

        inner.cancel.cancel();
    }

    /// Start, then block until SIGINT/SIGTERM (or cancellation), then
    /// shut down.
    pub async fn run(&self) -> anyhow::Result<()> {
        self.start().await?;
        wait_for_signal(self.inner.cancel.clone()).await;
        self.shutdown().await;
        Ok(())
    }

    /// Synchronous RPC to a peer service. Fills in routing fields,
    /// encodes, POSTs, decodes the result envelope.
    pub async fn call(
        &self,
        receiver: &str,
        method: &str,
        mut envelope: RequestEnvelope,
    ) -> Result<ResultEnvelope, Error> {
        let inner = &self.inner;
        envelope.receiver = inner.resolver.resolve(receiver);
        envelope.sender = inner.identity.clone();
        envelope.method = method.to_string();
        let payload = envelope.encode()?;

        let client = RpcClient::for_service(&envelope.receiver, inner.rpc_port);
        match client.call(payload).await {
            Ok(result) => {
                debug!(%receiver, %method, "rpc call finished");
                Ok(result)
            }
            Err(error) => {
                error!(%receiver, %method, %error, "rpc call failed");
                Err(error)
            }
        }
    }

    /// Queue a task for a peer service: at-least-once, no reply.
    pub async fn task(
        &self,
        receiver: &str,
        method: &str,
        mut envelope: RequestEnvelope,
    ) -> Result<(), Error> {
        let inner = &self.inner;
        let Some(queue) = &inner.queue else {
            return Err(Error::NoQueueTransport);
        };

        envelope.receiver = inner.resolver.resolve(receiver);
        envelope.sender = inner.identity.clone();
        envelope.method = method.to_string();
        let payload = envelope.encode()?;

        let topic = format!("{TASK_TOPIC_PREFIX}{}", envelope.receiver);
        match queue.publish(&topic, payload).await {
            Ok(()) => {
                debug!(%receiver, %method, "task published");
                Ok(())
            }
            Err(error) => {
                error!(%receiver, %method, %error, "task publish failed");
                Err(Error::Transport(error))
            }
        }
    }

    /// Notify every instance of a peer service: fan-out, no reply.
    pub async fn notify(
        &self,
        receiver: &str,
        method: &str,
        mut envelope: RequestEnvelope,
    ) -> Result<(), Error> {
        let inner = &self.inner;
        let Some(pubsub) = &inner.pubsub else {
            return Err(Error::NoPubsubTransport);
        };

        envelope.receiver = inner.resolver.resolve(receiver);
        envelope.sender = inner.identity.clone();
        envelope.method = method.to_string();
        let payload = envelope.encode()?;

        let subject = format!("{NOTIFY_TOPIC_PREFIX}{}", envelope.receiver);
        match pubsub.publish(&subject, payload).await {
            Ok(()) => {
                debug!(%receiver, %method, "notify published");
                Ok(())
            }
            Err(error) => {
                error!(%receiver, %method, %error, "notify publish failed");
                Err(Error::Transport(error))
            }
        }
    }
}

async fn wait_for_signal(cancel: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(error) => {
                error!(%error, "signal handler installation failed");
                cancel.cancelled().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
            _ = cancel.cancelled() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = cancel.cancelled() => {}
        }
    }
}
