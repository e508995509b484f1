// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Synchronous request/reply transport over HTTP/2 cleartext.
//!
//! Every request body is an encoded request envelope; every successful
//! response body is an encoded result envelope. The server invokes the
//! handler on the serving task — HTTP/2 stream multiplexing already
//! provides concurrency, and the reply needs the return value in hand —
//! so the scheduler is bypassed on this path.

use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use bytes::Bytes;
use futures::FutureExt;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::CONTENT_TYPE;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::Error;
use crate::protocol::{RequestEnvelope, ResultEnvelope};
use crate::runtime::ingress::Ingress;

/// Default TCP port of the request/reply transport.
pub const RPC_PORT: u16 = 19080;

/// Content type of both request and response bodies.
pub const RPC_CONTENT_TYPE: &str = "application/msgpack";

/// Certificate/key pair enabling TLS on the server.
#[derive(Debug, Clone)]
pub struct TlsIdentity {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

/// HTTP/2 cleartext (or TLS) server for the request/reply transport.
pub struct RpcServer {
    addr: SocketAddr,
    tls: Option<TlsIdentity>,
    cancel: CancellationToken,
    local_addr: OnceLock<SocketAddr>,
}

impl RpcServer {
    pub(crate) fn new(addr: SocketAddr, tls: Option<TlsIdentity>, cancel: CancellationToken) -> Self {
        Self {
            addr,
            tls,
            cancel,
            local_addr: OnceLock::new(),
        }
    }

    /// The address actually bound, available after `start`.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    pub(crate) async fn start(&self, ingress: Arc<Ingress>, access_log: bool) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.addr).await?;
        let local = listener.local_addr()?;
        let _ = self.local_addr.set(local);

        let acceptor = match &self.tls {
            Some(identity) => Some(TlsAcceptor::from(Arc::new(load_tls(identity)?))),
            None => None,
        };
        info!(%local, tls = acceptor.is_some(), "rpc server listening");

        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    accepted = listener.accept() => {
                        let (stream, _peer) = match accepted {
                            Ok(connection) => connection,
                            Err(error) => {
                                warn!(%error, "rpc accept failed");
                                continue;
                            }
                        };

                        let ingress = ingress.clone();
                        let acceptor = acceptor.clone();
                        let cancel = cancel.clone();
                        tokio::spawn(async move {
                            match acceptor {
                                Some(tls) => match tls.accept(stream).await {
                                    Ok(stream) => {
                                        serve_connection(stream, ingress, access_log, cancel).await
                                    }
                                    Err(error) => debug!(%error, "rpc tls handshake failed"),
                                },
                                None => serve_connection(stream, ingress, access_log, cancel).await,
                            }
                        });
                    }
                }
            }
        });

        Ok(())
    }

    pub(crate) fn shutdown(&self) {
        self.cancel.cancel();
    }
}

fn load_tls(identity: &TlsIdentity) -> anyhow::Result<ServerConfig> {
    let certs = rustls_pemfile::certs(&mut BufReader::new(File::open(&identity.cert_path)?))
        .collect::<Result<Vec<_>, _>>()?;
    let key = rustls_pemfile::private_key(&mut BufReader::new(File::open(&identity.key_path)?))?
        .ok_or_else(|| anyhow::anyhow!("no private key in {}", identity.key_path.display()))?;

    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    config.alpn_protocols = vec![b"h2".to_vec()];
    Ok(config)
}

async fn serve_connection<S>(
    stream: S,
    ingress: Arc<Ingress>,
    access_log: bool,
    cancel: CancellationToken,
) where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let service = service_fn(move |request: Request<Incoming>| {
        let ingress = ingress.clone();
        async move {
            Ok::<_, std::convert::Infallible>(handle_request(ingress, access_log, request).await)
        }
    });

    let connection =
        hyper::server::conn::http2::Builder::new(TokioExecutor::new())
            .serve_connection(TokioIo::new(stream), service);

    tokio::select! {
        _ = cancel.cancelled() => {}
        outcome = connection => {
            if let Err(error) = outcome {
                debug!(%error, "rpc connection ended");
            }
        }
    }
}

async fn handle_request(
    ingress: Arc<Ingress>,
    access_log: bool,
    request: Request<Incoming>,
) -> Response<Full<Bytes>> {
    ingress.metrics.inbound("rpc");

    let body = match request.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(error) => {
            error!(%error, "rpc: failed to read request body");
            return status_reply(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    let envelope = match RequestEnvelope::decode(&body) {
        Ok(envelope) => envelope,
        Err(cause) => {
            let error = Error::from(cause);
            error!(%error, "rpc request rejected");
            return status_reply(StatusCode::BAD_REQUEST);
        }
    };

    if envelope.receiver != ingress.identity {
        let error = Error::WrongReceiver {
            expected: ingress.identity.clone(),
            actual: envelope.receiver.clone(),
        };
        error!(%error, "rpc request rejected");
        return status_reply(StatusCode::NOT_ACCEPTABLE);
    }

    let Some(entry) = ingress.registry.lookup(&envelope.method) else {
        let error = Error::MethodNotFound(envelope.method.clone());
        error!(%error, "rpc request rejected");
        return status_reply(StatusCode::NOT_FOUND);
    };

    let method = envelope.method.clone();
    let sender = envelope.sender.clone();
    if access_log {
        debug!(%method, %sender, "rpc access");
    }

    let started = Instant::now();
    let outcome = AssertUnwindSafe(entry.handler().call(envelope))
        .catch_unwind()
        .await;
    if access_log {
        debug!(
            %method,
            %sender,
            elapsed_ns = started.elapsed().as_nanos() as u64,
            "rpc access finished"
        );
    }

    let mut result = match outcome {
        Ok(Ok(Some(result))) => result,
        Ok(Ok(None)) => ResultEnvelope::ok(),
        Ok(Err(cause)) => {
            ingress.metrics.handler_error(&method);
            let error = Error::Handler(cause.to_string());
            warn!(%method, %error, "rpc reply degraded");
            let mut result = ResultEnvelope::ok();
            result.message = cause.to_string();
            result
        }
        Err(_) => {
            ingress.metrics.handler_error(&method);
            let error = Error::Handler("handler panicked".to_string());
            error!(%method, %error, "rpc reply degraded");
            let mut result = ResultEnvelope::ok();
            result.message = "handler panicked".to_string();
            result
        }
    };

    if result.http_status == 0 {
        result.http_status = 200;
    }
    let status = StatusCode::from_u16(result.http_status).unwrap_or(StatusCode::OK);

    match result.encode() {
        Ok(payload) => Response::builder()
            .status(status)
            .header(CONTENT_TYPE, RPC_CONTENT_TYPE)
            .body(Full::new(payload))
            .unwrap_or_else(|_| status_reply(StatusCode::INTERNAL_SERVER_ERROR)),
        Err(error) => {
            error!(%error, "rpc: result encoding failed");
            status_reply(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

fn status_reply(status: StatusCode) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    response
}

/// HTTP/2 cleartext client for one peer address.
///
/// A fresh connection is opened per call and closed after the reply:
/// peers can be redeployed between calls, and pooling would pin stale
/// branch targets.
pub struct RpcClient {
    authority: String,
}

impl RpcClient {
    /// Client for an explicit `host:port` authority.
    pub fn new(authority: impl Into<String>) -> Self {
        let authority = authority.into();
        if authority.is_empty() {
            return Self::for_service("localhost", RPC_PORT);
        }
        Self { authority }
    }

    /// Client for a service host on the given RPC port.
    pub fn for_service(host: &str, port: u16) -> Self {
        let host = if host.is_empty() { "localhost" } else { host };
        Self {
            authority: format!("{host}:{port}"),
        }
    }

    /// POST one encoded request envelope and decode the reply.
    pub async fn call(&self, payload: Bytes) -> Result<ResultEnvelope, Error> {
        let stream = TcpStream::connect(&self.authority)
            .await
            .map_err(|error| Error::Transport(error.into()))?;

        let (mut sender, connection) = hyper::client::conn::http2::handshake(
            TokioExecutor::new(),
            TokioIo::new(stream),
        )
        .await
        .map_err(|error| Error::Transport(error.into()))?;
        tokio::spawn(async move {
            if let Err(error) = connection.await {
                debug!(%error, "rpc client connection ended");
            }
        });

        let request = Request::builder()
            .method(hyper::Method::POST)
            .uri(format!("http://{}/", self.authority))
            .header(CONTENT_TYPE, RPC_CONTENT_TYPE)
            .body(Full::new(payload))
            .map_err(|error| Error::Transport(error.into()))?;

        let response = sender
            .send_request(request)
            .await
            .map_err(|error| Error::Transport(error.into()))?;

        let status = response.status();
        if status.as_u16() >= 400 {
            return Err(Error::RpcStatus(status.as_u16()));
        }

        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|error| Error::Transport(error.into()))?
            .to_bytes();

        Ok(ResultEnvelope::decode(&body)?)
    }
}
